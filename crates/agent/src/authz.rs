//! The authorization gate applied to every artifact of a submission.

use models::{Prototype, User};
use stationxml::Artifact;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("user is not permitted to submit metadata for network {0}")]
    Forbidden(String),
    #[error("no active prototype for network {0}")]
    PrototypeMissing(String),
    #[error("declared network end date conflicts with the active prototype")]
    PrototypeConflictEnd,
    #[error("declared restricted status conflicts with the active prototype")]
    PrototypeConflictRestricted,
}

impl AuthError {
    /// The bare kind tag, recorded on rejected index records; the Display
    /// form carries the detail for logs and HTTP responses.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Unauthenticated => "Unauthenticated",
            AuthError::Forbidden(_) => "Forbidden",
            AuthError::PrototypeMissing(_) => "PrototypeMissing",
            AuthError::PrototypeConflictEnd => "PrototypeConflictEnd",
            AuthError::PrototypeConflictRestricted => "PrototypeConflictRestricted",
        }
    }
}

/// Admins may submit for any network. Operators must be bound to the
/// artifact's network epoch, and the artifact's declared end date and
/// restricted flag must agree with the active prototype.
pub fn authorize_artifact(
    user: &User,
    artifact: &Artifact,
    active: Option<&Prototype>,
) -> Result<(), AuthError> {
    if user.is_admin() {
        return Ok(());
    }

    match &user.prototype {
        Some((code, start))
            if *code == artifact.network.code && *start == artifact.network.start => {}
        _ => return Err(AuthError::Forbidden(artifact.network.to_string())),
    }

    let Some(prototype) = active else {
        return Err(AuthError::PrototypeMissing(artifact.network.to_string()));
    };
    if artifact.network.end != prototype.network.end {
        return Err(AuthError::PrototypeConflictEnd);
    }
    if artifact.restricted != prototype.restricted {
        return Err(AuthError::PrototypeConflictRestricted);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{DateTime, Utc};
    use models::{NetworkKey, Role};
    use uuid::Uuid;

    fn start() -> DateTime<Utc> {
        "2020-01-01T00:00:00Z".parse().unwrap()
    }

    fn artifact(end: Option<&str>, restricted: bool) -> Artifact {
        Artifact {
            network: NetworkKey {
                code: "XX".to_string(),
                start: start(),
                end: end.map(|e| e.parse().unwrap()),
            },
            restricted,
            description: None,
            station: "STA01".to_string(),
            channel_count: 3,
            canonical: String::new(),
            hash: String::new(),
            document: Vec::new(),
        }
    }

    fn prototype(end: Option<&str>, restricted: bool) -> Prototype {
        Prototype {
            network: NetworkKey {
                code: "XX".to_string(),
                start: start(),
                end: end.map(|e| e.parse().unwrap()),
            },
            restricted,
            description: None,
            hash: "h".to_string(),
            created: Utc::now(),
        }
    }

    fn user(role: Role, prototype: Option<(&str, DateTime<Utc>)>) -> User {
        User {
            id: Uuid::new_v4(),
            username: "u".to_string(),
            digest: String::new(),
            salt: String::new(),
            role,
            prototype: prototype.map(|(code, start)| (code.to_string(), start)),
        }
    }

    #[test]
    fn admin_passes_without_a_prototype() {
        let admin = user(Role::Admin, None);
        assert!(authorize_artifact(&admin, &artifact(None, false), None).is_ok());
    }

    #[test]
    fn operator_must_be_bound_to_the_network() {
        let unbound = user(Role::Operator, None);
        let other = user(Role::Operator, Some(("YY", start())));
        let bound = user(Role::Operator, Some(("XX", start())));
        let proto = prototype(None, false);

        assert!(matches!(
            authorize_artifact(&unbound, &artifact(None, false), Some(&proto)),
            Err(AuthError::Forbidden(_))
        ));
        assert!(matches!(
            authorize_artifact(&other, &artifact(None, false), Some(&proto)),
            Err(AuthError::Forbidden(_))
        ));
        assert!(authorize_artifact(&bound, &artifact(None, false), Some(&proto)).is_ok());
    }

    #[test]
    fn operator_needs_an_active_prototype() {
        let bound = user(Role::Operator, Some(("XX", start())));
        assert!(matches!(
            authorize_artifact(&bound, &artifact(None, false), None),
            Err(AuthError::PrototypeMissing(_))
        ));
    }

    #[test]
    fn end_date_must_match_the_prototype() {
        let bound = user(Role::Operator, Some(("XX", start())));
        let proto = prototype(Some("2025-01-01T00:00:00Z"), false);
        assert!(matches!(
            authorize_artifact(&bound, &artifact(Some("2030-01-01T00:00:00Z"), false), Some(&proto)),
            Err(AuthError::PrototypeConflictEnd)
        ));
        assert!(
            authorize_artifact(&bound, &artifact(Some("2025-01-01T00:00:00Z"), false), Some(&proto))
                .is_ok()
        );
    }

    #[test]
    fn restricted_flag_must_match_the_prototype() {
        let bound = user(Role::Operator, Some(("XX", start())));
        let proto = prototype(None, true);
        assert!(matches!(
            authorize_artifact(&bound, &artifact(None, false), Some(&proto)),
            Err(AuthError::PrototypeConflictRestricted)
        ));
        assert!(authorize_artifact(&bound, &artifact(None, true), Some(&proto)).is_ok());
    }
}
