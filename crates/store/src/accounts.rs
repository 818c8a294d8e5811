//! Users, sessions, and the internal message inbox. Only as deep as the
//! authorization gate and the submission API need: credential verification,
//! bearer-token sessions with idle expiry, and admin notifications.

use chrono::{Duration, Utc};
use models::{Message, Role, Session, User};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::Result;

#[derive(Clone)]
pub struct Accounts {
    users: sled::Tree,
    sessions: sled::Tree,
    messages: sled::Tree,
}

fn digest(salt: &str, password: &str) -> String {
    hex::encode(Sha256::digest(format!("{salt}{password}").as_bytes()))
}

impl Accounts {
    pub fn new(users: sled::Tree, sessions: sled::Tree, messages: sled::Tree) -> Self {
        Self {
            users,
            sessions,
            messages,
        }
    }

    pub fn create_user(
        &self,
        username: &str,
        password: &str,
        role: Role,
        prototype: Option<(String, chrono::DateTime<Utc>)>,
    ) -> Result<User> {
        let salt = Uuid::new_v4().simple().to_string();
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            digest: digest(&salt, password),
            salt,
            role,
            prototype,
        };
        self.users
            .insert(user.id.as_bytes(), serde_json::to_vec(&user)?)?;
        Ok(user)
    }

    pub fn user(&self, id: Uuid) -> Result<Option<User>> {
        match self.users.get(id.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn users(&self) -> Result<Vec<User>> {
        let mut users = Vec::new();
        for entry in self.users.iter() {
            let (_, raw) = entry?;
            users.push(serde_json::from_slice::<User>(&raw)?);
        }
        Ok(users)
    }

    pub fn user_by_name(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .users()?
            .into_iter()
            .find(|user| user.username == username))
    }

    pub fn admins(&self) -> Result<Vec<User>> {
        Ok(self
            .users()?
            .into_iter()
            .filter(|user| user.role == Role::Admin)
            .collect())
    }

    /// Verify credentials and mint a session on success.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Option<Session>> {
        let Some(user) = self.user_by_name(username)? else {
            return Ok(None);
        };
        if digest(&user.salt, password) != user.digest {
            return Ok(None);
        }
        let session = Session {
            token: Uuid::new_v4().simple().to_string(),
            user_id: user.id,
            created: Utc::now(),
        };
        self.sessions
            .insert(session.token.as_bytes(), serde_json::to_vec(&session)?)?;
        Ok(Some(session))
    }

    /// Resolve a bearer token to its user. Expired sessions are dropped.
    pub fn session_user(&self, token: &str, max_age: Duration) -> Result<Option<User>> {
        let Some(raw) = self.sessions.get(token.as_bytes())? else {
            return Ok(None);
        };
        let session: Session = serde_json::from_slice(&raw)?;
        if Utc::now() - session.created > max_age {
            self.sessions.remove(token.as_bytes())?;
            return Ok(None);
        }
        self.user(session.user_id)
    }

    pub fn push_message(&self, message: &Message) -> Result<()> {
        self.messages
            .insert(message.id.as_bytes(), serde_json::to_vec(message)?)?;
        Ok(())
    }

    pub fn messages_for(&self, recipient: Uuid) -> Result<Vec<Message>> {
        let mut inbox = Vec::new();
        for entry in self.messages.iter() {
            let (_, raw) = entry?;
            let message: Message = serde_json::from_slice(&raw)?;
            if message.recipient == recipient {
                inbox.push(message);
            }
        }
        inbox.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(inbox)
    }
}
