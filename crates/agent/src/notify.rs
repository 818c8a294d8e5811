//! Inbox notifications emitted by the submission intake.

use chrono::Utc;
use models::{Message, User};
use store::Accounts;
use uuid::Uuid;

/// Drop one message into every administrator's inbox naming the stations
/// that were just staged. Returns the number of recipients.
pub fn notify_admins(
    accounts: &Accounts,
    submitter: &User,
    stations: &[String],
) -> store::Result<usize> {
    let admins = accounts.admins()?;
    let body = stations.join(", ");
    for admin in &admins {
        accounts.push_message(&Message {
            id: Uuid::new_v4(),
            recipient: admin.id,
            sender: submitter.id,
            subject: format!("New metadata submitted by {}", submitter.username),
            body: body.clone(),
            created: Utc::now(),
            read: false,
        })?;
    }
    Ok(admins.len())
}
