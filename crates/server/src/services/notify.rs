//! Best-effort notification dispatch.
//!
//! Every side-effect notification in the service goes through [`Notifier`].
//! It writes on its own connection after the triggering mutation has
//! committed, so a failed write can never roll back or fail that mutation.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::NotificationKind;

pub struct Notice<'a> {
    pub recipient: &'a str,
    pub kind: NotificationKind,
    pub title: &'a str,
    pub message: String,
    pub actor: Option<&'a str>,
    pub project: Option<&'a str>,
}

#[derive(Clone)]
pub struct Notifier {
    pool: SqlitePool,
}

impl Notifier {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persists `notice` unless the actor is the recipient.
    ///
    /// Returns the new notification id, or `None` when the notice was
    /// suppressed or could not be written. Failures are logged, never returned.
    pub async fn notify(&self, notice: Notice<'_>) -> Option<String> {
        if notice.actor == Some(notice.recipient) {
            tracing::debug!(
                kind = notice.kind.as_str(),
                recipient = notice.recipient,
                "skipping self-notification"
            );
            return None;
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let written = sqlx::query(
            "INSERT INTO notifications (id, user_id, actor_id, project_id, kind, title, message, is_read, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&id)
        .bind(notice.recipient)
        .bind(notice.actor)
        .bind(notice.project)
        .bind(notice.kind.as_str())
        .bind(notice.title)
        .bind(&notice.message)
        .bind(&now)
        .execute(&self.pool)
        .await;

        match written {
            Ok(_) => Some(id),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    kind = notice.kind.as_str(),
                    recipient = notice.recipient,
                    "failed to create notification"
                );
                None
            }
        }
    }
}
