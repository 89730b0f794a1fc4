use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub college: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub bio: Option<String>,
    pub created_at: String,
}

/// Public view of a user embedded in other responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub full_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Collaboration {
    pub id: String,
    pub user_id: String,
    pub project_id: String,
    pub message: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Donation {
    pub id: String,
    pub user_id: String,
    pub project_id: String,
    pub amount: f64,
    pub message: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Attachment {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub filename: String,
    pub original_filename: String,
    pub file_size: i64,
    pub file_type: String,
    pub file_path: String,
    pub uploaded_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DiscussionReply {
    pub id: String,
    pub discussion_id: String,
    pub parent_reply_id: Option<String>,
    pub author_id: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub actor_id: Option<String>,
    pub project_id: Option<String>,
    pub kind: String,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: String,
}

/// The two reaction types shared by project comments and discussion replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Heart,
}

impl ReactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReactionKind::Like => "like",
            ReactionKind::Heart => "heart",
        }
    }
}

impl FromStr for ReactionKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "like" => Ok(ReactionKind::Like),
            "heart" => Ok(ReactionKind::Heart),
            _ => Err(AppError::Validation("Invalid reaction type".to_string())),
        }
    }
}

impl fmt::Display for ReactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Completed,
    Paused,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Paused => "paused",
        }
    }
}

impl FromStr for ProjectStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ProjectStatus::Active),
            "completed" => Ok(ProjectStatus::Completed),
            "paused" => Ok(ProjectStatus::Paused),
            _ => Err(AppError::Validation(
                "Status must be one of active, completed, paused".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollaborationStatus {
    Pending,
    Accepted,
    Rejected,
}

impl CollaborationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CollaborationStatus::Pending => "pending",
            CollaborationStatus::Accepted => "accepted",
            CollaborationStatus::Rejected => "rejected",
        }
    }

    /// Only a pending request may move, and only to a terminal state.
    pub fn transition(self, to: CollaborationStatus) -> Result<CollaborationStatus, AppError> {
        match (self, to) {
            (CollaborationStatus::Pending, CollaborationStatus::Accepted)
            | (CollaborationStatus::Pending, CollaborationStatus::Rejected) => Ok(to),
            (CollaborationStatus::Pending, CollaborationStatus::Pending) => Err(
                AppError::Validation("Collaboration request is already pending".to_string()),
            ),
            (from, _) => Err(AppError::Conflict(format!(
                "Collaboration request already {from}"
            ))),
        }
    }
}

impl FromStr for CollaborationStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CollaborationStatus::Pending),
            "accepted" => Ok(CollaborationStatus::Accepted),
            "rejected" => Ok(CollaborationStatus::Rejected),
            other => Err(AppError::Internal(format!(
                "Unknown collaboration status: {other}"
            ))),
        }
    }
}

impl fmt::Display for CollaborationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Vote,
    Comment,
    Collaboration,
    Donation,
    Like,
    Reply,
    TeamChat,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Vote => "vote",
            NotificationKind::Comment => "comment",
            NotificationKind::Collaboration => "collaboration",
            NotificationKind::Donation => "donation",
            NotificationKind::Like => "like",
            NotificationKind::Reply => "reply",
            NotificationKind::TeamChat => "team_chat",
        }
    }
}
