//! Toggle engine for votes, comment reactions, reply reactions and
//! discussion likes.
//!
//! Each toggle runs inside one transaction whose first statement is a write,
//! so SQLite hands it the write lock before anything is read and concurrent
//! toggles queue on the busy timeout rather than failing a lock upgrade. The
//! toggle is decided by which of delete, update or insert touches a row. The
//! unique indexes on the reaction tables remain the backstop: a unique
//! violation, or a lock still held after the timeout, re-runs the toggle once
//! against the now-visible row. Notifications are dispatched only after the
//! transaction has committed.

use std::future::Future;

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db::models::{NotificationKind, ReactionKind},
    error::{is_busy, is_unique_violation, AppError, Result},
    middleware::auth::RequestContext,
    services::{
        aggregate,
        notify::{Notice, Notifier},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToggleAction {
    Added,
    Removed,
    Changed,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoteOutcome {
    pub action: ToggleAction,
    pub vote_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentReactionOutcome {
    pub action: ToggleAction,
    pub like_count: i64,
    pub heart_count: i64,
    pub user_reaction: Option<ReactionKind>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplyReactionOutcome {
    pub action: ToggleAction,
    pub reaction_type: ReactionKind,
    pub count: i64,
    pub user_reacted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscussionLikeOutcome {
    pub liked: bool,
    pub like_count: i64,
}

async fn retry_on_conflict<T, F, Fut>(what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    match op().await {
        Err(e) if is_unique_violation(&e) || is_busy(&e) => {
            tracing::debug!(toggle = what, error = %e, "toggle conflicted, re-reading current state");
            Ok(op().await?)
        }
        other => Ok(other?),
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

// -- Votes --

async fn apply_vote(
    pool: &SqlitePool,
    user_id: &str,
    project_id: &str,
) -> std::result::Result<ToggleAction, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let removed = sqlx::query(
        "DELETE FROM votes WHERE user_id = ? AND project_id = ? AND is_upvote = 1",
    )
    .bind(user_id)
    .bind(project_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let action = if removed > 0 {
        ToggleAction::Removed
    } else {
        let restored = sqlx::query(
            "UPDATE votes SET is_upvote = 1 WHERE user_id = ? AND project_id = ? AND is_upvote = 0",
        )
        .bind(user_id)
        .bind(project_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if restored > 0 {
            ToggleAction::Changed
        } else {
            sqlx::query(
                "INSERT INTO votes (id, user_id, project_id, is_upvote, created_at) VALUES (?, ?, ?, 1, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(user_id)
            .bind(project_id)
            .bind(now())
            .execute(&mut *tx)
            .await?;
            ToggleAction::Added
        }
    };

    tx.commit().await?;
    Ok(action)
}

/// Upvote a project, or withdraw the caller's upvote.
///
/// Only a fresh upvote notifies the owner; restoring a non-upvote row or
/// removing a vote is silent.
pub async fn toggle_vote(
    pool: &SqlitePool,
    notifier: &Notifier,
    ctx: &RequestContext,
    project_id: &str,
) -> Result<VoteOutcome> {
    let actor = ctx.require_user()?;

    let (owner_id, title) =
        sqlx::query_as::<_, (String, String)>("SELECT owner_id, title FROM projects WHERE id = ?")
            .bind(project_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Project not found".to_string()))?;

    let actor_id = actor.id.as_str();
    let action = retry_on_conflict("vote", || apply_vote(pool, actor_id, project_id)).await?;

    if action == ToggleAction::Added {
        notifier
            .notify(Notice {
                recipient: &owner_id,
                kind: NotificationKind::Vote,
                title: "Project Liked",
                message: format!("{} liked your project \"{}\"", actor.full_name, title),
                actor: Some(&actor.id),
                project: Some(project_id),
            })
            .await;
    }

    tracing::info!(project_id, user_id = %actor.id, ?action, "vote toggled");

    Ok(VoteOutcome {
        action,
        vote_count: aggregate::vote_count(pool, project_id).await?,
    })
}

// -- Comment reactions --

/// Single-slot rule: the same type clears the slot, a different type
/// overwrites it in place, an empty slot takes the requested type.
async fn apply_comment_reaction(
    pool: &SqlitePool,
    user_id: &str,
    comment_id: &str,
    requested: ReactionKind,
) -> std::result::Result<ToggleAction, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let removed = sqlx::query(
        "DELETE FROM comment_reactions WHERE user_id = ? AND comment_id = ? AND reaction_type = ?",
    )
    .bind(user_id)
    .bind(comment_id)
    .bind(requested.as_str())
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let action = if removed > 0 {
        ToggleAction::Removed
    } else {
        let changed = sqlx::query(
            "UPDATE comment_reactions SET reaction_type = ? WHERE user_id = ? AND comment_id = ?",
        )
        .bind(requested.as_str())
        .bind(user_id)
        .bind(comment_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if changed > 0 {
            ToggleAction::Changed
        } else {
            sqlx::query(
                "INSERT INTO comment_reactions (id, user_id, comment_id, reaction_type, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(user_id)
            .bind(comment_id)
            .bind(requested.as_str())
            .bind(now())
            .execute(&mut *tx)
            .await?;
            ToggleAction::Added
        }
    };

    tx.commit().await?;
    Ok(action)
}

pub async fn toggle_comment_reaction(
    pool: &SqlitePool,
    ctx: &RequestContext,
    comment_id: &str,
    requested: ReactionKind,
) -> Result<CommentReactionOutcome> {
    let actor = ctx.require_user()?;

    let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM comments WHERE id = ?")
        .bind(comment_id)
        .fetch_one(pool)
        .await?;
    if exists == 0 {
        return Err(AppError::NotFound("Comment not found".to_string()));
    }

    let actor_id = actor.id.as_str();
    let action = retry_on_conflict("comment_reaction", || {
        apply_comment_reaction(pool, actor_id, comment_id, requested)
    })
    .await?;

    let counts = aggregate::comment_reaction_counts(pool, comment_id).await?;
    let user_reaction = aggregate::user_comment_reaction(pool, comment_id, &actor.id).await?;

    Ok(CommentReactionOutcome {
        action,
        like_count: counts.like,
        heart_count: counts.heart,
        user_reaction,
    })
}

// -- Reply reactions --

async fn apply_reply_reaction(
    pool: &SqlitePool,
    user_id: &str,
    reply_id: &str,
    kind: ReactionKind,
) -> std::result::Result<ToggleAction, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let removed = sqlx::query(
        "DELETE FROM reply_reactions WHERE user_id = ? AND reply_id = ? AND reaction_type = ?",
    )
    .bind(user_id)
    .bind(reply_id)
    .bind(kind.as_str())
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let action = if removed > 0 {
        ToggleAction::Removed
    } else {
        sqlx::query(
            "INSERT INTO reply_reactions (id, user_id, reply_id, reaction_type, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(reply_id)
        .bind(kind.as_str())
        .bind(now())
        .execute(&mut *tx)
        .await?;
        ToggleAction::Added
    };

    tx.commit().await?;
    Ok(action)
}

/// Presence toggle for one reaction type on a reply. Unlike comment
/// reactions, each type is its own slot, so a user may both like and heart
/// the same reply.
pub async fn toggle_reply_reaction(
    pool: &SqlitePool,
    ctx: &RequestContext,
    reply_id: &str,
    kind: ReactionKind,
) -> Result<ReplyReactionOutcome> {
    let actor = ctx.require_user()?;

    let exists =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM discussion_replies WHERE id = ?")
            .bind(reply_id)
            .fetch_one(pool)
            .await?;
    if exists == 0 {
        return Err(AppError::NotFound("Reply not found".to_string()));
    }

    let actor_id = actor.id.as_str();
    let action = retry_on_conflict("reply_reaction", || {
        apply_reply_reaction(pool, actor_id, reply_id, kind)
    })
    .await?;

    Ok(ReplyReactionOutcome {
        action,
        reaction_type: kind,
        count: aggregate::reply_reaction_count(pool, reply_id, kind).await?,
        user_reacted: action == ToggleAction::Added,
    })
}

// -- Discussion likes --

async fn apply_discussion_like(
    pool: &SqlitePool,
    user_id: &str,
    discussion_id: &str,
) -> std::result::Result<ToggleAction, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let removed =
        sqlx::query("DELETE FROM discussion_likes WHERE user_id = ? AND discussion_id = ?")
            .bind(user_id)
            .bind(discussion_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

    let action = if removed > 0 {
        ToggleAction::Removed
    } else {
        sqlx::query(
            "INSERT INTO discussion_likes (id, user_id, discussion_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(discussion_id)
        .bind(now())
        .execute(&mut *tx)
        .await?;
        ToggleAction::Added
    };

    tx.commit().await?;
    Ok(action)
}

pub async fn toggle_discussion_like(
    pool: &SqlitePool,
    notifier: &Notifier,
    ctx: &RequestContext,
    discussion_id: &str,
) -> Result<DiscussionLikeOutcome> {
    let actor = ctx.require_user()?;

    let (author_id, title) = sqlx::query_as::<_, (String, String)>(
        "SELECT author_id, title FROM discussions WHERE id = ?",
    )
    .bind(discussion_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Discussion not found".to_string()))?;

    let actor_id = actor.id.as_str();
    let action = retry_on_conflict("discussion_like", || {
        apply_discussion_like(pool, actor_id, discussion_id)
    })
    .await?;

    if action == ToggleAction::Added {
        notifier
            .notify(Notice {
                recipient: &author_id,
                kind: NotificationKind::Like,
                title: "Discussion Liked",
                message: format!("{} liked your discussion \"{}\"", actor.full_name, title),
                actor: Some(&actor.id),
                project: None,
            })
            .await;
    }

    Ok(DiscussionLikeOutcome {
        liked: action == ToggleAction::Added,
        like_count: aggregate::discussion_like_count(pool, discussion_id).await?,
    })
}
