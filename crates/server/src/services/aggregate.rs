//! Derived counts, always computed from the rows that back them.
//!
//! Nothing here is cached or stored as a counter column. Funding in
//! particular is the live sum of the donation table.

use std::collections::HashMap;

use serde::Serialize;
use sqlx::SqlitePool;

use crate::{db::models::ReactionKind, error::Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, sqlx::FromRow)]
pub struct ProjectStats {
    pub vote_count: i64,
    pub comment_count: i64,
    pub collaboration_count: i64,
    pub current_funding: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReactionCounts {
    pub like: i64,
    pub heart: i64,
}

impl ReactionCounts {
    fn add(&mut self, kind: &str, count: i64) {
        match kind.parse::<ReactionKind>() {
            Ok(ReactionKind::Like) => self.like += count,
            Ok(ReactionKind::Heart) => self.heart += count,
            Err(_) => {}
        }
    }
}

/// Which reaction slots a single user holds on a reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReactionFlags {
    pub like: bool,
    pub heart: bool,
}

pub async fn vote_count(pool: &SqlitePool, project_id: &str) -> Result<i64> {
    Ok(sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM votes WHERE project_id = ? AND is_upvote = 1",
    )
    .bind(project_id)
    .fetch_one(pool)
    .await?)
}

pub async fn funding_total(pool: &SqlitePool, project_id: &str) -> Result<f64> {
    Ok(sqlx::query_scalar::<_, f64>(
        "SELECT COALESCE(SUM(amount), 0.0) FROM donations WHERE project_id = ?",
    )
    .bind(project_id)
    .fetch_one(pool)
    .await?)
}

/// Live per-project counters as select-list expressions over a `projects p`
/// row. Selected into [`ProjectStats`] and usable as sort keys.
pub const PROJECT_STATS_COLUMNS: &str = r#"
    (SELECT COUNT(*) FROM votes v WHERE v.project_id = p.id AND v.is_upvote = 1) AS vote_count,
    (SELECT COUNT(*) FROM comments c WHERE c.project_id = p.id) AS comment_count,
    (SELECT COUNT(*) FROM collaborations cb WHERE cb.project_id = p.id) AS collaboration_count,
    (SELECT COALESCE(SUM(d.amount), 0.0) FROM donations d WHERE d.project_id = p.id) AS current_funding
"#;

pub async fn comment_reaction_counts(pool: &SqlitePool, comment_id: &str) -> Result<ReactionCounts> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT reaction_type, COUNT(*) FROM comment_reactions WHERE comment_id = ? GROUP BY reaction_type",
    )
    .bind(comment_id)
    .fetch_all(pool)
    .await?;

    let mut counts = ReactionCounts::default();
    for (kind, count) in rows {
        counts.add(&kind, count);
    }
    Ok(counts)
}

pub async fn user_comment_reaction(
    pool: &SqlitePool,
    comment_id: &str,
    user_id: &str,
) -> Result<Option<ReactionKind>> {
    let kind = sqlx::query_scalar::<_, String>(
        "SELECT reaction_type FROM comment_reactions WHERE comment_id = ? AND user_id = ?",
    )
    .bind(comment_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    kind.map(|k| k.parse()).transpose()
}

pub async fn reply_reaction_count(
    pool: &SqlitePool,
    reply_id: &str,
    kind: ReactionKind,
) -> Result<i64> {
    Ok(sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM reply_reactions WHERE reply_id = ? AND reaction_type = ?",
    )
    .bind(reply_id)
    .bind(kind.as_str())
    .fetch_one(pool)
    .await?)
}

/// Reaction counts for every reply of a discussion, keyed by reply id.
pub async fn discussion_reply_reactions(
    pool: &SqlitePool,
    discussion_id: &str,
) -> Result<HashMap<String, ReactionCounts>> {
    let rows = sqlx::query_as::<_, (String, String, i64)>(
        r#"
        SELECT rr.reply_id, rr.reaction_type, COUNT(*)
        FROM reply_reactions rr
        JOIN discussion_replies r ON rr.reply_id = r.id
        WHERE r.discussion_id = ?
        GROUP BY rr.reply_id, rr.reaction_type
        "#,
    )
    .bind(discussion_id)
    .fetch_all(pool)
    .await?;

    let mut counts: HashMap<String, ReactionCounts> = HashMap::new();
    for (reply_id, kind, count) in rows {
        counts.entry(reply_id).or_default().add(&kind, count);
    }
    Ok(counts)
}

/// The slots `user_id` holds on each reply of a discussion.
pub async fn discussion_user_reactions(
    pool: &SqlitePool,
    discussion_id: &str,
    user_id: &str,
) -> Result<HashMap<String, ReactionFlags>> {
    let rows = sqlx::query_as::<_, (String, String)>(
        r#"
        SELECT rr.reply_id, rr.reaction_type
        FROM reply_reactions rr
        JOIN discussion_replies r ON rr.reply_id = r.id
        WHERE r.discussion_id = ? AND rr.user_id = ?
        "#,
    )
    .bind(discussion_id)
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let mut flags: HashMap<String, ReactionFlags> = HashMap::new();
    for (reply_id, kind) in rows {
        let entry = flags.entry(reply_id).or_default();
        match kind.parse::<ReactionKind>() {
            Ok(ReactionKind::Like) => entry.like = true,
            Ok(ReactionKind::Heart) => entry.heart = true,
            Err(_) => {}
        }
    }
    Ok(flags)
}

pub async fn discussion_like_count(pool: &SqlitePool, discussion_id: &str) -> Result<i64> {
    Ok(
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM discussion_likes WHERE discussion_id = ?")
            .bind(discussion_id)
            .fetch_one(pool)
            .await?,
    )
}

pub async fn discussion_reply_count(pool: &SqlitePool, discussion_id: &str) -> Result<i64> {
    Ok(sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM discussion_replies WHERE discussion_id = ?",
    )
    .bind(discussion_id)
    .fetch_one(pool)
    .await?)
}

pub async fn is_discussion_liked(
    pool: &SqlitePool,
    discussion_id: &str,
    user_id: &str,
) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM discussion_likes WHERE discussion_id = ? AND user_id = ?",
    )
    .bind(discussion_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}
