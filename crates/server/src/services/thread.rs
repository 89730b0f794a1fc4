//! Discussion reply threads.
//!
//! Replies are stored flat with a nullable parent id. A thread is assembled
//! by indexing the rows, walking breadth-first from the top-level replies
//! down to a fixed depth, then attaching children to parents in reverse
//! walk order. No recursion, so deep or malformed (cyclic) parent chains
//! cannot grow the stack; rows not reachable from a top-level reply are
//! dropped.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use sqlx::SqlitePool;

use crate::{
    db::models::UserSummary,
    error::Result,
    middleware::auth::RequestContext,
    services::aggregate::{self, ReactionFlags},
};

#[derive(Debug, Clone, Serialize)]
pub struct ReplyView {
    pub id: String,
    pub discussion_id: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
    pub author: UserSummary,
    pub likes: i64,
    pub hearts: i64,
    pub parent_reply_id: Option<String>,
    pub nested_replies: Vec<ReplyView>,
    pub can_edit: bool,
    pub user_reactions: Option<ReactionFlags>,
}

#[derive(sqlx::FromRow)]
struct ReplyRow {
    id: String,
    discussion_id: String,
    parent_reply_id: Option<String>,
    content: String,
    created_at: String,
    updated_at: String,
    author_id: String,
    author_username: String,
    author_full_name: String,
}

/// Builds the forest rooted at replies without a parent, keeping the input
/// order among siblings. `max_depth` counts levels, top-level included.
pub fn assemble(flat: Vec<ReplyView>, max_depth: usize) -> Vec<ReplyView> {
    let n = flat.len();
    let index: HashMap<&str, usize> = flat
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id.as_str(), i))
        .collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut parent_of: Vec<Option<usize>> = vec![None; n];
    let mut roots = Vec::new();

    for (i, reply) in flat.iter().enumerate() {
        match reply.parent_reply_id.as_deref() {
            None => roots.push(i),
            Some(parent) => {
                if let Some(&p) = index.get(parent) {
                    if p != i {
                        children[p].push(i);
                        parent_of[i] = Some(p);
                    }
                }
            }
        }
    }

    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);
    let mut queue: VecDeque<(usize, usize)> = VecDeque::new();
    for &r in &roots {
        visited[r] = true;
        queue.push_back((r, 1));
    }

    while let Some((i, depth)) = queue.pop_front() {
        order.push(i);
        if depth >= max_depth {
            continue;
        }
        for &c in &children[i] {
            if !visited[c] {
                visited[c] = true;
                queue.push_back((c, depth + 1));
            }
        }
    }

    let mut slots: Vec<Option<ReplyView>> = flat.into_iter().map(Some).collect();
    let mut attached: Vec<Vec<ReplyView>> = (0..n).map(|_| Vec::new()).collect();
    let mut forest = Vec::with_capacity(roots.len());

    for &i in order.iter().rev() {
        let Some(mut node) = slots[i].take() else {
            continue;
        };
        let mut kids = std::mem::take(&mut attached[i]);
        kids.reverse();
        node.nested_replies = kids;

        match parent_of[i] {
            Some(p) => attached[p].push(node),
            None => forest.push(node),
        }
    }

    forest.reverse();
    forest
}

/// The full thread of a discussion: top-level replies newest first, nested
/// replies oldest first.
pub async fn load_thread(
    pool: &SqlitePool,
    ctx: &RequestContext,
    discussion_id: &str,
    max_depth: usize,
) -> Result<Vec<ReplyView>> {
    let rows = sqlx::query_as::<_, ReplyRow>(
        r#"
        SELECT r.id, r.discussion_id, r.parent_reply_id, r.content, r.created_at, r.updated_at,
               u.id AS author_id, u.username AS author_username, u.full_name AS author_full_name
        FROM discussion_replies r
        JOIN users u ON r.author_id = u.id
        WHERE r.discussion_id = ?
        ORDER BY r.created_at ASC, r.id ASC
        "#,
    )
    .bind(discussion_id)
    .fetch_all(pool)
    .await?;

    let counts = aggregate::discussion_reply_reactions(pool, discussion_id).await?;
    let mut mine = match ctx.current_user_id() {
        Some(user_id) => Some(aggregate::discussion_user_reactions(pool, discussion_id, user_id).await?),
        None => None,
    };

    let flat = rows
        .into_iter()
        .map(|row| {
            let reaction_counts = counts.get(&row.id).copied().unwrap_or_default();
            let user_reactions = mine
                .as_mut()
                .map(|flags| flags.remove(&row.id).unwrap_or_default());
            ReplyView {
                can_edit: ctx.current_user_id() == Some(row.author_id.as_str()),
                likes: reaction_counts.like,
                hearts: reaction_counts.heart,
                author: UserSummary {
                    id: row.author_id,
                    username: row.author_username,
                    full_name: row.author_full_name,
                },
                id: row.id,
                discussion_id: row.discussion_id,
                content: row.content,
                created_at: row.created_at,
                updated_at: row.updated_at,
                parent_reply_id: row.parent_reply_id,
                nested_replies: Vec::new(),
                user_reactions,
            }
        })
        .collect();

    let mut forest = assemble(flat, max_depth);
    forest.reverse();
    Ok(forest)
}
