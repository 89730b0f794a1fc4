use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db::models::{DiscussionReply, NotificationKind, ReactionKind, UserSummary},
    error::{AppError, Result},
    middleware::auth::RequestContext,
    services::{
        aggregate::ReactionFlags,
        notify::Notice,
        reactions::{self, ReplyReactionOutcome},
        thread::{self, ReplyView},
    },
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/discussions/:id/replies",
            get(list_replies).post(reply_to_discussion),
        )
        .route("/replies/:id", put(update_reply).delete(delete_reply))
        .route("/replies/:id/replies", post(reply_to_reply))
        .route("/replies/:id/reaction", post(react))
}

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub content: String,
    pub parent_reply_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReactionRequest {
    pub reaction_type: String,
}

#[derive(Debug, Serialize)]
pub struct RepliesResponse {
    pub replies: Vec<ReplyView>,
}

async fn fetch_reply(pool: &SqlitePool, reply_id: &str) -> Result<DiscussionReply> {
    sqlx::query_as::<_, DiscussionReply>("SELECT * FROM discussion_replies WHERE id = ?")
        .bind(reply_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Reply not found".to_string()))
}

fn validate_content(content: &str) -> Result<&str> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::Validation("Reply content is required".to_string()));
    }
    Ok(content)
}

/// Inserts a reply and returns its view. Only top-level replies notify the
/// discussion author.
async fn create_reply(
    state: &AppState,
    ctx: &RequestContext,
    discussion_id: &str,
    parent_reply_id: Option<&str>,
    content: &str,
) -> Result<ReplyView> {
    let actor = ctx.require_user()?;
    let content = validate_content(content)?;

    let (author_id, title) = sqlx::query_as::<_, (String, String)>(
        "SELECT author_id, title FROM discussions WHERE id = ?",
    )
    .bind(discussion_id)
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Discussion not found".to_string()))?;

    if let Some(parent_id) = parent_reply_id {
        let parent = fetch_reply(&state.db.pool, parent_id).await?;
        if parent.discussion_id != discussion_id {
            return Err(AppError::Validation(
                "Parent reply belongs to a different discussion".to_string(),
            ));
        }
    }

    let now = Utc::now().to_rfc3339();
    let view = ReplyView {
        id: Uuid::new_v4().to_string(),
        discussion_id: discussion_id.to_string(),
        content: content.to_string(),
        created_at: now.clone(),
        updated_at: now,
        author: UserSummary {
            id: actor.id.clone(),
            username: actor.username.clone(),
            full_name: actor.full_name.clone(),
        },
        likes: 0,
        hearts: 0,
        parent_reply_id: parent_reply_id.map(str::to_string),
        nested_replies: Vec::new(),
        can_edit: true,
        user_reactions: Some(ReactionFlags::default()),
    };

    sqlx::query(
        "INSERT INTO discussion_replies (id, discussion_id, parent_reply_id, author_id, content, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&view.id)
    .bind(&view.discussion_id)
    .bind(&view.parent_reply_id)
    .bind(&actor.id)
    .bind(&view.content)
    .bind(&view.created_at)
    .bind(&view.updated_at)
    .execute(&state.db.pool)
    .await?;

    if parent_reply_id.is_none() {
        state
            .notifier
            .notify(Notice {
                recipient: &author_id,
                kind: NotificationKind::Reply,
                title: "New Discussion Reply",
                message: format!(
                    "{} replied to your discussion \"{}\"",
                    actor.full_name, title
                ),
                actor: Some(&actor.id),
                project: None,
            })
            .await;
    }

    Ok(view)
}

async fn list_replies(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(discussion_id): Path<String>,
) -> Result<Json<RepliesResponse>> {
    let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM discussions WHERE id = ?")
        .bind(&discussion_id)
        .fetch_one(&state.db.pool)
        .await?;
    if exists == 0 {
        return Err(AppError::NotFound("Discussion not found".to_string()));
    }

    let replies = thread::load_thread(
        &state.db.pool,
        &ctx,
        &discussion_id,
        state.config.reply_max_depth,
    )
    .await?;

    Ok(Json(RepliesResponse { replies }))
}

async fn reply_to_discussion(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(discussion_id): Path<String>,
    Json(body): Json<ReplyRequest>,
) -> Result<(StatusCode, Json<ReplyView>)> {
    let view = create_reply(
        &state,
        &ctx,
        &discussion_id,
        body.parent_reply_id.as_deref(),
        &body.content,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn reply_to_reply(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(parent_id): Path<String>,
    Json(body): Json<ReplyRequest>,
) -> Result<(StatusCode, Json<ReplyView>)> {
    ctx.require_user()?;
    let parent = fetch_reply(&state.db.pool, &parent_id).await?;

    let view = create_reply(
        &state,
        &ctx,
        &parent.discussion_id,
        Some(&parent.id),
        &body.content,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn update_reply(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(reply_id): Path<String>,
    Json(body): Json<ReplyRequest>,
) -> Result<Json<DiscussionReply>> {
    let actor = ctx.require_user()?;
    let content = validate_content(&body.content)?;

    let reply = fetch_reply(&state.db.pool, &reply_id).await?;
    if reply.author_id != actor.id {
        return Err(AppError::Forbidden(
            "You can only edit your own replies".to_string(),
        ));
    }

    sqlx::query("UPDATE discussion_replies SET content = ?, updated_at = ? WHERE id = ?")
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .bind(&reply_id)
        .execute(&state.db.pool)
        .await?;

    Ok(Json(fetch_reply(&state.db.pool, &reply_id).await?))
}

async fn delete_reply(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(reply_id): Path<String>,
) -> Result<StatusCode> {
    let actor = ctx.require_user()?;

    let reply = fetch_reply(&state.db.pool, &reply_id).await?;
    if reply.author_id != actor.id {
        return Err(AppError::Forbidden(
            "You can only delete your own replies".to_string(),
        ));
    }

    // Nested replies and reactions go with it through the cascading keys.
    sqlx::query("DELETE FROM discussion_replies WHERE id = ?")
        .bind(&reply_id)
        .execute(&state.db.pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn react(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(reply_id): Path<String>,
    Json(body): Json<ReactionRequest>,
) -> Result<Json<ReplyReactionOutcome>> {
    let kind: ReactionKind = body.reaction_type.parse()?;
    let outcome = reactions::toggle_reply_reaction(&state.db.pool, &ctx, &reply_id, kind).await?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use tower::util::ServiceExt;

    use crate::{
        db::test_utils::{notification_count, seed_discussion, seed_reply, seed_user},
        routes::test_support::{body_json, request, test_app, token_for},
    };

    #[tokio::test]
    async fn threads_nest_and_only_top_level_notifies() -> anyhow::Result<()> {
        let (app, state) = test_app().await?;
        let author = seed_user(&state.db.pool, "author").await?;
        let replier = seed_user(&state.db.pool, "replier").await?;
        let discussion = seed_discussion(&state.db.pool, &author.id, "Batteries").await?;
        let token = token_for(&state, &replier)?;

        let res = app
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/api/discussions/{discussion}/replies"),
                Some(&token),
                Some(json!({ "content": "Lithium or sodium?" })),
            )?)
            .await?;
        assert_eq!(res.status(), StatusCode::CREATED);
        let top = body_json(res).await?["id"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        let res = app
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/api/replies/{top}/replies"),
                Some(&token),
                Some(json!({ "content": "Sodium, cheaper" })),
            )?)
            .await?;
        assert_eq!(res.status(), StatusCode::CREATED);

        assert_eq!(notification_count(&state.db.pool, &author.id, "reply").await?, 1);

        let res = app
            .oneshot(request(
                Method::GET,
                &format!("/api/discussions/{discussion}/replies"),
                None,
                None,
            )?)
            .await?;
        let body = body_json(res).await?;
        let replies = &body["replies"];
        assert_eq!(replies.as_array().map(Vec::len), Some(1));
        assert_eq!(replies[0]["id"], top.as_str());
        assert_eq!(replies[0]["nested_replies"][0]["content"], "Sodium, cheaper");
        assert_eq!(replies[0]["user_reactions"], serde_json::Value::Null);
        Ok(())
    }

    #[tokio::test]
    async fn parent_must_share_the_discussion() -> anyhow::Result<()> {
        let (app, state) = test_app().await?;
        let user = seed_user(&state.db.pool, "user").await?;
        let first = seed_discussion(&state.db.pool, &user.id, "First").await?;
        let second = seed_discussion(&state.db.pool, &user.id, "Second").await?;
        let foreign = seed_reply(&state.db.pool, &first, None, &user.id).await?;

        let res = app
            .oneshot(request(
                Method::POST,
                &format!("/api/discussions/{second}/replies"),
                Some(&token_for(&state, &user)?),
                Some(json!({ "content": "hi", "parent_reply_id": foreign })),
            )?)
            .await?;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn reply_reactions_and_cascading_delete() -> anyhow::Result<()> {
        let (app, state) = test_app().await?;
        let author = seed_user(&state.db.pool, "author").await?;
        let fan = seed_user(&state.db.pool, "fan").await?;
        let discussion = seed_discussion(&state.db.pool, &author.id, "Wind").await?;
        let top = seed_reply(&state.db.pool, &discussion, None, &author.id).await?;
        seed_reply(&state.db.pool, &discussion, Some(&top), &fan.id).await?;

        let res = app
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/api/replies/{top}/reaction"),
                Some(&token_for(&state, &fan)?),
                Some(json!({ "reaction_type": "heart" })),
            )?)
            .await?;
        let body = body_json(res).await?;
        assert_eq!(body["action"], "added");
        assert_eq!(body["reaction_type"], "heart");
        assert_eq!(body["count"], 1);
        assert_eq!(body["user_reacted"], true);

        let res = app
            .clone()
            .oneshot(request(
                Method::DELETE,
                &format!("/api/replies/{top}"),
                Some(&token_for(&state, &fan)?),
                None,
            )?)
            .await?;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = app
            .oneshot(request(
                Method::DELETE,
                &format!("/api/replies/{top}"),
                Some(&token_for(&state, &author)?),
                None,
            )?)
            .await?;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        let left = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM discussion_replies")
            .fetch_one(&state.db.pool)
            .await?;
        assert_eq!(left, 0);
        Ok(())
    }
}
