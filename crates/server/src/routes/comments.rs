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
    db::models::{NotificationKind, ReactionKind, UserSummary},
    error::{AppError, Result},
    middleware::auth::RequestContext,
    services::{
        aggregate,
        notify::Notice,
        reactions::{self, CommentReactionOutcome},
    },
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/projects/:id/comments",
            get(list_comments).post(create_comment),
        )
        .route("/comments/:id", put(update_comment).delete(delete_comment))
        .route("/comments/:id/reaction", post(react))
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ReactionRequest {
    pub reaction_type: String,
}

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: String,
    project_id: String,
    content: String,
    created_at: String,
    updated_at: String,
    author_id: String,
    author_username: String,
    author_full_name: String,
}

#[derive(Debug, Serialize)]
pub struct CommentView {
    pub id: String,
    pub project_id: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
    pub author: UserSummary,
    pub like_count: i64,
    pub heart_count: i64,
    pub user_reaction: Option<ReactionKind>,
    pub can_edit: bool,
}

#[derive(Debug, Serialize)]
pub struct CommentsListResponse {
    pub comments: Vec<CommentView>,
}

const COMMENT_SELECT: &str = r#"
    SELECT c.id, c.project_id, c.content, c.created_at, c.updated_at,
           u.id AS author_id, u.username AS author_username, u.full_name AS author_full_name
    FROM comments c
    JOIN users u ON c.author_id = u.id
"#;

async fn comment_view(
    pool: &SqlitePool,
    ctx: &RequestContext,
    row: CommentRow,
) -> Result<CommentView> {
    let counts = aggregate::comment_reaction_counts(pool, &row.id).await?;
    let user_reaction = match ctx.current_user_id() {
        Some(user_id) => aggregate::user_comment_reaction(pool, &row.id, user_id).await?,
        None => None,
    };

    Ok(CommentView {
        can_edit: ctx.current_user_id() == Some(row.author_id.as_str()),
        id: row.id,
        project_id: row.project_id,
        content: row.content,
        created_at: row.created_at,
        updated_at: row.updated_at,
        author: UserSummary {
            id: row.author_id,
            username: row.author_username,
            full_name: row.author_full_name,
        },
        like_count: counts.like,
        heart_count: counts.heart,
        user_reaction,
    })
}

async fn fetch_comment(pool: &SqlitePool, comment_id: &str) -> Result<CommentRow> {
    let sql = format!("{COMMENT_SELECT} WHERE c.id = ?");
    sqlx::query_as::<_, CommentRow>(&sql)
        .bind(comment_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))
}

fn validate_content(content: &str) -> Result<&str> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::Validation("Comment content is required".to_string()));
    }
    Ok(content)
}

async fn list_comments(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(project_id): Path<String>,
) -> Result<Json<CommentsListResponse>> {
    let sql = format!("{COMMENT_SELECT} WHERE c.project_id = ? ORDER BY c.created_at DESC");
    let rows = sqlx::query_as::<_, CommentRow>(&sql)
        .bind(&project_id)
        .fetch_all(&state.db.pool)
        .await?;

    let mut comments = Vec::with_capacity(rows.len());
    for row in rows {
        comments.push(comment_view(&state.db.pool, &ctx, row).await?);
    }

    Ok(Json(CommentsListResponse { comments }))
}

async fn create_comment(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(project_id): Path<String>,
    Json(body): Json<CommentRequest>,
) -> Result<(StatusCode, Json<CommentView>)> {
    let actor = ctx.require_user()?;
    let content = validate_content(&body.content)?;

    let (owner_id, title) =
        sqlx::query_as::<_, (String, String)>("SELECT owner_id, title FROM projects WHERE id = ?")
            .bind(&project_id)
            .fetch_optional(&state.db.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Project not found".to_string()))?;

    let comment_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO comments (id, project_id, author_id, content, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&comment_id)
    .bind(&project_id)
    .bind(&actor.id)
    .bind(content)
    .bind(&now)
    .bind(&now)
    .execute(&state.db.pool)
    .await?;

    state
        .notifier
        .notify(Notice {
            recipient: &owner_id,
            kind: NotificationKind::Comment,
            title: "New Comment",
            message: format!(
                "{} commented on your project \"{}\"",
                actor.full_name, title
            ),
            actor: Some(&actor.id),
            project: Some(&project_id),
        })
        .await;

    let row = fetch_comment(&state.db.pool, &comment_id).await?;
    let view = comment_view(&state.db.pool, &ctx, row).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn update_comment(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(comment_id): Path<String>,
    Json(body): Json<CommentRequest>,
) -> Result<Json<CommentView>> {
    let actor = ctx.require_user()?;
    let content = validate_content(&body.content)?;

    let row = fetch_comment(&state.db.pool, &comment_id).await?;
    if row.author_id != actor.id {
        return Err(AppError::Forbidden(
            "You can only edit your own comments".to_string(),
        ));
    }

    sqlx::query("UPDATE comments SET content = ?, updated_at = ? WHERE id = ?")
        .bind(content)
        .bind(Utc::now().to_rfc3339())
        .bind(&comment_id)
        .execute(&state.db.pool)
        .await?;

    let row = fetch_comment(&state.db.pool, &comment_id).await?;
    Ok(Json(comment_view(&state.db.pool, &ctx, row).await?))
}

async fn delete_comment(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(comment_id): Path<String>,
) -> Result<StatusCode> {
    let actor = ctx.require_user()?;

    let row = fetch_comment(&state.db.pool, &comment_id).await?;
    if row.author_id != actor.id {
        return Err(AppError::Forbidden(
            "You can only delete your own comments".to_string(),
        ));
    }

    sqlx::query("DELETE FROM comments WHERE id = ?")
        .bind(&comment_id)
        .execute(&state.db.pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn react(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(comment_id): Path<String>,
    Json(body): Json<ReactionRequest>,
) -> Result<Json<CommentReactionOutcome>> {
    let kind: ReactionKind = body.reaction_type.parse()?;
    let outcome = reactions::toggle_comment_reaction(&state.db.pool, &ctx, &comment_id, kind).await?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use tower::util::ServiceExt;

    use crate::{
        db::test_utils::{notification_count, seed_comment, seed_project, seed_user},
        routes::test_support::{body_json, request, test_app, token_for},
    };

    #[tokio::test]
    async fn commenting_notifies_the_owner() -> anyhow::Result<()> {
        let (app, state) = test_app().await?;
        let owner = seed_user(&state.db.pool, "owner").await?;
        let visitor = seed_user(&state.db.pool, "visitor").await?;
        let project = seed_project(&state.db.pool, &owner.id, "Drone").await?;
        let uri = format!("/api/projects/{project}/comments");

        let blank = app
            .clone()
            .oneshot(request(
                Method::POST,
                &uri,
                Some(&token_for(&state, &visitor)?),
                Some(json!({ "content": "   " })),
            )?)
            .await?;
        assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

        let res = app
            .clone()
            .oneshot(request(
                Method::POST,
                &uri,
                Some(&token_for(&state, &visitor)?),
                Some(json!({ "content": "Love it" })),
            )?)
            .await?;
        assert_eq!(res.status(), StatusCode::CREATED);

        app.clone()
            .oneshot(request(
                Method::POST,
                &uri,
                Some(&token_for(&state, &owner)?),
                Some(json!({ "content": "Thanks!" })),
            )?)
            .await?;

        assert_eq!(notification_count(&state.db.pool, &owner.id, "comment").await?, 1);

        let res = app.oneshot(request(Method::GET, &uri, None, None)?).await?;
        let body = body_json(res).await?;
        assert_eq!(body["comments"].as_array().map(Vec::len), Some(2));
        assert_eq!(body["comments"][0]["can_edit"], false);
        Ok(())
    }

    #[tokio::test]
    async fn reaction_endpoint_enforces_single_slot() -> anyhow::Result<()> {
        let (app, state) = test_app().await?;
        let owner = seed_user(&state.db.pool, "owner").await?;
        let fan = seed_user(&state.db.pool, "fan").await?;
        let project = seed_project(&state.db.pool, &owner.id, "Boat").await?;
        let comment = seed_comment(&state.db.pool, &project, &owner.id).await?;
        let token = token_for(&state, &fan)?;
        let uri = format!("/api/comments/{comment}/reaction");

        let res = app
            .clone()
            .oneshot(request(
                Method::POST,
                &uri,
                Some(&token),
                Some(json!({ "reaction_type": "like" })),
            )?)
            .await?;
        let body = body_json(res).await?;
        assert_eq!(body["action"], "added");
        assert_eq!(body["like_count"], 1);

        let res = app
            .clone()
            .oneshot(request(
                Method::POST,
                &uri,
                Some(&token),
                Some(json!({ "reaction_type": "heart" })),
            )?)
            .await?;
        let body = body_json(res).await?;
        assert_eq!(body["action"], "changed");
        assert_eq!(body["like_count"], 0);
        assert_eq!(body["heart_count"], 1);
        assert_eq!(body["user_reaction"], "heart");

        let bad = app
            .oneshot(request(
                Method::POST,
                &uri,
                Some(&token),
                Some(json!({ "reaction_type": "laugh" })),
            )?)
            .await?;
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}
