//! Per-project team chat, open to the owner and accepted collaborators.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db::models::{NotificationKind, UserSummary},
    error::{AppError, Result},
    middleware::auth::{AuthUser, RequestContext},
    services::{collaboration, notify::Notice},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/projects/:id/chat", get(list_messages).post(post_message))
        .route("/projects/:id/participants", get(participants))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ChatMessage {
    pub id: String,
    pub project_id: String,
    pub message: String,
    pub created_at: String,
    pub user_id: String,
    pub username: String,
    pub full_name: String,
}

#[derive(Debug, Serialize)]
pub struct ChatListResponse {
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Participant {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub user: UserSummary,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct ParticipantsResponse {
    pub participants: Vec<Participant>,
}

/// Project title, once the caller is confirmed as a team member.
async fn require_team_member<'a>(
    pool: &SqlitePool,
    ctx: &'a RequestContext,
    project_id: &str,
) -> Result<(&'a AuthUser, String)> {
    let actor = ctx.require_user()?;

    let title = sqlx::query_scalar::<_, String>("SELECT title FROM projects WHERE id = ?")
        .bind(project_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Project not found".to_string()))?;

    if !collaboration::is_team_member(pool, project_id, &actor.id).await? {
        return Err(AppError::Forbidden(
            "Only the project team can access this chat".to_string(),
        ));
    }

    Ok((actor, title))
}

async fn list_messages(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(project_id): Path<String>,
) -> Result<Json<ChatListResponse>> {
    require_team_member(&state.db.pool, &ctx, &project_id).await?;

    let messages = sqlx::query_as::<_, ChatMessage>(
        r#"
        SELECT t.id, t.project_id, t.message, t.created_at,
               u.id AS user_id, u.username, u.full_name
        FROM team_chats t
        JOIN users u ON t.user_id = u.id
        WHERE t.project_id = ?
        ORDER BY t.created_at ASC
        "#,
    )
    .bind(&project_id)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(ChatListResponse { messages }))
}

async fn post_message(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(project_id): Path<String>,
    Json(body): Json<ChatRequest>,
) -> Result<(StatusCode, Json<ChatMessage>)> {
    let (actor, title) = require_team_member(&state.db.pool, &ctx, &project_id).await?;

    let text = body.message.trim();
    if text.is_empty() {
        return Err(AppError::Validation("Message cannot be empty".to_string()));
    }

    let message = ChatMessage {
        id: Uuid::new_v4().to_string(),
        project_id: project_id.clone(),
        message: text.to_string(),
        created_at: Utc::now().to_rfc3339(),
        user_id: actor.id.clone(),
        username: actor.username.clone(),
        full_name: actor.full_name.clone(),
    };

    sqlx::query(
        "INSERT INTO team_chats (id, project_id, user_id, message, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&message.id)
    .bind(&message.project_id)
    .bind(&message.user_id)
    .bind(&message.message)
    .bind(&message.created_at)
    .execute(&state.db.pool)
    .await?;

    for member in collaboration::team_member_ids(&state.db.pool, &project_id).await? {
        state
            .notifier
            .notify(Notice {
                recipient: &member,
                kind: NotificationKind::TeamChat,
                title: "New Team Message",
                message: format!("{} sent a message in {}", actor.username, title),
                actor: Some(&actor.id),
                project: Some(&project_id),
            })
            .await;
    }

    Ok((StatusCode::CREATED, Json(message)))
}

async fn participants(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(project_id): Path<String>,
) -> Result<Json<ParticipantsResponse>> {
    require_team_member(&state.db.pool, &ctx, &project_id).await?;

    let participants = sqlx::query_as::<_, Participant>(
        r#"
        SELECT u.id, u.username, u.full_name, 'owner' AS role
        FROM projects p JOIN users u ON p.owner_id = u.id
        WHERE p.id = ?1
        UNION ALL
        SELECT u.id, u.username, u.full_name, 'collaborator' AS role
        FROM collaborations c JOIN users u ON c.user_id = u.id
        WHERE c.project_id = ?1 AND c.status = 'accepted'
        "#,
    )
    .bind(&project_id)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(ParticipantsResponse { participants }))
}
