use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db::models::{Collaboration, CollaborationStatus, NotificationKind, UserSummary},
    error::{is_unique_violation, AppError, Result},
    middleware::auth::RequestContext,
    services::notify::{Notice, Notifier},
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct IncomingRequest {
    pub id: String,
    pub message: String,
    pub status: String,
    pub created_at: String,
    pub project_id: String,
    pub project_title: String,
    pub requester_id: String,
    pub requester_username: String,
    pub requester_full_name: String,
    pub requester_email: String,
}

/// A request the caller filed, with the project it targets.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct SentRequest {
    pub id: String,
    pub message: String,
    pub status: String,
    pub created_at: String,
    pub project_id: String,
    pub project_title: String,
    pub owner_name: String,
}

/// Someone the caller works with on a project. `is_owner` marks the entries
/// where `user` owns the project and the caller is the collaborator.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Teammate {
    pub project_id: String,
    pub project_title: String,
    #[sqlx(flatten)]
    pub user: UserSummary,
    pub collaboration_date: String,
    pub is_owner: bool,
}

/// Files a collaboration request from the caller on someone else's project.
pub async fn request(
    pool: &SqlitePool,
    notifier: &Notifier,
    ctx: &RequestContext,
    project_id: &str,
    message: &str,
) -> Result<Collaboration> {
    let actor = ctx.require_user()?;

    let (owner_id, title) =
        sqlx::query_as::<_, (String, String)>("SELECT owner_id, title FROM projects WHERE id = ?")
            .bind(project_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Project not found".to_string()))?;

    if owner_id == actor.id {
        return Err(AppError::Validation(
            "Cannot collaborate on your own project".to_string(),
        ));
    }

    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM collaborations WHERE user_id = ? AND project_id = ?",
    )
    .bind(&actor.id)
    .bind(project_id)
    .fetch_one(pool)
    .await?;

    if existing > 0 {
        return Err(AppError::Conflict(
            "Collaboration request already exists".to_string(),
        ));
    }

    let collaboration = Collaboration {
        id: Uuid::new_v4().to_string(),
        user_id: actor.id.clone(),
        project_id: project_id.to_string(),
        message: message.to_string(),
        status: CollaborationStatus::Pending.as_str().to_string(),
        created_at: Utc::now().to_rfc3339(),
    };

    sqlx::query(
        "INSERT INTO collaborations (id, user_id, project_id, message, status, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&collaboration.id)
    .bind(&collaboration.user_id)
    .bind(&collaboration.project_id)
    .bind(&collaboration.message)
    .bind(&collaboration.status)
    .bind(&collaboration.created_at)
    .execute(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("Collaboration request already exists".to_string())
        } else {
            AppError::Database(e)
        }
    })?;

    notifier
        .notify(Notice {
            recipient: &owner_id,
            kind: NotificationKind::Collaboration,
            title: "New Collaboration Request",
            message: format!("{} wants to collaborate on \"{}\"", actor.full_name, title),
            actor: Some(&actor.id),
            project: Some(project_id),
        })
        .await;

    tracing::info!(project_id, user_id = %actor.id, "collaboration requested");

    Ok(collaboration)
}

/// Moves a pending request to `target`. Only the project owner may decide.
///
/// Accepting notifies the requester; rejecting does not.
pub async fn decide(
    pool: &SqlitePool,
    notifier: &Notifier,
    ctx: &RequestContext,
    collaboration_id: &str,
    target: CollaborationStatus,
) -> Result<Collaboration> {
    let actor = ctx.require_user()?;

    let (requester_id, project_id, status, owner_id, title) =
        sqlx::query_as::<_, (String, String, String, String, String)>(
            r#"
            SELECT c.user_id, c.project_id, c.status, p.owner_id, p.title
            FROM collaborations c
            JOIN projects p ON c.project_id = p.id
            WHERE c.id = ?
            "#,
        )
        .bind(collaboration_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Collaboration request not found".to_string()))?;

    if owner_id != actor.id {
        return Err(AppError::Forbidden(
            "Only the project owner can respond to this request".to_string(),
        ));
    }

    let current: CollaborationStatus = status.parse()?;
    let next = current.transition(target)?;

    // Guarded on the pending status so two racing decisions cannot both win.
    let updated = sqlx::query(
        "UPDATE collaborations SET status = ? WHERE id = ? AND status = ?",
    )
    .bind(next.as_str())
    .bind(collaboration_id)
    .bind(CollaborationStatus::Pending.as_str())
    .execute(pool)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(AppError::Conflict(
            "Collaboration request was already decided".to_string(),
        ));
    }

    if next == CollaborationStatus::Accepted {
        notifier
            .notify(Notice {
                recipient: &requester_id,
                kind: NotificationKind::Collaboration,
                title: "Collaboration Accepted",
                message: format!(
                    "Your collaboration request for \"{title}\" has been accepted!"
                ),
                actor: Some(&actor.id),
                project: Some(&project_id),
            })
            .await;
    }

    tracing::info!(collaboration_id, status = next.as_str(), "collaboration decided");

    Ok(sqlx::query_as::<_, Collaboration>("SELECT * FROM collaborations WHERE id = ?")
        .bind(collaboration_id)
        .fetch_one(pool)
        .await?)
}

/// Requests received on projects the caller owns, newest first.
pub async fn incoming(pool: &SqlitePool, ctx: &RequestContext) -> Result<Vec<IncomingRequest>> {
    let actor = ctx.require_user()?;

    Ok(sqlx::query_as::<_, IncomingRequest>(
        r#"
        SELECT c.id, c.message, c.status, c.created_at,
               p.id AS project_id, p.title AS project_title,
               u.id AS requester_id, u.username AS requester_username,
               u.full_name AS requester_full_name, u.email AS requester_email
        FROM collaborations c
        JOIN projects p ON c.project_id = p.id
        JOIN users u ON c.user_id = u.id
        WHERE p.owner_id = ?
        ORDER BY c.created_at DESC
        "#,
    )
    .bind(&actor.id)
    .fetch_all(pool)
    .await?)
}

/// Requests the caller has filed, newest first.
pub async fn sent(pool: &SqlitePool, ctx: &RequestContext) -> Result<Vec<SentRequest>> {
    let actor = ctx.require_user()?;

    Ok(sqlx::query_as::<_, SentRequest>(
        r#"
        SELECT c.id, c.message, c.status, c.created_at,
               p.id AS project_id, p.title AS project_title, u.full_name AS owner_name
        FROM collaborations c
        JOIN projects p ON c.project_id = p.id
        JOIN users u ON p.owner_id = u.id
        WHERE c.user_id = ?
        ORDER BY c.created_at DESC
        "#,
    )
    .bind(&actor.id)
    .fetch_all(pool)
    .await?)
}

/// Accepted collaborators on the caller's projects, followed by the owners of
/// projects the caller was accepted onto.
pub async fn teammates(pool: &SqlitePool, ctx: &RequestContext) -> Result<Vec<Teammate>> {
    let actor = ctx.require_user()?;

    Ok(sqlx::query_as::<_, Teammate>(
        r#"
        SELECT p.id AS project_id, p.title AS project_title,
               u.id, u.username, u.full_name,
               c.created_at AS collaboration_date, 0 AS is_owner
        FROM collaborations c
        JOIN projects p ON c.project_id = p.id
        JOIN users u ON c.user_id = u.id
        WHERE p.owner_id = ?1 AND c.status = 'accepted'
        UNION ALL
        SELECT p.id, p.title, u.id, u.username, u.full_name, c.created_at, 1
        FROM collaborations c
        JOIN projects p ON c.project_id = p.id
        JOIN users u ON p.owner_id = u.id
        WHERE c.user_id = ?1 AND c.status = 'accepted'
        ORDER BY is_owner, collaboration_date DESC
        "#,
    )
    .bind(&actor.id)
    .fetch_all(pool)
    .await?)
}

/// Owner plus accepted collaborators make up a project's team.
pub async fn is_team_member(pool: &SqlitePool, project_id: &str, user_id: &str) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT
            (SELECT COUNT(*) FROM projects WHERE id = ?1 AND owner_id = ?2)
          + (SELECT COUNT(*) FROM collaborations
             WHERE project_id = ?1 AND user_id = ?2 AND status = 'accepted')
        "#,
    )
    .bind(project_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// User ids of the owner and every accepted collaborator.
pub async fn team_member_ids(pool: &SqlitePool, project_id: &str) -> Result<Vec<String>> {
    Ok(sqlx::query_scalar::<_, String>(
        r#"
        SELECT owner_id FROM projects WHERE id = ?1
        UNION ALL
        SELECT user_id FROM collaborations WHERE project_id = ?1 AND status = 'accepted'
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?)
}
