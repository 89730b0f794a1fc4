use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;

use crate::{
    db::models::Notification,
    error::{AppError, Result},
    middleware::auth::RequestContext,
    AppState,
};

const LIST_LIMIT: i64 = 50;
const BADGE_CAP: i64 = 99;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/count", get(unread_count))
        .route("/notifications/:id/read", post(mark_read))
        .route("/notifications/mark-all-read", post(mark_all_read))
        .route("/notifications/clear-all", delete(clear_all))
}

#[derive(Debug, Serialize)]
pub struct NotificationListResponse {
    pub notifications: Vec<Notification>,
    pub unread_count: i64,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct UpdatedResponse {
    pub updated: u64,
}

async fn count_unread(state: &AppState, user_id: &str) -> Result<i64> {
    Ok(sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = 0",
    )
    .bind(user_id)
    .fetch_one(&state.db.pool)
    .await?)
}

async fn list_notifications(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<NotificationListResponse>> {
    let actor = ctx.require_user()?;

    let notifications = sqlx::query_as::<_, Notification>(
        "SELECT * FROM notifications WHERE user_id = ? ORDER BY created_at DESC LIMIT ?",
    )
    .bind(&actor.id)
    .bind(LIST_LIMIT)
    .fetch_all(&state.db.pool)
    .await?;

    let unread_count = count_unread(&state, &actor.id).await?;

    Ok(Json(NotificationListResponse {
        notifications,
        unread_count,
    }))
}

async fn unread_count(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<CountResponse>> {
    let actor = ctx.require_user()?;
    let count = count_unread(&state, &actor.id).await?;
    Ok(Json(CountResponse {
        count: count.min(BADGE_CAP),
    }))
}

async fn mark_read(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(notification_id): Path<String>,
) -> Result<Json<Notification>> {
    let actor = ctx.require_user()?;

    let updated = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ? AND user_id = ?")
        .bind(&notification_id)
        .bind(&actor.id)
        .execute(&state.db.pool)
        .await?
        .rows_affected();

    if updated == 0 {
        return Err(AppError::NotFound("Notification not found".to_string()));
    }

    Ok(Json(
        sqlx::query_as::<_, Notification>("SELECT * FROM notifications WHERE id = ?")
            .bind(&notification_id)
            .fetch_one(&state.db.pool)
            .await?,
    ))
}

async fn mark_all_read(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<UpdatedResponse>> {
    let actor = ctx.require_user()?;

    let updated =
        sqlx::query("UPDATE notifications SET is_read = 1 WHERE user_id = ? AND is_read = 0")
            .bind(&actor.id)
            .execute(&state.db.pool)
            .await?
            .rows_affected();

    Ok(Json(UpdatedResponse { updated }))
}

async fn clear_all(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<UpdatedResponse>> {
    let actor = ctx.require_user()?;

    let updated = sqlx::query("DELETE FROM notifications WHERE user_id = ?")
        .bind(&actor.id)
        .execute(&state.db.pool)
        .await?
        .rows_affected();

    tracing::debug!(user_id = %actor.id, removed = updated, "notifications cleared");

    Ok(Json(UpdatedResponse { updated }))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use tower::util::ServiceExt;

    use crate::{
        db::{models::NotificationKind, test_utils::seed_user},
        routes::test_support::{body_json, request, test_app, token_for},
        services::notify::Notice,
    };

    #[tokio::test]
    async fn read_flags_and_counts() -> anyhow::Result<()> {
        let (app, state) = test_app().await?;
        let me = seed_user(&state.db.pool, "me").await?;
        let them = seed_user(&state.db.pool, "them").await?;
        let token = token_for(&state, &me)?;

        let mut ids = Vec::new();
        for i in 0..3 {
            let id = state
                .notifier
                .notify(Notice {
                    recipient: &me.id,
                    kind: NotificationKind::Comment,
                    title: "New Comment",
                    message: format!("comment {i}"),
                    actor: Some(&them.id),
                    project: None,
                })
                .await;
            ids.extend(id);
        }
        assert_eq!(ids.len(), 3);

        let res = app
            .clone()
            .oneshot(request(Method::GET, "/api/notifications/count", Some(&token), None)?)
            .await?;
        assert_eq!(body_json(res).await?["count"], 3);

        let res = app
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/api/notifications/{}/read", ids[0]),
                Some(&token),
                None,
            )?)
            .await?;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await?["is_read"], true);

        let res = app
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/api/notifications/{}/read", ids[1]),
                Some(&token_for(&state, &them)?),
                None,
            )?)
            .await?;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = app
            .clone()
            .oneshot(request(Method::GET, "/api/notifications", Some(&token), None)?)
            .await?;
        let body = body_json(res).await?;
        assert_eq!(body["unread_count"], 2);
        assert_eq!(body["notifications"].as_array().map(Vec::len), Some(3));

        let res = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/api/notifications/mark-all-read",
                Some(&token),
                None,
            )?)
            .await?;
        assert_eq!(body_json(res).await?["updated"], 2);

        let res = app
            .clone()
            .oneshot(request(
                Method::DELETE,
                "/api/notifications/clear-all",
                Some(&token),
                None,
            )?)
            .await?;
        assert_eq!(body_json(res).await?["updated"], 3);

        let res = app
            .oneshot(request(Method::GET, "/api/notifications", None, None)?)
            .await?;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
