use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db::models::UserSummary,
    error::{AppError, Result},
    middleware::auth::RequestContext,
    routes::Pagination,
    services::{
        aggregate,
        reactions::{self, DiscussionLikeOutcome},
    },
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/discussions",
            get(list_discussions).post(create_discussion),
        )
        .route("/discussions/stats", get(stats))
        .route(
            "/discussions/:id",
            get(get_discussion)
                .put(update_discussion)
                .delete(delete_discussion),
        )
        .route("/discussions/:id/like", post(like))
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiscussionSort {
    #[default]
    Recent,
    Popular,
}

impl DiscussionSort {
    fn order_by(self) -> &'static str {
        match self {
            DiscussionSort::Recent => "d.created_at DESC",
            DiscussionSort::Popular => "like_count DESC, d.created_at DESC",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub sort: DiscussionSort,
    pub category: Option<String>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDiscussionRequest {
    pub title: String,
    pub content: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub media_type: Option<String>,
    pub media_data: Option<String>,
    pub media_filename: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDiscussionRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(sqlx::FromRow)]
struct DiscussionRow {
    id: String,
    title: String,
    content: String,
    category: String,
    tags: String,
    media_type: Option<String>,
    media_url: Option<String>,
    media_filename: Option<String>,
    created_at: String,
    updated_at: String,
    author_id: String,
    author_username: String,
    author_full_name: String,
    like_count: i64,
}

#[derive(Debug, Serialize)]
pub struct DiscussionView {
    pub id: String,
    pub title: String,
    pub content: String,
    pub category: String,
    pub tags: Vec<String>,
    pub media_type: Option<String>,
    pub media_url: Option<String>,
    pub media_filename: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub author: UserSummary,
    pub like_count: i64,
    pub reply_count: i64,
    pub is_liked: bool,
    pub can_edit: bool,
}

#[derive(Debug, Serialize)]
pub struct DiscussionListResponse {
    pub discussions: Vec<DiscussionView>,
    pub total: i64,
    pub pages: i64,
    pub current_page: i64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct DiscussionStats {
    pub ideas_shared: i64,
    pub active_members: i64,
    pub total_replies: i64,
}

const DISCUSSION_SELECT: &str = r#"
    SELECT d.id, d.title, d.content, d.category, d.tags,
           d.media_type, d.media_url, d.media_filename, d.created_at, d.updated_at,
           u.id AS author_id, u.username AS author_username, u.full_name AS author_full_name,
           (SELECT COUNT(*) FROM discussion_likes l WHERE l.discussion_id = d.id) AS like_count
    FROM discussions d
    JOIN users u ON d.author_id = u.id
"#;

// Matches rows whose category equals ?1 (when given) and whose title or
// content contains ?2 (when given).
const DISCUSSION_FILTER: &str = r#"
    WHERE (?1 IS NULL OR d.category = ?1)
      AND (?2 IS NULL OR d.title LIKE '%' || ?2 || '%' OR d.content LIKE '%' || ?2 || '%')
"#;

fn split_tags(tags: &str) -> Vec<String> {
    tags.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn join_tags(tags: &[String]) -> String {
    tags.iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

async fn discussion_view(
    pool: &SqlitePool,
    ctx: &RequestContext,
    row: DiscussionRow,
) -> Result<DiscussionView> {
    let reply_count = aggregate::discussion_reply_count(pool, &row.id).await?;
    let is_liked = match ctx.current_user_id() {
        Some(user_id) => aggregate::is_discussion_liked(pool, &row.id, user_id).await?,
        None => false,
    };

    Ok(DiscussionView {
        can_edit: ctx.current_user_id() == Some(row.author_id.as_str()),
        tags: split_tags(&row.tags),
        id: row.id,
        title: row.title,
        content: row.content,
        category: row.category,
        media_type: row.media_type,
        media_url: row.media_url,
        media_filename: row.media_filename,
        created_at: row.created_at,
        updated_at: row.updated_at,
        author: UserSummary {
            id: row.author_id,
            username: row.author_username,
            full_name: row.author_full_name,
        },
        like_count: row.like_count,
        reply_count,
        is_liked,
    })
}

async fn fetch_discussion(pool: &SqlitePool, discussion_id: &str) -> Result<DiscussionRow> {
    let sql = format!("{DISCUSSION_SELECT} WHERE d.id = ?");
    sqlx::query_as::<_, DiscussionRow>(&sql)
        .bind(discussion_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Discussion not found".to_string()))
}

/// Author id of `discussion_id`, or 404.
async fn discussion_author(pool: &SqlitePool, discussion_id: &str) -> Result<String> {
    sqlx::query_scalar::<_, String>("SELECT author_id FROM discussions WHERE id = ?")
        .bind(discussion_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Discussion not found".to_string()))
}

async fn list_discussions(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<ListQuery>,
) -> Result<Json<DiscussionListResponse>> {
    let category = query.category.filter(|c| !c.is_empty() && c != "all");
    let search = query
        .search
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let page = Pagination::new(query.page, query.per_page);

    let count_sql = format!("SELECT COUNT(*) FROM discussions d {DISCUSSION_FILTER}");
    let total = sqlx::query_scalar::<_, i64>(&count_sql)
        .bind(&category)
        .bind(&search)
        .fetch_one(&state.db.pool)
        .await?;

    let sql = format!(
        "{DISCUSSION_SELECT} {DISCUSSION_FILTER} ORDER BY {} LIMIT ?3 OFFSET ?4",
        query.sort.order_by()
    );
    let rows = sqlx::query_as::<_, DiscussionRow>(&sql)
        .bind(&category)
        .bind(&search)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&state.db.pool)
        .await?;

    let mut discussions = Vec::with_capacity(rows.len());
    for row in rows {
        discussions.push(discussion_view(&state.db.pool, &ctx, row).await?);
    }

    Ok(Json(DiscussionListResponse {
        discussions,
        total,
        pages: page.pages(total),
        current_page: page.page(),
    }))
}

async fn create_discussion(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(body): Json<CreateDiscussionRequest>,
) -> Result<(StatusCode, Json<DiscussionView>)> {
    let actor = ctx.require_user()?;

    for (field, value) in [
        ("title", &body.title),
        ("content", &body.content),
        ("category", &body.category),
    ] {
        if value.trim().is_empty() {
            return Err(AppError::Validation(format!("{field} is required")));
        }
    }

    // Media is only kept when both the payload and its type are present.
    let (media_type, media_url, media_filename) = match (body.media_type, body.media_data) {
        (Some(kind), Some(data)) if !kind.is_empty() && !data.is_empty() => (
            Some(kind),
            Some(data),
            Some(
                body.media_filename
                    .unwrap_or_else(|| "uploaded_file".to_string()),
            ),
        ),
        _ => (None, None, None),
    };

    let discussion_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO discussions
            (id, title, content, category, tags, media_type, media_url, media_filename, author_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&discussion_id)
    .bind(body.title.trim())
    .bind(body.content.trim())
    .bind(body.category.trim())
    .bind(join_tags(&body.tags))
    .bind(media_type)
    .bind(media_url)
    .bind(media_filename)
    .bind(&actor.id)
    .bind(&now)
    .bind(&now)
    .execute(&state.db.pool)
    .await?;

    tracing::info!(discussion_id = %discussion_id, author_id = %actor.id, "discussion created");

    let row = fetch_discussion(&state.db.pool, &discussion_id).await?;
    let view = discussion_view(&state.db.pool, &ctx, row).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn get_discussion(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(discussion_id): Path<String>,
) -> Result<Json<DiscussionView>> {
    let row = fetch_discussion(&state.db.pool, &discussion_id).await?;
    Ok(Json(discussion_view(&state.db.pool, &ctx, row).await?))
}

async fn update_discussion(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(discussion_id): Path<String>,
    Json(body): Json<UpdateDiscussionRequest>,
) -> Result<Json<DiscussionView>> {
    let actor = ctx.require_user()?;

    if discussion_author(&state.db.pool, &discussion_id).await? != actor.id {
        return Err(AppError::Forbidden(
            "You can only edit your own discussions".to_string(),
        ));
    }

    for (field, value) in [
        ("title", &body.title),
        ("content", &body.content),
        ("category", &body.category),
    ] {
        if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
            return Err(AppError::Validation(format!("{field} cannot be empty")));
        }
    }

    sqlx::query(
        r#"
        UPDATE discussions SET
            title = COALESCE(?, title),
            content = COALESCE(?, content),
            category = COALESCE(?, category),
            tags = COALESCE(?, tags),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(body.title.as_deref().map(str::trim))
    .bind(body.content.as_deref().map(str::trim))
    .bind(body.category.as_deref().map(str::trim))
    .bind(body.tags.as_deref().map(join_tags))
    .bind(Utc::now().to_rfc3339())
    .bind(&discussion_id)
    .execute(&state.db.pool)
    .await?;

    let row = fetch_discussion(&state.db.pool, &discussion_id).await?;
    Ok(Json(discussion_view(&state.db.pool, &ctx, row).await?))
}

async fn delete_discussion(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(discussion_id): Path<String>,
) -> Result<StatusCode> {
    let actor = ctx.require_user()?;

    if discussion_author(&state.db.pool, &discussion_id).await? != actor.id {
        return Err(AppError::Forbidden(
            "You can only delete your own discussions".to_string(),
        ));
    }

    sqlx::query("DELETE FROM discussions WHERE id = ?")
        .bind(&discussion_id)
        .execute(&state.db.pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn stats(State(state): State<AppState>) -> Result<Json<DiscussionStats>> {
    let (ideas_shared, active_members, total_replies) =
        sqlx::query_as::<_, (i64, i64, i64)>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM discussions),
                (SELECT COUNT(DISTINCT author_id) FROM discussions),
                (SELECT COUNT(*) FROM discussion_replies)
            "#,
        )
        .fetch_one(&state.db.pool)
        .await?;

    Ok(Json(DiscussionStats {
        ideas_shared,
        active_members,
        total_replies,
    }))
}

async fn like(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(discussion_id): Path<String>,
) -> Result<Json<DiscussionLikeOutcome>> {
    let outcome =
        reactions::toggle_discussion_like(&state.db.pool, &state.notifier, &ctx, &discussion_id)
            .await?;
    Ok(Json(outcome))
}
