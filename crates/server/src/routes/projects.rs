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
    db::models::{
        Attachment, Collaboration, Donation, NotificationKind, ProjectStatus, UserSummary,
    },
    error::{AppError, Result},
    middleware::auth::RequestContext,
    routes::Pagination,
    services::{
        aggregate::{self, ProjectStats, PROJECT_STATS_COLUMNS},
        collaboration,
        notify::Notice,
        reactions::{self, VoteOutcome},
    },
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/projects", get(list_projects).post(create_project))
        .route(
            "/projects/:id",
            get(get_project).put(update_project).delete(delete_project),
        )
        .route("/projects/:id/vote", post(vote))
        .route("/projects/:id/donate", post(donate))
        .route("/projects/:id/collaborate", post(collaborate))
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProjectSort {
    #[default]
    Recent,
    Popular,
    Funding,
}

impl ProjectSort {
    fn order_by(self) -> &'static str {
        match self {
            ProjectSort::Recent => "p.created_at DESC",
            ProjectSort::Popular => "vote_count DESC, p.created_at DESC",
            ProjectSort::Funding => "current_funding DESC, p.created_at DESC",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub sort: ProjectSort,
    pub category: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub title: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub funding_goal: f64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub funding_goal: Option<f64>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DonateRequest {
    pub amount: f64,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct CollaborateRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: String,
    title: String,
    description: String,
    category: String,
    funding_goal: f64,
    status: String,
    created_at: String,
    updated_at: String,
    owner_id: String,
    owner_username: String,
    owner_full_name: String,
    #[sqlx(flatten)]
    stats: ProjectStats,
}

#[derive(Debug, Serialize)]
pub struct ProjectView {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub funding_goal: f64,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
    pub owner: UserSummary,
    #[serde(flatten)]
    pub stats: ProjectStats,
    pub can_edit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_voted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
}

impl ProjectView {
    fn from_row(row: ProjectRow, ctx: &RequestContext) -> Self {
        Self {
            can_edit: ctx.current_user_id() == Some(row.owner_id.as_str()),
            id: row.id,
            title: row.title,
            description: row.description,
            category: row.category,
            funding_goal: row.funding_goal,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
            owner: UserSummary {
                id: row.owner_id,
                username: row.owner_username,
                full_name: row.owner_full_name,
            },
            stats: row.stats,
            user_voted: None,
            attachments: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProjectListResponse {
    pub projects: Vec<ProjectView>,
    pub total: i64,
    pub pages: i64,
    pub current_page: i64,
}

#[derive(Debug, Serialize)]
pub struct DonateResponse {
    pub donation: Donation,
    pub new_funding: f64,
}

fn project_select() -> String {
    format!(
        r#"
        SELECT p.id, p.title, p.description, p.category, p.funding_goal, p.status,
               p.created_at, p.updated_at,
               u.id AS owner_id, u.username AS owner_username, u.full_name AS owner_full_name,
               {PROJECT_STATS_COLUMNS}
        FROM projects p
        JOIN users u ON p.owner_id = u.id
        "#
    )
}

async fn fetch_project(pool: &SqlitePool, project_id: &str) -> Result<ProjectRow> {
    let sql = format!("{} WHERE p.id = ?", project_select());
    sqlx::query_as::<_, ProjectRow>(&sql)
        .bind(project_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Project not found".to_string()))
}

/// Owner id of `project_id`, or 404.
pub(crate) async fn project_owner(pool: &SqlitePool, project_id: &str) -> Result<String> {
    sqlx::query_scalar::<_, String>("SELECT owner_id FROM projects WHERE id = ?")
        .bind(project_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Project not found".to_string()))
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn validate_description(description: &str, min_words: usize) -> Result<()> {
    if word_count(description) < min_words {
        return Err(AppError::Validation(format!(
            "Description must be at least {min_words} words"
        )));
    }
    Ok(())
}

fn validate_funding_goal(goal: f64) -> Result<()> {
    if !goal.is_finite() || goal < 0.0 {
        return Err(AppError::Validation(
            "Funding goal must be a non-negative number".to_string(),
        ));
    }
    Ok(())
}

async fn list_projects(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<ListQuery>,
) -> Result<Json<ProjectListResponse>> {
    let category = query.category.filter(|c| !c.is_empty() && c != "all");
    let page = Pagination::new(query.page, query.per_page);

    let total = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM projects WHERE ?1 IS NULL OR category = ?1",
    )
    .bind(&category)
    .fetch_one(&state.db.pool)
    .await?;

    let sql = format!(
        "{} WHERE ?1 IS NULL OR p.category = ?1 ORDER BY {} LIMIT ?2 OFFSET ?3",
        project_select(),
        query.sort.order_by()
    );
    let rows = sqlx::query_as::<_, ProjectRow>(&sql)
        .bind(&category)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&state.db.pool)
        .await?;

    Ok(Json(ProjectListResponse {
        projects: rows
            .into_iter()
            .map(|row| ProjectView::from_row(row, &ctx))
            .collect(),
        total,
        pages: page.pages(total),
        current_page: page.page(),
    }))
}

async fn create_project(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(body): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ProjectView>)> {
    let actor = ctx.require_user()?;

    if body.title.trim().is_empty() {
        return Err(AppError::Validation("Title is required".to_string()));
    }
    if body.category.trim().is_empty() {
        return Err(AppError::Validation("Category is required".to_string()));
    }
    validate_description(&body.description, state.config.min_description_words)?;
    validate_funding_goal(body.funding_goal)?;

    let project_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO projects (id, title, description, category, funding_goal, status, owner_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&project_id)
    .bind(body.title.trim())
    .bind(&body.description)
    .bind(body.category.trim())
    .bind(body.funding_goal)
    .bind(ProjectStatus::Active.as_str())
    .bind(&actor.id)
    .bind(&now)
    .bind(&now)
    .execute(&state.db.pool)
    .await?;

    tracing::info!(project_id = %project_id, owner_id = %actor.id, "project created");

    let row = fetch_project(&state.db.pool, &project_id).await?;
    Ok((StatusCode::CREATED, Json(ProjectView::from_row(row, &ctx))))
}

async fn get_project(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(project_id): Path<String>,
) -> Result<Json<ProjectView>> {
    let row = fetch_project(&state.db.pool, &project_id).await?;
    let mut view = ProjectView::from_row(row, &ctx);

    view.attachments = Some(
        sqlx::query_as::<_, Attachment>(
            "SELECT * FROM attachments WHERE project_id = ? ORDER BY uploaded_at ASC",
        )
        .bind(&project_id)
        .fetch_all(&state.db.pool)
        .await?,
    );

    if let Some(user_id) = ctx.current_user_id() {
        let voted = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM votes WHERE project_id = ? AND user_id = ? AND is_upvote = 1",
        )
        .bind(&project_id)
        .bind(user_id)
        .fetch_one(&state.db.pool)
        .await?;
        view.user_voted = Some(voted > 0);
    }

    Ok(Json(view))
}

async fn update_project(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(project_id): Path<String>,
    Json(body): Json<UpdateProjectRequest>,
) -> Result<Json<ProjectView>> {
    let actor = ctx.require_user()?;

    let owner_id = project_owner(&state.db.pool, &project_id).await?;
    if owner_id != actor.id {
        return Err(AppError::Forbidden(
            "Only the project owner can edit this project".to_string(),
        ));
    }

    if let Some(title) = &body.title {
        if title.trim().is_empty() {
            return Err(AppError::Validation("Title is required".to_string()));
        }
    }
    if let Some(category) = &body.category {
        if category.trim().is_empty() {
            return Err(AppError::Validation("Category is required".to_string()));
        }
    }
    if let Some(description) = &body.description {
        validate_description(description, state.config.min_description_words)?;
    }
    if let Some(goal) = body.funding_goal {
        validate_funding_goal(goal)?;
    }
    let status = body
        .status
        .as_deref()
        .map(|s| s.trim().parse::<ProjectStatus>())
        .transpose()?;

    sqlx::query(
        r#"
        UPDATE projects SET
            title = COALESCE(?, title),
            description = COALESCE(?, description),
            category = COALESCE(?, category),
            funding_goal = COALESCE(?, funding_goal),
            status = COALESCE(?, status),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(body.title.as_deref().map(str::trim))
    .bind(body.description.as_deref())
    .bind(body.category.as_deref().map(str::trim))
    .bind(body.funding_goal)
    .bind(status.map(ProjectStatus::as_str))
    .bind(Utc::now().to_rfc3339())
    .bind(&project_id)
    .execute(&state.db.pool)
    .await?;

    let row = fetch_project(&state.db.pool, &project_id).await?;
    Ok(Json(ProjectView::from_row(row, &ctx)))
}

async fn delete_project(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(project_id): Path<String>,
) -> Result<StatusCode> {
    let actor = ctx.require_user()?;

    let owner_id = project_owner(&state.db.pool, &project_id).await?;
    if owner_id != actor.id {
        return Err(AppError::Forbidden(
            "Only the project owner can delete this project".to_string(),
        ));
    }

    sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(&project_id)
        .execute(&state.db.pool)
        .await?;

    if let Err(e) = state.storage.delete_project_dir(&project_id).await {
        tracing::warn!(project_id = %project_id, error = %e, "failed to remove project uploads");
    }

    tracing::info!(project_id = %project_id, "project deleted");

    Ok(StatusCode::NO_CONTENT)
}

async fn vote(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(project_id): Path<String>,
) -> Result<Json<VoteOutcome>> {
    let outcome =
        reactions::toggle_vote(&state.db.pool, &state.notifier, &ctx, &project_id).await?;
    Ok(Json(outcome))
}

async fn donate(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(project_id): Path<String>,
    Json(body): Json<DonateRequest>,
) -> Result<(StatusCode, Json<DonateResponse>)> {
    let actor = ctx.require_user()?;

    if !body.amount.is_finite() || body.amount <= 0.0 {
        return Err(AppError::Validation(
            "Donation amount must be greater than zero".to_string(),
        ));
    }

    let (owner_id, title) =
        sqlx::query_as::<_, (String, String)>("SELECT owner_id, title FROM projects WHERE id = ?")
            .bind(&project_id)
            .fetch_optional(&state.db.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Project not found".to_string()))?;

    let donation = Donation {
        id: Uuid::new_v4().to_string(),
        user_id: actor.id.clone(),
        project_id: project_id.clone(),
        amount: body.amount,
        message: body.message.trim().to_string(),
        created_at: Utc::now().to_rfc3339(),
    };

    sqlx::query(
        "INSERT INTO donations (id, user_id, project_id, amount, message, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&donation.id)
    .bind(&donation.user_id)
    .bind(&donation.project_id)
    .bind(donation.amount)
    .bind(&donation.message)
    .bind(&donation.created_at)
    .execute(&state.db.pool)
    .await?;

    state
        .notifier
        .notify(Notice {
            recipient: &owner_id,
            kind: NotificationKind::Donation,
            title: "New Donation Received",
            message: format!(
                "{} donated ${:.2} to your project \"{}\"",
                actor.full_name, body.amount, title
            ),
            actor: Some(&actor.id),
            project: Some(&project_id),
        })
        .await;

    let new_funding = aggregate::funding_total(&state.db.pool, &project_id).await?;
    tracing::info!(project_id = %project_id, amount = body.amount, "donation recorded");

    Ok((
        StatusCode::CREATED,
        Json(DonateResponse {
            donation,
            new_funding,
        }),
    ))
}

async fn collaborate(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(project_id): Path<String>,
    Json(body): Json<CollaborateRequest>,
) -> Result<(StatusCode, Json<Collaboration>)> {
    let collaboration = collaboration::request(
        &state.db.pool,
        &state.notifier,
        &ctx,
        &project_id,
        body.message.trim(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(collaboration)))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;
    use tower::util::ServiceExt;

    use crate::{
        db::test_utils::{notification_count, seed_project, seed_user},
        routes::test_support::{body_json, request, test_app, token_for},
    };

    fn long_description() -> String {
        vec!["word"; 60].join(" ")
    }

    #[tokio::test]
    async fn create_requires_a_long_description() -> anyhow::Result<()> {
        let (app, state) = test_app().await?;
        let owner = seed_user(&state.db.pool, "owner").await?;
        let token = token_for(&state, &owner)?;

        let short = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/api/projects",
                Some(&token),
                Some(json!({ "title": "Tiny", "description": "too short", "category": "art" })),
            )?)
            .await?;
        assert_eq!(short.status(), StatusCode::BAD_REQUEST);

        let res = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/api/projects",
                Some(&token),
                Some(json!({
                    "title": "Wind Turbine",
                    "description": long_description(),
                    "category": "technology",
                    "funding_goal": 500.0
                })),
            )?)
            .await?;
        assert_eq!(res.status(), StatusCode::CREATED);
        let body = body_json(res).await?;
        assert_eq!(body["owner"]["username"], "owner");
        assert_eq!(body["vote_count"], 0);
        assert_eq!(body["current_funding"], 0.0);
        assert_eq!(body["can_edit"], true);

        let anonymous = app
            .oneshot(request(
                Method::POST,
                "/api/projects",
                None,
                Some(json!({ "title": "x", "description": long_description(), "category": "art" })),
            )?)
            .await?;
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn donations_feed_live_funding() -> anyhow::Result<()> {
        let (app, state) = test_app().await?;
        let owner = seed_user(&state.db.pool, "owner").await?;
        let donor = seed_user(&state.db.pool, "donor").await?;
        let project = seed_project(&state.db.pool, &owner.id, "Garden").await?;
        let token = token_for(&state, &donor)?;
        let uri = format!("/api/projects/{project}/donate");

        let zero = app
            .clone()
            .oneshot(request(Method::POST, &uri, Some(&token), Some(json!({ "amount": 0 })))?)
            .await?;
        assert_eq!(zero.status(), StatusCode::BAD_REQUEST);

        let res = app
            .clone()
            .oneshot(request(Method::POST, &uri, Some(&token), Some(json!({ "amount": 40.5 })))?)
            .await?;
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(body_json(res).await?["new_funding"], 40.5);

        let res = app
            .clone()
            .oneshot(request(Method::POST, &uri, Some(&token), Some(json!({ "amount": 9.5 })))?)
            .await?;
        assert_eq!(body_json(res).await?["new_funding"], 50.0);

        let res = app
            .oneshot(request(Method::GET, &format!("/api/projects/{project}"), None, None)?)
            .await?;
        let body = body_json(res).await?;
        assert_eq!(body["current_funding"], 50.0);
        assert!(body.get("user_voted").is_none());

        assert_eq!(notification_count(&state.db.pool, &owner.id, "donation").await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn popular_sort_follows_live_votes() -> anyhow::Result<()> {
        let (app, state) = test_app().await?;
        let owner = seed_user(&state.db.pool, "owner").await?;
        let fan = seed_user(&state.db.pool, "fan").await?;
        let quiet = seed_project(&state.db.pool, &owner.id, "Quiet").await?;
        let loud = seed_project(&state.db.pool, &owner.id, "Loud").await?;
        let token = token_for(&state, &fan)?;

        let res = app
            .clone()
            .oneshot(request(
                Method::POST,
                &format!("/api/projects/{loud}/vote"),
                Some(&token),
                None,
            )?)
            .await?;
        let body = body_json(res).await?;
        assert_eq!(body["action"], "added");
        assert_eq!(body["vote_count"], 1);

        let res = app
            .oneshot(request(Method::GET, "/api/projects?sort=popular", None, None)?)
            .await?;
        let body = body_json(res).await?;
        assert_eq!(body["total"], 2);
        assert_eq!(body["current_page"], 1);
        assert_eq!(body["projects"][0]["id"], loud.as_str());
        assert_eq!(body["projects"][1]["id"], quiet.as_str());
        Ok(())
    }

    #[tokio::test]
    async fn update_validates_status_and_category() -> anyhow::Result<()> {
        let (app, state) = test_app().await?;
        let owner = seed_user(&state.db.pool, "owner").await?;
        let project = seed_project(&state.db.pool, &owner.id, "Solar Kiln").await?;
        let token = token_for(&state, &owner)?;
        let uri = format!("/api/projects/{project}");

        for body in [json!({ "status": "archived" }), json!({ "category": "  " })] {
            let res = app
                .clone()
                .oneshot(request(Method::PUT, &uri, Some(&token), Some(body))?)
                .await?;
            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        }

        let res = app
            .clone()
            .oneshot(request(
                Method::PUT,
                &uri,
                Some(&token),
                Some(json!({ "status": "paused", "category": "energy" })),
            )?)
            .await?;
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await?;
        assert_eq!(body["status"], "paused");
        assert_eq!(body["category"], "energy");
        Ok(())
    }

    #[tokio::test]
    async fn huge_page_number_returns_an_empty_page() -> anyhow::Result<()> {
        let (app, state) = test_app().await?;
        let owner = seed_user(&state.db.pool, "owner").await?;
        seed_project(&state.db.pool, &owner.id, "Only").await?;

        let res = app
            .oneshot(request(
                Method::GET,
                &format!("/api/projects?page={}", i64::MAX),
                None,
                None,
            )?)
            .await?;
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await?;
        assert_eq!(body["total"], 1);
        assert_eq!(body["projects"].as_array().map(Vec::len), Some(0));
        Ok(())
    }

    #[tokio::test]
    async fn only_owner_may_delete() -> anyhow::Result<()> {
        let (app, state) = test_app().await?;
        let owner = seed_user(&state.db.pool, "owner").await?;
        let other = seed_user(&state.db.pool, "other").await?;
        let project = seed_project(&state.db.pool, &owner.id, "Mine").await?;
        let uri = format!("/api/projects/{project}");

        let res = app
            .clone()
            .oneshot(request(
                Method::DELETE,
                &uri,
                Some(&token_for(&state, &other)?),
                None,
            )?)
            .await?;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = app
            .clone()
            .oneshot(request(
                Method::DELETE,
                &uri,
                Some(&token_for(&state, &owner)?),
                None,
            )?)
            .await?;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        let res = app.oneshot(request(Method::GET, &uri, None, None)?).await?;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        Ok(())
    }
}
