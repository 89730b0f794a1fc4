use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::{
    error::Result,
    middleware::auth::RequestContext,
    services::collaboration::{self, SentRequest, Teammate},
    AppState,
};

const ACTIVITY_PER_KIND: i64 = 5;
const ACTIVITY_LIMIT: i64 = 10;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dashboard/stats", get(stats))
        .route("/dashboard/user-collaborations", get(sent_collaborations))
        .route("/dashboard/user-donations", get(donations))
        .route("/dashboard/user-activity", get(activity))
        .route("/user/team", get(team))
}

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub project_count: i64,
    pub total_funding: f64,
    pub total_upvotes: i64,
    pub collaborations_sent: i64,
}

#[derive(Debug, Serialize)]
pub struct SentCollaborationsResponse {
    pub collaborations: Vec<SentRequest>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DonationEntry {
    pub id: String,
    pub amount: f64,
    pub message: String,
    pub created_at: String,
    pub project_id: String,
    pub project_title: String,
    pub owner_name: String,
}

#[derive(Debug, Serialize)]
pub struct DonationsResponse {
    pub donations: Vec<DonationEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    ProjectCreated,
    Collaboration,
    Donation,
    Vote,
    Comment,
}

impl ActivityKind {
    fn parse(kind: &str) -> Option<Self> {
        match kind {
            "project_created" => Some(ActivityKind::ProjectCreated),
            "collaboration" => Some(ActivityKind::Collaboration),
            "donation" => Some(ActivityKind::Donation),
            "vote" => Some(ActivityKind::Vote),
            "comment" => Some(ActivityKind::Comment),
            _ => None,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ActivityRow {
    kind: String,
    project_id: String,
    project_title: String,
    time: String,
    status: Option<String>,
    amount: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct Activity {
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub text: String,
    pub time: String,
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
}

impl Activity {
    fn from_row(row: ActivityRow) -> Option<Self> {
        let kind = ActivityKind::parse(&row.kind)?;
        let title = &row.project_title;
        let text = match kind {
            ActivityKind::ProjectCreated => format!("Created new project \"{title}\""),
            ActivityKind::Collaboration => format!("Requested collaboration on \"{title}\""),
            ActivityKind::Donation => format!(
                "Donated ${:.2} to \"{title}\"",
                row.amount.unwrap_or_default()
            ),
            ActivityKind::Vote => format!("Voted for \"{title}\""),
            ActivityKind::Comment => format!("Commented on \"{title}\""),
        };

        Some(Self {
            kind,
            text,
            time: row.time,
            project_id: row.project_id,
            status: row.status,
            amount: row.amount,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ActivityResponse {
    pub activities: Vec<Activity>,
}

#[derive(Debug, Serialize)]
pub struct TeamResponse {
    pub team_members: Vec<Teammate>,
}

// The latest ?2 rows of each kind, merged and cut to the newest ?3.
const ACTIVITY_SQL: &str = r#"
    SELECT * FROM (
        SELECT 'project_created' AS kind, p.id AS project_id, p.title AS project_title,
               p.created_at AS time, NULL AS status, NULL AS amount
        FROM projects p WHERE p.owner_id = ?1
        ORDER BY p.created_at DESC LIMIT ?2)
    UNION ALL
    SELECT * FROM (
        SELECT 'collaboration', p.id, p.title, c.created_at, c.status, NULL
        FROM collaborations c JOIN projects p ON c.project_id = p.id
        WHERE c.user_id = ?1
        ORDER BY c.created_at DESC LIMIT ?2)
    UNION ALL
    SELECT * FROM (
        SELECT 'donation', p.id, p.title, d.created_at, NULL, d.amount
        FROM donations d JOIN projects p ON d.project_id = p.id
        WHERE d.user_id = ?1
        ORDER BY d.created_at DESC LIMIT ?2)
    UNION ALL
    SELECT * FROM (
        SELECT 'vote', p.id, p.title, v.created_at, NULL, NULL
        FROM votes v JOIN projects p ON v.project_id = p.id
        WHERE v.user_id = ?1 AND v.is_upvote = 1
        ORDER BY v.created_at DESC LIMIT ?2)
    UNION ALL
    SELECT * FROM (
        SELECT 'comment', p.id, p.title, cm.created_at, NULL, NULL
        FROM comments cm JOIN projects p ON cm.project_id = p.id
        WHERE cm.author_id = ?1
        ORDER BY cm.created_at DESC LIMIT ?2)
    ORDER BY time DESC
    LIMIT ?3
"#;

async fn stats(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<DashboardStats>> {
    let actor = ctx.require_user()?;

    let (project_count, total_funding, total_upvotes, collaborations_sent) =
        sqlx::query_as::<_, (i64, f64, i64, i64)>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM projects WHERE owner_id = ?1),
                (SELECT COALESCE(SUM(d.amount), 0.0) FROM donations d
                 JOIN projects p ON d.project_id = p.id WHERE p.owner_id = ?1),
                (SELECT COUNT(*) FROM votes v
                 JOIN projects p ON v.project_id = p.id
                 WHERE p.owner_id = ?1 AND v.is_upvote = 1),
                (SELECT COUNT(*) FROM collaborations WHERE user_id = ?1)
            "#,
        )
        .bind(&actor.id)
        .fetch_one(&state.db.pool)
        .await?;

    Ok(Json(DashboardStats {
        project_count,
        total_funding,
        total_upvotes,
        collaborations_sent,
    }))
}

async fn sent_collaborations(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<SentCollaborationsResponse>> {
    let collaborations = collaboration::sent(&state.db.pool, &ctx).await?;
    Ok(Json(SentCollaborationsResponse { collaborations }))
}

async fn donations(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<DonationsResponse>> {
    let actor = ctx.require_user()?;

    let donations = sqlx::query_as::<_, DonationEntry>(
        r#"
        SELECT d.id, d.amount, d.message, d.created_at,
               p.id AS project_id, p.title AS project_title, u.full_name AS owner_name
        FROM donations d
        JOIN projects p ON d.project_id = p.id
        JOIN users u ON p.owner_id = u.id
        WHERE d.user_id = ?
        ORDER BY d.created_at DESC
        "#,
    )
    .bind(&actor.id)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(DonationsResponse { donations }))
}

async fn activity(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<ActivityResponse>> {
    let actor = ctx.require_user()?;

    let rows = sqlx::query_as::<_, ActivityRow>(ACTIVITY_SQL)
        .bind(&actor.id)
        .bind(ACTIVITY_PER_KIND)
        .bind(ACTIVITY_LIMIT)
        .fetch_all(&state.db.pool)
        .await?;

    Ok(Json(ActivityResponse {
        activities: rows.into_iter().filter_map(Activity::from_row).collect(),
    }))
}

async fn team(State(state): State<AppState>, ctx: RequestContext) -> Result<Json<TeamResponse>> {
    let team_members = collaboration::teammates(&state.db.pool, &ctx).await?;
    Ok(Json(TeamResponse { team_members }))
}
