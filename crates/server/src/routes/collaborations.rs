use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::{
    db::models::{Collaboration, CollaborationStatus},
    error::Result,
    middleware::auth::RequestContext,
    services::collaboration::{self, IncomingRequest},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/collaborations", get(list_incoming))
        .route("/collaborations/:id/accept", post(accept))
        .route("/collaborations/:id/reject", post(reject))
}

#[derive(Debug, Serialize)]
pub struct IncomingResponse {
    pub requests: Vec<IncomingRequest>,
}

async fn list_incoming(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<IncomingResponse>> {
    let requests = collaboration::incoming(&state.db.pool, &ctx).await?;
    Ok(Json(IncomingResponse { requests }))
}

async fn accept(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<Json<Collaboration>> {
    let decided = collaboration::decide(
        &state.db.pool,
        &state.notifier,
        &ctx,
        &id,
        CollaborationStatus::Accepted,
    )
    .await?;
    Ok(Json(decided))
}

async fn reject(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<Json<Collaboration>> {
    let decided = collaboration::decide(
        &state.db.pool,
        &state.notifier,
        &ctx,
        &id,
        CollaborationStatus::Rejected,
    )
    .await?;
    Ok(Json(decided))
}
