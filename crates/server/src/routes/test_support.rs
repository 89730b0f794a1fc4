use axum::{
    body::Body,
    http::{header, Method, Request},
    response::Response,
    Router,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    db::test_utils::{setup_test_db, test_config},
    middleware::auth::AuthUser,
    routes::auth::Claims,
    AppState,
};

/// Full router over a fresh in-memory database and a scratch upload dir.
pub(crate) async fn test_app() -> anyhow::Result<(Router, AppState)> {
    let db = setup_test_db().await?;
    let uploads = std::env::temp_dir().join(format!("crowdhub-test-{}", Uuid::new_v4()));
    let state = AppState::new(db, test_config(&uploads.to_string_lossy()));
    Ok((crate::router(state.clone()), state))
}

pub(crate) fn token_for(state: &AppState, user: &AuthUser) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user.id.clone(),
        username: user.username.clone(),
        full_name: user.full_name.clone(),
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.config.jwt_secret.as_bytes()),
    )?)
}

pub(crate) fn request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> anyhow::Result<Request<Body>> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let req = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))?,
        None => builder.body(Body::empty())?,
    };
    Ok(req)
}

pub(crate) async fn body_json(res: Response) -> anyhow::Result<Value> {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
