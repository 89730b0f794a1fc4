use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    db::models::User,
    error::{is_unique_violation, AppError, Result},
    middleware::auth::RequestContext,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/me", get(me))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub full_name: String,
    #[serde(default)]
    pub college: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub username: String,
    pub full_name: String,
    pub exp: usize,
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| AppError::Internal("Failed to hash password".to_string()))
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub fn create_token(user: &User, secret: &str) -> Result<String> {
    let expiration = (Utc::now() + Duration::days(7)).timestamp() as usize;

    let claims = Claims {
        sub: user.id.clone(),
        username: user.username.clone(),
        full_name: user.full_name.clone(),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AppError::Internal("Failed to create token".to_string()))
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>)> {
    let username = body.username.trim();
    let full_name = body.full_name.trim();

    if username.is_empty() {
        return Err(AppError::Validation("Username is required".to_string()));
    }
    if body.email.is_empty() || !body.email.contains('@') {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }
    if full_name.is_empty() {
        return Err(AppError::Validation("Full name is required".to_string()));
    }
    if body.password.len() < 8 {
        return Err(AppError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }

    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM users WHERE username = ? OR email = ?",
    )
    .bind(username)
    .bind(&body.email)
    .fetch_one(&state.db.pool)
    .await?;

    if existing > 0 {
        return Err(AppError::Conflict(
            "Username or email already registered".to_string(),
        ));
    }

    let user = User {
        id: Uuid::new_v4().to_string(),
        username: username.to_string(),
        email: body.email.clone(),
        full_name: full_name.to_string(),
        college: body.college.trim().to_string(),
        password_hash: hash_password(&body.password)?,
        bio: None,
        created_at: Utc::now().to_rfc3339(),
    };

    sqlx::query(
        "INSERT INTO users (id, username, email, full_name, college, password_hash, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&user.id)
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.full_name)
    .bind(&user.college)
    .bind(&user.password_hash)
    .bind(&user.created_at)
    .execute(&state.db.pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("Username or email already registered".to_string())
        } else {
            AppError::Database(e)
        }
    })?;

    tracing::info!(user_id = %user.id, username = %user.username, "user registered");

    let token = create_token(&user, &state.config.jwt_secret)?;
    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
        .bind(body.username.trim())
        .fetch_optional(&state.db.pool)
        .await?
        .ok_or(AppError::Unauthorized)?;

    if !verify_password(&body.password, &user.password_hash)? {
        return Err(AppError::Unauthorized);
    }

    let token = create_token(&user, &state.config.jwt_secret)?;
    Ok(Json(AuthResponse { token, user }))
}

async fn me(State(state): State<AppState>, ctx: RequestContext) -> Result<Json<User>> {
    let actor = ctx.require_user()?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(&actor.id)
        .fetch_optional(&state.db.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    Ok(Json(user))
}
