use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use std::convert::Infallible;

use crate::{
    error::{AppError, Result},
    routes::auth::Claims,
    AppState,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub username: String,
    pub full_name: String,
}

/// Per-request caller identity. Handed explicitly to every core operation.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub user: Option<AuthUser>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self { user: None }
    }

    pub fn for_user(user: AuthUser) -> Self {
        Self { user: Some(user) }
    }

    pub fn current_user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    pub fn require_user(&self) -> Result<&AuthUser> {
        self.user.as_ref().ok_or(AppError::Unauthorized)
    }
}

/// Resolves an optional bearer token into a [`RequestContext`].
///
/// A missing token leaves the request anonymous; a token that fails to
/// verify is rejected outright.
pub async fn resolve_context(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let (mut parts, body) = request.into_parts();

    let bearer = TypedHeader::<Authorization<Bearer>>::from_request_parts(&mut parts, &state)
        .await
        .ok();

    let ctx = match bearer {
        Some(TypedHeader(Authorization(bearer))) => {
            let token_data = decode::<Claims>(
                bearer.token(),
                &DecodingKey::from_secret(state.config.jwt_secret.as_bytes()),
                &Validation::default(),
            )
            .map_err(|_| AppError::Unauthorized)?;

            RequestContext::for_user(AuthUser {
                id: token_data.claims.sub,
                username: token_data.claims.username,
                full_name: token_data.claims.full_name,
            })
        }
        None => RequestContext::anonymous(),
    };

    let mut request = Request::from_parts(parts, body);
    request.extensions_mut().insert(ctx);

    Ok(next.run(request).await)
}

// Extractor for getting the resolved context from request extensions
#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_default())
    }
}
