use axum::body::Body;
use axum::extract::{FromRequestParts, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::tokens::extract_bearer_token;
use crate::shared::error::ApiError;
use crate::shared::models::UserRole;
use crate::shared::state::AppState;

/// Authenticated caller, inserted into request extensions by the auth
/// middleware and pulled out by handlers via the extractor below.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: UserRole,
    pub token_id: String,
}

async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<AuthenticatedUser, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing authorization token".to_string()))?;

    let token = extract_bearer_token(header)
        .ok_or_else(|| ApiError::Unauthorized("Invalid authorization format".to_string()))?;

    let claims = state
        .tokens
        .validate_access(token)
        .await
        .map_err(|e| ApiError::Unauthorized(e.to_string()))?;

    Ok(AuthenticatedUser {
        user_id: claims
            .user_id()
            .map_err(|e| ApiError::Unauthorized(e.to_string()))?,
        role: claims
            .user_role()
            .map_err(|e| ApiError::Unauthorized(e.to_string()))?,
        email: claims.email,
        token_id: claims.jti,
    })
}

async fn require_role(
    state: Arc<AppState>,
    mut request: Request<Body>,
    next: Next,
    allowed: &[UserRole],
) -> Result<Response, ApiError> {
    let user = authenticate(&state, request.headers()).await?;
    if !allowed.contains(&user.role) {
        return Err(ApiError::Forbidden(
            "Insufficient role for this resource".to_string(),
        ));
    }
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Any valid access token.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let user = authenticate(&state, request.headers()).await?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    require_role(state, request, next, &[UserRole::Admin]).await
}

pub async fn require_instructor(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    require_role(state, request, next, &[UserRole::Instructor]).await
}

pub async fn require_learner(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    require_role(state, request, next, &[UserRole::Learner]).await
}

/// Onboarding portal serves companies and influencers.
pub async fn require_onboarding(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    require_role(
        state,
        request,
        next,
        &[UserRole::Company, UserRole::Influencer],
    )
    .await
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))
    }
}
