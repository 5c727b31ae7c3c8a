pub mod middleware;
pub mod password;
pub mod tokens;

pub use middleware::AuthenticatedUser;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use diesel::prelude::*;

use crate::shared::error::ApiError;
use crate::shared::models::schema::users;
use crate::shared::models::{User, UserRole};
use crate::shared::state::AppState;
use crate::shared::utils::with_conn;
use crate::users::UserResponse;
use tokens::TokenPair;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: UserResponse,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
    pub message: String,
}

/// Unified auth surface, mounted at `/api/auth`. Admin credentials are
/// rejected here; the admin portal has its own login route.
pub fn configure(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let protected = Router::new()
        .route("/logout", post(logout))
        .route("/profile", get(profile))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::require_auth,
        ));

    Router::new()
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .merge(protected)
}

/// Admin login, mounted at `/api/admin/auth`.
pub fn admin_configure() -> Router<Arc<AppState>> {
    Router::new().route("/login", post(admin_login))
}

/// Look up the user and check the password on the blocking pool; argon2
/// verification is too slow for the async runtime threads.
async fn check_credentials(state: &AppState, req: LoginRequest) -> Result<User, ApiError> {
    let email = req.email.trim().to_lowercase();
    let password = req.password;

    with_conn(&state.conn, move |conn| {
        let user = users::table
            .filter(users::email.eq(&email))
            .select(User::as_select())
            .first::<User>(conn)
            .optional()?
            .ok_or_else(|| ApiError::Unauthorized("Invalid email or password".to_string()))?;

        let matches = password::verify_password(&password, &user.password_hash)
            .map_err(ApiError::Internal)?;
        if !matches {
            return Err(ApiError::Unauthorized(
                "Invalid email or password".to_string(),
            ));
        }
        Ok(user)
    })
    .await
}

fn issue_login_response(state: &AppState, user: User) -> Result<LoginResponse, ApiError> {
    let pair = state
        .tokens
        .issue_pair(user.id, &user.email, &user.role)
        .map_err(ApiError::Internal)?;
    Ok(LoginResponse {
        tokens: pair,
        user: UserResponse::from(&user),
    })
}

/// Unified login for the learning and onboarding apps. Admin accounts must
/// use the admin endpoint and are rejected here without revealing that the
/// account exists.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    info!("Login attempt for: {}", req.email);
    let user = check_credentials(&state, req).await?;

    if !user.is_active {
        warn!("Login rejected for deactivated account {}", user.email);
        return Err(ApiError::Forbidden("Account is deactivated".to_string()));
    }

    let role = UserRole::parse(&user.role)
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("unknown role stored: {}", user.role)))?;
    if !role.can_use_unified_login() {
        warn!("Admin account {} attempted unified login", user.email);
        return Err(ApiError::Unauthorized(
            "Invalid email or password".to_string(),
        ));
    }

    Ok(Json(issue_login_response(&state, user)?))
}

pub async fn admin_login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    info!("Admin login attempt for: {}", req.email);
    let user = check_credentials(&state, req).await?;

    if !user.is_active {
        return Err(ApiError::Forbidden("Account is deactivated".to_string()));
    }
    if UserRole::parse(&user.role) != Some(UserRole::Admin) {
        warn!("Non-admin account {} attempted admin login", user.email);
        return Err(ApiError::Unauthorized(
            "Invalid email or password".to_string(),
        ));
    }

    Ok(Json(issue_login_response(&state, user)?))
}

/// Rotate a refresh token. The account must still exist and be active, so
/// deactivation cuts access off at the next rotation rather than waiting for
/// the refresh token to expire.
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let claims = state
        .tokens
        .validate_refresh(&req.refresh_token)
        .await
        .map_err(|e| ApiError::Unauthorized(e.to_string()))?;

    let user_id = claims
        .user_id()
        .map_err(|e| ApiError::Unauthorized(e.to_string()))?;

    let active = with_conn(&state.conn, move |conn| {
        let is_active = users::table
            .find(user_id)
            .select(users::is_active)
            .first::<bool>(conn)
            .optional()?;
        Ok(is_active.unwrap_or(false))
    })
    .await?;
    if !active {
        return Err(ApiError::Unauthorized(
            "Account is no longer active".to_string(),
        ));
    }

    let pair = state
        .tokens
        .refresh(&req.refresh_token)
        .await
        .map_err(|e| ApiError::Unauthorized(e.to_string()))?;
    Ok(Json(pair))
}

/// Revoke the presented access token, and the refresh token too when the
/// client sends it along. Always succeeds for an authenticated caller.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    body: Option<Json<LogoutRequest>>,
) -> Result<Json<LogoutResponse>, ApiError> {
    state.tokens.revoke(&user.token_id).await;

    if let Some(Json(req)) = body {
        if let Some(refresh_token) = req.refresh_token {
            // An already-expired refresh token is fine here.
            state.tokens.revoke_bearer(&refresh_token).await.ok();
        }
    }

    info!("User {} logged out", user.email);
    Ok(Json(LogoutResponse {
        success: true,
        message: "Logged out".to_string(),
    }))
}

/// Current profile, read fresh from the database rather than echoed from
/// token claims.
pub async fn profile(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<UserResponse>, ApiError> {
    let user_id = user.user_id;
    let row = with_conn(&state.conn, move |conn| {
        Ok(users::table
            .find(user_id)
            .select(User::as_select())
            .first::<User>(conn)
            .optional()?)
    })
    .await?
    .ok_or_else(|| ApiError::Unauthorized("Account no longer exists".to_string()))?;

    Ok(Json(UserResponse::from(&row)))
}
