use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::shared::error::ApiError;
use crate::shared::models::schema::{social_accounts, users};
use crate::shared::models::{SocialAccount, User};
use crate::shared::state::AppState;
use crate::shared::utils::with_conn;
use crate::users::UserResponse;

#[derive(Debug, Deserialize)]
pub struct ProfileUpdateRequest {
    pub display_name: Option<String>,
    pub expertise: Option<String>,
    pub onboarded: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub platform: String,
    pub handle: String,
    pub stats: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RefreshRequest {
    pub stats: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct SocialAccountResponse {
    pub id: Uuid,
    pub platform: String,
    pub handle: String,
    pub stats: serde_json::Value,
    pub connected_at: DateTime<Utc>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

impl From<SocialAccount> for SocialAccountResponse {
    fn from(account: SocialAccount) -> Self {
        Self {
            id: account.id,
            platform: account.platform,
            handle: account.handle,
            stats: account.stats,
            connected_at: account.connected_at,
            last_refreshed_at: account.last_refreshed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DisconnectResponse {
    pub success: bool,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/profile", get(get_profile).put(update_profile))
        .route("/social", get(list_social_accounts))
        .route("/social/connect", post(connect_social_account))
        .route("/social/:id", delete(disconnect_social_account))
        .route("/social/:id/refresh", post(refresh_social_account))
}

pub async fn get_profile(
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

/// Partial profile update. The portal sends `onboarded: true` once the
/// profile form is completed.
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<ProfileUpdateRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    if let Some(name) = &req.display_name {
        if name.trim().is_empty() {
            return Err(ApiError::Validation("Display name is required".to_string()));
        }
    }

    let user_id = user.user_id;
    let row = with_conn(&state.conn, move |conn| {
        let changes = ProfileChanges {
            display_name: req.display_name.map(|n| n.trim().to_string()),
            expertise: req.expertise,
            onboarded: req.onboarded,
        };

        let row: User = diesel::update(users::table.find(user_id))
            .set((changes, users::updated_at.eq(diesel::dsl::now)))
            .returning(User::as_returning())
            .get_result(conn)?;
        Ok(row)
    })
    .await?;

    Ok(Json(UserResponse::from(&row)))
}

pub async fn list_social_accounts(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<SocialAccountResponse>>, ApiError> {
    let user_id = user.user_id;
    let accounts = with_conn(&state.conn, move |conn| {
        let rows: Vec<SocialAccount> = social_accounts::table
            .filter(social_accounts::user_id.eq(user_id))
            .order(social_accounts::connected_at.asc())
            .select(SocialAccount::as_select())
            .load(conn)?;
        Ok(rows)
    })
    .await?;

    Ok(Json(
        accounts.into_iter().map(SocialAccountResponse::from).collect(),
    ))
}

/// One account per platform and user; connecting the same platform twice
/// is a 409.
pub async fn connect_social_account(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<ConnectRequest>,
) -> Result<Json<SocialAccountResponse>, ApiError> {
    let platform = req.platform.trim().to_lowercase();
    let handle = req.handle.trim().to_string();
    if platform.is_empty() {
        return Err(ApiError::Validation("Platform is required".to_string()));
    }
    if handle.is_empty() {
        return Err(ApiError::Validation("Handle is required".to_string()));
    }

    let user_id = user.user_id;
    let stats = req.stats.unwrap_or_else(|| serde_json::json!({}));
    let account = with_conn(&state.conn, move |conn| {
        let connected: i64 = social_accounts::table
            .filter(social_accounts::user_id.eq(user_id))
            .filter(social_accounts::platform.eq(&platform))
            .select(count_star())
            .first(conn)?;
        if connected > 0 {
            return Err(ApiError::Conflict(format!(
                "Platform {platform} is already connected"
            )));
        }

        let account: SocialAccount = diesel::insert_into(social_accounts::table)
            .values((
                social_accounts::user_id.eq(user_id),
                social_accounts::platform.eq(&platform),
                social_accounts::handle.eq(&handle),
                social_accounts::stats.eq(&stats),
            ))
            .returning(SocialAccount::as_returning())
            .get_result(conn)?;

        info!("User {user_id} connected {platform} account");
        Ok(account)
    })
    .await?;

    Ok(Json(SocialAccountResponse::from(account)))
}

pub async fn disconnect_social_account(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(account_id): Path<Uuid>,
) -> Result<Json<DisconnectResponse>, ApiError> {
    let user_id = user.user_id;
    with_conn(&state.conn, move |conn| {
        let deleted = diesel::delete(
            social_accounts::table
                .filter(social_accounts::id.eq(account_id))
                .filter(social_accounts::user_id.eq(user_id)),
        )
        .execute(conn)?;
        if deleted == 0 {
            return Err(ApiError::NotFound("Social account not found".to_string()));
        }
        info!("User {user_id} disconnected social account {account_id}");
        Ok(())
    })
    .await?;

    Ok(Json(DisconnectResponse { success: true }))
}

/// Replace the stored statistics blob and stamp the refresh time. Without a
/// body the stats stay as they are; only the timestamp moves.
pub async fn refresh_social_account(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(account_id): Path<Uuid>,
    body: Option<Json<RefreshRequest>>,
) -> Result<Json<SocialAccountResponse>, ApiError> {
    let stats = body.and_then(|Json(req)| req.stats);
    let user_id = user.user_id;

    let account = with_conn(&state.conn, move |conn| {
        let scope = social_accounts::table
            .filter(social_accounts::id.eq(account_id))
            .filter(social_accounts::user_id.eq(user_id));

        let updated: Option<SocialAccount> = match stats {
            Some(stats) => diesel::update(scope)
                .set((
                    social_accounts::stats.eq(stats),
                    social_accounts::last_refreshed_at.eq(diesel::dsl::now),
                ))
                .returning(SocialAccount::as_returning())
                .get_result(conn)
                .optional()?,
            None => diesel::update(scope)
                .set(social_accounts::last_refreshed_at.eq(diesel::dsl::now))
                .returning(SocialAccount::as_returning())
                .get_result(conn)
                .optional()?,
        };

        updated.ok_or_else(|| ApiError::NotFound("Social account not found".to_string()))
    })
    .await?;

    Ok(Json(SocialAccountResponse::from(account)))
}

#[derive(AsChangeset)]
#[diesel(table_name = users)]
struct ProfileChanges {
    display_name: Option<String>,
    expertise: Option<String>,
    onboarded: Option<bool>,
}
