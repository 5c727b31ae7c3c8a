use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::password::{generate_temp_password, hash_password};
use crate::auth::AuthenticatedUser;
use crate::courses::{page_slice, MAX_PER_PAGE};
use crate::shared::error::ApiError;
use crate::shared::models::schema::users;
use crate::shared::models::{User, UserRole};
use crate::shared::state::AppState;
use crate::shared::utils::with_conn;

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub expertise: Option<String>,
    pub onboarded: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            role: user.role.clone(),
            expertise: user.expertise.clone(),
            onboarded: user.onboarded,
            is_active: user.is_active,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub display_name: String,
    pub role: UserRole,
    pub expertise: Option<String>,
    /// When omitted, a temporary password is generated and mailed to the
    /// new account.
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_sent: Option<bool>,
    /// Returned only when the credentials mail could not be delivered, so
    /// the admin can hand the password over some other way.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub display_name: Option<String>,
    pub expertise: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    pub role: Option<String>,
    pub search: Option<String>,
    /// Defaults to true; `?active=false` lists deactivated accounts.
    pub active: Option<bool>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<UserResponse>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Serialize)]
pub struct DeactivateResponse {
    pub success: bool,
    pub message: String,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(deactivate_user),
        )
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserListQuery>,
) -> Result<Json<UserListResponse>, ApiError> {
    let role = match query.role.as_deref() {
        Some(raw) => Some(
            UserRole::parse(raw)
                .ok_or_else(|| ApiError::Validation(format!("Unknown role: {raw}")))?,
        ),
        None => None,
    };
    let search = query.search;
    // Deactivation is this API's "delete"; deactivated accounts stay out of
    // the listing unless explicitly requested.
    let active = query.active.unwrap_or(true);
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, MAX_PER_PAGE);

    let (list, total) = with_conn(&state.conn, move |conn| {
        let mut query = users::table
            .filter(users::is_active.eq(active))
            .order(users::created_at.desc())
            .select(User::as_select())
            .into_boxed();
        let mut counter = users::table
            .filter(users::is_active.eq(active))
            .select(count_star())
            .into_boxed();

        if let Some(role) = role {
            query = query.filter(users::role.eq(role.as_str()));
            counter = counter.filter(users::role.eq(role.as_str()));
        }
        if let Some(search) = &search {
            let pattern = format!("%{search}%");
            query = query.filter(
                users::email
                    .ilike(pattern.clone())
                    .or(users::display_name.ilike(pattern.clone())),
            );
            counter = counter.filter(
                users::email
                    .ilike(pattern.clone())
                    .or(users::display_name.ilike(pattern)),
            );
        }

        let total: i64 = counter.first(conn)?;
        let slice = page_slice(page, per_page);
        let rows: Vec<User> = query.limit(slice.limit).offset(slice.offset).load(conn)?;
        Ok((
            rows.iter().map(UserResponse::from).collect::<Vec<_>>(),
            total,
        ))
    })
    .await?;

    Ok(Json(UserListResponse {
        users: list,
        total,
        page,
        per_page,
    }))
}

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<CreateUserResponse>, ApiError> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::Validation(
            "A valid email address is required".to_string(),
        ));
    }
    let display_name = req.display_name.trim().to_string();
    if display_name.is_empty() {
        return Err(ApiError::Validation("Display name is required".to_string()));
    }
    if let Some(password) = &req.password {
        if password.len() < 8 {
            return Err(ApiError::Validation(
                "Password must be at least 8 characters".to_string(),
            ));
        }
    }

    let generated = req.password.is_none();
    let password = req
        .password
        .clone()
        .unwrap_or_else(|| generate_temp_password(16));
    let role = req.role;
    let expertise = req.expertise.clone();

    let user = {
        let email = email.clone();
        let password = password.clone();
        let display_name = display_name.clone();
        with_conn(&state.conn, move |conn| {
            let taken: i64 = users::table
                .filter(users::email.eq(&email))
                .select(count_star())
                .first(conn)?;
            if taken > 0 {
                return Err(ApiError::Conflict(
                    "Email is already registered".to_string(),
                ));
            }

            let password_hash = hash_password(&password).map_err(ApiError::Internal)?;
            let user: User = diesel::insert_into(users::table)
                .values((
                    users::email.eq(&email),
                    users::password_hash.eq(&password_hash),
                    users::display_name.eq(&display_name),
                    users::role.eq(role.as_str()),
                    users::expertise.eq(&expertise),
                ))
                .returning(User::as_returning())
                .get_result(conn)?;

            info!("Created {} account {} ({})", role.as_str(), user.email, user.id);
            Ok(user)
        })
        .await?
    };

    // Credentials mail is best-effort; a down relay must not fail creation.
    // Only instructors get the mail; for other roles the generated password
    // comes back in the response for the admin to hand over.
    let (email_sent, temp_password) = if generated {
        if role == UserRole::Instructor {
            let sent = state
                .mailer
                .send_instructor_credentials(&user.email, &user.display_name, &password)
                .await;
            if !sent {
                warn!(
                    "Credentials mail for {} failed; returning password in response",
                    user.email
                );
            }
            (Some(sent), (!sent).then_some(password))
        } else {
            (None, Some(password))
        }
    } else {
        (None, None)
    };

    Ok(Json(CreateUserResponse {
        user: UserResponse::from(&user),
        email_sent,
        temp_password,
    }))
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = with_conn(&state.conn, move |conn| {
        Ok(users::table
            .find(user_id)
            .select(User::as_select())
            .first::<User>(conn)
            .optional()?)
    })
    .await?
    .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    Ok(Json(UserResponse::from(&user)))
}

pub async fn update_user(
    State(state): State<Arc<AppState>>,
    admin: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    if let Some(name) = &req.display_name {
        if name.trim().is_empty() {
            return Err(ApiError::Validation("Display name is required".to_string()));
        }
    }
    if req.is_active == Some(false) && admin.user_id == user_id {
        return Err(ApiError::Conflict(
            "You cannot deactivate your own account".to_string(),
        ));
    }

    let user = with_conn(&state.conn, move |conn| {
        let changes = UserChanges {
            display_name: req.display_name.map(|n| n.trim().to_string()),
            expertise: req.expertise,
            is_active: req.is_active,
        };

        let user: User = diesel::update(users::table.find(user_id))
            .set((changes, users::updated_at.eq(diesel::dsl::now)))
            .returning(User::as_returning())
            .get_result(conn)
            .optional()?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
        Ok(user)
    })
    .await?;

    Ok(Json(UserResponse::from(&user)))
}

/// Accounts are deactivated, never hard-deleted; authored courses and
/// enrollment history stay intact.
pub async fn deactivate_user(
    State(state): State<Arc<AppState>>,
    admin: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<DeactivateResponse>, ApiError> {
    if admin.user_id == user_id {
        return Err(ApiError::Conflict(
            "You cannot deactivate your own account".to_string(),
        ));
    }

    with_conn(&state.conn, move |conn| {
        let updated = diesel::update(users::table.find(user_id))
            .set((
                users::is_active.eq(false),
                users::updated_at.eq(diesel::dsl::now),
            ))
            .execute(conn)?;
        if updated == 0 {
            return Err(ApiError::NotFound("User not found".to_string()));
        }
        info!("Deactivated user {user_id}");
        Ok(())
    })
    .await?;

    Ok(Json(DeactivateResponse {
        success: true,
        message: "User deactivated".to_string(),
    }))
}

#[derive(AsChangeset)]
#[diesel(table_name = users)]
struct UserChanges {
    display_name: Option<String>,
    expertise: Option<String>,
    is_active: Option<bool>,
}
