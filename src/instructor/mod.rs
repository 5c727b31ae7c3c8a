use axum::extract::{Path, Query, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::courses::{
    apply_status_transition, author_display_name, course_stats, load_course_summaries,
    load_course_tree, normalize_tags, CourseChanges, CourseDetailResponse, CourseFilter,
    CourseResponse, CourseStats, StatusRequest,
};
use crate::shared::error::ApiError;
use crate::shared::models::schema::{courses, enrollments, users};
use crate::shared::models::{Course, CourseStatus};
use crate::shared::state::AppState;
use crate::shared::utils::with_conn;

#[derive(Debug, Deserialize)]
pub struct OwnCoursesQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OwnCourseRequest {
    pub title: String,
    pub description: String,
    pub tags: Option<Vec<String>>,
    pub video_url: Option<String>,
}

/// Update payload for an owned course. There is deliberately no author
/// field; instructors cannot hand their courses to someone else.
#[derive(Debug, Deserialize)]
pub struct OwnCourseUpdateRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub video_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ParticipantResponse {
    pub user_id: Uuid,
    pub display_name: String,
    pub email: String,
    pub progress: i32,
    pub status: String,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/courses", get(list_own_courses).post(create_own_course))
        .route("/courses/:id", get(get_own_course).put(update_own_course))
        .route("/courses/:id/status", put(set_own_course_status))
        .route("/courses/:id/participants", get(list_participants))
}

pub async fn list_own_courses(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<OwnCoursesQuery>,
) -> Result<Json<Vec<CourseResponse>>, ApiError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            CourseStatus::parse(raw)
                .ok_or_else(|| ApiError::Validation(format!("Unknown course status: {raw}")))?,
        ),
        None => None,
    };

    let filter = CourseFilter {
        status,
        author_id: Some(user.user_id),
        ..CourseFilter::default()
    };
    let list = with_conn(&state.conn, move |conn| {
        load_course_summaries(conn, filter, None)
    })
    .await?;
    Ok(Json(list))
}

/// New courses always start as drafts, owned by the caller.
pub async fn create_own_course(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(req): Json<OwnCourseRequest>,
) -> Result<Json<CourseResponse>, ApiError> {
    let title = req.title.trim().to_string();
    if title.is_empty() {
        return Err(ApiError::Validation("Course title is required".to_string()));
    }
    let description = req.description.trim().to_string();
    let tags = normalize_tags(req.tags.unwrap_or_default());
    let video_url = req.video_url;
    let author_id = user.user_id;

    let response = with_conn(&state.conn, move |conn| {
        let course: Course = diesel::insert_into(courses::table)
            .values((
                courses::title.eq(&title),
                courses::description.eq(&description),
                courses::tags.eq(&tags),
                courses::status.eq(CourseStatus::Draft.as_str()),
                courses::author_id.eq(author_id),
                courses::video_url.eq(&video_url),
            ))
            .returning(Course::as_returning())
            .get_result(conn)?;

        info!("Instructor {author_id} created course {} ({})", course.title, course.id);
        let author_name = author_display_name(conn, author_id)?;
        Ok(CourseResponse::from_parts(
            course,
            author_name,
            CourseStats::default(),
        ))
    })
    .await?;

    Ok(Json(response))
}

/// Course detail scoped to the caller's own courses. A course someone else
/// authored looks like it does not exist.
pub async fn get_own_course(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(course_id): Path<Uuid>,
) -> Result<Json<CourseDetailResponse>, ApiError> {
    let author_id = user.user_id;
    let detail = with_conn(&state.conn, move |conn| {
        assert_own_course(conn, course_id, author_id)?;
        load_course_tree(conn, course_id, true)
    })
    .await?;
    Ok(Json(detail))
}

pub async fn update_own_course(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(course_id): Path<Uuid>,
    Json(req): Json<OwnCourseUpdateRequest>,
) -> Result<Json<CourseResponse>, ApiError> {
    if let Some(title) = &req.title {
        if title.trim().is_empty() {
            return Err(ApiError::Validation("Course title is required".to_string()));
        }
    }

    let author_id = user.user_id;
    let response = with_conn(&state.conn, move |conn| {
        assert_own_course(conn, course_id, author_id)?;

        let changes = CourseChanges {
            title: req.title.map(|t| t.trim().to_string()),
            description: req.description.map(|d| d.trim().to_string()),
            author_id: None,
            tags: req.tags.map(normalize_tags),
            video_url: req.video_url,
        };

        let course: Course = diesel::update(courses::table.find(course_id))
            .set((changes, courses::updated_at.eq(diesel::dsl::now)))
            .returning(Course::as_returning())
            .get_result(conn)?;

        let author_name = author_display_name(conn, course.author_id)?;
        let stats = course_stats(conn, course.id)?;
        Ok(CourseResponse::from_parts(course, author_name, stats))
    })
    .await?;

    Ok(Json(response))
}

pub async fn set_own_course_status(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(course_id): Path<Uuid>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<CourseResponse>, ApiError> {
    let author_id = user.user_id;
    let next = req.status;
    let response = with_conn(&state.conn, move |conn| {
        assert_own_course(conn, course_id, author_id)?;
        let course = apply_status_transition(conn, course_id, next)?;
        let author_name = author_display_name(conn, course.author_id)?;
        let stats = course_stats(conn, course.id)?;
        Ok(CourseResponse::from_parts(course, author_name, stats))
    })
    .await?;

    Ok(Json(response))
}

pub async fn list_participants(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(course_id): Path<Uuid>,
) -> Result<Json<Vec<ParticipantResponse>>, ApiError> {
    let author_id = user.user_id;
    let participants = with_conn(&state.conn, move |conn| {
        assert_own_course(conn, course_id, author_id)?;

        let rows: Vec<(Uuid, String, String, i32, String, DateTime<Utc>, DateTime<Utc>)> =
            enrollments::table
                .inner_join(users::table)
                .filter(enrollments::course_id.eq(course_id))
                .order(enrollments::created_at.asc())
                .select((
                    users::id,
                    users::display_name,
                    users::email,
                    enrollments::progress,
                    enrollments::status,
                    enrollments::created_at,
                    enrollments::updated_at,
                ))
                .load(conn)?;

        Ok(rows
            .into_iter()
            .map(
                |(user_id, display_name, email, progress, status, enrolled_at, updated_at)| {
                    ParticipantResponse {
                        user_id,
                        display_name,
                        email,
                        progress,
                        status,
                        enrolled_at,
                        updated_at,
                    }
                },
            )
            .collect::<Vec<_>>())
    })
    .await?;

    Ok(Json(participants))
}

fn assert_own_course(
    conn: &mut PgConnection,
    course_id: Uuid,
    author_id: Uuid,
) -> Result<(), ApiError> {
    let owned = courses::table
        .filter(courses::id.eq(course_id))
        .filter(courses::author_id.eq(author_id))
        .select(courses::id)
        .first::<Uuid>(conn)
        .optional()?;
    if owned.is_none() {
        return Err(ApiError::NotFound("Course not found".to_string()));
    }
    Ok(())
}
