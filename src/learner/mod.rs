use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::courses::{
    enrollment_counts, lesson_rollups, load_course_summaries, load_course_tree,
    CourseDetailResponse, CourseFilter, CourseResponse, CourseStats,
};
use crate::shared::error::ApiError;
use crate::shared::models::schema::{courses, enrollments, users};
use crate::shared::models::{Course, CourseStatus, Enrollment, EnrollmentStatus};
use crate::shared::state::AppState;
use crate::shared::utils::with_conn;

#[derive(Debug, Deserialize)]
pub struct CatalogQuery {
    pub search: Option<String>,
    pub tag: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub progress: i32,
}

#[derive(Debug, Serialize)]
pub struct EnrollmentResponse {
    pub id: Uuid,
    pub course_id: Uuid,
    pub progress: i32,
    pub status: String,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Enrollment> for EnrollmentResponse {
    fn from(enrollment: &Enrollment) -> Self {
        Self {
            id: enrollment.id,
            course_id: enrollment.course_id,
            progress: enrollment.progress,
            status: enrollment.status.clone(),
            enrolled_at: enrollment.created_at,
            updated_at: enrollment.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EnrolledCourseResponse {
    #[serde(flatten)]
    pub enrollment: EnrollmentResponse,
    pub course: CourseResponse,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/courses", get(catalog))
        .route("/courses/:id", get(course_detail))
        .route("/courses/:id/enroll", post(enroll))
        .route("/enrollments", get(my_enrollments))
        .route("/enrollments/:id/progress", put(update_progress))
}

/// Published courses only.
pub async fn catalog(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CatalogQuery>,
) -> Result<Json<Vec<CourseResponse>>, ApiError> {
    let filter = CourseFilter {
        status: Some(CourseStatus::Published),
        search: query.search,
        tag: query.tag,
        author_id: None,
    };
    let list = with_conn(&state.conn, move |conn| {
        load_course_summaries(conn, filter, None)
    })
    .await?;
    Ok(Json(list))
}

/// Course detail for learners. Counts the view, and never exposes quiz
/// answer keys. Unpublished courses are not visible here.
pub async fn course_detail(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<CourseDetailResponse>, ApiError> {
    let detail = with_conn(&state.conn, move |conn| {
        assert_published(conn, course_id)?;
        diesel::update(courses::table.find(course_id))
            .set(courses::views.eq(courses::views + 1))
            .execute(conn)?;
        load_course_tree(conn, course_id, false)
    })
    .await?;
    Ok(Json(detail))
}

/// Enrolling twice is a no-op that returns the existing enrollment.
pub async fn enroll(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(course_id): Path<Uuid>,
) -> Result<Json<EnrollmentResponse>, ApiError> {
    let user_id = user.user_id;
    let enrollment = with_conn(&state.conn, move |conn| {
        assert_published(conn, course_id)?;

        diesel::insert_into(enrollments::table)
            .values((
                enrollments::course_id.eq(course_id),
                enrollments::user_id.eq(user_id),
                enrollments::progress.eq(0),
                enrollments::status.eq(EnrollmentStatus::YetToStart.as_str()),
            ))
            .on_conflict((enrollments::course_id, enrollments::user_id))
            .do_nothing()
            .execute(conn)?;

        let enrollment: Enrollment = enrollments::table
            .filter(enrollments::course_id.eq(course_id))
            .filter(enrollments::user_id.eq(user_id))
            .select(Enrollment::as_select())
            .first(conn)?;

        info!("User {user_id} enrolled in course {course_id}");
        Ok(enrollment)
    })
    .await?;

    Ok(Json(EnrollmentResponse::from(&enrollment)))
}

pub async fn my_enrollments(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<EnrolledCourseResponse>>, ApiError> {
    let user_id = user.user_id;
    let list = with_conn(&state.conn, move |conn| {
        let rows: Vec<(Enrollment, Course, String)> = enrollments::table
            .inner_join(courses::table.inner_join(users::table))
            .filter(enrollments::user_id.eq(user_id))
            .order(enrollments::created_at.desc())
            .select((
                Enrollment::as_select(),
                Course::as_select(),
                users::display_name,
            ))
            .load(conn)?;

        let ids: Vec<Uuid> = rows.iter().map(|(_, course, _)| course.id).collect();
        let enrolled = enrollment_counts(conn, &ids)?;
        let rollups = lesson_rollups(conn, &ids)?;

        Ok(rows
            .into_iter()
            .map(|(enrollment, course, author_name)| {
                let (lesson_count, duration_minutes) =
                    rollups.get(&course.id).copied().unwrap_or((0, 0));
                let stats = CourseStats {
                    enrolled_count: enrolled.get(&course.id).copied().unwrap_or(0),
                    lesson_count,
                    duration_minutes,
                };
                EnrolledCourseResponse {
                    enrollment: EnrollmentResponse::from(&enrollment),
                    course: CourseResponse::from_parts(course, author_name, stats),
                }
            })
            .collect())
    })
    .await?;

    Ok(Json(list))
}

/// Set progress and derive the enrollment status from it. Progress outside
/// 0..=100 is rejected before touching the database. Another learner's
/// enrollment id is a 404.
pub async fn update_progress(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(enrollment_id): Path<Uuid>,
    Json(req): Json<ProgressRequest>,
) -> Result<Json<EnrollmentResponse>, ApiError> {
    if !(0..=100).contains(&req.progress) {
        return Err(ApiError::Validation(
            "Progress must be between 0 and 100".to_string(),
        ));
    }

    let user_id = user.user_id;
    let progress = req.progress;
    let enrollment = with_conn(&state.conn, move |conn| {
        let status = EnrollmentStatus::from_progress(progress);
        let enrollment: Enrollment = diesel::update(
            enrollments::table
                .filter(enrollments::id.eq(enrollment_id))
                .filter(enrollments::user_id.eq(user_id)),
        )
        .set((
            enrollments::progress.eq(progress),
            enrollments::status.eq(status.as_str()),
            enrollments::updated_at.eq(diesel::dsl::now),
        ))
        .returning(Enrollment::as_returning())
        .get_result(conn)
        .optional()?
        .ok_or_else(|| ApiError::NotFound("Enrollment not found".to_string()))?;
        Ok(enrollment)
    })
    .await?;

    Ok(Json(EnrollmentResponse::from(&enrollment)))
}

fn assert_published(conn: &mut PgConnection, course_id: Uuid) -> Result<(), ApiError> {
    let status: Option<String> = courses::table
        .find(course_id)
        .select(courses::status)
        .first(conn)
        .optional()?;
    match status {
        Some(s) if CourseStatus::parse(&s) == Some(CourseStatus::Published) => Ok(()),
        _ => Err(ApiError::NotFound("Course not found".to_string())),
    }
}
