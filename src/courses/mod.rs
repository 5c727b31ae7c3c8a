use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use diesel::dsl::{count_star, max, sum};
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::error::ApiError;
use crate::shared::models::schema::{course_modules, courses, enrollments, lessons, questions, users};
use crate::shared::models::{Course, CourseModule, CourseStatus, Lesson, LessonType, Question, UserRole};
use crate::shared::state::AppState;
use crate::shared::utils::with_conn;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateCourseRequest {
    pub title: String,
    pub description: String,
    pub author_id: Uuid,
    pub tags: Option<Vec<String>>,
    pub video_url: Option<String>,
    /// Initial status; new courses start as drafts when omitted.
    pub status: Option<CourseStatus>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCourseRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub author_id: Option<Uuid>,
    pub tags: Option<Vec<String>>,
    pub video_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: CourseStatus,
}

#[derive(Debug, Deserialize)]
pub struct CourseListQuery {
    pub status: Option<String>,
    pub search: Option<String>,
    pub tag: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ModuleRequest {
    pub title: String,
    pub position: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct LessonRequest {
    pub title: String,
    pub lesson_type: LessonType,
    pub duration_minutes: Option<i32>,
    pub video_url: Option<String>,
    pub content: Option<String>,
    pub position: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct QuestionRequest {
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_index: i32,
    pub position: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct CourseResponse {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub views: i64,
    pub status: String,
    pub author_id: Uuid,
    pub author_name: String,
    pub video_url: Option<String>,
    pub enrolled_count: i64,
    pub lesson_count: i64,
    pub duration_minutes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CourseListResponse {
    pub courses: Vec<CourseResponse>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Serialize)]
pub struct CourseDetailResponse {
    #[serde(flatten)]
    pub course: CourseResponse,
    pub modules: Vec<ModuleResponse>,
}

#[derive(Debug, Serialize)]
pub struct ModuleResponse {
    pub id: Uuid,
    pub title: String,
    pub position: i32,
    pub lessons: Vec<LessonResponse>,
}

#[derive(Debug, Serialize)]
pub struct LessonResponse {
    pub id: Uuid,
    pub title: String,
    pub lesson_type: String,
    pub duration_minutes: i32,
    pub video_url: Option<String>,
    pub content: Option<String>,
    pub position: i32,
    pub questions: Vec<QuestionResponse>,
}

#[derive(Debug, Serialize)]
pub struct QuestionResponse {
    pub id: Uuid,
    pub prompt: String,
    pub options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_index: Option<i32>,
    pub position: i32,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
}

impl CourseResponse {
    pub(crate) fn from_parts(course: Course, author_name: String, stats: CourseStats) -> Self {
        Self {
            id: course.id,
            title: course.title,
            description: course.description,
            tags: course.tags,
            views: course.views,
            status: course.status,
            author_id: course.author_id,
            author_name,
            video_url: course.video_url,
            enrolled_count: stats.enrolled_count,
            lesson_count: stats.lesson_count,
            duration_minutes: stats.duration_minutes,
            created_at: course.created_at,
            updated_at: course.updated_at,
        }
    }
}

/// Derived per-course numbers. Never stored; computed from enrollments and
/// lessons at query time.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct CourseStats {
    pub enrolled_count: i64,
    pub lesson_count: i64,
    pub duration_minutes: i64,
}

// ============================================================================
// Routes (mounted under /api/admin by the router)
// ============================================================================

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/courses", get(list_courses).post(create_course))
        .route(
            "/courses/:id",
            get(get_course).put(update_course).delete(delete_course),
        )
        .route("/courses/:id/status", put(set_course_status))
        .route("/courses/:id/modules", post(add_module))
        .route("/modules/:id", put(update_module).delete(delete_module))
        .route("/modules/:id/lessons", post(add_lesson))
        .route("/lessons/:id", put(update_lesson).delete(delete_lesson))
        .route("/lessons/:id/questions", post(add_question))
        .route("/questions/:id", put(update_question).delete(delete_question))
}

// ============================================================================
// Course handlers
// ============================================================================

pub async fn list_courses(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CourseListQuery>,
) -> Result<Json<CourseListResponse>, ApiError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(CourseStatus::parse(raw).ok_or_else(|| {
            ApiError::Validation(format!("Unknown course status: {raw}"))
        })?),
        None => None,
    };

    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, MAX_PER_PAGE);
    let filter = CourseFilter {
        status,
        search: query.search,
        tag: query.tag,
        author_id: None,
    };

    let (courses, total) = with_conn(&state.conn, move |conn| {
        let total = count_courses(conn, &filter)?;
        let courses = load_course_summaries(conn, filter, Some(page_slice(page, per_page)))?;
        Ok((courses, total))
    })
    .await?;

    Ok(Json(CourseListResponse {
        courses,
        total,
        page,
        per_page,
    }))
}

pub async fn create_course(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateCourseRequest>,
) -> Result<Json<CourseResponse>, ApiError> {
    let title = req.title.trim().to_string();
    if title.is_empty() {
        return Err(ApiError::Validation("Course title is required".to_string()));
    }
    let tags = normalize_tags(req.tags.unwrap_or_default());
    let description = req.description.trim().to_string();
    let author_id = req.author_id;
    let video_url = req.video_url;
    let status = req.status.unwrap_or(CourseStatus::Draft);

    let response = with_conn(&state.conn, move |conn| {
        let author_name = active_instructor_name(conn, author_id)?;

        let course: Course = diesel::insert_into(courses::table)
            .values((
                courses::title.eq(&title),
                courses::description.eq(&description),
                courses::tags.eq(&tags),
                courses::status.eq(status.as_str()),
                courses::author_id.eq(author_id),
                courses::video_url.eq(&video_url),
            ))
            .returning(Course::as_returning())
            .get_result(conn)?;

        info!("Created course {} ({})", course.title, course.id);
        Ok(CourseResponse::from_parts(
            course,
            author_name,
            CourseStats::default(),
        ))
    })
    .await?;

    Ok(Json(response))
}

pub async fn get_course(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<CourseDetailResponse>, ApiError> {
    let detail = with_conn(&state.conn, move |conn| {
        load_course_tree(conn, course_id, true)
    })
    .await?;
    Ok(Json(detail))
}

pub async fn update_course(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<Uuid>,
    Json(req): Json<UpdateCourseRequest>,
) -> Result<Json<CourseResponse>, ApiError> {
    if let Some(title) = &req.title {
        if title.trim().is_empty() {
            return Err(ApiError::Validation("Course title is required".to_string()));
        }
    }

    let response = with_conn(&state.conn, move |conn| {
        if let Some(author_id) = req.author_id {
            active_instructor_name(conn, author_id)?;
        }

        let changes = CourseChanges {
            title: req.title.map(|t| t.trim().to_string()),
            description: req.description.map(|d| d.trim().to_string()),
            author_id: req.author_id,
            tags: req.tags.map(normalize_tags),
            video_url: req.video_url,
        };

        let course: Course = diesel::update(courses::table.find(course_id))
            .set((changes, courses::updated_at.eq(diesel::dsl::now)))
            .returning(Course::as_returning())
            .get_result(conn)
            .optional()?
            .ok_or_else(|| ApiError::NotFound("Course not found".to_string()))?;

        let author_name = author_display_name(conn, course.author_id)?;
        let stats = course_stats(conn, course.id)?;
        Ok(CourseResponse::from_parts(course, author_name, stats))
    })
    .await?;

    Ok(Json(response))
}

/// Hard delete. Modules, lessons, questions and enrollments go with the
/// course via foreign key cascades.
pub async fn delete_course(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, ApiError> {
    with_conn(&state.conn, move |conn| {
        let deleted = diesel::delete(courses::table.find(course_id)).execute(conn)?;
        if deleted == 0 {
            return Err(ApiError::NotFound("Course not found".to_string()));
        }
        info!("Deleted course {course_id}");
        Ok(())
    })
    .await?;
    Ok(Json(DeleteResponse { success: true }))
}

pub async fn set_course_status(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<Uuid>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<CourseResponse>, ApiError> {
    let next = req.status;

    let response = with_conn(&state.conn, move |conn| {
        let course = apply_status_transition(conn, course_id, next)?;
        let author_name = author_display_name(conn, course.author_id)?;
        let stats = course_stats(conn, course.id)?;
        Ok(CourseResponse::from_parts(course, author_name, stats))
    })
    .await?;

    Ok(Json(response))
}

/// Validated lifecycle move. An unknown course is a 404, a disallowed
/// transition a 409.
pub(crate) fn apply_status_transition(
    conn: &mut PgConnection,
    course_id: Uuid,
    next: CourseStatus,
) -> Result<Course, ApiError> {
    let current_raw: String = courses::table
        .find(course_id)
        .select(courses::status)
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::NotFound("Course not found".to_string()))?;

    let current = CourseStatus::parse(&current_raw).ok_or_else(|| {
        ApiError::Internal(anyhow::anyhow!("unknown status stored: {current_raw}"))
    })?;

    if !current.can_transition_to(next) {
        return Err(ApiError::Conflict(format!(
            "Cannot transition course from {} to {}",
            current.as_str(),
            next.as_str()
        )));
    }

    let course: Course = diesel::update(courses::table.find(course_id))
        .set((
            courses::status.eq(next.as_str()),
            courses::updated_at.eq(diesel::dsl::now),
        ))
        .returning(Course::as_returning())
        .get_result(conn)?;

    info!("Course {} moved to {}", course.id, next.as_str());
    Ok(course)
}

// ============================================================================
// Module handlers
// ============================================================================

pub async fn add_module(
    State(state): State<Arc<AppState>>,
    Path(course_id): Path<Uuid>,
    Json(req): Json<ModuleRequest>,
) -> Result<Json<ModuleResponse>, ApiError> {
    let title = req.title.trim().to_string();
    if title.is_empty() {
        return Err(ApiError::Validation("Module title is required".to_string()));
    }

    let module = with_conn(&state.conn, move |conn| {
        let exists: i64 = courses::table
            .filter(courses::id.eq(course_id))
            .select(count_star())
            .first(conn)?;
        if exists == 0 {
            return Err(ApiError::NotFound("Course not found".to_string()));
        }

        let position = match req.position {
            Some(p) => p,
            None => next_position(
                course_modules::table
                    .filter(course_modules::course_id.eq(course_id))
                    .select(max(course_modules::position))
                    .first::<Option<i32>>(conn)?,
            ),
        };

        let module: CourseModule = diesel::insert_into(course_modules::table)
            .values((
                course_modules::course_id.eq(course_id),
                course_modules::title.eq(&title),
                course_modules::position.eq(position),
            ))
            .returning(CourseModule::as_returning())
            .get_result(conn)?;

        touch_course(conn, course_id)?;
        Ok(module)
    })
    .await?;

    Ok(Json(ModuleResponse {
        id: module.id,
        title: module.title,
        position: module.position,
        lessons: Vec::new(),
    }))
}

pub async fn update_module(
    State(state): State<Arc<AppState>>,
    Path(module_id): Path<Uuid>,
    Json(req): Json<ModuleRequest>,
) -> Result<Json<ModuleResponse>, ApiError> {
    let title = req.title.trim().to_string();
    if title.is_empty() {
        return Err(ApiError::Validation("Module title is required".to_string()));
    }

    let module = with_conn(&state.conn, move |conn| {
        let current: CourseModule = course_modules::table
            .find(module_id)
            .select(CourseModule::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| ApiError::NotFound("Module not found".to_string()))?;

        let module: CourseModule = diesel::update(course_modules::table.find(module_id))
            .set((
                course_modules::title.eq(&title),
                course_modules::position.eq(req.position.unwrap_or(current.position)),
            ))
            .returning(CourseModule::as_returning())
            .get_result(conn)?;

        touch_course(conn, module.course_id)?;
        Ok(module)
    })
    .await?;

    Ok(Json(ModuleResponse {
        id: module.id,
        title: module.title,
        position: module.position,
        lessons: Vec::new(),
    }))
}

pub async fn delete_module(
    State(state): State<Arc<AppState>>,
    Path(module_id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, ApiError> {
    with_conn(&state.conn, move |conn| {
        let course_id: Uuid = course_modules::table
            .find(module_id)
            .select(course_modules::course_id)
            .first(conn)
            .optional()?
            .ok_or_else(|| ApiError::NotFound("Module not found".to_string()))?;

        diesel::delete(course_modules::table.find(module_id)).execute(conn)?;
        touch_course(conn, course_id)?;
        Ok(())
    })
    .await?;
    Ok(Json(DeleteResponse { success: true }))
}

// ============================================================================
// Lesson handlers
// ============================================================================

pub async fn add_lesson(
    State(state): State<Arc<AppState>>,
    Path(module_id): Path<Uuid>,
    Json(req): Json<LessonRequest>,
) -> Result<Json<LessonResponse>, ApiError> {
    validate_lesson(&req)?;
    let title = req.title.trim().to_string();

    let lesson = with_conn(&state.conn, move |conn| {
        let course_id: Uuid = course_modules::table
            .find(module_id)
            .select(course_modules::course_id)
            .first(conn)
            .optional()?
            .ok_or_else(|| ApiError::NotFound("Module not found".to_string()))?;

        let position = match req.position {
            Some(p) => p,
            None => next_position(
                lessons::table
                    .filter(lessons::module_id.eq(module_id))
                    .select(max(lessons::position))
                    .first::<Option<i32>>(conn)?,
            ),
        };

        let lesson: Lesson = diesel::insert_into(lessons::table)
            .values((
                lessons::module_id.eq(module_id),
                lessons::title.eq(&title),
                lessons::lesson_type.eq(req.lesson_type.as_str()),
                lessons::duration_minutes.eq(req.duration_minutes.unwrap_or(0)),
                lessons::video_url.eq(&req.video_url),
                lessons::content.eq(&req.content),
                lessons::position.eq(position),
            ))
            .returning(Lesson::as_returning())
            .get_result(conn)?;

        touch_course(conn, course_id)?;
        Ok(lesson)
    })
    .await?;

    Ok(Json(lesson_response(lesson, Vec::new())))
}

pub async fn update_lesson(
    State(state): State<Arc<AppState>>,
    Path(lesson_id): Path<Uuid>,
    Json(req): Json<LessonRequest>,
) -> Result<Json<LessonResponse>, ApiError> {
    validate_lesson(&req)?;
    let title = req.title.trim().to_string();

    let lesson = with_conn(&state.conn, move |conn| {
        let current: Lesson = lessons::table
            .find(lesson_id)
            .select(Lesson::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| ApiError::NotFound("Lesson not found".to_string()))?;

        let lesson: Lesson = diesel::update(lessons::table.find(lesson_id))
            .set((
                lessons::title.eq(&title),
                lessons::lesson_type.eq(req.lesson_type.as_str()),
                lessons::duration_minutes
                    .eq(req.duration_minutes.unwrap_or(current.duration_minutes)),
                lessons::video_url.eq(&req.video_url),
                lessons::content.eq(&req.content),
                lessons::position.eq(req.position.unwrap_or(current.position)),
            ))
            .returning(Lesson::as_returning())
            .get_result(conn)?;

        let course_id: Uuid = course_modules::table
            .find(lesson.module_id)
            .select(course_modules::course_id)
            .first(conn)?;
        touch_course(conn, course_id)?;
        Ok(lesson)
    })
    .await?;

    let questions = load_lesson_questions(&state, lesson.id).await?;
    Ok(Json(lesson_response(lesson, questions)))
}

pub async fn delete_lesson(
    State(state): State<Arc<AppState>>,
    Path(lesson_id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, ApiError> {
    with_conn(&state.conn, move |conn| {
        let module_id: Uuid = lessons::table
            .find(lesson_id)
            .select(lessons::module_id)
            .first(conn)
            .optional()?
            .ok_or_else(|| ApiError::NotFound("Lesson not found".to_string()))?;

        diesel::delete(lessons::table.find(lesson_id)).execute(conn)?;

        let course_id: Uuid = course_modules::table
            .find(module_id)
            .select(course_modules::course_id)
            .first(conn)?;
        touch_course(conn, course_id)?;
        Ok(())
    })
    .await?;
    Ok(Json(DeleteResponse { success: true }))
}

// ============================================================================
// Question handlers
// ============================================================================

pub async fn add_question(
    State(state): State<Arc<AppState>>,
    Path(lesson_id): Path<Uuid>,
    Json(req): Json<QuestionRequest>,
) -> Result<Json<QuestionResponse>, ApiError> {
    validate_question(&req)?;
    let prompt = req.prompt.trim().to_string();

    let question = with_conn(&state.conn, move |conn| {
        let lesson_type: String = lessons::table
            .find(lesson_id)
            .select(lessons::lesson_type)
            .first(conn)
            .optional()?
            .ok_or_else(|| ApiError::NotFound("Lesson not found".to_string()))?;
        if LessonType::parse(&lesson_type) != Some(LessonType::Quiz) {
            return Err(ApiError::Validation(
                "Questions can only be added to quiz lessons".to_string(),
            ));
        }

        let position = match req.position {
            Some(p) => p,
            None => next_position(
                questions::table
                    .filter(questions::lesson_id.eq(lesson_id))
                    .select(max(questions::position))
                    .first::<Option<i32>>(conn)?,
            ),
        };

        let question: Question = diesel::insert_into(questions::table)
            .values((
                questions::lesson_id.eq(lesson_id),
                questions::prompt.eq(&prompt),
                questions::options.eq(&req.options),
                questions::correct_index.eq(req.correct_index),
                questions::position.eq(position),
            ))
            .returning(Question::as_returning())
            .get_result(conn)?;
        Ok(question)
    })
    .await?;

    Ok(Json(question_response(question, true)))
}

pub async fn update_question(
    State(state): State<Arc<AppState>>,
    Path(question_id): Path<Uuid>,
    Json(req): Json<QuestionRequest>,
) -> Result<Json<QuestionResponse>, ApiError> {
    validate_question(&req)?;
    let prompt = req.prompt.trim().to_string();

    let question = with_conn(&state.conn, move |conn| {
        let current: Question = questions::table
            .find(question_id)
            .select(Question::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| ApiError::NotFound("Question not found".to_string()))?;

        let question: Question = diesel::update(questions::table.find(question_id))
            .set((
                questions::prompt.eq(&prompt),
                questions::options.eq(&req.options),
                questions::correct_index.eq(req.correct_index),
                questions::position.eq(req.position.unwrap_or(current.position)),
            ))
            .returning(Question::as_returning())
            .get_result(conn)?;
        Ok(question)
    })
    .await?;

    Ok(Json(question_response(question, true)))
}

pub async fn delete_question(
    State(state): State<Arc<AppState>>,
    Path(question_id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, ApiError> {
    with_conn(&state.conn, move |conn| {
        let deleted = diesel::delete(questions::table.find(question_id)).execute(conn)?;
        if deleted == 0 {
            return Err(ApiError::NotFound("Question not found".to_string()));
        }
        Ok(())
    })
    .await?;
    Ok(Json(DeleteResponse { success: true }))
}

// ============================================================================
// Shared query helpers (also used by the instructor and learner modules)
// ============================================================================

#[derive(AsChangeset)]
#[diesel(table_name = courses)]
pub(crate) struct CourseChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub author_id: Option<Uuid>,
    pub tags: Option<Vec<String>>,
    pub video_url: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub(crate) struct CourseFilter {
    pub status: Option<CourseStatus>,
    pub search: Option<String>,
    pub tag: Option<String>,
    pub author_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PageSlice {
    pub limit: i64,
    pub offset: i64,
}

/// Page size ceiling for the admin list endpoints.
pub(crate) const MAX_PER_PAGE: u32 = 100;

pub(crate) fn page_slice(page: u32, per_page: u32) -> PageSlice {
    let limit = i64::from(per_page);
    PageSlice {
        limit,
        // Saturate so an absurd page number yields an empty page, never a
        // negative OFFSET.
        offset: i64::from(page.saturating_sub(1)).saturating_mul(limit),
    }
}

pub(crate) fn load_course_summaries(
    conn: &mut PgConnection,
    filter: CourseFilter,
    page: Option<PageSlice>,
) -> Result<Vec<CourseResponse>, ApiError> {
    let mut query = courses::table
        .inner_join(users::table)
        .select((Course::as_select(), users::display_name))
        .order(courses::created_at.desc())
        .into_boxed();

    if let Some(status) = filter.status {
        query = query.filter(courses::status.eq(status.as_str()));
    }
    if let Some(search) = &filter.search {
        query = query.filter(courses::title.ilike(format!("%{search}%")));
    }
    if let Some(tag) = &filter.tag {
        query = query.filter(courses::tags.contains(vec![tag.clone()]));
    }
    if let Some(author_id) = filter.author_id {
        query = query.filter(courses::author_id.eq(author_id));
    }
    if let Some(slice) = page {
        query = query.limit(slice.limit).offset(slice.offset);
    }

    let rows: Vec<(Course, String)> = query.load(conn)?;
    let ids: Vec<Uuid> = rows.iter().map(|(course, _)| course.id).collect();
    let enrolled = enrollment_counts(conn, &ids)?;
    let rollups = lesson_rollups(conn, &ids)?;

    Ok(rows
        .into_iter()
        .map(|(course, author_name)| {
            let (lesson_count, duration_minutes) =
                rollups.get(&course.id).copied().unwrap_or((0, 0));
            let stats = CourseStats {
                enrolled_count: enrolled.get(&course.id).copied().unwrap_or(0),
                lesson_count,
                duration_minutes,
            };
            CourseResponse::from_parts(course, author_name, stats)
        })
        .collect())
}

pub(crate) fn count_courses(conn: &mut PgConnection, filter: &CourseFilter) -> Result<i64, ApiError> {
    let mut query = courses::table.select(count_star()).into_boxed();

    if let Some(status) = filter.status {
        query = query.filter(courses::status.eq(status.as_str()));
    }
    if let Some(search) = &filter.search {
        query = query.filter(courses::title.ilike(format!("%{search}%")));
    }
    if let Some(tag) = &filter.tag {
        query = query.filter(courses::tags.contains(vec![tag.clone()]));
    }
    if let Some(author_id) = filter.author_id {
        query = query.filter(courses::author_id.eq(author_id));
    }

    Ok(query.first(conn)?)
}

/// Load a course with its modules, lessons and questions in three queries
/// and assemble the tree in memory. `include_answers` controls whether
/// question answer keys are exposed; the learner surface hides them.
pub(crate) fn load_course_tree(
    conn: &mut PgConnection,
    course_id: Uuid,
    include_answers: bool,
) -> Result<CourseDetailResponse, ApiError> {
    let (course, author_name): (Course, String) = courses::table
        .inner_join(users::table)
        .filter(courses::id.eq(course_id))
        .select((Course::as_select(), users::display_name))
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::NotFound("Course not found".to_string()))?;

    let modules: Vec<CourseModule> = course_modules::table
        .filter(course_modules::course_id.eq(course_id))
        .order(course_modules::position.asc())
        .select(CourseModule::as_select())
        .load(conn)?;

    let module_ids: Vec<Uuid> = modules.iter().map(|m| m.id).collect();
    let lesson_rows: Vec<Lesson> = lessons::table
        .filter(lessons::module_id.eq_any(&module_ids))
        .order(lessons::position.asc())
        .select(Lesson::as_select())
        .load(conn)?;

    let lesson_ids: Vec<Uuid> = lesson_rows.iter().map(|l| l.id).collect();
    let lesson_count = lesson_rows.len() as i64;
    let duration_minutes: i64 = lesson_rows.iter().map(|l| l.duration_minutes as i64).sum();
    let question_rows: Vec<Question> = questions::table
        .filter(questions::lesson_id.eq_any(&lesson_ids))
        .order(questions::position.asc())
        .select(Question::as_select())
        .load(conn)?;

    let mut questions_by_lesson: HashMap<Uuid, Vec<Question>> = HashMap::new();
    for question in question_rows {
        questions_by_lesson
            .entry(question.lesson_id)
            .or_default()
            .push(question);
    }

    let mut lessons_by_module: HashMap<Uuid, Vec<Lesson>> = HashMap::new();
    for lesson in lesson_rows {
        lessons_by_module
            .entry(lesson.module_id)
            .or_default()
            .push(lesson);
    }

    let module_responses = modules
        .into_iter()
        .map(|module| {
            let module_lessons = lessons_by_module
                .remove(&module.id)
                .unwrap_or_default()
                .into_iter()
                .map(|lesson| {
                    let lesson_questions = questions_by_lesson
                        .remove(&lesson.id)
                        .unwrap_or_default()
                        .into_iter()
                        .map(|q| question_response(q, include_answers))
                        .collect();
                    lesson_response(lesson, lesson_questions)
                })
                .collect();
            ModuleResponse {
                id: module.id,
                title: module.title,
                position: module.position,
                lessons: module_lessons,
            }
        })
        .collect();

    let stats = CourseStats {
        enrolled_count: enrolled_count(conn, course_id)?,
        lesson_count,
        duration_minutes,
    };
    Ok(CourseDetailResponse {
        course: CourseResponse::from_parts(course, author_name, stats),
        modules: module_responses,
    })
}

fn enrolled_count(conn: &mut PgConnection, course_id: Uuid) -> Result<i64, ApiError> {
    Ok(enrollments::table
        .filter(enrollments::course_id.eq(course_id))
        .select(count_star())
        .first(conn)?)
}

pub(crate) fn enrollment_counts(
    conn: &mut PgConnection,
    course_ids: &[Uuid],
) -> Result<HashMap<Uuid, i64>, ApiError> {
    Ok(enrollments::table
        .filter(enrollments::course_id.eq_any(course_ids))
        .group_by(enrollments::course_id)
        .select((enrollments::course_id, count_star()))
        .load::<(Uuid, i64)>(conn)?
        .into_iter()
        .collect())
}

/// Per-course `(lesson_count, total_duration_minutes)` in one grouped query.
pub(crate) fn lesson_rollups(
    conn: &mut PgConnection,
    course_ids: &[Uuid],
) -> Result<HashMap<Uuid, (i64, i64)>, ApiError> {
    Ok(course_modules::table
        .inner_join(lessons::table)
        .filter(course_modules::course_id.eq_any(course_ids))
        .group_by(course_modules::course_id)
        .select((
            course_modules::course_id,
            count_star(),
            sum(lessons::duration_minutes),
        ))
        .load::<(Uuid, i64, Option<i64>)>(conn)?
        .into_iter()
        .map(|(id, count, minutes)| (id, (count, minutes.unwrap_or(0))))
        .collect())
}

pub(crate) fn course_stats(conn: &mut PgConnection, course_id: Uuid) -> Result<CourseStats, ApiError> {
    let ids = [course_id];
    let (lesson_count, duration_minutes) = lesson_rollups(conn, &ids)?
        .remove(&course_id)
        .unwrap_or((0, 0));
    Ok(CourseStats {
        enrolled_count: enrolled_count(conn, course_id)?,
        lesson_count,
        duration_minutes,
    })
}

pub(crate) fn author_display_name(conn: &mut PgConnection, author_id: Uuid) -> Result<String, ApiError> {
    Ok(users::table
        .find(author_id)
        .select(users::display_name)
        .first(conn)?)
}

fn active_instructor_name(conn: &mut PgConnection, author_id: Uuid) -> Result<String, ApiError> {
    let row: Option<(String, String, bool)> = users::table
        .find(author_id)
        .select((users::display_name, users::role, users::is_active))
        .first(conn)
        .optional()?;

    match row {
        Some((name, role, true)) if UserRole::parse(&role) == Some(UserRole::Instructor) => {
            Ok(name)
        }
        Some(_) => Err(ApiError::Validation(
            "Course author must be an active instructor".to_string(),
        )),
        None => Err(ApiError::Validation(
            "Course author does not exist".to_string(),
        )),
    }
}

fn touch_course(conn: &mut PgConnection, course_id: Uuid) -> Result<(), ApiError> {
    diesel::update(courses::table.find(course_id))
        .set(courses::updated_at.eq(diesel::dsl::now))
        .execute(conn)?;
    Ok(())
}

async fn load_lesson_questions(
    state: &AppState,
    lesson_id: Uuid,
) -> Result<Vec<QuestionResponse>, ApiError> {
    with_conn(&state.conn, move |conn| {
        let rows: Vec<Question> = questions::table
            .filter(questions::lesson_id.eq(lesson_id))
            .order(questions::position.asc())
            .select(Question::as_select())
            .load(conn)?;
        Ok(rows.into_iter().map(|q| question_response(q, true)).collect())
    })
    .await
}

fn lesson_response(lesson: Lesson, questions: Vec<QuestionResponse>) -> LessonResponse {
    LessonResponse {
        id: lesson.id,
        title: lesson.title,
        lesson_type: lesson.lesson_type,
        duration_minutes: lesson.duration_minutes,
        video_url: lesson.video_url,
        content: lesson.content,
        position: lesson.position,
        questions,
    }
}

fn question_response(question: Question, include_answers: bool) -> QuestionResponse {
    QuestionResponse {
        id: question.id,
        prompt: question.prompt,
        options: question.options,
        correct_index: include_answers.then_some(question.correct_index),
        position: question.position,
    }
}

fn next_position(current_max: Option<i32>) -> i32 {
    current_max.map(|m| m + 1).unwrap_or(0)
}

pub(crate) fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = Vec::new();
    for tag in tags {
        let trimmed = tag.trim().to_lowercase();
        if !trimmed.is_empty() && !seen.contains(&trimmed) {
            seen.push(trimmed);
        }
    }
    seen
}

fn validate_lesson(req: &LessonRequest) -> Result<(), ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::Validation("Lesson title is required".to_string()));
    }
    if let Some(minutes) = req.duration_minutes {
        if minutes < 0 {
            return Err(ApiError::Validation(
                "Lesson duration cannot be negative".to_string(),
            ));
        }
    }
    match req.lesson_type {
        LessonType::Video if req.video_url.as_deref().map_or(true, |u| u.trim().is_empty()) => {
            Err(ApiError::Validation(
                "Video lessons require a video_url".to_string(),
            ))
        }
        LessonType::Text if req.content.as_deref().map_or(true, |c| c.trim().is_empty()) => {
            Err(ApiError::Validation(
                "Text lessons require content".to_string(),
            ))
        }
        _ => Ok(()),
    }
}

fn validate_question(req: &QuestionRequest) -> Result<(), ApiError> {
    if req.prompt.trim().is_empty() {
        return Err(ApiError::Validation(
            "Question prompt is required".to_string(),
        ));
    }
    if req.options.len() < 2 {
        return Err(ApiError::Validation(
            "Questions need at least two options".to_string(),
        ));
    }
    if req.options.iter().any(|o| o.trim().is_empty()) {
        return Err(ApiError::Validation(
            "Question options cannot be blank".to_string(),
        ));
    }
    if req.correct_index < 0 || req.correct_index as usize >= req.options.len() {
        return Err(ApiError::Validation(
            "correct_index must point at one of the options".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson_request(lesson_type: LessonType) -> LessonRequest {
        LessonRequest {
            title: "Intro".into(),
            lesson_type,
            duration_minutes: Some(10),
            video_url: None,
            content: None,
            position: None,
        }
    }

    #[test]
    fn test_video_lesson_requires_url() {
        let mut req = lesson_request(LessonType::Video);
        assert!(validate_lesson(&req).is_err());
        req.video_url = Some("https://cdn.example.com/intro.mp4".into());
        assert!(validate_lesson(&req).is_ok());
    }

    #[test]
    fn test_text_lesson_requires_content() {
        let mut req = lesson_request(LessonType::Text);
        assert!(validate_lesson(&req).is_err());
        req.content = Some("Welcome to the course.".into());
        assert!(validate_lesson(&req).is_ok());
    }

    #[test]
    fn test_quiz_lesson_needs_no_body() {
        assert!(validate_lesson(&lesson_request(LessonType::Quiz)).is_ok());
    }

    #[test]
    fn test_negative_duration_rejected() {
        let mut req = lesson_request(LessonType::Quiz);
        req.duration_minutes = Some(-5);
        assert!(validate_lesson(&req).is_err());
    }

    #[test]
    fn test_question_validation() {
        let mut req = QuestionRequest {
            prompt: "What is 2 + 2?".into(),
            options: vec!["3".into(), "4".into()],
            correct_index: 1,
            position: None,
        };
        assert!(validate_question(&req).is_ok());

        req.correct_index = 2;
        assert!(validate_question(&req).is_err());

        req.correct_index = -1;
        assert!(validate_question(&req).is_err());

        req.correct_index = 0;
        req.options = vec!["only one".into()];
        assert!(validate_question(&req).is_err());
    }

    #[test]
    fn test_normalize_tags_dedupes_and_lowercases() {
        let tags = normalize_tags(vec![
            "Rust".into(),
            " rust ".into(),
            "".into(),
            "Web".into(),
        ]);
        assert_eq!(tags, vec!["rust".to_string(), "web".to_string()]);
    }

    #[test]
    fn test_next_position_appends() {
        assert_eq!(next_position(None), 0);
        assert_eq!(next_position(Some(4)), 5);
    }

    #[test]
    fn test_page_slice_never_goes_negative() {
        let slice = page_slice(3, 20);
        assert_eq!(slice.limit, 20);
        assert_eq!(slice.offset, 40);

        let slice = page_slice(0, 10);
        assert_eq!(slice.offset, 0);

        let slice = page_slice(u32::MAX, u32::MAX);
        assert_eq!(slice.offset, i64::MAX);
    }
}
