use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use diesel::dsl::count_star;
use diesel::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::error::ApiError;
use crate::shared::models::schema::{courses, enrollments, users};
use crate::shared::models::{CourseStatus, EnrollmentStatus, UserRole};
use crate::shared::state::AppState;
use crate::shared::utils::with_conn;

#[derive(Debug, Default, Serialize)]
pub struct RoleBreakdown {
    pub admin: i64,
    pub instructor: i64,
    pub learner: i64,
    pub company: i64,
    pub influencer: i64,
}

#[derive(Debug, Default, Serialize)]
pub struct StatusBreakdown {
    pub draft: i64,
    pub published: i64,
    pub archived: i64,
}

#[derive(Debug, Serialize)]
pub struct OverviewReport {
    pub total_users: i64,
    pub users_by_role: RoleBreakdown,
    pub total_courses: i64,
    pub courses_by_status: StatusBreakdown,
    pub total_enrollments: i64,
    pub completed_enrollments: i64,
    pub average_progress: f64,
}

#[derive(Debug, Serialize)]
pub struct CourseReportRow {
    pub course_id: Uuid,
    pub title: String,
    pub status: String,
    pub views: i64,
    pub enrolled_count: i64,
    pub completed_count: i64,
    pub average_progress: f64,
}

#[derive(Debug, Serialize)]
pub struct InstructorReportRow {
    pub instructor_id: Uuid,
    pub display_name: String,
    pub expertise: Option<String>,
    pub course_count: i64,
    pub total_enrollments: i64,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/reports/overview", get(overview_report))
        .route("/reports/courses", get(courses_report))
        .route("/reports/instructors", get(instructors_report))
}

pub async fn overview_report(
    State(state): State<Arc<AppState>>,
) -> Result<Json<OverviewReport>, ApiError> {
    let report = with_conn(&state.conn, move |conn| {
        let role_rows: Vec<(String, i64)> = users::table
            .group_by(users::role)
            .select((users::role, count_star()))
            .load(conn)?;
        let status_rows: Vec<(String, i64)> = courses::table
            .group_by(courses::status)
            .select((courses::status, count_star()))
            .load(conn)?;
        let progress_rows: Vec<(i32, String)> = enrollments::table
            .select((enrollments::progress, enrollments::status))
            .load(conn)?;

        let mut users_by_role = RoleBreakdown::default();
        let mut total_users = 0;
        for (role, count) in role_rows {
            total_users += count;
            match UserRole::parse(&role) {
                Some(UserRole::Admin) => users_by_role.admin = count,
                Some(UserRole::Instructor) => users_by_role.instructor = count,
                Some(UserRole::Learner) => users_by_role.learner = count,
                Some(UserRole::Company) => users_by_role.company = count,
                Some(UserRole::Influencer) => users_by_role.influencer = count,
                None => {}
            }
        }

        let mut courses_by_status = StatusBreakdown::default();
        let mut total_courses = 0;
        for (status, count) in status_rows {
            total_courses += count;
            match CourseStatus::parse(&status) {
                Some(CourseStatus::Draft) => courses_by_status.draft = count,
                Some(CourseStatus::Published) => courses_by_status.published = count,
                Some(CourseStatus::Archived) => courses_by_status.archived = count,
                None => {}
            }
        }

        let total_enrollments = progress_rows.len() as i64;
        let completed_enrollments = progress_rows
            .iter()
            .filter(|(_, status)| {
                EnrollmentStatus::parse(status) == Some(EnrollmentStatus::Completed)
            })
            .count() as i64;
        let progress_sum: i64 = progress_rows.iter().map(|(p, _)| *p as i64).sum();

        Ok(OverviewReport {
            total_users,
            users_by_role,
            total_courses,
            courses_by_status,
            total_enrollments,
            completed_enrollments,
            average_progress: average(progress_sum, total_enrollments),
        })
    })
    .await?;

    Ok(Json(report))
}

pub async fn courses_report(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CourseReportRow>>, ApiError> {
    let rows = with_conn(&state.conn, move |conn| {
        let course_rows: Vec<(Uuid, String, String, i64)> = courses::table
            .order(courses::created_at.desc())
            .select((
                courses::id,
                courses::title,
                courses::status,
                courses::views,
            ))
            .load(conn)?;
        let enrollment_rows: Vec<(Uuid, i32, String)> = enrollments::table
            .select((
                enrollments::course_id,
                enrollments::progress,
                enrollments::status,
            ))
            .load(conn)?;

        let aggregates = fold_enrollments(enrollment_rows);
        Ok(course_rows
            .into_iter()
            .map(|(course_id, title, status, views)| {
                let agg = aggregates.get(&course_id).copied().unwrap_or_default();
                CourseReportRow {
                    course_id,
                    title,
                    status,
                    views,
                    enrolled_count: agg.count,
                    completed_count: agg.completed,
                    average_progress: average(agg.progress_sum, agg.count),
                }
            })
            .collect::<Vec<_>>())
    })
    .await?;

    Ok(Json(rows))
}

pub async fn instructors_report(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<InstructorReportRow>>, ApiError> {
    let rows = with_conn(&state.conn, move |conn| {
        let instructor_rows: Vec<(Uuid, String, Option<String>)> = users::table
            .filter(users::role.eq(UserRole::Instructor.as_str()))
            .order(users::display_name.asc())
            .select((users::id, users::display_name, users::expertise))
            .load(conn)?;

        let course_counts: HashMap<Uuid, i64> = courses::table
            .group_by(courses::author_id)
            .select((courses::author_id, count_star()))
            .load::<(Uuid, i64)>(conn)?
            .into_iter()
            .collect();

        let enrollment_counts: HashMap<Uuid, i64> = enrollments::table
            .inner_join(courses::table)
            .group_by(courses::author_id)
            .select((courses::author_id, count_star()))
            .load::<(Uuid, i64)>(conn)?
            .into_iter()
            .collect();

        Ok(instructor_rows
            .into_iter()
            .map(|(instructor_id, display_name, expertise)| InstructorReportRow {
                instructor_id,
                display_name,
                expertise,
                course_count: course_counts.get(&instructor_id).copied().unwrap_or(0),
                total_enrollments: enrollment_counts
                    .get(&instructor_id)
                    .copied()
                    .unwrap_or(0),
            })
            .collect::<Vec<_>>())
    })
    .await?;

    Ok(Json(rows))
}

#[derive(Debug, Default, Clone, Copy)]
struct EnrollmentAgg {
    count: i64,
    completed: i64,
    progress_sum: i64,
}

fn fold_enrollments(rows: Vec<(Uuid, i32, String)>) -> HashMap<Uuid, EnrollmentAgg> {
    let mut aggregates: HashMap<Uuid, EnrollmentAgg> = HashMap::new();
    for (course_id, progress, status) in rows {
        let agg = aggregates.entry(course_id).or_default();
        agg.count += 1;
        agg.progress_sum += progress as i64;
        if EnrollmentStatus::parse(&status) == Some(EnrollmentStatus::Completed) {
            agg.completed += 1;
        }
    }
    aggregates
}

/// Mean progress rounded to one decimal; zero when nothing is enrolled.
fn average(sum: i64, count: i64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    (sum as f64 / count as f64 * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_rounds_to_one_decimal() {
        assert_eq!(average(0, 0), 0.0);
        assert_eq!(average(100, 3), 33.3);
        assert_eq!(average(200, 3), 66.7);
        assert_eq!(average(300, 3), 100.0);
    }

    #[test]
    fn test_fold_enrollments_groups_by_course() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let rows = vec![
            (a, 100, "completed".to_string()),
            (a, 40, "in_progress".to_string()),
            (b, 0, "yet_to_start".to_string()),
        ];

        let aggregates = fold_enrollments(rows);
        let agg_a = aggregates[&a];
        assert_eq!(agg_a.count, 2);
        assert_eq!(agg_a.completed, 1);
        assert_eq!(agg_a.progress_sum, 140);

        let agg_b = aggregates[&b];
        assert_eq!(agg_b.count, 1);
        assert_eq!(agg_b.completed, 0);
    }

    #[test]
    fn test_fold_enrollments_empty() {
        assert!(fold_enrollments(Vec::new()).is_empty());
    }
}
