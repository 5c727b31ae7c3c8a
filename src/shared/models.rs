use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account role. One enum covers both product surfaces: the e-learning apps
/// (admin / instructor / learner) and the onboarding portal (company /
/// influencer). Route groups gate the subset they serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Instructor,
    Learner,
    Company,
    Influencer,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Instructor => "instructor",
            Self::Learner => "learner",
            Self::Company => "company",
            Self::Influencer => "influencer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Self::Admin),
            "instructor" => Some(Self::Instructor),
            "learner" => Some(Self::Learner),
            "company" => Some(Self::Company),
            "influencer" => Some(Self::Influencer),
            _ => None,
        }
    }

    /// Roles accepted by the unified (non-admin) login endpoint.
    pub fn can_use_unified_login(&self) -> bool {
        !matches!(self, Self::Admin)
    }

    /// Roles served by the onboarding portal.
    pub fn is_onboarding_role(&self) -> bool {
        matches!(self, Self::Company | Self::Influencer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseStatus {
    Draft,
    Published,
    Archived,
}

impl CourseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "published" => Some(Self::Published),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    /// Allowed lifecycle moves. Draft courses publish or archive, published
    /// courses archive, archived courses can be restored to published.
    pub fn can_transition_to(&self, next: CourseStatus) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Published)
                | (Self::Draft, Self::Archived)
                | (Self::Published, Self::Archived)
                | (Self::Archived, Self::Published)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonType {
    Video,
    Quiz,
    Text,
}

impl LessonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Quiz => "quiz",
            Self::Text => "text",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "video" => Some(Self::Video),
            "quiz" => Some(Self::Quiz),
            "text" => Some(Self::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    YetToStart,
    InProgress,
    Completed,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::YetToStart => "yet_to_start",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "yet_to_start" => Some(Self::YetToStart),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Status is always derived from progress, never set by callers.
    pub fn from_progress(progress: i32) -> Self {
        match progress {
            0 => Self::YetToStart,
            100 => Self::Completed,
            _ => Self::InProgress,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub display_name: String,
    pub role: String,
    pub expertise: Option<String>,
    pub onboarded: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = courses)]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub views: i64,
    pub status: String,
    pub author_id: Uuid,
    pub video_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = course_modules)]
pub struct CourseModule {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub position: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = lessons)]
pub struct Lesson {
    pub id: Uuid,
    pub module_id: Uuid,
    pub title: String,
    pub lesson_type: String,
    pub duration_minutes: i32,
    pub video_url: Option<String>,
    pub content: Option<String>,
    pub position: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = questions)]
pub struct Question {
    pub id: Uuid,
    pub lesson_id: Uuid,
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_index: i32,
    pub position: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = enrollments)]
pub struct Enrollment {
    pub id: Uuid,
    pub course_id: Uuid,
    pub user_id: Uuid,
    pub progress: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = social_accounts)]
pub struct SocialAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub platform: String,
    pub handle: String,
    pub stats: serde_json::Value,
    pub connected_at: DateTime<Utc>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

pub mod schema {
    diesel::table! {
        users (id) {
            id -> Uuid,
            email -> Text,
            password_hash -> Text,
            display_name -> Text,
            role -> Text,
            expertise -> Nullable<Text>,
            onboarded -> Bool,
            is_active -> Bool,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        courses (id) {
            id -> Uuid,
            title -> Text,
            description -> Text,
            tags -> Array<Text>,
            views -> Int8,
            status -> Text,
            author_id -> Uuid,
            video_url -> Nullable<Text>,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        course_modules (id) {
            id -> Uuid,
            course_id -> Uuid,
            title -> Text,
            position -> Int4,
        }
    }

    diesel::table! {
        lessons (id) {
            id -> Uuid,
            module_id -> Uuid,
            title -> Text,
            lesson_type -> Text,
            duration_minutes -> Int4,
            video_url -> Nullable<Text>,
            content -> Nullable<Text>,
            position -> Int4,
        }
    }

    diesel::table! {
        questions (id) {
            id -> Uuid,
            lesson_id -> Uuid,
            prompt -> Text,
            options -> Array<Text>,
            correct_index -> Int4,
            position -> Int4,
        }
    }

    diesel::table! {
        enrollments (id) {
            id -> Uuid,
            course_id -> Uuid,
            user_id -> Uuid,
            progress -> Int4,
            status -> Text,
            created_at -> Timestamptz,
            updated_at -> Timestamptz,
        }
    }

    diesel::table! {
        social_accounts (id) {
            id -> Uuid,
            user_id -> Uuid,
            platform -> Text,
            handle -> Text,
            stats -> Jsonb,
            connected_at -> Timestamptz,
            last_refreshed_at -> Nullable<Timestamptz>,
        }
    }

    diesel::joinable!(courses -> users (author_id));
    diesel::joinable!(course_modules -> courses (course_id));
    diesel::joinable!(lessons -> course_modules (module_id));
    diesel::joinable!(questions -> lessons (lesson_id));
    diesel::joinable!(enrollments -> courses (course_id));
    diesel::joinable!(enrollments -> users (user_id));
    diesel::joinable!(social_accounts -> users (user_id));

    diesel::allow_tables_to_appear_in_same_query!(
        users,
        courses,
        course_modules,
        lessons,
        questions,
        enrollments,
        social_accounts,
    );
}

pub use schema::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [
            UserRole::Admin,
            UserRole::Instructor,
            UserRole::Learner,
            UserRole::Company,
            UserRole::Influencer,
        ] {
            assert_eq!(UserRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(UserRole::parse("superuser"), None);
    }

    #[test]
    fn test_unified_login_roles() {
        assert!(!UserRole::Admin.can_use_unified_login());
        assert!(UserRole::Instructor.can_use_unified_login());
        assert!(UserRole::Learner.can_use_unified_login());
        assert!(UserRole::Company.can_use_unified_login());
        assert!(UserRole::Influencer.can_use_unified_login());
    }

    #[test]
    fn test_course_status_transitions() {
        use CourseStatus::*;
        assert!(Draft.can_transition_to(Published));
        assert!(Draft.can_transition_to(Archived));
        assert!(Published.can_transition_to(Archived));
        assert!(Archived.can_transition_to(Published));

        assert!(!Published.can_transition_to(Draft));
        assert!(!Archived.can_transition_to(Draft));
        assert!(!Draft.can_transition_to(Draft));
        assert!(!Published.can_transition_to(Published));
    }

    #[test]
    fn test_enrollment_status_derivation() {
        assert_eq!(
            EnrollmentStatus::from_progress(0),
            EnrollmentStatus::YetToStart
        );
        assert_eq!(
            EnrollmentStatus::from_progress(1),
            EnrollmentStatus::InProgress
        );
        assert_eq!(
            EnrollmentStatus::from_progress(99),
            EnrollmentStatus::InProgress
        );
        assert_eq!(
            EnrollmentStatus::from_progress(100),
            EnrollmentStatus::Completed
        );
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&EnrollmentStatus::YetToStart).unwrap(),
            "\"yet_to_start\""
        );
        assert_eq!(
            serde_json::to_string(&CourseStatus::Published).unwrap(),
            "\"published\""
        );
        assert_eq!(
            serde_json::to_string(&LessonType::Quiz).unwrap(),
            "\"quiz\""
        );
    }
}
