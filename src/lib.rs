pub mod ai;
pub mod api_router;
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod courses;
pub mod email;
pub mod instructor;
pub mod learner;
pub mod onboarding;
pub mod reports;
pub mod shared;
pub mod users;
