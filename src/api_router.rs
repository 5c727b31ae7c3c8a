//! Central route table. Every module contributes a `configure()` router;
//! this file mounts them under their role-gated prefixes.

use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;

use crate::auth::middleware::{
    require_admin, require_auth, require_instructor, require_learner, require_onboarding,
};
use crate::shared::state::AppState;

pub fn configure_api_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    // /api/admin/auth/login stays public; everything else under /api/admin
    // requires the admin role. The auth nest is attached after the guard
    // layer so the layer does not cover it.
    let admin = Router::new()
        .merge(crate::courses::configure())
        .merge(crate::users::configure())
        .merge(crate::reports::configure())
        .route_layer(from_fn_with_state(state.clone(), require_admin))
        .nest("/auth", crate::auth::admin_configure());

    let instructor = crate::instructor::configure()
        .route_layer(from_fn_with_state(state.clone(), require_instructor));

    let learner = crate::learner::configure()
        .route_layer(from_fn_with_state(state.clone(), require_learner));

    let onboarding = crate::onboarding::configure()
        .route_layer(from_fn_with_state(state.clone(), require_onboarding));

    let ai = crate::ai::configure()
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health))
        .nest("/api/auth", crate::auth::configure(state))
        .nest("/api/admin", admin)
        .nest("/api/instructor", instructor)
        .nest("/api/learner", learner)
        .nest("/api/onboarding", onboarding)
        .nest("/api/ai", ai)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "UP",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
