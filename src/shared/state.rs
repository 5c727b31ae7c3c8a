use std::sync::Arc;

use crate::ai::AiClient;
use crate::auth::tokens::TokenManager;
use crate::config::AppConfig;
use crate::email::Mailer;
use crate::shared::utils::DbPool;

/// Shared application state handed to every handler via `State<Arc<AppState>>`.
#[derive(Clone)]
pub struct AppState {
    pub conn: DbPool,
    pub config: AppConfig,
    pub tokens: Arc<TokenManager>,
    pub mailer: Arc<Mailer>,
    pub ai: Arc<AiClient>,
}

impl AppState {
    pub fn new(
        conn: DbPool,
        config: AppConfig,
        tokens: TokenManager,
        mailer: Mailer,
        ai: AiClient,
    ) -> Self {
        Self {
            conn,
            config,
            tokens: Arc::new(tokens),
            mailer: Arc::new(mailer),
            ai: Arc::new(ai),
        }
    }
}
