//! Application state

use std::sync::Arc;

use sqlx::PgPool;
use tiersync_billing::{TracingReporter, WebhookHandler};

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub webhooks: Arc<WebhookHandler>,
}

impl AppState {
    pub fn new(config: Config, webhooks: WebhookHandler) -> Self {
        Self {
            config: Arc::new(config),
            webhooks: Arc::new(webhooks),
        }
    }

    /// State backed by PostgreSQL, reporting failures through `tracing`
    pub fn from_pool(pool: PgPool, config: Config) -> Self {
        let reporter = Arc::new(TracingReporter::new(config.production));
        let webhooks = WebhookHandler::from_pool(pool, config.webhook_verifier(), reporter);

        tracing::info!(
            tolerance_secs = config.webhook_tolerance_secs,
            max_body_bytes = config.webhook_max_body_bytes,
            production = config.production,
            "Stripe webhook handler initialized"
        );

        Self::new(config, webhooks)
    }
}
