//! Application state shared across handlers.

use std::sync::Arc;

use crate::db::{ProductRepository, Repositories};
use crate::services::Services;
use crate::services::webhook::WebhookVerifier;

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    services: Services,
    products: Arc<dyn ProductRepository>,
    webhook: WebhookVerifier,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(services: Services, repos: &Repositories, webhook: WebhookVerifier) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                services,
                products: Arc::clone(&repos.products),
                webhook,
            }),
        }
    }

    /// Order-processing services.
    #[must_use]
    pub fn services(&self) -> &Services {
        &self.inner.services
    }

    /// Product store, used for readiness probes.
    #[must_use]
    pub fn products(&self) -> &dyn ProductRepository {
        self.inner.products.as_ref()
    }

    /// Payment callback verifier.
    #[must_use]
    pub fn webhook(&self) -> &WebhookVerifier {
        &self.inner.webhook
    }
}
