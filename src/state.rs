//! Shared application state.

use std::sync::Arc;

use crate::{config::Config, db::DbPool, gateway::cert_cache::CertificateCache};

/// State shared with all handlers via Axum's State extraction.
///
/// The certificate cache lives here (not in a per-request client) so
/// provider certificate fetches are amortized across callbacks.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<Config>,
    pub certs: Arc<CertificateCache>,
}

impl AppState {
    pub fn new(pool: DbPool, config: Config) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            certs: Arc::new(CertificateCache::new()),
        }
    }
}
