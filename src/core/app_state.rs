use std::sync::Arc;

use crate::core::config::Config;
use crate::jobs::JobManager;
use crate::scraping::browser_pool::BrowserPool;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub jobs: Arc<JobManager>,
    pub browser: Arc<BrowserPool>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("auth_enabled", &self.config.auth_enabled())
            .field("max_concurrent_pages", &self.config.max_concurrent_pages)
            .finish()
    }
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        Self {
            jobs: Arc::new(JobManager::new(&config)),
            browser: BrowserPool::new(config.clone()),
            config,
        }
    }
}
