//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::db::LocalStore;
use crate::sync::SyncService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    sync: SyncService,
}

impl AppState {
    pub fn new(config: Config, sync: SyncService) -> Self {
        Self {
            inner: Arc::new(AppStateInner { config, sync }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the sync service
    pub fn sync(&self) -> &SyncService {
        &self.inner.sync
    }

    /// Get the local replica
    pub fn local(&self) -> &LocalStore {
        self.inner.sync.local()
    }
}
