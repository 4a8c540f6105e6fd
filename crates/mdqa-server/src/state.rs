//! Shared application state.

use std::sync::Arc;

use parking_lot::RwLock;

use mdqa_core::{CliOverrides, ServerConfig};
use mdqa_embed::ChatModel;
use mdqa_index::{IndexManager, IndexStatus, ReloadScheduler};

use crate::protocol::ServerStatus;

/// Retrieval knobs for the query pipeline.
#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    /// How many chunks to retrieve per question.
    pub top_k: usize,
    /// Drop hits farther than this distance. `None` disables the filter.
    pub distance_threshold: Option<f32>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self { top_k: 5, distance_threshold: None }
    }
}

/// State accessible from every connection task and background task.
pub struct AppState {
    pub cli: CliOverrides,
    pub config: RwLock<ServerConfig>,
    pub manager: Arc<IndexManager>,
    pub chat: RwLock<Arc<dyn ChatModel>>,
    pub query_options: QueryOptions,
    pub scheduler: tokio::sync::Mutex<Option<ReloadScheduler>>,
}

impl AppState {
    pub fn new(
        cli: CliOverrides,
        config: ServerConfig,
        manager: Arc<IndexManager>,
        chat: Arc<dyn ChatModel>,
        query_options: QueryOptions,
    ) -> Self {
        Self {
            cli,
            config: RwLock::new(config),
            manager,
            chat: RwLock::new(chat),
            query_options,
            scheduler: tokio::sync::Mutex::new(None),
        }
    }

    /// Clone the current configuration snapshot.
    pub fn snapshot(&self) -> ServerConfig {
        self.config.read().clone()
    }

    /// Status as reported to `status` queries.
    pub fn status(&self) -> (ServerStatus, &'static str) {
        match self.manager.status() {
            IndexStatus::Ready => (ServerStatus::Ready, "Server ready"),
            IndexStatus::Indexing => (ServerStatus::Indexing, "Server reloading indexes"),
            IndexStatus::NotReady => (ServerStatus::NotReady, "Server loading indexes"),
        }
    }
}
