use std::sync::Arc;

use cairn_index::{InMemoryRelationIndex, LogRelationIndex, RelationIndex, SyncMode};
use cairn_ingest::IngestPipeline;
use cairn_store::{FsObjectStore, InMemoryObjectStore, ObjectStore};
use tokio::net::TcpListener;

use crate::config::{Backend, ServerConfig};
use crate::error::{ServerError, ServerResult};
use crate::router::{build_router, AppState};

/// Build a pipeline over the backend `config` selects.
pub async fn open_pipeline(config: &ServerConfig) -> ServerResult<IngestPipeline> {
    let (store, index): (Arc<dyn ObjectStore>, Arc<dyn RelationIndex>) = match config.backend {
        Backend::Memory => (
            Arc::new(InMemoryObjectStore::new()),
            Arc::new(InMemoryRelationIndex::new()),
        ),
        Backend::Filesystem => {
            let sync_mode = if config.sync_relations {
                SyncMode::EveryWrite
            } else {
                SyncMode::OsDefault
            };
            let store = FsObjectStore::open(config.data_dir.clone()).await?;
            let log = config.relations_log();
            let index = tokio::task::spawn_blocking(move || LogRelationIndex::open(&log, sync_mode))
                .await
                .map_err(|e| ServerError::Internal(e.to_string()))??;
            (Arc::new(store), Arc::new(index))
        }
    };
    Ok(IngestPipeline::new(config.ingest.clone(), store, index))
}

/// Cairn object server.
pub struct CairnServer {
    config: ServerConfig,
    state: AppState,
}

impl CairnServer {
    /// Open the configured backend.
    pub async fn open(config: ServerConfig) -> ServerResult<Self> {
        let pipeline = open_pipeline(&config).await?;
        Ok(Self::with_pipeline(config, Arc::new(pipeline)))
    }

    /// Serve an already built pipeline.
    pub fn with_pipeline(config: ServerConfig, pipeline: Arc<IngestPipeline>) -> Self {
        let state = AppState::new(pipeline).with_max_metadata_len(config.max_metadata_len);
        Self { config, state }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone())
    }

    /// Start serving requests until ctrl-c.
    pub async fn serve(self) -> ServerResult<()> {
        let app = self.router();
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        tracing::info!(
            addr = %self.config.bind_addr,
            backend = self.state.pipeline.store().backend(),
            data_dir = %self.config.data_dir.display(),
            "cairn server listening"
        );
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_ingest::IngestConfig;

    #[tokio::test]
    async fn memory_backend_opens() {
        let config = ServerConfig {
            backend: Backend::Memory,
            ..ServerConfig::default()
        };
        let server = CairnServer::open(config).await.unwrap();
        assert_eq!(server.state.pipeline.store().backend(), "memory");
        let _router = server.router();
    }

    #[tokio::test]
    async fn filesystem_backend_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            data_dir: dir.path().join("data"),
            ingest: IngestConfig::default().with_max_object_size(10),
            ..ServerConfig::default()
        };
        let server = CairnServer::open(config).await.unwrap();
        assert_eq!(server.state.pipeline.store().backend(), "filesystem");
        assert_eq!(server.state.pipeline.guard().max(), 10);
        assert!(dir.path().join("data").join("objects").is_dir());
        assert!(dir.path().join("data").join("relations.log").is_file());
    }
}
