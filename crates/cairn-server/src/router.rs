use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use cairn_ingest::IngestPipeline;
use tower_http::trace::TraceLayer;

use crate::handler;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestPipeline>,
    pub max_metadata_len: usize,
}

impl AppState {
    pub fn new(pipeline: Arc<IngestPipeline>) -> Self {
        Self {
            pipeline,
            max_metadata_len: 64 * 1024,
        }
    }

    pub fn with_max_metadata_len(mut self, max: usize) -> Self {
        self.max_metadata_len = max;
        self
    }
}

/// Build the axum router with all Cairn endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handler::banner_handler))
        .route("/v1/health", get(handler::health_handler))
        .route("/v1/info", get(handler::info_handler))
        .route("/objects", post(handler::upload_handler))
        .route("/objects/:hash", get(handler::object_handler))
        .route("/objects/:hash/content", get(handler::content_handler))
        .route("/objects/:hash/children", get(handler::children_handler))
        .route("/objects/:hash/children/:child", put(handler::link_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
