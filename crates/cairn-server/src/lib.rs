//! HTTP server for Cairn.
//!
//! Accepts object uploads (`POST /objects`), serves committed objects and
//! their payloads, and answers parent/child relation queries. All state lives
//! in an injected [`IngestPipeline`](cairn_ingest::IngestPipeline).

pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;

pub use config::{Backend, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use router::{build_router, AppState};
pub use server::{open_pipeline, CairnServer};

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use cairn_ingest::{IngestConfig, IngestPipeline};
    use std::sync::Arc;
    use tower::util::ServiceExt;

    const HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn app() -> Router {
        app_with(IngestConfig::default())
    }

    fn app_with(config: IngestConfig) -> Router {
        build_router(AppState::new(Arc::new(IngestPipeline::in_memory(config))))
    }

    fn upload_body(hash: &str, length: u64, payload: &[u8], parent: Option<&str>) -> Body {
        let mut meta = serde_json::json!({
            "content_hash": hash,
            "content_length": length,
            "type": "blob",
        });
        if let Some(parent) = parent {
            meta["parent_hash"] = parent.into();
        }
        let mut raw = serde_json::to_vec(&meta).unwrap();
        raw.push(b'\n');
        raw.extend_from_slice(payload);
        Body::from(raw)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn post(app: &Router, body: Body) -> (StatusCode, serde_json::Value) {
        let (status, raw) = send(
            app,
            Request::post("/objects").body(body).unwrap(),
        )
        .await;
        (status, serde_json::from_slice(&raw).unwrap())
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
        send(app, Request::get(uri).body(Body::empty()).unwrap()).await
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (status, _) = get(&app(), "/v1/health").await;
        assert_eq!(status, 200);
    }

    #[tokio::test]
    async fn info_endpoint() {
        let (status, raw) = get(&app(), "/v1/info").await;
        assert_eq!(status, 200);
        let info: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(info["backend"], "memory");
        assert_eq!(info["digest_algorithm"], "sha256");
    }

    #[tokio::test]
    async fn banner() {
        let (status, raw) = get(&app(), "/").await;
        assert_eq!(status, 200);
        assert!(String::from_utf8(raw).unwrap().starts_with("cairn "));
    }

    #[tokio::test]
    async fn upload_then_fetch() {
        let app = app();
        let (status, body) = post(&app, upload_body(HELLO, 5, b"hello", None)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["hash"], HELLO);
        assert_eq!(body["length"], 5);
        assert_eq!(body["type"], "blob");

        let (status, raw) = get(&app, &format!("/objects/{HELLO}")).await;
        assert_eq!(status, 200);
        let header: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(header["type"], "blob");

        let (status, raw) = get(&app, &format!("/objects/{HELLO}/content")).await;
        assert_eq!(status, 200);
        assert_eq!(raw, b"hello");
    }

    #[tokio::test]
    async fn repeated_upload_is_created_again() {
        let app = app();
        post(&app, upload_body(HELLO, 5, b"hello", None)).await;
        let (status, body) = post(&app, upload_body(HELLO, 5, b"hello", None)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["deduplicated"], true);
    }

    #[tokio::test]
    async fn hash_mismatch_is_conflict() {
        let app = app();
        let (status, body) = post(&app, upload_body(HELLO, 5, b"world", None)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "hash_mismatch");

        let (status, _) = get(&app, &format!("/objects/{HELLO}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn oversized_declaration_is_bad_request() {
        let (status, body) = post(&app(), upload_body(HELLO, 5_000_000_001, b"", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "size_exceeded");
    }

    #[tokio::test]
    async fn malformed_hash_is_bad_request() {
        let (status, body) = post(&app(), upload_body(&HELLO[..63], 5, b"hello", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");
    }

    #[tokio::test]
    async fn malformed_metadata_is_bad_request() {
        let (status, body) = post(&app(), Body::from("{not json\nhello")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("metadata"));
    }

    #[tokio::test]
    async fn body_beyond_limit_is_bad_request() {
        let app = app_with(IngestConfig::default().with_max_object_size(4));
        let (status, body) = post(&app, upload_body(HELLO, 5, b"hello", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "size_exceeded");
    }

    #[tokio::test]
    async fn children_lifecycle() {
        let app = app();
        let parent = HELLO;

        let (status, _) = get(&app, &format!("/objects/{parent}/children")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        post(&app, upload_body(parent, 5, b"hello", None)).await;
        let (status, raw) = get(&app, &format!("/objects/{parent}/children")).await;
        assert_eq!(status, 200);
        assert_eq!(raw, b"[]");

        let world = "486ea46224d1bb4fb680f34f7c9ad96a8f24ec88be73ea8e5a6c65260e9cb8a7";
        let (status, body) = post(&app, upload_body(world, 5, b"world", Some(parent))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["parent"], parent);

        let (status, raw) = get(&app, &format!("/objects/{parent}/children")).await;
        assert_eq!(status, 200);
        let kids: Vec<String> = serde_json::from_slice(&raw).unwrap();
        assert_eq!(kids, vec![world.to_string()]);
    }

    #[tokio::test]
    async fn children_of_malformed_hash_is_bad_request() {
        let (status, _) = get(&app(), "/objects/XYZ/children").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn explicit_link() {
        let app = app();
        let world = "486ea46224d1bb4fb680f34f7c9ad96a8f24ec88be73ea8e5a6c65260e9cb8a7";
        post(&app, upload_body(HELLO, 5, b"hello", None)).await;
        let uri = format!("/objects/{HELLO}/children/{world}");

        let (status, _) = send(&app, Request::put(&uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        post(&app, upload_body(world, 5, b"world", None)).await;
        let (status, _) = send(&app, Request::put(&uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = send(&app, Request::put(&uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
    }
}
