use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use bytes::{Bytes, BytesMut};
use cairn_ingest::{IngestError, UploadMetadata};
use cairn_store::StoredObject;
use cairn_types::ObjectHash;
use futures::{stream, Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::error::{ServerError, ServerResult};
use crate::router::AppState;

/// Body of a successful `POST /objects`.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub hash: ObjectHash,
    pub length: u64,
    #[serde(rename = "type")]
    pub object_type: String,
    pub deduplicated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ObjectHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_error: Option<String>,
}

fn parse_hash(raw: &str) -> ServerResult<ObjectHash> {
    ObjectHash::from_hex(raw).map_err(|e| ServerError::BadRequest(format!("{raw:?}: {e}")))
}

/// Split the upload body at the first newline.
///
/// Returns the metadata line and whatever payload bytes arrived in the same
/// chunk. A body that ends without a newline is all metadata.
async fn read_metadata_line<S>(body: &mut S, max: usize) -> ServerResult<(Bytes, Bytes)>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    let too_long = || ServerError::BadRequest(format!("metadata line exceeds {max} bytes"));
    let mut line = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| {
            ServerError::from(IngestError::Cancelled(format!("reading metadata: {e}")))
        })?;
        if let Some(pos) = chunk.iter().position(|b| *b == b'\n') {
            if line.len() + pos > max {
                return Err(too_long());
            }
            line.extend_from_slice(&chunk[..pos]);
            return Ok((line.freeze(), chunk.slice(pos + 1..)));
        }
        line.extend_from_slice(&chunk);
        if line.len() > max {
            return Err(too_long());
        }
    }
    if line.is_empty() {
        return Err(ServerError::BadRequest("empty upload".into()));
    }
    Ok((line.freeze(), Bytes::new()))
}

/// `POST /objects`: one JSON metadata line, then the raw payload.
pub async fn upload_handler(
    State(state): State<AppState>,
    body: Body,
) -> ServerResult<(StatusCode, Json<UploadResponse>)> {
    let mut data = body.into_data_stream().map(|r| r.map_err(io::Error::other));
    let (line, first) = read_metadata_line(&mut data, state.max_metadata_len).await?;
    let metadata = UploadMetadata::from_json(&line)?;
    let content = stream::iter(Some(Ok(first))).chain(data);

    // The ingest runs in its own task so a client disconnect during Storing
    // cannot abort the commit; the drop guard cancels anything earlier.
    let cancel = CancellationToken::new();
    let _disconnect = cancel.clone().drop_guard();
    let pipeline = Arc::clone(&state.pipeline);
    let receipt = tokio::spawn(async move {
        pipeline.ingest_with_cancel(metadata, content, cancel).await
    })
    .await
    .map_err(|e| ServerError::Internal(e.to_string()))??;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            hash: receipt.object.hash,
            length: receipt.object.length,
            object_type: receipt.object.object_type,
            deduplicated: receipt.deduplicated,
            parent: receipt.linked_parent,
            link_error: receipt.link_error,
        }),
    ))
}

/// `GET /objects/{hash}`
pub async fn object_handler(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ServerResult<Json<StoredObject>> {
    let hash = parse_hash(&hash)?;
    Ok(Json(state.pipeline.get(&hash).await?))
}

/// `GET /objects/{hash}/content`
pub async fn content_handler(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ServerResult<Response> {
    let hash = parse_hash(&hash)?;
    let object = state.pipeline.get(&hash).await?;
    let reader = state.pipeline.open_content(&hash).await?;
    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
        (header::CONTENT_LENGTH, HeaderValue::from(object.length)),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(reader))).into_response())
}

/// `GET /objects/{hash}/children`
pub async fn children_handler(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ServerResult<Json<Vec<ObjectHash>>> {
    let hash = parse_hash(&hash)?;
    let children = state.pipeline.children(&hash).await?;
    Ok(Json(children.collect()))
}

/// `PUT /objects/{parent}/children/{child}`
pub async fn link_handler(
    State(state): State<AppState>,
    Path((parent, child)): Path<(String, String)>,
) -> ServerResult<(StatusCode, Json<serde_json::Value>)> {
    let parent = parse_hash(&parent)?;
    let child = parse_hash(&child)?;
    let linked = state.pipeline.link(&parent, &child).await?;
    let status = if linked { StatusCode::CREATED } else { StatusCode::OK };
    Ok((
        status,
        Json(json!({ "parent": parent, "child": child, "linked": linked })),
    ))
}

/// Health check handler.
pub async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Info handler.
pub async fn info_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = state.pipeline.config();
    Json(json!({
        "name": "cairn-server",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.pipeline.store().backend(),
        "digest_algorithm": config.digest_algorithm,
        "max_object_size": config.max_object_size,
    }))
}

pub async fn banner_handler() -> &'static str {
    concat!("cairn ", env!("CARGO_PKG_VERSION"), "\n")
}
