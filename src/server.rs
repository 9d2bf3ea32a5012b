//! HTTP façade over the node API.
//!
//! Routes:
//!
//! - `POST /` stores raw bytes and replies with the base64url blob ID
//! - `GET  /{blobID}` returns the raw blob or 404
//! - `POST /s` creates a pin set named by the body
//! - `PUT  /s/{name}` pins the base64url ID in the body
//! - `GET  /s/{name}/{blobID}` returns the raw blob or 404
//! - `DELETE /s/{name}/{blobID}` unpins

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::routing::put;
use hoard_blobs::BlobError;
use hoard_blobs::BlobId;
use hoard_pinset::PinSetError;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::node::Node;
use crate::node::NodeError;

pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/", post(post_blob))
        .route("/s", post(create_pin_set))
        .route("/s/{name}", put(add_pin))
        .route("/s/{name}/{blob_id}", get(get_pinned_blob).delete(delete_pin))
        .route("/{blob_id}", get(get_blob))
        .with_state(node)
}

/// Serves the API until the token is cancelled.
pub async fn serve(node: Arc<Node>, addr: &str, cancel: CancellationToken) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "http listening");
    axum::serve(listener, router(node))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
}

fn error_response(err: &NodeError) -> Response {
    let status = match err {
        _ if err.is_not_found() => StatusCode::NOT_FOUND,
        NodeError::PinSet {
            source: PinSetError::Exists { .. },
        } => StatusCode::CONFLICT,
        NodeError::Blob {
            source: BlobError::TooLarge { .. },
        } => StatusCode::PAYLOAD_TOO_LARGE,
        NodeError::Blob {
            source: BlobError::Cancelled,
        } => StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "request failed");
    }
    (status, err.to_string()).into_response()
}

fn parse_id(text: &str) -> Result<BlobId, Response> {
    text.trim()
        .parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, "invalid blob id").into_response())
}

async fn post_blob(State(node): State<Arc<Node>>, body: Bytes) -> Response {
    match node.post("", &body).await {
        Ok(id) => id.to_string().into_response(),
        Err(e) => error_response(&e),
    }
}

async fn get_blob(State(node): State<Arc<Node>>, Path(blob_id): Path<String>) -> Response {
    let id = match parse_id(&blob_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match node.get(&id).await {
        Ok(data) => data.into_response(),
        Err(e) => error_response(&e),
    }
}

async fn create_pin_set(State(node): State<Arc<Node>>, body: String) -> Response {
    match node.create_pin_set(body.trim()) {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => error_response(&e),
    }
}

async fn add_pin(State(node): State<Arc<Node>>, Path(name): Path<String>, body: String) -> Response {
    let id = match parse_id(&body) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match node.pin(&name, &id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(&e),
    }
}

async fn get_pinned_blob(State(node): State<Arc<Node>>, Path((_name, blob_id)): Path<(String, String)>) -> Response {
    get_blob(State(node), Path(blob_id)).await
}

async fn delete_pin(State(node): State<Arc<Node>>, Path((name, blob_id)): Path<(String, String)>) -> Response {
    let id = match parse_id(&blob_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match node.unpin(&name, &id) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(&e),
    }
}
