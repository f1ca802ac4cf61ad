//! HTTP API endpoints

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, Router},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, error, warn};

use dank_core::wire::{parse_timestamp, PublishMessageRequest, WireError};

use crate::config::ServerConfig;
use crate::store::{InsertOutcome, NewMessage, RelayStore};

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn RelayStore>,
    pub max_message_bytes: usize,
    pub max_keys_limit: usize,
}

impl ApiState {
    pub fn new(store: Arc<dyn RelayStore>, config: &ServerConfig) -> Self {
        Self {
            store,
            max_message_bytes: config.max_message_bytes,
            max_keys_limit: config.max_keys_limit,
        }
    }
}

/// Create API router
pub fn create_router(state: ApiState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/messages", post(post_message))
        .route("/messages/:search_index_hex", get(get_messages))
        .route("/keys", get(get_keys))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

enum PublishRejection {
    Invalid(WireError),
    TooLarge(usize),
}

/// Decode and validate a publish body; hex fields come back lowercased.
fn validate_publish(request: PublishMessageRequest, max_message_bytes: usize) -> Result<NewMessage, PublishRejection> {
    let ciphertext = request.ciphertext().map_err(PublishRejection::Invalid)?;
    if ciphertext.len() > max_message_bytes {
        return Err(PublishRejection::TooLarge(ciphertext.len()));
    }
    let iv = request.iv_bytes().map_err(PublishRejection::Invalid)?;
    let ephemeral_pubkey = request.ephemeral_pubkey_bytes().map_err(PublishRejection::Invalid)?;
    let search_index = request.search_index_bytes().map_err(PublishRejection::Invalid)?;

    Ok(NewMessage {
        message: request.message,
        iv: hex::encode(iv),
        ephemeral_pubkey: hex::encode(ephemeral_pubkey),
        search_index: hex::encode(search_index),
    })
}

/// POST /messages - Append a ciphertext and its ephemeral key
async fn post_message(State(state): State<ApiState>, body: Bytes) -> Response {
    let request: PublishMessageRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            warn!("Failed to parse publish body: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid request body").into_response();
        }
    };

    let message = match validate_publish(request, state.max_message_bytes) {
        Ok(m) => m,
        Err(PublishRejection::Invalid(e)) => {
            warn!("Rejected publish: {}", e);
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
        Err(PublishRejection::TooLarge(len)) => {
            warn!(len, max = state.max_message_bytes, "Rejected oversized publish");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Message too large").into_response();
        }
    };

    match state.store.insert_message(&message).await {
        Ok(InsertOutcome::Stored(submit_time)) => {
            debug!(index = %message.search_index, %submit_time, "stored message");
            StatusCode::OK.into_response()
        }
        Ok(InsertOutcome::Duplicate) => {
            debug!(index = %message.search_index, "duplicate publish ignored");
            StatusCode::OK.into_response()
        }
        Err(e) => {
            error!("Store error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Storage error").into_response()
        }
    }
}

#[derive(Deserialize)]
struct KeysQuery {
    since: Option<String>,
    limit: Option<usize>,
}

/// GET /keys?since=<RFC3339>&limit=<n> - Ephemeral keys newer than `since`
async fn get_keys(State(state): State<ApiState>, Query(query): Query<KeysQuery>) -> Response {
    let since = match query.since.as_deref() {
        None | Some("") => DateTime::<Utc>::UNIX_EPOCH,
        Some(s) => match parse_timestamp(s) {
            Some(ts) => ts,
            None => return (StatusCode::BAD_REQUEST, "Invalid since timestamp").into_response(),
        },
    };
    let limit = query.limit.unwrap_or(state.max_keys_limit).min(state.max_keys_limit);

    match state.store.list_keys(since, limit).await {
        Ok(keys) => Json(keys).into_response(),
        Err(e) => {
            error!("List keys error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error listing keys").into_response()
        }
    }
}

/// GET /messages/{search_index_hex} - Ciphertexts stored under an index
async fn get_messages(State(state): State<ApiState>, Path(search_index_hex): Path<String>) -> Response {
    let search_index = match hex::decode(&search_index_hex) {
        Ok(index) if index.len() == 32 => hex::encode(index),
        _ => {
            return (StatusCode::BAD_REQUEST, "Invalid search_index").into_response();
        }
    };

    match state.store.messages_for(&search_index).await {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => {
            error!("Get messages error: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error retrieving messages").into_response()
        }
    }
}

/// GET /health - Health check
async fn health_handler() -> StatusCode {
    StatusCode::OK
}
