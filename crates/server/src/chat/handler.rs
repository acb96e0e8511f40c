use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use forum_common::types::ChatMessage;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use super::hub::{ChatConnection, ChatHub, InboundFrame};
use crate::auth::{Identity, TokenVerifier};
use crate::error::{request_id_from_headers_or_generate, with_request_id_scope, ApiError, ErrorCode};

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct ChatState {
    pub hub: Arc<ChatHub>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub guest_username: Arc<str>,
    pub max_frame_bytes: usize,
}

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    token: Option<String>,
}

pub fn router(state: ChatState) -> Router {
    Router::new()
        .route("/chat", get(ws_upgrade).fallback(method_not_allowed))
        .route("/chat/messages", get(list_messages).fallback(method_not_allowed))
        .with_state(state)
}

async fn method_not_allowed() -> ApiError {
    ApiError::from_code(ErrorCode::MethodNotAllowed)
}

pub async fn ws_upgrade(
    State(state): State<ChatState>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    query: Result<Query<ChatQuery>, QueryRejection>,
) -> Response {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(reason = %rejection.body_text(), "rejecting non-upgradable chat request");
            return ApiError::from_code(ErrorCode::MethodNotAllowed).into_response();
        }
    };
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => {
            return ApiError::new(ErrorCode::ValidationFailed, "invalid query string")
                .with_details(json!({ "reason": rejection.body_text() }))
                .into_response();
        }
    };

    let identity = match resolve_identity(&state, query.token.as_deref()) {
        Ok(identity) => identity,
        Err(error) => return error.into_response(),
    };

    let hub = state.hub.clone();
    let request_id = request_id_from_headers_or_generate(&headers);
    ws.max_frame_size(state.max_frame_bytes)
        .max_message_size(state.max_frame_bytes)
        .on_failed_upgrade(|error| warn!(error = %error, "chat websocket upgrade failed"))
        .on_upgrade(move |socket| async move {
            with_request_id_scope(request_id, run_connection(hub, identity, socket)).await;
        })
}

/// A missing or blank token yields the guest identity; anything else must verify.
pub(crate) fn resolve_identity(
    state: &ChatState,
    token: Option<&str>,
) -> Result<Identity, ApiError> {
    match token.map(str::trim).filter(|token| !token.is_empty()) {
        None => Ok(Identity::guest(state.guest_username.to_string())),
        Some(token) => state.verifier.verify(token).map_err(|error| {
            warn!(error = %error, "rejecting chat connection with invalid token");
            ApiError::from(error)
        }),
    }
}

async fn run_connection(hub: Arc<ChatHub>, identity: Identity, socket: WebSocket) {
    let (mut sink, stream) = socket.split();
    let (connection, mut outbound) = ChatConnection::channel();
    let connection_id = connection.id();
    hub.register(connection, identity.clone()).await;

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    let reader_hub = hub.clone();
    let mut reader = tokio::spawn(async move {
        let inbound = stream.map(|frame| frame.map(inbound_frame));
        reader_hub.handle(connection_id, &identity, inbound).await;
    });

    let writer_finished = tokio::select! {
        result = &mut reader => {
            if let Err(join_error) = result {
                if join_error.is_panic() {
                    error!(%connection_id, "chat connection task panicked");
                }
            }
            false
        }
        _ = &mut writer => {
            reader.abort();
            true
        }
    };

    hub.unregister(connection_id).await;

    if !writer_finished
        && tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err()
    {
        writer.abort();
    }
}

fn inbound_frame(message: Message) -> InboundFrame {
    match message {
        Message::Text(text) => InboundFrame::Text(text.as_str().to_owned()),
        Message::Binary(bytes) => InboundFrame::Binary(bytes.to_vec()),
        Message::Ping(_) | Message::Pong(_) => InboundFrame::Control,
        Message::Close(_) => InboundFrame::Close,
    }
}

async fn list_messages(
    State(state): State<ChatState>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    state.hub.list_all().await.map(Json).map_err(|error| {
        error!(error = %error, "failed to list chat messages");
        ApiError::new(ErrorCode::InternalError, "error fetching messages")
    })
}
