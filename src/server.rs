use crate::config::ProxyConfig;
use crate::debug::DebugSink;
use crate::error::ProxyError;
use crate::proxy::{self, ProxyOutcome, StreamOutcome};
use crate::translate::anthropic_types::{ErrorResponse, MessagesRequest};
use crate::translate::validate::validate;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub client: reqwest::Client,
    pub debug: DebugSink,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/messages", post(handle_messages))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().simple());

    let req = match validate(&body) {
        Ok(r) => r,
        Err(e) => {
            error!(request_id = %request_id, error = %e, "Request rejected");
            return error_response(&e);
        }
    };

    if state.debug.is_enabled() {
        if let Ok(payload) = serde_json::to_value(&req) {
            state.debug.record(&request_id, "ingress", &payload);
        }
    }

    let is_streaming = req.stream.unwrap_or(false);
    let credential = client_credential(&headers);

    info!(
        request_id = %request_id,
        model = %req.model,
        streaming = is_streaming,
        messages = req.messages.len(),
        "Handling request"
    );

    if is_streaming {
        handle_streaming(state, &req, credential.as_deref(), &request_id).await
    } else {
        handle_non_streaming(state, &req, credential.as_deref(), &request_id).await
    }
}

async fn handle_non_streaming(
    state: Arc<AppState>,
    req: &MessagesRequest,
    credential: Option<&str>,
    request_id: &str,
) -> Response {
    let result = proxy::proxy_non_streaming(
        req,
        &state.config,
        &state.client,
        credential,
        request_id,
        &state.debug,
    )
    .await;

    match result {
        Ok(ProxyOutcome::Success(resp)) => Json(resp).into_response(),
        Ok(ProxyOutcome::Forwarded { status, body }) => forwarded_response(status, body),
        Ok(ProxyOutcome::UpstreamError(envelope)) => {
            (StatusCode::BAD_GATEWAY, Json(envelope)).into_response()
        }
        Err(e) => {
            error!(request_id, error = %e, "Proxy error");
            error_response(&e)
        }
    }
}

async fn handle_streaming(
    state: Arc<AppState>,
    req: &MessagesRequest,
    credential: Option<&str>,
    request_id: &str,
) -> Response {
    let result = proxy::proxy_streaming(
        req,
        &state.config,
        &state.client,
        credential,
        request_id,
        &state.debug,
    )
    .await;

    let sse_stream = match result {
        Ok(StreamOutcome::Stream(s)) => s,
        Ok(StreamOutcome::Forwarded { status, body }) => return forwarded_response(status, body),
        Ok(StreamOutcome::UpstreamError(envelope)) => {
            return (StatusCode::BAD_GATEWAY, Json(envelope)).into_response();
        }
        Err(e) => {
            error!(request_id, error = %e, "Streaming setup error");
            return error_response(&e);
        }
    };

    let event_stream = sse_stream.map(|result| -> std::result::Result<Event, Infallible> {
        match result {
            Ok(sse_event) => Ok(Event::default().event(sse_event.event).data(sse_event.data)),
            Err(_) => Ok(Event::default().event("error").data("{}")),
        }
    });

    let mut response = Sse::new(event_stream)
        .keep_alive(axum::response::sse::KeepAlive::default())
        .into_response();
    response.headers_mut().insert(
        axum::http::header::CACHE_CONTROL,
        axum::http::HeaderValue::from_static("no-cache"),
    );
    response
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Client credential from `Authorization` or `x-api-key`, verbatim.
fn client_credential(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .or_else(|| headers.get("x-api-key"))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn error_response(err: &ProxyError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err.to_error_response())).into_response()
}

/// An upstream 4xx body passed through untouched.
fn forwarded_response(status: u16, body: Bytes) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| {
            let envelope = ErrorResponse::api_error("Failed to forward upstream error");
            (StatusCode::BAD_GATEWAY, Json(envelope)).into_response()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_credential_prefers_authorization() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer sk-123".parse().unwrap(),
        );
        headers.insert("x-api-key", "sk-456".parse().unwrap());

        assert_eq!(client_credential(&headers).as_deref(), Some("Bearer sk-123"));
    }

    #[test]
    fn test_client_credential_falls_back_to_api_key() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "sk-456".parse().unwrap());

        assert_eq!(client_credential(&headers).as_deref(), Some("sk-456"));
    }
}
