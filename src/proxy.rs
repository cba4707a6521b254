//! Core proxy logic: forward Anthropic requests to the configured
//! OpenAI-compatible upstream and translate the replies back.
//!
//! Non-streaming replies go through the response transformer; streaming
//! replies are re-framed and run through the [`StreamTransducer`] on the
//! fly. Upstream 4xx responses are forwarded verbatim (the upstream's own
//! error envelope reaches the client); 5xx and transport failures are
//! re-wrapped in the Anthropic envelope.

use crate::config::ProxyConfig;
use crate::debug::DebugSink;
use crate::error::{ProxyError, Result};
use crate::translate::anthropic_types::{ErrorResponse, MessagesRequest, MessagesResponse};
use crate::translate::openai_types::{ChatCompletionResponse, ChatErrorResponse};
use crate::translate::request::{anthropic_to_openai, has_cache_control};
use crate::translate::response::{openai_error_to_anthropic, openai_to_anthropic};
use crate::translate::sse::{Frame, SseFramer};
use crate::translate::streaming::StreamTransducer;

use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;
use tracing::{info, warn};

const PROMPT_CACHING_BETA: &str = "prompt-caching-2024-07-31";

/// Outcome of proxying a non-streaming request.
pub enum ProxyOutcome {
    /// Successful response, translated to Anthropic format.
    Success(MessagesResponse),
    /// Upstream 4xx, forwarded with its original status and body.
    Forwarded { status: u16, body: Bytes },
    /// Upstream 5xx, re-wrapped; surfaces as HTTP 502.
    UpstreamError(ErrorResponse),
}

/// Outcome of setting up a streaming request. Setup failures happen before
/// any response header is written, so they can still change the HTTP status.
pub enum StreamOutcome {
    Stream(SseStream),
    Forwarded { status: u16, body: Bytes },
    UpstreamError(ErrorResponse),
}

/// A single SSE event ready for emission.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Stream of SSE events for a streaming response.
pub type SseStream =
    Pin<Box<dyn Stream<Item = std::result::Result<SseEvent, std::io::Error>> + Send>>;

/// Forward a non-streaming Anthropic request to the upstream.
pub async fn proxy_non_streaming(
    req: &MessagesRequest,
    config: &ProxyConfig,
    client: &reqwest::Client,
    client_credential: Option<&str>,
    request_id: &str,
    debug: &DebugSink,
) -> Result<ProxyOutcome> {
    let openai_req = anthropic_to_openai(req, &config.upstream.model)?;
    let url = chat_completions_url(config)?;

    info!(request_id, url = %url, model = %openai_req.model, "Forwarding request");

    if debug.is_enabled() {
        debug.record(request_id, "egress", &serde_json::to_value(&openai_req)?);
    }

    let response = client
        .post(&url)
        .header("Authorization", authorization(config, client_credential)?)
        .headers(beta_headers(req))
        .json(&openai_req)
        .send()
        .await
        .map_err(|e| ProxyError::upstream_unavailable(format!("Request failed: {e}")))?;

    let status = response.status().as_u16();
    let body = response
        .bytes()
        .await
        .map_err(|e| ProxyError::upstream_unavailable(format!("Failed to read response body: {e}")))?;

    if (400..500).contains(&status) {
        warn!(request_id, status, "Upstream client error, forwarding");
        return Ok(ProxyOutcome::Forwarded { status, body });
    }

    if status >= 500 {
        warn!(request_id, status, "Upstream server error");
        let envelope = match serde_json::from_slice::<ChatErrorResponse>(&body) {
            Ok(err) => openai_error_to_anthropic(&err),
            Err(_) => ErrorResponse::api_error(format!(
                "Upstream returned status {status}: {}",
                truncate_lossy(&body, 500)
            )),
        };
        return Ok(ProxyOutcome::UpstreamError(envelope));
    }

    let openai_resp: ChatCompletionResponse = serde_json::from_slice(&body).map_err(|e| {
        ProxyError::malformed_upstream(format!(
            "Failed to parse upstream response: {e}. Body: {}",
            truncate_lossy(&body, 300)
        ))
    })?;

    if debug.is_enabled() {
        debug.record(
            request_id,
            "upstream_response",
            &serde_json::to_value(&openai_resp)?,
        );
    }

    let anthropic_resp = openai_to_anthropic(&openai_resp)?;

    info!(
        request_id,
        input_tokens = anthropic_resp.usage.input_tokens,
        output_tokens = anthropic_resp.usage.output_tokens,
        "Request completed"
    );

    Ok(ProxyOutcome::Success(anthropic_resp))
}

/// Forward a streaming Anthropic request, returning a stream of Anthropic
/// SSE events translated on the fly.
pub async fn proxy_streaming(
    req: &MessagesRequest,
    config: &ProxyConfig,
    client: &reqwest::Client,
    client_credential: Option<&str>,
    request_id: &str,
    debug: &DebugSink,
) -> Result<StreamOutcome> {
    let openai_req = anthropic_to_openai(req, &config.upstream.model)?;
    let url = chat_completions_url(config)?;

    info!(request_id, url = %url, model = %openai_req.model, "Forwarding request (streaming)");

    if debug.is_enabled() {
        debug.record(request_id, "egress", &serde_json::to_value(&openai_req)?);
    }

    let response = client
        .post(&url)
        .header("Authorization", authorization(config, client_credential)?)
        .headers(beta_headers(req))
        .json(&openai_req)
        .send()
        .await
        .map_err(|e| ProxyError::upstream_unavailable(format!("Streaming request failed: {e}")))?;

    let status = response.status().as_u16();

    if (400..500).contains(&status) {
        let body = response.bytes().await.unwrap_or_default();
        warn!(request_id, status, "Upstream client error, forwarding");
        return Ok(StreamOutcome::Forwarded { status, body });
    }

    if status >= 500 {
        let body = response.bytes().await.unwrap_or_default();
        warn!(request_id, status, "Upstream server error");
        let envelope = match serde_json::from_slice::<ChatErrorResponse>(&body) {
            Ok(err) => openai_error_to_anthropic(&err),
            Err(_) => ErrorResponse::api_error(format!("Upstream returned status {status}")),
        };
        return Ok(StreamOutcome::UpstreamError(envelope));
    }

    let fallback_model = req.model.clone();
    let request_id = request_id.to_string();
    let byte_stream = response.bytes_stream();

    Ok(StreamOutcome::Stream(Box::pin(translate_byte_stream(
        byte_stream,
        fallback_model,
        request_id,
    ))))
}

/// Run the upstream SSE byte stream through the framer and the transducer,
/// yielding Anthropic SSE events.
///
/// A clean end of stream closes through the transducer's normal
/// finalization; a transport failure mid-stream closes through the aborted
/// path, which forces `stop_reason: end_turn`. The transducer's `stopped`
/// guard makes the final flush a no-op when `[DONE]` already closed the
/// stream.
fn translate_byte_stream<E>(
    byte_stream: impl Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    fallback_model: String,
    request_id: String,
) -> impl Stream<Item = std::result::Result<SseEvent, std::io::Error>> + Send + 'static
where
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut framer = SseFramer::new();
        let mut transducer = StreamTransducer::new(&fallback_model);

        tokio::pin!(byte_stream);

        'read: while let Some(chunk_result) = byte_stream.next().await {
            let bytes = match chunk_result {
                Ok(b) => b,
                Err(e) => {
                    warn!(request_id = %request_id, error = %e, "Upstream byte stream failed");
                    // The buffered partial line is from a broken transport;
                    // drop it and emit the aborted protocol tail.
                    for event in transducer.finish_aborted() {
                        if let Some(sse) = to_sse_event(&event) {
                            yield Ok(sse);
                        }
                    }
                    return;
                }
            };

            for frame in framer.push(&bytes) {
                match frame {
                    Frame::Chunk(chunk) => {
                        for event in transducer.push_chunk(&chunk) {
                            if let Some(sse) = to_sse_event(&event) {
                                yield Ok(sse);
                            }
                        }
                    }
                    Frame::Done => {
                        for event in transducer.finish() {
                            if let Some(sse) = to_sse_event(&event) {
                                yield Ok(sse);
                            }
                        }
                        break 'read;
                    }
                }
            }
        }

        // End of stream: flush any residual frame, then close the protocol.
        for frame in framer.finish() {
            if let Frame::Chunk(chunk) = frame {
                for event in transducer.push_chunk(&chunk) {
                    if let Some(sse) = to_sse_event(&event) {
                        yield Ok(sse);
                    }
                }
            }
        }
        for event in transducer.finish() {
            if let Some(sse) = to_sse_event(&event) {
                yield Ok(sse);
            }
        }

        info!(request_id = %request_id, "Stream completed");
    }
}

fn to_sse_event(event: &crate::translate::anthropic_types::StreamEvent) -> Option<SseEvent> {
    let data = serde_json::to_string(event).ok()?;
    Some(SseEvent {
        event: event.event_name().to_string(),
        data,
    })
}

fn chat_completions_url(config: &ProxyConfig) -> Result<String> {
    Ok(format!("{}/chat/completions", config.effective_base_url()?))
}

/// Authorization header value: the configured upstream key, or the client's
/// forwarded credential (`Bearer `-prefixed when absent).
fn authorization(config: &ProxyConfig, client_credential: Option<&str>) -> Result<String> {
    if let Some(key) = config.resolve_api_key()? {
        return Ok(format!("Bearer {key}"));
    }

    match client_credential {
        Some(cred) if cred.starts_with("Bearer ") => Ok(cred.to_string()),
        Some(cred) => Ok(format!("Bearer {cred}")),
        None => Err(ProxyError::config(
            "No upstream API key configured and no client credential to forward",
        )),
    }
}

/// Prompt-caching directives do not change the request body, but upstreams
/// that honor them are told via the beta header.
fn beta_headers(req: &MessagesRequest) -> reqwest::header::HeaderMap {
    let mut headers = reqwest::header::HeaderMap::new();
    if has_cache_control(req) {
        headers.insert(
            "anthropic-beta",
            reqwest::header::HeaderValue::from_static(PROMPT_CACHING_BETA),
        );
    }
    headers
}

fn truncate_lossy(bytes: &Bytes, max: usize) -> String {
    let s = String::from_utf8_lossy(bytes);
    if s.len() <= max {
        s.into_owned()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DebugConfig, UpstreamConfig};
    use crate::translate::anthropic_types::{
        CacheControl, Message, MessageContent, Role, SystemBlock, SystemContent,
    };
    use std::collections::HashMap;

    fn config() -> ProxyConfig {
        ProxyConfig {
            port: 0,
            upstream: UpstreamConfig {
                provider: None,
                base_url: Some("https://upstream.example/v1".to_string()),
                api_key_env: None,
                model: "gpt-4o".to_string(),
            },
            debug: DebugConfig::default(),
        }
    }

    fn request() -> MessagesRequest {
        MessagesRequest {
            model: "claude-3-5-sonnet-20241022".to_string(),
            max_tokens: 16,
            messages: vec![Message {
                role: Role::User,
                content: MessageContent::Text("Hi".to_string()),
            }],
            system: None,
            stream: None,
            temperature: None,
            top_p: None,
            top_k: None,
            tools: None,
            tool_choice: None,
            metadata: None,
            stop_sequences: None,
            extra: HashMap::default(),
        }
    }

    #[test]
    fn test_chat_completions_url() {
        assert_eq!(
            chat_completions_url(&config()).unwrap(),
            "https://upstream.example/v1/chat/completions"
        );
    }

    #[test]
    fn test_client_credential_gets_bearer_prefix() {
        let cfg = config();
        assert_eq!(
            authorization(&cfg, Some("sk-raw-key")).unwrap(),
            "Bearer sk-raw-key"
        );
        assert_eq!(
            authorization(&cfg, Some("Bearer sk-raw-key")).unwrap(),
            "Bearer sk-raw-key"
        );
        assert!(authorization(&cfg, None).is_err());
    }

    #[test]
    fn test_beta_header_only_with_cache_control() {
        let mut req = request();
        assert!(beta_headers(&req).is_empty());

        req.system = Some(SystemContent::Blocks(vec![SystemBlock::Text {
            text: "S".to_string(),
            cache_control: Some(CacheControl {
                control_type: "ephemeral".to_string(),
                ttl: None,
            }),
        }]));

        let headers = beta_headers(&req);
        assert_eq!(
            headers.get("anthropic-beta").unwrap(),
            PROMPT_CACHING_BETA
        );
    }

    #[tokio::test]
    async fn test_translated_stream_ends_with_protocol_tail() {
        // A hand-fed upstream body exercises framer + transducer end to end.
        let body: Vec<std::result::Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::from_static(
                b"data: {\"id\":\"c\",\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"},\"finish_reason\":null}]}\n",
            )),
            Ok(Bytes::from_static(b"data: [DONE]\n")),
        ];

        let stream = translate_byte_stream(
            futures::stream::iter(body),
            "claude-3-5-sonnet-20241022".to_string(),
            "req-test".to_string(),
        );

        let events: Vec<String> = stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|r| r.unwrap().event)
            .collect();

        assert_eq!(
            events,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }

    #[tokio::test]
    async fn test_truncated_stream_still_closes_protocol() {
        // Upstream dies without [DONE] or finish_reason.
        let body: Vec<std::result::Result<Bytes, std::io::Error>> = vec![Ok(Bytes::from_static(
            b"data: {\"id\":\"c\",\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"},\"finish_reason\":null}]}\n",
        ))];

        let stream = translate_byte_stream(
            futures::stream::iter(body),
            "m".to_string(),
            "req-test".to_string(),
        );

        let events: Vec<String> = stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|r| r.unwrap().event)
            .collect();

        assert_eq!(events.last().map(String::as_str), Some("message_stop"));
        assert!(events.contains(&"message_delta".to_string()));
    }

    #[tokio::test]
    async fn test_transport_error_during_tool_block_closes_with_end_turn() {
        // The connection drops while a tool block is open. The tail must
        // still be a well-formed protocol close, and the stop_reason is
        // end_turn rather than tool_use.
        let body: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(
                b"data: {\"id\":\"c\",\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"t1\",\"function\":{\"name\":\"f\",\"arguments\":\"{\\\"a\\\":\"}}]},\"finish_reason\":null}]}\n",
            )),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )),
        ];

        let stream = translate_byte_stream(
            futures::stream::iter(body),
            "m".to_string(),
            "req-test".to_string(),
        );

        let events: Vec<SseEvent> = stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let names: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        let delta = events
            .iter()
            .find(|e| e.event == "message_delta")
            .expect("message_delta present");
        let payload: serde_json::Value = serde_json::from_str(&delta.data).unwrap();
        assert_eq!(payload["delta"]["stop_reason"], "end_turn");
    }
}
