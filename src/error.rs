//! Error types for the proxy.
//!
//! Every error that can surface to an HTTP client maps onto the Anthropic
//! error envelope via [`ProxyError::to_error_response`], and onto an HTTP
//! status via [`ProxyError::http_status`].

use thiserror::Error;

use crate::translate::anthropic_types::ErrorResponse;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    /// The incoming request failed validation. `path` names the first
    /// offending field (e.g. `messages.0.content`).
    #[error("{message}")]
    InvalidRequest {
        path: Option<String>,
        message: String,
    },

    /// An image block carried a source the upstream cannot ingest
    /// (anything other than inline base64).
    #[error("Invalid image source: {message}")]
    InvalidImageSource { message: String },

    /// Tool-call arguments in the upstream reply were not valid JSON.
    #[error("Malformed tool arguments for '{name}': {message}")]
    MalformedToolArguments { name: String, message: String },

    /// The upstream returned non-JSON or shape-mismatched JSON.
    #[error("Malformed upstream response: {message}")]
    MalformedUpstream { message: String },

    /// The upstream could not be reached or returned a 5xx.
    #[error("Upstream unavailable: {message}")]
    UpstreamUnavailable { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ProxyError {
    pub fn invalid_request(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            path: Some(path.into()),
            message: msg.into(),
        }
    }

    pub fn invalid_body(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            path: None,
            message: msg.into(),
        }
    }

    pub fn invalid_image_source(msg: impl Into<String>) -> Self {
        Self::InvalidImageSource {
            message: msg.into(),
        }
    }

    pub fn malformed_tool_arguments(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::MalformedToolArguments {
            name: name.into(),
            message: msg.into(),
        }
    }

    pub fn malformed_upstream(msg: impl Into<String>) -> Self {
        Self::MalformedUpstream {
            message: msg.into(),
        }
    }

    pub fn upstream_unavailable(msg: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// HTTP status this error surfaces as when it reaches a client.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest { .. } | Self::InvalidImageSource { .. } => 400,
            Self::MalformedToolArguments { .. }
            | Self::MalformedUpstream { .. }
            | Self::UpstreamUnavailable { .. }
            | Self::Http(_) => 502,
            Self::Config { .. } | Self::Io(_) | Self::Json(_) | Self::Toml(_) => 500,
        }
    }

    /// Anthropic-shaped error envelope for this error.
    pub fn to_error_response(&self) -> ErrorResponse {
        match self {
            Self::InvalidRequest { path, message } => {
                let resp = ErrorResponse::invalid_request(message.clone());
                match path {
                    Some(p) => resp.with_param(p.clone()),
                    None => resp,
                }
            }
            Self::InvalidImageSource { .. } => ErrorResponse::invalid_request(self.to_string()),
            Self::MalformedToolArguments { .. }
            | Self::MalformedUpstream { .. }
            | Self::UpstreamUnavailable { .. }
            | Self::Http(_) => ErrorResponse::api_error(self.to_string()),
            _ => ErrorResponse::api_error(self.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_carries_param() {
        let err = ProxyError::invalid_request("messages.0.content", "must not be empty");
        assert_eq!(err.http_status(), 400);

        let envelope = err.to_error_response();
        assert_eq!(envelope.error.error_type, "invalid_request_error");
        assert_eq!(envelope.error.param.as_deref(), Some("messages.0.content"));
    }

    #[test]
    fn test_upstream_errors_map_to_502() {
        assert_eq!(ProxyError::upstream_unavailable("down").http_status(), 502);
        assert_eq!(ProxyError::malformed_upstream("not json").http_status(), 502);
        assert_eq!(
            ProxyError::malformed_tool_arguments("f", "bad json").http_status(),
            502
        );
    }
}
