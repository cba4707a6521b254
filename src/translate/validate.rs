//! Ingress validation for Anthropic Messages API requests.
//!
//! [`validate`] parses a raw JSON body into a typed [`MessagesRequest`] and
//! checks every field against the schema. Validation is total: a request is
//! either fully accepted or rejected with an `invalid_request_error` naming
//! the first offending path (e.g. `messages.0.content`).

use crate::error::{ProxyError, Result};

use super::anthropic_types::{
    CacheControl, ContentBlock, MessageContent, MessagesRequest, SystemBlock, SystemContent,
    ToolChoice, ToolResultContent,
};

/// Cache-control TTL bounds, in seconds.
const CACHE_TTL_MIN: u64 = 60;
const CACHE_TTL_MAX: u64 = 3600;

/// Parse and validate an incoming request body.
pub fn validate(body: &[u8]) -> Result<MessagesRequest> {
    let req: MessagesRequest = serde_json::from_slice(body)
        .map_err(|e| ProxyError::invalid_body(format!("Invalid request body: {e}")))?;
    validate_request(&req)?;
    Ok(req)
}

/// Check a parsed request against the schema constraints.
pub fn validate_request(req: &MessagesRequest) -> Result<()> {
    if req.model.is_empty() {
        return Err(ProxyError::invalid_request(
            "model",
            "model must be a non-empty string",
        ));
    }

    if req.max_tokens == 0 {
        return Err(ProxyError::invalid_request(
            "max_tokens",
            "max_tokens must be at least 1",
        ));
    }

    if req.messages.is_empty() {
        return Err(ProxyError::invalid_request(
            "messages",
            "messages must be a non-empty array",
        ));
    }

    if let Some(temp) = req.temperature {
        if !(0.0..=1.0).contains(&temp) {
            return Err(ProxyError::invalid_request(
                "temperature",
                format!("temperature must be between 0 and 1, got {temp}"),
            ));
        }
    }

    if let Some(top_p) = req.top_p {
        if !(0.0..=1.0).contains(&top_p) {
            return Err(ProxyError::invalid_request(
                "top_p",
                format!("top_p must be between 0 and 1, got {top_p}"),
            ));
        }
    }

    if let Some(top_k) = req.top_k {
        if top_k == 0 {
            return Err(ProxyError::invalid_request(
                "top_k",
                "top_k must be at least 1",
            ));
        }
    }

    if let Some(ref system) = req.system {
        validate_system(system)?;
    }

    for (i, msg) in req.messages.iter().enumerate() {
        if let MessageContent::Blocks(ref blocks) = msg.content {
            for (j, block) in blocks.iter().enumerate() {
                validate_block(block, &format!("messages.{i}.content.{j}"))?;
            }
        }
    }

    if let Some(ref tools) = req.tools {
        for (k, tool) in tools.iter().enumerate() {
            if tool.name.is_empty() {
                return Err(ProxyError::invalid_request(
                    format!("tools.{k}.name"),
                    "tool name must not be empty",
                ));
            }
            if let Some(schema_type) = tool.input_schema.get("type").and_then(|t| t.as_str()) {
                if schema_type != "object" {
                    return Err(ProxyError::invalid_request(
                        format!("tools.{k}.input_schema.type"),
                        format!("input_schema.type must be \"object\", got \"{schema_type}\""),
                    ));
                }
            }
            validate_cache_control(
                tool.cache_control.as_ref(),
                &format!("tools.{k}.cache_control"),
            )?;
        }
    }

    if let Some(ToolChoice::Specific(ref specific)) = req.tool_choice {
        if specific.name.is_empty() {
            return Err(ProxyError::invalid_request(
                "tool_choice.name",
                "tool_choice name must not be empty",
            ));
        }
    }

    Ok(())
}

fn validate_system(system: &SystemContent) -> Result<()> {
    if let SystemContent::Blocks(ref blocks) = system {
        for (i, block) in blocks.iter().enumerate() {
            let SystemBlock::Text { cache_control, .. } = block;
            validate_cache_control(cache_control.as_ref(), &format!("system.{i}.cache_control"))?;
        }
    }
    Ok(())
}

fn validate_block(block: &ContentBlock, path: &str) -> Result<()> {
    match block {
        ContentBlock::Text { cache_control, .. } => {
            validate_cache_control(cache_control.as_ref(), &format!("{path}.cache_control"))
        }
        ContentBlock::Image { source } => {
            if source.source_type != "base64" {
                return Err(ProxyError::invalid_request(
                    format!("{path}.source.type"),
                    format!("image source type must be \"base64\", got \"{}\"", source.source_type),
                ));
            }
            if source.media_type.is_empty() {
                return Err(ProxyError::invalid_request(
                    format!("{path}.source.media_type"),
                    "image media_type must not be empty",
                ));
            }
            Ok(())
        }
        ContentBlock::ToolUse { id, name, .. } => {
            if id.is_empty() {
                return Err(ProxyError::invalid_request(
                    format!("{path}.id"),
                    "tool_use id must not be empty",
                ));
            }
            if name.is_empty() {
                return Err(ProxyError::invalid_request(
                    format!("{path}.name"),
                    "tool_use name must not be empty",
                ));
            }
            Ok(())
        }
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            ..
        } => {
            // A tool_result referencing an id with no prior tool_use is
            // still forwarded; the upstream message just loses its linkage.
            if tool_use_id.is_empty() {
                return Err(ProxyError::invalid_request(
                    format!("{path}.tool_use_id"),
                    "tool_result tool_use_id must not be empty",
                ));
            }
            if let Some(ToolResultContent::Blocks(ref blocks)) = content {
                for (j, inner) in blocks.iter().enumerate() {
                    validate_block(inner, &format!("{path}.content.{j}"))?;
                }
            }
            Ok(())
        }
        ContentBlock::Thinking { .. } => Ok(()),
    }
}

fn validate_cache_control(cc: Option<&CacheControl>, path: &str) -> Result<()> {
    if let Some(cc) = cc {
        if let Some(ttl) = cc.ttl {
            if !(CACHE_TTL_MIN..=CACHE_TTL_MAX).contains(&ttl) {
                return Err(ProxyError::invalid_request(
                    format!("{path}.ttl"),
                    format!("cache_control ttl must be between {CACHE_TTL_MIN} and {CACHE_TTL_MAX} seconds, got {ttl}"),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(json: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json).unwrap()
    }

    fn assert_param(err: ProxyError, expected: &str) {
        match err {
            ProxyError::InvalidRequest { path, .. } => {
                assert_eq!(path.as_deref(), Some(expected));
            }
            other => panic!("Expected InvalidRequest, got {other:?}"),
        }
    }

    #[test]
    fn test_accepts_minimal_request() {
        let req = validate(&body(serde_json::json!({
            "model": "claude-3-5-sonnet-20241022",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": "Hi"}],
        })))
        .unwrap();

        assert_eq!(req.model, "claude-3-5-sonnet-20241022");
        assert_eq!(req.messages.len(), 1);
    }

    #[test]
    fn test_rejects_non_json() {
        let err = validate(b"not json").unwrap_err();
        assert!(matches!(err, ProxyError::InvalidRequest { path: None, .. }));
    }

    #[test]
    fn test_rejects_empty_model() {
        let err = validate(&body(serde_json::json!({
            "model": "",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": "Hi"}],
        })))
        .unwrap_err();
        assert_param(err, "model");
    }

    #[test]
    fn test_rejects_zero_max_tokens() {
        let err = validate(&body(serde_json::json!({
            "model": "m",
            "max_tokens": 0,
            "messages": [{"role": "user", "content": "Hi"}],
        })))
        .unwrap_err();
        assert_param(err, "max_tokens");
    }

    #[test]
    fn test_rejects_empty_messages() {
        let err = validate(&body(serde_json::json!({
            "model": "m",
            "max_tokens": 1,
            "messages": [],
        })))
        .unwrap_err();
        assert_param(err, "messages");
    }

    #[test]
    fn test_rejects_out_of_range_temperature() {
        let err = validate(&body(serde_json::json!({
            "model": "m",
            "max_tokens": 1,
            "messages": [{"role": "user", "content": "Hi"}],
            "temperature": 1.5,
        })))
        .unwrap_err();
        assert_param(err, "temperature");
    }

    #[test]
    fn test_rejects_non_base64_image_with_path() {
        let err = validate(&body(serde_json::json!({
            "model": "m",
            "max_tokens": 1,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "Look:"},
                    {"type": "image", "source": {"type": "url", "media_type": "image/jpeg", "data": "https://example.com/x.jpg"}},
                ],
            }],
        })))
        .unwrap_err();
        assert_param(err, "messages.0.content.1.source.type");
    }

    #[test]
    fn test_rejects_cache_ttl_out_of_bounds() {
        let err = validate(&body(serde_json::json!({
            "model": "m",
            "max_tokens": 1,
            "messages": [{"role": "user", "content": "Hi"}],
            "system": [
                {"type": "text", "text": "S", "cache_control": {"type": "ephemeral", "ttl": 30}},
            ],
        })))
        .unwrap_err();
        assert_param(err, "system.0.cache_control.ttl");
    }

    #[test]
    fn test_accepts_cache_ttl_in_bounds() {
        let req = validate(&body(serde_json::json!({
            "model": "m",
            "max_tokens": 1,
            "messages": [{"role": "user", "content": "Hi"}],
            "system": [
                {"type": "text", "text": "S", "cache_control": {"type": "ephemeral", "ttl": 300}},
            ],
        })))
        .unwrap();
        assert!(req.system.unwrap().has_cache_control());
    }

    #[test]
    fn test_rejects_bad_tool_schema_type() {
        let err = validate(&body(serde_json::json!({
            "model": "m",
            "max_tokens": 1,
            "messages": [{"role": "user", "content": "Hi"}],
            "tools": [{"name": "f", "input_schema": {"type": "array"}}],
        })))
        .unwrap_err();
        assert_param(err, "tools.0.input_schema.type");
    }

    #[test]
    fn test_unknown_tool_result_id_is_not_rejected() {
        // The request is forwarded; only the upstream linkage is lost.
        let req = validate(&body(serde_json::json!({
            "model": "m",
            "max_tokens": 1,
            "messages": [{
                "role": "user",
                "content": [{"type": "tool_result", "tool_use_id": "toolu_never_seen", "content": "ok"}],
            }],
        })));
        assert!(req.is_ok());
    }
}
