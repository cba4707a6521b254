//! Translate Anthropic Messages API requests into `OpenAI` Chat Completions requests.
//!
//! Handles system prompts, multi-part content (text, images), tool use, tool
//! results, and tool choice mapping. A single Anthropic message can expand
//! into multiple `OpenAI` messages (e.g. a user message with `tool_result`
//! blocks becomes separate `tool`-role messages), and messages that end up
//! with no content and no tool calls are dropped.

use crate::error::{ProxyError, Result};

use super::anthropic_types::{
    ContentBlock, ImageSource, Message, MessageContent, MessagesRequest, Role, ToolChoice,
    ToolChoiceAuto, ToolChoiceSpecific, ToolResultContent,
};
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatFunction, ChatMessage, ChatTool, ChatToolCall,
    ChatToolCallFunction, ChatToolChoice, ChatToolChoiceFunction, ChatToolChoiceSpecific,
    ContentPart, ImageUrlDetail, StopSequences, StreamOptions,
};

/// Upstream `max_tokens` ceiling.
const MAX_TOKENS_CAP: u64 = 8192;

/// Translate an Anthropic Messages API request into an `OpenAI` Chat
/// Completions request targeting `upstream_model`.
///
/// Pure except for the one noted failure: an image block whose source is
/// not inline base64 fails with [`ProxyError::InvalidImageSource`]. The
/// incoming Anthropic model name is discarded; upstream providers do not
/// understand it.
pub fn anthropic_to_openai(
    req: &MessagesRequest,
    upstream_model: &str,
) -> Result<ChatCompletionRequest> {
    let mut messages = Vec::new();

    if let Some(ref system) = req.system {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: Some(ChatContent::Text(system.as_text())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        });
    }

    for msg in &req.messages {
        let mut translated = translate_message(msg)?;
        messages.append(&mut translated);
    }

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| ChatTool {
                tool_type: "function".to_string(),
                function: ChatFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect::<Vec<_>>()
    });

    // When tools are declared, the upstream needs an explicit choice mode.
    let tool_choice = match (&req.tool_choice, &tools) {
        (Some(tc), _) => Some(translate_tool_choice(tc)),
        (None, Some(_)) => Some(ChatToolChoice::String("auto".to_string())),
        (None, None) => None,
    };

    let stop = req.stop_sequences.as_ref().map(|seqs| {
        if seqs.len() == 1 {
            StopSequences::One(seqs[0].clone())
        } else {
            StopSequences::Many(seqs.clone())
        }
    });

    let stream_options = req.stream.filter(|s| *s).map(|_| StreamOptions {
        include_usage: true,
    });

    let user = req.metadata.as_ref().and_then(|m| m.user_id.clone());

    Ok(ChatCompletionRequest {
        model: upstream_model.to_string(),
        messages,
        max_tokens: Some(req.max_tokens.min(MAX_TOKENS_CAP)),
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream,
        stream_options,
        tools,
        tool_choice,
        stop,
        user,
    })
}

/// Whether any cache-control annotation is present anywhere in the request.
/// Governs the `anthropic-beta` prompt-caching header on the egress request.
pub fn has_cache_control(req: &MessagesRequest) -> bool {
    if req.system.as_ref().is_some_and(|s| s.has_cache_control()) {
        return true;
    }

    let message_has = req.messages.iter().any(|m| {
        m.content.blocks().iter().any(|b| {
            matches!(
                b,
                ContentBlock::Text {
                    cache_control: Some(_),
                    ..
                }
            )
        })
    });
    if message_has {
        return true;
    }

    req.tools
        .as_ref()
        .is_some_and(|tools| tools.iter().any(|t| t.cache_control.is_some()))
}

/// A single Anthropic message can expand to multiple `OpenAI` messages
/// (e.g. a user message with `tool_result` blocks becomes separate
/// tool-role messages).
fn translate_message(msg: &Message) -> Result<Vec<ChatMessage>> {
    // Plain string content carries over verbatim, whitespace included.
    // Only block sequences go through the join-and-trim rendering below.
    if let MessageContent::Text(ref text) = msg.content {
        let role = match msg.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        return Ok(vec![ChatMessage {
            role: role.to_string(),
            content: Some(ChatContent::Text(text.clone())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }]);
    }

    let blocks = msg.content.blocks();

    match msg.role {
        Role::User => translate_user_message(&blocks),
        Role::Assistant => translate_assistant_message(&blocks),
    }
}

fn translate_user_message(blocks: &[ContentBlock]) -> Result<Vec<ChatMessage>> {
    let mut messages = Vec::new();
    let mut content_parts: Vec<ContentPart> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text, .. } => {
                content_parts.push(ContentPart::Text { text: text.clone() });
            }
            ContentBlock::Image { source } => {
                content_parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrlDetail {
                        url: image_data_url(source)?,
                        detail: None,
                    },
                });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                // Flush accumulated content as a user message first so the
                // upstream sees blocks in their original order.
                if !content_parts.is_empty() {
                    messages.push(user_message(collapse_content_parts(&content_parts)));
                    content_parts.clear();
                }

                messages.push(ChatMessage {
                    role: "tool".to_string(),
                    content: Some(ChatContent::Text(tool_result_to_string(content.as_ref())?)),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                    name: None,
                });
            }
            ContentBlock::Thinking { .. } | ContentBlock::ToolUse { .. } => {}
        }
    }

    if !content_parts.is_empty() {
        messages.push(user_message(collapse_content_parts(&content_parts)));
    }

    Ok(messages)
}

fn translate_assistant_message(blocks: &[ContentBlock]) -> Result<Vec<ChatMessage>> {
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text, .. } => {
                text_parts.push(text);
            }
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ChatToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: name.clone(),
                        arguments: serde_json::to_string(input)?,
                    },
                });
            }
            ContentBlock::Thinking { .. }
            | ContentBlock::Image { .. }
            | ContentBlock::ToolResult { .. } => {}
        }
    }

    let content = if text_parts.is_empty() {
        None
    } else {
        Some(ChatContent::Text(join_text(&text_parts)))
    };

    let tool_calls = if tool_calls.is_empty() {
        None
    } else {
        Some(tool_calls)
    };

    // Assistant messages with nothing to say and nothing to call are dropped.
    if content.is_none() && tool_calls.is_none() {
        return Ok(Vec::new());
    }

    Ok(vec![ChatMessage {
        role: "assistant".to_string(),
        content,
        tool_calls,
        tool_call_id: None,
        name: None,
    }])
}

fn user_message(content: ChatContent) -> ChatMessage {
    ChatMessage {
        role: "user".to_string(),
        content: Some(content),
        tool_calls: None,
        tool_call_id: None,
        name: None,
    }
}

/// Text-only part sequences collapse to a single joined string; anything
/// with an image stays a part list.
fn collapse_content_parts(parts: &[ContentPart]) -> ChatContent {
    let texts: Option<Vec<&str>> = parts
        .iter()
        .map(|p| match p {
            ContentPart::Text { text } => Some(text.as_str()),
            ContentPart::ImageUrl { .. } => None,
        })
        .collect();

    match texts {
        Some(texts) => ChatContent::Text(join_text(&texts)),
        None => ChatContent::Parts(parts.to_vec()),
    }
}

fn join_text(parts: &[&str]) -> String {
    parts.join("\n").trim().to_string()
}

fn image_data_url(source: &ImageSource) -> Result<String> {
    if source.source_type != "base64" {
        return Err(ProxyError::invalid_image_source(format!(
            "image source type \"{}\" is not supported; only inline base64 data can be forwarded",
            source.source_type
        )));
    }
    Ok(format!("data:{};base64,{}", source.media_type, source.data))
}

fn tool_result_to_string(content: Option<&ToolResultContent>) -> Result<String> {
    match content {
        Some(ToolResultContent::Text(t)) => Ok(t.clone()),
        Some(ToolResultContent::Blocks(blocks)) => Ok(serde_json::to_string(blocks)?),
        None => Ok(String::new()),
    }
}

fn translate_tool_choice(tc: &ToolChoice) -> ChatToolChoice {
    match tc {
        ToolChoice::Auto(ToolChoiceAuto { choice_type }) => match choice_type.as_str() {
            "any" => ChatToolChoice::String("required".to_string()),
            "none" => ChatToolChoice::String("none".to_string()),
            _ => ChatToolChoice::String("auto".to_string()),
        },
        ToolChoice::Specific(ToolChoiceSpecific { name, .. }) => {
            ChatToolChoice::Specific(ChatToolChoiceSpecific {
                choice_type: "function".to_string(),
                function: ChatToolChoiceFunction { name: name.clone() },
            })
        }
    }
}
