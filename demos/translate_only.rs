//! Demonstrate using the translation layer without a server.
//!
//! Usage:
//!   `cargo run --example translate_only`

use claude_bridge::translate::anthropic_types::{
    Message, MessageContent, MessagesRequest, Role, SystemContent,
};
use claude_bridge::translate::openai_types::{
    ChatCompletionChunk, ChatCompletionResponse, ChatUsage, Choice, ChoiceMessage, ChunkChoice,
    ChunkDelta,
};
use claude_bridge::translate::request::anthropic_to_openai;
use claude_bridge::translate::response::openai_to_anthropic;
use claude_bridge::translate::streaming::StreamTransducer;
use std::collections::HashMap;

fn main() {
    // Build an Anthropic Messages API request
    let anthropic_req = MessagesRequest {
        model: "claude-3-5-sonnet-20241022".to_string(),
        max_tokens: 1024,
        messages: vec![
            Message {
                role: Role::User,
                content: MessageContent::Text("What is the capital of France?".to_string()),
            },
            Message {
                role: Role::Assistant,
                content: MessageContent::Text("The capital of France is Paris.".to_string()),
            },
            Message {
                role: Role::User,
                content: MessageContent::Text("And Germany?".to_string()),
            },
        ],
        system: Some(SystemContent::Text(
            "You are a geography expert. Be concise.".to_string(),
        )),
        stream: Some(true),
        temperature: Some(0.7),
        top_p: None,
        top_k: None,
        tools: None,
        tool_choice: None,
        metadata: None,
        stop_sequences: None,
        extra: HashMap::default(),
    };

    // Translate to OpenAI format
    let openai_req = anthropic_to_openai(&anthropic_req, "gpt-4o").unwrap();

    println!("=== Translated Request (OpenAI format) ===");
    println!("{}", serde_json::to_string_pretty(&openai_req).unwrap());

    // Simulate an OpenAI response and translate back
    let openai_resp = ChatCompletionResponse {
        id: "chatcmpl-demo".to_string(),
        object: "chat.completion".to_string(),
        created: 0,
        model: "gpt-4o".to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content: Some("The capital of Germany is Berlin.".to_string()),
                tool_calls: None,
            },
            finish_reason: Some("stop".to_string()),
        }],
        usage: Some(ChatUsage {
            prompt_tokens: 42,
            completion_tokens: 8,
            total_tokens: 50,
        }),
    };

    let anthropic_resp = openai_to_anthropic(&openai_resp).unwrap();

    println!();
    println!("=== Translated Response (Anthropic format) ===");
    println!("{}", serde_json::to_string_pretty(&anthropic_resp).unwrap());

    // Demonstrate the streaming transducer
    println!();
    println!("=== Streaming Translation Demo ===");

    let mut transducer = StreamTransducer::new("claude-3-5-sonnet-20241022");

    let chunks = vec![
        ChunkDelta {
            role: Some("assistant".to_string()),
            content: Some("The".to_string()),
            tool_calls: None,
        },
        ChunkDelta {
            role: None,
            content: Some(" capital".to_string()),
            tool_calls: None,
        },
        ChunkDelta {
            role: None,
            content: Some(" is Berlin.".to_string()),
            tool_calls: None,
        },
    ];

    for (i, delta) in chunks.into_iter().enumerate() {
        let chunk = ChatCompletionChunk {
            id: "chatcmpl-demo".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "gpt-4o".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: None,
            }],
            usage: None,
        };

        for event in transducer.push_chunk(&chunk) {
            println!("  chunk {} -> event: {}", i, event.event_name());
        }
    }

    let finish_chunk = ChatCompletionChunk {
        id: "chatcmpl-demo".to_string(),
        object: "chat.completion.chunk".to_string(),
        created: 0,
        model: "gpt-4o".to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta: ChunkDelta::default(),
            finish_reason: Some("stop".to_string()),
        }],
        usage: None,
    };

    for event in transducer.push_chunk(&finish_chunk) {
        println!("  finish -> event: {}", event.event_name());
    }

    println!();
    println!("Done! The translation layer works without any network calls.");
}
