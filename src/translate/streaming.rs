//! State machine for translating `OpenAI` streaming chunks into Anthropic
//! SSE events.
//!
//! The [`StreamTransducer`] consumes `OpenAI` [`ChatCompletionChunk`]s one at
//! a time and emits the richer Anthropic event protocol: it synthesizes the
//! `message_start` / `message_stop` envelope and the `content_block_start` /
//! `content_block_stop` brackets that have no counterpart in the flat delta
//! stream, assembles incrementally streamed tool-call arguments, and tracks
//! the content-block index.
//!
//! Usage:
//!
//! ```ignore
//! let mut transducer = StreamTransducer::new("claude-3-5-sonnet-20241022");
//! for chunk in upstream_chunks {
//!     for event in transducer.push_chunk(&chunk) { /* write SSE */ }
//! }
//! for event in transducer.finish() { /* write SSE */ }
//! ```

use std::collections::HashMap;

use super::anthropic_types::{
    Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, ResponseContentBlock, StreamEvent, Usage,
};
use super::openai_types::{ChatCompletionChunk, ChunkToolCall};

/// Which kind of content block is currently open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveBlock {
    None,
    Text,
    Tool,
}

/// Accumulated state for one upstream tool call, keyed by its upstream
/// index. Arguments that arrive before the name are buffered here and
/// replayed as a single delta once the block can be opened.
#[derive(Debug, Default)]
struct ToolRow {
    id: Option<String>,
    name: Option<String>,
    pending_args: String,
    block_index: usize,
    started: bool,
}

/// Translates one upstream chat-completion stream into one Anthropic event
/// stream. State is per-request; feed chunks with [`push_chunk`] and close
/// with [`finish`].
///
/// [`push_chunk`]: StreamTransducer::push_chunk
/// [`finish`]: StreamTransducer::finish
#[derive(Debug)]
pub struct StreamTransducer {
    fallback_model: String,
    started: bool,
    stopped: bool,
    active_block: ActiveBlock,
    block_index: usize,
    tool_table: HashMap<u64, ToolRow>,
    input_tokens: u64,
    output_tokens: u64,
    saw_tool_calls: bool,
    finish_reason: Option<String>,
    synthesized_ids: usize,
}

impl StreamTransducer {
    /// `fallback_model` is reported in `message_start` only when the stream
    /// ends before the upstream ever identified itself.
    pub fn new(fallback_model: &str) -> Self {
        Self {
            fallback_model: fallback_model.to_string(),
            started: false,
            stopped: false,
            active_block: ActiveBlock::None,
            block_index: 0,
            tool_table: HashMap::new(),
            input_tokens: 0,
            output_tokens: 0,
            saw_tool_calls: false,
            finish_reason: None,
            synthesized_ids: 0,
        }
    }

    /// Process a single upstream chunk, returning zero or more Anthropic
    /// events. Chunks arriving after finalization are ignored.
    pub fn push_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
        if self.stopped {
            return Vec::new();
        }

        let mut events = Vec::new();

        if !self.started {
            events.push(self.message_start(Some(chunk)));
            self.started = true;
        }

        if let Some(ref usage) = chunk.usage {
            self.input_tokens = usage.prompt_tokens;
            self.output_tokens = usage.completion_tokens;
        }

        let Some(choice) = chunk.choices.first() else {
            return events;
        };

        if let Some(text) = choice.delta.content.as_deref().filter(|s| !s.is_empty()) {
            self.push_text(text, &mut events);
        }

        if let Some(ref tool_calls) = choice.delta.tool_calls {
            for tc in tool_calls {
                self.push_tool_call(tc, &mut events);
            }
        }

        if let Some(ref reason) = choice.finish_reason {
            self.finish_reason = Some(reason.clone());
            events.append(&mut self.finalize(false));
        }

        events
    }

    /// Close the stream cleanly: called on `[DONE]` or upstream
    /// end-of-stream. Emits the full protocol tail, including a synthesized
    /// `message_start` when the upstream died before producing any chunk.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        self.close(false)
    }

    /// Close the stream after an upstream transport failure. Emits the same
    /// protocol tail as [`finish`], but the synthesized `stop_reason` is
    /// always `end_turn`, even when a tool block was open.
    ///
    /// [`finish`]: StreamTransducer::finish
    pub fn finish_aborted(&mut self) -> Vec<StreamEvent> {
        self.close(true)
    }

    fn close(&mut self, aborted: bool) -> Vec<StreamEvent> {
        if self.stopped {
            return Vec::new();
        }

        let mut events = Vec::new();
        if !self.started {
            events.push(self.message_start(None));
            self.started = true;
        }
        events.append(&mut self.finalize(aborted));
        events
    }

    fn push_text(&mut self, text: &str, events: &mut Vec<StreamEvent>) {
        if self.active_block == ActiveBlock::Tool {
            events.push(StreamEvent::ContentBlockStop {
                index: self.block_index,
            });
            self.block_index += 1;
            self.active_block = ActiveBlock::None;
        }

        if self.active_block != ActiveBlock::Text {
            events.push(StreamEvent::ContentBlockStart {
                index: self.block_index,
                content_block: ResponseContentBlock::Text {
                    text: String::new(),
                },
            });
            self.active_block = ActiveBlock::Text;
        }

        events.push(StreamEvent::ContentBlockDelta {
            index: self.block_index,
            delta: Delta::TextDelta {
                text: text.to_string(),
            },
        });
    }

    fn push_tool_call(&mut self, tc: &ChunkToolCall, events: &mut Vec<StreamEvent>) {
        let fragment = tc
            .function
            .as_ref()
            .and_then(|f| f.arguments.as_deref())
            .unwrap_or("");

        let row = self.tool_table.entry(tc.index).or_default();

        if let Some(ref id) = tc.id {
            row.id = Some(id.clone());
        }
        if let Some(name) = tc.function.as_ref().and_then(|f| f.name.as_deref()) {
            row.name = Some(name.to_string());
        }

        let was_started = row.started;
        if was_started {
            if !fragment.is_empty() {
                let index = row.block_index;
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: Delta::InputJsonDelta {
                        partial_json: fragment.to_string(),
                    },
                });
            }
            return;
        }

        // Not yet started: buffer arguments until the name is known.
        row.pending_args.push_str(fragment);

        let Some(name) = row.name.clone() else {
            return;
        };

        // The name just became known: close whatever block is open and
        // open this tool's block at the next index.
        let pending = std::mem::take(&mut row.pending_args);
        let existing_id = row.id.clone();

        if self.active_block != ActiveBlock::None {
            events.push(StreamEvent::ContentBlockStop {
                index: self.block_index,
            });
            self.block_index += 1;
        }

        let id = existing_id.unwrap_or_else(|| {
            self.synthesized_ids += 1;
            format!("toolu_{}", self.synthesized_ids)
        });

        if let Some(row) = self.tool_table.get_mut(&tc.index) {
            row.id = Some(id.clone());
            row.block_index = self.block_index;
            row.started = true;
        }
        self.active_block = ActiveBlock::Tool;
        self.saw_tool_calls = true;

        events.push(StreamEvent::ContentBlockStart {
            index: self.block_index,
            content_block: ResponseContentBlock::ToolUse {
                id,
                name,
                input: serde_json::Value::Object(serde_json::Map::new()),
            },
        });

        if !pending.is_empty() {
            events.push(StreamEvent::ContentBlockDelta {
                index: self.block_index,
                delta: Delta::InputJsonDelta {
                    partial_json: pending,
                },
            });
        }
    }

    fn finalize(&mut self, aborted: bool) -> Vec<StreamEvent> {
        if self.stopped {
            return Vec::new();
        }
        self.stopped = true;

        let mut events = Vec::new();

        if self.active_block != ActiveBlock::None {
            events.push(StreamEvent::ContentBlockStop {
                index: self.block_index,
            });
            self.active_block = ActiveBlock::None;
        }

        let stop_reason = if aborted {
            "end_turn"
        } else {
            match self.finish_reason.as_deref() {
                Some("length") => "max_tokens",
                _ if self.saw_tool_calls => "tool_use",
                _ => "end_turn",
            }
        };

        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(stop_reason.to_string()),
                stop_sequence: None,
            },
            usage: DeltaUsage {
                input_tokens: self.input_tokens,
                output_tokens: self.output_tokens,
            },
        });

        events.push(StreamEvent::MessageStop);

        events
    }

    fn message_start(&self, chunk: Option<&ChatCompletionChunk>) -> StreamEvent {
        let (id, model) = match chunk {
            Some(c) => (c.id.clone(), c.model.clone()),
            None => (
                format!("msg_{}", uuid::Uuid::new_v4().simple()),
                self.fallback_model.clone(),
            ),
        };

        StreamEvent::MessageStart {
            message: MessagesResponse {
                id,
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model,
                stop_reason: None,
                stop_sequence: None,
                usage: Usage {
                    input_tokens: self.input_tokens,
                    output_tokens: self.output_tokens,
                    cache_creation_input_tokens: None,
                    cache_read_input_tokens: None,
                },
            },
        }
    }
}
