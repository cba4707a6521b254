//! Protocol translation between the Anthropic Messages API and the
//! `OpenAI` Chat Completions API.
//!
//! The core of the proxy: ingress validation, request and response
//! conversion, SSE framing, and the streaming transducer. All conversion
//! functions are pure (no I/O); the transducer is stateful but per-request.

pub mod anthropic_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod sse;
pub mod streaming;
pub mod validate;
