//! HTTP server providing an OpenAI-compatible API.
//!
//! - [`openai_api`]: Routes, handlers and the JSON error shape
//! - [`streaming`]: SSE encoding of streamed completions

pub mod openai_api;
pub mod streaming;
