//! completion-bridge: OpenAI Completions-compatible HTTP bridge.
//!
//! Accepts `/v1/completions` requests, forwards them to a hosted
//! text-generation backend, and reshapes the backend's fragment stream
//! into OpenAI responses: buffered, time-windowed `text/event-stream`
//! chunks, or a single JSON body with token usage.

pub mod backend;
pub mod completion;
pub mod config;
pub mod server;
