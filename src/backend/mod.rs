//! Remote text-generation backends.
//!
//! - [`replicate`]: Replicate predictions API adapter

pub mod replicate;

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::Stream;
use thiserror::Error;

use crate::completion::choice::Fragment;
use crate::completion::options::CompletionParams;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Prediction failed: {0}")]
    Prediction(String),

    #[error("Model {0} does not support streaming output")]
    StreamingUnsupported(String),

    #[error("Invalid model reference: {0}")]
    InvalidModel(String),

    #[error("Malformed upstream payload: {0}")]
    Malformed(String),

    #[error("No API token configured (set REPLICATE_API_TOKEN)")]
    MissingToken,
}

/// Lazy, ordered sequence of generated fragments. Dropping it releases
/// the upstream generation.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<Fragment, BackendError>> + Send>>;

/// Normalized parameters passed to a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Backend model identifier.
    pub model: String,
    pub prompt: String,
    /// Maximum generated length, if the client asked for one.
    pub max_length: Option<u32>,
    pub temperature: f64,
    pub top_p: f64,
}

impl From<&CompletionParams> for GenerationRequest {
    fn from(params: &CompletionParams) -> Self {
        Self {
            model: params.model.clone(),
            prompt: params.prompt.clone(),
            max_length: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
        }
    }
}

/// A producer of generated text fragments.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Start a generation. Errors before the first fragment are returned
    /// here; later ones are yielded by the stream.
    async fn generate(&self, request: GenerationRequest) -> Result<FragmentStream, BackendError>;
}
