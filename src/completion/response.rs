//! Response bodies for `/v1/completions`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::completion::choice::Choice;

/// Payload of the final stream event.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Per-request response header, stamped onto every emitted body.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseTemplate {
    pub id: String,
    pub created: u64,
    pub model: String,
}

impl ResponseTemplate {
    /// Build a template with a fresh `cmpl-` id and the current time.
    pub fn new(model: impl Into<String>) -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("cmpl-{}", &hex[..24]),
            created: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            model: model.into(),
        }
    }

    /// A response body carrying `choices` and no usage record.
    pub fn response(&self, choices: Vec<Choice>) -> CompletionResponse {
        CompletionResponse {
            id: self.id.clone(),
            object: "text_completion".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices,
            usage: None,
        }
    }
}

/// Completion response, used both for stream chunks and the JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl Usage {
    /// Prompt tokens are not counted; they are always reported as zero.
    pub fn completion_only(completion_tokens: usize) -> Self {
        Self {
            prompt_tokens: 0,
            completion_tokens,
            total_tokens: completion_tokens,
        }
    }
}

/// One event of a streamed completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A flushed choice wrapped in the response template.
    Chunk(CompletionResponse),
    /// End-of-stream marker.
    Done,
}

impl StreamEvent {
    /// The `data:` payload of this event.
    pub fn data(&self) -> serde_json::Result<String> {
        match self {
            StreamEvent::Chunk(body) => serde_json::to_string(body),
            StreamEvent::Done => Ok(DONE_SENTINEL.to_string()),
        }
    }
}
