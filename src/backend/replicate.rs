//! Replicate predictions API adapter.
//!
//! A completion becomes one streaming prediction:
//! 1. `POST /predictions` (or `/models/{owner}/{name}/predictions`) with
//!    `"stream": true`
//! 2. `GET urls.stream` as `text/event-stream`, decoded with `eventsource-stream`
//! 3. Every `output` event becomes one fragment; `done` ends the sequence
//!
//! The fragment stream owns a cancel guard. Dropping the stream before
//! `done` cancels the prediction upstream.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, FragmentStream, GenerationBackend, GenerationRequest};
use crate::completion::choice::Fragment;
use crate::config::BackendConfig;

/// Where a prediction for a model reference is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredictionTarget {
    /// `owner/name:version` or a bare version id.
    Version(String),
    /// `owner/name`, served by the model's latest deployment.
    Model { owner: String, name: String },
}

impl PredictionTarget {
    pub fn parse(model: &str) -> Result<Self, BackendError> {
        let invalid = || BackendError::InvalidModel(model.to_string());

        if let Some((path, version)) = model.rsplit_once(':') {
            let (owner, name) = path.split_once('/').ok_or_else(invalid)?;
            if owner.is_empty() || name.is_empty() || version.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::Version(version.to_string()));
        }

        match model.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::Model {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            None if !model.is_empty() && model.chars().all(|c| c.is_ascii_hexdigit()) => {
                Ok(Self::Version(model.to_string()))
            }
            _ => Err(invalid()),
        }
    }

    fn url(&self, api_base: &str) -> String {
        let base = api_base.trim_end_matches('/');
        match self {
            Self::Version(_) => format!("{base}/predictions"),
            Self::Model { owner, name } => format!("{base}/models/{owner}/{name}/predictions"),
        }
    }

    fn version(&self) -> Option<&str> {
        match self {
            Self::Version(v) => Some(v),
            Self::Model { .. } => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct PredictionInput<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_length: Option<u32>,
    temperature: f64,
    top_p: f64,
}

#[derive(Debug, Serialize)]
struct CreatePrediction<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'a str>,
    input: PredictionInput<'a>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    urls: PredictionUrls,
}

#[derive(Debug, Default, Deserialize)]
struct PredictionUrls {
    stream: Option<String>,
    cancel: Option<String>,
}

/// Replicate-backed text generation.
pub struct ReplicateBackend {
    client: reqwest::Client,
    api_base: String,
    api_token: String,
}

impl ReplicateBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let api_token = config
            .api_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(BackendError::MissingToken)?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.clone(),
            api_token,
        })
    }

    async fn create_prediction(&self, request: &GenerationRequest) -> Result<Prediction, BackendError> {
        let target = PredictionTarget::parse(&request.model)?;
        let body = CreatePrediction {
            version: target.version(),
            input: PredictionInput {
                prompt: &request.prompt,
                max_length: request.max_length,
                temperature: request.temperature,
                top_p: request.top_p,
            },
            stream: true,
        };

        let response = self
            .client
            .post(target.url(&self.api_base))
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let prediction: Prediction = response.json().await?;
        if prediction.status.as_deref() == Some("failed") {
            let message = prediction
                .error
                .as_ref()
                .map(error_message)
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(BackendError::Prediction(message));
        }
        Ok(prediction)
    }
}

#[async_trait]
impl GenerationBackend for ReplicateBackend {
    async fn generate(&self, request: GenerationRequest) -> Result<FragmentStream, BackendError> {
        let prediction = self.create_prediction(&request).await?;
        info!(
            prediction_id = prediction.id,
            model = request.model,
            "Prediction created"
        );

        let guard = CancelGuard {
            client: self.client.clone(),
            token: self.api_token.clone(),
            prediction_id: prediction.id.clone(),
            cancel_url: prediction.urls.cancel.clone(),
        };

        let stream_url = prediction
            .urls
            .stream
            .ok_or_else(|| BackendError::StreamingUnsupported(request.model.clone()))?;

        let response = self
            .client
            .get(&stream_url)
            .bearer_auth(&self.api_token)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(fragment_stream(response.bytes_stream().eventsource().boxed(), guard))
    }
}

/// Cancels an unfinished prediction when dropped.
struct CancelGuard {
    client: reqwest::Client,
    token: String,
    prediction_id: String,
    cancel_url: Option<String>,
}

impl CancelGuard {
    /// The prediction reached a terminal state; nothing to cancel.
    fn disarm(&mut self) {
        self.cancel_url = None;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        let Some(url) = self.cancel_url.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(prediction_id = self.prediction_id, "No runtime to cancel prediction");
            return;
        };

        let client = self.client.clone();
        let token = std::mem::take(&mut self.token);
        let prediction_id = std::mem::take(&mut self.prediction_id);
        handle.spawn(async move {
            match client.post(&url).bearer_auth(&token).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(prediction_id, "Prediction canceled");
                }
                Ok(resp) => {
                    warn!(prediction_id, status = resp.status().as_u16(), "Cancel rejected");
                }
                Err(e) => warn!(prediction_id, "Cancel failed: {e}"),
            }
        });
    }
}

type UpstreamEvents = BoxStream<'static, Result<Event, EventStreamError<reqwest::Error>>>;

struct StreamState {
    events: UpstreamEvents,
    guard: CancelGuard,
    finished: bool,
}

/// What one upstream event means for the fragment sequence.
enum Step {
    Fragment(Fragment),
    Failed(BackendError),
    Done,
    Skip,
}

fn interpret(event: Event) -> Step {
    match event.event.as_str() {
        "output" => Step::Fragment(Fragment::text(event.data, 0)),
        "error" => Step::Failed(BackendError::Prediction(error_text(&event.data))),
        "done" => {
            let reason = serde_json::from_str::<Value>(&event.data)
                .ok()
                .and_then(|v| v.get("reason").and_then(Value::as_str).map(str::to_string));
            match reason.as_deref() {
                Some("canceled") => Step::Failed(BackendError::Prediction("prediction was canceled".into())),
                Some("error") => Step::Failed(BackendError::Prediction("prediction failed".into())),
                _ => Step::Done,
            }
        }
        _ => Step::Skip,
    }
}

fn upstream_error(err: EventStreamError<reqwest::Error>) -> BackendError {
    match err {
        EventStreamError::Transport(e) => BackendError::Http(e),
        other => BackendError::Malformed(other.to_string()),
    }
}

fn fragment_stream(events: UpstreamEvents, guard: CancelGuard) -> FragmentStream {
    let state = StreamState {
        events,
        guard,
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if st.finished {
                return None;
            }

            let event = match st.events.next().await {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(upstream_error(e)), st));
                }
                None => {
                    st.finished = true;
                    let err = BackendError::Malformed("event stream closed before completion".into());
                    return Some((Err(err), st));
                }
            };

            match interpret(event) {
                Step::Fragment(fragment) => return Some((Ok(fragment), st)),
                Step::Failed(err) => {
                    st.finished = true;
                    st.guard.disarm();
                    return Some((Err(err), st));
                }
                Step::Done => {
                    st.finished = true;
                    st.guard.disarm();
                    return None;
                }
                Step::Skip => continue,
            }
        }
    }))
}

/// Error events carry either a JSON string or plain text.
fn error_text(data: &str) -> String {
    match serde_json::from_str::<Value>(data) {
        Ok(value) => error_message(&value),
        Err(_) => data.to_string(),
    }
}

fn error_message(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("detail")
            .or_else(|| map.get("message"))
            .or_else(|| map.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}
