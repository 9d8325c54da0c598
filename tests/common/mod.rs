//! Shared helpers: an in-memory backend that plays back a script.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;

use completion_bridge::backend::{BackendError, FragmentStream, GenerationBackend, GenerationRequest};
use completion_bridge::completion::choice::Fragment;
use completion_bridge::completion::response::ResponseTemplate;

#[derive(Debug, Clone)]
pub enum Step {
    Emit(Fragment),
    Wait(Duration),
    Fail(String),
    /// Never yield again.
    Hang,
}

pub fn emit(text: &str, index: usize) -> Step {
    Step::Emit(Fragment::text(text, index))
}

pub fn wait_ms(ms: u64) -> Step {
    Step::Wait(Duration::from_millis(ms))
}

/// Sets its flag when the fragment stream holding it is dropped.
struct ReleaseFlag(Arc<AtomicBool>);

impl Drop for ReleaseFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Turn a script into a fragment stream.
pub fn scripted(steps: Vec<Step>) -> FragmentStream {
    scripted_with_flag(steps, Arc::new(AtomicBool::new(false)))
}

pub fn scripted_with_flag(steps: Vec<Step>, released: Arc<AtomicBool>) -> FragmentStream {
    let state = (steps.into_iter(), ReleaseFlag(released));
    Box::pin(stream::unfold(state, |(mut steps, flag)| async move {
        loop {
            match steps.next()? {
                Step::Emit(fragment) => return Some((Ok(fragment), (steps, flag))),
                Step::Wait(d) => tokio::time::sleep(d).await,
                Step::Fail(message) => {
                    return Some((Err(BackendError::Prediction(message)), (steps, flag)))
                }
                Step::Hang => std::future::pending::<()>().await,
            }
        }
    }))
}

pub struct ScriptedBackend {
    script: Vec<Step>,
    fail_on_start: Option<String>,
    pub requests: Mutex<Vec<GenerationRequest>>,
    pub released: Arc<AtomicBool>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            fail_on_start: None,
            requests: Mutex::new(Vec::new()),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn failing(message: &str) -> Self {
        let mut backend = Self::new(Vec::new());
        backend.fail_on_start = Some(message.to_string());
        backend
    }

    pub fn last_request(&self) -> GenerationRequest {
        self.requests.lock().unwrap().last().cloned().expect("no request recorded")
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(&self, request: GenerationRequest) -> Result<FragmentStream, BackendError> {
        self.requests.lock().unwrap().push(request);
        if let Some(message) = &self.fail_on_start {
            return Err(BackendError::Prediction(message.clone()));
        }
        Ok(scripted_with_flag(self.script.clone(), self.released.clone()))
    }
}

pub fn template() -> ResponseTemplate {
    ResponseTemplate {
        id: "cmpl-000000000000000000000000".to_string(),
        created: 1_700_000_000,
        model: "default".to_string(),
    }
}
