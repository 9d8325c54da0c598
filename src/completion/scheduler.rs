//! Time-windowed buffering for streamed completions.
//!
//! Each choice index owns a buffer and a window start. A fragment is
//! appended to its choice's buffer; once the window has been open longer
//! than the maximum interval the buffer is reduced into one [`Choice`] and
//! the window restarts. Whatever is left is flushed by [`StreamScheduler::finish`].

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::completion::choice::{reduce_choice, Choice, Fragment};
use crate::completion::CompletionError;

/// Default buffering window.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_millis(50);

/// Buffer and window start for one choice index.
#[derive(Debug)]
struct ChoiceWindow {
    index: usize,
    buffer: Vec<Fragment>,
    started: Instant,
}

/// Per-request stream scheduler state.
#[derive(Debug)]
pub struct StreamScheduler {
    max_interval: Duration,
    /// Windows in the order their choice index was first seen.
    windows: Vec<ChoiceWindow>,
}

impl StreamScheduler {
    pub fn new(max_interval: Duration) -> Self {
        Self {
            max_interval,
            windows: Vec::new(),
        }
    }

    /// Buffer a fragment that arrived at `now`.
    ///
    /// Returns the reduced choice when this fragment closes its window.
    pub fn push(
        &mut self,
        fragment: Fragment,
        now: Instant,
    ) -> Result<Option<Choice>, CompletionError> {
        let index = fragment.choice_index;
        let pos = match self.windows.iter().position(|w| w.index == index) {
            Some(pos) => pos,
            None => {
                self.windows.push(ChoiceWindow {
                    index,
                    buffer: Vec::new(),
                    started: now,
                });
                self.windows.len() - 1
            }
        };

        let window = &mut self.windows[pos];
        window.buffer.push(fragment);

        // Whole milliseconds, strictly greater than the interval.
        let elapsed = now.saturating_duration_since(window.started);
        if elapsed.as_millis() <= self.max_interval.as_millis() {
            return Ok(None);
        }

        let choice = reduce_choice(&window.buffer)?;
        debug!(
            index,
            fragments = window.buffer.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Flushing choice window"
        );
        window.buffer.clear();
        window.started = now;
        Ok(Some(choice))
    }

    /// Flush every non-empty buffer, in first-seen order.
    pub fn finish(self) -> Result<Vec<Choice>, CompletionError> {
        self.windows
            .iter()
            .filter(|w| !w.buffer.is_empty())
            .map(|w| reduce_choice(&w.buffer))
            .collect()
    }

    /// Number of fragments currently buffered across all choices.
    pub fn pending(&self) -> usize {
        self.windows.iter().map(|w| w.buffer.len()).sum()
    }
}

impl Default for StreamScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_INTERVAL)
    }
}
