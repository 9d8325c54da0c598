//! Non-streaming aggregation: buffer everything, merge once at the end.

use crate::completion::choice::{reduce_choice, Fragment};
use crate::completion::response::{CompletionResponse, ResponseTemplate, Usage};
use crate::completion::CompletionError;

/// Collects every fragment of a request, grouped by choice index.
#[derive(Debug, Default)]
pub struct ChoiceAggregator {
    /// Buffers in the order their choice index was first seen.
    buffers: Vec<(usize, Vec<Fragment>)>,
    completion_tokens: usize,
}

impl ChoiceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer one fragment. Each fragment counts as one completion token.
    pub fn push(&mut self, fragment: Fragment) {
        self.completion_tokens += 1;
        let index = fragment.choice_index;
        match self.buffers.iter_mut().find(|(i, _)| *i == index) {
            Some((_, buffer)) => buffer.push(fragment),
            None => self.buffers.push((index, vec![fragment])),
        }
    }

    pub fn completion_tokens(&self) -> usize {
        self.completion_tokens
    }

    /// Merge every buffer and attach the usage record.
    pub fn finish(self, template: &ResponseTemplate) -> Result<CompletionResponse, CompletionError> {
        let choices = self
            .buffers
            .iter()
            .filter(|(_, buffer)| !buffer.is_empty())
            .map(|(_, buffer)| reduce_choice(buffer))
            .collect::<Result<Vec<_>, _>>()?;

        let mut body = template.response(choices);
        body.usage = Some(Usage::completion_only(self.completion_tokens));
        Ok(body)
    }
}
