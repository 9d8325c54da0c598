//! Completion choices and the reducer that merges buffered fragments.
//!
//! The backend produces text one [`Fragment`] at a time. Fragments that
//! belong to the same choice are buffered and later merged into a single
//! [`Choice`] by [`reduce_choice`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::completion::CompletionError;

/// Per-token log-probability data, four index-aligned sequences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogProbs {
    pub tokens: Vec<String>,
    pub token_logprobs: Vec<f64>,
    pub top_logprobs: Vec<BTreeMap<String, f64>>,
    pub text_offset: Vec<usize>,
}

impl LogProbs {
    /// Append another set of log-probabilities after this one.
    fn extend(&mut self, other: &LogProbs) {
        self.tokens.extend(other.tokens.iter().cloned());
        self.token_logprobs.extend_from_slice(&other.token_logprobs);
        self.top_logprobs.extend(other.top_logprobs.iter().cloned());
        self.text_offset.extend_from_slice(&other.text_offset);
    }
}

/// One incremental piece of generated text.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub text: String,
    pub choice_index: usize,
    pub logprobs: Option<LogProbs>,
    pub finish_reason: Option<String>,
}

impl Fragment {
    /// A plain text fragment with no log-probabilities or finish reason.
    pub fn text(text: impl Into<String>, choice_index: usize) -> Self {
        Self {
            text: text.into(),
            choice_index,
            logprobs: None,
            finish_reason: None,
        }
    }
}

/// A completion choice as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub text: String,
    pub index: usize,
    pub logprobs: Option<LogProbs>,
    pub finish_reason: Option<String>,
}

/// Merge the buffered fragments of one choice into a single [`Choice`].
///
/// Text and log-probability arrays are concatenated in order. `index` and
/// `finish_reason` come from the last fragment, whatever earlier fragments
/// carried. `logprobs` is `None` unless at least one fragment had some.
pub fn reduce_choice(fragments: &[Fragment]) -> Result<Choice, CompletionError> {
    let last = fragments.last().ok_or(CompletionError::EmptyChoice)?;

    let text: String = fragments.iter().map(|f| f.text.as_str()).collect();

    let mut logprobs: Option<LogProbs> = None;
    for lp in fragments.iter().filter_map(|f| f.logprobs.as_ref()) {
        logprobs.get_or_insert_with(LogProbs::default).extend(lp);
    }

    Ok(Choice {
        text,
        index: last.choice_index,
        logprobs,
        finish_reason: last.finish_reason.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logprobs(token: &str, lp: f64, offset: usize) -> LogProbs {
        LogProbs {
            tokens: vec![token.to_string()],
            token_logprobs: vec![lp],
            top_logprobs: vec![BTreeMap::from([(token.to_string(), lp)])],
            text_offset: vec![offset],
        }
    }

    #[test]
    fn test_concatenates_text_in_order() {
        let frags = vec![
            Fragment::text("Hel", 0),
            Fragment::text("lo", 0),
            Fragment::text(" world", 0),
        ];
        let choice = reduce_choice(&frags).unwrap();
        assert_eq!(choice.text, "Hello world");
        assert_eq!(choice.index, 0);
        assert!(choice.logprobs.is_none());
        assert!(choice.finish_reason.is_none());
    }

    #[test]
    fn test_last_fragment_wins_index_and_finish_reason() {
        let mut first = Fragment::text("a", 3);
        first.finish_reason = Some("length".to_string());
        let second = Fragment::text("b", 7);

        let choice = reduce_choice(&[first, second]).unwrap();
        assert_eq!(choice.index, 7);
        // The earlier "length" is discarded.
        assert_eq!(choice.finish_reason, None);
    }

    #[test]
    fn test_logprobs_concatenated_skipping_fragments_without() {
        let mut a = Fragment::text("x", 0);
        a.logprobs = Some(logprobs("x", -0.5, 0));
        let b = Fragment::text("y", 0);
        let mut c = Fragment::text("z", 0);
        c.logprobs = Some(logprobs("z", -1.5, 2));

        let choice = reduce_choice(&[a, b, c]).unwrap();
        let lp = choice.logprobs.unwrap();
        assert_eq!(lp.tokens, vec!["x", "z"]);
        assert_eq!(lp.token_logprobs, vec![-0.5, -1.5]);
        assert_eq!(lp.text_offset, vec![0, 2]);
        assert_eq!(lp.top_logprobs.len(), 2);
    }

    #[test]
    fn test_empty_logprobs_still_present() {
        let mut a = Fragment::text("x", 0);
        a.logprobs = Some(LogProbs::default());
        let choice = reduce_choice(&[a]).unwrap();
        assert_eq!(choice.logprobs, Some(LogProbs::default()));
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let err = reduce_choice(&[]).unwrap_err();
        assert!(matches!(err, CompletionError::EmptyChoice));
    }

    #[test]
    fn test_wire_shape() {
        let choice = reduce_choice(&[Fragment::text("hi", 0)]).unwrap();
        let json = serde_json::to_string(&choice).unwrap();
        assert_eq!(
            json,
            r#"{"text":"hi","index":0,"logprobs":null,"finish_reason":null}"#
        );
    }
}
