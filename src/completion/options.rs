//! Request option parsing.
//!
//! Options may arrive in the query string, the JSON body, or both. Each
//! key of a declared schema is looked up in the query string first (the
//! string is coerced to the declared type) and then in the body (the JSON
//! value must already have that type). Keys that are missing or fail to
//! coerce are left out; callers apply their own defaults.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::completion::CompletionError;

/// Declared type of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Str,
    Int,
    Float,
    Bool,
}

/// A coerced option value.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Option schema of `/v1/completions`.
pub const COMPLETION_SCHEMA: &[(&str, OptionKind)] = &[
    ("model", OptionKind::Str),
    ("prompt", OptionKind::Str),
    ("min_tokens", OptionKind::Int),
    ("max_tokens", OptionKind::Int),
    ("temperature", OptionKind::Float),
    ("top_p", OptionKind::Float),
    ("n", OptionKind::Int),
    ("stream", OptionKind::Bool),
    ("logprobs", OptionKind::Int),
    ("echo", OptionKind::Bool),
];

/// Parsed options, keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options(BTreeMap<String, OptionValue>);

impl Options {
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(OptionValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(OptionValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        match self.0.get(key) {
            Some(OptionValue::Float(f)) => Some(*f),
            _ => None,
        }
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key) {
            Some(OptionValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }
}

/// Truthy strings are `yes`, `true` and `1`, in any case.
pub fn is_true(value: &str) -> bool {
    ["yes", "true", "1"]
        .iter()
        .any(|t| value.eq_ignore_ascii_case(t))
}

/// Collapse raw query pairs into a map, keeping the first value of a
/// repeated key.
pub fn first_values(pairs: Vec<(String, String)>) -> HashMap<String, String> {
    let mut query = HashMap::with_capacity(pairs.len());
    for (key, value) in pairs {
        query.entry(key).or_insert(value);
    }
    query
}

/// Parse a request body leniently: an empty or malformed body, or one
/// that is not a JSON object, counts as no payload.
pub fn parse_payload(body: &[u8]) -> Option<serde_json::Map<String, Value>> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn coerce_query(kind: OptionKind, raw: &str) -> Option<OptionValue> {
    match kind {
        OptionKind::Str => Some(OptionValue::Str(raw.to_string())),
        OptionKind::Int => raw.trim().parse().ok().map(OptionValue::Int),
        OptionKind::Float => raw.trim().parse().ok().map(OptionValue::Float),
        OptionKind::Bool => Some(OptionValue::Bool(is_true(raw))),
    }
}

fn coerce_json(kind: OptionKind, value: &Value) -> Option<OptionValue> {
    match (kind, value) {
        (OptionKind::Str, Value::String(s)) => Some(OptionValue::Str(s.clone())),
        (OptionKind::Int, Value::Number(n)) => n.as_i64().map(OptionValue::Int),
        // Integers are accepted where a float is expected.
        (OptionKind::Float, Value::Number(n)) => n.as_f64().map(OptionValue::Float),
        (OptionKind::Bool, Value::Bool(b)) => Some(OptionValue::Bool(*b)),
        _ => None,
    }
}

/// Resolve `schema` against the query parameters and the JSON body.
pub fn parse_options(
    schema: &[(&str, OptionKind)],
    query: &HashMap<String, String>,
    payload: Option<&serde_json::Map<String, Value>>,
) -> Options {
    let mut options = BTreeMap::new();

    for &(key, kind) in schema {
        let value = match query.get(key) {
            Some(raw) => coerce_query(kind, raw),
            None => payload
                .and_then(|p| p.get(key))
                .and_then(|v| coerce_json(kind, v)),
        };
        if let Some(value) = value {
            options.insert(key.to_string(), value);
        }
    }

    Options(options)
}

/// Typed completion parameters, with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionParams {
    pub model: String,
    pub prompt: String,
    pub min_tokens: Option<u32>,
    pub max_tokens: Option<u32>,
    pub temperature: f64,
    pub top_p: f64,
    pub n: Option<u32>,
    pub stream: bool,
    pub logprobs: Option<u32>,
    pub echo: bool,
}

pub const DEFAULT_TEMPERATURE: f64 = 1.0;
pub const DEFAULT_TOP_P: f64 = 0.95;

impl CompletionParams {
    /// Apply defaults to parsed options. `default_model` is used when the
    /// request names no model.
    pub fn from_options(
        options: &Options,
        default_model: Option<&str>,
    ) -> Result<Self, CompletionError> {
        let model = options
            .str("model")
            .or(default_model)
            .filter(|m| !m.is_empty())
            .ok_or(CompletionError::MissingModel)?
            .to_string();

        let count = |key: &str| options.int(key).and_then(|v| u32::try_from(v).ok());

        Ok(Self {
            model,
            prompt: options.str("prompt").unwrap_or_default().to_string(),
            min_tokens: count("min_tokens"),
            max_tokens: count("max_tokens"),
            temperature: options.float("temperature").unwrap_or(DEFAULT_TEMPERATURE),
            top_p: options.float("top_p").unwrap_or(DEFAULT_TOP_P),
            n: count("n"),
            stream: options.bool("stream").unwrap_or(false),
            logprobs: count("logprobs"),
            echo: options.bool("echo").unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn body(v: Value) -> serde_json::Map<String, Value> {
        match v {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_is_true() {
        for v in ["yes", "TRUE", "True", "1"] {
            assert!(is_true(v), "{v}");
        }
        for v in ["no", "false", "0", "", "y", "on", " yes ", "true\n"] {
            assert!(!is_true(v), "{v}");
        }
    }

    #[test]
    fn test_padded_truthy_query_is_false() {
        let q = query(&[("stream", " yes ")]);
        let opts = parse_options(COMPLETION_SCHEMA, &q, None);
        assert_eq!(opts.bool("stream"), Some(false));
    }

    #[test]
    fn test_first_values_keeps_first() {
        let pairs = vec![
            ("temperature".to_string(), "0.1".to_string()),
            ("top_p".to_string(), "0.5".to_string()),
            ("temperature".to_string(), "0.9".to_string()),
        ];
        let q = first_values(pairs);
        assert_eq!(q.len(), 2);
        assert_eq!(q["temperature"], "0.1");
        assert_eq!(q["top_p"], "0.5");
    }

    #[test]
    fn test_query_wins_over_body() {
        let q = query(&[("temperature", "0.5")]);
        let b = body(json!({"temperature": 1.0}));
        let opts = parse_options(COMPLETION_SCHEMA, &q, Some(&b));
        assert_eq!(opts.float("temperature"), Some(0.5));
    }

    #[test]
    fn test_query_bool_override() {
        let q = query(&[("stream", "yes")]);
        let b = body(json!({"stream": "true"}));
        let opts = parse_options(COMPLETION_SCHEMA, &q, Some(&b));
        assert_eq!(opts.bool("stream"), Some(true));
    }

    #[test]
    fn test_body_types_must_match() {
        let b = body(json!({
            "stream": "true",
            "max_tokens": 1.5,
            "prompt": 3,
            "n": 2,
            "top_p": 1,
            "echo": true,
        }));
        let opts = parse_options(COMPLETION_SCHEMA, &HashMap::new(), Some(&b));
        assert!(!opts.contains("stream"));
        assert!(!opts.contains("max_tokens"));
        assert!(!opts.contains("prompt"));
        assert_eq!(opts.int("n"), Some(2));
        assert_eq!(opts.float("top_p"), Some(1.0));
        assert_eq!(opts.bool("echo"), Some(true));
        assert_eq!(opts.len(), 3);
    }

    #[test]
    fn test_invalid_query_number_is_omitted() {
        let q = query(&[("max_tokens", "lots")]);
        let b = body(json!({"max_tokens": 16}));
        let opts = parse_options(COMPLETION_SCHEMA, &q, Some(&b));
        assert!(!opts.contains("max_tokens"));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let q = query(&[("frequency_penalty", "2")]);
        let b = body(json!({"suffix": "x"}));
        let opts = parse_options(COMPLETION_SCHEMA, &q, Some(&b));
        assert!(opts.is_empty());
    }

    #[test]
    fn test_malformed_payload_is_absent() {
        assert!(parse_payload(b"{not json").is_none());
        assert!(parse_payload(b"").is_none());
        assert!(parse_payload(b"[1, 2]").is_none());
        assert!(parse_payload(br#"{"prompt": "hi"}"#).is_some());
    }

    #[test]
    fn test_params_defaults() {
        let opts = parse_options(COMPLETION_SCHEMA, &query(&[("model", "a/b")]), None);
        let params = CompletionParams::from_options(&opts, None).unwrap();
        assert_eq!(params.model, "a/b");
        assert_eq!(params.prompt, "");
        assert_eq!(params.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(params.top_p, DEFAULT_TOP_P);
        assert_eq!(params.max_tokens, None);
        assert!(!params.stream);
    }

    #[test]
    fn test_params_model_fallback() {
        let opts = Options::default();
        let params = CompletionParams::from_options(&opts, Some("owner/model")).unwrap();
        assert_eq!(params.model, "owner/model");

        let err = CompletionParams::from_options(&opts, None).unwrap_err();
        assert!(matches!(err, CompletionError::MissingModel));
    }

    #[test]
    fn test_params_negative_counts_dropped() {
        let opts = parse_options(
            COMPLETION_SCHEMA,
            &query(&[("model", "m"), ("max_tokens", "-4")]),
            None,
        );
        let params = CompletionParams::from_options(&opts, None).unwrap();
        assert_eq!(params.max_tokens, None);
    }
}
