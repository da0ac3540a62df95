//! Sampling rules as delivered by the backend.
//!
//! A [`SamplingConfig`] is immutable once built. The sampler replaces it
//! wholesale; nothing in this crate mutates an installed config.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};

use crate::provider::ConfigError;
use crate::record::AttributeValue;

/// A regular expression source, compiled lazily by the [`Matcher`](crate::Matcher).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern(Arc<str>);

impl Pattern {
    pub fn new(pattern: impl Into<Arc<str>>) -> Self {
        Self(pattern.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A predicate over a single string field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawMatchConfig", into = "RawMatchConfig")]
pub enum MatchConfig {
    /// Matches every value.
    #[default]
    Wildcard,
    /// Case-sensitive full-string equality.
    Exact(String),
    /// Unanchored regular expression search.
    Regex(Pattern),
}

impl MatchConfig {
    pub fn exact(value: impl Into<String>) -> Self {
        Self::Exact(value.into())
    }

    pub fn regex(pattern: impl Into<Arc<str>>) -> Self {
        Self::Regex(Pattern::new(pattern))
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard)
    }

    pub fn as_regex(&self) -> Option<&Pattern> {
        match self {
            Self::Regex(pattern) => Some(pattern),
            _ => None,
        }
    }
}

/// Wire form of [`MatchConfig`]: two optional fields, exact taking precedence.
#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMatchConfig {
    #[serde(default, alias = "exactValue", skip_serializing_if = "Option::is_none")]
    match_value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    regex_value: Option<String>,
}

impl From<RawMatchConfig> for MatchConfig {
    fn from(raw: RawMatchConfig) -> Self {
        if let Some(exact) = raw.match_value.and_then(exact_string) {
            return Self::Exact(exact);
        }
        match raw.regex_value {
            Some(pattern) if !pattern.is_empty() => Self::regex(pattern),
            _ => Self::Wildcard,
        }
    }
}

/// Render a `matchValue` the way the matcher renders attribute values, so a
/// numeric predicate matches the attribute it names.
fn exact_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(match attribute_value(&other) {
            Some(value) => value.to_string(),
            None => other.to_string(),
        }),
    }
}

fn attribute_value(value: &serde_json::Value) -> Option<AttributeValue> {
    match value {
        serde_json::Value::String(s) => Some(AttributeValue::String(s.clone())),
        serde_json::Value::Bool(b) => Some(AttributeValue::Bool(*b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(AttributeValue::Int)
            .or_else(|| n.as_f64().map(AttributeValue::Double)),
        serde_json::Value::Array(items) => items
            .iter()
            .map(attribute_value)
            .collect::<Option<Vec<_>>>()
            .map(AttributeValue::Array),
        serde_json::Value::Null | serde_json::Value::Object(_) => None,
    }
}

impl From<MatchConfig> for RawMatchConfig {
    fn from(config: MatchConfig) -> Self {
        match config {
            MatchConfig::Wildcard => Self::default(),
            MatchConfig::Exact(value) => Self {
                match_value: Some(serde_json::Value::String(value)),
                regex_value: None,
            },
            MatchConfig::Regex(pattern) => Self {
                match_value: None,
                regex_value: Some(pattern.as_str().to_owned()),
            },
        }
    }
}

/// Matches when a single attribute satisfies both the key and the value predicate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeConfig {
    #[serde(default, deserialize_with = "nullable")]
    pub key: MatchConfig,
    #[serde(default, rename = "attribute", alias = "value", deserialize_with = "nullable")]
    pub value: MatchConfig,
}

impl AttributeConfig {
    pub fn new(key: MatchConfig, value: MatchConfig) -> Self {
        Self { key, value }
    }
}

/// Matches when some event on a span satisfies the name and every attribute entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventConfig {
    #[serde(default, deserialize_with = "nullable")]
    pub name: MatchConfig,
    #[serde(default, deserialize_with = "nullable")]
    pub attributes: Vec<AttributeConfig>,
}

impl EventConfig {
    pub fn named(name: MatchConfig) -> Self {
        Self {
            name,
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: AttributeConfig) -> Self {
        self.attributes.push(attribute);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanRuleConfig {
    #[serde(default, deserialize_with = "nullable")]
    pub name: MatchConfig,
    #[serde(default, deserialize_with = "nullable")]
    pub attributes: Vec<AttributeConfig>,
    #[serde(default, deserialize_with = "nullable")]
    pub events: Vec<EventConfig>,
    #[serde(default = "default_ratio", deserialize_with = "ratio")]
    pub sampling_ratio: f64,
}

impl SpanRuleConfig {
    /// A rule matching every span, sampled at `sampling_ratio`.
    pub fn new(sampling_ratio: f64) -> Self {
        Self {
            name: MatchConfig::Wildcard,
            attributes: Vec::new(),
            events: Vec::new(),
            sampling_ratio,
        }
    }

    pub fn with_name(mut self, name: MatchConfig) -> Self {
        self.name = name;
        self
    }

    pub fn with_attribute(mut self, attribute: AttributeConfig) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_event(mut self, event: EventConfig) -> Self {
        self.events.push(event);
        self
    }
}

impl Default for SpanRuleConfig {
    fn default() -> Self {
        Self::new(default_ratio())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRuleConfig {
    #[serde(default, deserialize_with = "nullable")]
    pub message: MatchConfig,
    #[serde(default, deserialize_with = "nullable")]
    pub severity_text: MatchConfig,
    #[serde(default, deserialize_with = "nullable")]
    pub attributes: Vec<AttributeConfig>,
    #[serde(default = "default_ratio", deserialize_with = "ratio")]
    pub sampling_ratio: f64,
}

impl LogRuleConfig {
    /// A rule matching every log record, sampled at `sampling_ratio`.
    pub fn new(sampling_ratio: f64) -> Self {
        Self {
            message: MatchConfig::Wildcard,
            severity_text: MatchConfig::Wildcard,
            attributes: Vec::new(),
            sampling_ratio,
        }
    }

    pub fn with_message(mut self, message: MatchConfig) -> Self {
        self.message = message;
        self
    }

    pub fn with_severity_text(mut self, severity_text: MatchConfig) -> Self {
        self.severity_text = severity_text;
        self
    }

    pub fn with_attribute(mut self, attribute: AttributeConfig) -> Self {
        self.attributes.push(attribute);
        self
    }
}

impl Default for LogRuleConfig {
    fn default() -> Self {
        Self::new(default_ratio())
    }
}

/// Ordered span and log rules. The first matching rule decides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    #[serde(default, deserialize_with = "nullable")]
    pub spans: Vec<SpanRuleConfig>,
    #[serde(default, deserialize_with = "nullable")]
    pub logs: Vec<LogRuleConfig>,
}

impl SamplingConfig {
    /// Parse the bare `{ spans, logs }` object.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty() && self.logs.is_empty()
    }

    /// Every regex pattern the rules reference, in rule order, repeats included.
    pub fn patterns(&self) -> Vec<&Pattern> {
        let mut predicates: Vec<&MatchConfig> = Vec::new();
        for rule in &self.spans {
            predicates.push(&rule.name);
            push_attributes(&mut predicates, &rule.attributes);
            for event in &rule.events {
                predicates.push(&event.name);
                push_attributes(&mut predicates, &event.attributes);
            }
        }
        for rule in &self.logs {
            predicates.push(&rule.message);
            predicates.push(&rule.severity_text);
            push_attributes(&mut predicates, &rule.attributes);
        }
        predicates.into_iter().filter_map(MatchConfig::as_regex).collect()
    }
}

fn push_attributes<'a>(predicates: &mut Vec<&'a MatchConfig>, attributes: &'a [AttributeConfig]) {
    for attribute in attributes {
        predicates.push(&attribute.key);
        predicates.push(&attribute.value);
    }
}

/// Clamp a configured ratio into `[0, 1]`. NaN keeps everything.
pub(crate) fn clamp_ratio(ratio: f64) -> f64 {
    if ratio.is_nan() {
        1.0
    } else {
        ratio.clamp(0.0, 1.0)
    }
}

fn default_ratio() -> f64 {
    1.0
}

fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn ratio<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or_else(default_ratio))
}
