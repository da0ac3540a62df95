//! The view of spans and log records that sampling needs.
//!
//! Exporters implement [`SpanRecord`] / [`LogRecord`] for their own types, or
//! convert into the plain [`Span`] and [`Log`] structs provided here.

use std::collections::BTreeMap;
use std::fmt;

/// An attribute value as carried by spans, span events and log records.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Bool(bool),
    Int(i64),
    Double(f64),
    Array(Vec<AttributeValue>),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// The string form used when matching non-string values against a predicate.
impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Double(d) => write!(f, "{d}"),
            Self::Array(values) => {
                f.write_str("[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl<T: Into<AttributeValue>> From<Vec<T>> for AttributeValue {
    fn from(values: Vec<T>) -> Self {
        Self::Array(values.into_iter().map(Into::into).collect())
    }
}

/// Attribute set of a record. Keys are unique.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A span as seen by the sampler.
pub trait SpanRecord {
    fn name(&self) -> &str;
    fn attributes(&self) -> &Attributes;
    fn events(&self) -> &[SpanEvent];

    /// Used to drop children of dropped spans when that is enabled.
    fn span_id(&self) -> Option<&str> {
        None
    }

    fn parent_span_id(&self) -> Option<&str> {
        None
    }

    /// Merge `attributes` into the span, overwriting existing keys.
    fn merge_attributes(&mut self, attributes: Attributes);
}

/// A log record as seen by the sampler.
pub trait LogRecord {
    /// The body, when it is a string.
    fn message(&self) -> Option<&str>;
    fn severity_text(&self) -> Option<&str>;
    fn attributes(&self) -> &Attributes;

    /// Merge `attributes` into the record, overwriting existing keys.
    fn merge_attributes(&mut self, attributes: Attributes);
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpanEvent {
    pub name: String,
    pub attributes: Attributes,
}

impl SpanEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Span {
    pub name: String,
    pub span_id: Option<String>,
    pub parent_span_id: Option<String>,
    pub attributes: Attributes,
    pub events: Vec<SpanEvent>,
}

impl Span {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_ids(mut self, span_id: impl Into<String>, parent_span_id: Option<&str>) -> Self {
        self.span_id = Some(span_id.into());
        self.parent_span_id = parent_span_id.map(str::to_owned);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_event(mut self, event: SpanEvent) -> Self {
        self.events.push(event);
        self
    }
}

impl SpanRecord for Span {
    fn name(&self) -> &str {
        &self.name
    }

    fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn events(&self) -> &[SpanEvent] {
        &self.events
    }

    fn span_id(&self) -> Option<&str> {
        self.span_id.as_deref()
    }

    fn parent_span_id(&self) -> Option<&str> {
        self.parent_span_id.as_deref()
    }

    fn merge_attributes(&mut self, attributes: Attributes) {
        self.attributes.extend(attributes);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Log {
    pub message: Option<String>,
    pub severity_text: Option<String>,
    pub attributes: Attributes,
}

impl Log {
    pub fn new(severity_text: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            severity_text: Some(severity_text.into()),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

impl LogRecord for Log {
    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    fn severity_text(&self) -> Option<&str> {
        self.severity_text.as_deref()
    }

    fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn merge_attributes(&mut self, attributes: Attributes) {
        self.attributes.extend(attributes);
    }
}
