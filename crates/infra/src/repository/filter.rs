//! Search filters.

use core::fmt;

use repograph_core::Record;
use serde_json::Value;

/// How a criterion compares the stored attribute with its value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MatchMode {
    /// Stored value equals the criterion value.
    Exact,
    /// Stored text contains the criterion text (case sensitive).
    Contains,
}

/// One attribute condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Criterion {
    pub field: String,
    pub value: Value,
    pub mode: MatchMode,
}

impl Criterion {
    pub fn matches(&self, record: &Record) -> bool {
        let Some(actual) = record.get(&self.field) else {
            return false;
        };

        match self.mode {
            MatchMode::Exact => values_equal(actual, &self.value),
            MatchMode::Contains => match (actual, &self.value) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
                _ => false,
            },
        }
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_f64() == b.as_f64(),
        },
        _ => actual == expected,
    }
}

/// Conjunction of criteria; a record matches when every criterion does.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    criteria: Vec<Criterion>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field` to equal `value`.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.criteria.push(Criterion {
            field: field.into(),
            value: value.into(),
            mode: MatchMode::Exact,
        });
        self
    }

    /// Require the text in `field` to contain `text`.
    pub fn contains(mut self, field: impl Into<String>, text: impl Into<String>) -> Self {
        self.criteria.push(Criterion {
            field: field.into(),
            value: Value::String(text.into()),
            mode: MatchMode::Contains,
        });
        self
    }

    /// Exact match for non-text values, substring match for text.
    pub fn matching(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        match value.into() {
            Value::String(text) => self.contains(field, text),
            other => self.eq(field, other),
        }
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.criteria.iter().map(|criterion| criterion.field.as_str())
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.criteria.iter().all(|criterion| criterion.matches(record))
    }
}

impl From<Record> for SearchFilter {
    fn from(record: Record) -> Self {
        record
            .into_iter()
            .fold(SearchFilter::new(), |filter, (field, value)| filter.matching(field, value))
    }
}

impl<K, V> FromIterator<(K, V)> for SearchFilter
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(SearchFilter::new(), |filter, (field, value)| filter.matching(field, value))
    }
}

impl fmt::Display for SearchFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, criterion) in self.criteria.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{:?}: {}", criterion.field, criterion.value)?;
        }
        f.write_str("}")
    }
}
