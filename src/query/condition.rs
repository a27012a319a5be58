//! Query intent types
//!
//! What the caller asks for (`TopNCondition` plus `KeyValue` filters) and
//! what comes back (`SelectedRecord`).

use serde::{Deserialize, Serialize};

/// Ranking direction for a top-N query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Order {
    Asc,
    #[default]
    #[serde(alias = "DES")]
    Desc,
}

impl Order {
    /// Parse from string
    ///
    /// Only `asc` (any case) maps to [`Order::Asc`]. Every other input,
    /// including garbage, ranks descending.
    pub fn from_str_lossy(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("asc") {
            Self::Asc
        } else {
            Self::Desc
        }
    }

    /// SQL keyword for the `ORDER BY` clause
    pub fn sql_keyword(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

impl std::fmt::Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Asc => write!(f, "ASC"),
            Self::Desc => write!(f, "DESC"),
        }
    }
}

/// A value bound to a `?` placeholder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BindValue {
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
    Null,
}

impl From<i64> for BindValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for BindValue {
    fn from(v: i32) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<f64> for BindValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<bool> for BindValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for BindValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for BindValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<BindValue>> From<Option<T>> for BindValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// An equality condition `key = value`
///
/// `key` is a column name and is written into the SQL text; `value` is
/// always bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: BindValue,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<BindValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Top-N ranking request for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopNCondition {
    /// Metric name, which is also its table name
    pub name: String,
    /// Owning service, descriptive only
    #[serde(default)]
    pub parent_service: Option<String>,
    /// Whether the parent service is a normal (instrumented) one, descriptive only
    #[serde(default)]
    pub normal: Option<bool>,
    /// Maximum number of entities returned
    pub top_n: u32,
    #[serde(default)]
    pub order: Order,
}

impl TopNCondition {
    pub fn new(name: impl Into<String>, top_n: u32, order: Order) -> Self {
        Self {
            name: name.into(),
            parent_service: None,
            normal: None,
            top_n,
            order,
        }
    }

    /// Builder method: set the parent service
    pub fn parent_service(mut self, service: impl Into<String>, normal: bool) -> Self {
        self.parent_service = Some(service.into());
        self.normal = Some(normal);
        self
    }
}

/// One ranked entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedRecord {
    /// Entity id
    pub id: String,
    /// Aggregated value as rendered by the engine
    pub value: String,
}
