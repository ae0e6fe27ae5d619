//! Query plans: the assembled description of one query, ready to hand to the
//! execution engine.

use crate::condition::Condition;

/// Field selection, normalized to the comma-joined string form the engine
/// consumes. Empty means every column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldList(String);

impl FieldList {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Aliased columns cannot be bound onto a typed record, so any ` as `
    /// marker forces the raw-row result shape.
    pub fn forces_rows(&self) -> bool {
        self.0.to_ascii_lowercase().contains(" as ")
    }
}

impl From<&str> for FieldList {
    fn from(fields: &str) -> Self {
        FieldList(fields.to_string())
    }
}

impl From<String> for FieldList {
    fn from(fields: String) -> Self {
        FieldList(fields)
    }
}

impl From<Vec<String>> for FieldList {
    fn from(fields: Vec<String>) -> Self {
        FieldList(fields.join(","))
    }
}

impl From<Vec<&str>> for FieldList {
    fn from(fields: Vec<&str>) -> Self {
        FieldList(fields.join(","))
    }
}

impl From<&[&str]> for FieldList {
    fn from(fields: &[&str]) -> Self {
        FieldList(fields.join(","))
    }
}

/// The derived fallback ordering: newest primary key first.
pub fn default_order(pk: &str) -> String {
    format!("{pk} DESC")
}

/// Aggregate functions computed over the raw-row query form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    Count,
    Sum,
    Min,
    Max,
}

impl AggregateFunc {
    pub fn as_sql(&self) -> &'static str {
        match self {
            AggregateFunc::Count => "COUNT",
            AggregateFunc::Sum => "SUM",
            AggregateFunc::Min => "MIN",
            AggregateFunc::Max => "MAX",
        }
    }
}

/// An assembled query: condition, field list, ordering, pagination, and the
/// resolved result shape.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub table: String,
    pub condition: Condition,
    pub fields: String,
    pub order: String,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// Return raw rows instead of typed records.
    pub as_rows: bool,
}

impl QueryPlan {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            condition: Condition::All(Vec::new()),
            fields: String::new(),
            order: String::new(),
            limit: None,
            offset: None,
            as_rows: false,
        }
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    pub fn fields(mut self, fields: impl Into<String>) -> Self {
        self.fields = fields.into();
        self
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.order = order.into();
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn as_rows(mut self, as_rows: bool) -> Self {
        self.as_rows = as_rows;
        self
    }
}
