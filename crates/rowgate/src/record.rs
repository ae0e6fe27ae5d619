//! The structured-record contract the access layer binds results onto.
//!
//! Records convert to and from rows through serde, so any `Serialize +
//! Deserialize + Default` struct qualifies; the trait adds table and
//! primary-key introspection plus a validation hook.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{AccessError, AccessResult, ValidationError};

/// A raw result row: an untyped column → value mapping.
pub type Row = Map<String, Value>;

/// A typed entity bound to a table row.
pub trait Record:
    Default + Clone + Send + Sync + Serialize + DeserializeOwned + std::fmt::Debug + 'static
{
    /// The table this record maps to.
    fn table_name() -> &'static str;

    /// The single-column primary key.
    fn primary_key() -> &'static str {
        "id"
    }

    /// Discriminator used for per-model caches.
    fn model_name() -> &'static str {
        Self::table_name()
    }

    /// The declared attribute set, derived from the serialized default form.
    fn attributes() -> Vec<String> {
        to_row(&Self::default()).keys().cloned().collect()
    }

    /// Record-level validation; an empty list means the record is valid.
    fn validate(&self) -> Vec<ValidationError> {
        Vec::new()
    }
}

/// Serializes a record into its row form.
pub fn to_row<M: Record>(record: &M) -> Row {
    match serde_json::to_value(record) {
        Ok(Value::Object(map)) => map,
        _ => Row::new(),
    }
}

/// Rebuilds a record from a row. Missing columns keep their default values,
/// so projected rows hydrate cleanly.
pub fn from_row<M: Record>(row: &Row) -> AccessResult<M> {
    let mut base = to_row(&M::default());
    for (column, value) in row {
        base.insert(column.clone(), value.clone());
    }
    serde_json::from_value(Value::Object(base)).map_err(|err| {
        AccessError::Execution(format!("row does not fit `{}`: {}", M::model_name(), err))
    })
}

/// Mass-assigns `data` onto `record`, ignoring keys outside the declared
/// attribute set.
pub fn apply<M: Record>(record: &mut M, data: &Row) -> AccessResult<()> {
    let attributes = M::attributes();
    let mut row = to_row(record);
    for (column, value) in data {
        if attributes.iter().any(|attribute| attribute == column) {
            row.insert(column.clone(), value.clone());
        }
    }
    *record = from_row(&row)?;
    Ok(())
}

/// The record's current primary-key value; `Null` when unset.
pub fn pk_value<M: Record>(record: &M) -> Value {
    to_row(record)
        .get(M::primary_key())
        .cloned()
        .unwrap_or(Value::Null)
}

/// Caller-supplied column → value data for writes.
#[derive(Debug, Clone, Default)]
pub struct Attrs(pub Row);

impl From<Row> for Attrs {
    fn from(row: Row) -> Self {
        Attrs(row)
    }
}

/// JSON objects become write data; anything else is empty.
impl From<Value> for Attrs {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Attrs(map),
            _ => Attrs::default(),
        }
    }
}
