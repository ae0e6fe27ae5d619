//! In-memory engine.
//!
//! Reference semantics for the [`Engine`] contract and the test double used
//! across the crate's own tests. Tables live behind a mutex; transactions
//! snapshot the whole store and restore it on rollback. Only the `column ± n`
//! form of raw expressions is evaluable here, which keeps counter updates
//! database-side instead of read-modify-write.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::{Engine, EngineTransaction};
use crate::condition::{Changes, Condition, SetValue};
use crate::error::{EngineError, EngineResult};
use crate::query::{AggregateFunc, QueryPlan};
use crate::record::Row;

#[derive(Debug, Clone)]
struct Table {
    pk: String,
    next_id: i64,
    rows: Vec<Row>,
}

impl Table {
    fn new(pk: &str) -> Self {
        Self {
            pk: pk.to_string(),
            next_id: 1,
            rows: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, Table>,
    snapshots: Vec<BTreeMap<String, Table>>,
}

/// An [`Engine`] holding its tables in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    state: Arc<Mutex<State>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows currently stored in `table`; zero for unknown tables.
    pub fn rows_in(&self, table: &str) -> usize {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn matching(&self, plan: &QueryPlan) -> EngineResult<Vec<Row>> {
        let state = self.lock();
        let table = match state.tables.get(&plan.table) {
            Some(table) => table,
            None => return Ok(Vec::new()),
        };
        let mut matched = Vec::new();
        for row in &table.rows {
            if matches(&plan.condition, row)? {
                matched.push(row.clone());
            }
        }
        Ok(matched)
    }
}

fn ensure_table<'a>(
    tables: &'a mut BTreeMap<String, Table>,
    name: &str,
    pk: &str,
) -> &'a mut Table {
    tables
        .entry(name.to_string())
        .or_insert_with(|| Table::new(pk))
}

/// Inserts a row, assigning the next key when the row carries none. An
/// explicit key colliding with a stored row is an execution fault.
fn push_row(table: &mut Table, name: &str, mut row: Row) -> EngineResult<i64> {
    let pk = table.pk.clone();
    let id = match row.get(&pk).and_then(Value::as_i64) {
        Some(id) if id != 0 => {
            if table
                .rows
                .iter()
                .any(|stored| stored.get(&pk).and_then(Value::as_i64) == Some(id))
            {
                return Err(EngineError::Execution(format!(
                    "duplicate primary key {id} in {name}"
                )));
            }
            table.next_id = table.next_id.max(id + 1);
            id
        }
        _ => {
            let id = table.next_id;
            table.next_id += 1;
            id
        }
    };
    row.insert(pk, Value::from(id));
    table.rows.push(row);
    Ok(id)
}

fn matches(condition: &Condition, row: &Row) -> EngineResult<bool> {
    match condition {
        Condition::Map(map) => Ok(map.iter().all(|(column, expected)| {
            row.get(column)
                .map(|found| value_eq(found, expected))
                .unwrap_or(false)
        })),
        Condition::Expr(text, _) => Err(EngineError::Unsupported(format!(
            "expression conditions are not evaluable in memory: {text}"
        ))),
        Condition::All(parts) => {
            for part in parts {
                if !matches(part, row)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), Some(_)) => Ordering::Less,
        (Some(_), None | Some(Value::Null)) => Ordering::Greater,
        (Some(x), Some(y)) => {
            if let (Some(fx), Some(fy)) = (x.as_f64(), y.as_f64()) {
                return fx.partial_cmp(&fy).unwrap_or(Ordering::Equal);
            }
            match (x.as_str(), y.as_str()) {
                (Some(sx), Some(sy)) => sx.cmp(sy),
                _ => x.to_string().cmp(&y.to_string()),
            }
        }
    }
}

fn sort_rows(rows: &mut [Row], order: &str) {
    // apply trailing sort keys first so the stable sort keeps their ordering
    for term in order.split(',').rev() {
        let term = term.trim();
        if term.is_empty() {
            continue;
        }
        let (column, descending) = match term.rsplit_once(' ') {
            Some((column, direction)) if direction.eq_ignore_ascii_case("desc") => {
                (column.trim(), true)
            }
            Some((column, direction)) if direction.eq_ignore_ascii_case("asc") => {
                (column.trim(), false)
            }
            _ => (term, false),
        };
        rows.sort_by(|a, b| {
            let ordering = compare_values(a.get(column), b.get(column));
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }
}

fn project(row: &Row, fields: &str) -> Row {
    let fields = fields.trim();
    if fields.is_empty() || fields == "*" {
        return row.clone();
    }
    let mut out = Row::new();
    for entry in fields.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let lowered = entry.to_ascii_lowercase();
        if let Some(idx) = lowered.find(" as ") {
            let source = entry[..idx].trim();
            let alias = entry[idx + 4..].trim();
            out.insert(
                alias.to_string(),
                row.get(source).cloned().unwrap_or(Value::Null),
            );
        } else {
            out.insert(
                entry.to_string(),
                row.get(entry).cloned().unwrap_or(Value::Null),
            );
        }
    }
    out
}

fn number_from_f64(total: f64) -> Value {
    if total.fract() == 0.0 && total.abs() < i64::MAX as f64 {
        Value::from(total as i64)
    } else {
        Value::from(total)
    }
}

/// Evaluates the `column ± n` expression form against a stored row.
fn eval_adjust(expr: &str, row: &Row) -> EngineResult<Value> {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    let unsupported =
        || EngineError::Unsupported(format!("expression is not evaluable in memory: {expr}"));
    if parts.len() != 3 || (parts[1] != "+" && parts[1] != "-") {
        return Err(unsupported());
    }
    let add = parts[1] == "+";
    let current = row.get(parts[0]).cloned().unwrap_or(Value::Null);
    if let (Some(base), Ok(step)) = (current.as_i64(), parts[2].parse::<i64>()) {
        return Ok(Value::from(if add { base + step } else { base - step }));
    }
    let step: f64 = parts[2].parse().map_err(|_| unsupported())?;
    let base = current.as_f64().unwrap_or(0.0);
    Ok(number_from_f64(if add { base + step } else { base - step }))
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn fetch_one(&self, plan: &QueryPlan) -> EngineResult<Option<Row>> {
        let narrowed = QueryPlan {
            limit: Some(1),
            ..plan.clone()
        };
        Ok(self.fetch_all(&narrowed).await?.into_iter().next())
    }

    async fn fetch_all(&self, plan: &QueryPlan) -> EngineResult<Vec<Row>> {
        let mut rows = self.matching(plan)?;
        sort_rows(&mut rows, &plan.order);
        if let Some(offset) = plan.offset {
            let offset = offset.max(0) as usize;
            rows = rows.into_iter().skip(offset).collect();
        }
        if let Some(limit) = plan.limit {
            rows.truncate(limit.max(0) as usize);
        }
        Ok(rows.iter().map(|row| project(row, &plan.fields)).collect())
    }

    async fn aggregate(
        &self,
        plan: &QueryPlan,
        func: AggregateFunc,
        field: &str,
    ) -> EngineResult<Value> {
        let rows = self.matching(plan)?;
        let value = match func {
            AggregateFunc::Count => {
                if field.is_empty() || field == "*" {
                    Value::from(rows.len() as i64)
                } else {
                    let present = rows
                        .iter()
                        .filter(|row| row.get(field).map(|v| !v.is_null()).unwrap_or(false))
                        .count();
                    Value::from(present as i64)
                }
            }
            AggregateFunc::Sum => {
                let values: Vec<f64> = rows
                    .iter()
                    .filter_map(|row| row.get(field).and_then(Value::as_f64))
                    .collect();
                if values.is_empty() {
                    Value::Null
                } else {
                    number_from_f64(values.iter().sum())
                }
            }
            AggregateFunc::Min | AggregateFunc::Max => {
                let mut best: Option<Value> = None;
                for row in &rows {
                    let candidate = match row.get(field) {
                        Some(value) if !value.is_null() => value,
                        _ => continue,
                    };
                    let replace = match &best {
                        None => true,
                        Some(current) => {
                            let ordering = compare_values(Some(candidate), Some(current));
                            if func == AggregateFunc::Min {
                                ordering == Ordering::Less
                            } else {
                                ordering == Ordering::Greater
                            }
                        }
                    };
                    if replace {
                        best = Some(candidate.clone());
                    }
                }
                best.unwrap_or(Value::Null)
            }
        };
        Ok(value)
    }

    async fn insert(&self, table: &str, pk: &str, row: Row) -> EngineResult<i64> {
        let mut state = self.lock();
        let table_ref = ensure_table(&mut state.tables, table, pk);
        push_row(table_ref, table, row)
    }

    async fn insert_many(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> EngineResult<u64> {
        let mut state = self.lock();
        let table_ref = ensure_table(&mut state.tables, table, "id");
        let mut count = 0u64;
        for values in rows {
            let mut row = Row::new();
            for (column, value) in columns.iter().zip(values) {
                row.insert(column.clone(), value.clone());
            }
            push_row(table_ref, table, row)?;
            count += 1;
        }
        Ok(count)
    }

    async fn update_where(
        &self,
        table: &str,
        changes: &Changes,
        condition: &Condition,
    ) -> EngineResult<u64> {
        let mut state = self.lock();
        let table_ref = match state.tables.get_mut(table) {
            Some(table_ref) => table_ref,
            None => return Ok(0),
        };
        let mut count = 0u64;
        for row in table_ref.rows.iter_mut() {
            if matches(condition, row)? {
                let mut updated = row.clone();
                for (column, change) in changes {
                    let value = match change {
                        SetValue::Value(value) => value.clone(),
                        SetValue::Expr(expr) => eval_adjust(&expr.0, row)?,
                    };
                    updated.insert(column.clone(), value);
                }
                *row = updated;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_where(&self, table: &str, condition: &Condition) -> EngineResult<u64> {
        let mut state = self.lock();
        let table_ref = match state.tables.get_mut(table) {
            Some(table_ref) => table_ref,
            None => return Ok(0),
        };
        let mut keep = Vec::with_capacity(table_ref.rows.len());
        for row in &table_ref.rows {
            keep.push(!matches(condition, row)?);
        }
        let mut flags = keep.iter();
        let before = table_ref.rows.len();
        table_ref
            .rows
            .retain(|_| *flags.next().unwrap_or(&true));
        Ok((before - table_ref.rows.len()) as u64)
    }

    async fn begin(&self) -> EngineResult<Box<dyn EngineTransaction>> {
        let mut state = self.lock();
        let snapshot = state.tables.clone();
        state.snapshots.push(snapshot);
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            finished: false,
        }))
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<State>>,
    finished: bool,
}

impl MemoryTransaction {
    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl EngineTransaction for MemoryTransaction {
    async fn commit(mut self: Box<Self>) -> EngineResult<()> {
        let mut state = self.lock();
        state
            .snapshots
            .pop()
            .ok_or_else(|| EngineError::Transaction("no open transaction".to_string()))?;
        drop(state);
        self.finished = true;
        Ok(())
    }

    async fn roll_back(mut self: Box<Self>) -> EngineResult<()> {
        let mut state = self.lock();
        let snapshot = state
            .snapshots
            .pop()
            .ok_or_else(|| EngineError::Transaction("no open transaction".to_string()))?;
        state.tables = snapshot;
        drop(state);
        self.finished = true;
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            if let Some(snapshot) = state.snapshots.pop() {
                warn!("transaction dropped without commit or rollback; restoring previous state");
                state.tables = snapshot;
            }
        }
    }
}
