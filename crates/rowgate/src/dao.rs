//! The per-model access object.
//!
//! `Dao<M>` composes queries from per-call conditions and a persistent base
//! filter, executes them through an [`Engine`], wraps multi-step writes in
//! transactions, and collects errors and rendered SQL on the instance.
//! Failed operations return their sentinel value (`0`, `false`, empty) and
//! leave detail in the error log; nothing at this layer panics or propagates
//! an execution fault to the caller.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::{debug, warn};

use crate::condition::{compose, raw, Changes, Condition, RawExpr, Selector, SetValue};
use crate::engine::Engine;
use crate::error::AccessError;
use crate::query::{default_order, AggregateFunc, FieldList, QueryPlan};
use crate::record::{self, Attrs, Record, Row};
use crate::sql::Statement;

/// Rows per multi-row insert statement.
const BATCH_CHUNK: usize = 1000;

/// Fallback page size when the caller passes a non-positive limit.
const DEFAULT_PAGE_SIZE: i64 = 10;

/// Per-model configuration applied to every composed query.
#[derive(Debug, Clone)]
pub struct DaoConfig {
    /// Persistent filter ANDed into every composed query.
    pub base_where: Option<Condition>,
    /// Bare queries return raw rows instead of typed records.
    pub as_rows: bool,
    /// Capture rendered SQL into the provenance log.
    pub log_sql: bool,
}

impl Default for DaoConfig {
    fn default() -> Self {
        Self {
            base_where: None,
            as_rows: false,
            log_sql: true,
        }
    }
}

/// One fetched result in its resolved shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<M> {
    Record(M),
    Row(Row),
    /// Nothing matched: the empty sentinel, not an absence marker.
    Empty,
}

impl<M> Fetched<M> {
    pub fn is_empty(&self) -> bool {
        matches!(self, Fetched::Empty)
    }

    pub fn into_record(self) -> Option<M> {
        match self {
            Fetched::Record(model) => Some(model),
            _ => None,
        }
    }

    pub fn into_row(self) -> Option<Row> {
        match self {
            Fetched::Row(row) => Some(row),
            _ => None,
        }
    }
}

/// A fetched sequence in its resolved shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Listed<M> {
    Records(Vec<M>),
    Rows(Vec<Row>),
}

impl<M> Listed<M> {
    pub fn len(&self) -> usize {
        match self {
            Listed::Records(models) => models.len(),
            Listed::Rows(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_records(self) -> Vec<M> {
        match self {
            Listed::Records(models) => models,
            Listed::Rows(_) => Vec::new(),
        }
    }

    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Listed::Rows(rows) => rows,
            Listed::Records(_) => Vec::new(),
        }
    }
}

/// Counter-update target: one column, several columns sharing the step, or
/// per-column steps.
#[derive(Debug, Clone)]
pub enum Adjust {
    Column(String),
    Columns(Vec<String>),
    Steps(Vec<(String, i64)>),
}

impl From<&str> for Adjust {
    fn from(column: &str) -> Self {
        Adjust::Column(column.to_string())
    }
}

impl From<String> for Adjust {
    fn from(column: String) -> Self {
        Adjust::Column(column)
    }
}

impl From<Vec<&str>> for Adjust {
    fn from(columns: Vec<&str>) -> Self {
        Adjust::Columns(columns.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for Adjust {
    fn from(columns: Vec<String>) -> Self {
        Adjust::Columns(columns)
    }
}

impl From<Vec<(&str, i64)>> for Adjust {
    fn from(steps: Vec<(&str, i64)>) -> Self {
        Adjust::Steps(
            steps
                .into_iter()
                .map(|(column, step)| (column.to_string(), step))
                .collect(),
        )
    }
}

impl From<Vec<(String, i64)>> for Adjust {
    fn from(steps: Vec<(String, i64)>) -> Self {
        Adjust::Steps(steps)
    }
}

/// Data access for one record type against one engine.
pub struct Dao<M: Record> {
    engine: Arc<dyn Engine>,
    config: Mutex<DaoConfig>,
    sql: Mutex<Vec<String>>,
    errors: Mutex<Vec<AccessError>>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Record> fmt::Debug for Dao<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dao")
            .field("table", &M::table_name())
            .finish_non_exhaustive()
    }
}

impl<M: Record> Dao<M> {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self::with_config(engine, DaoConfig::default())
    }

    pub fn with_config(engine: Arc<dyn Engine>, config: DaoConfig) -> Self {
        Self {
            engine,
            config: Mutex::new(config),
            sql: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            _model: PhantomData,
        }
    }

    pub fn engine(&self) -> Arc<dyn Engine> {
        Arc::clone(&self.engine)
    }

    /// The derived fallback ordering: newest primary key first.
    pub fn default_order() -> String {
        default_order(M::primary_key())
    }

    fn lock_config(&self) -> MutexGuard<'_, DaoConfig> {
        match self.config.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn base_where(&self) -> Option<Condition> {
        self.lock_config().base_where.clone()
    }

    /// Replaces the persistent filter merged into every composed query.
    pub fn set_base_where(&self, condition: impl Into<Condition>) {
        self.lock_config().base_where = Some(condition.into());
    }

    /// Switches bare queries between typed records and raw rows.
    pub fn set_as_rows(&self, as_rows: bool) {
        self.lock_config().as_rows = as_rows;
    }

    /// Every rendered statement captured on this instance, oldest first.
    pub fn sql(&self) -> Vec<String> {
        match self.sql.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// The most recently captured statement.
    pub fn last_sql(&self) -> Option<String> {
        match self.sql.lock() {
            Ok(guard) => guard.last().cloned(),
            Err(poisoned) => poisoned.into_inner().last().cloned(),
        }
    }

    /// Every error collected on this instance, oldest first.
    pub fn errors(&self) -> Vec<AccessError> {
        match self.errors.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// The first collected error, left in place.
    pub fn error(&self) -> Option<AccessError> {
        match self.errors.lock() {
            Ok(guard) => guard.first().cloned(),
            Err(poisoned) => poisoned.into_inner().first().cloned(),
        }
    }

    /// Wraps literal SQL for use in update payloads. The caller owns
    /// injection safety.
    pub fn raw(text: impl Into<String>) -> RawExpr {
        raw(text)
    }

    fn push_sql(&self, sql: String) {
        if let Ok(mut guard) = self.sql.lock() {
            guard.push(sql);
        }
    }

    fn push_error(&self, error: impl Into<AccessError>) {
        let error = error.into();
        debug!(table = M::table_name(), %error, "recorded access error");
        if let Ok(mut guard) = self.errors.lock() {
            guard.push(error);
        }
    }

    /// Assembles the plan for one call and captures its provenance. Pagination
    /// limits are attached by the caller after capture.
    fn plan(&self, selector: Selector, fields: FieldList, order: String) -> QueryPlan {
        let config = self.lock_config().clone();
        let condition = compose(
            selector.into_condition(M::primary_key()),
            config.base_where.as_ref(),
        );
        let as_rows = fields.forces_rows() || config.as_rows;
        let order = if order.is_empty() {
            Self::default_order()
        } else {
            order
        };
        let plan = QueryPlan::new(M::table_name())
            .condition(condition)
            .fields(fields.as_str())
            .order(order)
            .as_rows(as_rows);
        if config.log_sql {
            self.push_sql(self.engine.render(&Statement::Select(&plan)));
        }
        plan
    }

    fn materialize_one(&self, row: Row, as_rows: bool) -> Fetched<M> {
        if as_rows {
            return Fetched::Row(row);
        }
        match record::from_row::<M>(&row) {
            Ok(model) => Fetched::Record(model),
            Err(err) => {
                self.push_error(err);
                Fetched::Empty
            }
        }
    }

    fn materialize_all(&self, rows: Vec<Row>, as_rows: bool) -> Listed<M> {
        if as_rows {
            return Listed::Rows(rows);
        }
        let mut models = Vec::with_capacity(rows.len());
        for row in &rows {
            match record::from_row::<M>(row) {
                Ok(model) => models.push(model),
                Err(err) => {
                    self.push_error(err);
                    return Listed::Records(Vec::new());
                }
            }
        }
        Listed::Records(models)
    }

    /// Fetches a single result; the empty sentinel when nothing matches.
    pub async fn get(
        &self,
        where_: impl Into<Selector>,
        fields: impl Into<FieldList>,
        order: impl Into<String>,
    ) -> Fetched<M> {
        let plan = self.plan(where_.into(), fields.into(), order.into());
        match self.engine.fetch_one(&plan).await {
            Ok(Some(row)) => self.materialize_one(row, plan.as_rows),
            Ok(None) => Fetched::Empty,
            Err(err) => {
                self.push_error(err);
                Fetched::Empty
            }
        }
    }

    /// Fetches every matching result.
    pub async fn get_all(
        &self,
        where_: impl Into<Selector>,
        fields: impl Into<FieldList>,
        order: impl Into<String>,
    ) -> Listed<M> {
        let plan = self.plan(where_.into(), fields.into(), order.into());
        match self.engine.fetch_all(&plan).await {
            Ok(rows) => self.materialize_all(rows, plan.as_rows),
            Err(err) => {
                self.push_error(err);
                self.materialize_all(Vec::new(), plan.as_rows)
            }
        }
    }

    /// Fetches one page. Non-positive pages clamp to the first page and
    /// non-positive limits to the default page size.
    pub async fn get_page(
        &self,
        where_: impl Into<Selector>,
        page: i64,
        limit: i64,
        fields: impl Into<FieldList>,
        order: impl Into<String>,
    ) -> Listed<M> {
        let page = if page < 1 { 1 } else { page };
        let limit = if limit < 1 { DEFAULT_PAGE_SIZE } else { limit };
        let mut plan = self.plan(where_.into(), fields.into(), order.into());
        plan.offset = Some((page - 1) * limit);
        plan.limit = Some(limit);
        match self.engine.fetch_all(&plan).await {
            Ok(rows) => self.materialize_all(rows, plan.as_rows),
            Err(err) => {
                self.push_error(err);
                self.materialize_all(Vec::new(), plan.as_rows)
            }
        }
    }

    /// Inserts one record built from `data`. Returns the new primary key, or
    /// `0` when validation or the engine rejects it.
    pub async fn add(&self, data: impl Into<Attrs>) -> i64 {
        let Attrs(data) = data.into();
        let mut model = M::default();
        if let Err(err) = record::apply(&mut model, &data) {
            self.push_error(err);
            return 0;
        }
        let violations = model.validate();
        if !violations.is_empty() {
            self.push_error(AccessError::Validation(violations));
            return 0;
        }
        let mut row = record::to_row(&model);
        if !pk_is_set(row.get(M::primary_key())) {
            row.remove(M::primary_key());
        }
        match self
            .engine
            .insert(M::table_name(), M::primary_key(), row)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                self.push_error(err);
                0
            }
        }
    }

    /// Inserts records one by one inside a single transaction. On the first
    /// failing row the transaction rolls back and the ids accumulated so far
    /// are returned; those ids refer to rows the rollback undid, so a
    /// non-empty result is not a guarantee of persistence.
    pub async fn add_all(&self, data: impl IntoIterator<Item = impl Into<Attrs>>) -> Vec<i64> {
        let tx = match self.engine.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                self.push_error(err);
                return Vec::new();
            }
        };
        let mut ids = Vec::new();
        for item in data {
            let id = self.add(item).await;
            if id == 0 {
                warn!(table = M::table_name(), "add_all rolling back");
                if let Err(err) = tx.roll_back().await {
                    self.push_error(err);
                }
                return ids;
            }
            ids.push(id);
        }
        if let Err(err) = tx.commit().await {
            self.push_error(err);
        }
        ids
    }

    /// Multi-row insert in chunks, all inside one transaction. Each row is
    /// filtered to the declared attribute set and the column list comes from
    /// the first row of a chunk. Returns the total inserted row count, or `0`
    /// with a rollback when any chunk fails.
    pub async fn batch_insert(&self, data: impl IntoIterator<Item = impl Into<Attrs>>) -> u64 {
        let attributes = M::attributes();
        let rows: Vec<Row> = data
            .into_iter()
            .map(|item| {
                let Attrs(row) = item.into();
                row.into_iter()
                    .filter(|(column, _)| attributes.iter().any(|a| a == column))
                    .collect()
            })
            .collect();
        if rows.is_empty() {
            return 0;
        }
        let tx = match self.engine.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                self.push_error(err);
                return 0;
            }
        };
        let mut total = 0u64;
        for chunk in rows.chunks(BATCH_CHUNK) {
            let columns: Vec<String> = chunk[0].keys().cloned().collect();
            let values: Vec<Vec<Value>> = chunk
                .iter()
                .map(|row| {
                    columns
                        .iter()
                        .map(|column| row.get(column).cloned().unwrap_or(Value::Null))
                        .collect()
                })
                .collect();
            self.push_sql(self.engine.render(&Statement::BatchInsert {
                table: M::table_name(),
                columns: &columns,
                rows: &values,
            }));
            match self
                .engine
                .insert_many(M::table_name(), &columns, &values)
                .await
            {
                Ok(0) => {
                    warn!(table = M::table_name(), "batch_insert chunk inserted nothing, rolling back");
                    if let Err(err) = tx.roll_back().await {
                        self.push_error(err);
                    }
                    return 0;
                }
                Ok(count) => total += count,
                Err(err) => {
                    warn!(table = M::table_name(), "batch_insert rolling back");
                    self.push_error(err);
                    if let Err(err) = tx.roll_back().await {
                        self.push_error(err);
                    }
                    return 0;
                }
            }
        }
        if let Err(err) = tx.commit().await {
            self.push_error(err);
            return 0;
        }
        total
    }

    /// Loads the single matching record, applies `data`, validates, and
    /// saves. `false` when nothing matches, validation rejects the change, or
    /// the engine faults.
    pub async fn update(&self, where_: impl Into<Selector>, data: impl Into<Attrs>) -> bool {
        let Attrs(data) = data.into();
        let mut plan = self.plan(where_.into(), FieldList::default(), String::new());
        // updates bind onto the typed record regardless of configuration
        plan.as_rows = false;
        let row = match self.engine.fetch_one(&plan).await {
            Ok(Some(row)) => row,
            Ok(None) => return false,
            Err(err) => {
                self.push_error(err);
                return false;
            }
        };
        let mut model = match record::from_row::<M>(&row) {
            Ok(model) => model,
            Err(err) => {
                self.push_error(err);
                return false;
            }
        };
        if let Err(err) = record::apply(&mut model, &data) {
            self.push_error(err);
            return false;
        }
        let violations = model.validate();
        if !violations.is_empty() {
            self.push_error(AccessError::Validation(violations));
            return false;
        }
        match self.save_changes(&model, &data).await {
            Ok(()) => true,
            Err(err) => {
                self.push_error(err);
                false
            }
        }
    }

    /// Loads only the primary key plus the fields being written for every
    /// match, then updates each record inside one transaction, stopping and
    /// rolling back at the first failure.
    pub async fn update_all(&self, where_: impl Into<Selector>, data: impl Into<Attrs>) -> bool {
        let Attrs(data) = data.into();
        let mut fields: Vec<String> = data.keys().cloned().collect();
        fields.push(M::primary_key().to_string());
        let mut plan = self.plan(where_.into(), FieldList::from(fields), String::new());
        plan.as_rows = false;
        let rows = match self.engine.fetch_all(&plan).await {
            Ok(rows) => rows,
            Err(err) => {
                self.push_error(err);
                return false;
            }
        };
        if rows.is_empty() {
            return false;
        }
        let tx = match self.engine.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                self.push_error(err);
                return false;
            }
        };
        for row in &rows {
            let outcome = self.update_loaded(row, &data).await;
            if let Err(err) = outcome {
                warn!(table = M::table_name(), "update_all rolling back");
                self.push_error(err);
                if let Err(err) = tx.roll_back().await {
                    self.push_error(err);
                }
                return false;
            }
        }
        if let Err(err) = tx.commit().await {
            self.push_error(err);
            return false;
        }
        true
    }

    async fn update_loaded(&self, row: &Row, data: &Row) -> Result<(), AccessError> {
        let mut model = record::from_row::<M>(row)?;
        record::apply(&mut model, data)?;
        let violations = model.validate();
        if !violations.is_empty() {
            return Err(AccessError::Validation(violations));
        }
        self.save_changes(&model, data).await
    }

    /// Writes the touched fields of `model` back by primary key. Fields the
    /// caller never supplied stay untouched in storage.
    async fn save_changes(&self, model: &M, data: &Row) -> Result<(), AccessError> {
        let model_row = record::to_row(model);
        let mut changes = Changes::new();
        for column in data.keys() {
            if column == M::primary_key() {
                continue;
            }
            if let Some(value) = model_row.get(column) {
                changes.insert(column.clone(), SetValue::Value(value.clone()));
            }
        }
        if changes.is_empty() {
            return Ok(());
        }
        let mut key = serde_json::Map::new();
        key.insert(M::primary_key().to_string(), record::pk_value(model));
        self.engine
            .update_where(M::table_name(), &changes, &Condition::Map(key))
            .await?;
        Ok(())
    }

    /// Loads the single matching record (primary key only) and deletes it.
    pub async fn delete(&self, where_: impl Into<Selector>) -> bool {
        let mut plan = self.plan(
            where_.into(),
            FieldList::from(M::primary_key()),
            String::new(),
        );
        plan.as_rows = false;
        let row = match self.engine.fetch_one(&plan).await {
            Ok(Some(row)) => row,
            Ok(None) => return false,
            Err(err) => {
                self.push_error(err);
                return false;
            }
        };
        let id = row.get(M::primary_key()).cloned().unwrap_or(Value::Null);
        let mut key = serde_json::Map::new();
        key.insert(M::primary_key().to_string(), id);
        match self
            .engine
            .delete_where(M::table_name(), &Condition::Map(key))
            .await
        {
            Ok(0) => {
                self.push_error(AccessError::Execution(
                    "delete removed no rows".to_string(),
                ));
                false
            }
            Ok(_) => true,
            Err(err) => {
                self.push_error(err);
                false
            }
        }
    }

    /// Bulk delete handed straight to the engine; the persistent base filter
    /// is not merged here. Returns the removed row count, `0` on fault.
    pub async fn delete_all(&self, where_: impl Into<Selector>) -> u64 {
        let condition = where_.into().into_condition(M::primary_key());
        match self.engine.delete_where(M::table_name(), &condition).await {
            Ok(count) => count,
            Err(err) => {
                self.push_error(err);
                0
            }
        }
    }

    /// Counts matching rows; pass `"*"` to count rows regardless of column
    /// content.
    pub async fn count(&self, where_: impl Into<Selector>, field: &str) -> i64 {
        self.aggregate(where_.into(), AggregateFunc::Count, field)
            .await
    }

    /// Sums `field` over the matches, truncated to an integer.
    pub async fn sum(&self, where_: impl Into<Selector>, field: &str) -> i64 {
        self.aggregate(where_.into(), AggregateFunc::Sum, field)
            .await
    }

    /// Smallest `field` value over the matches, truncated to an integer.
    pub async fn min(&self, where_: impl Into<Selector>, field: &str) -> i64 {
        self.aggregate(where_.into(), AggregateFunc::Min, field)
            .await
    }

    /// Largest `field` value over the matches, truncated to an integer.
    pub async fn max(&self, where_: impl Into<Selector>, field: &str) -> i64 {
        self.aggregate(where_.into(), AggregateFunc::Max, field)
            .await
    }

    async fn aggregate(&self, selector: Selector, func: AggregateFunc, field: &str) -> i64 {
        let mut plan = self.plan(selector, FieldList::default(), String::new());
        // aggregates run over the raw-row form
        plan.as_rows = true;
        match self.engine.aggregate(&plan, func, field).await {
            Ok(value) => truncate_to_int(&value),
            Err(err) => {
                self.push_error(err);
                0
            }
        }
    }

    /// Adds to counters with database-side arithmetic. The per-column step
    /// form uses each entry's own step; the other forms share `step`.
    pub async fn inc(
        &self,
        where_: impl Into<Selector>,
        target: impl Into<Adjust>,
        step: i64,
    ) -> bool {
        self.shift(where_.into(), target.into(), step).await
    }

    /// Counter decrease. Only the per-column step form subtracts; the column
    /// and column-list forms keep the additive direction.
    pub async fn dec(
        &self,
        where_: impl Into<Selector>,
        target: impl Into<Adjust>,
        step: i64,
    ) -> bool {
        match target.into() {
            Adjust::Steps(steps) => {
                let mut changes = Changes::new();
                for (column, amount) in steps {
                    changes.insert(
                        column.clone(),
                        SetValue::Expr(raw(format!("{column} - {amount}"))),
                    );
                }
                self.apply_shift(where_.into(), changes).await
            }
            other => self.shift(where_.into(), other, step).await,
        }
    }

    async fn shift(&self, selector: Selector, target: Adjust, step: i64) -> bool {
        let mut changes = Changes::new();
        match target {
            Adjust::Column(column) => {
                changes.insert(
                    column.clone(),
                    SetValue::Expr(raw(format!("{column} + {step}"))),
                );
            }
            Adjust::Columns(columns) => {
                for column in columns {
                    changes.insert(
                        column.clone(),
                        SetValue::Expr(raw(format!("{column} + {step}"))),
                    );
                }
            }
            Adjust::Steps(steps) => {
                for (column, amount) in steps {
                    changes.insert(
                        column.clone(),
                        SetValue::Expr(raw(format!("{column} + {amount}"))),
                    );
                }
            }
        }
        self.apply_shift(selector, changes).await
    }

    /// Counter updates go straight to the engine without base-filter
    /// composition, like bulk deletes.
    async fn apply_shift(&self, selector: Selector, changes: Changes) -> bool {
        if changes.is_empty() {
            return false;
        }
        let condition = selector.into_condition(M::primary_key());
        match self
            .engine
            .update_where(M::table_name(), &changes, &condition)
            .await
        {
            Ok(count) => count > 0,
            Err(err) => {
                self.push_error(err);
                false
            }
        }
    }
}

fn pk_is_set(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(value) => value.as_i64().map(|id| id != 0).unwrap_or(true),
    }
}

fn truncate_to_int(value: &Value) -> i64 {
    if let Some(n) = value.as_i64() {
        return n;
    }
    if let Some(f) = value.as_f64() {
        return f as i64;
    }
    if let Some(s) = value.as_str() {
        if let Ok(f) = s.parse::<f64>() {
            return f as i64;
        }
    }
    0
}
