//! The execution-engine contract the access layer delegates to.
//!
//! An engine accepts assembled query plans and write statements, runs them,
//! and exposes the literal SQL it would issue so the access layer can record
//! query provenance ahead of execution.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde_json::Value;

use crate::condition::{Changes, Condition};
use crate::error::EngineResult;
use crate::query::{AggregateFunc, QueryPlan};
use crate::record::Row;
use crate::sql::{self, Statement};

/// A transaction scoped to a single access-layer call. Statements issued on
/// the engine while the handle is live join the transaction.
#[async_trait]
pub trait EngineTransaction: Send {
    async fn commit(self: Box<Self>) -> EngineResult<()>;
    async fn roll_back(self: Box<Self>) -> EngineResult<()>;
}

/// The ORM/database layer actual execution is delegated to.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    /// Runs the plan and returns at most one row.
    async fn fetch_one(&self, plan: &QueryPlan) -> EngineResult<Option<Row>>;

    /// Runs the plan and returns every matching row.
    async fn fetch_all(&self, plan: &QueryPlan) -> EngineResult<Vec<Row>>;

    /// Aggregates `field` over the plan's matches; `Value::Null` when nothing
    /// matched (`COUNT` still yields zero).
    async fn aggregate(
        &self,
        plan: &QueryPlan,
        func: AggregateFunc,
        field: &str,
    ) -> EngineResult<Value>;

    /// Inserts one row, assigning the primary key when the row carries none,
    /// and returns the key value.
    async fn insert(&self, table: &str, pk: &str, row: Row) -> EngineResult<i64>;

    /// Multi-row insert with an explicit column list; returns the inserted
    /// row count.
    async fn insert_many(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> EngineResult<u64>;

    /// Bulk update; returns the affected row count.
    async fn update_where(
        &self,
        table: &str,
        changes: &Changes,
        condition: &Condition,
    ) -> EngineResult<u64>;

    /// Bulk delete; returns the removed row count.
    async fn delete_where(&self, table: &str, condition: &Condition) -> EngineResult<u64>;

    /// Opens a transaction.
    async fn begin(&self) -> EngineResult<Box<dyn EngineTransaction>>;

    /// The literal SQL this engine would issue for `statement`.
    fn render(&self, statement: &Statement<'_>) -> String {
        sql::render(statement)
    }
}
