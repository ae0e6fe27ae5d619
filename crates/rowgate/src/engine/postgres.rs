//! PostgreSQL engine over sqlx.
//!
//! Statements are rendered to literal SQL and executed as-is, so the
//! provenance log matches the wire text exactly. One transaction may be live
//! per engine; statements issued while it is open run on its connection.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Column, Row as SqlxRow};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Engine, EngineTransaction};
use crate::condition::{Changes, Condition};
use crate::error::{EngineError, EngineResult};
use crate::query::{AggregateFunc, QueryPlan};
use crate::record::Row;
use crate::sql::{self, Statement};

type PgTx = sqlx::Transaction<'static, sqlx::Postgres>;

/// An [`Engine`] executing against a PostgreSQL pool.
pub struct PostgresEngine {
    pool: PgPool,
    active: Arc<Mutex<Option<PgTx>>>,
}

impl PostgresEngine {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn connect(url: &str) -> EngineResult<Self> {
        let pool = PgPool::connect(url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn execute_sql(&self, sql: &str) -> EngineResult<u64> {
        debug!(sql, "executing");
        let mut active = self.active.lock().await;
        let done = match active.as_mut() {
            Some(tx) => sqlx::query(sql).execute(&mut **tx).await?,
            None => sqlx::query(sql).execute(&self.pool).await?,
        };
        Ok(done.rows_affected())
    }

    async fn fetch_maybe(&self, sql: &str) -> EngineResult<Option<PgRow>> {
        debug!(sql, "fetching");
        let mut active = self.active.lock().await;
        let row = match active.as_mut() {
            Some(tx) => sqlx::query(sql).fetch_optional(&mut **tx).await?,
            None => sqlx::query(sql).fetch_optional(&self.pool).await?,
        };
        Ok(row)
    }

    async fn fetch_rows(&self, sql: &str) -> EngineResult<Vec<PgRow>> {
        debug!(sql, "fetching");
        let mut active = self.active.lock().await;
        let rows = match active.as_mut() {
            Some(tx) => sqlx::query(sql).fetch_all(&mut **tx).await?,
            None => sqlx::query(sql).fetch_all(&self.pool).await?,
        };
        Ok(rows)
    }
}

/// A single insert rendered as a one-row batch with the key returned.
fn insert_sql(table: &str, pk: &str, row: &Row) -> String {
    let columns: Vec<String> = row.keys().cloned().collect();
    let values = vec![row.values().cloned().collect::<Vec<Value>>()];
    format!(
        "{} RETURNING {}",
        sql::render(&Statement::BatchInsert {
            table,
            columns: &columns,
            rows: &values,
        }),
        pk
    )
}

fn decode_row(row: &PgRow) -> Row {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), decode_value(row, idx));
    }
    out
}

/// Column decoding by type cascade; values outside the JSON-expressible set
/// decode as NULL.
fn decode_value(row: &PgRow, idx: usize) -> Value {
    if let Ok(value) = row.try_get::<Option<i64>, _>(idx) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<i32>, _>(idx) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(idx) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<bool>, _>(idx) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(idx) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    Value::Null
}

#[async_trait]
impl Engine for PostgresEngine {
    async fn fetch_one(&self, plan: &QueryPlan) -> EngineResult<Option<Row>> {
        let narrowed = QueryPlan {
            limit: Some(1),
            ..plan.clone()
        };
        let sql = sql::render(&Statement::Select(&narrowed));
        Ok(self.fetch_maybe(&sql).await?.as_ref().map(decode_row))
    }

    async fn fetch_all(&self, plan: &QueryPlan) -> EngineResult<Vec<Row>> {
        let sql = sql::render(&Statement::Select(plan));
        Ok(self
            .fetch_rows(&sql)
            .await?
            .iter()
            .map(decode_row)
            .collect())
    }

    async fn aggregate(
        &self,
        plan: &QueryPlan,
        func: AggregateFunc,
        field: &str,
    ) -> EngineResult<Value> {
        let sql = sql::render(&Statement::Aggregate { plan, func, field });
        Ok(self
            .fetch_maybe(&sql)
            .await?
            .map(|row| decode_value(&row, 0))
            .unwrap_or(Value::Null))
    }

    async fn insert(&self, table: &str, pk: &str, row: Row) -> EngineResult<i64> {
        let sql = insert_sql(table, pk, &row);
        let returned = self.fetch_maybe(&sql).await?.ok_or_else(|| {
            EngineError::Execution(format!("insert into {table} returned no key"))
        })?;
        returned
            .try_get::<i64, _>(0)
            .map_err(|err| EngineError::Execution(err.to_string()))
    }

    async fn insert_many(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> EngineResult<u64> {
        let sql = sql::render(&Statement::BatchInsert {
            table,
            columns,
            rows,
        });
        self.execute_sql(&sql).await
    }

    async fn update_where(
        &self,
        table: &str,
        changes: &Changes,
        condition: &Condition,
    ) -> EngineResult<u64> {
        let sql = sql::render(&Statement::Update {
            table,
            changes,
            condition,
        });
        self.execute_sql(&sql).await
    }

    async fn delete_where(&self, table: &str, condition: &Condition) -> EngineResult<u64> {
        let sql = sql::render(&Statement::Delete { table, condition });
        self.execute_sql(&sql).await
    }

    async fn begin(&self) -> EngineResult<Box<dyn EngineTransaction>> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(EngineError::Transaction(
                "a transaction is already open on this engine".to_string(),
            ));
        }
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|err| EngineError::Transaction(err.to_string()))?;
        *active = Some(tx);
        Ok(Box::new(PostgresTransaction {
            active: Arc::clone(&self.active),
        }))
    }
}

struct PostgresTransaction {
    active: Arc<Mutex<Option<PgTx>>>,
}

#[async_trait]
impl EngineTransaction for PostgresTransaction {
    async fn commit(self: Box<Self>) -> EngineResult<()> {
        let taken = self.active.lock().await.take();
        match taken {
            Some(tx) => tx
                .commit()
                .await
                .map_err(|err| EngineError::Transaction(err.to_string())),
            None => Err(EngineError::Transaction(
                "transaction already finished".to_string(),
            )),
        }
    }

    async fn roll_back(self: Box<Self>) -> EngineResult<()> {
        let taken = self.active.lock().await.take();
        match taken {
            Some(tx) => tx
                .rollback()
                .await
                .map_err(|err| EngineError::Transaction(err.to_string())),
            None => Err(EngineError::Transaction(
                "transaction already finished".to_string(),
            )),
        }
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.try_lock() {
            if let Some(tx) = active.take() {
                // sqlx rolls the inner transaction back when it drops
                warn!("transaction handle dropped without commit or rollback");
                drop(tx);
            }
        }
    }
}
