//! Typed per-model gateways.
//!
//! A gateway binds a record type to its process-wide `Dao` singleton so call
//! sites issue queries without managing instance lifecycles. Configuration
//! happens once at startup; later call sites resolve the cached state through
//! the registry. Fetched records convert to raw rows on the way out when
//! conversion is enabled, which is the default.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::condition::{Condition, Selector};
use crate::dao::{Adjust, Dao, DaoConfig, Fetched, Listed};
use crate::engine::Engine;
use crate::error::{AccessError, GatewayError, GatewayResult};
use crate::query::FieldList;
use crate::record::{self, Attrs, Record};
use crate::registry::Registry;

/// Startup configuration for a model's gateway.
#[derive(Clone)]
pub struct GatewayConfig {
    pub engine: Arc<dyn Engine>,
    pub base_where: Option<Condition>,
    /// Convert fetched records to raw rows.
    pub convert_rows: bool,
    pub log_sql: bool,
}

impl GatewayConfig {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            base_where: None,
            convert_rows: true,
            log_sql: true,
        }
    }

    pub fn base_where(mut self, condition: impl Into<Condition>) -> Self {
        self.base_where = Some(condition.into());
        self
    }

    pub fn convert_rows(mut self, convert: bool) -> Self {
        self.convert_rows = convert;
        self
    }

    pub fn log_sql(mut self, log_sql: bool) -> Self {
        self.log_sql = log_sql;
        self
    }
}

struct GatewayState<M: Record> {
    dao: Arc<Dao<M>>,
    convert: AtomicBool,
}

/// A cheap handle bound to one model's cached access object.
pub struct Gateway<M: Record> {
    state: Arc<GatewayState<M>>,
}

impl<M: Record> Clone for Gateway<M> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<M: Record> Gateway<M> {
    fn registry_key() -> String {
        format!("Access{}", M::model_name())
    }

    /// Binds `M` to an engine and configuration, creating the cached access
    /// object on first use. Calling again reconfigures the cached state in
    /// place; the engine binding stays with the first call.
    pub fn configure(config: GatewayConfig) -> Gateway<M> {
        let state = Registry::global().get_or_insert_with(&Self::registry_key(), || {
            debug!(model = M::model_name(), "creating access object");
            Arc::new(GatewayState {
                dao: Arc::new(Dao::with_config(
                    Arc::clone(&config.engine),
                    DaoConfig {
                        base_where: config.base_where.clone(),
                        as_rows: false,
                        log_sql: config.log_sql,
                    },
                )),
                convert: AtomicBool::new(config.convert_rows),
            })
        });
        state.convert.store(config.convert_rows, Ordering::Relaxed);
        if let Some(base) = config.base_where {
            state.dao.set_base_where(base);
        }
        Gateway { state }
    }

    /// Resolves the configured gateway for `M`.
    pub fn bound() -> GatewayResult<Gateway<M>> {
        Registry::global()
            .get::<GatewayState<M>, _>(&Self::registry_key())
            .map(|state| Gateway { state })
            .ok_or(GatewayError::NotConfigured(M::model_name()))
    }

    /// The cached access object, for log access and advanced calls.
    pub fn dao(&self) -> Arc<Dao<M>> {
        Arc::clone(&self.state.dao)
    }

    /// Replaces the persistent filter on the cached access object.
    pub fn set_base_where(&self, condition: impl Into<Condition>) {
        self.state.dao.set_base_where(condition);
    }

    /// Toggles record → row conversion of fetched results.
    pub fn set_convert_rows(&self, convert: bool) {
        self.state.convert.store(convert, Ordering::Relaxed);
    }

    fn converts(&self) -> bool {
        self.state.convert.load(Ordering::Relaxed)
    }

    /// Raw rows, scalars, and the empty sentinel pass through untouched.
    fn convert_one(&self, fetched: Fetched<M>) -> Fetched<M> {
        if !self.converts() {
            return fetched;
        }
        match fetched {
            Fetched::Record(model) => Fetched::Row(record::to_row(&model)),
            other => other,
        }
    }

    fn convert_many(&self, listed: Listed<M>) -> Listed<M> {
        if !self.converts() {
            return listed;
        }
        match listed {
            Listed::Records(models) => Listed::Rows(models.iter().map(record::to_row).collect()),
            other => other,
        }
    }

    pub async fn get(
        &self,
        where_: impl Into<Selector>,
        fields: impl Into<FieldList>,
        order: impl Into<String>,
    ) -> Fetched<M> {
        self.convert_one(self.state.dao.get(where_, fields, order).await)
    }

    pub async fn get_all(
        &self,
        where_: impl Into<Selector>,
        fields: impl Into<FieldList>,
        order: impl Into<String>,
    ) -> Listed<M> {
        self.convert_many(self.state.dao.get_all(where_, fields, order).await)
    }

    pub async fn get_page(
        &self,
        where_: impl Into<Selector>,
        page: i64,
        limit: i64,
        fields: impl Into<FieldList>,
        order: impl Into<String>,
    ) -> Listed<M> {
        self.convert_many(
            self.state
                .dao
                .get_page(where_, page, limit, fields, order)
                .await,
        )
    }

    pub async fn add(&self, data: impl Into<Attrs>) -> i64 {
        self.state.dao.add(data).await
    }

    pub async fn add_all(&self, data: impl IntoIterator<Item = impl Into<Attrs>>) -> Vec<i64> {
        self.state.dao.add_all(data).await
    }

    pub async fn batch_insert(&self, data: impl IntoIterator<Item = impl Into<Attrs>>) -> u64 {
        self.state.dao.batch_insert(data).await
    }

    pub async fn update(&self, where_: impl Into<Selector>, data: impl Into<Attrs>) -> bool {
        self.state.dao.update(where_, data).await
    }

    pub async fn update_all(&self, where_: impl Into<Selector>, data: impl Into<Attrs>) -> bool {
        self.state.dao.update_all(where_, data).await
    }

    pub async fn delete(&self, where_: impl Into<Selector>) -> bool {
        self.state.dao.delete(where_).await
    }

    pub async fn delete_all(&self, where_: impl Into<Selector>) -> u64 {
        self.state.dao.delete_all(where_).await
    }

    pub async fn count(&self, where_: impl Into<Selector>, field: &str) -> i64 {
        self.state.dao.count(where_, field).await
    }

    pub async fn sum(&self, where_: impl Into<Selector>, field: &str) -> i64 {
        self.state.dao.sum(where_, field).await
    }

    pub async fn min(&self, where_: impl Into<Selector>, field: &str) -> i64 {
        self.state.dao.min(where_, field).await
    }

    pub async fn max(&self, where_: impl Into<Selector>, field: &str) -> i64 {
        self.state.dao.max(where_, field).await
    }

    pub async fn inc(
        &self,
        where_: impl Into<Selector>,
        target: impl Into<Adjust>,
        step: i64,
    ) -> bool {
        self.state.dao.inc(where_, target, step).await
    }

    pub async fn dec(
        &self,
        where_: impl Into<Selector>,
        target: impl Into<Adjust>,
        step: i64,
    ) -> bool {
        self.state.dao.dec(where_, target, step).await
    }

    /// First collected error on the cached access object.
    pub fn error(&self) -> Option<AccessError> {
        self.state.dao.error()
    }

    /// Every collected error on the cached access object.
    pub fn errors(&self) -> Vec<AccessError> {
        self.state.dao.errors()
    }

    /// The most recently captured statement.
    pub fn last_sql(&self) -> Option<String> {
        self.state.dao.last_sql()
    }
}
