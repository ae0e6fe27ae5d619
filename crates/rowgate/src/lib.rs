//! # rowgate: typed data access over an ORM-style execution engine
//!
//! A thin layer between application code and a relational database. It
//! standardizes CRUD, batch, aggregate, and counter operations, wraps
//! multi-step writes in transactions, collects errors per access object, and
//! records the literal SQL issued for every composed query.
//!
//! The layer is built from four pieces:
//!
//! - condition composition and query plans ([`condition`], [`query`]), which
//!   merge per-call conditions with a persistent base filter and resolve the
//!   result shape from the field selection;
//! - [`Dao`], the per-model access object implementing the operations;
//! - the [`Engine`] contract ([`engine`]) standing for the execution layer,
//!   with an in-memory engine and a PostgreSQL engine shipped;
//! - [`Gateway`], a typed facade resolving registry-cached `Dao` singletons
//!   so call sites never manage instances.
//!
//! CRUD failures never propagate: operations return sentinel values (`0`,
//! `false`, empty) and leave typed detail in the access object's error log.

pub mod condition;
pub mod dao;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod query;
pub mod record;
pub mod registry;
pub mod sql;

#[cfg(test)]
mod tests;

pub use condition::{compose, raw, Changes, Condition, RawExpr, Selector, SetValue};
pub use dao::{Adjust, Dao, DaoConfig, Fetched, Listed};
pub use engine::memory::MemoryEngine;
pub use engine::postgres::PostgresEngine;
pub use engine::{Engine, EngineTransaction};
pub use error::{
    AccessError, AccessResult, EngineError, EngineResult, GatewayError, GatewayResult,
    ValidationError,
};
pub use gateway::{Gateway, GatewayConfig};
pub use query::{AggregateFunc, FieldList, QueryPlan};
pub use record::{Attrs, Record, Row};
pub use registry::Registry;
pub use sql::Statement;
