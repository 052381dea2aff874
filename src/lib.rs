//! Embedded document database with map-reduce secondary views over an ordered
//! key-value store.
//!
//! [`Database`] provides document CRUD with optimistic concurrency; [`query`]
//! provides a fluent builder for reading back materialized views defined with
//! [`Database::define_view`].

pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod executor;
pub mod key;
pub mod kv;
pub mod query;
pub mod view;

pub use config::Settings;
pub use db::Database;
pub use document::{Document, InsertResult};
pub use error::{Result, ViewBaseError};
pub use executor::QueryOutcome;
pub use query::{Direction, QueryBuilder};
pub use view::{MapFn, ReduceFn, ReducedRow, Row};
