//! Relational store abstraction.
//!
//! The lifecycle manager and the scoped executor talk to the database through
//! [`RelationalStore`] and [`StoreConnection`]. A connection is a pooled
//! session: `search_path` set on it survives until it is reset, which is why
//! scoped execution always resets before a connection goes back to the pool.
//!
//! Two implementations are provided:
//!
//! - [`InMemoryStore`]: a catalog-only store for tests and dry runs
//! - `PostgresStore` (feature `postgres`): deadpool-postgres backed

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

use std::fmt::Debug;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::BackendError;
use crate::tenant::SchemaName;

pub use memory::{InMemoryConnection, InMemoryStore};
#[cfg(feature = "postgres")]
pub use postgres::{PostgresConfig, PostgresConnection, PostgresSslMode, PostgresStore};

/// Rows returned by [`StoreConnection::query`], as text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryResult {
    /// Column names, in select-list order.
    pub columns: Vec<String>,
    /// One entry per row; `None` is SQL `NULL`.
    pub rows: Vec<Vec<Option<String>>>,
    /// Rows reported by the command tag.
    pub rows_affected: u64,
}

impl QueryResult {
    /// Returns the value at `row`, `column`.
    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(index)?.as_deref()
    }

    /// Returns true if no rows came back.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A pooled relational store.
#[async_trait]
pub trait RelationalStore: Send + Sync + Debug {
    /// The session type handed out by [`acquire`](Self::acquire).
    type Connection: StoreConnection;

    /// Returns a human-readable name for this store.
    fn name(&self) -> &'static str;

    /// Acquires a session from the pool. Dropping it returns it.
    async fn acquire(&self) -> Result<Self::Connection, BackendError>;
}

/// One database session.
#[async_trait]
pub trait StoreConnection: Send {
    /// Executes a statement and returns the affected row count.
    async fn execute(&mut self, sql: &str) -> Result<u64, BackendError>;

    /// Runs a statement and returns its rows.
    async fn query(&mut self, sql: &str) -> Result<QueryResult, BackendError>;

    /// Returns whether `schema` exists.
    async fn schema_exists(&mut self, schema: &SchemaName) -> Result<bool, BackendError>;

    /// Returns the comment attached to `schema`.
    async fn schema_comment(&mut self, schema: &SchemaName)
    -> Result<Option<String>, BackendError>;

    /// Returns the entries of `tables` that do not exist in `schema`.
    async fn missing_tables(
        &mut self,
        schema: &SchemaName,
        tables: &[&str],
    ) -> Result<Vec<String>, BackendError>;

    /// Lists schema names starting with `prefix`, sorted.
    async fn list_schemas(&mut self, prefix: &str) -> Result<Vec<String>, BackendError>;

    /// Returns the session's current `search_path` as reported by the store.
    async fn current_search_path(&mut self) -> Result<String, BackendError>;

    /// Opens a transaction.
    async fn begin(&mut self) -> Result<(), BackendError> {
        self.execute("BEGIN").await.map(|_| ())
    }

    /// Commits the open transaction.
    async fn commit(&mut self) -> Result<(), BackendError> {
        self.execute("COMMIT").await.map(|_| ())
    }

    /// Rolls back the open transaction.
    async fn rollback(&mut self) -> Result<(), BackendError> {
        self.execute("ROLLBACK").await.map(|_| ())
    }

    /// Scopes unqualified names in this session to `schemas`, in order.
    async fn set_search_path(&mut self, schemas: &[SchemaName]) -> Result<(), BackendError> {
        let path = schemas
            .iter()
            .map(SchemaName::quoted)
            .collect::<Vec<_>>()
            .join(", ");
        self.execute(&format!("SET search_path TO {}", path))
            .await
            .map(|_| ())
    }

    /// Restores the session's default `search_path`.
    async fn reset_search_path(&mut self) -> Result<(), BackendError> {
        self.execute("RESET search_path").await.map(|_| ())
    }

    /// Detaches the session from its pool so it is closed instead of reused.
    fn discard(&mut self);

    /// Returns true once [`discard`](Self::discard) was called.
    fn is_discarded(&self) -> bool;
}
