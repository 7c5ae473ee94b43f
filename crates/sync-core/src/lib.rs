//! Core types for the mysql-sync replication engine.
//!
//! This crate provides the foundational types shared by the snapshot engine,
//! the change dispatcher and the binlog reader:
//!
//! - [`MappingTable`] - Validated source table → target table routing
//! - [`ColumnSet`] - Ordered column names with the primary-key subset
//! - [`RowChangeEvent`] - A decoded insert/update/delete for one source row
//! - [`ConnectionDescriptor`] - A parsed and validated connection string
//!
//! # Architecture
//!
//! ```text
//! sync-core (this crate)
//!    │
//!    ├─── checkpoint               (independent, position persistence)
//!    ├─── mysql-sink               (statements built from ColumnSet + rows)
//!    └─── mysql-binlog-source      (snapshot, dispatcher, binlog reader)
//! ```
//!
//! Row values are plain [`mysql_async::Value`]s: source and target speak the
//! same wire types, so values flow from the binlog to the target unchanged.

pub mod change;
pub mod dsn;
pub mod mapping;
pub mod schema;

pub use change::{Row, RowChange, RowChangeEvent};
pub use dsn::{new_mysql_pool, ConnectionDescriptor, DsnError};
pub use mapping::{
    DatabaseMapping, MappingError, MappingTable, TableMapping, TablePair, TableRoute,
};
pub use schema::{ColumnSet, SchemaError, TableRef};

pub use mysql_async::Value;
