//! MySQL target writes.
//!
//! This crate turns row images into parameterised `INSERT`, `UPDATE` and
//! `DELETE` statements and defines the `TargetDatabase` trait the snapshot
//! engine and the change dispatcher write through. `MySQLTarget` implements
//! it over a `mysql_async` pool; `testing::MemoryTarget` is an in-memory
//! implementation for tests.

mod mysql;
pub mod testing;
mod traits;
mod write;

pub use mysql::MySQLTarget;
pub use traits::TargetDatabase;
pub use write::{
    batch_insert_statement, delete_statement, insert_statement, update_statement, Statement,
    WriteError,
};
