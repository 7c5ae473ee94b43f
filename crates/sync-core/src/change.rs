//! Row-level change events.

use crate::schema::{ColumnSet, TableRef};
use mysql_async::Value;
use std::sync::Arc;

/// One row's values, in the column order of its [`ColumnSet`].
pub type Row = Vec<Value>;

/// A single row change as captured from the source change log.
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    Insert(Row),
    Update { before: Row, after: Row },
    Delete(Row),
}

impl RowChange {
    pub fn kind(&self) -> &'static str {
        match self {
            RowChange::Insert(_) => "insert",
            RowChange::Update { .. } => "update",
            RowChange::Delete(_) => "delete",
        }
    }
}

/// A row change bound to the source table it happened in.
///
/// The column set is shared between all events of the same table so that
/// decoding a large rows event does not clone the column names per row.
#[derive(Debug, Clone)]
pub struct RowChangeEvent {
    pub table: TableRef,
    pub columns: Arc<ColumnSet>,
    pub change: RowChange,
}

impl RowChangeEvent {
    pub fn new(table: TableRef, columns: Arc<ColumnSet>, change: RowChange) -> Self {
        Self {
            table,
            columns,
            change,
        }
    }
}
