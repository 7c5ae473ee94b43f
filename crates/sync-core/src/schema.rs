//! Table identity and column layout.
//!
//! The replication engine only needs two facts about a table: the ordered list
//! of its column names, and which of those columns form the primary key. Source
//! and target share the same column layout, so one [`ColumnSet`] describes both.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ============================================================================
// Error Types
// ============================================================================

/// Error type for column set construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// A table must have at least one column
    #[error("Table has no columns")]
    NoColumns,

    /// Primary key index points past the end of the column list
    #[error("Primary key index {index} is out of range for {columns} columns")]
    KeyIndexOutOfRange { index: usize, columns: usize },

    /// The same column was listed twice in the primary key
    #[error("Primary key column '{0}' is listed more than once")]
    DuplicateKeyColumn(String),

    /// Primary key names a column the table does not have
    #[error("Primary key column '{0}' is not a column of the table")]
    UnknownKeyColumn(String),
}

// ============================================================================
// Table identity
// ============================================================================

/// A fully qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub database: String,
    pub table: String,
}

impl TableRef {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

// ============================================================================
// Column layout
// ============================================================================

/// Ordered column names of a table with its primary-key subset.
///
/// Primary-key columns are stored as indices into the column list, in key
/// order. An empty key is representable; callers that need a key (update and
/// delete) must check [`ColumnSet::has_primary_key`] and refuse to proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSet {
    columns: Vec<String>,
    primary_key: Vec<usize>,
}

impl ColumnSet {
    /// Build a column set from column names and primary-key indices.
    pub fn new(columns: Vec<String>, primary_key: Vec<usize>) -> Result<Self, SchemaError> {
        if columns.is_empty() {
            return Err(SchemaError::NoColumns);
        }

        let mut seen = HashSet::new();
        for &index in &primary_key {
            let name = columns.get(index).ok_or(SchemaError::KeyIndexOutOfRange {
                index,
                columns: columns.len(),
            })?;
            if !seen.insert(index) {
                return Err(SchemaError::DuplicateKeyColumn(name.clone()));
            }
        }

        Ok(Self {
            columns,
            primary_key,
        })
    }

    /// Build a column set from column names and primary-key column names.
    pub fn with_key_names<S: AsRef<str>>(
        columns: Vec<String>,
        key_names: &[S],
    ) -> Result<Self, SchemaError> {
        let primary_key = key_names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                columns
                    .iter()
                    .position(|c| c == name)
                    .ok_or_else(|| SchemaError::UnknownKeyColumn(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(columns, primary_key)
    }

    /// Column names in table order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Primary-key column indices in key order.
    pub fn primary_key(&self) -> &[usize] {
        &self.primary_key
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Primary-key column names in key order.
    pub fn key_columns(&self) -> impl Iterator<Item = &str> {
        self.primary_key.iter().map(|&i| self.columns[i].as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_key_names_resolve_to_indices_in_key_order() {
        let set = ColumnSet::with_key_names(cols(&["a", "b", "c"]), &["c", "a"]).unwrap();
        assert_eq!(set.primary_key(), &[2, 0]);
        assert_eq!(set.key_columns().collect::<Vec<_>>(), vec!["c", "a"]);
        assert!(set.has_primary_key());
    }

    #[test]
    fn test_empty_key_is_allowed() {
        let set = ColumnSet::new(cols(&["a", "b"]), vec![]).unwrap();
        assert!(!set.has_primary_key());
        assert_eq!(set.key_columns().count(), 0);
    }

    #[test]
    fn test_rejects_invalid_keys() {
        assert_eq!(
            ColumnSet::new(cols(&["a"]), vec![1]),
            Err(SchemaError::KeyIndexOutOfRange {
                index: 1,
                columns: 1
            })
        );
        assert_eq!(
            ColumnSet::new(cols(&["a", "b"]), vec![0, 0]),
            Err(SchemaError::DuplicateKeyColumn("a".to_string()))
        );
        assert_eq!(
            ColumnSet::with_key_names(cols(&["a"]), &["id"]),
            Err(SchemaError::UnknownKeyColumn("id".to_string()))
        );
        assert_eq!(ColumnSet::new(vec![], vec![]), Err(SchemaError::NoColumns));
    }

    #[test]
    fn test_table_ref_display() {
        assert_eq!(TableRef::new("shop", "orders").to_string(), "shop.orders");
    }
}
