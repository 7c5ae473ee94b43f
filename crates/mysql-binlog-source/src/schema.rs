//! MySQL table metadata
//!
//! Replication only needs column order and the primary key, both read from
//! `INFORMATION_SCHEMA`.

use anyhow::{Context, Result};
use mysql_async::prelude::Queryable;
use std::collections::HashMap;
use std::sync::Arc;
use sync_core::{ColumnSet, TableRef};

/// Column names of a table in ordinal order.
pub async fn fetch_column_names(
    conn: &mut mysql_async::Conn,
    table: &TableRef,
) -> Result<Vec<String>> {
    let columns: Vec<String> = conn
        .exec(
            "SELECT COLUMN_NAME
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION",
            (table.database.as_str(), table.table.as_str()),
        )
        .await
        .with_context(|| format!("Failed to read columns of {table}"))?;

    if columns.is_empty() {
        anyhow::bail!("Table {table} does not exist or has no columns");
    }
    Ok(columns)
}

/// Column names and primary key of a table.
pub async fn fetch_column_set(conn: &mut mysql_async::Conn, table: &TableRef) -> Result<ColumnSet> {
    let columns = fetch_column_names(conn, table).await?;

    let key: Vec<String> = conn
        .exec(
            "SELECT COLUMN_NAME
            FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
                AND CONSTRAINT_NAME = 'PRIMARY'
            ORDER BY ORDINAL_POSITION",
            (table.database.as_str(), table.table.as_str()),
        )
        .await
        .with_context(|| format!("Failed to read primary key of {table}"))?;

    Ok(ColumnSet::with_key_names(columns, &key)?)
}

/// Column sets of the tables seen in the binlog, keyed by source table.
///
/// An entry is only served while its column count matches the count carried
/// by the current table map event; a mismatch means the table was altered and
/// the entry must be fetched again.
#[derive(Debug, Default)]
pub struct TableSchemaCache {
    entries: HashMap<TableRef, Arc<ColumnSet>>,
}

impl TableSchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, table: &TableRef, column_count: usize) -> Option<Arc<ColumnSet>> {
        self.entries
            .get(table)
            .filter(|columns| columns.len() == column_count)
            .cloned()
    }

    pub fn insert(&mut self, table: TableRef, columns: ColumnSet) -> Arc<ColumnSet> {
        let columns = Arc::new(columns);
        self.entries.insert(table, columns.clone());
        columns
    }

    pub fn invalidate(&mut self, table: &TableRef) {
        self.entries.remove(table);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders_columns(names: &[&str]) -> ColumnSet {
        ColumnSet::with_key_names(names.iter().map(|s| s.to_string()).collect(), &["id"]).unwrap()
    }

    #[test]
    fn test_cache_hit_requires_matching_column_count() {
        let mut cache = TableSchemaCache::new();
        let orders = TableRef::new("shop", "orders");
        cache.insert(orders.clone(), orders_columns(&["id", "amount"]));

        assert!(cache.get(&orders, 2).is_some());
        // Column added on the source: the cached layout is stale.
        assert!(cache.get(&orders, 3).is_none());
        assert!(cache.get(&TableRef::new("shop", "users"), 2).is_none());
    }

    #[test]
    fn test_insert_replaces_and_invalidate_removes() {
        let mut cache = TableSchemaCache::new();
        let orders = TableRef::new("shop", "orders");
        cache.insert(orders.clone(), orders_columns(&["id", "amount"]));
        let fresh = cache.insert(orders.clone(), orders_columns(&["id", "amount", "note"]));

        assert_eq!(fresh.len(), 3);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&orders, 3).is_some());

        cache.invalidate(&orders);
        assert!(cache.is_empty());
    }
}
