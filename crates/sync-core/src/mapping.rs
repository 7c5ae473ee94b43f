//! Source → target table routing.
//!
//! A [`DatabaseMapping`] is what the user writes in the configuration file. The
//! validated, lookup-friendly form is [`MappingTable`], built once at startup
//! and shared read-only by the snapshot engine, the dispatcher and the reader.

use crate::schema::TableRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Error type for mapping validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    /// A database or table name was left empty
    #[error("Empty {field} in mapping #{mapping}")]
    EmptyName { mapping: usize, field: &'static str },

    /// The same source table was mapped more than once
    #[error("Source table {0} is mapped more than once")]
    DuplicateSourceTable(TableRef),
}

/// One database-level mapping entry from the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseMapping {
    pub source_database: String,
    pub target_database: String,
    pub tables: Vec<TableMapping>,
}

/// One table-level mapping entry. Columns are carried over by name and order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMapping {
    pub source_table: String,
    pub target_table: String,
}

/// Where events for one source table are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRoute {
    pub target_database: String,
    pub target_table: String,
}

impl TableRoute {
    pub fn table_ref(&self) -> TableRef {
        TableRef::new(&self.target_database, &self.target_table)
    }
}

/// A resolved source/target table pair, in configuration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePair {
    pub source: TableRef,
    pub target: TableRef,
}

/// Validated, immutable mapping lookup.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    pairs: Vec<TablePair>,
    /// source database -> source table -> route
    routes: HashMap<String, HashMap<String, TableRoute>>,
}

impl MappingTable {
    /// Validate the configured mappings and build the lookup.
    pub fn new(mappings: Vec<DatabaseMapping>) -> Result<Self, MappingError> {
        let mut pairs = Vec::new();
        let mut routes: HashMap<String, HashMap<String, TableRoute>> = HashMap::new();

        for (idx, mapping) in mappings.into_iter().enumerate() {
            require_name(&mapping.source_database, idx, "source_database")?;
            require_name(&mapping.target_database, idx, "target_database")?;

            for table in mapping.tables {
                require_name(&table.source_table, idx, "source_table")?;
                require_name(&table.target_table, idx, "target_table")?;

                let source = TableRef::new(&mapping.source_database, &table.source_table);
                let route = TableRoute {
                    target_database: mapping.target_database.clone(),
                    target_table: table.target_table,
                };

                let tables = routes.entry(source.database.clone()).or_default();
                if tables.contains_key(&source.table) {
                    return Err(MappingError::DuplicateSourceTable(source));
                }

                pairs.push(TablePair {
                    target: route.table_ref(),
                    source: source.clone(),
                });
                tables.insert(source.table, route);
            }
        }

        Ok(Self { pairs, routes })
    }

    /// Look up the target for a source table.
    pub fn resolve(&self, database: &str, table: &str) -> Option<&TableRoute> {
        self.routes.get(database)?.get(table)
    }

    /// All table pairs in configuration order.
    pub fn pairs(&self) -> impl Iterator<Item = &TablePair> {
        self.pairs.iter()
    }

    /// All mapped source tables in configuration order.
    pub fn source_tables(&self) -> impl Iterator<Item = &TableRef> {
        self.pairs.iter().map(|p| &p.source)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

fn require_name(value: &str, mapping: usize, field: &'static str) -> Result<(), MappingError> {
    if value.trim().is_empty() {
        return Err(MappingError::EmptyName { mapping, field });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(source: &str, target: &str, tables: &[(&str, &str)]) -> DatabaseMapping {
        DatabaseMapping {
            source_database: source.to_string(),
            target_database: target.to_string(),
            tables: tables
                .iter()
                .map(|(s, t)| TableMapping {
                    source_table: s.to_string(),
                    target_table: t.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_resolve_mapped_table() {
        let table = MappingTable::new(vec![mapping(
            "sourceDB",
            "targetDB",
            &[("orders", "orders"), ("users", "customers")],
        )])
        .unwrap();

        let route = table.resolve("sourceDB", "users").unwrap();
        assert_eq!(route.target_database, "targetDB");
        assert_eq!(route.target_table, "customers");
        assert_eq!(route.table_ref().to_string(), "targetDB.customers");
    }

    #[test]
    fn test_resolve_unmapped_returns_none() {
        let table =
            MappingTable::new(vec![mapping("sourceDB", "targetDB", &[("orders", "orders")])])
                .unwrap();

        assert!(table.resolve("sourceDB", "payments").is_none());
        assert!(table.resolve("otherDB", "orders").is_none());
    }

    #[test]
    fn test_pairs_keep_configuration_order() {
        let table = MappingTable::new(vec![
            mapping("a", "a2", &[("t2", "t2"), ("t1", "t1")]),
            mapping("b", "b2", &[("t0", "t0")]),
        ])
        .unwrap();

        let sources: Vec<String> = table.source_tables().map(|t| t.to_string()).collect();
        assert_eq!(sources, vec!["a.t2", "a.t1", "b.t0"]);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_duplicate_source_table_is_rejected() {
        let err = MappingTable::new(vec![
            mapping("a", "x", &[("orders", "orders")]),
            mapping("a", "y", &[("orders", "orders_copy")]),
        ])
        .unwrap_err();

        assert_eq!(
            err,
            MappingError::DuplicateSourceTable(TableRef::new("a", "orders"))
        );
    }

    #[test]
    fn test_empty_names_are_rejected() {
        let err = MappingTable::new(vec![mapping("a", "b", &[("orders", " ")])]).unwrap_err();
        assert_eq!(
            err,
            MappingError::EmptyName {
                mapping: 0,
                field: "target_table"
            }
        );
    }

    #[test]
    fn test_mapping_deserializes_from_yaml() {
        let yaml = r#"
source_database: shop
target_database: shop_replica
tables:
  - source_table: orders
    target_table: orders
"#;
        let parsed: DatabaseMapping = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed, mapping("shop", "shop_replica", &[("orders", "orders")]));
    }
}
