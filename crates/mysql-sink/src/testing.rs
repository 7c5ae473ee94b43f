//! In-memory `TargetDatabase` for tests.
//!
//! `MemoryTarget` understands exactly the statement shapes produced by this
//! crate's builders and applies them to in-memory tables, enforcing primary
//! key uniqueness the way a MySQL table with a `PRIMARY KEY` does. Every
//! executed statement is recorded, including ones that failed.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use mysql_async::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use sync_core::{ColumnSet, Row, TableRef};

use crate::{Statement, TargetDatabase};

#[derive(Debug)]
struct MemoryTable {
    columns: ColumnSet,
    rows: Vec<Row>,
}

impl MemoryTable {
    fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .columns()
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| anyhow!("Unknown column '{name}'"))
    }

    fn key_of(&self, row: &Row) -> Option<Vec<Value>> {
        if !self.columns.has_primary_key() {
            return None;
        }
        Some(
            self.columns
                .primary_key()
                .iter()
                .map(|&i| row[i].clone())
                .collect(),
        )
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<TableRef, MemoryTable>,
    executed: Vec<Statement>,
    execute_calls: usize,
    fail_execute_calls: HashSet<usize>,
    fail_counts: HashSet<TableRef>,
}

/// Recording in-memory target with failure injection.
///
/// Clones share state, so a test can keep a handle while the code under test
/// owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryTarget {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A panic while holding the lock only happens inside a failing test.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create an empty table.
    pub fn create_table(&self, table: TableRef, columns: ColumnSet) {
        self.state().tables.insert(
            table,
            MemoryTable {
                columns,
                rows: Vec::new(),
            },
        );
    }

    /// Seed rows without recording a statement.
    pub fn seed_rows(&self, table: &TableRef, rows: Vec<Row>) {
        if let Some(t) = self.state().tables.get_mut(table) {
            t.rows.extend(rows);
        }
    }

    /// Current rows of a table, in insertion order.
    pub fn rows(&self, table: &TableRef) -> Vec<Row> {
        self.state()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Every statement passed to `execute`, in call order.
    pub fn executed(&self) -> Vec<Statement> {
        self.state().executed.clone()
    }

    /// Make the `n`-th call to `execute` (0-based) fail.
    pub fn fail_execute_call(&self, n: usize) {
        self.state().fail_execute_calls.insert(n);
    }

    /// Make `count_rows` fail for a table.
    pub fn fail_count_for(&self, table: TableRef) {
        self.state().fail_counts.insert(table);
    }
}

#[async_trait]
impl TargetDatabase for MemoryTarget {
    async fn count_rows(&self, table: &TableRef) -> Result<u64> {
        let state = self.state();
        if state.fail_counts.contains(table) {
            bail!("Injected count failure for {table}");
        }
        let t = state
            .tables
            .get(table)
            .ok_or_else(|| anyhow!("Table '{table}' doesn't exist"))?;
        Ok(t.rows.len() as u64)
    }

    async fn execute(&self, statement: Statement) -> Result<u64> {
        let mut state = self.state();
        let call = state.execute_calls;
        state.execute_calls += 1;
        state.executed.push(statement.clone());

        if state.fail_execute_calls.contains(&call) {
            bail!("Injected failure for execute call #{call}");
        }
        apply(&mut state.tables, &statement)
    }
}

fn apply(tables: &mut BTreeMap<TableRef, MemoryTable>, stmt: &Statement) -> Result<u64> {
    if let Some(rest) = stmt.sql.strip_prefix("INSERT INTO ") {
        apply_insert(tables, rest, &stmt.params)
    } else if let Some(rest) = stmt.sql.strip_prefix("UPDATE ") {
        apply_update(tables, rest, &stmt.params)
    } else if let Some(rest) = stmt.sql.strip_prefix("DELETE FROM ") {
        apply_delete(tables, rest, &stmt.params)
    } else {
        bail!("Unsupported statement: {}", stmt.sql)
    }
}

fn lookup<'a>(
    tables: &'a mut BTreeMap<TableRef, MemoryTable>,
    name: &str,
) -> Result<&'a mut MemoryTable> {
    let (database, table) = name
        .split_once('.')
        .ok_or_else(|| anyhow!("Unqualified table name '{name}'"))?;
    tables
        .get_mut(&TableRef::new(database, table))
        .ok_or_else(|| anyhow!("Table '{name}' doesn't exist"))
}

/// Column names of a `c1 = ? AND c2 = ?` or `c1 = ?, c2 = ?` list.
fn assigned_columns<'a>(list: &'a str, separator: &str) -> Result<Vec<&'a str>> {
    list.split(separator)
        .map(|part| {
            part.trim()
                .strip_suffix(" = ?")
                .ok_or_else(|| anyhow!("Unsupported predicate '{part}'"))
        })
        .collect()
}

fn matching_rows(table: &MemoryTable, key_columns: &[&str], key: &[Value]) -> Result<Vec<usize>> {
    let indices = key_columns
        .iter()
        .map(|c| table.column_index(c))
        .collect::<Result<Vec<_>>>()?;
    Ok(table
        .rows
        .iter()
        .enumerate()
        .filter(|(_, row)| indices.iter().zip(key).all(|(&i, v)| &row[i] == v))
        .map(|(pos, _)| pos)
        .collect())
}

fn apply_insert(
    tables: &mut BTreeMap<TableRef, MemoryTable>,
    rest: &str,
    params: &[Value],
) -> Result<u64> {
    let (name, rest) = rest
        .split_once(" (")
        .ok_or_else(|| anyhow!("Malformed INSERT"))?;
    let (column_list, _) = rest
        .split_once(") VALUES ")
        .ok_or_else(|| anyhow!("Malformed INSERT"))?;
    let table = lookup(tables, name)?;

    let columns: Vec<&str> = column_list.split(", ").collect();
    if columns.len() != table.columns.len() || params.len() % columns.len() != 0 {
        bail!("Column count doesn't match value count");
    }
    let indices = columns
        .iter()
        .map(|c| table.column_index(c))
        .collect::<Result<Vec<_>>>()?;

    let mut new_rows = Vec::new();
    for values in params.chunks(columns.len()) {
        let mut row = vec![Value::NULL; table.columns.len()];
        for (&i, v) in indices.iter().zip(values) {
            row[i] = v.clone();
        }
        new_rows.push(row);
    }

    // Multi-row inserts are all-or-nothing.
    let mut seen: HashSet<String> = table
        .rows
        .iter()
        .filter_map(|r| table.key_of(r))
        .map(|k| format!("{k:?}"))
        .collect();
    for row in &new_rows {
        if let Some(key) = table.key_of(row) {
            if !seen.insert(format!("{key:?}")) {
                bail!("Duplicate entry {key:?} for key 'PRIMARY'");
            }
        }
    }

    let inserted = new_rows.len() as u64;
    table.rows.extend(new_rows);
    Ok(inserted)
}

fn apply_update(
    tables: &mut BTreeMap<TableRef, MemoryTable>,
    rest: &str,
    params: &[Value],
) -> Result<u64> {
    let (name, rest) = rest
        .split_once(" SET ")
        .ok_or_else(|| anyhow!("Malformed UPDATE"))?;
    let (set_list, where_list) = rest
        .split_once(" WHERE ")
        .ok_or_else(|| anyhow!("Malformed UPDATE"))?;
    let table = lookup(tables, name)?;

    let set_columns = assigned_columns(set_list, ",")?;
    let key_columns = assigned_columns(where_list, " AND ")?;
    if params.len() != set_columns.len() + key_columns.len() {
        bail!("Parameter count doesn't match placeholders");
    }
    let (values, key) = params.split_at(set_columns.len());

    let set_indices = set_columns
        .iter()
        .map(|c| table.column_index(c))
        .collect::<Result<Vec<_>>>()?;
    let targets = matching_rows(table, &key_columns, key)?;

    for &pos in &targets {
        let mut updated = table.rows[pos].clone();
        for (&i, v) in set_indices.iter().zip(values) {
            updated[i] = v.clone();
        }
        if let Some(new_key) = table.key_of(&updated) {
            let clash = table
                .rows
                .iter()
                .enumerate()
                .any(|(other, row)| other != pos && table.key_of(row).as_ref() == Some(&new_key));
            if clash {
                bail!("Duplicate entry {new_key:?} for key 'PRIMARY'");
            }
        }
        table.rows[pos] = updated;
    }
    Ok(targets.len() as u64)
}

fn apply_delete(
    tables: &mut BTreeMap<TableRef, MemoryTable>,
    rest: &str,
    params: &[Value],
) -> Result<u64> {
    let (name, where_list) = rest
        .split_once(" WHERE ")
        .ok_or_else(|| anyhow!("Malformed DELETE"))?;
    let table = lookup(tables, name)?;

    let key_columns = assigned_columns(where_list, " AND ")?;
    if params.len() != key_columns.len() {
        bail!("Parameter count doesn't match placeholders");
    }
    let targets = matching_rows(table, &key_columns, params)?;

    for &pos in targets.iter().rev() {
        table.rows.remove(pos);
    }
    Ok(targets.len() as u64)
}
