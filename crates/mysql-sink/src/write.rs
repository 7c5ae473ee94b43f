//! SQL statement synthesis for target writes.
//!
//! Every statement uses positional `?` placeholders; row values are never
//! interpolated into SQL text. Identifiers are written as `database.table`
//! and plain column names, exactly as they appear in the mapping and the
//! source schema.

use mysql_async::{Params, Value};
use sync_core::{ColumnSet, Row, TableRef};

/// Error type for statement synthesis.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// Update and delete need a primary key to address the row
    #[error("Table {0} has no primary key; refusing to build an unconstrained statement")]
    NoPrimaryKey(TableRef),

    /// Row arity does not match the column list
    #[error("Row for {table} has {actual} values but {expected} columns")]
    ColumnCountMismatch {
        table: TableRef,
        expected: usize,
        actual: usize,
    },
}

/// A parameterised SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn to_params(&self) -> Params {
        if self.params.is_empty() {
            Params::Empty
        } else {
            Params::Positional(self.params.clone())
        }
    }
}

/// `INSERT INTO db.t (c1, c2) VALUES (?, ?)`
pub fn insert_statement(
    target: &TableRef,
    columns: &[String],
    row: Row,
) -> Result<Statement, WriteError> {
    check_arity(target, columns.len(), &row)?;
    Ok(Statement {
        sql: format!(
            "INSERT INTO {target} ({}) VALUES {}",
            columns.join(", "),
            placeholder_group(columns.len())
        ),
        params: row,
    })
}

/// Multi-row insert with one placeholder group per row.
///
/// Returns `None` when there are no rows to insert.
pub fn batch_insert_statement(
    target: &TableRef,
    columns: &[String],
    rows: Vec<Row>,
) -> Result<Option<Statement>, WriteError> {
    if rows.is_empty() {
        return Ok(None);
    }

    let group = placeholder_group(columns.len());
    let mut params = Vec::with_capacity(rows.len() * columns.len());
    let mut groups = Vec::with_capacity(rows.len());
    for row in rows {
        check_arity(target, columns.len(), &row)?;
        params.extend(row);
        groups.push(group.as_str());
    }

    Ok(Some(Statement {
        sql: format!(
            "INSERT INTO {target} ({}) VALUES {}",
            columns.join(", "),
            groups.join(", ")
        ),
        params,
    }))
}

/// `UPDATE db.t SET c1 = ?, c2 = ? WHERE pk1 = ? AND pk2 = ?`
///
/// Every column is assigned from `after`; the row is addressed by the key
/// values of `before`, so key changes are applied too.
pub fn update_statement(
    target: &TableRef,
    columns: &ColumnSet,
    before: &Row,
    after: Row,
) -> Result<Statement, WriteError> {
    require_key(target, columns)?;
    check_arity(target, columns.len(), before)?;
    check_arity(target, columns.len(), &after)?;

    let assignments = columns
        .columns()
        .iter()
        .map(|c| format!("{c} = ?"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut params = after;
    params.extend(key_values(columns, before));

    Ok(Statement {
        sql: format!(
            "UPDATE {target} SET {assignments} WHERE {}",
            key_predicate(columns)
        ),
        params,
    })
}

/// `DELETE FROM db.t WHERE pk1 = ?`
pub fn delete_statement(
    target: &TableRef,
    columns: &ColumnSet,
    row: &Row,
) -> Result<Statement, WriteError> {
    require_key(target, columns)?;
    check_arity(target, columns.len(), row)?;

    Ok(Statement {
        sql: format!("DELETE FROM {target} WHERE {}", key_predicate(columns)),
        params: key_values(columns, row).collect(),
    })
}

fn placeholder_group(count: usize) -> String {
    format!("({})", vec!["?"; count].join(", "))
}

fn key_predicate(columns: &ColumnSet) -> String {
    columns
        .key_columns()
        .map(|c| format!("{c} = ?"))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn key_values<'a>(columns: &'a ColumnSet, row: &'a Row) -> impl Iterator<Item = Value> + 'a {
    columns.primary_key().iter().map(|&i| row[i].clone())
}

fn require_key(target: &TableRef, columns: &ColumnSet) -> Result<(), WriteError> {
    if columns.has_primary_key() {
        Ok(())
    } else {
        Err(WriteError::NoPrimaryKey(target.clone()))
    }
}

fn check_arity(target: &TableRef, expected: usize, row: &Row) -> Result<(), WriteError> {
    if row.len() == expected {
        Ok(())
    } else {
        Err(WriteError::ColumnCountMismatch {
            table: target.clone(),
            expected,
            actual: row.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> TableRef {
        TableRef::new("targetDB", "orders")
    }

    fn columns(names: &[&str], key: &[&str]) -> ColumnSet {
        ColumnSet::with_key_names(names.iter().map(|s| s.to_string()).collect(), key).unwrap()
    }

    fn names(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_insert_statement() {
        let stmt = insert_statement(
            &orders(),
            &names(&["id", "amount"]),
            vec![Value::Int(7), Value::Int(42)],
        )
        .unwrap();
        assert_eq!(stmt.sql, "INSERT INTO targetDB.orders (id, amount) VALUES (?, ?)");
        assert_eq!(stmt.params, vec![Value::Int(7), Value::Int(42)]);
    }

    #[test]
    fn test_batch_insert_statement() {
        let rows = vec![
            vec![Value::Int(1), Value::Bytes(b"a".to_vec())],
            vec![Value::Int(2), Value::NULL],
        ];
        let stmt = batch_insert_statement(&orders(), &names(&["id", "note"]), rows)
            .unwrap()
            .unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO targetDB.orders (id, note) VALUES (?, ?), (?, ?)"
        );
        assert_eq!(stmt.params.len(), 4);
        assert_eq!(stmt.params[3], Value::NULL);

        assert_eq!(
            batch_insert_statement(&orders(), &names(&["id"]), vec![]).unwrap(),
            None
        );
    }

    #[test]
    fn test_update_statement_uses_old_key() {
        let cols = columns(&["id", "amount"], &["id"]);
        let stmt = update_statement(
            &orders(),
            &cols,
            &vec![Value::Int(7), Value::Int(42)],
            vec![Value::Int(7), Value::Int(99)],
        )
        .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE targetDB.orders SET id = ?, amount = ? WHERE id = ?"
        );
        assert_eq!(stmt.params, vec![Value::Int(7), Value::Int(99), Value::Int(7)]);
    }

    #[test]
    fn test_update_statement_composite_key_in_key_order() {
        let cols = columns(&["region", "id", "qty"], &["id", "region"]);
        let stmt = update_statement(
            &orders(),
            &cols,
            &vec![Value::Int(1), Value::Int(5), Value::Int(0)],
            vec![Value::Int(2), Value::Int(5), Value::Int(3)],
        )
        .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE targetDB.orders SET region = ?, id = ?, qty = ? WHERE id = ? AND region = ?"
        );
        assert_eq!(
            stmt.params,
            vec![
                Value::Int(2),
                Value::Int(5),
                Value::Int(3),
                Value::Int(5),
                Value::Int(1)
            ]
        );
    }

    #[test]
    fn test_delete_statement() {
        let cols = columns(&["id", "amount"], &["id"]);
        let stmt =
            delete_statement(&orders(), &cols, &vec![Value::Int(7), Value::Int(99)]).unwrap();
        assert_eq!(stmt.sql, "DELETE FROM targetDB.orders WHERE id = ?");
        assert_eq!(stmt.params, vec![Value::Int(7)]);
    }

    #[test]
    fn test_keyless_update_and_delete_are_rejected() {
        let cols = columns(&["a", "b"], &[] as &[&str]);
        let row = vec![Value::Int(1), Value::Int(2)];

        assert_eq!(
            update_statement(&orders(), &cols, &row, row.clone()),
            Err(WriteError::NoPrimaryKey(orders()))
        );
        assert_eq!(
            delete_statement(&orders(), &cols, &row),
            Err(WriteError::NoPrimaryKey(orders()))
        );
    }

    #[test]
    fn test_arity_mismatch_is_rejected() {
        let err = insert_statement(&orders(), &names(&["id", "amount"]), vec![Value::Int(7)])
            .unwrap_err();
        assert_eq!(
            err,
            WriteError::ColumnCountMismatch {
                table: orders(),
                expected: 2,
                actual: 1
            }
        );

        let cols = columns(&["id", "amount"], &["id"]);
        assert!(delete_statement(&orders(), &cols, &vec![Value::Int(7)]).is_err());
    }

    #[test]
    fn test_to_params() {
        let stmt = Statement {
            sql: "SELECT 1".to_string(),
            params: vec![],
        };
        assert!(matches!(stmt.to_params(), Params::Empty));
    }
}
