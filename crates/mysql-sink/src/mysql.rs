//! `TargetDatabase` over a MySQL connection pool.

use anyhow::{Context, Result};
use async_trait::async_trait;
use mysql_async::{prelude::Queryable, Pool};
use sync_core::TableRef;
use tracing::debug;

use crate::{Statement, TargetDatabase};

/// MySQL/MariaDB replication target.
#[derive(Clone)]
pub struct MySQLTarget {
    pool: Pool,
}

impl MySQLTarget {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl TargetDatabase for MySQLTarget {
    async fn count_rows(&self, table: &TableRef) -> Result<u64> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .context("Failed to get target connection")?;
        let count: Option<u64> = conn
            .query_first(format!("SELECT COUNT(1) FROM {table}"))
            .await
            .with_context(|| format!("Failed to count rows of {table}"))?;
        Ok(count.unwrap_or(0))
    }

    async fn execute(&self, statement: Statement) -> Result<u64> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .context("Failed to get target connection")?;

        debug!("Executing: {}", statement.sql);
        let params = statement.to_params();
        conn.exec_drop(statement.sql.as_str(), params)
            .await
            .with_context(|| format!("Failed to execute '{}'", statement.sql))?;
        Ok(conn.affected_rows())
    }
}
