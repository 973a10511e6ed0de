//! PostgreSQL store adapter.
//!
//! The keyspace maps to a schema and each container to a table whose primary
//! key is the partition key followed by the clustering key. Full-record and
//! partial clip inserts are rendered as upserts by [`PostgresDialect`], so a
//! clip event updates only `clipped` and `updated` on an existing row.

use crate::dialect::{Dialect, PostgresDialect};
use crate::error::{Result, StoreError};
use crate::session::{Prepared, StoreSession, WriteFuture};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use loyalty_core::{ColumnType, ResultSet, Row, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls, Statement};
use tracing::{debug, error, info, warn};

/// Connection settings shared by every node.
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    pub connect_timeout: Duration,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            database: "postgres".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// A session on a PostgreSQL server.
pub struct PostgresSession {
    client: Arc<Client>,
    connection: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for PostgresSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSession")
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl PostgresSession {
    /// Connect to the first node in `nodes` that accepts a connection.
    pub async fn connect(nodes: &[String], options: &PostgresOptions) -> Result<Self> {
        if nodes.is_empty() {
            return Err(StoreError::Connection("no nodes supplied".to_string()));
        }

        let mut failures = Vec::new();
        for node in nodes {
            let mut config = tokio_postgres::Config::new();
            config
                .host(node)
                .port(options.port)
                .user(&options.user)
                .dbname(&options.database)
                .connect_timeout(options.connect_timeout);
            if let Some(password) = &options.password {
                config.password(password);
            }

            match config.connect(NoTls).await {
                Ok((client, connection)) => {
                    let node_name = node.clone();
                    let task = tokio::spawn(async move {
                        if let Err(e) = connection.await {
                            error!("PostgreSQL connection to {} failed: {e}", node_name);
                        }
                    });

                    if let Err(e) = client.simple_query("SELECT 1").await {
                        task.abort();
                        warn!("Node {} accepted a connection but failed the health check: {e}", node);
                        failures.push(format!("{node}: {e}"));
                        continue;
                    }

                    info!("Connected to PostgreSQL at {}:{}", node, options.port);
                    return Ok(Self {
                        client: Arc::new(client),
                        connection: Mutex::new(Some(task)),
                        closed: AtomicBool::new(false),
                    });
                }
                Err(e) => {
                    warn!("Failed to connect to {}:{}: {e}", node, options.port);
                    failures.push(format!("{node}: {e}"));
                }
            }
        }

        Err(StoreError::Connection(format!(
            "no node accepted a connection ({})",
            failures.join("; ")
        )))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::SessionClosed)
        } else {
            Ok(())
        }
    }
}

/// Column type for a PostgreSQL parameter or result type.
pub(crate) fn column_type_for(pg_type: &Type) -> Option<ColumnType> {
    match *pg_type {
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => Some(ColumnType::Text),
        Type::BOOL => Some(ColumnType::Boolean),
        Type::INT8 => Some(ColumnType::BigInt),
        Type::TIMESTAMPTZ => Some(ColumnType::Timestamp),
        _ => None,
    }
}

/// Box a bound value for tokio-postgres. Nulls take the slot's type.
fn value_to_boxed(value: Value, slot: ColumnType) -> Box<dyn ToSql + Sync + Send> {
    match value {
        Value::Null => match slot {
            ColumnType::Text => Box::new(None::<String>),
            ColumnType::Boolean => Box::new(None::<bool>),
            ColumnType::BigInt => Box::new(None::<i64>),
            ColumnType::Timestamp => Box::new(None::<DateTime<Utc>>),
        },
        Value::Bool(b) => Box::new(b),
        Value::BigInt(i) => Box::new(i),
        Value::Text(s) => Box::new(s),
        Value::Timestamp(ts) => Box::new(ts),
    }
}

fn row_from_pg(row: &tokio_postgres::Row) -> Result<Row> {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = match column_type_for(column.type_()) {
            Some(ColumnType::Text) => row.try_get::<_, Option<String>>(i).map(Value::from),
            Some(ColumnType::Boolean) => row.try_get::<_, Option<bool>>(i).map(Value::from),
            Some(ColumnType::BigInt) => row.try_get::<_, Option<i64>>(i).map(Value::from),
            Some(ColumnType::Timestamp) => {
                row.try_get::<_, Option<DateTime<Utc>>>(i).map(Value::from)
            }
            None => {
                return Err(StoreError::WriteFailed(format!(
                    "unsupported column type {} for {}",
                    column.type_(),
                    column.name()
                )))
            }
        }
        .map_err(|e| StoreError::WriteFailed(format!("column {}: {e}", column.name())))?;
        out.push(column.name(), value);
    }
    Ok(out)
}

#[async_trait]
impl StoreSession for PostgresSession {
    type Statement = Statement;

    fn dialect(&self) -> &dyn Dialect {
        &PostgresDialect
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn execute(&self, text: &str) -> Result<ResultSet> {
        self.ensure_open()?;
        debug!("Executing: {}", text);
        self.client
            .batch_execute(text)
            .await
            .map_err(|e| StoreError::Execute(format!("{text}: {e}")))?;
        Ok(ResultSet::empty())
    }

    async fn prepare(&self, text: &str) -> Result<Prepared<Statement>> {
        self.ensure_open()?;
        let statement = self
            .client
            .prepare(text)
            .await
            .map_err(|e| StoreError::Preparation(format!("{text}: {e}")))?;
        let param_types = statement
            .params()
            .iter()
            .map(|t| {
                column_type_for(t).ok_or_else(|| {
                    StoreError::Preparation(format!("unsupported parameter type {t}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Prepared {
            statement,
            param_types,
        })
    }

    fn submit(&self, statement: &Statement, params: Vec<Value>) -> Result<WriteFuture> {
        self.ensure_open()?;
        let client = Arc::clone(&self.client);
        let statement = statement.clone();

        Ok(async move {
            let boxed: Vec<Box<dyn ToSql + Sync + Send>> = params
                .into_iter()
                .zip(statement.params())
                .map(|(value, pg_type)| {
                    let slot = column_type_for(pg_type).unwrap_or(ColumnType::Text);
                    value_to_boxed(value, slot)
                })
                .collect();
            let refs: Vec<&(dyn ToSql + Sync)> = boxed
                .iter()
                .map(|p| p.as_ref() as &(dyn ToSql + Sync))
                .collect();

            if statement.columns().is_empty() {
                let affected = client
                    .execute(&statement, &refs)
                    .await
                    .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
                Ok(ResultSet::written(affected))
            } else {
                let rows = client
                    .query(&statement, &refs)
                    .await
                    .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
                let rows = rows.iter().map(row_from_pg).collect::<Result<Vec<_>>>()?;
                Ok(ResultSet::from_rows(rows))
            }
        }
        .boxed())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let task = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
        info!("PostgreSQL session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_type_mapping() {
        assert_eq!(column_type_for(&Type::TEXT), Some(ColumnType::Text));
        assert_eq!(column_type_for(&Type::VARCHAR), Some(ColumnType::Text));
        assert_eq!(column_type_for(&Type::BOOL), Some(ColumnType::Boolean));
        assert_eq!(column_type_for(&Type::INT8), Some(ColumnType::BigInt));
        assert_eq!(column_type_for(&Type::TIMESTAMPTZ), Some(ColumnType::Timestamp));
        assert_eq!(column_type_for(&Type::INT4), None);
        assert_eq!(column_type_for(&Type::TIMESTAMP), None);
    }

    #[tokio::test]
    async fn test_connect_without_nodes_fails() {
        let err = PostgresSession::connect(&[], &PostgresOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Connection(_)));
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_node_fails() {
        let options = PostgresOptions {
            port: 1,
            connect_timeout: Duration::from_millis(200),
            ..PostgresOptions::default()
        };
        let err = PostgresSession::connect(&["127.0.0.1".to_string()], &options)
            .await
            .err()
            .unwrap();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("127.0.0.1"));
    }
}
