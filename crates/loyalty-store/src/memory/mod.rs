//! In-process partitioned store.
//!
//! `MemoryStore` keeps keyspaces in memory with the wide-column layout the
//! CQL dialect describes: each container maps a partition key to an ordered
//! map of clustering keys to cells. Inserts are upserts that only touch the
//! columns they name, so the partial clip template updates `clipped` and
//! `updated` in place and leaves `data` and `liked` as they were.
//!
//! Writes run on tokio tasks, optionally after a configured latency, which
//! makes completion order independent of submission order. Faults can be
//! injected per container for testing error paths.

pub mod cql;

use crate::dialect::{CqlDialect, Dialect};
use crate::error::{Result, StoreError};
use crate::session::{Prepared, StoreSession, WriteFuture};
use async_trait::async_trait;
use cql::{Statement, TableRef};
use futures::FutureExt;
use loyalty_core::{ColumnType, Container, ResultSet, Row, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

type Cells = BTreeMap<String, Value>;

#[derive(Debug)]
struct Table {
    container: Container,
    partitions: BTreeMap<Vec<Value>, BTreeMap<Vec<Value>, Cells>>,
}

impl Table {
    fn new(container: Container) -> Self {
        Self {
            container,
            partitions: BTreeMap::new(),
        }
    }

    fn row_count(&self) -> usize {
        self.partitions.values().map(BTreeMap::len).sum()
    }

    fn upsert(&mut self, columns: &[String], params: Vec<Value>) -> Result<()> {
        let mut cells: HashMap<&str, Value> = columns
            .iter()
            .map(String::as_str)
            .zip(params)
            .collect();

        let mut key_part = |names: &[String]| -> Result<Vec<Value>> {
            names
                .iter()
                .map(|name| match cells.remove(name.as_str()) {
                    Some(Value::Null) | None => Err(StoreError::WriteFailed(format!(
                        "invalid null value for key column {name}"
                    ))),
                    Some(value) => Ok(value),
                })
                .collect()
        };
        let partition = key_part(&self.container.partition_key)?;
        let clustering = key_part(&self.container.clustering_key)?;

        let row = self
            .partitions
            .entry(partition)
            .or_default()
            .entry(clustering)
            .or_default();
        for (name, value) in cells {
            row.insert(name.to_string(), value);
        }
        Ok(())
    }

    fn select(&self, columns: Option<&[String]>, filters: &[String], params: &[Value]) -> Vec<Row> {
        let filter: HashMap<&str, &Value> = filters
            .iter()
            .map(String::as_str)
            .zip(params.iter())
            .collect();
        let partition: Vec<Value> = self
            .container
            .partition_key
            .iter()
            .map(|name| filter.get(name.as_str()).map_or(Value::Null, |v| (*v).clone()))
            .collect();

        let Some(rows) = self.partitions.get(&partition) else {
            return Vec::new();
        };

        let wanted: Vec<&str> = match columns {
            Some(columns) => columns.iter().map(String::as_str).collect(),
            None => self.container.columns.iter().map(|c| c.name.as_str()).collect(),
        };

        rows.iter()
            .filter(|(clustering, _)| {
                self.container
                    .clustering_key
                    .iter()
                    .zip(clustering.iter())
                    .all(|(name, value)| filter.get(name.as_str()).map_or(true, |f| *f == value))
            })
            .map(|(clustering, cells)| {
                let mut row = Row::new();
                for name in &wanted {
                    row.push(*name, self.cell(&partition, clustering, cells, name));
                }
                row
            })
            .collect()
    }

    fn cell(&self, partition: &[Value], clustering: &[Value], cells: &Cells, name: &str) -> Value {
        if let Some(i) = self.container.partition_key.iter().position(|k| k == name) {
            return partition[i].clone();
        }
        if let Some(i) = self.container.clustering_key.iter().position(|k| k == name) {
            return clustering[i].clone();
        }
        cells.get(name).cloned().unwrap_or(Value::Null)
    }
}

#[derive(Debug, Default)]
struct Catalog {
    keyspaces: HashMap<String, HashMap<String, Table>>,
}

impl Catalog {
    fn table(&self, table: &TableRef) -> Result<&Table> {
        self.keyspaces
            .get(&table.keyspace)
            .ok_or_else(|| StoreError::Execute(format!("keyspace '{}' does not exist", table.keyspace)))?
            .get(&table.table)
            .ok_or_else(|| {
                StoreError::Execute(format!(
                    "unconfigured table {}.{}",
                    table.keyspace, table.table
                ))
            })
    }

    fn table_mut(&mut self, table: &TableRef) -> Result<&mut Table> {
        self.keyspaces
            .get_mut(&table.keyspace)
            .and_then(|tables| tables.get_mut(&table.table))
            .ok_or_else(|| {
                StoreError::WriteFailed(format!(
                    "unconfigured table {}.{}",
                    table.keyspace, table.table
                ))
            })
    }
}

struct Inner {
    nodes: Vec<String>,
    catalog: RwLock<Catalog>,
    faults: Mutex<HashMap<String, String>>,
    write_attempts: AtomicU64,
}

impl Inner {
    fn fault_for(&self, table: &str) -> Option<String> {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
    }
}

/// An in-process "cluster". Cheap to clone; clones share data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
    write_latency: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A store reachable at `127.0.0.1`.
    pub fn new() -> Self {
        Self::with_nodes(vec!["127.0.0.1".to_string()])
    }

    /// A store reachable at the given node addresses.
    pub fn with_nodes(nodes: Vec<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                nodes,
                catalog: RwLock::new(Catalog::default()),
                faults: Mutex::new(HashMap::new()),
                write_attempts: AtomicU64::new(0),
            }),
            write_latency: Duration::ZERO,
        }
    }

    /// Delay every statement submitted through sessions opened from this
    /// handle by `latency` before it is applied.
    pub fn with_write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = latency;
        self
    }

    /// Open a session. Fails with [`StoreError::Connection`] unless at least
    /// one of `nodes` is a node of this store.
    pub async fn connect(&self, nodes: &[String]) -> Result<MemorySession> {
        let Some(node) = nodes.iter().find(|n| self.inner.nodes.contains(n)) else {
            return Err(StoreError::Connection(format!(
                "no reachable node among [{}]",
                nodes.join(", ")
            )));
        };
        info!("Connected to in-memory store via {}", node);
        Ok(MemorySession {
            store: Arc::clone(&self.inner),
            write_latency: self.write_latency,
            closed: AtomicBool::new(false),
        })
    }

    /// Make every write to `container` fail with `cause`.
    pub fn fail_writes_to(&self, container: &str, cause: &str) {
        self.inner
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(container.to_string(), cause.to_string());
    }

    pub fn clear_faults(&self) {
        self.inner
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Statements that reached the store, including failed ones.
    pub fn write_attempts(&self) -> u64 {
        self.inner.write_attempts.load(Ordering::Relaxed)
    }

    /// Rows in a container, `None` if it does not exist.
    pub async fn row_count(&self, keyspace: &str, container: &str) -> Option<usize> {
        let catalog = self.inner.catalog.read().await;
        catalog
            .keyspaces
            .get(keyspace)?
            .get(container)
            .map(Table::row_count)
    }

    pub async fn keyspace_exists(&self, keyspace: &str) -> bool {
        self.inner
            .catalog
            .read()
            .await
            .keyspaces
            .contains_key(keyspace)
    }
}

/// A prepared statement against the in-process store.
#[derive(Debug, Clone)]
pub struct MemoryStatement {
    parsed: Arc<Statement>,
}

/// A session on a [`MemoryStore`].
pub struct MemorySession {
    store: Arc<Inner>,
    write_latency: Duration,
    closed: AtomicBool,
}

impl std::fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySession")
            .field("write_latency", &self.write_latency)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl MemorySession {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn param_types(catalog: &Catalog, statement: &Statement) -> Result<Vec<ColumnType>> {
        let (table, names) = match statement {
            Statement::Insert { table, columns } => {
                let target = catalog.table(table)?;
                for key in target.container.primary_key() {
                    if !columns.iter().any(|c| c == key) {
                        return Err(StoreError::Preparation(format!(
                            "missing key column {key} in INSERT"
                        )));
                    }
                }
                (table, columns)
            }
            Statement::Select {
                table,
                columns,
                filters,
            } => {
                let target = catalog.table(table)?;
                if let Some(columns) = columns {
                    for column in columns {
                        target.container.column_type(column).map_err(|e| {
                            StoreError::Preparation(e.to_string())
                        })?;
                    }
                }
                for key in &target.container.partition_key {
                    if !filters.contains(key) {
                        return Err(StoreError::Preparation(format!(
                            "partition key column {key} must be restricted"
                        )));
                    }
                }
                for filter in filters {
                    if !target.container.is_key_column(filter) {
                        return Err(StoreError::Preparation(format!(
                            "cannot restrict non-key column {filter}"
                        )));
                    }
                }
                (table, filters)
            }
            _ => {
                return Err(StoreError::Preparation(
                    "only INSERT and SELECT can be prepared".to_string(),
                ))
            }
        };

        let container = &catalog.table(table)?.container;
        names
            .iter()
            .map(|name| {
                container
                    .column_type(name)
                    .map_err(|e| StoreError::Preparation(e.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    type Statement = MemoryStatement;

    fn dialect(&self) -> &dyn Dialect {
        &CqlDialect
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn execute(&self, text: &str) -> Result<ResultSet> {
        self.ensure_open()?;
        let statement = cql::parse(text).map_err(StoreError::Execute)?;
        let mut catalog = self.store.catalog.write().await;

        match statement {
            Statement::DropKeyspace { name, if_exists } => {
                if catalog.keyspaces.remove(&name).is_none() && !if_exists {
                    return Err(StoreError::Execute(format!(
                        "keyspace '{name}' does not exist"
                    )));
                }
                debug!("Dropped keyspace {}", name);
            }
            Statement::CreateKeyspace {
                name,
                if_not_exists,
            } => {
                if catalog.keyspaces.contains_key(&name) {
                    if !if_not_exists {
                        return Err(StoreError::Execute(format!(
                            "keyspace '{name}' already exists"
                        )));
                    }
                } else {
                    catalog.keyspaces.insert(name.clone(), HashMap::new());
                    debug!("Created keyspace {}", name);
                }
            }
            Statement::CreateTable {
                keyspace,
                container,
                if_not_exists,
            } => {
                let tables = catalog.keyspaces.get_mut(&keyspace).ok_or_else(|| {
                    StoreError::Execute(format!("keyspace '{keyspace}' does not exist"))
                })?;
                if tables.contains_key(&container.name) {
                    if !if_not_exists {
                        return Err(StoreError::Execute(format!(
                            "table {keyspace}.{} already exists",
                            container.name
                        )));
                    }
                } else {
                    debug!("Created table {}.{}", keyspace, container.name);
                    tables.insert(container.name.clone(), Table::new(container));
                }
            }
            Statement::Insert { .. } | Statement::Select { .. } => {
                return Err(StoreError::Execute(
                    "INSERT and SELECT must be prepared and bound".to_string(),
                ));
            }
        }

        Ok(ResultSet::empty())
    }

    async fn prepare(&self, text: &str) -> Result<Prepared<MemoryStatement>> {
        self.ensure_open()?;
        let parsed = cql::parse(text).map_err(StoreError::Preparation)?;
        let catalog = self.store.catalog.read().await;
        let param_types = Self::param_types(&catalog, &parsed).map_err(|e| match e {
            StoreError::Preparation(_) => e,
            other => StoreError::Preparation(other.to_string()),
        })?;

        Ok(Prepared {
            statement: MemoryStatement {
                parsed: Arc::new(parsed),
            },
            param_types,
        })
    }

    fn submit(&self, statement: &MemoryStatement, params: Vec<Value>) -> Result<WriteFuture> {
        self.ensure_open()?;
        let store = Arc::clone(&self.store);
        let parsed = Arc::clone(&statement.parsed);
        let latency = self.write_latency;

        Ok(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            store.write_attempts.fetch_add(1, Ordering::Relaxed);

            match parsed.as_ref() {
                Statement::Insert { table, columns } => {
                    if let Some(cause) = store.fault_for(&table.table) {
                        return Err(StoreError::WriteFailed(cause));
                    }
                    let mut catalog = store.catalog.write().await;
                    catalog.table_mut(table)?.upsert(columns, params)?;
                    Ok(ResultSet::written(1))
                }
                Statement::Select {
                    table,
                    columns,
                    filters,
                } => {
                    if let Some(cause) = store.fault_for(&table.table) {
                        return Err(StoreError::WriteFailed(cause));
                    }
                    let catalog = store.catalog.read().await;
                    let rows = catalog
                        .table(table)
                        .map_err(StoreError::into_write_failed)?
                        .select(columns.as_deref(), filters, &params);
                    Ok(ResultSet::from_rows(rows))
                }
                _ => Err(StoreError::WriteFailed(
                    "schema statements cannot be submitted".to_string(),
                )),
            }
        }
        .boxed())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("In-memory store session closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use loyalty_core::{Keyspace, Record, RecordFamily};

    async fn connected() -> (MemoryStore, MemorySession) {
        let store = MemoryStore::new();
        let session = store.connect(&["127.0.0.1".to_string()]).await.unwrap();
        for statement in session.dialect().schema_statements(&Keyspace::loyalty()) {
            session.execute(&statement).await.unwrap();
        }
        (store, session)
    }

    #[tokio::test]
    async fn test_connect_requires_reachable_node() {
        let store = MemoryStore::with_nodes(vec!["10.0.0.1".to_string()]);
        let err = store
            .connect(&["127.0.0.1".to_string(), "127.0.0.2".to_string()])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Connection(_)));

        assert!(store
            .connect(&["127.0.0.1".to_string(), "10.0.0.1".to_string()])
            .await
            .is_ok());
        assert!(store.connect(&[]).await.is_err());
    }

    #[tokio::test]
    async fn test_schema_recreate_drops_data() {
        let (store, session) = connected().await;
        let prepared = session
            .prepare(&CqlDialect.insert_record("loyalty", RecordFamily::ByZip))
            .await
            .unwrap();
        let record = Record::seed("90000", "1", Utc::now());
        session
            .submit(&prepared.statement, record.to_params())
            .unwrap()
            .await
            .unwrap();
        assert_eq!(store.row_count("loyalty", "coupons").await, Some(1));

        for statement in session.dialect().schema_statements(&Keyspace::loyalty()) {
            session.execute(&statement).await.unwrap();
        }
        assert_eq!(store.row_count("loyalty", "coupons").await, Some(0));
    }

    #[tokio::test]
    async fn test_last_write_wins_and_partial_update_keeps_other_columns() {
        let (store, session) = connected().await;
        let insert = session
            .prepare(&CqlDialect.insert_record("loyalty", RecordFamily::ByZip))
            .await
            .unwrap();
        let clip = session.prepare(&CqlDialect.insert_clip("loyalty")).await.unwrap();
        let read = session
            .prepare(&CqlDialect.select_partition("loyalty", RecordFamily::ByZip))
            .await
            .unwrap();

        let mut record = Record::seed("90001", "3", Utc::now());
        session.submit(&insert.statement, record.to_params()).unwrap().await.unwrap();
        record.liked = true;
        session.submit(&insert.statement, record.to_params()).unwrap().await.unwrap();
        let event = loyalty_core::ClipEvent::new("90001", "3", Utc::now());
        session.submit(&clip.statement, event.clip_params()).unwrap().await.unwrap();

        assert_eq!(store.row_count("loyalty", "coupons").await, Some(1));
        let rows = session
            .submit(&read.statement, vec![Value::from("90001")])
            .unwrap()
            .await
            .unwrap()
            .rows;
        let stored = Record::from_row(RecordFamily::ByZip, &rows[0]).unwrap();
        assert_eq!(stored.payload, "coupon data");
        assert!(stored.liked);
        assert!(stored.clipped);
        assert_eq!(stored.updated_at, event.occurred_at);
    }

    #[tokio::test]
    async fn test_select_returns_rows_in_clustering_order() {
        let (_store, session) = connected().await;
        let insert = session
            .prepare(&CqlDialect.insert_record("loyalty", RecordFamily::ByZip))
            .await
            .unwrap();
        for offer in ["3", "1", "2"] {
            let record = Record::seed("90002", offer, Utc::now());
            session.submit(&insert.statement, record.to_params()).unwrap().await.unwrap();
        }
        let read = session
            .prepare("SELECT offer_id FROM loyalty.coupons WHERE zip = ?")
            .await
            .unwrap();
        let rows = session
            .submit(&read.statement, vec![Value::from("90002")])
            .unwrap()
            .await
            .unwrap()
            .rows;
        let offers: Vec<_> = rows
            .iter()
            .map(|r| r.get("offer_id").and_then(Value::as_str).unwrap().to_string())
            .collect();
        assert_eq!(offers, vec!["1", "2", "3"]);
        assert_eq!(rows[0].len(), 1);
    }

    #[tokio::test]
    async fn test_prepare_validation() {
        let (_store, session) = connected().await;
        for text in [
            "INSERT INTO loyalty.coupons (data) VALUES (?)",
            "SELECT * FROM loyalty.coupons WHERE clipped = ?",
            "SELECT * FROM loyalty.coupons WHERE offer_id = ?",
            "SELECT * FROM other.coupons WHERE zip = ?",
            "DROP KEYSPACE loyalty",
        ] {
            let err = session.prepare(text).await.err().unwrap();
            assert!(matches!(err, StoreError::Preparation(_)), "{text}: {err}");
        }
    }

    #[tokio::test]
    async fn test_null_key_rejected_at_write_time() {
        let (_store, session) = connected().await;
        let clip = session.prepare(&CqlDialect.insert_clip("loyalty")).await.unwrap();
        let err = session
            .submit(
                &clip.statement,
                vec![Value::Null, Value::from("1"), Value::from(true), Value::from(Utc::now())],
            )
            .unwrap()
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::WriteFailed(_)));
    }

    #[tokio::test]
    async fn test_closed_session_rejects_everything() {
        let (_store, session) = connected().await;
        let clip = session.prepare(&CqlDialect.insert_clip("loyalty")).await.unwrap();
        assert!(format!("{session:?}").contains("closed: false"));
        session.close().await.unwrap();
        assert!(session.is_closed());
        assert!(format!("{session:?}").contains("closed: true"));
        assert_eq!(
            session.submit(&clip.statement, Vec::new()).err(),
            Some(StoreError::SessionClosed)
        );
        assert_eq!(
            session.execute("DROP KEYSPACE IF EXISTS loyalty").await,
            Err(StoreError::SessionClosed)
        );
    }
}
