//! Session lifecycle: connect, recreate the schema, settle, close.

use anyhow::Context;
use loyalty_core::Keyspace;
use loyalty_store::{
    MemorySession, MemoryStore, PostgresOptions, PostgresSession, StoreSession, WriteDispatcher,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Open a session on the in-process store.
pub async fn connect_memory(
    store: &MemoryStore,
    nodes: &[String],
) -> anyhow::Result<Arc<MemorySession>> {
    let session = store
        .connect(nodes)
        .await
        .context("Failed to connect to in-memory store")?;
    Ok(Arc::new(session))
}

/// Open a session on the first reachable PostgreSQL node.
pub async fn connect_postgres(
    nodes: &[String],
    options: &PostgresOptions,
) -> anyhow::Result<Arc<PostgresSession>> {
    let session = PostgresSession::connect(nodes, options)
        .await
        .context("Failed to connect to PostgreSQL")?;
    Ok(Arc::new(session))
}

/// Drop the keyspace and recreate it with every container. Destructive.
pub async fn create_schema<S: StoreSession>(session: &S, keyspace: &Keyspace) -> anyhow::Result<()> {
    for statement in session.dialect().schema_statements(keyspace) {
        debug!("Schema: {}", statement);
        session
            .execute(&statement)
            .await
            .with_context(|| format!("Failed to create schema for keyspace '{}'", keyspace.name))?;
    }
    info!(
        "Keyspace '{}' and schema created ({})",
        keyspace.name,
        keyspace.container_names().join(", ")
    );
    Ok(())
}

/// Give the store time to propagate schema changes before preparing.
pub async fn settle(delay: Duration) {
    if !delay.is_zero() {
        info!("Waiting {:?} for schema to settle", delay);
        tokio::time::sleep(delay).await;
    }
}

/// Wait for in-flight writes, then close the session.
pub async fn close<S: StoreSession>(dispatcher: &WriteDispatcher<S>) -> anyhow::Result<()> {
    let pending = dispatcher.in_flight();
    if pending > 0 {
        info!("Waiting for {} in-flight writes", pending);
    }
    dispatcher.drain().await;
    dispatcher
        .session()
        .close()
        .await
        .context("Failed to close session")?;
    info!("Connection closed.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use loyalty_store::StoreError;

    #[tokio::test]
    async fn test_connect_fails_without_reachable_node() {
        let store = MemoryStore::new();
        let err = connect_memory(&store, &["10.1.1.1".to_string()])
            .await
            .unwrap_err();
        let store_err = err.downcast_ref::<StoreError>().unwrap();
        assert!(matches!(store_err, StoreError::Connection(_)));
    }

    #[tokio::test]
    async fn test_create_schema_creates_every_container() {
        let store = MemoryStore::new();
        let session = connect_memory(&store, &["127.0.0.1".to_string()]).await.unwrap();
        let keyspace = Keyspace::loyalty();
        create_schema(session.as_ref(), &keyspace).await.unwrap();
        for name in keyspace.container_names() {
            assert_eq!(store.row_count("loyalty", name).await, Some(0), "{name}");
        }
        create_schema(session.as_ref(), &keyspace).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_then_submit_fails_with_session_closed() {
        let store = MemoryStore::new();
        let session = connect_memory(&store, &["127.0.0.1".to_string()]).await.unwrap();
        create_schema(session.as_ref(), &Keyspace::loyalty()).await.unwrap();
        let templates = loyalty_store::StatementCache::new(session.clone())
            .prepare_templates("loyalty")
            .await
            .unwrap();
        let dispatcher = WriteDispatcher::new(session);
        close(&dispatcher).await.unwrap();

        let err = dispatcher
            .submit(&templates.read_coupons, vec!["90000".into()])
            .unwrap_err();
        assert_eq!(err, StoreError::SessionClosed);
    }
}
