//! Prepared statement handles and the per-session statement cache.

use crate::error::{Result, StoreError};
use crate::session::StoreSession;
use loyalty_core::{ColumnType, RecordFamily, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

struct StatementInner<T> {
    text: String,
    param_types: Vec<ColumnType>,
    statement: T,
}

/// An immutable, shareable prepared template.
///
/// Cloning is cheap and every clone refers to the same prepared statement.
pub struct StatementHandle<T> {
    inner: Arc<StatementInner<T>>,
}

impl<T> Clone for StatementHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> StatementHandle<T> {
    pub(crate) fn new(text: String, param_types: Vec<ColumnType>, statement: T) -> Self {
        Self {
            inner: Arc::new(StatementInner {
                text,
                param_types,
                statement,
            }),
        }
    }

    /// Template text the handle was prepared from.
    pub fn text(&self) -> &str {
        &self.inner.text
    }

    /// Expected parameter types, in slot order.
    pub fn param_types(&self) -> &[ColumnType] {
        &self.inner.param_types
    }

    pub(crate) fn statement(&self) -> &T {
        &self.inner.statement
    }

    /// Check `params` against the slots. Arity is checked first, then each
    /// value's type; `Null` fits any slot.
    pub fn check_params(&self, params: &[Value]) -> Result<()> {
        let expected = self.param_types();
        if params.len() != expected.len() {
            return Err(StoreError::Bind(format!(
                "expected {} parameters, got {}",
                expected.len(),
                params.len()
            )));
        }
        for (position, (value, slot)) in params.iter().zip(expected).enumerate() {
            if !value.binds_to(*slot) {
                return Err(StoreError::Bind(format!(
                    "parameter {position}: expected {slot}, got {}",
                    value.kind()
                )));
            }
        }
        Ok(())
    }

    /// Whether two handles came from the same prepare call (or cache hit).
    pub fn same_statement(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> std::fmt::Debug for StatementHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementHandle")
            .field("text", &self.inner.text)
            .field("param_types", &self.inner.param_types)
            .finish()
    }
}

/// Caches prepared templates for one session, keyed by exact template text.
pub struct StatementCache<S: StoreSession> {
    session: Arc<S>,
    cache: Mutex<HashMap<String, StatementHandle<S::Statement>>>,
}

impl<S: StoreSession> StatementCache<S> {
    pub fn new(session: Arc<S>) -> Self {
        Self {
            session,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Prepare `text`, or return the handle prepared earlier for the same text.
    ///
    /// Fails with [`StoreError::Preparation`] when the session is closed or the
    /// store rejects the template.
    pub async fn prepare(&self, text: &str) -> Result<StatementHandle<S::Statement>> {
        if self.session.is_closed() {
            return Err(StoreError::Preparation(
                "session is not connected".to_string(),
            ));
        }

        let mut cache = self.cache.lock().await;
        if let Some(handle) = cache.get(text) {
            debug!("Statement cache hit: {}", text);
            return Ok(handle.clone());
        }

        let prepared = self
            .session
            .prepare(text)
            .await
            .map_err(|e| match e {
                StoreError::Preparation(_) => e,
                StoreError::SessionClosed => {
                    StoreError::Preparation("session is not connected".to_string())
                }
                other => StoreError::Preparation(other.to_string()),
            })?;
        let handle = StatementHandle::new(text.to_string(), prepared.param_types, prepared.statement);
        cache.insert(text.to_string(), handle.clone());
        debug!("Prepared statement: {}", text);
        Ok(handle)
    }

    /// Prepare the pipeline's templates in `keyspace`.
    pub async fn prepare_templates(&self, keyspace: &str) -> Result<Templates<S::Statement>> {
        let dialect = self.session.dialect();
        let insert_coupon = self
            .prepare(&dialect.insert_record(keyspace, RecordFamily::ByZip))
            .await?;
        let insert_deal = self
            .prepare(&dialect.insert_record(keyspace, RecordFamily::ByHousehold))
            .await?;
        let insert_clip = self.prepare(&dialect.insert_clip(keyspace)).await?;
        let read_coupons = self
            .prepare(&dialect.select_partition(keyspace, RecordFamily::ByZip))
            .await?;

        info!(
            "Prepared {} statements for keyspace '{}' ({} dialect)",
            self.len().await,
            keyspace,
            dialect.name()
        );

        Ok(Templates {
            insert_coupon,
            insert_deal,
            insert_clip,
            read_coupons,
        })
    }

    /// Number of distinct templates prepared so far.
    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// The prepared templates a run uses.
pub struct Templates<T> {
    pub insert_coupon: StatementHandle<T>,
    pub insert_deal: StatementHandle<T>,
    pub insert_clip: StatementHandle<T>,
    pub read_coupons: StatementHandle<T>,
}

impl<T> Templates<T> {
    /// Full-record insert for a family.
    pub fn insert_record(&self, family: RecordFamily) -> &StatementHandle<T> {
        match family {
            RecordFamily::ByZip => &self.insert_coupon,
            RecordFamily::ByHousehold => &self.insert_deal,
        }
    }
}

impl<T> Clone for Templates<T> {
    fn clone(&self) -> Self {
        Self {
            insert_coupon: self.insert_coupon.clone(),
            insert_deal: self.insert_deal.clone(),
            insert_clip: self.insert_clip.clone(),
            read_coupons: self.read_coupons.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use loyalty_core::Keyspace;

    async fn session() -> Arc<crate::MemorySession> {
        let store = MemoryStore::new();
        let session = store.connect(&["127.0.0.1".to_string()]).await.unwrap();
        for statement in session.dialect().schema_statements(&Keyspace::loyalty()) {
            session.execute(&statement).await.unwrap();
        }
        Arc::new(session)
    }

    #[tokio::test]
    async fn test_prepare_is_idempotent_per_text() {
        let cache = StatementCache::new(session().await);
        let text = "INSERT INTO loyalty.coupons (zip, offer_id, clipped, updated) VALUES (?,?,?,?)";
        let a = cache.prepare(text).await.unwrap();
        let b = cache.prepare(text).await.unwrap();
        assert!(a.same_statement(&b));
        assert_eq!(a.param_types(), b.param_types());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_prepare_unknown_container_fails() {
        let cache = StatementCache::new(session().await);
        let err = cache
            .prepare("INSERT INTO loyalty.nope (zip) VALUES (?)")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Preparation(_)));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_prepare_after_close_fails() {
        let session = session().await;
        let cache = StatementCache::new(session.clone());
        session.close().await.unwrap();
        let err = cache
            .prepare("SELECT * FROM loyalty.coupons WHERE zip = ?")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::Preparation("session is not connected".to_string())
        );
    }

    #[tokio::test]
    async fn test_prepare_templates() {
        let cache = StatementCache::new(session().await);
        let templates = cache.prepare_templates("loyalty").await.unwrap();
        assert_eq!(templates.insert_record(RecordFamily::ByZip).param_types().len(), 6);
        assert_eq!(
            templates.insert_clip.param_types(),
            &[
                ColumnType::Text,
                ColumnType::Text,
                ColumnType::Boolean,
                ColumnType::Timestamp
            ]
        );
        assert_eq!(templates.read_coupons.param_types(), &[ColumnType::Text]);
        assert_eq!(cache.len().await, 4);
    }

    #[tokio::test]
    async fn test_check_params() {
        let cache = StatementCache::new(session().await);
        let templates = cache.prepare_templates("loyalty").await.unwrap();
        let read = &templates.read_coupons;

        assert!(read.check_params(&[Value::from("90050")]).is_ok());
        assert!(read.check_params(&[Value::Null]).is_ok());
        assert!(matches!(
            read.check_params(&[]),
            Err(StoreError::Bind(msg)) if msg == "expected 1 parameters, got 0"
        ));
        assert!(matches!(
            read.check_params(&[Value::from(90050i64)]),
            Err(StoreError::Bind(msg)) if msg == "parameter 0: expected text, got bigint"
        ));
    }
}
