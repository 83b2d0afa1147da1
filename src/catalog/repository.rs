use super::{bounded, finish};
use crate::connection::Connection;
use crate::connection::pool::ConnectionPool;
use crate::core::{Entity, KeyLayout, Result};
use std::sync::Arc;
use tracing::{Instrument, info_span};

/// Reads entity records by id.
#[derive(Clone)]
pub struct EntityRepository {
    pool: Arc<ConnectionPool>,
}

impl EntityRepository {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    /// Fetch and decode the record of `id`.
    ///
    /// Fails with `NotFound` when the record has no fields and with
    /// `DecodeError` when a field does not parse.
    pub async fn get(&self, id: &str) -> Result<Entity> {
        let span = info_span!("entity.get", entity_id = %id);
        async {
            let layout = &self.pool.config().keys;
            let mut guard = self.pool.get_connection().await?;
            let outcome = bounded(
                self.pool.config().operation_timeout,
                fetch(guard.connection()?, layout, id),
            )
            .await;
            finish(guard, outcome).await
        }
        .instrument(span)
        .await
    }
}

pub(crate) async fn fetch(conn: &mut Connection, layout: &KeyLayout, id: &str) -> Result<Entity> {
    let fields = conn.hgetall(&layout.entity_key(id)).await?;
    Entity::decode(id, &fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::config::StoreConfig;
    use crate::core::StoreError;
    use crate::store::MemoryStore;

    async fn repository() -> (EntityRepository, MemoryStore) {
        let store = MemoryStore::new();
        let pool = ConnectionPool::new(StoreConfig::default(), Arc::new(store.clone()))
            .await
            .unwrap();
        (EntityRepository::new(Arc::new(pool)), store)
    }

    #[tokio::test]
    async fn test_get_existing_entity() {
        let (repo, store) = repository().await;
        let entity = Entity::new("1", "Blue Train", "John Coltrane", 56.99, 8);
        store.seed_entity(&KeyLayout::default(), &entity).await;

        assert_eq!(repo.get("1").await.unwrap(), entity);
    }

    #[tokio::test]
    async fn test_get_missing_entity() {
        let (repo, _store) = repository().await;
        assert_eq!(
            repo.get("404").await.unwrap_err(),
            StoreError::NotFound("404".into())
        );
    }

    #[tokio::test]
    async fn test_get_malformed_entity() {
        let (repo, store) = repository().await;
        let mut fields = Entity::new("2", "t", "a", 1.0, 0).encode();
        fields.insert("likes".into(), "lots".into());
        store.hset("entity:2", fields).await;

        assert!(matches!(
            repo.get("2").await,
            Err(StoreError::DecodeError(_))
        ));
    }

    #[tokio::test]
    async fn test_connection_released_after_error() {
        let (repo, _store) = repository().await;
        assert!(repo.get("missing").await.is_err());

        let stats = repo.pool.stats().await;
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.available_connections, stats.total_connections);
    }
}
