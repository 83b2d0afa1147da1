// ============================================================================
// rankstore Library
// ============================================================================

pub mod catalog;
pub mod connection;
pub mod core;
pub mod prelude;
pub mod store;
pub mod transaction;

// Re-export main types for convenience
pub use catalog::{EntityRepository, PopularityCoordinator, PopularityPolicy, RetryPolicy};
pub use self::core::{Entity, FieldMap, KeyLayout, RankedEntity, Result, StoreError};
pub use store::{MemoryStore, StoreBackend};
#[cfg(feature = "redis")]
pub use store::RedisStore;

// Re-export connection API
pub use connection::{
    Connection,
    config::StoreConfig,
    pool::{ConnectionPool, PoolGuard, PoolStats},
};

use std::sync::Arc;

// ============================================================================
// High-level Catalog API
// ============================================================================

/// Popularity catalog over a pooled store
///
/// This is the recommended entry point: it owns the connection pool and
/// wires the repository and the coordinator to it.
///
/// # Examples
///
/// ```
/// use rankstore::{Catalog, Entity, KeyLayout, MemoryStore, StoreConfig};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MemoryStore::new();
/// let entity = Entity::new("1", "Blue Train", "John Coltrane", 56.99, 5);
/// store.seed_entity(&KeyLayout::default(), &entity).await;
///
/// let catalog = Catalog::with_store(StoreConfig::default(), Arc::new(store)).await?;
/// catalog.increment_popularity("1").await?;
///
/// let top = catalog.top_n(1).await?;
/// assert_eq!(top[0].likes, 6);
/// # Ok(())
/// # }
/// ```
pub struct Catalog {
    pool: Arc<ConnectionPool>,
    entities: EntityRepository,
    popularity: PopularityCoordinator,
}

impl Catalog {
    /// Connect to a Redis-compatible server
    ///
    /// Format: `redis://[:password@]host[:port][/database]`
    #[cfg(feature = "redis")]
    pub async fn connect(url: &str) -> Result<Self> {
        let config = StoreConfig::from_url(url).map_err(StoreError::InvalidConfig)?;
        Self::connect_with_config(config).await
    }

    /// Connect to a Redis-compatible server with custom configuration
    #[cfg(feature = "redis")]
    pub async fn connect_with_config(config: StoreConfig) -> Result<Self> {
        let backend = RedisStore::open(&config.to_url_with_secret())?;
        Self::with_store(config, Arc::new(backend)).await
    }

    /// Build a catalog over any backend with the default retry policies
    pub async fn with_store(config: StoreConfig, backend: Arc<dyn StoreBackend>) -> Result<Self> {
        Self::with_policy(config, backend, PopularityPolicy::default()).await
    }

    /// Build a catalog over any backend with explicit retry policies
    pub async fn with_policy(
        config: StoreConfig,
        backend: Arc<dyn StoreBackend>,
        policy: PopularityPolicy,
    ) -> Result<Self> {
        let pool = Arc::new(ConnectionPool::new(config, backend).await?);
        Ok(Self {
            entities: EntityRepository::new(Arc::clone(&pool)),
            popularity: PopularityCoordinator::with_policy(Arc::clone(&pool), policy),
            pool,
        })
    }

    /// Fetch one entity by id
    pub async fn get(&self, id: &str) -> Result<Entity> {
        self.entities.get(id).await
    }

    /// Add one like to an entity and its leaderboard score atomically
    ///
    /// Not idempotent; see [`PopularityCoordinator::increment_popularity`].
    pub async fn increment_popularity(&self, id: &str) -> Result<()> {
        self.popularity.increment_popularity(id).await
    }

    /// The `n` most popular entities, best first
    pub async fn top_n(&self, n: usize) -> Result<Vec<Entity>> {
        self.popularity.top_n(n).await
    }

    /// The `n` most popular entities with their leaderboard scores
    pub async fn top_n_ranked(&self, n: usize) -> Result<Vec<RankedEntity>> {
        self.popularity.top_n_ranked(n).await
    }

    pub fn entities(&self) -> &EntityRepository {
        &self.entities
    }

    pub fn popularity(&self) -> &PopularityCoordinator {
        &self.popularity
    }

    /// Get pool statistics
    pub async fn stats(&self) -> PoolStats {
        self.pool.stats().await
    }
}
