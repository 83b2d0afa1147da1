pub use crate::{
    Catalog, ConnectionPool, Entity, EntityRepository, KeyLayout, MemoryStore,
    PopularityCoordinator, PopularityPolicy, RankedEntity, Result, RetryPolicy, StoreBackend,
    StoreConfig, StoreError,
};
