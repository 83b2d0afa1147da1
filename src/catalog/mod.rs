// ============================================================================
// Catalog Operations
// ============================================================================
//
// - EntityRepository: single-record reads
// - PopularityCoordinator: dual-write increment and snapshot top-N
//
// Every operation checks out its own connection and gives it back on every
// exit path. An operation that overruns its deadline has its connection
// discarded, since a reply may still be in flight on it.
//
// ============================================================================

pub mod policy;
pub mod popularity;
pub mod repository;

pub use policy::{PopularityPolicy, RetryPolicy};
pub use popularity::PopularityCoordinator;
pub use repository::EntityRepository;

use crate::connection::pool::PoolGuard;
use crate::core::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::error::Elapsed;

/// Run `operation` under an optional deadline.
pub(crate) async fn bounded<F>(limit: Option<Duration>, operation: F) -> std::result::Result<F::Output, Elapsed>
where
    F: Future,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, operation).await,
        None => Ok(operation.await),
    }
}

/// Hand the connection back and surface the operation's result.
pub(crate) async fn finish<T>(
    guard: PoolGuard,
    outcome: std::result::Result<Result<T>, Elapsed>,
) -> Result<T> {
    match outcome {
        Err(elapsed) => {
            guard.discard();
            Err(elapsed.into())
        }
        Ok(result) => {
            let released = guard.release().await;
            let value = result?;
            released?;
            Ok(value)
        }
    }
}
