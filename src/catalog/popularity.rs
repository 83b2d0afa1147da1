// ============================================================================
// Popularity Coordinator
// ============================================================================
//
// Keeps `entity:<id>.likes` and the leaderboard score of `<id>` moving
// together, and reads the top of the leaderboard with the matching records
// as one consistent snapshot.
//
// Increment:
//   WATCH entity:<id>; EXISTS entity:<id>
//   MULTI; HINCRBY entity:<id> likes 1; ZINCRBY popularity 1 <id>; EXEC
//
// Top-N:
//   WATCH popularity; ZREVRANGE popularity 0 n-1 WITHSCORES
//   MULTI; HGETALL entity:<id> ...; EXEC
//   nil EXEC -> the ranking moved under us, start over
//
// Every increment writes the leaderboard inside its MULTI, so watching the
// leaderboard alone is enough to detect any increment racing a top-N read.
//
// ============================================================================

use super::policy::PopularityPolicy;
use super::{bounded, finish};
use crate::connection::Connection;
use crate::connection::pool::ConnectionPool;
use crate::core::entity::FIELD_LIKES;
use crate::core::{Entity, RankedEntity, Result, StoreError};
use crate::transaction::{CommitOutcome, Transaction};
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// Orchestrates the operations spanning an entity record and the
/// leaderboard.
#[derive(Clone)]
pub struct PopularityCoordinator {
    pool: Arc<ConnectionPool>,
    policy: PopularityPolicy,
}

impl PopularityCoordinator {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self::with_policy(pool, PopularityPolicy::default())
    }

    pub fn with_policy(pool: Arc<ConnectionPool>, policy: PopularityPolicy) -> Self {
        Self { pool, policy }
    }

    pub fn policy(&self) -> &PopularityPolicy {
        &self.policy
    }

    /// Add one like to `id`: its `likes` field and its leaderboard score both
    /// grow by exactly 1, or neither does.
    ///
    /// Fails with `NotFound` (nothing written) when the record is absent, and
    /// with `TransactionAborted` when the record changed between the
    /// existence check and the commit and the increment policy allows no
    /// further attempt.
    ///
    /// Not idempotent: every successful call adds 1. After an ambiguous
    /// transport failure the increment may or may not have been applied, and
    /// replaying it can count twice.
    pub async fn increment_popularity(&self, id: &str) -> Result<()> {
        let span = info_span!("popularity.increment", entity_id = %id);
        async {
            let mut guard = self.pool.get_connection().await?;
            let outcome = bounded(
                self.pool.config().operation_timeout,
                self.increment_with_retry(guard.connection()?, id),
            )
            .await;
            finish(guard, outcome).await
        }
        .instrument(span)
        .await
    }

    async fn increment_with_retry(&self, conn: &mut Connection, id: &str) -> Result<()> {
        let retry = &self.policy.increment;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_increment(conn, id).await {
                Err(err) if err.is_conflict() && retry.should_retry(attempt) => {
                    event!(Level::DEBUG, attempt, "increment refused, retrying");
                    tokio::time::sleep(retry.backoff(attempt)).await;
                }
                Err(err) => {
                    if err.is_conflict() {
                        event!(Level::WARN, attempt, "increment aborted by a concurrent write");
                    }
                    return Err(err);
                }
                Ok(()) => {
                    event!(Level::DEBUG, attempt, "increment committed");
                    return Ok(());
                }
            }
        }
    }

    async fn try_increment(&self, conn: &mut Connection, id: &str) -> Result<()> {
        let keys = &self.pool.config().keys;
        let entity_key = keys.entity_key(id);

        // The check runs under WATCH: a delete racing it aborts the EXEC.
        conn.watch(std::slice::from_ref(&entity_key)).await?;
        if !conn.exists(&entity_key).await? {
            conn.unwatch().await?;
            return Err(StoreError::NotFound(id.to_string()));
        }

        let mut txn = Transaction::new();
        txn.hincrby(&entity_key, FIELD_LIKES, 1)?
            .zincrby(keys.leaderboard_key(), id, 1.0)?;

        match conn.exec(&mut txn).await? {
            CommitOutcome::Committed(_) => Ok(()),
            CommitOutcome::Aborted => Err(StoreError::TransactionAborted(format!(
                "'{}' changed before the increment committed",
                entity_key
            ))),
        }
    }

    /// The `n` highest ranked entities, best first.
    ///
    /// Returns fewer than `n` when fewer are ranked. See
    /// [`top_n_ranked`](Self::top_n_ranked) for the consistency guarantee.
    pub async fn top_n(&self, n: usize) -> Result<Vec<Entity>> {
        Ok(self
            .top_n_ranked(n)
            .await?
            .into_iter()
            .map(|ranked| ranked.entity)
            .collect())
    }

    /// The `n` highest ranked entities with the scores they were ranked by.
    ///
    /// The ranking and the records come from one instant of the leaderboard:
    /// if it moves between reading the ranking and reading the records, the
    /// read starts over, up to the snapshot policy's attempt budget, after
    /// which it fails with `SnapshotContention`. Equal scores are ordered by
    /// member in reverse lexicographic order. A ranked id without a record
    /// fails the whole call with `NotFound`.
    pub async fn top_n_ranked(&self, n: usize) -> Result<Vec<RankedEntity>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let span = info_span!("popularity.top_n", n);
        async {
            let mut guard = self.pool.get_connection().await?;
            let outcome = bounded(
                self.pool.config().operation_timeout,
                self.snapshot_with_retry(guard.connection()?, n),
            )
            .await;
            finish(guard, outcome).await
        }
        .instrument(span)
        .await
    }

    async fn snapshot_with_retry(&self, conn: &mut Connection, n: usize) -> Result<Vec<RankedEntity>> {
        let retry = &self.policy.snapshot;
        let mut attempt = 0;
        loop {
            attempt += 1;
            if let Some(ranked) = self.try_snapshot(conn, n).await? {
                return Ok(ranked);
            }

            if !retry.should_retry(attempt) {
                event!(Level::WARN, attempt, "top-n snapshot gave up under contention");
                return Err(StoreError::SnapshotContention(attempt));
            }
            event!(Level::DEBUG, attempt, "leaderboard moved during top-n read, retrying");
            tokio::time::sleep(retry.backoff(attempt)).await;
        }
    }

    /// One snapshot attempt; `None` when the leaderboard moved.
    async fn try_snapshot(&self, conn: &mut Connection, n: usize) -> Result<Option<Vec<RankedEntity>>> {
        let keys = &self.pool.config().keys;
        let leaderboard = keys.leaderboard_key().to_string();
        let stop = isize::try_from(n - 1).unwrap_or(isize::MAX);

        conn.watch(std::slice::from_ref(&leaderboard)).await?;
        let ranking = conn.zrevrange_with_scores(&leaderboard, 0, stop).await?;
        if ranking.is_empty() {
            conn.unwatch().await?;
            return Ok(Some(Vec::new()));
        }

        let mut txn = Transaction::new();
        for (id, _) in &ranking {
            txn.hgetall(&keys.entity_key(id))?;
        }

        let replies = match conn.exec(&mut txn).await? {
            CommitOutcome::Committed(replies) => replies,
            CommitOutcome::Aborted => return Ok(None),
        };
        if replies.len() != ranking.len() {
            return Err(StoreError::ExecutionError(format!(
                "expected {} records, got {}",
                ranking.len(),
                replies.len()
            )));
        }

        ranking
            .into_iter()
            .zip(replies)
            .map(|((id, score), reply)| -> Result<RankedEntity> {
                let entity = Entity::decode(&id, &reply.into_fields()?)?;
                Ok(RankedEntity { entity, score })
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }
}
