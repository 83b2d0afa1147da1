pub mod config;
pub mod pool;

use crate::core::{FieldMap, Result, StoreError};
use crate::store::{Command, RawConnection};
use crate::transaction::{CommitOutcome, Transaction};
use tracing::{Level, event};

/// Store connection handle
///
/// Wraps a raw backend connection and tracks whether it still holds WATCH
/// state or has seen a transport failure, so the pool knows whether it can
/// be handed out again.
pub struct Connection {
    /// Unique connection ID
    id: u64,
    raw: Box<dyn RawConnection>,
    state: ConnectionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Active,
    Watching,
    /// A transport error or an interrupted command left the connection in
    /// an unknown protocol state.
    Broken,
    Closed,
}

impl Connection {
    pub(crate) fn new(id: u64, raw: Box<dyn RawConnection>) -> Self {
        Self {
            id,
            raw,
            state: ConnectionState::Active,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// `true` while keys are watched and no EXEC/UNWATCH followed.
    pub fn is_watching(&self) -> bool {
        self.state == ConnectionState::Watching
    }

    /// `true` when the connection can be handed to another caller.
    pub fn is_reusable(&self) -> bool {
        self.state == ConnectionState::Active
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, ConnectionState::Closed | ConnectionState::Broken)
    }

    pub(crate) fn mark_broken(&mut self) {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Broken;
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            ConnectionState::Closed => Err(StoreError::ExecutionError(format!(
                "Connection {} is closed",
                self.id
            ))),
            ConnectionState::Broken => Err(StoreError::StoreUnavailable(format!(
                "Connection {} is broken",
                self.id
            ))),
            _ => Ok(()),
        }
    }

    /// Marks the connection broken on transport failures.
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(StoreError::StoreUnavailable(reason)) = &result {
            event!(
                Level::WARN,
                connection_id = self.id,
                reason = %reason,
                "store connection failed"
            );
            self.state = ConnectionState::Broken;
        }
        result
    }

    /// Flag the connection broken for the duration of a raw call.
    ///
    /// If the caller's future is dropped mid-command the flag stays set, so
    /// the pool closes the connection instead of handing a pending reply or
    /// a half-applied WATCH to the next borrower.
    fn begin_call(&mut self) -> Result<ConnectionState> {
        self.ensure_open()?;
        let previous = self.state;
        self.state = ConnectionState::Broken;
        Ok(previous)
    }

    async fn query(&mut self, command: Command) -> Result<crate::store::Reply> {
        let previous = self.begin_call()?;
        let result = self.raw.query(command).await;
        self.state = previous;
        self.track(result)
    }

    pub async fn ping(&mut self) -> Result<()> {
        self.query(Command::Ping).await.map(|_| ())
    }

    /// EXISTS key
    pub async fn exists(&mut self, key: &str) -> Result<bool> {
        let reply = self
            .query(Command::Exists {
                key: key.to_string(),
            })
            .await?;
        Ok(reply.into_integer()? > 0)
    }

    /// HGETALL key; an absent key yields an empty map.
    pub async fn hgetall(&mut self, key: &str) -> Result<FieldMap> {
        self.query(Command::HGetAll {
            key: key.to_string(),
        })
        .await?
        .into_fields()
    }

    /// HINCRBY key field delta, outside any transaction.
    pub async fn hincrby(&mut self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.query(Command::HIncrBy {
            key: key.to_string(),
            field: field.to_string(),
            delta,
        })
        .await?
        .into_integer()
    }

    /// ZINCRBY key delta member, outside any transaction.
    pub async fn zincrby(&mut self, key: &str, member: &str, delta: f64) -> Result<f64> {
        self.query(Command::ZIncrBy {
            key: key.to_string(),
            member: member.to_string(),
            delta,
        })
        .await?
        .into_score()
    }

    /// ZREVRANGE key start stop WITHSCORES
    pub async fn zrevrange_with_scores(
        &mut self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>> {
        self.query(Command::ZRevRangeWithScores {
            key: key.to_string(),
            start,
            stop,
        })
        .await?
        .into_ranked()
    }

    /// WATCH keys until the next `exec` or `unwatch`.
    pub async fn watch(&mut self, keys: &[String]) -> Result<()> {
        let previous = self.begin_call()?;
        let result = self.raw.watch(keys).await;
        self.state = previous;
        self.track(result)?;
        self.state = ConnectionState::Watching;
        Ok(())
    }

    pub async fn unwatch(&mut self) -> Result<()> {
        let previous = self.begin_call()?;
        let result = self.raw.unwatch().await;
        self.state = previous;
        self.track(result)?;
        self.state = ConnectionState::Active;
        Ok(())
    }

    /// Ship a transaction as MULTI/EXEC.
    ///
    /// Watches are cleared by the store whatever the outcome.
    pub async fn exec(&mut self, transaction: &mut Transaction) -> Result<CommitOutcome> {
        self.ensure_open()?;
        let commands = transaction.take_commands()?;
        let previous = self.begin_call()?;
        let result = self.raw.exec(commands).await;
        self.state = previous;
        let replies = self.track(result)?;
        self.state = ConnectionState::Active;

        let outcome = match replies {
            Some(replies) => CommitOutcome::Committed(replies),
            None => CommitOutcome::Aborted,
        };
        transaction.finish(outcome.is_committed());
        event!(
            Level::TRACE,
            connection_id = self.id,
            txn = %transaction.id(),
            state = %transaction.state(),
            elapsed_us = transaction.duration().as_micros() as u64,
            "transaction finished"
        );
        Ok(outcome)
    }

    /// Close the connection, dropping any WATCH state.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == ConnectionState::Watching {
            self.unwatch().await?;
        }
        self.state = ConnectionState::Closed;
        Ok(())
    }
}
