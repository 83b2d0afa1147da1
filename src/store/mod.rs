// ============================================================================
// Store Gateway
// ============================================================================
//
// The backing store is a Redis-protocol-compatible key-value store. Backends
// implement two traits:
//
// - StoreBackend: opens raw connections (one per pool slot)
// - RawConnection: runs single commands, WATCH/UNWATCH and MULTI/EXEC
//
// Only the commands this crate needs are modelled.
//
// ============================================================================

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use crate::core::{FieldMap, Result, StoreError};
use async_trait::async_trait;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// A store command, usable standalone or queued inside MULTI/EXEC.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// EXISTS key
    Exists { key: String },
    /// HGETALL key
    HGetAll { key: String },
    /// HINCRBY key field delta
    HIncrBy {
        key: String,
        field: String,
        delta: i64,
    },
    /// ZINCRBY key delta member
    ZIncrBy {
        key: String,
        member: String,
        delta: f64,
    },
    /// ZREVRANGE key start stop WITHSCORES
    ZRevRangeWithScores {
        key: String,
        start: isize,
        stop: isize,
    },
    /// PING
    Ping,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Exists { .. } => "EXISTS",
            Command::HGetAll { .. } => "HGETALL",
            Command::HIncrBy { .. } => "HINCRBY",
            Command::ZIncrBy { .. } => "ZINCRBY",
            Command::ZRevRangeWithScores { .. } => "ZREVRANGE",
            Command::Ping => "PING",
        }
    }
}

/// Typed reply to a [`Command`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Integer(i64),
    Score(f64),
    Fields(FieldMap),
    Ranked(Vec<(String, f64)>),
    Pong,
}

impl Reply {
    fn kind(&self) -> &'static str {
        match self {
            Reply::Integer(_) => "integer",
            Reply::Score(_) => "score",
            Reply::Fields(_) => "field map",
            Reply::Ranked(_) => "ranked members",
            Reply::Pong => "pong",
        }
    }

    fn mismatch(self, expected: &str) -> StoreError {
        StoreError::ExecutionError(format!("expected {} reply, got {}", expected, self.kind()))
    }

    pub fn into_integer(self) -> Result<i64> {
        match self {
            Reply::Integer(value) => Ok(value),
            other => Err(other.mismatch("integer")),
        }
    }

    pub fn into_score(self) -> Result<f64> {
        match self {
            Reply::Score(value) => Ok(value),
            other => Err(other.mismatch("score")),
        }
    }

    pub fn into_fields(self) -> Result<FieldMap> {
        match self {
            Reply::Fields(fields) => Ok(fields),
            other => Err(other.mismatch("field map")),
        }
    }

    pub fn into_ranked(self) -> Result<Vec<(String, f64)>> {
        match self {
            Reply::Ranked(members) => Ok(members),
            other => Err(other.mismatch("ranked members")),
        }
    }
}

/// A single connection to the backing store.
///
/// WATCH state is per connection, so a connection must never be shared
/// between concurrent operations.
#[async_trait]
pub trait RawConnection: Send {
    async fn query(&mut self, command: Command) -> Result<Reply>;

    /// WATCH the given keys for the next `exec`.
    async fn watch(&mut self, keys: &[String]) -> Result<()>;

    async fn unwatch(&mut self) -> Result<()>;

    /// MULTI, the queued commands, EXEC.
    ///
    /// Returns `Ok(None)` when a watched key changed and the store refused to
    /// commit. Watches are cleared either way.
    async fn exec(&mut self, commands: Vec<Command>) -> Result<Option<Vec<Reply>>>;
}

/// Factory for raw connections.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RawConnection>>;

    /// Human readable target, used in logs.
    fn describe(&self) -> String;
}
