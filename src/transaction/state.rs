// ============================================================================
// Optimistic Transaction State
// ============================================================================
//
// A transaction queues commands client-side and ships them as one
// MULTI/EXEC block. Its outcome depends on the keys WATCHed on the
// connection before EXEC:
//
//   Active ──EXEC ok──> Committed
//     │
//     └──EXEC nil──> Aborted   (a watched key moved)
//
// ============================================================================

use crate::core::{Result, StoreError};
use crate::store::{Command, Reply};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Commands may still be queued
    Active,

    /// EXEC applied every queued command
    Committed,

    /// EXEC was refused because a watched key changed
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Result of shipping a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Replies in the order the commands were queued
    Committed(Vec<Reply>),
    /// A watched key moved; nothing was applied
    Aborted,
}

impl CommitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CommitOutcome::Committed(_))
    }
}

/// A batch of commands executed atomically by MULTI/EXEC.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    commands: Vec<Command>,
    start_time: std::time::Instant,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            id: TransactionId::new(),
            state: TransactionState::Active,
            commands: Vec::new(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Queue a command.
    ///
    /// # Errors
    /// Returns error if the transaction already ran
    pub fn queue(&mut self, command: Command) -> Result<&mut Self> {
        if !self.state.is_active() {
            return Err(StoreError::ExecutionError(format!(
                "Cannot queue {}: transaction {} is {}",
                command.name(),
                self.id,
                self.state
            )));
        }
        self.commands.push(command);
        Ok(self)
    }

    pub fn hgetall(&mut self, key: &str) -> Result<&mut Self> {
        self.queue(Command::HGetAll {
            key: key.to_string(),
        })
    }

    pub fn hincrby(&mut self, key: &str, field: &str, delta: i64) -> Result<&mut Self> {
        self.queue(Command::HIncrBy {
            key: key.to_string(),
            field: field.to_string(),
            delta,
        })
    }

    pub fn zincrby(&mut self, key: &str, member: &str, delta: f64) -> Result<&mut Self> {
        self.queue(Command::ZIncrBy {
            key: key.to_string(),
            member: member.to_string(),
            delta,
        })
    }

    /// Hand the queued commands over for EXEC.
    pub(crate) fn take_commands(&mut self) -> Result<Vec<Command>> {
        if !self.state.is_active() {
            return Err(StoreError::ExecutionError(format!(
                "Cannot execute: transaction {} is already {}",
                self.id, self.state
            )));
        }
        Ok(std::mem::take(&mut self.commands))
    }

    /// Record the EXEC outcome.
    pub(crate) fn finish(&mut self, committed: bool) {
        self.state = if committed {
            TransactionState::Committed
        } else {
            TransactionState::Aborted
        };
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id_generation() {
        let id1 = TransactionId::new();
        let id2 = TransactionId::new();
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn test_queue_in_order() {
        let mut txn = Transaction::new();
        txn.hincrby("entity:1", "likes", 1)
            .unwrap()
            .zincrby("popularity", "1", 1.0)
            .unwrap();

        assert_eq!(txn.command_count(), 2);
        assert_eq!(txn.commands()[0].name(), "HINCRBY");
        assert_eq!(txn.commands()[1].name(), "ZINCRBY");
        assert_eq!(txn.state(), TransactionState::Active);
    }

    #[test]
    fn test_cannot_queue_after_finish() {
        let mut txn = Transaction::new();
        txn.hgetall("entity:1").unwrap();

        let commands = txn.take_commands().unwrap();
        assert_eq!(commands.len(), 1);
        txn.finish(false);

        assert_eq!(txn.state(), TransactionState::Aborted);
        assert!(txn.state().is_terminal());
        assert!(txn.hgetall("entity:2").is_err());
        assert!(txn.take_commands().is_err());
    }
}
