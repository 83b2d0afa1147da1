// ============================================================================
// Transaction Module
// ============================================================================
//
// Optimistic transactions over the backing store: WATCH on the connection,
// queue commands, EXEC. The store refuses EXEC when a watched key changed,
// which behaves as a compare-and-swap over the watched keys' versions.
//
// ============================================================================

pub mod state;

pub use state::{CommitOutcome, Transaction, TransactionId, TransactionState};
