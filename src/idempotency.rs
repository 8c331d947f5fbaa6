//! At-most-once application of mutating operations, keyed by transaction id.
//!
//! A transaction id moves through `unseen -> in progress -> committed`. A
//! claim is only ever granted to one caller: while a claim is in progress or
//! after it committed, every other caller observes [`Claim::AlreadySeen`].
//! Releasing an in-progress claim (the effect failed or was abandoned) returns
//! the id to `unseen`, so the caller may retry with the same id.
//!
//! The guard has no storage of its own: each [`LedgerStore`] keeps its
//! records next to wallet and event state so that the record commits or rolls
//! back together with the effect it guards.
//!
//! [`LedgerStore`]: crate::store::LedgerStore

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::model::TransactionId;

/// Kind of mutation a transaction id was used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Credit,
    Reserve,
    Resolve,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Credit => "credit",
            Operation::Reserve => "reserve",
            Operation::Resolve => "resolve",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer of a check-and-reserve on a transaction id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The caller owns the id and may apply the effect.
    Fresh,
    /// The effect was applied (or is being applied) under this id already.
    AlreadySeen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    InProgress,
    Committed,
}

#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub operation: Operation,
    pub state: RecordState,
    pub recorded_at: DateTime<Utc>,
}

/// In-process idempotency records.
///
/// Must be owned by the same lock as the ledger state it guards.
#[derive(Debug, Default)]
pub struct IdempotencyTable {
    records: HashMap<TransactionId, TransactionRecord>,
}

impl IdempotencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` in progress if it was never seen.
    pub fn check_and_reserve(&mut self, id: &TransactionId, operation: Operation) -> Claim {
        if self.records.contains_key(id) {
            return Claim::AlreadySeen;
        }
        self.records.insert(
            id.clone(),
            TransactionRecord {
                operation,
                state: RecordState::InProgress,
                recorded_at: Utc::now(),
            },
        );
        Claim::Fresh
    }

    /// Make an in-progress claim permanent.
    pub fn commit(&mut self, id: &TransactionId) {
        if let Some(record) = self.records.get_mut(id) {
            record.state = RecordState::Committed;
        }
    }

    /// Drop an in-progress claim. Committed records are never released.
    pub fn release(&mut self, id: &TransactionId) {
        if self
            .records
            .get(id)
            .is_some_and(|record| record.state == RecordState::InProgress)
        {
            self.records.remove(id);
        }
    }

    pub fn get(&self, id: &TransactionId) -> Option<&TransactionRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
