//! Durable wallet and event state.
//!
//! A [`LedgerStore`] hands out [`UnitOfWork`]s. Everything done through one
//! unit (the idempotency claim included) becomes visible on
//! [`UnitOfWork::commit`] or not at all. Dropping a unit without committing
//! rolls it back, so a cancelled request never leaves partial state behind.

use std::future::Future;

use thiserror::Error;

use crate::Amount;
use crate::idempotency::{Claim, Operation};
use crate::model::{
    Credit, Event, EventStatus, OrderId, Recognition, Reservation, TransactionId, UserId, Wallet,
    WalletId,
};

pub mod memory;
pub mod postgres;
pub mod retry;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use retry::RetryPolicy;

/// Expected business outcomes. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("insufficient funds in wallet {wallet}: spendable {spendable}, requested {requested}")]
    InsufficientFunds {
        wallet: WalletId,
        spendable: Amount,
        requested: Amount,
    },

    #[error("order {0} already exists")]
    OrderAlreadyExists(OrderId),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("order {order} is already {status}")]
    OrderAlreadyResolved { order: OrderId, status: EventStatus },

    #[error("order {order} belongs to wallet {owner}, not {requested}")]
    WalletMismatch {
        order: OrderId,
        owner: WalletId,
        requested: WalletId,
    },

    #[error("wallet {0} not found")]
    WalletNotFound(WalletId),

    #[error("no wallet for user {0}")]
    UserWalletNotFound(UserId),

    #[error("amount overflow in wallet of user {0}")]
    AmountOverflow(UserId),
}

/// Failure of a store call.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The unit of work did not take effect and may be retried as is.
    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("store failure: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// One all-or-nothing unit of work.
pub trait UnitOfWork: Send {
    /// Check-and-reserve `id` inside this unit.
    fn claim(
        &mut self,
        id: &TransactionId,
        operation: Operation,
    ) -> impl Future<Output = Result<Claim, StoreError>> + Send;

    /// Upsert the wallet of `credit.user` and add `credit.amount`.
    fn credit(&mut self, credit: &Credit) -> impl Future<Output = Result<Wallet, StoreError>> + Send;

    /// Lock the wallet, check spendable funds, increment `reserved` and record a pending event.
    fn reserve(
        &mut self,
        reservation: &Reservation,
    ) -> impl Future<Output = Result<Event, StoreError>> + Send;

    /// Apply the balance effect of a resolution and finalize the event.
    fn resolve(
        &mut self,
        recognition: &Recognition,
    ) -> impl Future<Output = Result<Event, StoreError>> + Send;

    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn rollback(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

pub trait LedgerStore: Send + Sync {
    type Unit: UnitOfWork;

    fn begin(&self) -> impl Future<Output = Result<Self::Unit, StoreError>> + Send;

    /// Wallet of `user`, or [`LedgerError::UserWalletNotFound`].
    fn wallet(&self, user: UserId) -> impl Future<Output = Result<Wallet, StoreError>> + Send;

    /// All wallets, ordered by id.
    fn wallets(&self) -> impl Future<Output = Result<Vec<Wallet>, StoreError>> + Send;

    /// Events of `wallet`, oldest first.
    fn events(&self, wallet: WalletId)
    -> impl Future<Output = Result<Vec<Event>, StoreError>> + Send;

    /// Remove all wallets, events and transaction records and restart id sequences.
    fn reset(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// A typed mutation that can run inside a unit of work.
pub(crate) trait Mutation: Sync {
    type Output: Send;

    const OPERATION: Operation;

    fn apply<U: UnitOfWork>(
        &self,
        unit: &mut U,
    ) -> impl Future<Output = Result<Self::Output, StoreError>> + Send;
}

impl Mutation for Credit {
    type Output = Wallet;

    const OPERATION: Operation = Operation::Credit;

    fn apply<U: UnitOfWork>(
        &self,
        unit: &mut U,
    ) -> impl Future<Output = Result<Wallet, StoreError>> + Send {
        unit.credit(self)
    }
}

impl Mutation for Reservation {
    type Output = Event;

    const OPERATION: Operation = Operation::Reserve;

    fn apply<U: UnitOfWork>(
        &self,
        unit: &mut U,
    ) -> impl Future<Output = Result<Event, StoreError>> + Send {
        unit.reserve(self)
    }
}

impl Mutation for Recognition {
    type Output = Event;

    const OPERATION: Operation = Operation::Resolve;

    fn apply<U: UnitOfWork>(
        &self,
        unit: &mut U,
    ) -> impl Future<Output = Result<Event, StoreError>> + Send {
        unit.resolve(self)
    }
}
