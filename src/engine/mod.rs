//! Ledger engine.
//!
//! Every mutating call runs the same protocol inside one unit of work:
//! claim the transaction id, apply the mutation, commit both. A claim that
//! was already taken short-circuits to [`Outcome::Duplicate`] without touching
//! wallet or event state. A failed mutation rolls back the claim with it, so
//! the caller may resubmit with the same transaction id. Transient store
//! failures restart the whole unit within the configured [`RetryPolicy`].

use std::fmt;

use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::Amount;
use crate::idempotency::{Claim, Operation};
use crate::model::{
    Command, Credit, Event, Recognition, Reservation, TransactionId, UserId, Wallet, WalletId,
};
use crate::store::retry::with_retries;
use crate::store::{LedgerStore, Mutation, RetryPolicy, StoreError, UnitOfWork};

mod error;
pub use error::{EngineError, ValidationError};

/// Longest accepted transaction id, in bytes.
pub const MAX_TRANSACTION_ID_LEN: usize = 128;

/// Result of a mutating call that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The mutation was applied under this transaction id.
    Applied(T),
    /// The transaction id was used before; nothing was changed.
    Duplicate,
}

impl<T> Outcome<T> {
    pub fn applied(self) -> Option<T> {
        match self {
            Outcome::Applied(value) => Some(value),
            Outcome::Duplicate => None,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Outcome::Duplicate)
    }

    /// HTTP status a transport should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Outcome::Applied(_) => 200,
            Outcome::Duplicate => 409,
        }
    }
}

/// Result of [`Engine::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receipt {
    Wallet(Wallet),
    Event(Event),
    Duplicate,
}

impl From<Outcome<Wallet>> for Receipt {
    fn from(outcome: Outcome<Wallet>) -> Self {
        match outcome {
            Outcome::Applied(wallet) => Receipt::Wallet(wallet),
            Outcome::Duplicate => Receipt::Duplicate,
        }
    }
}

impl From<Outcome<Event>> for Receipt {
    fn from(outcome: Outcome<Event>) -> Self {
        match outcome {
            Outcome::Applied(event) => Receipt::Event(event),
            Outcome::Duplicate => Receipt::Duplicate,
        }
    }
}

/// The wallet ledger engine.
///
/// Cheap to clone when the store is; all methods take `&self` so one engine
/// can serve concurrent requests.
#[derive(Debug, Clone)]
pub struct Engine<S> {
    store: S,
    retry: RetryPolicy,
}

/// Public API
impl<S: LedgerStore> Engine<S> {
    pub fn new(store: S) -> Self {
        Self::with_retry_policy(store, RetryPolicy::default())
    }

    pub fn with_retry_policy(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Credit `amount` to the wallet of `user`, creating the wallet on first use.
    pub async fn add_funds(
        &self,
        transaction: &TransactionId,
        user: UserId,
        amount: Amount,
    ) -> Result<Outcome<Wallet>, EngineError> {
        let result = self.add_funds_inner(transaction, user, amount).await;
        log_result(
            Operation::Credit,
            transaction,
            format_args!("user {user}, amount {amount}"),
            &result,
        );
        result
    }

    /// Reserve `reservation.price` on a wallet against a new order.
    pub async fn reserve_funds(
        &self,
        transaction: &TransactionId,
        reservation: &Reservation,
    ) -> Result<Outcome<Event>, EngineError> {
        let result = self.reserve_funds_inner(transaction, reservation).await;
        log_result(
            Operation::Reserve,
            transaction,
            format_args!(
                "wallet {}, order {}, price {}",
                reservation.wallet, reservation.order, reservation.price
            ),
            &result,
        );
        result
    }

    /// Resolve the pending event of an order as done or canceled.
    pub async fn recognize_revenue(
        &self,
        transaction: &TransactionId,
        recognition: &Recognition,
    ) -> Result<Outcome<Event>, EngineError> {
        let result = self.recognize_revenue_inner(transaction, recognition).await;
        log_result(
            Operation::Resolve,
            transaction,
            format_args!(
                "wallet {}, order {}, status {}",
                recognition.wallet, recognition.order, recognition.status
            ),
            &result,
        );
        result
    }

    /// Current wallet of `user`. Reads bypass the idempotency guard.
    pub async fn get_balance(&self, user: UserId) -> Result<Wallet, EngineError> {
        self.read(|| self.store.wallet(user)).await
    }

    /// All wallets, ordered by id.
    pub async fn wallets(&self) -> Result<Vec<Wallet>, EngineError> {
        self.read(|| self.store.wallets()).await
    }

    /// Event log of one wallet, oldest first.
    pub async fn wallet_events(&self, wallet: WalletId) -> Result<Vec<Event>, EngineError> {
        self.read(|| self.store.events(wallet)).await
    }

    /// Wipe all ledger state. Meant for test harnesses.
    pub async fn reset(&self) -> Result<(), EngineError> {
        warn!("resetting ledger state");
        self.read(|| self.store.reset()).await
    }

    /// Apply a single command.
    pub async fn apply(&self, command: Command) -> Result<Receipt, EngineError> {
        match command {
            Command::Credit {
                transaction,
                credit,
            } => Ok(self
                .add_funds(&transaction, credit.user, credit.amount)
                .await?
                .into()),
            Command::Reserve {
                transaction,
                reservation,
            } => Ok(self.reserve_funds(&transaction, &reservation).await?.into()),
            Command::Resolve {
                transaction,
                recognition,
            } => Ok(self
                .recognize_revenue(&transaction, &recognition)
                .await?
                .into()),
        }
    }

    /// Apply commands in stream order until the stream ends.
    pub async fn run(&self, mut stream: impl Stream<Item = Command> + Unpin) {
        while let Some(command) = stream.next().await {
            // failures are logged by `apply` and must not stop the run
            let _ = self.apply(command).await;
        }
    }
}

/// Private API
impl<S: LedgerStore> Engine<S> {
    async fn add_funds_inner(
        &self,
        transaction: &TransactionId,
        user: UserId,
        amount: Amount,
    ) -> Result<Outcome<Wallet>, EngineError> {
        validate_transaction(transaction)?;
        if !amount.is_positive() {
            return Err(ValidationError::NonPositiveAmount(amount).into());
        }
        self.execute(transaction, &Credit { user, amount }).await
    }

    async fn reserve_funds_inner(
        &self,
        transaction: &TransactionId,
        reservation: &Reservation,
    ) -> Result<Outcome<Event>, EngineError> {
        validate_transaction(transaction)?;
        if !reservation.price.is_positive() {
            return Err(ValidationError::NonPositivePrice(reservation.price).into());
        }
        self.execute(transaction, reservation).await
    }

    async fn recognize_revenue_inner(
        &self,
        transaction: &TransactionId,
        recognition: &Recognition,
    ) -> Result<Outcome<Event>, EngineError> {
        validate_transaction(transaction)?;
        self.execute(transaction, recognition).await
    }

    async fn execute<M: Mutation>(
        &self,
        transaction: &TransactionId,
        mutation: &M,
    ) -> Result<Outcome<M::Output>, EngineError> {
        with_retries(self.retry, M::OPERATION.as_str(), || {
            self.attempt(transaction, mutation)
        })
        .await
        .map_err(|e| EngineError::from_store(e, self.retry.attempts()))
    }

    /// One unit of work: claim, mutate, commit. Any early return drops the
    /// unit, which rolls the claim back together with the mutation.
    async fn attempt<M: Mutation>(
        &self,
        transaction: &TransactionId,
        mutation: &M,
    ) -> Result<Outcome<M::Output>, StoreError> {
        let mut unit = self.store.begin().await?;

        if unit.claim(transaction, M::OPERATION).await? == Claim::AlreadySeen {
            unit.rollback().await?;
            return Ok(Outcome::Duplicate);
        }

        match mutation.apply(&mut unit).await {
            Ok(output) => {
                unit.commit().await?;
                Ok(Outcome::Applied(output))
            }
            Err(err) => {
                if let Err(rollback) = unit.rollback().await {
                    warn!(tx = %transaction, reason = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn read<T, F, Fut>(&self, op: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        with_retries(self.retry, "read", op)
            .await
            .map_err(|e| EngineError::from_store(e, self.retry.attempts()))
    }
}

fn validate_transaction(transaction: &TransactionId) -> Result<(), ValidationError> {
    let len = transaction.as_str().len();
    if transaction.as_str().trim().is_empty() {
        return Err(ValidationError::EmptyTransactionId);
    }
    if len > MAX_TRANSACTION_ID_LEN {
        return Err(ValidationError::TransactionIdTooLong(len));
    }
    Ok(())
}

/// Small helper to log mutating results
fn log_result<T>(
    operation: Operation,
    transaction: &TransactionId,
    detail: fmt::Arguments<'_>,
    result: &Result<Outcome<T>, EngineError>,
) {
    match result {
        Ok(Outcome::Applied(_)) => {
            info!(tx = %transaction, "{operation} applied: {detail}");
        }
        Ok(Outcome::Duplicate) => {
            info!(tx = %transaction, "{operation} duplicate: {detail}");
        }
        Err(e @ (EngineError::Invalid(_) | EngineError::Ledger(_))) => {
            info!(tx = %transaction, reason = %e, "{operation} skipped: {detail}");
        }
        Err(e) => {
            warn!(tx = %transaction, reason = %e, "{operation} failed: {detail}");
        }
    }
}
