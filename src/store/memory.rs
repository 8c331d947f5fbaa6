//! In-process ledger store.
//!
//! All state sits behind one async mutex. A [`MemoryUnit`] owns the lock for
//! its whole lifetime, so units are serialized and every check it makes
//! (idempotency claim, order uniqueness, spendable funds) stays valid until it
//! commits. Mutations are recorded in an undo log that is replayed when the
//! unit is rolled back or dropped uncommitted.
//!
//! This is a single-writer reference store: requests on different wallets
//! are serialized too, and reads wait behind writers. Use [`PgStore`] where
//! requests on different wallets must proceed in parallel.
//!
//! [`PgStore`]: super::PgStore

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::{LedgerError, LedgerStore, StoreError, UnitOfWork};
use crate::idempotency::{Claim, IdempotencyTable, Operation};
use crate::model::{
    Credit, Event, EventStatus, OrderId, Recognition, Resolution, Reservation, TransactionId,
    UserId, Wallet, WalletId,
};

#[derive(Debug, Default)]
struct LedgerState {
    wallets: BTreeMap<WalletId, Wallet>,
    /// user -> wallet, unique.
    users: HashMap<UserId, WalletId>,
    events: HashMap<OrderId, Event>,
    last_wallet_id: WalletId,
    last_event_id: i64,
    transactions: IdempotencyTable,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transaction ids holding a record, committed or in progress.
    pub async fn recorded_transactions(&self) -> usize {
        self.state.lock().await.transactions.len()
    }
}

impl LedgerStore for MemoryStore {
    type Unit = MemoryUnit;

    async fn begin(&self) -> Result<MemoryUnit, StoreError> {
        Ok(MemoryUnit {
            state: Arc::clone(&self.state).lock_owned().await,
            undo: Vec::new(),
        })
    }

    async fn wallet(&self, user: UserId) -> Result<Wallet, StoreError> {
        let state = self.state.lock().await;
        state
            .users
            .get(&user)
            .and_then(|id| state.wallets.get(id))
            .cloned()
            .ok_or(StoreError::Ledger(LedgerError::UserWalletNotFound(user)))
    }

    async fn wallets(&self) -> Result<Vec<Wallet>, StoreError> {
        Ok(self.state.lock().await.wallets.values().cloned().collect())
    }

    async fn events(&self, wallet: WalletId) -> Result<Vec<Event>, StoreError> {
        let state = self.state.lock().await;
        let mut events: Vec<Event> = state
            .events
            .values()
            .filter(|event| event.wallet == wallet)
            .cloned()
            .collect();
        events.sort_by_key(|event| event.id);
        Ok(events)
    }

    async fn reset(&self) -> Result<(), StoreError> {
        *self.state.lock().await = LedgerState::default();
        Ok(())
    }
}

/// Entry of the undo log: the state to restore.
#[derive(Debug)]
enum Undo {
    Claim(TransactionId),
    /// `None` when the unit created the wallet.
    Wallet {
        id: WalletId,
        previous: Option<Wallet>,
    },
    /// `None` when the unit created the event.
    Event {
        order: OrderId,
        previous: Option<Event>,
    },
}

/// Exclusive unit of work over a [`MemoryStore`].
pub struct MemoryUnit {
    state: OwnedMutexGuard<LedgerState>,
    undo: Vec<Undo>,
}

impl MemoryUnit {
    fn undo_all(&mut self) {
        let state = &mut *self.state;
        while let Some(entry) = self.undo.pop() {
            match entry {
                Undo::Claim(id) => state.transactions.release(&id),
                Undo::Wallet { id, previous: Some(wallet) } => {
                    state.wallets.insert(id, wallet);
                }
                Undo::Wallet { id, previous: None } => {
                    if let Some(wallet) = state.wallets.remove(&id) {
                        state.users.remove(&wallet.user);
                    }
                }
                Undo::Event { order, previous: Some(event) } => {
                    state.events.insert(order, event);
                }
                Undo::Event { order, previous: None } => {
                    state.events.remove(&order);
                }
            }
        }
    }

    fn credit_now(&mut self, credit: &Credit) -> Result<Wallet, LedgerError> {
        let state = &mut *self.state;
        let now = Utc::now();

        if let Some(&id) = state.users.get(&credit.user) {
            let wallet = state
                .wallets
                .get_mut(&id)
                .ok_or(LedgerError::WalletNotFound(id))?;
            let available = wallet
                .available
                .checked_add(credit.amount)
                .ok_or(LedgerError::AmountOverflow(credit.user))?;
            self.undo.push(Undo::Wallet {
                id,
                previous: Some(wallet.clone()),
            });
            wallet.available = available;
            wallet.updated_at = now;
            return Ok(wallet.clone());
        }

        state.last_wallet_id += 1;
        let wallet = Wallet {
            id: state.last_wallet_id,
            user: credit.user,
            available: credit.amount,
            reserved: Default::default(),
            updated_at: now,
        };
        state.users.insert(credit.user, wallet.id);
        state.wallets.insert(wallet.id, wallet.clone());
        self.undo.push(Undo::Wallet {
            id: wallet.id,
            previous: None,
        });
        Ok(wallet)
    }

    fn reserve_now(&mut self, reservation: &Reservation) -> Result<Event, LedgerError> {
        let state = &mut *self.state;

        if state.events.contains_key(&reservation.order) {
            return Err(LedgerError::OrderAlreadyExists(reservation.order));
        }

        let wallet = state
            .wallets
            .get_mut(&reservation.wallet)
            .ok_or(LedgerError::WalletNotFound(reservation.wallet))?;

        let spendable = wallet.spendable();
        if spendable < reservation.price {
            return Err(LedgerError::InsufficientFunds {
                wallet: wallet.id,
                spendable,
                requested: reservation.price,
            });
        }
        let reserved = wallet
            .reserved
            .checked_add(reservation.price)
            .ok_or(LedgerError::AmountOverflow(wallet.user))?;

        self.undo.push(Undo::Wallet {
            id: wallet.id,
            previous: Some(wallet.clone()),
        });
        let now = Utc::now();
        wallet.reserved = reserved;
        wallet.updated_at = now;

        state.last_event_id += 1;
        let event = Event {
            id: state.last_event_id,
            wallet: reservation.wallet,
            service: reservation.service,
            order: reservation.order,
            price: reservation.price,
            status: EventStatus::Pending,
            created_at: now,
        };
        state.events.insert(event.order, event.clone());
        self.undo.push(Undo::Event {
            order: event.order,
            previous: None,
        });
        Ok(event)
    }

    fn resolve_now(&mut self, recognition: &Recognition) -> Result<Event, StoreError> {
        let state = &mut *self.state;

        let event = state
            .events
            .get_mut(&recognition.order)
            .ok_or(LedgerError::OrderNotFound(recognition.order))?;
        if event.status.is_final() {
            return Err(LedgerError::OrderAlreadyResolved {
                order: event.order,
                status: event.status,
            }
            .into());
        }
        if event.wallet != recognition.wallet {
            return Err(LedgerError::WalletMismatch {
                order: event.order,
                owner: event.wallet,
                requested: recognition.wallet,
            }
            .into());
        }

        let wallet = state
            .wallets
            .get_mut(&event.wallet)
            .ok_or(LedgerError::WalletNotFound(event.wallet))?;

        let reserved = wallet
            .reserved
            .checked_sub(event.price)
            .filter(|reserved| !reserved.is_negative())
            .ok_or_else(|| {
                StoreError::Fatal(format!(
                    "wallet {} reserves {} but order {} holds {}",
                    wallet.id, wallet.reserved, event.order, event.price
                ))
            })?;
        let available = match recognition.status {
            Resolution::Done => wallet
                .available
                .checked_sub(event.price)
                .filter(|available| *available >= reserved)
                .ok_or_else(|| {
                    StoreError::Fatal(format!(
                        "wallet {} cannot cover reserved order {}",
                        wallet.id, event.order
                    ))
                })?,
            Resolution::Canceled => wallet.available,
        };

        self.undo.push(Undo::Wallet {
            id: wallet.id,
            previous: Some(wallet.clone()),
        });
        self.undo.push(Undo::Event {
            order: event.order,
            previous: Some(event.clone()),
        });
        wallet.available = available;
        wallet.reserved = reserved;
        wallet.updated_at = Utc::now();
        event.status = recognition.status.into();
        Ok(event.clone())
    }
}

impl UnitOfWork for MemoryUnit {
    async fn claim(&mut self, id: &TransactionId, operation: Operation) -> Result<Claim, StoreError> {
        let claim = self.state.transactions.check_and_reserve(id, operation);
        match claim {
            Claim::Fresh => self.undo.push(Undo::Claim(id.clone())),
            Claim::AlreadySeen => {
                if let Some(record) = self.state.transactions.get(id) {
                    debug!(
                        tx = %id,
                        operation = %record.operation,
                        recorded_at = %record.recorded_at,
                        "transaction id already recorded"
                    );
                }
            }
        }
        Ok(claim)
    }

    async fn credit(&mut self, credit: &Credit) -> Result<Wallet, StoreError> {
        Ok(self.credit_now(credit)?)
    }

    async fn reserve(&mut self, reservation: &Reservation) -> Result<Event, StoreError> {
        Ok(self.reserve_now(reservation)?)
    }

    async fn resolve(&mut self, recognition: &Recognition) -> Result<Event, StoreError> {
        self.resolve_now(recognition)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        let state = &mut *self.state;
        for entry in self.undo.drain(..) {
            if let Undo::Claim(id) = entry {
                state.transactions.commit(&id);
            }
        }
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        self.undo_all();
        Ok(())
    }
}

impl Drop for MemoryUnit {
    fn drop(&mut self) {
        if !self.undo.is_empty() {
            debug!(entries = self.undo.len(), "rolling back abandoned unit of work");
            self.undo_all();
        }
    }
}
