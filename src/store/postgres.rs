//! Postgres ledger store.
//!
//! One SQL transaction per unit of work. The idempotency row, the wallet
//! update and the event row of a request commit together. Concurrent units on
//! the same wallet are serialized by `SELECT ... FOR UPDATE`; concurrent units
//! with the same transaction id are serialized by the primary key of
//! `ledger_transactions`, so a second caller waits for the first to commit
//! (and then sees it) or to roll back (and then owns the id).

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use tracing::{debug, info};

use super::{LedgerError, LedgerStore, StoreError, UnitOfWork};
use crate::Amount;
use crate::config::DatabaseConfig;
use crate::idempotency::{Claim, Operation};
use crate::model::{
    Credit, Event, EventStatus, Recognition, Resolution, Reservation, TransactionId, UserId,
    Wallet, WalletId,
};

/// SQLSTATEs after which the whole unit of work can be retried.
const TRANSIENT_CODES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
    "57P01", // admin_shutdown
    "08000", // connection_exception
    "08003", // connection_does_not_exist
    "08006", // connection_failure
];

const NUMERIC_OUT_OF_RANGE: &str = "22003";

const WALLET_COLUMNS: &str = "wallet_id, user_id, available_balance, reserved, updated_at";
const EVENT_COLUMNS: &str = "id, wallet_id, service_id, order_id, price, status, created_at";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        info!(
            max_connections = config.max_connections,
            "connecting to postgres"
        );
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(classify)?;
        Ok(Self { pool })
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        info!("running ledger migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Fatal(format!("migration failed: {e}")))
    }
}

impl LedgerStore for PgStore {
    type Unit = PgUnit;

    async fn begin(&self) -> Result<PgUnit, StoreError> {
        let tx = self.pool.begin().await.map_err(classify)?;
        Ok(PgUnit { tx })
    }

    async fn wallet(&self, user: UserId) -> Result<Wallet, StoreError> {
        let row = sqlx::query_as::<_, WalletRow>(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1"
        ))
        .bind(user)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        row.map(Wallet::from)
            .ok_or(StoreError::Ledger(LedgerError::UserWalletNotFound(user)))
    }

    async fn wallets(&self) -> Result<Vec<Wallet>, StoreError> {
        let rows = sqlx::query_as::<_, WalletRow>(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets ORDER BY wallet_id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        Ok(rows.into_iter().map(Wallet::from).collect())
    }

    async fn events(&self, wallet: WalletId) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE wallet_id = $1 ORDER BY id"
        ))
        .bind(wallet)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        rows.into_iter().map(Event::try_from).collect()
    }

    async fn reset(&self) -> Result<(), StoreError> {
        sqlx::query("TRUNCATE TABLE events, wallets, ledger_transactions RESTART IDENTITY")
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        info!("ledger tables truncated");
        Ok(())
    }
}

/// A unit of work backed by one Postgres transaction. Dropping it rolls back.
pub struct PgUnit {
    tx: Transaction<'static, Postgres>,
}

impl UnitOfWork for PgUnit {
    async fn claim(&mut self, id: &TransactionId, operation: Operation) -> Result<Claim, StoreError> {
        let inserted = sqlx::query_scalar::<_, String>(
            "INSERT INTO ledger_transactions (transaction_id, operation) VALUES ($1, $2) \
             ON CONFLICT (transaction_id) DO NOTHING RETURNING transaction_id",
        )
        .bind(id.as_str())
        .bind(operation.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify)?;

        Ok(match inserted {
            Some(_) => Claim::Fresh,
            None => Claim::AlreadySeen,
        })
    }

    async fn credit(&mut self, credit: &Credit) -> Result<Wallet, StoreError> {
        let row = sqlx::query_as::<_, WalletRow>(&format!(
            "INSERT INTO wallets (user_id, available_balance) VALUES ($1, $2) \
             ON CONFLICT (user_id) DO UPDATE SET \
                 available_balance = wallets.available_balance + EXCLUDED.available_balance, \
                 updated_at = NOW() \
             RETURNING {WALLET_COLUMNS}"
        ))
        .bind(credit.user)
        .bind(credit.amount.minor_units())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| match sqlstate(&e).as_deref() {
            Some(NUMERIC_OUT_OF_RANGE) => {
                StoreError::Ledger(LedgerError::AmountOverflow(credit.user))
            }
            _ => classify(e),
        })?;

        Ok(row.into())
    }

    async fn reserve(&mut self, reservation: &Reservation) -> Result<Event, StoreError> {
        let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM events WHERE order_id = $1")
            .bind(reservation.order)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(classify)?;
        if existing.is_some() {
            return Err(LedgerError::OrderAlreadyExists(reservation.order).into());
        }

        let wallet: Wallet = sqlx::query_as::<_, WalletRow>(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE wallet_id = $1 FOR UPDATE"
        ))
        .bind(reservation.wallet)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify)?
        .ok_or(LedgerError::WalletNotFound(reservation.wallet))?
        .into();

        let spendable = wallet.spendable();
        if spendable < reservation.price {
            return Err(LedgerError::InsufficientFunds {
                wallet: wallet.id,
                spendable,
                requested: reservation.price,
            }
            .into());
        }

        let updated = sqlx::query(
            "UPDATE wallets SET reserved = reserved + $2, updated_at = NOW() WHERE wallet_id = $1",
        )
        .bind(reservation.wallet)
        .bind(reservation.price.minor_units())
        .execute(&mut *self.tx)
        .await
        .map_err(classify)?;
        if updated.rows_affected() == 0 {
            return Err(LedgerError::WalletNotFound(reservation.wallet).into());
        }

        let row = sqlx::query_as::<_, EventRow>(&format!(
            "INSERT INTO events (wallet_id, service_id, order_id, price) VALUES ($1, $2, $3, $4) \
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(reservation.wallet)
        .bind(reservation.service)
        .bind(reservation.order)
        .bind(reservation.price.minor_units())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            // a concurrent reservation on another wallet won the order id
            if is_unique_violation(&e) {
                StoreError::Ledger(LedgerError::OrderAlreadyExists(reservation.order))
            } else {
                classify(e)
            }
        })?;

        Event::try_from(row)
    }

    async fn resolve(&mut self, recognition: &Recognition) -> Result<Event, StoreError> {
        let event: Event = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE order_id = $1 FOR UPDATE"
        ))
        .bind(recognition.order)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify)?
        .ok_or(LedgerError::OrderNotFound(recognition.order))?
        .try_into()?;

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

        let balance_update = match recognition.status {
            Resolution::Done => {
                "UPDATE wallets SET available_balance = available_balance - $2, \
                 reserved = reserved - $2, updated_at = NOW() WHERE wallet_id = $1"
            }
            Resolution::Canceled => {
                "UPDATE wallets SET reserved = reserved - $2, updated_at = NOW() WHERE wallet_id = $1"
            }
        };
        let updated = sqlx::query(balance_update)
            .bind(event.wallet)
            .bind(event.price.minor_units())
            .execute(&mut *self.tx)
            .await
            .map_err(classify)?;
        if updated.rows_affected() == 0 {
            return Err(LedgerError::WalletNotFound(event.wallet).into());
        }

        let row = sqlx::query_as::<_, EventRow>(&format!(
            "UPDATE events SET status = $2 WHERE order_id = $1 RETURNING {EVENT_COLUMNS}"
        ))
        .bind(recognition.order)
        .bind(EventStatus::from(recognition.status).as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(classify)?;

        Event::try_from(row)
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(classify)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        debug!("rolling back ledger transaction");
        self.tx.rollback().await.map_err(classify)
    }
}

#[derive(Debug, FromRow)]
struct WalletRow {
    wallet_id: i64,
    user_id: i64,
    available_balance: i64,
    reserved: i64,
    updated_at: DateTime<Utc>,
}

impl From<WalletRow> for Wallet {
    fn from(row: WalletRow) -> Self {
        Wallet {
            id: row.wallet_id,
            user: row.user_id,
            available: Amount::new(row.available_balance),
            reserved: Amount::new(row.reserved),
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct EventRow {
    id: i64,
    wallet_id: i64,
    service_id: i64,
    order_id: i64,
    price: i64,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<EventStatus>()
            .map_err(|e| StoreError::Fatal(format!("event {}: {e}", row.id)))?;
        Ok(Event {
            id: row.id,
            wallet: row.wallet_id,
            service: row.service_id,
            order: row.order_id,
            price: Amount::new(row.price),
            status,
            created_at: row.created_at,
        })
    }
}

fn sqlstate(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

/// Sort a driver error into retryable and fatal.
fn classify(err: sqlx::Error) -> StoreError {
    let transient = match &err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(_) => sqlstate(&err)
            .is_some_and(|code| TRANSIENT_CODES.contains(&code.as_str())),
        _ => false,
    };
    if transient {
        StoreError::Transient(err.to_string())
    } else {
        StoreError::Fatal(err.to_string())
    }
}
