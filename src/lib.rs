pub mod amount;
pub mod config;
pub mod csv;
pub mod engine;
pub mod idempotency;
pub mod model;
pub mod store;

pub use amount::Amount;
pub use config::LedgerConfig;
pub use engine::{Engine, EngineError, Outcome, Receipt};
pub use model::{
    Command, Credit, Event, EventStatus, OrderId, Recognition, Reservation, Resolution,
    ServiceId, TransactionId, UserId, Wallet, WalletId,
};
pub use store::{LedgerError, LedgerStore, MemoryStore, PgStore, RetryPolicy};
