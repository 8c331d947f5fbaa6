//! Core domain types for the wallet ledger.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Amount;

/// External user identifier. At most one wallet exists per user.
pub type UserId = i64;

/// Surrogate wallet identifier, assigned on first credit.
pub type WalletId = i64;

/// Identifier of the service an order was placed with.
pub type ServiceId = i64;

/// Caller-assigned, globally unique order identifier.
pub type OrderId = i64;

/// Caller-assigned idempotency key of one logical operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        TransactionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(value: &str) -> Self {
        TransactionId(value.to_owned())
    }
}

impl From<String> for TransactionId {
    fn from(value: String) -> Self {
        TransactionId(value)
    }
}

/// Snapshot of a wallet row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user: UserId,
    pub available: Amount,
    /// Funds earmarked against pending orders; always `<= available`.
    pub reserved: Amount,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// `available - reserved`.
    pub fn spendable(&self) -> Amount {
        self.available
            .checked_sub(self.reserved)
            .unwrap_or(Amount::ZERO)
    }
}

/// Lifecycle of a reservation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    #[default]
    Pending,
    Done,
    Canceled,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Pending => "PENDING",
            EventStatus::Done => "DONE",
            EventStatus::Canceled => "CANCELED",
        }
    }

    pub fn is_final(self) -> bool {
        self != EventStatus::Pending
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for EventStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(EventStatus::Pending),
            "DONE" => Ok(EventStatus::Done),
            "CANCELED" => Ok(EventStatus::Canceled),
            other => Err(UnknownStatus(other.to_owned())),
        }
    }
}

/// Final state requested for a pending event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    /// Reserved funds leave the wallet.
    Done,
    /// Reserved funds return to the spendable pool.
    Canceled,
}

impl From<Resolution> for EventStatus {
    fn from(value: Resolution) -> Self {
        match value {
            Resolution::Done => EventStatus::Done,
            Resolution::Canceled => EventStatus::Canceled,
        }
    }
}

impl FromStr for Resolution {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<EventStatus>()? {
            EventStatus::Done => Ok(Resolution::Done),
            EventStatus::Canceled => Ok(Resolution::Canceled),
            EventStatus::Pending => Err(UnknownStatus(s.to_owned())),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        EventStatus::from(*self).fmt(f)
    }
}

/// A reservation of funds against one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub id: i64,
    pub wallet: WalletId,
    pub service: ServiceId,
    pub order: OrderId,
    pub price: Amount,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
}

/// Top up the wallet of `user`, creating it if needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credit {
    pub user: UserId,
    pub amount: Amount,
}

/// Earmark `price` on `wallet` for `order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub wallet: WalletId,
    pub service: ServiceId,
    pub order: OrderId,
    pub price: Amount,
}

/// Finalize the pending event of `order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recognition {
    pub wallet: WalletId,
    pub order: OrderId,
    pub status: Resolution,
}

/// A mutating request as it arrives from a caller, with its idempotency key.
#[derive(Debug, Clone)]
pub enum Command {
    Credit {
        transaction: TransactionId,
        credit: Credit,
    },
    Reserve {
        transaction: TransactionId,
        reservation: Reservation,
    },
    Resolve {
        transaction: TransactionId,
        recognition: Recognition,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(available: i64, reserved: i64) -> Wallet {
        Wallet {
            id: 1,
            user: 1234,
            available: Amount::new(available),
            reserved: Amount::new(reserved),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn spendable_subtracts_reserved() {
        assert_eq!(wallet(200, 10).spendable(), Amount::new(190));
        assert_eq!(wallet(10, 10).spendable(), Amount::ZERO);
    }

    #[test]
    fn event_status_round_trips_through_str() {
        for status in [EventStatus::Pending, EventStatus::Done, EventStatus::Canceled] {
            assert_eq!(status.as_str().parse::<EventStatus>(), Ok(status));
        }
        assert!("done".parse::<EventStatus>().is_err());
    }

    #[test]
    fn resolution_rejects_pending() {
        assert_eq!("DONE".parse::<Resolution>(), Ok(Resolution::Done));
        assert_eq!("CANCELED".parse::<Resolution>(), Ok(Resolution::Canceled));
        assert_eq!(
            "PENDING".parse::<Resolution>(),
            Err(UnknownStatus("PENDING".to_owned()))
        );
    }

    #[test]
    fn only_pending_is_not_final() {
        assert!(!EventStatus::Pending.is_final());
        assert!(EventStatus::Done.is_final());
        assert!(EventStatus::Canceled.is_final());
    }
}
