use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::model::{
    Command, Credit, OrderId, Recognition, Reservation, Resolution, ServiceId, TransactionId,
    UnknownStatus, UserId, Wallet, WalletId,
};
use crate::Amount;

/// Errors that can occur when reading commands or writing wallets
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open csv input: {0}")]
    Open(#[source] csv::Error),

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized command type '{tx_type}'")]
    UnrecognizedType { line: usize, tx_type: String },

    #[error("line {line}: {tx_type} missing {field}")]
    MissingField {
        line: usize,
        tx_type: &'static str,
        field: &'static str,
    },

    #[error("line {line}: {source}")]
    InvalidStatus { line: usize, source: UnknownStatus },

    #[error("failed to write csv row: {0}")]
    Write(#[from] csv::Error),

    #[error("failed to flush csv output: {0}")]
    Flush(#[from] io::Error),
}

#[derive(Debug, Deserialize)]
struct InputRow {
    r#type: String,
    tx: String,
    user: Option<UserId>,
    wallet: Option<WalletId>,
    service: Option<ServiceId>,
    order: Option<OrderId>,
    amount: Option<i64>,
    status: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputRow {
    wallet: WalletId,
    user: UserId,
    available: Amount,
    reserved: Amount,
    spendable: Amount,
}

fn required<T>(
    value: Option<T>,
    line: usize,
    tx_type: &'static str,
    field: &'static str,
) -> Result<T, CsvError> {
    value.ok_or(CsvError::MissingField {
        line,
        tx_type,
        field,
    })
}

fn parse_row(line: usize, row: InputRow) -> Result<Command, CsvError> {
    let transaction = TransactionId::new(row.tx);
    match row.r#type.as_str() {
        "credit" => Ok(Command::Credit {
            transaction,
            credit: Credit {
                user: required(row.user, line, "credit", "user")?,
                amount: Amount::new(required(row.amount, line, "credit", "amount")?),
            },
        }),
        "reserve" => Ok(Command::Reserve {
            transaction,
            reservation: Reservation {
                wallet: required(row.wallet, line, "reserve", "wallet")?,
                service: required(row.service, line, "reserve", "service")?,
                order: required(row.order, line, "reserve", "order")?,
                price: Amount::new(required(row.amount, line, "reserve", "amount")?),
            },
        }),
        "resolve" => {
            let status = required(row.status, line, "resolve", "status")?;
            Ok(Command::Resolve {
                transaction,
                recognition: Recognition {
                    wallet: required(row.wallet, line, "resolve", "wallet")?,
                    order: required(row.order, line, "resolve", "order")?,
                    status: status
                        .parse::<Resolution>()
                        .map_err(|source| CsvError::InvalidStatus { line, source })?,
                },
            })
        }
        other => Err(CsvError::UnrecognizedType {
            line,
            tx_type: other.to_string(),
        }),
    }
}

/// Read commands from a csv file with the columns
/// `type,tx,user,wallet,service,order,amount,status`.
///
/// Rows that fail to parse are yielded as errors; the iterator keeps going.
pub fn read_commands(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Command, CsvError>>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(CsvError::Open)?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            parse_row(line, row)
        }))
}

/// Write wallets in csv format
pub fn write_wallets(
    out: impl io::Write,
    wallets: impl IntoIterator<Item = Wallet>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(out);

    for wallet in wallets {
        writer.serialize(OutputRow {
            wallet: wallet.id,
            user: wallet.user,
            available: wallet.available,
            reserved: wallet.reserved,
            spendable: wallet.spendable(),
        })?;
    }

    writer.flush()?;
    Ok(())
}
