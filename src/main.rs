use std::env;
use std::io;

use anyhow::{Context, Result};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wallet_ledger::csv::{read_commands, write_wallets};
use wallet_ledger::{Engine, LedgerConfig, LedgerStore, MemoryStore, PgStore};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .with_writer(io::stderr)
        .init();

    let path = env::args()
        .nth(1)
        .context("usage: wallet-ledger <commands.csv>")?;

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let config = LedgerConfig::from_env().context("invalid configuration")?;

    match &config.database {
        Some(database) => {
            let store = PgStore::connect(database)
                .await
                .context("failed to connect to postgres")?;
            if database.run_migrations {
                store.migrate().await.context("failed to run migrations")?;
            }
            info!("using postgres store");
            replay(Engine::with_retry_policy(store, config.retry), path).await
        }
        None => {
            info!("using in-memory store");
            replay(
                Engine::with_retry_policy(MemoryStore::new(), config.retry),
                path,
            )
            .await
        }
    }
}

async fn replay<S: LedgerStore>(engine: Engine<S>, path: String) -> Result<()> {
    let commands = read_commands(path)?;
    let (tx_sender, tx_receiver) = tokio::sync::mpsc::channel(16);

    let reader = tokio::task::spawn_blocking(move || {
        for result in commands {
            match result {
                Ok(command) => {
                    if tx_sender.blocking_send(command).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    engine.run(ReceiverStream::new(tx_receiver)).await;
    reader.await.context("csv reader task failed")?;

    let wallets = engine.wallets().await?;
    write_wallets(io::stdout().lock(), wallets)?;
    Ok(())
}
