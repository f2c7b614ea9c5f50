use std::sync::Arc;

use anyhow::{Context, Result};
use atomic_common::task::spawn_task;
use clap::Parser;
use log::{error, info};
use tokio::sync::watch;

use atomic_filler::{
    config::{Cli, FillerConfig},
    db::PgStore,
    handlers::create_handlers,
    notification::{NotificationBus, RedisPublisher},
    reader::{ReaderOptions, ShipReader},
    receiver::StateReceiver,
    rpc::ChainRpc,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .parse_filters(&cli.log_level)
        .format_timestamp_millis()
        .init();

    let config = FillerConfig::load(&cli.config)?;
    info!(
        "Starting filler '{}' for chain '{}'",
        config.reader_name, config.chain_name
    );

    let store = Arc::new(
        PgStore::connect(&config.database_url, config.db_connections)
            .await
            .context("connecting to the database")?,
    );

    let publisher = RedisPublisher::connect(&config.broker_url)
        .await
        .context("connecting to the message broker")?;
    let bus = NotificationBus::new(
        Box::new(publisher),
        &config.chain_name,
        &config.reader_name,
    );

    let rpc = ChainRpc::new(&config.chain_endpoint);
    let handlers = create_handlers(&config.handlers)?;
    info!("Loaded {} handlers", handlers.len());

    let mut receiver = StateReceiver::new(store, bus, handlers, &config.reader_name);

    if cli.delete_data {
        receiver.delete_data().await?;
    }

    let start_block = receiver
        .init(&rpc, cli.start_block.or(config.start_block))
        .await
        .context("initializing handlers")?;

    let reader = ShipReader::new(
        &config.ship_endpoint,
        ReaderOptions {
            start_block,
            stop_block: config.stop_block,
            blocks_per_ack: config.blocks_per_ack,
            deserializer_workers: config.deserializer_workers,
            queue_size: config.block_queue_size,
        },
    );
    let (events, reader_handle) = reader.start();

    // one shutdown signal for the whole pipeline
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_task("signal-handler", async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            let _ = shutdown_tx.send(true);
        }
    });

    let result = receiver.run(events, shutdown_rx).await;

    // dropping the event queue unblocks the reader, then reap it
    reader_handle.abort();

    match result {
        Ok(()) => {
            println!(
                "Clean shutdown, last committed block: {}",
                receiver
                    .last_committed()
                    .map(|b| b.to_string())
                    .unwrap_or_else(|| "none".to_string())
            );
            Ok(())
        }
        Err(e) => {
            error!("Filler halted: {}", e);
            Err(e.into())
        }
    }
}
