use std::sync::Arc;

use anyhow::Result;
use payments_pipeline::config::AppConfig;
use payments_pipeline::events::consumer::run_consumer;
use payments_pipeline::events::envelope::PaymentEvent;
use payments_pipeline::events::log::{build_consumer, build_producer, KafkaPublisher};
use payments_pipeline::repo::memory::MemoryStore;
use payments_pipeline::repo::postgres::PgStore;
use payments_pipeline::repo::Store;
use payments_pipeline::service::bank_transfer::StubBankAdapter;
use payments_pipeline::service::settlement_batcher::SettlementBatcher;
use payments_pipeline::{shutdown, GROUP_SETTLEMENT_ENGINE};
use rdkafka::producer::Producer;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;

    let mut pool = None;
    let store: Arc<dyn Store> = if cfg.mock_mode {
        tracing::warn!("MOCK_MODE enabled, using in-memory store");
        Arc::new(MemoryStore::new(
            cfg.settlement.default_fee_percent,
            cfg.settlement.minimum_amount,
        ))
    } else {
        let pg = PgPoolOptions::new()
            .max_connections(10)
            .connect(&cfg.database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pg).await?;
        pool = Some(pg.clone());
        Arc::new(PgStore {
            pool: pg,
            default_fee_percent: cfg.settlement.default_fee_percent,
            default_minimum_amount: cfg.settlement.minimum_amount,
        })
    };

    let producer = build_producer(&cfg.kafka)?;
    let publisher = Arc::new(KafkaPublisher { producer: producer.clone() });

    let group = cfg.kafka.group_or(GROUP_SETTLEMENT_ENGINE);
    let consumer = build_consumer(&cfg.kafka, &group, &[&cfg.kafka.payments_topic])?;

    let batcher = Arc::new(SettlementBatcher::new(
        store,
        publisher,
        Arc::new(StubBankAdapter),
        cfg.kafka.settlement_topic.clone(),
        cfg.settlement.default_fee_percent,
    ));

    let cancel = shutdown::shutdown_signal()?;
    tracing::info!(group = %group, interval_hours = cfg.settlement.cycle_interval_hours,
        "settlement batcher started");

    let tick_batcher = batcher.clone();
    let mut tick_cancel = cancel.clone();
    let interval_hours = cfg.settlement.cycle_interval_hours;
    let ticker = tokio::spawn(async move {
        let window = chrono::Duration::hours(interval_hours as i64);
        let sleep = std::time::Duration::from_secs(interval_hours * 3600);
        // First batch runs immediately on startup.
        loop {
            tick_batcher.run_tick(window).await;
            tokio::select! {
                _ = tick_cancel.changed() => break,
                _ = tokio::time::sleep(sleep) => {}
            }
        }
    });

    let consume_batcher = batcher.clone();
    run_consumer(&consumer, cancel, |_topic, payload| {
        let batcher = consume_batcher.clone();
        async move {
            match serde_json::from_slice::<PaymentEvent>(&payload) {
                Ok(event) => batcher.handle_payment_event(&event).await,
                Err(err) => {
                    tracing::error!(error = %err, "malformed payment event, skipping");
                    Ok(())
                }
            }
        }
    })
    .await?;

    tracing::info!("settlement batcher draining");
    let drain = std::time::Duration::from_secs(cfg.shutdown_timeout_secs);
    if tokio::time::timeout(drain, ticker).await.is_err() {
        tracing::warn!("settlement tick did not finish within shutdown timeout");
    }
    let _ = producer.flush(drain);
    if let Some(pool) = pool {
        pool.close().await;
    }
    tracing::info!("settlement batcher shut down");
    Ok(())
}
