use std::sync::Arc;

use anyhow::Result;
use payments_pipeline::config::AppConfig;
use payments_pipeline::events::consumer::run_consumer;
use payments_pipeline::events::envelope::{FraudEvent, PaymentEvent};
use payments_pipeline::events::log::{build_consumer, build_producer, KafkaPublisher};
use payments_pipeline::processors::DefaultProcessors;
use payments_pipeline::repo::memory::MemoryStore;
use payments_pipeline::repo::postgres::PgStore;
use payments_pipeline::repo::Store;
use payments_pipeline::service::orchestrator::PaymentOrchestrator;
use payments_pipeline::{shutdown, GROUP_PAYMENT_ENGINE};
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

    let group = cfg.kafka.group_or(GROUP_PAYMENT_ENGINE);
    let consumer = build_consumer(
        &cfg.kafka,
        &group,
        &[&cfg.kafka.payments_topic, &cfg.kafka.fraud_topic],
    )?;

    let orchestrator = PaymentOrchestrator::new(
        store,
        publisher,
        Arc::new(DefaultProcessors),
        cfg.kafka.payments_topic.clone(),
    );

    let cancel = shutdown::shutdown_signal()?;
    tracing::info!(group = %group, topic = %cfg.kafka.payments_topic, "payment orchestrator started");

    let fraud_topic = cfg.kafka.fraud_topic.clone();
    run_consumer(&consumer, cancel, |topic, payload| {
        let orchestrator = &orchestrator;
        let fraud_topic = fraud_topic.clone();
        async move {
            if topic == fraud_topic {
                match serde_json::from_slice::<FraudEvent>(&payload) {
                    Ok(event) => orchestrator.handle_fraud_event(&event).await,
                    Err(err) => {
                        tracing::error!(error = %err, "malformed fraud event, skipping");
                        Ok(())
                    }
                }
            } else {
                match serde_json::from_slice::<PaymentEvent>(&payload) {
                    Ok(event) => orchestrator.handle_payment_event(&event).await,
                    Err(err) => {
                        tracing::error!(error = %err, "malformed payment event, skipping");
                        Ok(())
                    }
                }
            }
        }
    })
    .await?;

    tracing::info!("payment orchestrator draining");
    let _ = producer.flush(std::time::Duration::from_secs(cfg.shutdown_timeout_secs));
    if let Some(pool) = pool {
        pool.close().await;
    }
    tracing::info!("payment orchestrator shut down");
    Ok(())
}
