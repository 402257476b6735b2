use std::sync::Arc;

use anyhow::Result;
use payments_pipeline::config::AppConfig;
use payments_pipeline::events::consumer::run_consumer;
use payments_pipeline::events::envelope::PaymentEvent;
use payments_pipeline::events::log::{build_consumer, build_producer, KafkaPublisher};
use payments_pipeline::service::fraud_screener::{FraudAnalyzer, FraudScreener, SlidingVelocity};
use payments_pipeline::{shutdown, GROUP_FRAUD_DETECTION};
use rdkafka::producer::Producer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;

    let producer = build_producer(&cfg.kafka)?;
    let publisher = Arc::new(KafkaPublisher { producer: producer.clone() });

    let group = cfg.kafka.group_or(GROUP_FRAUD_DETECTION);
    let consumer = build_consumer(&cfg.kafka, &group, &[&cfg.kafka.payments_topic])?;

    let screener = FraudScreener {
        analyzer: FraudAnalyzer {
            threshold: cfg.fraud.threshold,
            high_risk_regions: cfg.fraud.high_risk_regions.clone(),
            velocity: Arc::new(SlidingVelocity::new()),
        },
        publisher,
        fraud_topic: cfg.kafka.fraud_topic.clone(),
    };

    let cancel = shutdown::shutdown_signal()?;
    tracing::info!(group = %group, threshold = cfg.fraud.threshold, "fraud screener started");

    run_consumer(&consumer, cancel, |_topic, payload| {
        let screener = &screener;
        async move {
            match serde_json::from_slice::<PaymentEvent>(&payload) {
                Ok(event) => screener.handle_payment_event(&event).await.map(|_| ()),
                Err(err) => {
                    tracing::error!(error = %err, "malformed payment event, skipping");
                    Ok(())
                }
            }
        }
    })
    .await?;

    tracing::info!("fraud screener draining");
    let _ = producer.flush(std::time::Duration::from_secs(cfg.shutdown_timeout_secs));
    tracing::info!("fraud screener shut down");
    Ok(())
}
