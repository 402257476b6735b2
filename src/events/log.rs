use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;

use crate::config::KafkaConfig;

pub fn build_producer(cfg: &KafkaConfig) -> Result<FutureProducer> {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", &cfg.brokers);
    config.set("message.timeout.ms", "5000");
    config.set("acks", "all");
    config.set("enable.idempotence", "true");
    config.create().context("failed to create kafka producer")
}

pub fn build_consumer(cfg: &KafkaConfig, group_id: &str, topics: &[&str]) -> Result<StreamConsumer> {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", &cfg.brokers);
    config.set("group.id", group_id);
    config.set("enable.auto.commit", "false");
    config.set("auto.offset.reset", "earliest");

    let consumer: StreamConsumer = config.create().context("failed to create kafka consumer")?;
    consumer
        .subscribe(topics)
        .with_context(|| format!("failed to subscribe to {:?}", topics))?;
    Ok(consumer)
}

#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()>;
}

pub struct KafkaPublisher {
    pub producer: FutureProducer,
}

#[async_trait::async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()> {
        let record = FutureRecord::to(topic).key(key).payload(&payload);
        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("failed to publish to {}: {}", topic, e))?;
        tracing::debug!(topic, key, "published event");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CapturedMessage {
    pub topic: String,
    pub key: String,
    pub payload: serde_json::Value,
}

// In-memory publisher used by tests and mock mode.
#[derive(Default)]
pub struct MemoryPublisher {
    messages: Mutex<Vec<CapturedMessage>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<CapturedMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn messages_for_topic(&self, topic: &str) -> Vec<CapturedMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub fn event_types(&self, topic: &str) -> Vec<String> {
        self.messages_for_topic(topic)
            .iter()
            .filter_map(|m| m.payload.get("type").and_then(|t| t.as_str()).map(str::to_string))
            .collect()
    }
}

#[async_trait::async_trait]
impl EventPublisher for MemoryPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()> {
        let payload = serde_json::from_slice(&payload).context("captured payload is not json")?;
        self.messages.lock().unwrap().push(CapturedMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
        });
        Ok(())
    }
}
