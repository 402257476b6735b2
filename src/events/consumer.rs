use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use tokio::sync::watch;

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_BACKOFF_FLOOR: Duration = Duration::from_millis(250);
const RETRY_BACKOFF_CEILING: Duration = Duration::from_secs(30);

// Serial consume loop: one message in flight at a time, which is what keeps
// per-partition ordering. Offsets commit only after the handler succeeds;
// transient handler errors retry in place with capped exponential backoff so
// the partition stays blocked instead of skipping ahead.
pub async fn run_consumer<F, Fut>(
    consumer: &StreamConsumer,
    mut cancel: watch::Receiver<bool>,
    mut handle: F,
) -> Result<()>
where
    F: FnMut(String, Vec<u8>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut stream = consumer.stream();

    loop {
        if *cancel.borrow() {
            break;
        }

        let next = tokio::select! {
            _ = cancel.changed() => break,
            next = tokio::time::timeout(READ_TIMEOUT, stream.next()) => next,
        };

        // A read timeout just resets the loop.
        let Ok(next) = next else { continue };
        let Some(result) = next else { break };

        let message = match result {
            Ok(message) => message,
            Err(err) => {
                tracing::error!(error = %err, "event log read error");
                continue;
            }
        };

        let topic = message.topic().to_string();
        let payload = message.payload().unwrap_or_default().to_vec();
        let mut backoff = RETRY_BACKOFF_FLOOR;

        loop {
            match handle(topic.clone(), payload.clone()).await {
                Ok(()) => {
                    if let Err(err) = consumer.commit_message(&message, CommitMode::Async) {
                        tracing::error!(error = %err, topic = %topic, "failed to commit offset");
                    }
                    break;
                }
                Err(err) => {
                    tracing::warn!(error = %err, topic = %topic, backoff_ms = backoff.as_millis() as u64,
                        "transient failure, retrying message");
                    tokio::select! {
                        _ = cancel.changed() => return Ok(()),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(RETRY_BACKOFF_CEILING);
                }
            }
        }
    }

    Ok(())
}
