//! Courier pipeline over the in-memory broker.
//!
//! Produces a stream of transactions (every seventh one malformed), consumes
//! them on three partition workers and dead-letters the malformed ones.
//!
//! ```bash
//! COURIER_LOG_LEVEL=debug cargo run -p courier-runtime --example memory_pipeline
//! ```

use courier_runtime::prelude::*;
use std::time::Duration;

/// Accepts JSON objects with a numeric `amount`
struct LedgerWriter;

#[async_trait::async_trait]
impl RecordProcessor for LedgerWriter {
    fn name(&self) -> &'static str {
        "ledger-writer"
    }

    async fn process(&self, record: &Record) -> Result<(), ProcessingError> {
        let value: serde_json::Value = serde_json::from_slice(&record.payload)
            .map_err(|e| ProcessingError::new(format!("invalid json: {e}")))?;
        match value.get("amount").and_then(serde_json::Value::as_i64) {
            Some(amount) => {
                tracing::info!(key = %record.key, amount, offset = record.offset, "posted");
                Ok(())
            }
            None => Err(ProcessingError::new("missing amount")),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config {
        base_backoff: Duration::from_millis(200),
        consumer_backoff: Duration::from_millis(200),
        ..Config::from_env()?
    };
    let topic = config.topic.clone();
    let broker = MemoryBroker::new(3);

    RuntimeBuilder::new()
        .config(config)
        .producer(|delivery, mut shutdown| async move {
            for i in 0..50u32 {
                if *shutdown.borrow() {
                    break;
                }
                let payload = if i % 7 == 6 {
                    Bytes::from_static(b"not json")
                } else {
                    Bytes::from(format!(r#"{{"amount":{}}}"#, i * 10))
                };
                let outcome = delivery
                    .send(Message::new(format!("CUST-{}", i % 5), payload))
                    .await;
                if !outcome.is_produced() {
                    tracing::warn!(?outcome, "delivery did not reach the topic");
                }
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                }
            }
            tracing::info!(metrics = ?delivery.metrics(), "producer finished");
            Ok(())
        })
        .configure(move |pipeline| async move {
            let mut pipeline = pipeline
                .publisher(broker.clone())
                .processor(LedgerWriter)
                .committer(Arc::new(MemoryOffsetStore::new()));
            for p in 0..3 {
                pipeline = pipeline.source(topic.clone(), p, broker.source(&topic, p, 0));
            }
            Ok(pipeline)
        })
        .await
}
