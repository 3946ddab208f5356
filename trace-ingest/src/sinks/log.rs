use async_trait::async_trait;
use common_batching::{Publish, PublisherConfigError};
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::entry::EventEntry;
use crate::metrics_consts::{LOG_SINK_BATCH_SIZE, LOG_SINK_EVENTS};
use crate::sinks::BufferedSink;

/// Writes every entry through `tracing`. Useful as a first sink and in
/// development.
pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn build(
        name: &str,
        config: &Config,
        cancel: &CancellationToken,
    ) -> Result<BufferedSink, PublisherConfigError> {
        let target = LogSink {
            name: name.to_owned(),
        };
        BufferedSink::from_config(name, config, target, cancel)
    }
}

#[async_trait]
impl Publish<EventEntry> for LogSink {
    async fn publish(&self, batch: Vec<EventEntry>) -> anyhow::Result<usize> {
        let span = tracing::span!(tracing::Level::INFO, "batch of events", sink = %self.name);
        let _enter = span.enter();

        histogram!(LOG_SINK_BATCH_SIZE).record(batch.len() as f64);
        counter!(LOG_SINK_EVENTS).increment(batch.len() as u64);
        for entry in &batch {
            info!(
                provider = entry.provider(),
                event_id = entry.event_id(),
                event_name = %entry.schema().event_name,
                timestamp = %entry.timestamp(),
                process_id = entry.process_id(),
                thread_id = entry.thread_id(),
                message = entry.message().unwrap_or_default(),
                "event: {:?}",
                entry.payload()
            );
        }

        Ok(batch.len())
    }
}
