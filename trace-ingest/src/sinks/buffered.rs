use anyhow::anyhow;
use async_trait::async_trait;
use common_batching::{BufferedPublisher, FlushError, Publish, PublisherConfigError};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::entry::EventEntry;
use crate::sinks::EntrySink;

/// Sink that batches entries through a [`BufferedPublisher`] before handing
/// them to an asynchronous [`Publish`] target.
pub struct BufferedSink {
    publisher: BufferedPublisher<EventEntry>,
}

impl BufferedSink {
    pub fn new(publisher: BufferedPublisher<EventEntry>) -> Self {
        Self { publisher }
    }

    /// Builds the publisher from the buffering settings in `config`.
    pub fn from_config<P>(
        name: &str,
        config: &Config,
        target: P,
        cancel: &CancellationToken,
    ) -> Result<Self, PublisherConfigError>
    where
        P: Publish<EventEntry> + 'static,
    {
        let publisher = BufferedPublisher::builder()
            .name(name)
            .publisher(target)
            .interval(config.buffering_interval)
            .count(config.buffering_count)
            .max_buffer_size(config.max_buffer_size)
            .cancellation(cancel.clone())
            .build()?;

        Ok(Self::new(publisher))
    }

    pub fn publisher(&self) -> &BufferedPublisher<EventEntry> {
        &self.publisher
    }
}

#[async_trait]
impl EntrySink for BufferedSink {
    fn send_entry(&self, entry: EventEntry) -> anyhow::Result<()> {
        if self.publisher.try_post(entry) {
            Ok(())
        } else {
            Err(anyhow!(
                "buffer of sink {} is full, entry dropped",
                self.publisher.name()
            ))
        }
    }

    async fn flush(&self) -> Result<(), FlushError> {
        self.publisher.flush().await
    }

    async fn close(&self) {
        self.publisher.close().await
    }
}
