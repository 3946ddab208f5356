use async_trait::async_trait;
use common_batching::FlushError;

use crate::entry::EventEntry;

pub mod buffered;
pub mod log;

pub use buffered::BufferedSink;
pub use log::LogSink;

/// Downstream target of an ingestion worker.
///
/// `send_entry` is called synchronously from the worker's pump thread and
/// must not block on I/O. An error drops that one entry.
#[async_trait]
pub trait EntrySink: Send + Sync {
    fn send_entry(&self, entry: EventEntry) -> anyhow::Result<()>;

    async fn flush(&self) -> Result<(), FlushError> {
        Ok(())
    }

    async fn close(&self) {}
}
