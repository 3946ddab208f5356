//! Collects events from operating-system trace sessions, resolves their
//! schemas and delivers them to batching sinks.
//!
//! Each sink gets its own [`IngestionWorker`], which pumps one
//! [`TraceSession`] on a dedicated thread. The [`Collector`] wires workers,
//! the shared [`SchemaCache`] and the on-disk [`ManifestStore`] together.

pub mod collector;
pub mod config;
mod decode;
pub mod entry;
pub mod level;
pub mod manifest;
pub mod metrics_consts;
pub mod providers;
pub mod schema;
pub mod session;
pub mod sinks;
pub mod stats;
pub mod worker;

pub use collector::Collector;
pub use config::Config;
pub use decode::LossReason;
pub use entry::EventEntry;
pub use level::TraceLevel;
pub use manifest::ManifestStore;
pub use providers::ProviderChanges;
pub use schema::{EventSchema, SchemaCache};
pub use session::{
    ProviderRegistration, RawRecord, RecordMetadata, SessionError, SessionFactory,
    SessionMessage, TraceSession,
};
pub use sinks::EntrySink;
pub use stats::IngestionStats;
pub use worker::{IngestionWorker, WorkerError, WorkerState};
