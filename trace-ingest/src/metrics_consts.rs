pub const EVENTS_DELIVERED: &str = "trace_ingest_events_delivered";
pub const EVENTS_LOST: &str = "trace_ingest_events_lost";
pub const EVENTS_UNMONITORED: &str = "trace_ingest_events_unmonitored";
pub const SINK_FAILURES: &str = "trace_ingest_sink_failures";
pub const WORKER_FAULTS: &str = "trace_ingest_worker_faults";
pub const MANIFESTS_APPLIED: &str = "trace_ingest_manifests_applied";
pub const MANIFESTS_REJECTED: &str = "trace_ingest_manifests_rejected";
pub const MANIFESTS_PRELOADED: &str = "trace_ingest_manifests_preloaded";
pub const MANIFEST_PERSIST_FAILURES: &str = "trace_ingest_manifest_persist_failures";
pub const PROVIDER_UPDATES: &str = "trace_ingest_provider_updates";
pub const PROVIDER_UPDATE_FAILURES: &str = "trace_ingest_provider_update_failures";
pub const LOG_SINK_EVENTS: &str = "trace_ingest_log_sink_events";
pub const LOG_SINK_BATCH_SIZE: &str = "trace_ingest_log_sink_batch_size";
