pub const ITEMS_POSTED: &str = "batching_items_posted";
pub const ITEMS_DROPPED: &str = "batching_items_dropped";
pub const ITEMS_PUBLISHED: &str = "batching_items_published";
pub const ITEMS_UNACKNOWLEDGED: &str = "batching_items_unacknowledged";
pub const ITEMS_ABANDONED: &str = "batching_items_abandoned_on_close";
pub const BATCHES_FAILED: &str = "batching_batches_failed";
pub const BATCH_SIZE: &str = "batching_batch_size";
pub const PUBLISH_TIME: &str = "batching_publish_time_ms";
