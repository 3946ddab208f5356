use std::time::Duration;

use thiserror::Error;

/// Rejections returned by [`crate::PublisherBuilder::build`]. Each invalid
/// parameter maps to exactly one variant so callers can fail fast on startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublisherConfigError {
    /// The publisher has no name, or the name is blank
    #[error("buffered publisher requires a non-empty name")]
    MissingName,
    /// No publish function was supplied
    #[error("buffered publisher {0} has no publish function")]
    MissingPublisher(String),
    /// The timer period cannot be represented by the scheduler
    #[error("buffering interval {interval:?} is above the maximum of {max:?}")]
    IntervalOutOfRange { interval: Duration, max: Duration },
    #[error("buffering count cannot be negative, got {0}")]
    NegativeCount(i64),
    /// Neither a timer nor a count would ever dispatch a batch
    #[error("at least one of buffering interval or buffering count must be enabled")]
    NoTrigger,
    #[error("max buffer size {max_buffer_size} is below the required {required}")]
    BufferTooSmall {
        max_buffer_size: usize,
        required: usize,
    },
    #[error("max buffer size {max_buffer_size} is above the limit of {limit}")]
    BufferTooLarge { max_buffer_size: usize, limit: usize },
}

/// Outcome of a flush that did not end in a successful delivery.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushError {
    /// Every item was handed to a publish attempt, but an attempt failed
    #[error("items were dispatched but the publish attempt failed")]
    PublishFailed,
    /// The publisher stopped before the flush could be honoured
    #[error("publisher closed before the flush completed")]
    Closed,
}
