//! Count- and interval-triggered batching in front of slow or unreliable sinks.
//!
//! Producers call [`BufferedPublisher::try_post`], which never blocks. A
//! background task groups the items into batches and hands each batch to a
//! [`Publish`] implementation, one attempt at a time and in post order.
//! Delivery is at-most-once: a failed or partially accepted batch is logged
//! and counted, never retried.

mod builder;
mod error;
pub mod metrics_consts;
mod publish;
mod publisher;

pub use builder::{
    BufferingInterval, ParseBufferingIntervalError, PublisherBuilder, DEFAULT_MAX_BUFFER_SIZE,
    MAX_BUFFER_LIMIT, MAX_INTERVAL,
};
pub use error::{FlushError, PublisherConfigError};
pub use publish::{publish_fn, Publish, PublishFn};
pub use publisher::{BufferedPublisher, FlushHandle};
