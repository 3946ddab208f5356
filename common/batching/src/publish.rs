use std::future::Future;

use async_trait::async_trait;

/// Destination for the batches assembled by a [`crate::BufferedPublisher`].
///
/// Returns how many items of the batch were durably accepted. A short count
/// is logged and counted, but the batch is still treated as consumed: items
/// are never handed to `publish` twice.
#[async_trait]
pub trait Publish<T>: Send + Sync {
    async fn publish(&self, batch: Vec<T>) -> anyhow::Result<usize>;
}

/// Adapts an async closure into a [`Publish`] implementation.
pub struct PublishFn<F>(F);

pub fn publish_fn<T, F, Fut>(f: F) -> PublishFn<F>
where
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = anyhow::Result<usize>>,
{
    PublishFn(f)
}

#[async_trait]
impl<T, F, Fut> Publish<T> for PublishFn<F>
where
    T: Send + 'static,
    F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<usize>> + Send + 'static,
{
    async fn publish(&self, batch: Vec<T>) -> anyhow::Result<usize> {
        (self.0)(batch).await
    }
}
