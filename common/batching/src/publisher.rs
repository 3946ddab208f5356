use std::future::IntoFuture;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant as StdInstant};

use futures::future::BoxFuture;
use metrics::{counter, histogram};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::builder::{PublisherBuilder, Settings};
use crate::error::FlushError;
use crate::metrics_consts::{
    BATCHES_FAILED, BATCH_SIZE, ITEMS_ABANDONED, ITEMS_DROPPED, ITEMS_POSTED, ITEMS_PUBLISHED,
    ITEMS_UNACKNOWLEDGED, PUBLISH_TIME,
};
use crate::publish::Publish;

type FlushOutcome = Option<Result<(), FlushError>>;

/// Accumulates items posted by any number of producers and hands them to a
/// [`Publish`] implementation in batches, on a background tokio task.
///
/// Posting never blocks: once `max_buffer_size` items are waiting, new items
/// are dropped and counted. At most one publish call is in flight at a time,
/// and batches are published in post order.
pub struct BufferedPublisher<T> {
    name: String,
    items: mpsc::Sender<T>,
    flushes: mpsc::UnboundedSender<FlushRequest>,
    state: Mutex<PostState>,
    dropped: AtomicU64,
    dropping: AtomicBool,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    // Closed by the background loop when it exits
    stopped: watch::Receiver<()>,
}

struct PostState {
    posted: u64,
    pending_flush: Option<PendingFlush>,
}

struct PendingFlush {
    target: u64,
    handle: FlushHandle,
}

struct FlushRequest {
    target: u64,
    done: watch::Sender<FlushOutcome>,
}

/// Completion handle returned by [`BufferedPublisher::flush`]. Await it
/// directly or through [`FlushHandle::wait`].
#[derive(Clone)]
pub struct FlushHandle {
    outcome: Arc<watch::Receiver<FlushOutcome>>,
}

impl FlushHandle {
    pub async fn wait(self) -> Result<(), FlushError> {
        let mut outcome = watch::Receiver::clone(&self.outcome);
        let resolved = match outcome.wait_for(Option::is_some).await {
            Ok(value) => *value,
            Err(_) => None,
        };
        resolved.unwrap_or(Err(FlushError::Closed))
    }

    /// Whether both handles complete with the same flush.
    pub fn shares_flush_with(&self, other: &FlushHandle) -> bool {
        Arc::ptr_eq(&self.outcome, &other.outcome)
    }

    fn is_resolved(&self) -> bool {
        self.outcome.borrow().is_some()
    }
}

impl IntoFuture for FlushHandle {
    type Output = Result<(), FlushError>;
    type IntoFuture = BoxFuture<'static, Result<(), FlushError>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl<T: Send + 'static> BufferedPublisher<T> {
    pub fn builder() -> PublisherBuilder<T> {
        PublisherBuilder::new()
    }

    pub(crate) fn start(settings: Settings<T>) -> Self {
        let (items_tx, items_rx) = mpsc::channel(settings.max_buffer_size);
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let (stopped_tx, stopped_rx) = watch::channel(());

        let dispatcher = Dispatcher {
            name: settings.name.clone(),
            publisher: settings.publisher,
            items: items_rx,
            flushes: flush_rx,
            count: settings.count,
            period: settings.period,
            cancel: settings.cancel.clone(),
            batch: Vec::new(),
            received: 0,
            in_flight: None,
            failure_unreported: false,
            _stopped: stopped_tx,
        };
        let task = tokio::spawn(dispatcher.run());

        info!(
            publisher = %settings.name,
            count = settings.count,
            interval_ms = settings.period.map(|p| p.as_millis() as u64),
            max_buffer_size = settings.max_buffer_size,
            "buffered publisher started"
        );

        Self {
            name: settings.name,
            items: items_tx,
            flushes: flush_tx,
            state: Mutex::new(PostState {
                posted: 0,
                pending_flush: None,
            }),
            dropped: AtomicU64::new(0),
            dropping: AtomicBool::new(false),
            cancel: settings.cancel,
            task: Mutex::new(Some(task)),
            stopped: stopped_rx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues an item without blocking. Returns false when the item was
    /// dropped because the buffer is full or the publisher is closed.
    pub fn try_post(&self, item: T) -> bool {
        let mut state = self.lock_state();
        match self.items.try_send(item) {
            Ok(()) => {
                state.posted += 1;
                drop(state);
                counter!(ITEMS_POSTED, "publisher" => self.name.clone()).increment(1);
                if self.dropping.swap(false, Ordering::Relaxed) {
                    info!(
                        publisher = %self.name,
                        dropped_total = self.dropped_count(),
                        "buffer has room again, accepting items"
                    );
                }
                true
            }
            Err(TrySendError::Full(_)) => {
                drop(state);
                self.record_drop("buffer full");
                false
            }
            Err(TrySendError::Closed(_)) => {
                drop(state);
                self.record_drop("publisher closed");
                false
            }
        }
    }

    /// Requests that everything posted so far is dispatched. The returned
    /// handle resolves once the publish attempt carrying the last of those
    /// items has finished, successfully or not.
    ///
    /// While a flush is pending and nothing new has been posted, callers
    /// share its handle rather than forcing another publish.
    pub fn flush(&self) -> FlushHandle {
        let mut state = self.lock_state();
        if let Some(pending) = &state.pending_flush {
            if pending.target == state.posted && !pending.handle.is_resolved() {
                return pending.handle.clone();
            }
        }

        let (done, outcome) = watch::channel(None);
        let handle = FlushHandle {
            outcome: Arc::new(outcome),
        };
        let target = state.posted;
        if self.flushes.send(FlushRequest { target, done }).is_err() {
            debug!(publisher = %self.name, "flush requested after the publisher stopped");
        }
        state.pending_flush = Some(PendingFlush {
            target,
            handle: handle.clone(),
        });

        handle
    }

    /// Stops the background loop and waits for it to exit. An in-flight
    /// publish is allowed to finish; items not yet dispatched are dropped.
    pub async fn close(&self) {
        self.cancel.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(task) = task {
            if let Err(err) = task.await {
                error!(publisher = %self.name, "publisher loop did not exit cleanly: {err}");
            }
        }

        // Concurrent callers that did not get the task handle wait here.
        let mut stopped = self.stopped.clone();
        while stopped.changed().await.is_ok() {}
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.items.is_closed()
    }

    /// Items rejected by [`BufferedPublisher::try_post`] since construction.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn lock_state(&self) -> MutexGuard<'_, PostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_drop(&self, reason: &'static str) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        counter!(ITEMS_DROPPED, "publisher" => self.name.clone(), "reason" => reason)
            .increment(1);
        if !self.dropping.swap(true, Ordering::Relaxed) {
            warn!(
                publisher = %self.name,
                reason,
                dropped_total = dropped,
                "dropping posted items"
            );
        }
    }
}

impl<T> Drop for BufferedPublisher<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct InFlight {
    task: JoinHandle<bool>,
    waiters: Vec<watch::Sender<FlushOutcome>>,
}

/// State owned by the background loop.
struct Dispatcher<T> {
    name: String,
    publisher: Arc<dyn Publish<T>>,
    items: mpsc::Receiver<T>,
    flushes: mpsc::UnboundedReceiver<FlushRequest>,
    count: usize,
    period: Option<Duration>,
    cancel: CancellationToken,
    batch: Vec<T>,
    received: u64,
    in_flight: Option<InFlight>,
    // Set by a failed attempt, cleared by the first flush resolved after it.
    failure_unreported: bool,
    _stopped: watch::Sender<()>,
}

impl<T: Send + 'static> Dispatcher<T> {
    async fn run(mut self) {
        let timer = sleep(self.period.unwrap_or(Duration::MAX));
        tokio::pin!(timer);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                succeeded = join_in_flight(&mut self.in_flight) => {
                    if let Some(finished) = self.in_flight.take() {
                        self.resolve(finished.waiters, succeeded);
                    }
                }

                Some(request) = self.flushes.recv() => {
                    self.flush(request).await;
                    self.reset_timer(timer.as_mut());
                }

                item = self.items.recv() => match item {
                    Some(item) => {
                        if self.accept(item) {
                            self.dispatch(None).await;
                            self.reset_timer(timer.as_mut());
                        }
                    }
                    None => break,
                },

                _ = &mut timer, if self.period.is_some() => {
                    if !self.batch.is_empty() {
                        self.dispatch(None).await;
                    }
                    self.reset_timer(timer.as_mut());
                }
            }
        }

        self.shutdown().await;
    }

    /// Adds an item to the current batch. Returns true if the count trigger
    /// fired.
    fn accept(&mut self, item: T) -> bool {
        self.received += 1;
        self.batch.push(item);
        self.count > 0 && self.batch.len() >= self.count
    }

    async fn flush(&mut self, request: FlushRequest) {
        // Everything posted before the request is already in the channel.
        while self.received < request.target {
            match self.items.recv().await {
                Some(item) => {
                    if self.accept(item) {
                        self.dispatch(None).await;
                    }
                }
                None => break,
            }
        }

        if !self.batch.is_empty() {
            self.dispatch(Some(request.done)).await;
        } else if let Some(in_flight) = self.in_flight.as_mut() {
            in_flight.waiters.push(request.done);
        } else {
            self.resolve(vec![request.done], true);
        }
    }

    async fn dispatch(&mut self, waiter: Option<watch::Sender<FlushOutcome>>) {
        if let Some(previous) = self.in_flight.take() {
            let succeeded = join_publish(&self.name, previous.task).await;
            self.resolve(previous.waiters, succeeded);
        }

        let batch = std::mem::take(&mut self.batch);
        let task = tokio::spawn(publish_batch(
            self.name.clone(),
            self.publisher.clone(),
            batch,
        ));

        self.in_flight = Some(InFlight {
            task,
            waiters: waiter.into_iter().collect(),
        });
    }

    fn resolve(&mut self, waiters: Vec<watch::Sender<FlushOutcome>>, succeeded: bool) {
        if !succeeded {
            self.failure_unreported = true;
        }
        if waiters.is_empty() {
            return;
        }

        let outcome = if self.failure_unreported {
            Err(FlushError::PublishFailed)
        } else {
            Ok(())
        };
        self.failure_unreported = false;

        for waiter in waiters {
            // A waiter whose handle was dropped has nobody left to tell.
            waiter.send(Some(outcome)).ok();
        }
    }

    fn reset_timer(&self, timer: std::pin::Pin<&mut tokio::time::Sleep>) {
        if let Some(period) = self.period {
            timer.reset(Instant::now() + period);
        }
    }

    async fn shutdown(mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            let succeeded = join_publish(&self.name, in_flight.task).await;
            self.resolve(in_flight.waiters, succeeded);
        }

        // Pending flush requests resolve as closed once their senders drop.
        self.flushes.close();
        while self.flushes.try_recv().is_ok() {}

        self.items.close();
        let mut abandoned = self.batch.len();
        while self.items.try_recv().is_ok() {
            abandoned += 1;
        }

        if abandoned > 0 {
            warn!(
                publisher = %self.name,
                abandoned,
                "publisher closed with undispatched items"
            );
            counter!(ITEMS_ABANDONED, "publisher" => self.name.clone())
                .increment(abandoned as u64);
        }
        info!(publisher = %self.name, "buffered publisher stopped");
    }
}

/// Resolves when the in-flight publish finishes, never if there is none.
async fn join_in_flight(in_flight: &mut Option<InFlight>) -> bool {
    match in_flight {
        Some(in_flight) => match (&mut in_flight.task).await {
            Ok(succeeded) => succeeded,
            Err(err) => {
                error!("publish task panicked: {err}");
                false
            }
        },
        None => std::future::pending().await,
    }
}

async fn join_publish(name: &str, task: JoinHandle<bool>) -> bool {
    match task.await {
        Ok(succeeded) => succeeded,
        Err(err) => {
            error!(publisher = %name, "publish task panicked: {err}");
            false
        }
    }
}

async fn publish_batch<T>(name: String, publisher: Arc<dyn Publish<T>>, batch: Vec<T>) -> bool {
    let size = batch.len();
    histogram!(BATCH_SIZE, "publisher" => name.clone()).record(size as f64);

    let started = StdInstant::now();
    let result = publisher.publish(batch).await;
    histogram!(PUBLISH_TIME, "publisher" => name.clone())
        .record(started.elapsed().as_millis() as f64);

    match result {
        Ok(accepted) => {
            if accepted < size {
                warn!(
                    publisher = %name,
                    batch_size = size,
                    accepted,
                    "sink accepted only part of the batch, the rest is not retried"
                );
                counter!(ITEMS_UNACKNOWLEDGED, "publisher" => name.clone())
                    .increment((size - accepted) as u64);
            }
            counter!(ITEMS_PUBLISHED, "publisher" => name).increment(accepted.min(size) as u64);
            true
        }
        Err(err) => {
            error!(publisher = %name, batch_size = size, "failed to publish batch: {err:#}");
            counter!(BATCHES_FAILED, "publisher" => name).increment(1);
            false
        }
    }
}
