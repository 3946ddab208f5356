use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use futures::executor::block_on;
use metrics::counter;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::decode::{LossReason, RecordDecoder};
use crate::manifest::ManifestStore;
use crate::metrics_consts::{
    EVENTS_DELIVERED, EVENTS_UNMONITORED, MANIFESTS_APPLIED, MANIFESTS_PRELOADED,
    MANIFESTS_REJECTED, MANIFEST_PERSIST_FAILURES, PROVIDER_UPDATES, PROVIDER_UPDATE_FAILURES,
    SINK_FAILURES, WORKER_FAULTS,
};
use crate::providers::{provider_set, ProviderChanges, ProviderSet};
use crate::schema::{ProviderManifest, SchemaCache};
use crate::session::{
    ProviderRegistration, RawRecord, SessionError, SessionMessage, TraceSession,
};
use crate::sinks::EntrySink;
use crate::stats::IngestionStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Running,
    /// The pump stopped on its own; the worker delivers nothing until replaced
    Faulted,
    /// The cancellation token fired; the session is closed
    Cancelled,
    Disposed,
}

#[derive(Error, Debug)]
pub enum WorkerError {
    /// The process may not open the trace session
    #[error("access denied opening trace session {session}: {reason}")]
    AccessDenied { session: String, reason: String },
    #[error("trace session {session} failed: {source}")]
    Session {
        session: String,
        #[source]
        source: SessionError,
    },
    #[error("worker {session} cannot {operation} while {state:?}")]
    InvalidState {
        session: String,
        operation: &'static str,
        state: WorkerState,
    },
    #[error("failed to spawn processing thread for {session}: {source}")]
    Spawn {
        session: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug)]
struct Status {
    state: WorkerState,
    fault: Option<String>,
}

type SharedProviders = Arc<RwLock<Arc<ProviderSet>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns one trace session and the OS thread pumping it. Each decodable
/// record becomes an [`crate::EventEntry`] handed synchronously to the sink.
pub struct IngestionWorker<S: TraceSession> {
    name: String,
    session: Arc<S>,
    sink: Arc<dyn EntrySink>,
    schemas: Arc<SchemaCache>,
    manifests: Arc<ManifestStore>,
    providers: SharedProviders,
    update_lock: Mutex<()>,
    status: Arc<Mutex<Status>>,
    stats: Arc<IngestionStats>,
    cancel: CancellationToken,
    pump: Mutex<Option<JoinHandle<()>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl<S: TraceSession> IngestionWorker<S> {
    pub fn new(
        session: S,
        sink: Arc<dyn EntrySink>,
        schemas: Arc<SchemaCache>,
        manifests: Arc<ManifestStore>,
        cancel: &CancellationToken,
    ) -> Self {
        Self {
            name: session.name().to_owned(),
            session: Arc::new(session),
            sink,
            schemas,
            manifests,
            providers: Arc::new(RwLock::new(Arc::new(ProviderSet::new()))),
            update_lock: Mutex::new(()),
            status: Arc::new(Mutex::new(Status {
                state: WorkerState::Created,
                fault: None,
            })),
            stats: Arc::new(IngestionStats::default()),
            cancel: cancel.child_token(),
            pump: Mutex::new(None),
            watcher: Mutex::new(None),
        }
    }

    /// Opens the session, binds `providers` and starts the pump thread.
    pub fn initialize(&self, providers: &[ProviderRegistration]) -> Result<(), WorkerError> {
        // Held until the pump is running, so a pump that fails straight away
        // records its fault against the running state.
        let mut status = lock(&self.status);
        if status.state != WorkerState::Created {
            return Err(self.invalid_state("initialize", status.state));
        }

        if let Err(err) = self.session.open() {
            let err = self.session_error(err);
            status.state = WorkerState::Faulted;
            status.fault = Some(err.to_string());
            return Err(err);
        }

        let desired = provider_set(providers);
        let mut names: Vec<&String> = desired.keys().collect();
        names.sort();
        let mut bound = ProviderSet::new();
        for name in names {
            let provider = &desired[name];
            if self.bind(provider) {
                bound.insert(name.clone(), provider.clone());
            }
        }
        let bound_count = bound.len();
        *self.providers.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(bound);

        let pump = Pump {
            name: self.name.clone(),
            session: self.session.clone(),
            sink: self.sink.clone(),
            schemas: self.schemas.clone(),
            manifests: self.manifests.clone(),
            providers: self.providers.clone(),
            decoder: RecordDecoder::new(
                self.name.clone(),
                self.schemas.clone(),
                self.stats.clone(),
            ),
            status: self.status.clone(),
            cancel: self.cancel.clone(),
            stats: self.stats.clone(),
            persisted: HashSet::new(),
        };
        let spawned = thread::Builder::new()
            .name(format!("trace-pump-{}", self.name))
            .spawn(move || pump.run());

        match spawned {
            Ok(handle) => *lock(&self.pump) = Some(handle),
            Err(source) => {
                self.session.close();
                status.state = WorkerState::Faulted;
                status.fault = Some(format!("failed to spawn processing thread: {source}"));
                return Err(WorkerError::Spawn {
                    session: self.name.clone(),
                    source,
                });
            }
        }

        match self.spawn_watcher() {
            Ok(handle) => *lock(&self.watcher) = Some(handle),
            Err(source) => {
                // Stops the pump without it recording a fault.
                self.cancel.cancel();
                self.session.close();
                status.state = WorkerState::Faulted;
                status.fault = Some(format!("failed to spawn cancellation watcher: {source}"));
                return Err(WorkerError::Spawn {
                    session: self.name.clone(),
                    source,
                });
            }
        }

        status.state = WorkerState::Running;
        drop(status);

        info!(
            session = %self.name,
            providers = bound_count,
            "ingestion worker running"
        );
        Ok(())
    }

    /// Reconciles the bound providers with `providers`, matching them by
    /// name. Unchanged providers cause no session calls.
    pub fn update_session(
        &self,
        providers: &[ProviderRegistration],
    ) -> Result<ProviderChanges, WorkerError> {
        let _update = lock(&self.update_lock);

        let state = self.state();
        if state != WorkerState::Running {
            return Err(self.invalid_state("update providers", state));
        }

        let current = self.bound_providers();
        let mut next = provider_set(providers);
        let changes = ProviderChanges::between(&current, &next);

        for provider in &changes.updated {
            if let Err(err) = self.session.enable_provider(provider) {
                counter!(PROVIDER_UPDATE_FAILURES).increment(1);
                warn!(
                    session = %self.name,
                    provider = %provider.name,
                    "failed to update provider filter, keeping the previous one: {err}"
                );
                if let Some(previous) = current.get(&provider.name) {
                    next.insert(provider.name.clone(), previous.clone());
                }
            }
        }
        for provider in &changes.added {
            if !self.bind(provider) {
                next.remove(&provider.name);
            }
        }
        for name in &changes.removed {
            if let Err(err) = self.session.disable_provider(name) {
                counter!(PROVIDER_UPDATE_FAILURES).increment(1);
                warn!(session = %self.name, provider = %name, "failed to unbind provider: {err}");
            }
        }

        *self.providers.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);

        if !changes.is_empty() {
            counter!(PROVIDER_UPDATES).increment(1);
            info!(
                session = %self.name,
                updated = changes.updated.len(),
                added = changes.added.len(),
                removed = changes.removed.len(),
                "trace session providers updated"
            );
        }
        Ok(changes)
    }

    /// Stops the pump and waits for its thread. Safe to call repeatedly.
    pub fn dispose(&self) {
        {
            let mut status = lock(&self.status);
            if status.state == WorkerState::Disposed {
                return;
            }
            status.state = WorkerState::Disposed;
        }

        self.cancel.cancel();
        // Closing the handle is what unblocks a pump waiting for events.
        self.session.close();

        let threads = [lock(&self.pump).take(), lock(&self.watcher).take()];
        for handle in threads.into_iter().flatten() {
            if handle.thread().id() == thread::current().id() {
                warn!(session = %self.name, "worker disposed from its own thread");
            } else if handle.join().is_err() {
                error!(session = %self.name, "worker thread terminated abnormally");
            }
        }

        info!(session = %self.name, "ingestion worker disposed");
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        lock(&self.status).state
    }

    /// Why the worker faulted, if it did.
    pub fn fault_reason(&self) -> Option<String> {
        lock(&self.status).fault.clone()
    }

    pub fn stats(&self) -> &Arc<IngestionStats> {
        &self.stats
    }

    pub fn sink(&self) -> &Arc<dyn EntrySink> {
        &self.sink
    }

    pub fn bound_providers(&self) -> Arc<ProviderSet> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Preloads the persisted manifest, binds the provider and asks for a
    /// fresh manifest. Returns whether the provider is bound.
    fn bind(&self, provider: &ProviderRegistration) -> bool {
        self.preload_manifest(&provider.name);

        if let Err(err) = self.session.enable_provider(provider) {
            counter!(PROVIDER_UPDATE_FAILURES).increment(1);
            warn!(
                session = %self.name,
                provider = %provider.name,
                level = %provider.level,
                "failed to bind provider: {err}"
            );
            return false;
        }
        if let Err(err) = self.session.request_manifest(&provider.name) {
            warn!(
                session = %self.name,
                provider = %provider.name,
                "failed to request provider manifest: {err}"
            );
        }
        true
    }

    fn preload_manifest(&self, provider: &str) {
        if self.schemas.contains_provider(provider) {
            return;
        }

        match self.manifests.load(provider) {
            Ok(Some(text)) => match apply_manifest(&self.schemas, provider, &text) {
                Ok(count) => {
                    counter!(MANIFESTS_PRELOADED).increment(1);
                    debug!(session = %self.name, provider, schemas = count, "preloaded provider manifest");
                }
                Err(err) => {
                    warn!(session = %self.name, provider, "ignoring unreadable persisted manifest: {err}");
                }
            },
            Ok(None) => {}
            Err(err) => {
                warn!(session = %self.name, provider, "failed to load persisted manifest: {err}");
            }
        }
    }

    /// Closing the session is the only way to interrupt a blocked pump, so a
    /// thread waits for the token and does it. Dispose cancels the token too,
    /// which always lets this thread finish.
    fn spawn_watcher(&self) -> std::io::Result<JoinHandle<()>> {
        let cancel = self.cancel.clone();
        let session = self.session.clone();
        thread::Builder::new()
            .name(format!("trace-cancel-{}", self.name))
            .spawn(move || {
                block_on(cancel.cancelled());
                session.close();
            })
    }

    fn session_error(&self, err: SessionError) -> WorkerError {
        match err {
            SessionError::AccessDenied(reason) => WorkerError::AccessDenied {
                session: self.name.clone(),
                reason,
            },
            source => WorkerError::Session {
                session: self.name.clone(),
                source,
            },
        }
    }

    fn invalid_state(&self, operation: &'static str, state: WorkerState) -> WorkerError {
        WorkerError::InvalidState {
            session: self.name.clone(),
            operation,
            state,
        }
    }
}

impl<S: TraceSession> Drop for IngestionWorker<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn apply_manifest(
    schemas: &SchemaCache,
    provider: &str,
    text: &str,
) -> Result<usize, serde_json::Error> {
    let manifest = ProviderManifest::parse(text)?;
    Ok(schemas.replace_provider(provider, manifest.into_schemas(provider)))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// State moved onto the pump thread.
struct Pump<S> {
    name: String,
    session: Arc<S>,
    sink: Arc<dyn EntrySink>,
    schemas: Arc<SchemaCache>,
    manifests: Arc<ManifestStore>,
    providers: SharedProviders,
    decoder: RecordDecoder,
    status: Arc<Mutex<Status>>,
    cancel: CancellationToken,
    stats: Arc<IngestionStats>,
    // Manifests written to disk by this worker
    persisted: HashSet<String>,
}

impl<S: TraceSession> Pump<S> {
    fn run(mut self) {
        let session = self.session.clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            session.process(&mut |message| self.handle(message))
        }));

        if self.cancel.is_cancelled() {
            let mut status = lock(&self.status);
            if status.state == WorkerState::Running {
                status.state = WorkerState::Cancelled;
                info!(session = %self.name, "trace session cancelled, pump stopped");
            } else {
                debug!(session = %self.name, "trace session pump stopped");
            }
            return;
        }

        let reason = match outcome {
            Ok(Ok(())) => "trace session stopped delivering events".to_owned(),
            Ok(Err(err)) => format!("processing stopped: {err}"),
            Err(panic) => format!("event processing panicked: {}", panic_message(&*panic)),
        };
        self.fault(reason);
    }

    fn handle(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Decoded(record) => self.deliver(record),
            SessionMessage::ManifestReceived { provider, manifest } => {
                self.receive_manifest(&provider, &manifest)
            }
            SessionMessage::Undecodable { provider, event_id } => {
                self.decoder
                    .lost(&provider, event_id, LossReason::Undecodable)
            }
        }
    }

    fn deliver(&mut self, record: RawRecord) {
        let bound = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&record.provider);
        if !bound {
            self.stats.record_unmonitored();
            counter!(EVENTS_UNMONITORED).increment(1);
            return;
        }

        let Some(entry) = self.decoder.decode(record) else {
            return;
        };
        let provider = entry.provider().to_owned();
        let event_id = entry.event_id();

        let sink = &self.sink;
        match panic::catch_unwind(AssertUnwindSafe(|| sink.send_entry(entry))) {
            Ok(Ok(())) => {
                self.stats.record_delivered();
                counter!(EVENTS_DELIVERED).increment(1);
            }
            Ok(Err(err)) => {
                self.stats.record_sink_failure();
                counter!(SINK_FAILURES).increment(1);
                warn!(session = %self.name, provider = %provider, event_id, "sink rejected entry: {err:#}");
            }
            Err(panic) => {
                self.stats.record_sink_failure();
                counter!(SINK_FAILURES).increment(1);
                error!(
                    session = %self.name,
                    provider = %provider,
                    event_id,
                    "sink panicked on entry: {}",
                    panic_message(&*panic)
                );
            }
        }
    }

    fn receive_manifest(&mut self, provider: &str, manifest: &str) {
        let count = match apply_manifest(&self.schemas, provider, manifest) {
            Ok(count) => count,
            Err(err) => {
                counter!(MANIFESTS_REJECTED).increment(1);
                warn!(session = %self.name, provider, "ignoring malformed provider manifest: {err}");
                return;
            }
        };
        counter!(MANIFESTS_APPLIED).increment(1);
        info!(session = %self.name, provider, schemas = count, "applied provider manifest");

        if self.persisted.contains(provider) {
            return;
        }
        match self.manifests.persist(provider, manifest) {
            Ok(()) => {
                self.persisted.insert(provider.to_owned());
            }
            Err(err) => {
                counter!(MANIFEST_PERSIST_FAILURES).increment(1);
                warn!(session = %self.name, provider, "failed to persist provider manifest: {err}");
            }
        }
    }

    fn fault(&self, reason: String) {
        error!(
            session = %self.name,
            reason = %reason,
            "ingestion worker faulted, no further events will be delivered"
        );
        counter!(WORKER_FAULTS).increment(1);
        self.session.close();

        let mut status = lock(&self.status);
        if status.state == WorkerState::Running {
            status.state = WorkerState::Faulted;
            status.fault = Some(reason);
        }
    }
}
