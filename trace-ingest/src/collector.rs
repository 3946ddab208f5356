use std::sync::Arc;

use common_batching::PublisherConfigError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::manifest::ManifestStore;
use crate::providers::ProviderChanges;
use crate::schema::SchemaCache;
use crate::session::{ProviderRegistration, SessionFactory, TraceSession};
use crate::sinks::{EntrySink, LogSink};
use crate::worker::{IngestionWorker, WorkerError, WorkerState};

struct Pipeline<S: TraceSession> {
    name: String,
    worker: Arc<IngestionWorker<S>>,
}

/// Runs one ingestion worker per sink, all sharing one schema cache and one
/// manifest store.
pub struct Collector<F: SessionFactory> {
    config: Config,
    factory: F,
    schemas: Arc<SchemaCache>,
    manifests: Arc<ManifestStore>,
    cancel: CancellationToken,
    pipelines: Vec<Pipeline<F::Session>>,
}

impl<F: SessionFactory> Collector<F> {
    pub fn new(
        config: Config,
        factory: F,
        schemas: Arc<SchemaCache>,
        manifests: Arc<ManifestStore>,
        cancel: &CancellationToken,
    ) -> Self {
        Self {
            config,
            factory,
            schemas,
            manifests,
            cancel: cancel.child_token(),
            pipelines: Vec::new(),
        }
    }

    /// A [`LogSink`] buffered with the configured settings, stopped along
    /// with the collector.
    pub fn log_sink(&self, name: &str) -> Result<Arc<dyn EntrySink>, PublisherConfigError> {
        let sink = LogSink::build(name, &self.config, &self.cancel)?;
        Ok(Arc::new(sink))
    }

    /// Creates and initializes a worker for each named sink. Stops at the
    /// first worker that fails to initialize; workers already started keep
    /// running until [`Collector::shutdown`].
    pub fn start(
        &mut self,
        sinks: Vec<(String, Arc<dyn EntrySink>)>,
        providers: &[ProviderRegistration],
    ) -> Result<(), WorkerError> {
        for (name, sink) in sinks {
            let session = self.factory.create(&self.config.session_name(&name));
            let worker = Arc::new(IngestionWorker::new(
                session,
                sink,
                self.schemas.clone(),
                self.manifests.clone(),
                &self.cancel,
            ));

            let initialized = worker.initialize(providers);
            // Kept even on failure so shutdown still flushes and closes the sink.
            self.pipelines.push(Pipeline {
                name: name.clone(),
                worker,
            });
            if let Err(err) = initialized {
                error!(sink = %name, "failed to start ingestion worker: {err}");
                return Err(err);
            }
        }

        info!(pipelines = self.pipelines.len(), "collector started");
        Ok(())
    }

    /// Applies a new provider set to every running worker. Returns the
    /// changes made per pipeline; workers that cannot be updated are logged
    /// and skipped.
    pub fn update_providers(
        &self,
        providers: &[ProviderRegistration],
    ) -> Vec<(String, ProviderChanges)> {
        let mut applied = Vec::with_capacity(self.pipelines.len());
        for pipeline in &self.pipelines {
            match pipeline.worker.update_session(providers) {
                Ok(changes) => applied.push((pipeline.name.clone(), changes)),
                Err(err) => warn!(sink = %pipeline.name, "skipping provider update: {err}"),
            }
        }
        applied
    }

    /// Each pipeline's sink name and worker state.
    pub fn health(&self) -> Vec<(String, WorkerState)> {
        self.pipelines
            .iter()
            .map(|pipeline| (pipeline.name.clone(), pipeline.worker.state()))
            .collect()
    }

    pub fn worker(&self, sink: &str) -> Option<&Arc<IngestionWorker<F::Session>>> {
        self.pipelines
            .iter()
            .find(|pipeline| pipeline.name == sink)
            .map(|pipeline| &pipeline.worker)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn schemas(&self) -> &Arc<SchemaCache> {
        &self.schemas
    }

    /// Disposes every worker, then flushes and closes every sink.
    pub async fn shutdown(self) {
        for pipeline in &self.pipelines {
            let worker = pipeline.worker.clone();
            if let Err(err) = tokio::task::spawn_blocking(move || worker.dispose()).await {
                error!(sink = %pipeline.name, "failed to dispose ingestion worker: {err}");
            }
        }

        for pipeline in &self.pipelines {
            if let Err(err) = pipeline.worker.sink().flush().await {
                warn!(sink = %pipeline.name, "final flush did not deliver: {err}");
            }
        }

        for pipeline in &self.pipelines {
            pipeline.worker.sink().close().await;
        }

        self.cancel.cancel();
        info!("collector stopped");
    }
}
