mod common;

use std::sync::{Arc, Mutex};

use common_batching::{publish_fn, BufferingInterval};
use tokio_util::sync::CancellationToken;
use trace_ingest::session::mock::{MockSessionFactory, SessionCall};
use trace_ingest::sinks::BufferedSink;
use trace_ingest::{
    Collector, Config, EntrySink, EventEntry, ManifestStore, ProviderRegistration, SchemaCache,
    TraceLevel, WorkerError, WorkerState,
};

use common::{described_record, eventually, setup_tracing, RecordingSink};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn collector(factory: &Arc<MockSessionFactory>) -> Collector<Arc<MockSessionFactory>> {
    setup_tracing();
    Collector::new(
        Config::default(),
        factory.clone(),
        Arc::new(SchemaCache::new()),
        Arc::new(ManifestStore::disabled()),
        &CancellationToken::new(),
    )
}

fn providers() -> Vec<ProviderRegistration> {
    vec![
        ProviderRegistration::new("io", TraceLevel::Informational),
        ProviderRegistration::new("net", TraceLevel::Verbose),
    ]
}

fn recording_sinks(names: &[&str]) -> (Vec<Arc<RecordingSink>>, Vec<(String, Arc<dyn EntrySink>)>) {
    let sinks: Vec<Arc<RecordingSink>> = names
        .iter()
        .map(|_| Arc::new(RecordingSink::default()))
        .collect();
    let named = names
        .iter()
        .zip(&sinks)
        .map(|(name, sink)| {
            let sink: Arc<dyn EntrySink> = sink.clone();
            (name.to_string(), sink)
        })
        .collect();
    (sinks, named)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn one_session_per_sink() {
    let factory = Arc::new(MockSessionFactory::new());
    let mut collector = collector(&factory);
    let (sinks, named) = recording_sinks(&["alpha", "beta"]);

    collector.start(named, &providers()).unwrap();

    assert_eq!(
        collector.health(),
        vec![
            ("alpha".to_string(), WorkerState::Running),
            ("beta".to_string(), WorkerState::Running),
        ]
    );

    let alpha = factory.session("trace-collector-alpha").unwrap();
    let beta = factory.session("trace-collector-beta").unwrap();
    alpha.emit_record(described_record("io", 1));
    beta.emit_record(described_record("net", 2));
    beta.emit_record(described_record("net", 3));

    assert!(eventually(|| sinks[1].event_ids().len() == 2).await);
    assert!(eventually(|| sinks[0].event_ids().len() == 1).await);
    assert_eq!(sinks[0].event_ids(), vec![1]);
    assert_eq!(sinks[1].event_ids(), vec![2, 3]);

    collector.shutdown().await;
}

#[tokio::test]
async fn provider_updates_reach_every_worker() {
    let factory = Arc::new(MockSessionFactory::new());
    let mut collector = collector(&factory);
    let (_sinks, named) = recording_sinks(&["alpha", "beta"]);
    collector.start(named, &providers()).unwrap();

    let alpha = factory.session("trace-collector-alpha").unwrap();
    let beta = factory.session("trace-collector-beta").unwrap();
    alpha.clear_calls();
    beta.clear_calls();

    let desired = vec![ProviderRegistration::new("io", TraceLevel::Informational)];
    let applied = collector.update_providers(&desired);

    assert_eq!(applied.len(), 2);
    for (_, changes) in &applied {
        assert_eq!(changes.removed, vec!["net".to_string()]);
    }
    let disable = vec![SessionCall::Disable {
        provider: "net".to_string(),
    }];
    assert_eq!(alpha.calls(), disable);
    assert_eq!(beta.calls(), disable);

    collector.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_sessions_then_flushes_and_closes_sinks() {
    let factory = Arc::new(MockSessionFactory::new());
    let mut collector = collector(&factory);
    let (sinks, named) = recording_sinks(&["alpha"]);
    collector.start(named, &providers()).unwrap();
    let worker = collector.worker("alpha").unwrap().clone();

    collector.shutdown().await;

    assert_eq!(worker.state(), WorkerState::Disposed);
    assert!(factory.session("trace-collector-alpha").unwrap().is_closed());
    assert!(sinks[0].was_flushed());
    assert!(sinks[0].was_closed());
}

#[tokio::test]
async fn access_denied_is_reported_by_start() {
    let factory = Arc::new(MockSessionFactory::new());
    factory.deny_access();
    let mut collector = collector(&factory);
    let (sinks, named) = recording_sinks(&["alpha", "beta"]);

    let err = collector.start(named, &providers()).unwrap_err();

    assert!(matches!(err, WorkerError::AccessDenied { .. }));
    assert_eq!(
        collector.health(),
        vec![("alpha".to_string(), WorkerState::Faulted)]
    );
    assert!(factory.session("trace-collector-beta").is_none());

    // The failed pipeline's sink is still shut down cleanly.
    collector.shutdown().await;
    assert!(sinks[0].was_closed());
}

#[tokio::test]
async fn faulted_worker_does_not_affect_the_others() {
    let factory = Arc::new(MockSessionFactory::new());
    let mut collector = collector(&factory);
    let (sinks, named) = recording_sinks(&["alpha", "beta"]);
    collector.start(named, &providers()).unwrap();

    factory
        .session("trace-collector-alpha")
        .unwrap()
        .fail("buffer overrun");
    let alpha = collector.worker("alpha").unwrap().clone();
    assert!(eventually(|| alpha.state() == WorkerState::Faulted).await);

    factory
        .session("trace-collector-beta")
        .unwrap()
        .emit_record(described_record("io", 7));
    assert!(eventually(|| sinks[1].event_ids() == vec![7]).await);
    assert_eq!(
        collector.worker("beta").unwrap().state(),
        WorkerState::Running
    );

    collector.shutdown().await;
}

#[tokio::test]
async fn cancelling_the_parent_token_stops_every_worker() {
    setup_tracing();
    let parent = CancellationToken::new();
    let factory = Arc::new(MockSessionFactory::new());
    let mut collector = Collector::new(
        Config::default(),
        factory.clone(),
        Arc::new(SchemaCache::new()),
        Arc::new(ManifestStore::disabled()),
        &parent,
    );
    let (sinks, named) = recording_sinks(&["alpha", "beta"]);
    collector.start(named, &providers()).unwrap();

    parent.cancel();

    for name in ["trace-collector-alpha", "trace-collector-beta"] {
        let session = factory.session(name).unwrap();
        assert!(eventually(|| session.is_closed()).await);
    }
    assert!(
        eventually(|| collector
            .health()
            .iter()
            .all(|(_, state)| *state == WorkerState::Cancelled))
        .await
    );
    assert!(collector.update_providers(&providers()).is_empty());

    collector.shutdown().await;
    assert!(sinks.iter().all(|sink| sink.was_closed()));
}

#[tokio::test]
async fn buffered_sink_delivers_everything_by_shutdown() {
    let factory = Arc::new(MockSessionFactory::new());
    let mut collector = collector(&factory);

    let published: Arc<Mutex<Vec<u16>>> = Arc::default();
    let target = {
        let published = published.clone();
        publish_fn(move |batch: Vec<EventEntry>| {
            let published = published.clone();
            async move {
                let mut published = published.lock().unwrap();
                published.extend(batch.iter().map(EventEntry::event_id));
                Ok(batch.len())
            }
        })
    };
    let config = Config {
        buffering_interval: BufferingInterval::Disabled,
        buffering_count: 4,
        ..Config::default()
    };
    let sink: Arc<dyn EntrySink> = Arc::new(
        BufferedSink::from_config("batched", &config, target, &CancellationToken::new()).unwrap(),
    );

    collector
        .start(vec![("batched".to_string(), sink)], &providers())
        .unwrap();

    let session = factory.session("trace-collector-batched").unwrap();
    for id in 1..=10 {
        session.emit_record(described_record("io", id));
    }
    assert!(eventually(|| session.processed() == 10).await);
    // Two full batches go out on their own; the last two wait for a flush.
    assert!(eventually(|| published.lock().unwrap().len() == 8).await);

    collector.shutdown().await;

    assert_eq!(*published.lock().unwrap(), (1..=10).collect::<Vec<u16>>());
}

#[tokio::test]
async fn log_sink_uses_the_configured_buffering() {
    let factory = Arc::new(MockSessionFactory::new());
    let mut collector = collector(&factory);
    let sink = collector.log_sink("console").unwrap();

    collector
        .start(vec![("console".to_string(), sink)], &providers())
        .unwrap();
    let session = factory.session("trace-collector-console").unwrap();
    session.emit_record(described_record("net", 1));
    assert!(eventually(|| session.processed() == 1).await);

    let worker = collector.worker("console").unwrap().clone();
    assert!(eventually(|| worker.stats().delivered() == 1).await);

    collector.shutdown().await;
}
