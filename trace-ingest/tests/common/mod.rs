#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Once};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common_batching::FlushError;
use serde_json::{json, Value};
use trace_ingest::{EntrySink, EventEntry, RawRecord, RecordMetadata};

static TRACING_INIT: Once = Once::new();
pub fn setup_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_writer(tracing_subscriber::fmt::TestWriter::new())
            .init()
    });
}

/// Sink that keeps every entry, and can be told to reject one event id.
#[derive(Default)]
pub struct RecordingSink {
    entries: Mutex<Vec<EventEntry>>,
    reject_event: Option<u16>,
    flushed: AtomicBool,
    closed: AtomicBool,
}

impl RecordingSink {
    pub fn rejecting(event_id: u16) -> Self {
        Self {
            reject_event: Some(event_id),
            ..Default::default()
        }
    }

    pub fn event_ids(&self) -> Vec<u16> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|entry| entry.event_id())
            .collect()
    }

    pub fn entries(&self) -> Vec<EventEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn was_flushed(&self) -> bool {
        self.flushed.load(Ordering::SeqCst)
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntrySink for RecordingSink {
    fn send_entry(&self, entry: EventEntry) -> anyhow::Result<()> {
        if self.reject_event == Some(entry.event_id()) {
            anyhow::bail!("event {} is not accepted", entry.event_id());
        }
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    async fn flush(&self) -> Result<(), FlushError> {
        self.flushed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A record that carries its own metadata, with one numeric field.
pub fn described_record(provider: &str, event_id: u16) -> RawRecord {
    RawRecord::new(provider, event_id)
        .with_payload(vec![json!(event_id)])
        .with_metadata(RecordMetadata::new(
            format!("Event{event_id}"),
            vec!["value".to_string()],
        ))
}

/// A record with no metadata, decodable only through a cached schema.
pub fn bare_record(provider: &str, event_id: u16, payload: Vec<Value>) -> RawRecord {
    RawRecord::new(provider, event_id).with_payload(payload)
}

pub fn manifest_json(provider: &str) -> String {
    json!({
        "provider": provider,
        "events": [
            {
                "id": 1,
                "name": "BlockWritten",
                "level": 4,
                "fields": ["device", "bytes"],
                "message": "%2 bytes written to %1"
            },
            { "id": 2, "name": "BlockRead", "fields": ["device"] }
        ]
    })
    .to_string()
}

/// Blocks until `condition` holds or five seconds pass.
pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Async flavour of [`wait_until`] that yields to the runtime while waiting.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
