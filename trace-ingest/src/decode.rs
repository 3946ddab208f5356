use std::sync::Arc;

use metrics::counter;
use tracing::{info, warn};

use crate::entry::EventEntry;
use crate::metrics_consts::EVENTS_LOST;
use crate::schema::{EventSchema, SchemaCache};
use crate::session::RawRecord;
use crate::stats::IngestionStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossReason {
    /// Neither the cache nor the record describe the event
    NoSchema,
    /// The payload does not have one value per schema field
    PayloadMismatch,
    /// The session could not parse the event
    Undecodable,
}

impl LossReason {
    pub fn as_str(self) -> &'static str {
        match self {
            LossReason::NoSchema => "no_schema",
            LossReason::PayloadMismatch => "payload_mismatch",
            LossReason::Undecodable => "undecodable",
        }
    }
}

/// Turns raw records into entries and accounts for the ones that cannot be.
/// Owned by the pump thread.
pub(crate) struct RecordDecoder {
    session: String,
    schemas: Arc<SchemaCache>,
    stats: Arc<IngestionStats>,
    loss_streak: u32,
}

impl RecordDecoder {
    pub fn new(session: String, schemas: Arc<SchemaCache>, stats: Arc<IngestionStats>) -> Self {
        Self {
            session,
            schemas,
            stats,
            loss_streak: 0,
        }
    }

    pub fn decode(&mut self, record: RawRecord) -> Option<EventEntry> {
        let schema = match self.schemas.get(&record.provider, record.event_id) {
            Some(schema) => schema,
            None => match &record.metadata {
                Some(metadata) => self.schemas.insert(EventSchema::from_metadata(
                    &record.provider,
                    record.event_id,
                    metadata,
                )),
                None => {
                    self.lost(&record.provider, record.event_id, LossReason::NoSchema);
                    return None;
                }
            },
        };

        let decoded = EventEntry::from_record(record, schema).or_else(|record| {
            // The cached schema is stale for this record, but the record
            // describes itself.
            match record.metadata.as_ref() {
                Some(metadata) => {
                    let own = EventSchema::from_metadata(&record.provider, record.event_id, metadata);
                    EventEntry::from_record(record, Arc::new(own))
                }
                None => Err(record),
            }
        });

        match decoded {
            Ok(entry) => {
                self.resolved();
                Some(entry)
            }
            Err(record) => {
                self.lost(&record.provider, record.event_id, LossReason::PayloadMismatch);
                None
            }
        }
    }

    /// Counts one lost record. Only the first loss of a streak is logged.
    pub fn lost(&mut self, provider: &str, event_id: u16, reason: LossReason) {
        self.stats.record_lost();
        counter!(EVENTS_LOST, "reason" => reason.as_str()).increment(1);

        if self.loss_streak == 0 {
            self.stats.record_loss_streak();
            warn!(
                session = %self.session,
                provider,
                event_id,
                reason = reason.as_str(),
                "cannot resolve event schema, events will be lost until it is available"
            );
        }

        match self.loss_streak.checked_add(1) {
            Some(streak) => self.loss_streak = streak,
            None => {
                warn!(
                    session = %self.session,
                    lost = u32::MAX,
                    "still losing events, schemas remain unresolved"
                );
                self.loss_streak = 1;
            }
        }
    }

    fn resolved(&mut self) {
        if self.loss_streak > 0 {
            info!(
                session = %self.session,
                lost = self.loss_streak,
                "event schemas resolved again, delivery resumed"
            );
            self.loss_streak = 0;
        }
    }
}
