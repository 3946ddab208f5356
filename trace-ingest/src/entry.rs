use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::schema::EventSchema;
use crate::session::RawRecord;

/// A decoded, schema-resolved trace event. Read-only once built: its payload
/// always has exactly one value per schema field.
#[derive(Debug, Clone)]
pub struct EventEntry {
    provider: String,
    event_id: u16,
    message: Option<String>,
    payload: Vec<Value>,
    timestamp: DateTime<Utc>,
    activity_id: Uuid,
    related_activity_id: Uuid,
    process_id: u32,
    thread_id: u32,
    schema: Arc<EventSchema>,
}

impl EventEntry {
    /// Returns the record back if its payload does not fit the schema.
    pub fn from_record(record: RawRecord, schema: Arc<EventSchema>) -> Result<Self, RawRecord> {
        if record.payload.len() != schema.field_names.len() {
            return Err(record);
        }

        let message = record
            .message
            .or_else(|| schema.format_message(&record.payload));

        Ok(Self {
            provider: record.provider,
            event_id: record.event_id,
            message,
            payload: record.payload,
            timestamp: record.timestamp,
            activity_id: record.activity_id,
            related_activity_id: record.related_activity_id,
            process_id: record.process_id,
            thread_id: record.thread_id,
            schema,
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn event_id(&self) -> u16 {
        self.event_id
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn payload(&self) -> &[Value] {
        &self.payload
    }

    /// Payload values paired with their schema field names.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.schema
            .field_names
            .iter()
            .map(String::as_str)
            .zip(self.payload.iter())
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn activity_id(&self) -> Uuid {
        self.activity_id
    }

    pub fn related_activity_id(&self) -> Uuid {
        self.related_activity_id
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub fn thread_id(&self) -> u32 {
        self.thread_id
    }

    pub fn schema(&self) -> &Arc<EventSchema> {
        &self.schema
    }
}
