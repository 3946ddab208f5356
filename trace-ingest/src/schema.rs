use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::level::TraceLevel;
use crate::session::RecordMetadata;

/// Static shape of one event of one provider. Shared by every entry decoded
/// against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSchema {
    pub provider_name: String,
    pub event_id: u16,
    pub event_name: String,
    pub level: TraceLevel,
    pub keywords: u64,
    pub opcode: u8,
    pub opcode_name: String,
    pub task: u16,
    pub task_name: String,
    pub version: u8,
    pub field_names: Vec<String>,
    /// Message template, with `%1`..`%n` standing for payload values
    pub message: Option<String>,
}

impl EventSchema {
    /// Builds a schema from the metadata a record carries inline.
    pub fn from_metadata(provider: &str, event_id: u16, metadata: &RecordMetadata) -> Self {
        Self {
            provider_name: provider.to_owned(),
            event_id,
            event_name: metadata.event_name.clone(),
            level: metadata.level,
            keywords: metadata.keywords,
            opcode: metadata.opcode,
            opcode_name: metadata.opcode_name.clone(),
            task: metadata.task,
            task_name: metadata.task_name.clone(),
            version: metadata.version,
            field_names: metadata.field_names.clone(),
            message: metadata.message.clone(),
        }
    }

    /// Fills the message template from `payload`. Placeholders without a
    /// matching value are kept as they are.
    pub fn format_message(&self, payload: &[Value]) -> Option<String> {
        let template = self.message.as_deref()?;

        let mut formatted = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                formatted.push(c);
                continue;
            }

            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(d);
                chars.next();
            }

            let value = digits
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| payload.get(i));
            match value {
                Some(Value::String(s)) => formatted.push_str(s),
                Some(other) => formatted.push_str(&other.to_string()),
                None => {
                    formatted.push('%');
                    formatted.push_str(&digits);
                }
            }
        }

        Some(formatted)
    }
}

/// Process-wide cache of event schemas, keyed by provider then event id.
///
/// A provider's schemas are stored as one map so a manifest can swap all of
/// them at once.
#[derive(Debug, Default)]
pub struct SchemaCache {
    providers: DashMap<String, HashMap<u16, Arc<EventSchema>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, provider: &str, event_id: u16) -> Option<Arc<EventSchema>> {
        self.providers
            .get(provider)
            .and_then(|events| events.get(&event_id).cloned())
    }

    /// Caches `schema` unless one is already present, and returns whichever
    /// is cached.
    pub fn insert(&self, schema: EventSchema) -> Arc<EventSchema> {
        let event_id = schema.event_id;
        let mut events = self
            .providers
            .entry(schema.provider_name.clone())
            .or_default();
        events
            .entry(event_id)
            .or_insert_with(|| Arc::new(schema))
            .clone()
    }

    /// Replaces every cached schema of `provider`. Returns how many schemas
    /// the provider now has.
    pub fn replace_provider(
        &self,
        provider: &str,
        schemas: impl IntoIterator<Item = EventSchema>,
    ) -> usize {
        let events: HashMap<u16, Arc<EventSchema>> = schemas
            .into_iter()
            .map(|schema| (schema.event_id, Arc::new(schema)))
            .collect();
        let count = events.len();
        self.providers.insert(provider.to_owned(), events);
        count
    }

    pub fn contains_provider(&self, provider: &str) -> bool {
        self.providers.contains_key(provider)
    }

    /// Total number of cached schemas across providers.
    pub fn len(&self) -> usize {
        self.providers.iter().map(|events| events.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// JSON form of a provider manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderManifest {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub events: Vec<ManifestEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEvent {
    pub id: u16,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_level")]
    pub level: u8,
    #[serde(default)]
    pub keywords: u64,
    #[serde(default)]
    pub opcode: u8,
    #[serde(default)]
    pub opcode_name: String,
    #[serde(default)]
    pub task: u16,
    #[serde(default)]
    pub task_name: String,
    #[serde(default)]
    pub version: u8,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_level() -> u8 {
    TraceLevel::Informational.as_u8()
}

impl ProviderManifest {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Converts the manifest into schemas registered under `provider`,
    /// whatever name the manifest itself declares.
    pub fn into_schemas(self, provider: &str) -> Vec<EventSchema> {
        self.events
            .into_iter()
            .map(|event| EventSchema {
                provider_name: provider.to_owned(),
                event_id: event.id,
                event_name: event.name,
                level: TraceLevel::from(event.level),
                keywords: event.keywords,
                opcode: event.opcode,
                opcode_name: event.opcode_name,
                task: event.task,
                task_name: event.task_name,
                version: event.version,
                field_names: event.fields,
                message: event.message,
            })
            .collect()
    }
}
