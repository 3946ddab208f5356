//! Boundary to the operating system's trace facility.
//!
//! A [`TraceSession`] is driven from one dedicated thread: `process` blocks
//! and invokes the handler once per [`SessionMessage`] until `close` is called
//! from another thread.

pub mod mock;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::level::TraceLevel;

#[derive(Error, Debug)]
pub enum SessionError {
    /// The caller lacks the privileges to create or attach to the session
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("provider {provider} rejected: {reason}")]
    ProviderRejected { provider: String, reason: String },
    #[error("trace session is closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("trace session failed: {0}")]
    Other(String),
}

/// A provider to bind to a session, with its filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRegistration {
    pub name: String,
    pub level: TraceLevel,
    /// Keyword mask; zero leaves events unfiltered by keyword
    #[serde(default)]
    pub keywords: u64,
    #[serde(default)]
    pub arguments: HashMap<String, String>,
    #[serde(default)]
    pub process_names: Vec<String>,
}

impl ProviderRegistration {
    pub fn new(name: impl Into<String>, level: TraceLevel) -> Self {
        Self {
            name: name.into(),
            level,
            keywords: 0,
            arguments: HashMap::new(),
            process_names: Vec::new(),
        }
    }

    pub fn with_keywords(mut self, keywords: u64) -> Self {
        self.keywords = keywords;
        self
    }

    /// Whether re-binding is needed to go from `self` to `other`.
    pub fn filter_differs(&self, other: &ProviderRegistration) -> bool {
        self.level != other.level || self.keywords != other.keywords
    }
}

/// Schema information some records carry inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    pub event_name: String,
    pub level: TraceLevel,
    pub keywords: u64,
    pub opcode: u8,
    pub opcode_name: String,
    pub task: u16,
    pub task_name: String,
    pub version: u8,
    pub field_names: Vec<String>,
    pub message: Option<String>,
}

impl RecordMetadata {
    pub fn new(event_name: impl Into<String>, field_names: Vec<String>) -> Self {
        Self {
            event_name: event_name.into(),
            level: TraceLevel::Informational,
            keywords: 0,
            opcode: 0,
            opcode_name: String::new(),
            task: 0,
            task_name: String::new(),
            version: 0,
            field_names,
            message: None,
        }
    }
}

/// One event as the session delivers it, before schema resolution.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub provider: String,
    pub event_id: u16,
    pub timestamp: DateTime<Utc>,
    pub activity_id: Uuid,
    pub related_activity_id: Uuid,
    pub process_id: u32,
    pub thread_id: u32,
    pub message: Option<String>,
    pub payload: Vec<Value>,
    pub metadata: Option<RecordMetadata>,
}

impl RawRecord {
    pub fn new(provider: impl Into<String>, event_id: u16) -> Self {
        Self {
            provider: provider.into(),
            event_id,
            timestamp: Utc::now(),
            activity_id: Uuid::nil(),
            related_activity_id: Uuid::nil(),
            process_id: 0,
            thread_id: 0,
            message: None,
            payload: Vec::new(),
            metadata: None,
        }
    }

    pub fn with_payload(mut self, payload: Vec<Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_metadata(mut self, metadata: RecordMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone)]
pub enum SessionMessage {
    Decoded(RawRecord),
    /// A provider broadcast its manifest, usually after `request_manifest`
    ManifestReceived { provider: String, manifest: String },
    /// The session saw an event it could not parse at all
    Undecodable { provider: String, event_id: u16 },
}

pub trait TraceSession: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn open(&self) -> Result<(), SessionError>;

    /// Binds a provider, or re-applies its filter if already bound.
    fn enable_provider(&self, provider: &ProviderRegistration) -> Result<(), SessionError>;

    fn disable_provider(&self, provider: &str) -> Result<(), SessionError>;

    /// Asks the provider to broadcast its manifest into the session.
    fn request_manifest(&self, provider: &str) -> Result<(), SessionError>;

    /// Blocks, calling `handler` for each message, until the session is
    /// closed or fails.
    fn process(&self, handler: &mut dyn FnMut(SessionMessage)) -> Result<(), SessionError>;

    /// Idempotent. Unblocks a running `process` call.
    fn close(&self);
}

pub trait SessionFactory: Send + Sync {
    type Session: TraceSession;

    fn create(&self, name: &str) -> Self::Session;
}

impl<F: SessionFactory> SessionFactory for Arc<F> {
    type Session = F::Session;

    fn create(&self, name: &str) -> Self::Session {
        (**self).create(name)
    }
}
