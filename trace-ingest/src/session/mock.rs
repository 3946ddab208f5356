use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    ProviderRegistration, RawRecord, SessionError, SessionFactory, SessionMessage, TraceSession,
};
use crate::level::TraceLevel;

/// A call made against a [`MockSession`], in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    Open,
    Enable {
        provider: String,
        level: TraceLevel,
        keywords: u64,
    },
    Disable {
        provider: String,
    },
    RequestManifest {
        provider: String,
    },
    Close,
}

enum Control {
    Message(SessionMessage),
    Fail(String),
    Panic(String),
    Return,
}

/// In-memory session: records every call and delivers messages injected by
/// the test, in order, to whoever runs `process`.
#[derive(Clone)]
pub struct MockSession {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    calls: Mutex<Vec<SessionCall>>,
    sender: Mutex<Sender<Control>>,
    receiver: Mutex<Option<Receiver<Control>>>,
    manifests: Mutex<HashMap<String, String>>,
    rejected: Mutex<HashSet<String>>,
    deny_access: AtomicBool,
    closed: AtomicBool,
    processed: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockSession {
    pub fn new(name: impl Into<String>) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                calls: Mutex::new(Vec::new()),
                sender: Mutex::new(sender),
                receiver: Mutex::new(Some(receiver)),
                manifests: Mutex::new(HashMap::new()),
                rejected: Mutex::new(HashSet::new()),
                deny_access: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                processed: AtomicUsize::new(0),
            }),
        }
    }

    /// Makes `open` fail with [`SessionError::AccessDenied`].
    pub fn deny_access(&self) {
        self.inner.deny_access.store(true, Ordering::SeqCst);
    }

    /// Makes `enable_provider` fail for this provider.
    pub fn reject_provider(&self, provider: &str) {
        lock(&self.inner.rejected).insert(provider.to_owned());
    }

    /// Manifest broadcast in response to `request_manifest(provider)`.
    pub fn register_manifest(&self, provider: &str, manifest: impl Into<String>) {
        lock(&self.inner.manifests).insert(provider.to_owned(), manifest.into());
    }

    pub fn emit(&self, message: SessionMessage) {
        self.send(Control::Message(message));
    }

    pub fn emit_record(&self, record: RawRecord) {
        self.emit(SessionMessage::Decoded(record));
    }

    /// The running `process` call returns this error.
    pub fn fail(&self, reason: impl Into<String>) {
        self.send(Control::Fail(reason.into()));
    }

    /// The running `process` call panics.
    pub fn panic_pump(&self, reason: impl Into<String>) {
        self.send(Control::Panic(reason.into()));
    }

    /// The running `process` call returns without the session being closed.
    pub fn end_stream(&self) {
        self.send(Control::Return);
    }

    pub fn calls(&self) -> Vec<SessionCall> {
        lock(&self.inner.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.inner.calls).clear();
    }

    /// Messages handed to a handler so far.
    pub fn processed(&self) -> usize {
        self.inner.processed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn record(&self, call: SessionCall) {
        lock(&self.inner.calls).push(call);
    }

    fn send(&self, control: Control) {
        // A send only fails once the pump has gone away, and then nobody is
        // left to observe the message.
        lock(&self.inner.sender).send(control).ok();
    }
}

impl TraceSession for MockSession {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn open(&self) -> Result<(), SessionError> {
        self.record(SessionCall::Open);
        if self.inner.deny_access.load(Ordering::SeqCst) {
            return Err(SessionError::AccessDenied(format!(
                "cannot start trace session {}",
                self.inner.name
            )));
        }
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    fn enable_provider(&self, provider: &ProviderRegistration) -> Result<(), SessionError> {
        self.record(SessionCall::Enable {
            provider: provider.name.clone(),
            level: provider.level,
            keywords: provider.keywords,
        });
        if lock(&self.inner.rejected).contains(&provider.name) {
            return Err(SessionError::ProviderRejected {
                provider: provider.name.clone(),
                reason: "provider is not registered".to_owned(),
            });
        }
        Ok(())
    }

    fn disable_provider(&self, provider: &str) -> Result<(), SessionError> {
        self.record(SessionCall::Disable {
            provider: provider.to_owned(),
        });
        Ok(())
    }

    fn request_manifest(&self, provider: &str) -> Result<(), SessionError> {
        self.record(SessionCall::RequestManifest {
            provider: provider.to_owned(),
        });
        let manifest = lock(&self.inner.manifests).get(provider).cloned();
        if let Some(manifest) = manifest {
            self.emit(SessionMessage::ManifestReceived {
                provider: provider.to_owned(),
                manifest,
            });
        }
        Ok(())
    }

    fn process(&self, handler: &mut dyn FnMut(SessionMessage)) -> Result<(), SessionError> {
        let receiver = lock(&self.inner.receiver)
            .take()
            .ok_or_else(|| SessionError::Other("session is already being processed".to_owned()))?;

        loop {
            match receiver.recv() {
                Ok(Control::Message(message)) => {
                    handler(message);
                    self.inner.processed.fetch_add(1, Ordering::SeqCst);
                }
                Ok(Control::Fail(reason)) => return Err(SessionError::Other(reason)),
                Ok(Control::Panic(reason)) => panic!("{reason}"),
                Ok(Control::Return) | Err(_) => return Ok(()),
            }
        }
    }

    fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.record(SessionCall::Close);
            self.send(Control::Return);
        }
    }
}

/// Creates [`MockSession`]s and keeps a handle to each so tests can drive
/// them after the collector took ownership.
#[derive(Default)]
pub struct MockSessionFactory {
    sessions: Mutex<HashMap<String, MockSession>>,
    deny_access: AtomicBool,
}

impl MockSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions created from now on refuse to open.
    pub fn deny_access(&self) {
        self.deny_access.store(true, Ordering::SeqCst);
    }

    pub fn session(&self, name: &str) -> Option<MockSession> {
        lock(&self.sessions).get(name).cloned()
    }
}

impl SessionFactory for MockSessionFactory {
    type Session = MockSession;

    fn create(&self, name: &str) -> MockSession {
        let session = MockSession::new(name);
        if self.deny_access.load(Ordering::SeqCst) {
            session.deny_access();
        }
        lock(&self.sessions).insert(name.to_owned(), session.clone());
        session
    }
}
