//! Host-side mirror of the editor state
//!
//! Each `stateUpdate` event replaces the snapshot wholesale and bumps its
//! version. Readers get an `Arc` to a complete snapshot, so a read never sees a
//! half-applied update. Watch subscribers only ever observe the latest value;
//! snapshots that arrive before a subscriber looks are simply superseded.

use editor_bridge_api::{fields, Value};
use serde::de::DeserializeOwned;
use serde_json::Map;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

/// Immutable point-in-time copy of the editor state
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    version: u64,
    fields: BTreeMap<String, Value>,
}

impl StateSnapshot {
    /// Incremented on every applied update, starting at 1
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Read a field into a typed value; `None` if absent or of another type
    pub fn get_as<T: DeserializeOwned>(&self, field: &str) -> Option<T> {
        self.get(field)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_ready(&self) -> bool {
        self.flag(fields::IS_READY)
    }

    pub fn is_focused(&self) -> bool {
        self.flag(fields::IS_FOCUSED)
    }

    pub fn content_changed(&self) -> bool {
        self.flag(fields::CONTENT_CHANGED)
    }

    fn flag(&self, field: &str) -> bool {
        self.get(field).and_then(Value::as_bool).unwrap_or(false)
    }
}

/// What the mirror currently holds
#[derive(Debug, Clone, Default, PartialEq)]
pub enum MirrorState {
    /// No snapshot has arrived yet
    #[default]
    Uninitialized,
    Snapshot(Arc<StateSnapshot>),
}

impl MirrorState {
    pub fn snapshot(&self) -> Option<&Arc<StateSnapshot>> {
        match self {
            Self::Uninitialized => None,
            Self::Snapshot(snapshot) => Some(snapshot),
        }
    }

    /// Version of the held snapshot, 0 before the first one
    pub fn version(&self) -> u64 {
        self.snapshot().map_or(0, |s| s.version())
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self, Self::Snapshot(_))
    }
}

/// Receiver half handed to state subscribers
pub type StateReceiver = watch::Receiver<MirrorState>;

/// Synchronous listener invoked on every applied snapshot
pub type StateListener = Arc<dyn Fn(&Arc<StateSnapshot>) + Send + Sync>;

/// Why an incoming state payload was not applied
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("State payload must be an object")]
    NotAnObject,

    #[error("State mirror is closed")]
    Closed,
}

/// Host-resident cache of the latest editor state
pub struct StateMirror {
    rx: StateReceiver,
    inner: Mutex<MirrorInner>,
}

struct MirrorInner {
    tx: Option<watch::Sender<MirrorState>>,
    listeners: Vec<(u64, StateListener)>,
    next_listener: u64,
    version: u64,
    /// Fields contributed by installed extensions
    known_fields: Vec<String>,
}

impl StateMirror {
    /// Create an empty mirror
    ///
    /// `known_fields` lists the fields installed extensions contribute; other
    /// fields are still stored but logged.
    pub fn new(known_fields: Vec<String>) -> Self {
        let (tx, rx) = watch::channel(MirrorState::Uninitialized);
        Self {
            rx,
            inner: Mutex::new(MirrorInner {
                tx: Some(tx),
                listeners: Vec::new(),
                next_listener: 1,
                version: 0,
                known_fields,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MirrorInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Last known state; never blocks
    pub fn current(&self) -> MirrorState {
        self.rx.borrow().clone()
    }

    /// Subscribe to snapshot changes (latest value only)
    pub fn subscribe(&self) -> StateReceiver {
        self.rx.clone()
    }

    /// Register a listener called synchronously for each applied snapshot
    pub fn add_listener(&self, listener: impl Fn(&Arc<StateSnapshot>) + Send + Sync + 'static) -> u64 {
        let mut inner = self.lock();
        let id = inner.next_listener;
        inner.next_listener += 1;
        inner.listeners.push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: u64) -> bool {
        let mut inner = self.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(listener, _)| *listener != id);
        inner.listeners.len() != before
    }

    /// Replace the snapshot with the given state payload
    pub fn apply(&self, payload: &Value) -> Result<Arc<StateSnapshot>, StateError> {
        let Value::Object(map) = payload else {
            tracing::warn!(payload = %payload, "Ignoring non-object state update");
            return Err(StateError::NotAnObject);
        };

        let (snapshot, listeners) = {
            let mut inner = self.lock();
            let Some(tx) = inner.tx.clone() else {
                return Err(StateError::Closed);
            };

            for field in map.keys() {
                if !inner.known_fields.iter().any(|known| known == field) {
                    tracing::debug!(field = %field, "Storing state field no extension declared");
                }
            }

            inner.version += 1;
            let snapshot = Arc::new(StateSnapshot {
                version: inner.version,
                fields: to_fields(map),
            });
            tx.send_replace(MirrorState::Snapshot(snapshot.clone()));

            let listeners: Vec<StateListener> =
                inner.listeners.iter().map(|(_, l)| l.clone()).collect();
            (snapshot, listeners)
        };

        tracing::debug!(version = snapshot.version, "State snapshot applied");
        for listener in listeners {
            listener(&snapshot);
        }
        Ok(snapshot)
    }

    /// Drop all listeners and close the watch channel
    ///
    /// Watch subscribers see `changed()` fail; `current()` keeps returning the
    /// last snapshot.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.listeners.clear();
        inner.tx = None;
    }
}

fn to_fields(map: &Map<String, Value>) -> BTreeMap<String, Value> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}
