//! Typed event fan-out.
//!
//! Three keyed dispatch tables (diagnostics per URI, workspace events per
//! kind, server notifications per method) plus a flat adapter-error
//! listener set. Every subscription carries an idempotent cancel and only
//! weakly references the bus, so cancellation is safe after client
//! disposal. Listener panics are caught and logged; fan-out continues.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;

use crate::types::{AdapterErrorEvent, DiagnosticsEvent, WorkspaceEvent};

pub type DiagnosticsListener = Arc<dyn Fn(&DiagnosticsEvent) + Send + Sync>;
pub type WorkspaceListener = Arc<dyn Fn(&WorkspaceEvent) + Send + Sync>;
/// Notification listeners may return a value: when a server-initiated
/// request has no built-in handler, the first non-`None` return answers
/// it. The return value is ignored for ordinary notifications.
pub type NotificationListener = Arc<dyn Fn(&Value, &str) -> Option<Value> + Send + Sync>;
pub type ErrorListener = Arc<dyn Fn(&AdapterErrorEvent) + Send + Sync>;

#[derive(Default)]
struct Tables {
    next_id: u64,
    diagnostics: HashMap<String, Vec<(u64, DiagnosticsListener)>>,
    workspace: HashMap<String, Vec<(u64, WorkspaceListener)>>,
    notifications: HashMap<String, Vec<(u64, NotificationListener)>>,
    errors: Vec<(u64, ErrorListener)>,
}

struct BusInner {
    tables: Mutex<Tables>,
}

#[derive(Clone)]
pub(crate) struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Debug)]
enum Slot {
    Diagnostics(String),
    Workspace(String),
    Notification(String),
    Error,
}

/// Handle to a registered listener.
///
/// `cancel` is idempotent and safe to call after the bus is gone;
/// holding a subscription does not keep the client alive.
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<BusInner>,
    slot: Slot,
    id: u64,
}

impl Subscription {
    /// Remove the listener. Calling twice (or after disposal) is a no-op.
    pub fn cancel(&self) {
        let Some(bus) = self.bus.upgrade() else { return };
        let mut tables = bus.tables.lock().unwrap();
        match &self.slot {
            Slot::Diagnostics(key) => {
                if let Some(list) = tables.diagnostics.get_mut(key) {
                    list.retain(|(id, _)| *id != self.id);
                }
            }
            Slot::Workspace(key) => {
                if let Some(list) = tables.workspace.get_mut(key) {
                    list.retain(|(id, _)| *id != self.id);
                }
            }
            Slot::Notification(key) => {
                if let Some(list) = tables.notifications.get_mut(key) {
                    list.retain(|(id, _)| *id != self.id);
                }
            }
            Slot::Error => tables.errors.retain(|(id, _)| *id != self.id),
        }
    }
}

/// Invoke one listener (or cleanup), containing panics so fan-out and
/// disposal continue.
pub(crate) fn guarded<F: FnOnce() -> T, T>(context: &str, f: F) -> Option<T> {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(context, "event listener panicked");
            None
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                tables: Mutex::new(Tables::default()),
            }),
        }
    }

    fn subscription(&self, slot: Slot, id: u64) -> Subscription {
        Subscription {
            bus: Arc::downgrade(&self.inner),
            slot,
            id,
        }
    }

    pub fn on_diagnostics(&self, uri: String, listener: DiagnosticsListener) -> Subscription {
        let mut tables = self.inner.tables.lock().unwrap();
        let id = tables.next_id;
        tables.next_id += 1;
        tables
            .diagnostics
            .entry(uri.clone())
            .or_default()
            .push((id, listener));
        drop(tables);
        self.subscription(Slot::Diagnostics(uri), id)
    }

    pub fn on_workspace_event(&self, kind: String, listener: WorkspaceListener) -> Subscription {
        let mut tables = self.inner.tables.lock().unwrap();
        let id = tables.next_id;
        tables.next_id += 1;
        tables
            .workspace
            .entry(kind.clone())
            .or_default()
            .push((id, listener));
        drop(tables);
        self.subscription(Slot::Workspace(kind), id)
    }

    pub fn on_notification(&self, method: String, listener: NotificationListener) -> Subscription {
        let mut tables = self.inner.tables.lock().unwrap();
        let id = tables.next_id;
        tables.next_id += 1;
        tables
            .notifications
            .entry(method.clone())
            .or_default()
            .push((id, listener));
        drop(tables);
        self.subscription(Slot::Notification(method), id)
    }

    pub fn on_error(&self, listener: ErrorListener) -> Subscription {
        let mut tables = self.inner.tables.lock().unwrap();
        let id = tables.next_id;
        tables.next_id += 1;
        tables.errors.push((id, listener));
        drop(tables);
        self.subscription(Slot::Error, id)
    }

    pub fn emit_diagnostics(&self, event: &DiagnosticsEvent) {
        let listeners: Vec<DiagnosticsListener> = {
            let tables = self.inner.tables.lock().unwrap();
            tables
                .diagnostics
                .get(&event.uri)
                .map(|list| list.iter().map(|(_, l)| l.clone()).collect())
                .unwrap_or_default()
        };
        for listener in listeners {
            // Each listener gets its own deep copy of the payload.
            let copy = event.clone();
            guarded("diagnostics", || listener(&copy));
        }
    }

    pub fn emit_workspace_event(&self, event: &WorkspaceEvent) {
        let listeners: Vec<WorkspaceListener> = {
            let tables = self.inner.tables.lock().unwrap();
            tables
                .workspace
                .get(&event.kind)
                .map(|list| list.iter().map(|(_, l)| l.clone()).collect())
                .unwrap_or_default()
        };
        for listener in listeners {
            let copy = event.clone();
            guarded("workspace", || listener(&copy));
        }
    }

    /// Fan a server notification out to its method listeners.
    ///
    /// Returns the first non-`None` listener return, which answers
    /// unknown server-initiated requests.
    pub fn emit_notification(&self, method: &str, payload: &Value, language_id: &str) -> Option<Value> {
        let listeners: Vec<NotificationListener> = {
            let tables = self.inner.tables.lock().unwrap();
            tables
                .notifications
                .get(method)
                .map(|list| list.iter().map(|(_, l)| l.clone()).collect())
                .unwrap_or_default()
        };
        let mut answer = None;
        for listener in listeners {
            let copy = payload.clone();
            if let Some(result) = guarded("notification", || listener(&copy, language_id)) {
                if answer.is_none() {
                    answer = result;
                }
            }
        }
        answer
    }

    pub fn emit_adapter_error(&self, language_id: &str, operation: &str, error: &str) {
        let event = AdapterErrorEvent {
            language_id: language_id.to_string(),
            operation: operation.to_string(),
            error: error.to_string(),
        };
        let listeners: Vec<ErrorListener> = {
            let tables = self.inner.tables.lock().unwrap();
            tables.errors.iter().map(|(_, l)| l.clone()).collect()
        };
        for listener in listeners {
            let copy = event.clone();
            guarded("adapter-error", || listener(&copy));
        }
    }

    /// Drop every listener. Subscriptions held by the host stay valid but
    /// their cancel becomes a no-op.
    pub fn clear(&self) {
        let mut tables = self.inner.tables.lock().unwrap();
        tables.diagnostics.clear();
        tables.workspace.clear();
        tables.notifications.clear();
        tables.errors.clear();
    }
}
