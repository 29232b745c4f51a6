//! Objects: named, typed, unit-bearing variables with change fan-out.
//!
//! Every object carries a subscriber list of (session id, change channel)
//! pairs. Mutation posts a [`ObjectChange`] to each subscriber's unbounded
//! channel while the object lock is held, so within one object every
//! subscriber observes changes in mutation order and a slow consumer never
//! blocks the writer: the backpressure point is the per-connection
//! outbound queue, not the mutating path.
//!
//! The *internal* kind additionally persists every accepted change into
//! the settings store under the object's name, and re-hydrates from the
//! store at construction.

use std::sync::Arc;

use kaza_proto::Value;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::settings::SettingsStore;

/// A change event delivered to subscribed sessions.
#[derive(Debug, Clone)]
pub struct ObjectChange {
    /// Registry name of the changed object.
    pub name: String,
    /// The accepted value.
    pub value: Value,
    /// Whether the originating write requested confirmation.
    pub confirm: bool,
    /// Session that performed the write, `None` for local producers and
    /// control-port invalidation.
    pub origin: Option<u64>,
}

struct Subscriber {
    session: u64,
    tx: mpsc::UnboundedSender<ObjectChange>,
}

struct ObjectInner {
    value: Value,
    subscribers: Vec<Subscriber>,
}

/// A registry object.
///
/// Owned exclusively by the registry; sessions hold `Arc` lookups whose
/// lifetime is always shorter than the object's. Change callbacks are
/// unhooked via [`KazaObject::unsubscribe`] before a session drops.
pub struct KazaObject {
    name: String,
    unit: String,
    inner: Mutex<ObjectInner>,
    persist: Option<Arc<dyn SettingsStore>>,
}

impl KazaObject {
    /// Plain object with no persistence hook.
    #[must_use]
    pub fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            inner: Mutex::new(ObjectInner {
                value: Value::Invalid,
                subscribers: Vec::new(),
            }),
            persist: None,
        }
    }

    /// Internal object: re-hydrates from `store` now and persists every
    /// accepted change hereafter.
    #[must_use]
    pub fn new_internal(
        name: impl Into<String>,
        unit: impl Into<String>,
        store: Arc<dyn SettingsStore>,
    ) -> Self {
        let name = name.into();
        let value = match store.get(&name) {
            Ok(Some(previous)) => previous,
            Ok(None) => Value::Invalid,
            Err(e) => {
                tracing::warn!("cannot re-hydrate internal object {name}: {e}");
                Value::Invalid
            }
        };

        Self {
            name,
            unit: unit.into(),
            inner: Mutex::new(ObjectInner {
                value,
                subscribers: Vec::new(),
            }),
            persist: Some(store),
        }
    }

    /// Registry name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unit string, possibly empty.
    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Current value.
    #[must_use]
    pub fn value(&self) -> Value {
        self.inner.lock().value.clone()
    }

    /// Apply a value change and fan it out.
    ///
    /// When the value actually changes every subscriber receives one
    /// [`ObjectChange`]. When it does not but `confirm` was requested,
    /// only the originating session receives the echo; the other
    /// subscribers saw no change.
    pub fn change_value(&self, value: Value, confirm: bool, origin: Option<u64>) {
        let to_persist;
        {
            let mut inner = self.inner.lock();
            let changed = inner.value != value;

            if changed {
                inner.value = value.clone();
            } else if !confirm {
                return;
            }

            let change = ObjectChange {
                name: self.name.clone(),
                value,
                confirm,
                origin,
            };

            if changed {
                inner
                    .subscribers
                    .retain(|sub| sub.tx.send(change.clone()).is_ok());
            } else {
                // Idempotent confirmed write: echo to the origin only.
                for sub in &inner.subscribers {
                    if Some(sub.session) == origin {
                        let _ = sub.tx.send(change.clone());
                    }
                }
            }

            to_persist = changed.then(|| inner.value.clone());
        }

        if let (Some(value), Some(store)) = (to_persist, self.persist.as_ref()) {
            if let Err(e) = store.put(&self.name, &value) {
                tracing::warn!("cannot persist internal object {}: {e}", self.name);
            }
        }
    }

    /// Convenience for local producers: unconfirmed change with no origin.
    pub fn set_value(&self, value: Value) {
        self.change_value(value, false, None);
    }

    /// Hook a session's change channel onto this object. A session already
    /// subscribed keeps its original hook.
    pub fn subscribe(&self, session: u64, tx: mpsc::UnboundedSender<ObjectChange>) {
        let mut inner = self.inner.lock();
        if inner.subscribers.iter().any(|sub| sub.session == session) {
            return;
        }
        inner.subscribers.push(Subscriber { session, tx });
    }

    /// Unhook a session's change channel. Called at session teardown to
    /// break the object → session reference before the session drops.
    pub fn unsubscribe(&self, session: u64) {
        self.inner
            .lock()
            .subscribers
            .retain(|sub| sub.session != session);
    }

    /// Number of live subscriptions (test observability).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

impl std::fmt::Debug for KazaObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KazaObject")
            .field("name", &self.name)
            .field("unit", &self.unit)
            .field("value", &self.value())
            .field("internal", &self.persist.is_some())
            .finish()
    }
}
