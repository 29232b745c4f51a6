//! Object registry: the process-wide name → object mapping.
//!
//! Insertion order is preserved because clients display the key list
//! unchanged. Registration normally happens at startup from the external
//! configuration loader, rarely later; DMZ sessions learn about late
//! arrivals through per-session watcher channels so a new object reaches
//! every subscribe-all connection without the writer ever blocking.

use std::{collections::HashMap, sync::Arc};

use kaza_proto::ObjectEntry;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::object::KazaObject;

/// An alarm definition, surfaced to clients on demand.
#[derive(Debug, Clone)]
pub struct Alarm {
    /// Short title.
    pub title: String,
    /// Longer message body.
    pub message: String,
    /// Disabled alarms are omitted from the digest.
    pub enable: bool,
    /// Alarm intended for administrators.
    pub admin: bool,
    /// Development-only alarm, omitted from the digest.
    pub debug: bool,
}

/// Errors from registry mutation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// An object with this name is already registered.
    #[error("object name already registered: {0}")]
    DuplicateName(String),
}

#[derive(Default)]
struct RegistryInner {
    objects: Vec<Arc<KazaObject>>,
    index: HashMap<String, usize>,
    alarms: Vec<Alarm>,
    dmz_watchers: HashMap<u64, mpsc::UnboundedSender<Arc<KazaObject>>>,
}

/// Process-wide object registry.
///
/// Constructed once in `main` and shared via `Arc`; readers are every
/// connection, writers are the startup loader and rare late
/// registrations, so a read-write lock fits the access pattern.
#[derive(Default)]
pub struct ObjectRegistry {
    inner: RwLock<RegistryInner>,
}

impl ObjectRegistry {
    /// New empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object, preserving insertion order and informing every
    /// DMZ session of the arrival.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateName`]: names are unique across the
    /// registry.
    pub fn register(&self, object: Arc<KazaObject>) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        let name = object.name().to_string();
        if inner.index.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }

        let slot = inner.objects.len();
        inner.objects.push(object.clone());
        inner.index.insert(name, slot);

        inner
            .dmz_watchers
            .retain(|_, tx| tx.send(object.clone()).is_ok());
        Ok(())
    }

    /// Object by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<KazaObject>> {
        let inner = self.inner.read();
        inner.index.get(name).map(|&slot| inner.objects[slot].clone())
    }

    /// All object names in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .read()
            .objects
            .iter()
            .map(|o| o.name().to_string())
            .collect()
    }

    /// All objects in insertion order (DMZ initial subscription).
    #[must_use]
    pub fn objects(&self) -> Vec<Arc<KazaObject>> {
        self.inner.read().objects.clone()
    }

    /// (name, value, unit) triples for an OBJECT_LIST snapshot, in
    /// insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ObjectEntry> {
        self.inner
            .read()
            .objects
            .iter()
            .map(|o| ObjectEntry {
                name: o.name().to_string(),
                value: o.value(),
                unit: o.unit().to_string(),
            })
            .collect()
    }

    /// Append an alarm to the flat list.
    pub fn register_alarm(&self, alarm: Alarm) {
        self.inner.write().alarms.push(alarm);
    }

    /// All registered alarms.
    #[must_use]
    pub fn alarms(&self) -> Vec<Alarm> {
        self.inner.read().alarms.clone()
    }

    /// Newline-separated digest of enabled, non-debug alarms.
    ///
    /// The admin flag travels with the alarm model but is not enforced
    /// here: the transport has no admin identity.
    #[must_use]
    pub fn alarms_digest(&self) -> String {
        self.inner
            .read()
            .alarms
            .iter()
            .filter(|a| a.enable && !a.debug)
            .map(|a| format!("{}: {}", a.title, a.message))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Hook a DMZ session's watcher channel for future registrations.
    pub fn add_dmz_watcher(&self, session: u64, tx: mpsc::UnboundedSender<Arc<KazaObject>>) {
        self.inner.write().dmz_watchers.insert(session, tx);
    }

    /// Tear down every registry-side hook a closing session holds: its
    /// DMZ watcher and each per-object subscription. Breaks the
    /// object → session reference cycle before the session drops.
    pub fn remove_session(&self, session: u64) {
        let objects = {
            let mut inner = self.inner.write();
            inner.dmz_watchers.remove(&session);
            inner.objects.clone()
        };
        for object in objects {
            object.unsubscribe(session);
        }
    }
}

impl std::fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ObjectRegistry")
            .field("object_count", &inner.objects.len())
            .field("alarm_count", &inner.alarms.len())
            .field("dmz_watcher_count", &inner.dmz_watchers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use kaza_proto::Value;

    use super::*;

    fn alarm(title: &str, enable: bool, debug: bool) -> Alarm {
        Alarm {
            title: title.to_string(),
            message: format!("{title} body"),
            enable,
            admin: false,
            debug,
        }
    }

    #[test]
    fn register_and_lookup() {
        let registry = ObjectRegistry::new();
        registry
            .register(Arc::new(KazaObject::new("temp", "°C")))
            .unwrap();

        assert!(registry.lookup("temp").is_some());
        assert!(registry.lookup("absent").is_none());
    }

    #[test]
    fn duplicate_name_rejected() {
        let registry = ObjectRegistry::new();
        registry
            .register(Arc::new(KazaObject::new("temp", "°C")))
            .unwrap();

        assert_eq!(
            registry.register(Arc::new(KazaObject::new("temp", "K"))),
            Err(RegistryError::DuplicateName("temp".to_string()))
        );
    }

    #[test]
    fn keys_preserve_insertion_order() {
        let registry = ObjectRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry
                .register(Arc::new(KazaObject::new(name, "")))
                .unwrap();
        }
        assert_eq!(registry.keys(), vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn snapshot_contains_exactly_current_keys() {
        let registry = ObjectRegistry::new();
        let temp = Arc::new(KazaObject::new("temp", "°C"));
        temp.set_value(Value::Double(22.5));
        registry.register(temp).unwrap();
        registry
            .register(Arc::new(KazaObject::new("door", "")))
            .unwrap();

        let snapshot = registry.snapshot();
        let names: Vec<_> = snapshot.iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, registry.keys());
        assert_eq!(snapshot[0].value, Value::Double(22.5));
        assert_eq!(snapshot[1].value, Value::Invalid);
    }

    #[test]
    fn dmz_watcher_sees_late_registration() {
        let registry = ObjectRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.add_dmz_watcher(7, tx);

        registry
            .register(Arc::new(KazaObject::new("late", "")))
            .unwrap();

        assert_eq!(rx.try_recv().unwrap().name(), "late");
    }

    #[test]
    fn remove_session_unhooks_everything() {
        let registry = ObjectRegistry::new();
        let obj = Arc::new(KazaObject::new("temp", ""));
        registry.register(obj.clone()).unwrap();

        let (watch_tx, mut watch_rx) = mpsc::unbounded_channel();
        registry.add_dmz_watcher(7, watch_tx);
        let (change_tx, _change_rx) = mpsc::unbounded_channel();
        obj.subscribe(7, change_tx);

        registry.remove_session(7);
        assert_eq!(obj.subscriber_count(), 0);

        registry
            .register(Arc::new(KazaObject::new("later", "")))
            .unwrap();
        assert!(watch_rx.try_recv().is_err());
    }

    #[test]
    fn alarms_digest_filters_disabled_and_debug() {
        let registry = ObjectRegistry::new();
        registry.register_alarm(alarm("boiler", true, false));
        registry.register_alarm(alarm("silent", false, false));
        registry.register_alarm(alarm("devonly", true, true));

        assert_eq!(registry.alarms_digest(), "boiler: boiler body");
        assert_eq!(registry.alarms().len(), 3);
    }
}
