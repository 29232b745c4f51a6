//! Protocol session state machine and subscription engine.
//!
//! One `Session` per accepted main-port connection. It is sans-IO in the
//! action style: frame in, `Vec<SessionAction>` out, and the transport
//! glue in `lib.rs` executes the actions. Registry interactions (lookup,
//! subscribe) happen inline, since they are lock-guarded memory
//! operations, while anything that suspends (bundle read, SQL, outbound
//! sockets) is delegated to the glue through an action.
//!
//! # State machine
//!
//! ```text
//! [AwaitVersion] --VERSION, major ok--> [Ready]
//!                --VERSION, major bad--> send VERSION_BAD, 1s, close
//!                --anything else------> close
//! [Ready]        --frame--> [Ready] | (on violation) close
//! ```

use std::{io::Write as _, sync::Arc};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::{Compression, write::ZlibEncoder};
use kaza_proto::{Frame, PROTOCOL_MAJOR, Value};
use tokio::sync::mpsc;

use crate::{
    bundle::AppBundle,
    object::{KazaObject, ObjectChange},
    registry::ObjectRegistry,
};

/// Actions the transport glue executes on behalf of the state machine.
#[derive(Debug)]
pub enum SessionAction {
    /// Queue a frame on the session's outbound queue.
    Send(Frame),
    /// Close the connection now.
    Close {
        /// Human-readable reason for the log.
        reason: String,
    },
    /// Close after the version-rejection grace delay (1 s).
    DelayedClose {
        /// Human-readable reason for the log.
        reason: String,
    },
    /// Execute SQL through the bridge; reply DB_RESULT on success, stay
    /// silent on error.
    RunDbQuery {
        /// Correlation id echoed in the DB_RESULT frame.
        id: u32,
        /// SQL text, executed verbatim.
        sql: String,
    },
    /// Read the application bundle and send it as a FILE frame; close on
    /// read failure.
    SendAppBundle,
    /// Open a proxied outbound TCP socket.
    ProxyConnect {
        /// Session-local socket id.
        id: u16,
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
    },
    /// Forward bytes to a proxied socket.
    ProxyData {
        /// Session-local socket id.
        id: u16,
        /// Raw bytes.
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    AwaitVersion,
    Ready,
}

/// Peer identity stashed during version negotiation.
#[derive(Debug, Clone, Default)]
pub struct PeerIdentity {
    /// Username announced in the VERSION frame.
    pub user: String,
    /// Device name announced in the VERSION frame.
    pub device: String,
    /// Channel discriminator announced in the VERSION frame.
    pub channel: u32,
}

/// Per-connection protocol state.
pub struct Session {
    id: u64,
    state: SessionState,
    identity: PeerIdentity,
    registry: Arc<ObjectRegistry>,
    bundle: Arc<AppBundle>,
    /// name → object, the session's lookup references.
    objects: std::collections::HashMap<String, Arc<KazaObject>>,
    /// name → session-local 16-bit index. Stable for the session's life.
    ids: std::collections::HashMap<String, u16>,
    /// Reverse of `ids`.
    names: std::collections::HashMap<u16, String>,
    dmz: bool,
    next_dmz_index: u16,
    change_tx: mpsc::UnboundedSender<ObjectChange>,
    added_tx: mpsc::UnboundedSender<Arc<KazaObject>>,
}

impl Session {
    /// New session in the await-version state.
    ///
    /// `change_tx` receives per-object change events, `added_tx` receives
    /// late registrations once DMZ is enabled; the owning task drains the
    /// paired receivers.
    pub fn new(
        id: u64,
        registry: Arc<ObjectRegistry>,
        bundle: Arc<AppBundle>,
        change_tx: mpsc::UnboundedSender<ObjectChange>,
        added_tx: mpsc::UnboundedSender<Arc<KazaObject>>,
    ) -> Self {
        Self {
            id,
            state: SessionState::AwaitVersion,
            identity: PeerIdentity::default(),
            registry,
            bundle,
            objects: std::collections::HashMap::new(),
            ids: std::collections::HashMap::new(),
            names: std::collections::HashMap::new(),
            dmz: false,
            next_dmz_index: 0,
            change_tx,
            added_tx,
        }
    }

    /// Session id assigned by the connection manager.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Peer identity. Empty until version negotiation completes.
    #[must_use]
    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    /// Whether version negotiation has completed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Session-local index bound to an object name, if subscribed.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<u16> {
        self.ids.get(name).copied()
    }

    /// Process one inbound frame.
    pub fn handle_frame(&mut self, frame: Frame) -> Vec<SessionAction> {
        match self.state {
            SessionState::AwaitVersion => self.handle_await_version(frame),
            SessionState::Ready => self.handle_ready(frame),
        }
    }

    fn handle_await_version(&mut self, frame: Frame) -> Vec<SessionAction> {
        let Frame::Version {
            major,
            minor,
            user,
            device,
            channel,
        } = frame
        else {
            return vec![SessionAction::Close {
                reason: "frame before version negotiation".to_string(),
            }];
        };

        if major != PROTOCOL_MAJOR {
            let reason = format!("unsupported protocol version {major}.{minor}");
            tracing::warn!("session {}: {reason}", self.id);
            return vec![
                SessionAction::Send(Frame::VersionBad {
                    reason: Some(reason.clone()),
                }),
                SessionAction::DelayedClose { reason },
            ];
        }

        self.identity = PeerIdentity {
            user,
            device,
            channel,
        };
        self.state = SessionState::Ready;
        tracing::info!(
            "session {}: {} connected from {} (channel {}, protocol {major}.{minor})",
            self.id,
            self.identity.user,
            self.identity.device,
            self.identity.channel,
        );

        vec![
            SessionAction::Send(Frame::VersionOk { reason: None }),
            SessionAction::Send(Frame::Command(format!("APP:{}", self.bundle.checksum()))),
        ]
    }

    fn handle_ready(&mut self, frame: Frame) -> Vec<SessionAction> {
        match frame {
            Frame::Command(text) => self.handle_command(&text),
            Frame::Object { id, value, confirm } => {
                self.handle_object_write(id, value, confirm);
                Vec::new()
            }
            Frame::DbQuery { id, sql } => vec![SessionAction::RunDbQuery { id, sql }],
            Frame::SockConnect { id, host, port } => {
                vec![SessionAction::ProxyConnect { id, host, port }]
            }
            Frame::SockData { id, data } => vec![SessionAction::ProxyData { id, data }],
            other => vec![SessionAction::Close {
                reason: format!("unexpected {:?} frame from client", other.kind()),
            }],
        }
    }

    fn handle_command(&mut self, text: &str) -> Vec<SessionAction> {
        let (verb, args) = text.split_once(':').map_or((text, ""), |(v, a)| (v, a));

        match verb {
            "APP?" => vec![SessionAction::SendAppBundle],
            "OBJLIST?" => vec![SessionAction::Send(Frame::ObjectList(
                self.registry.snapshot(),
            ))],
            "OBJ" => self.handle_subscribe(args),
            "DMZ" => {
                self.enable_dmz();
                vec![SessionAction::Send(Frame::Command("DMZ:OK".to_string()))]
            }
            "LISTOBJECTS" => vec![SessionAction::Send(Frame::Command(format!(
                "LISTOBJECTS:{}",
                self.registry.keys().join(",")
            )))],
            "ALARMS" => self.handle_alarms(),
            "PING" => vec![SessionAction::Send(Frame::Command("PONG".to_string()))],
            // Server-originated verbs; ignored when echoed back by a client.
            "NOTIFY" | "POSITION?" => {
                tracing::debug!("session {}: ignoring server-originated {verb}", self.id);
                Vec::new()
            }
            _ => {
                tracing::warn!("session {}: unknown command {text}", self.id);
                Vec::new()
            }
        }
    }

    /// `OBJ:name:index`: explicit subscription.
    fn handle_subscribe(&mut self, args: &str) -> Vec<SessionAction> {
        let Some((name, index_text)) = args.split_once(':') else {
            tracing::warn!("session {}: malformed OBJ command: {args}", self.id);
            return Vec::new();
        };
        let Ok(index) = index_text.parse::<u16>() else {
            tracing::warn!("session {}: bad OBJ index: {index_text}", self.id);
            return Vec::new();
        };

        let bound_index = if let Some(&existing) = self.ids.get(name) {
            // Re-subscription keeps the original index; the binding is
            // stable for the session's lifetime.
            existing
        } else {
            let Some(object) = self.registry.lookup(name) else {
                tracing::warn!("session {}: can't find object {name}", self.id);
                return Vec::new();
            };
            if self.names.contains_key(&index) {
                tracing::warn!("session {}: index {index} already bound", self.id);
                return Vec::new();
            }
            self.bind(&object, index);
            index
        };

        let object = &self.objects[name];
        let mut actions = vec![SessionAction::Send(Frame::Command(format!(
            "OBJDESC:{name}:{}",
            object.unit()
        )))];

        let value = object.value();
        if value.is_valid() {
            actions.push(SessionAction::Send(Frame::Object {
                id: bound_index,
                value,
                confirm: false,
            }));
        }
        actions
    }

    /// `DMZ`: subscribe to everything, present and future.
    ///
    /// The watcher is registered before the catch-up pass so a racing
    /// registration is seen either here or on the added channel; the
    /// duplicate guard in [`Session::bind_dmz`] makes the overlap benign.
    fn enable_dmz(&mut self) {
        if self.dmz {
            return;
        }
        self.dmz = true;
        self.registry
            .add_dmz_watcher(self.id, self.added_tx.clone());
        for object in self.registry.objects() {
            self.bind_dmz(&object);
        }
    }

    /// Late registry arrival delivered on the added channel. Subscribes
    /// and pushes the initial value when one exists.
    pub fn object_added(&mut self, object: &Arc<KazaObject>) -> Option<Frame> {
        if !self.dmz {
            return None;
        }
        let index = self.bind_dmz(object)?;
        let value = object.value();
        value.is_valid().then_some(Frame::Object {
            id: index,
            value,
            confirm: false,
        })
    }

    /// A change event from one of this session's subscribed objects,
    /// rendered as the OBJECT frame to push, or `None` when the event
    /// does not concern this session.
    pub fn object_changed(&self, change: &ObjectChange) -> Option<Frame> {
        let id = self.index_of(&change.name)?;
        Some(Frame::Object {
            id,
            value: change.value.clone(),
            confirm: change.confirm && change.origin == Some(self.id),
        })
    }

    fn handle_object_write(&mut self, id: u16, value: Value, confirm: bool) {
        let Some(name) = self.names.get(&id) else {
            tracing::warn!("session {}: can't find object with id {id}", self.id);
            return;
        };
        let Some(object) = self.objects.get(name) else {
            tracing::warn!("session {}: stale subscription for {name}", self.id);
            return;
        };
        object.change_value(value, confirm, Some(self.id));
    }

    fn handle_alarms(&self) -> Vec<SessionAction> {
        let digest = self.registry.alarms_digest();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        if let Err(e) = encoder.write_all(digest.as_bytes()) {
            tracing::error!("session {}: cannot compress alarms digest: {e}", self.id);
            return Vec::new();
        }
        let compressed = match encoder.finish() {
            Ok(compressed) => compressed,
            Err(e) => {
                tracing::error!("session {}: cannot compress alarms digest: {e}", self.id);
                return Vec::new();
            }
        };
        vec![SessionAction::Send(Frame::Command(format!(
            "ALARM:{}",
            BASE64.encode(compressed)
        )))]
    }

    fn bind(&mut self, object: &Arc<KazaObject>, index: u16) {
        object.subscribe(self.id, self.change_tx.clone());
        self.objects
            .insert(object.name().to_string(), object.clone());
        self.ids.insert(object.name().to_string(), index);
        self.names.insert(index, object.name().to_string());
    }

    /// Subscribe with the next free sequential index. `None` when already
    /// subscribed or no index is free.
    fn bind_dmz(&mut self, object: &Arc<KazaObject>) -> Option<u16> {
        if self.ids.contains_key(object.name()) {
            return None;
        }
        let index = self.alloc_index()?;
        self.bind(object, index);
        Some(index)
    }

    fn alloc_index(&mut self) -> Option<u16> {
        // Skip indices the client chose for explicit subscriptions.
        while self.names.contains_key(&self.next_dmz_index) {
            self.next_dmz_index = self.next_dmz_index.checked_add(1)?;
        }
        let index = self.next_dmz_index;
        self.next_dmz_index = self.next_dmz_index.checked_add(1).unwrap_or(u16::MAX);
        Some(index)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("user", &self.identity.user)
            .field("subscriptions", &self.ids.len())
            .field("dmz", &self.dmz)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        registry: Arc<ObjectRegistry>,
        session: Session,
        change_rx: mpsc::UnboundedReceiver<ObjectChange>,
        added_rx: mpsc::UnboundedReceiver<Arc<KazaObject>>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ObjectRegistry::new());
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let (added_tx, added_rx) = mpsc::unbounded_channel();
        let session = Session::new(
            1,
            registry.clone(),
            Arc::new(AppBundle::load(None)),
            change_tx,
            added_tx,
        );
        Fixture {
            registry,
            session,
            change_rx,
            added_rx,
        }
    }

    fn version_frame() -> Frame {
        Frame::Version {
            major: PROTOCOL_MAJOR,
            minor: 0,
            user: "alice".to_string(),
            device: "phone".to_string(),
            channel: 7,
        }
    }

    fn negotiate(session: &mut Session) {
        let actions = session.handle_frame(version_frame());
        assert!(matches!(
            actions[0],
            SessionAction::Send(Frame::VersionOk { .. })
        ));
    }

    fn register(registry: &ObjectRegistry, name: &str, unit: &str, value: Value) -> Arc<KazaObject> {
        let object = Arc::new(KazaObject::new(name, unit));
        object.set_value(value);
        registry.register(object.clone()).unwrap();
        object
    }

    #[test]
    fn version_handshake_greets_with_app_checksum() {
        let mut fx = fixture();
        let actions = fx.session.handle_frame(version_frame());

        assert!(matches!(
            actions[0],
            SessionAction::Send(Frame::VersionOk { .. })
        ));
        assert!(
            matches!(&actions[1], SessionAction::Send(Frame::Command(c)) if c.starts_with("APP:"))
        );
        assert!(fx.session.is_ready());
        assert_eq!(fx.session.identity().user, "alice");
        assert_eq!(fx.session.identity().channel, 7);
    }

    #[test]
    fn major_mismatch_sends_version_bad_then_delayed_close() {
        let mut fx = fixture();
        let actions = fx.session.handle_frame(Frame::Version {
            major: PROTOCOL_MAJOR + 1,
            minor: 0,
            user: "alice".to_string(),
            device: "phone".to_string(),
            channel: 0,
        });

        assert!(matches!(
            actions[0],
            SessionAction::Send(Frame::VersionBad { .. })
        ));
        assert!(matches!(actions[1], SessionAction::DelayedClose { .. }));
        assert!(!fx.session.is_ready());
    }

    #[test]
    fn minor_mismatch_is_accepted() {
        let mut fx = fixture();
        let actions = fx.session.handle_frame(Frame::Version {
            major: PROTOCOL_MAJOR,
            minor: 99,
            user: "alice".to_string(),
            device: "phone".to_string(),
            channel: 0,
        });
        assert!(matches!(
            actions[0],
            SessionAction::Send(Frame::VersionOk { .. })
        ));
    }

    #[test]
    fn any_frame_before_version_closes() {
        let mut fx = fixture();
        let actions = fx.session.handle_frame(Frame::Command("PING".to_string()));
        assert!(matches!(actions[0], SessionAction::Close { .. }));
    }

    #[test]
    fn subscribe_replies_objdesc_and_initial_value() {
        let fx = &mut fixture();
        register(&fx.registry, "temp", "°C", Value::Double(22.5));
        negotiate(&mut fx.session);

        let actions = fx
            .session
            .handle_frame(Frame::Command("OBJ:temp:0".to_string()));

        assert!(
            matches!(&actions[0], SessionAction::Send(Frame::Command(c)) if c == "OBJDESC:temp:°C")
        );
        assert!(matches!(
            &actions[1],
            SessionAction::Send(Frame::Object {
                id: 0,
                value: Value::Double(_),
                confirm: false
            })
        ));
        assert_eq!(fx.session.index_of("temp"), Some(0));
    }

    #[test]
    fn subscribe_invalid_value_skips_initial_frame() {
        let fx = &mut fixture();
        register(&fx.registry, "temp", "°C", Value::Invalid);
        negotiate(&mut fx.session);

        let actions = fx
            .session
            .handle_frame(Frame::Command("OBJ:temp:0".to_string()));
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn resubscribe_keeps_original_index() {
        let fx = &mut fixture();
        let object = register(&fx.registry, "temp", "°C", Value::Double(1.0));
        negotiate(&mut fx.session);

        fx.session
            .handle_frame(Frame::Command("OBJ:temp:3".to_string()));
        let actions = fx
            .session
            .handle_frame(Frame::Command("OBJ:temp:9".to_string()));

        // Index stability: the second subscribe must not rebind.
        assert_eq!(fx.session.index_of("temp"), Some(3));
        assert!(matches!(
            &actions[1],
            SessionAction::Send(Frame::Object { id: 3, .. })
        ));
        assert_eq!(object.subscriber_count(), 1);
    }

    #[test]
    fn unknown_object_subscription_is_dropped() {
        let fx = &mut fixture();
        negotiate(&mut fx.session);
        let actions = fx
            .session
            .handle_frame(Frame::Command("OBJ:ghost:0".to_string()));
        assert!(actions.is_empty());
    }

    #[test]
    fn object_write_updates_and_fans_out() {
        let fx = &mut fixture();
        let object = register(&fx.registry, "temp", "°C", Value::Double(22.5));
        negotiate(&mut fx.session);
        fx.session
            .handle_frame(Frame::Command("OBJ:temp:0".to_string()));

        fx.session.handle_frame(Frame::Object {
            id: 0,
            value: Value::Double(24.0),
            confirm: true,
        });

        assert_eq!(object.value(), Value::Double(24.0));

        // The session's own change channel received the event; rendering
        // it yields the confirm echo because this session originated it.
        let change = fx.change_rx.try_recv().unwrap();
        let frame = fx.session.object_changed(&change).unwrap();
        assert_eq!(
            frame,
            Frame::Object {
                id: 0,
                value: Value::Double(24.0),
                confirm: true
            }
        );
    }

    #[test]
    fn foreign_write_renders_unconfirmed() {
        let fx = &mut fixture();
        register(&fx.registry, "temp", "°C", Value::Double(22.5));
        negotiate(&mut fx.session);
        fx.session
            .handle_frame(Frame::Command("OBJ:temp:4".to_string()));

        let change = ObjectChange {
            name: "temp".to_string(),
            value: Value::Double(24.0),
            confirm: true,
            origin: Some(99),
        };
        assert_eq!(
            fx.session.object_changed(&change),
            Some(Frame::Object {
                id: 4,
                value: Value::Double(24.0),
                confirm: false
            })
        );
    }

    #[test]
    fn unknown_write_id_is_dropped() {
        let fx = &mut fixture();
        let object = register(&fx.registry, "temp", "°C", Value::Double(22.5));
        negotiate(&mut fx.session);

        fx.session.handle_frame(Frame::Object {
            id: 42,
            value: Value::Double(0.0),
            confirm: false,
        });
        assert_eq!(object.value(), Value::Double(22.5));
    }

    #[test]
    fn dmz_subscribes_everything_with_sequential_indices() {
        let fx = &mut fixture();
        register(&fx.registry, "a", "", Value::Int(1));
        register(&fx.registry, "b", "", Value::Int(2));
        negotiate(&mut fx.session);

        let actions = fx.session.handle_frame(Frame::Command("DMZ".to_string()));
        assert!(matches!(&actions[0], SessionAction::Send(Frame::Command(c)) if c == "DMZ:OK"));
        assert_eq!(fx.session.index_of("a"), Some(0));
        assert_eq!(fx.session.index_of("b"), Some(1));
    }

    #[test]
    fn dmz_skips_explicitly_bound_indices() {
        let fx = &mut fixture();
        register(&fx.registry, "a", "", Value::Int(1));
        register(&fx.registry, "b", "", Value::Int(2));
        negotiate(&mut fx.session);

        fx.session.handle_frame(Frame::Command("OBJ:b:0".to_string()));
        fx.session.handle_frame(Frame::Command("DMZ".to_string()));

        assert_eq!(fx.session.index_of("b"), Some(0));
        assert_eq!(fx.session.index_of("a"), Some(1));
    }

    #[test]
    fn dmz_auto_subscribes_late_registration() {
        let fx = &mut fixture();
        negotiate(&mut fx.session);
        fx.session.handle_frame(Frame::Command("DMZ".to_string()));

        let late = register(&fx.registry, "late", "", Value::Int(9));
        // The registry posted the arrival on the added channel; the task
        // loop hands it to the session.
        let delivered = fx.added_rx.try_recv().unwrap();
        assert_eq!(delivered.name(), "late");

        let frame = fx.session.object_added(&delivered);
        assert_eq!(
            frame,
            Some(Frame::Object {
                id: 0,
                value: Value::Int(9),
                confirm: false
            })
        );
        assert_eq!(late.subscriber_count(), 1);
    }

    #[test]
    fn snapshot_command_returns_full_registry() {
        let fx = &mut fixture();
        register(&fx.registry, "a", "", Value::Int(1));
        register(&fx.registry, "b", "u", Value::Invalid);
        negotiate(&mut fx.session);

        let actions = fx
            .session
            .handle_frame(Frame::Command("OBJLIST?".to_string()));
        let [SessionAction::Send(Frame::ObjectList(entries))] = &actions[..] else {
            panic!("expected a single ObjectList send");
        };
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        // Snapshot is not a subscription.
        assert_eq!(fx.session.index_of("a"), None);
    }

    #[test]
    fn listobjects_joins_names() {
        let fx = &mut fixture();
        register(&fx.registry, "a", "", Value::Int(1));
        register(&fx.registry, "b", "", Value::Int(2));
        negotiate(&mut fx.session);

        let actions = fx
            .session
            .handle_frame(Frame::Command("LISTOBJECTS".to_string()));
        assert!(
            matches!(&actions[0], SessionAction::Send(Frame::Command(c)) if c == "LISTOBJECTS:a,b")
        );
    }

    #[test]
    fn ping_pongs() {
        let fx = &mut fixture();
        negotiate(&mut fx.session);
        let actions = fx.session.handle_frame(Frame::Command("PING".to_string()));
        assert!(matches!(&actions[0], SessionAction::Send(Frame::Command(c)) if c == "PONG"));
    }

    #[test]
    fn alarms_digest_is_compressed_base64() {
        use std::io::Read as _;

        let fx = &mut fixture();
        fx.registry.register_alarm(crate::registry::Alarm {
            title: "boiler".to_string(),
            message: "over temperature".to_string(),
            enable: true,
            admin: false,
            debug: false,
        });
        negotiate(&mut fx.session);

        let actions = fx
            .session
            .handle_frame(Frame::Command("ALARMS:alice".to_string()));
        let [SessionAction::Send(Frame::Command(reply))] = &actions[..] else {
            panic!("expected a single command reply");
        };
        let encoded = reply.strip_prefix("ALARM:").unwrap();
        let compressed = BASE64.decode(encoded).unwrap();
        let mut digest = String::new();
        flate2::read::ZlibDecoder::new(compressed.as_slice())
            .read_to_string(&mut digest)
            .unwrap();
        assert_eq!(digest, "boiler: over temperature");
    }

    #[test]
    fn db_query_delegates_to_bridge() {
        let fx = &mut fixture();
        negotiate(&mut fx.session);
        let actions = fx.session.handle_frame(Frame::DbQuery {
            id: 11,
            sql: "SELECT 1".to_string(),
        });
        assert!(
            matches!(&actions[0], SessionAction::RunDbQuery { id: 11, sql } if sql == "SELECT 1")
        );
    }

    #[test]
    fn server_only_frame_from_client_closes() {
        let fx = &mut fixture();
        negotiate(&mut fx.session);
        let actions = fx.session.handle_frame(Frame::VersionOk { reason: None });
        assert!(matches!(actions[0], SessionAction::Close { .. }));
    }
}
