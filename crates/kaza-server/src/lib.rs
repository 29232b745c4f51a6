//! KaZa production server.
//!
//! Publishes a registry of named, typed variables to authenticated
//! clients over mutual TLS, accepts value writes back, and runs a
//! secondary control port for administration and credential provisioning.
//!
//! # Architecture
//!
//! The per-connection protocol logic lives in [`Session`], a sans-IO
//! state machine producing [`SessionAction`]s; this crate root is the
//! production glue that executes those actions with real sockets. One
//! tokio task per connection reads frames, a paired writer task drains
//! the session's unbounded outbound queue (the backpressure point), and
//! object changes arrive on per-session channels so a writer never blocks
//! on a slow consumer.
//!
//! # Components
//!
//! - [`ObjectRegistry`]: process-wide name → object mapping
//! - [`Session`]: version negotiation, dispatch, subscriptions
//! - [`ConnectionManager`]: session table + broadcast helpers
//! - control module: text protocol + provisioning
//! - [`CertificateAuthority`]: embedded mini-PKI
//! - [`ProxyTable`]: proxied-socket multiplexer

mod bundle;
mod config;
mod control;
mod db;
mod error;
mod manager;
mod object;
mod pki;
mod proxy;
mod registry;
mod session;
mod settings;
mod transport;

use std::{path::Path, sync::Arc, time::Duration};

pub use bundle::AppBundle;
pub use self::config::{ControlSettings, DbSettings, DEFAULT_SSL_PORT, Settings, SslSettings};
pub use control::{ControlContext, ControlReply, process_line};
pub use db::{DbError, DbRows, DisabledSqlBridge, SqlBridge};
pub use error::ServerError;
use kaza_proto::{Frame, FrameDecoder};
pub use manager::ConnectionManager;
pub use object::{KazaObject, ObjectChange};
pub use pki::{CertificateAuthority, PkiError};
pub use proxy::ProxyTable;
pub use registry::{Alarm, ObjectRegistry, RegistryError};
pub use session::{PeerIdentity, Session, SessionAction};
pub use settings::{MemorySettings, RedbSettings, SettingsError, SettingsStore};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_rustls::TlsAcceptor;
pub use transport::{TlsAcceptors, build_acceptors};

/// Grace delay between VERSION_BAD and closing the socket, the only
/// deliberate server-initiated delay.
const VERSION_REJECT_GRACE: Duration = Duration::from_secs(1);

/// Shared state every connection task sees.
struct SharedState {
    registry: Arc<ObjectRegistry>,
    manager: Arc<ConnectionManager>,
    bundle: Arc<AppBundle>,
    sql: Arc<dyn SqlBridge>,
}

/// The bound production server.
pub struct Server {
    settings: Settings,
    state: Arc<SharedState>,
    store: Arc<dyn SettingsStore>,
    pki: CertificateAuthority,
    acceptors: TlsAcceptors,
    main_listener: TcpListener,
    control_listener: Option<TcpListener>,
}

impl Server {
    /// Ensure credentials, build TLS configurations, and bind both
    /// listeners. Everything that can fail fatally fails here, before
    /// the supervisor is told we are ready.
    pub async fn bind(
        settings: Settings,
        base_dir: &Path,
        registry: Arc<ObjectRegistry>,
        store: Arc<dyn SettingsStore>,
        sql: Arc<dyn SqlBridge>,
    ) -> Result<Self, ServerError> {
        let pki = CertificateAuthority::new(base_dir);
        pki.ensure_server_credentials(&settings.ssl.hostname, &settings.ssl.keypassword)?;
        let acceptors = build_acceptors(&pki, &settings.ssl.keypassword)?;

        let main_listener = TcpListener::bind(("0.0.0.0", settings.ssl.port)).await?;
        tracing::info!(
            "SSL server listening on {}",
            main_listener.local_addr()?
        );

        let control_listener = match (settings.control.enable, settings.control.port) {
            (true, Some(port)) => {
                let listener = TcpListener::bind(("0.0.0.0", port)).await?;
                tracing::info!(
                    "SSL control server listening on {}",
                    listener.local_addr()?
                );
                if settings.control.password.is_empty() {
                    tracing::warn!(
                        "control/password is not set; clientconf? will reject every request"
                    );
                }
                Some(listener)
            }
            (true, None) => {
                tracing::warn!("control/enable is set but control/port is not; control disabled");
                None
            }
            (false, _) => {
                tracing::info!("control server disabled (control/enable=false)");
                None
            }
        };

        let bundle = Arc::new(AppBundle::load(settings.app_bundle.clone()));
        let manager = Arc::new(ConnectionManager::new());

        Ok(Self {
            state: Arc::new(SharedState {
                registry,
                manager,
                bundle,
                sql,
            }),
            store,
            pki,
            acceptors,
            main_listener,
            control_listener,
            settings,
        })
    }

    /// Address of the main mTLS listener.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        Ok(self.main_listener.local_addr()?)
    }

    /// Address of the control listener, when enabled.
    pub fn control_addr(&self) -> Option<std::net::SocketAddr> {
        self.control_listener
            .as_ref()
            .and_then(|l| l.local_addr().ok())
    }

    /// The object registry, the integration surface for the external
    /// configuration loader.
    #[must_use]
    pub fn registry(&self) -> Arc<ObjectRegistry> {
        self.state.registry.clone()
    }

    /// The settings store backing internal objects.
    #[must_use]
    pub fn settings_store(&self) -> Arc<dyn SettingsStore> {
        self.store.clone()
    }

    /// The live session table.
    #[must_use]
    pub fn manager(&self) -> Arc<ConnectionManager> {
        self.state.manager.clone()
    }

    /// Accept connections until the process is stopped.
    pub async fn run(self) -> Result<(), ServerError> {
        if let Some(listener) = self.control_listener {
            let ctx = Arc::new(ControlContext {
                registry: self.state.registry.clone(),
                manager: self.state.manager.clone(),
                pki: self.pki.clone(),
                admin_password: self.settings.control.password.clone(),
                ssl_host: self.settings.client_host.clone(),
                ssl_port: self.settings.ssl.port,
            });
            let acceptor = self.acceptors.control.clone();
            tokio::spawn(async move {
                run_control_loop(listener, acceptor, ctx).await;
            });
        }

        loop {
            match self.main_listener.accept().await {
                Ok((stream, peer)) => {
                    let acceptor = self.acceptors.main.clone();
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        handle_client(stream, peer, acceptor, state).await;
                    });
                }
                Err(e) => {
                    tracing::warn!("accept error: {e}");
                }
            }
        }
    }
}

/// One main-port connection: TLS handshake, session loop, teardown.
async fn handle_client(
    stream: TcpStream,
    peer: std::net::SocketAddr,
    acceptor: TlsAcceptor,
    state: Arc<SharedState>,
) {
    let tls = match acceptor.accept(stream).await {
        Ok(tls) => tls,
        Err(e) => {
            tracing::warn!("TLS handshake with {peer} failed: {e}");
            return;
        }
    };

    let session_id = state.manager.next_session_id();
    tracing::debug!("session {session_id}: accepted from {peer}");

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
    let (change_tx, mut change_rx) = mpsc::unbounded_channel::<ObjectChange>();
    let (added_tx, mut added_rx) = mpsc::unbounded_channel::<Arc<KazaObject>>();

    state.manager.register(session_id, outbound_tx.clone());

    let mut session = Session::new(
        session_id,
        state.registry.clone(),
        state.bundle.clone(),
        change_tx,
        added_tx,
    );

    let (mut reader, mut writer) = tokio::io::split(tls);

    // Single writer task per connection serialises all outbound frames.
    let mut writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let bytes = match frame.to_bytes() {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!("cannot encode outbound frame: {e}");
                    continue;
                }
            };
            if writer.write_all(&bytes).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut proxy = ProxyTable::new(session_id, outbound_tx.clone());
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; 16 * 1024];

    let close_reason = loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break "peer closed".to_string(),
                Ok(n) => {
                    decoder.extend(&buf[..n]);
                    if let Some(reason) =
                        drain_frames(&mut decoder, &mut session, &mut proxy, &outbound_tx, &state)
                            .await
                    {
                        break reason;
                    }
                }
                Err(e) => break format!("read error: {e}"),
            },
            Some(change) = change_rx.recv() => {
                if let Some(frame) = session.object_changed(&change) {
                    let _ = outbound_tx.send(frame);
                }
            }
            Some(object) = added_rx.recv() => {
                if let Some(frame) = session.object_added(&object) {
                    let _ = outbound_tx.send(frame);
                }
            }
        }
    };

    tracing::info!("session {session_id} closed: {close_reason}");

    // Break the object → session cycle before the session drops, then
    // let the writer drain and exit.
    state.registry.remove_session(session_id);
    state.manager.unregister(session_id);
    drop(proxy);
    drop(outbound_tx);
    if tokio::time::timeout(Duration::from_secs(5), &mut writer_task)
        .await
        .is_err()
    {
        writer_task.abort();
    }
}

/// Decode and dispatch every complete frame in the buffer. Returns a
/// close reason when the session must end.
async fn drain_frames(
    decoder: &mut FrameDecoder,
    session: &mut Session,
    proxy: &mut ProxyTable,
    outbound: &mpsc::UnboundedSender<Frame>,
    state: &Arc<SharedState>,
) -> Option<String> {
    loop {
        let frame = match decoder.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return None,
            Err(e) => return Some(format!("protocol error: {e}")),
        };

        let was_ready = session.is_ready();
        let actions = session.handle_frame(frame);
        if !was_ready && session.is_ready() {
            state
                .manager
                .set_user(session.id(), &session.identity().user);
        }

        for action in actions {
            match action {
                SessionAction::Send(frame) => {
                    let _ = outbound.send(frame);
                }
                SessionAction::Close { reason } => return Some(reason),
                SessionAction::DelayedClose { reason } => {
                    tokio::time::sleep(VERSION_REJECT_GRACE).await;
                    return Some(reason);
                }
                SessionAction::RunDbQuery { id, sql } => {
                    let bridge = state.sql.clone();
                    let outbound = outbound.clone();
                    tokio::spawn(async move {
                        match bridge.query(&sql).await {
                            Ok(rows) => {
                                let _ = outbound.send(Frame::DbResult {
                                    id,
                                    columns: rows.columns,
                                    rows: rows.rows,
                                });
                            }
                            // Per the error policy: log, send nothing.
                            Err(e) => tracing::warn!("QUERY FAIL {sql}: {e}"),
                        }
                    });
                }
                SessionAction::SendAppBundle => match state.bundle.read().await {
                    Ok(data) => {
                        let _ = outbound.send(Frame::File {
                            name: "APP".to_string(),
                            data,
                        });
                    }
                    Err(e) => return Some(format!("application bundle unavailable: {e}")),
                },
                SessionAction::ProxyConnect { id, host, port } => {
                    proxy.connect(id, host, port);
                }
                SessionAction::ProxyData { id, data } => {
                    proxy.send(id, data);
                }
            }
        }
    }
}

/// Accept loop of the control listener.
async fn run_control_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    ctx: Arc<ControlContext>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let acceptor = acceptor.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    handle_control_client(stream, peer, acceptor, ctx).await;
                });
            }
            Err(e) => {
                tracing::warn!("control accept error: {e}");
            }
        }
    }
}

/// One control connection: `\n`-terminated commands, replies inline.
/// Command processing may generate RSA keys, so it runs on the blocking
/// pool.
async fn handle_control_client(
    stream: TcpStream,
    peer: std::net::SocketAddr,
    acceptor: TlsAcceptor,
    ctx: Arc<ControlContext>,
) {
    let tls = match acceptor.accept(stream).await {
        Ok(tls) => tls,
        Err(e) => {
            tracing::warn!("control TLS handshake with {peer} failed: {e}");
            return;
        }
    };
    tracing::debug!("control connection from {peer}");

    let (reader, mut writer) = tokio::io::split(tls);
    let mut lines = tokio::io::BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let blocking_ctx = ctx.clone();
        let reply =
            match tokio::task::spawn_blocking(move || process_line(&line, &blocking_ctx)).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::error!("control command panicked: {e}");
                    break;
                }
            };

        if !reply.text.is_empty() && writer.write_all(reply.text.as_bytes()).await.is_err() {
            break;
        }
        if reply.close {
            break;
        }
    }

    let _ = writer.shutdown().await;
    tracing::debug!("control connection from {peer} closed");
}
