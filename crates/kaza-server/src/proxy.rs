//! Proxied-socket multiplexer.
//!
//! A session may ask the server to open outbound TCP sockets and tunnel
//! bytes both ways through SOCK_DATA frames. Each socket runs as its own
//! task pumping between the TCP stream and the session's outbound frame
//! queue; the per-socket inbound channel carries client → socket bytes.
//!
//! There is no authorization beyond "the session is authenticated"; this
//! exists for administrative tunnelling.

use std::collections::HashMap;

use kaza_proto::{Frame, SocketState};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
};

/// Per-session table of proxied sockets.
///
/// Dropping the table closes every socket task: their inbound channels
/// hang up, and the tasks exit on the next poll.
#[derive(Debug)]
pub struct ProxyTable {
    session: u64,
    outbound: mpsc::UnboundedSender<Frame>,
    socks: HashMap<u16, mpsc::UnboundedSender<Vec<u8>>>,
}

impl ProxyTable {
    /// New empty table bound to a session's outbound frame queue.
    #[must_use]
    pub fn new(session: u64, outbound: mpsc::UnboundedSender<Frame>) -> Self {
        Self {
            session,
            outbound,
            socks: HashMap::new(),
        }
    }

    /// SOCK_CONNECT: open an outbound socket under `id`.
    ///
    /// A duplicate id is logged and dropped, per the protocol contract.
    pub fn connect(&mut self, id: u16, host: String, port: u16) {
        if self.socks.contains_key(&id) {
            tracing::warn!("session {}: duplicate proxied socket id {id}", self.session);
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.socks.insert(id, tx);

        let outbound = self.outbound.clone();
        let session = self.session;
        tokio::spawn(async move {
            run_socket(session, id, host, port, rx, outbound).await;
        });
    }

    /// SOCK_DATA client → server: forward bytes to the named socket.
    pub fn send(&mut self, id: u16, data: Vec<u8>) {
        match self.socks.get(&id) {
            Some(tx) => {
                if tx.send(data).is_err() {
                    tracing::debug!(
                        "session {}: write to finished proxied socket {id}",
                        self.session
                    );
                }
            }
            None => {
                tracing::warn!("session {}: unknown proxied socket id {id}", self.session);
            }
        }
    }
}

/// One proxied socket: connect, report state, pump until either side ends.
async fn run_socket(
    session: u64,
    id: u16,
    host: String,
    port: u16,
    mut inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    outbound: mpsc::UnboundedSender<Frame>,
) {
    let stream = match TcpStream::connect((host.as_str(), port)).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!("session {session}: proxied connect {host}:{port} failed: {e}");
            let _ = outbound.send(Frame::SockState {
                id,
                state: SocketState::Error,
            });
            return;
        }
    };

    let _ = outbound.send(Frame::SockState {
        id,
        state: SocketState::Connected,
    });

    let (mut read_half, mut write_half) = stream.into_split();
    let mut buf = vec![0u8; 16 * 1024];

    let final_state = loop {
        tokio::select! {
            data = inbound.recv() => match data {
                Some(data) => {
                    if let Err(e) = write_half.write_all(&data).await {
                        tracing::debug!("session {session}: proxied socket {id} write: {e}");
                        break SocketState::Error;
                    }
                }
                // Session went away; nobody is listening for the state.
                None => return,
            },
            read = read_half.read(&mut buf) => match read {
                Ok(0) => break SocketState::Disconnected,
                Ok(n) => {
                    let _ = outbound.send(Frame::SockData {
                        id,
                        data: buf[..n].to_vec(),
                    });
                }
                Err(e) => {
                    tracing::debug!("session {session}: proxied socket {id} read: {e}");
                    break SocketState::Error;
                }
            },
        }
    };

    let _ = outbound.send(Frame::SockState {
        id,
        state: final_state,
    });
}
