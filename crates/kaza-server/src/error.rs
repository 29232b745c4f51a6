//! Server error types.

use kaza_proto::ProtocolError;

use crate::{pki::PkiError, settings::SettingsError};

/// Errors that can occur in the server.
///
/// `Config` and `Pki` are fatal at startup; the rest are scoped to a
/// single connection or subsystem and never take the process down.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration error (missing hostname, unreadable file, bad key).
    /// Fatal: fix the configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport/network error (bind failure, TLS setup, socket I/O).
    #[error("transport error: {0}")]
    Transport(String),

    /// Protocol violation on a connection. Fatal for that connection only.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Certificate authority failure.
    #[error("pki error: {0}")]
    Pki(#[from] PkiError),

    /// Settings-store failure.
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
