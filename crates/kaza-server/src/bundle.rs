//! Client application bundle.
//!
//! Clients greet with no local state and ask `APP?` when their cached
//! bundle checksum differs from the one the server announced after
//! version negotiation. Building the bundle is an external concern; this
//! module only checksums and serves an existing file.

use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::{Digest, Md5};

/// The application bundle configured via `qml/client`.
///
/// The checksum is computed once at startup: the bundle changes only on
/// redeploy, which restarts the server anyway.
#[derive(Debug, Clone, Default)]
pub struct AppBundle {
    path: Option<PathBuf>,
    checksum: String,
}

impl AppBundle {
    /// Load the bundle description, checksumming the file when present.
    ///
    /// A missing or unreadable file is not fatal here: the server runs
    /// without a bundle and announces an empty checksum; only an explicit
    /// `APP?` then fails.
    #[must_use]
    pub fn load(path: Option<PathBuf>) -> Self {
        let checksum = path
            .as_deref()
            .and_then(|p| match std::fs::read(p) {
                Ok(data) => Some(BASE64.encode(Md5::digest(&data))),
                Err(e) => {
                    tracing::warn!("cannot checksum application bundle {}: {e}", p.display());
                    None
                }
            })
            .unwrap_or_default();

        Self { path, checksum }
    }

    /// Base64-encoded MD5 of the bundle contents, empty when no bundle is
    /// configured or readable. Sent as `APP:<checksum>` after VERSION_OK.
    #[must_use]
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Bundle contents for the FILE frame answering `APP?`.
    ///
    /// # Errors
    ///
    /// I/O error when no bundle is configured or the file is unreadable;
    /// the caller closes the requesting connection.
    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        let path = self.path.as_deref().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no application bundle configured")
        })?;
        tokio::fs::read(path).await
    }
}
