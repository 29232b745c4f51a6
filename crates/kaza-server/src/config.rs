//! Server configuration.
//!
//! The on-disk format is the historical INI file, typically
//! `/etc/kazad.conf`. Sections map to the slash-separated keys the rest of
//! the system talks about: `ssl/hostname` lives as `hostname` under
//! `[ssl]`, and so on. Keys are matched case-insensitively (the `[Client]`
//! section of legacy files resolves like `[client]`).

use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat};

use crate::error::ServerError;

/// Default TCP port of the main mTLS listener.
pub const DEFAULT_SSL_PORT: u16 = 1756;

/// TLS listener settings (`[ssl]` section).
#[derive(Debug, Clone)]
pub struct SslSettings {
    /// Main listener port (`ssl/port`, default 1756).
    pub port: u16,
    /// Certificate hostname (`ssl/hostname`). Required.
    pub hostname: String,
    /// Passphrase protecting `server.key` (`ssl/keypassword`). Required.
    pub keypassword: String,
}

/// Control listener settings (`[control]` section).
#[derive(Debug, Clone)]
pub struct ControlSettings {
    /// Whether the control listener starts at all (`control/enable`,
    /// default true).
    pub enable: bool,
    /// Control listener port (`control/port`).
    pub port: Option<u16>,
    /// Administrative password for `clientconf?` (`control/password`).
    /// An absent password rejects every provisioning request.
    pub password: String,
}

/// Database bridge settings (`[database]` section). The concrete driver is
/// an external collaborator; these are handed over verbatim.
#[derive(Debug, Clone)]
pub struct DbSettings {
    /// Driver identifier (`database/driver`).
    pub driver: String,
    /// Database name (`database/dbName`).
    pub db_name: String,
    /// Database host (`database/hostname`).
    pub hostname: String,
    /// Database port (`database/port`).
    pub port: u16,
    /// Credentials (`database/username`, `database/password`).
    pub username: String,
    /// Password half of the credentials.
    pub password: String,
}

/// Everything `kazad` consumes from its configuration file.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Main-listener TLS settings.
    pub ssl: SslSettings,
    /// Control-listener settings.
    pub control: ControlSettings,
    /// Externally reachable host advertised in `clientconf?` bundles
    /// (`Client/host`).
    pub client_host: String,
    /// Path of the client application bundle served on `APP?`
    /// (`qml/client`).
    pub app_bundle: Option<PathBuf>,
    /// Declarative server configuration consumed by the external loader
    /// (`qml/server`). Parsed here, acted on elsewhere.
    pub qml_server: Option<String>,
    /// Database bridge settings, present when `database/driver` is set.
    pub database: Option<DbSettings>,
}

impl Settings {
    /// Load and validate settings from an INI file.
    ///
    /// # Errors
    ///
    /// `ServerError::Config` when the file is unreadable or a required key
    /// (`ssl/hostname`, `ssl/keypassword`) is missing.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let raw = Config::builder()
            .add_source(File::new(
                path.to_str()
                    .ok_or_else(|| ServerError::Config("non-UTF-8 config path".to_string()))?,
                FileFormat::Ini,
            ))
            .build()
            .map_err(|e| ServerError::Config(format!("cannot read {}: {e}", path.display())))?;

        let hostname = raw
            .get_string("ssl.hostname")
            .map_err(|_| ServerError::Config("ssl/hostname is not configured".to_string()))?;
        let keypassword = raw
            .get_string("ssl.keypassword")
            .map_err(|_| ServerError::Config("ssl/keypassword is not configured".to_string()))?;

        let port = match raw.get_int("ssl.port") {
            Ok(v) => u16::try_from(v)
                .map_err(|_| ServerError::Config(format!("ssl/port out of range: {v}")))?,
            Err(_) => DEFAULT_SSL_PORT,
        };

        let control = ControlSettings {
            enable: raw.get_bool("control.enable").unwrap_or(true),
            port: raw
                .get_int("control.port")
                .ok()
                .map(|v| {
                    u16::try_from(v)
                        .map_err(|_| ServerError::Config(format!("control/port out of range: {v}")))
                })
                .transpose()?,
            password: raw.get_string("control.password").unwrap_or_default(),
        };

        let database = raw.get_string("database.driver").ok().map(|driver| {
            Ok::<_, ServerError>(DbSettings {
                driver,
                db_name: raw
                    .get_string("database.dbname")
                    .or_else(|_| raw.get_string("database.dbName"))
                    .unwrap_or_default(),
                hostname: raw.get_string("database.hostname").unwrap_or_default(),
                port: match raw.get_int("database.port") {
                    Ok(v) => u16::try_from(v).map_err(|_| {
                        ServerError::Config(format!("database/port out of range: {v}"))
                    })?,
                    Err(_) => 0,
                },
                username: raw.get_string("database.username").unwrap_or_default(),
                password: raw.get_string("database.password").unwrap_or_default(),
            })
        });

        Ok(Self {
            ssl: SslSettings {
                port,
                hostname,
                keypassword,
            },
            control,
            client_host: raw
                .get_string("client.host")
                .or_else(|_| raw.get_string("Client.host"))
                .unwrap_or_default(),
            app_bundle: raw.get_string("qml.client").ok().map(PathBuf::from),
            qml_server: raw.get_string("qml.server").ok(),
            database: database.transpose()?,
        })
    }
}
