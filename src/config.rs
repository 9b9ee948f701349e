//! Connection configuration.

use crate::error::{CouchError, Result};
use std::fmt;
use std::time::Duration;

/// Environment variable prefix used by [`Config::from_env`].
pub const ENV_PREFIX: &str = "COUCHDB_";

/// Certificate trust policy for `https` endpoints.
#[derive(Clone, Default)]
pub enum TlsPolicy {
    /// Validate the server certificate against the built-in root store.
    #[default]
    Verify,
    /// Additionally trust the given PEM-encoded root certificate.
    CustomRoot(Vec<u8>),
    /// Accept any certificate the server presents.
    ///
    /// This disables server authentication entirely. Only meant for
    /// development servers with self-signed certificates.
    AcceptInvalidCerts,
}

impl fmt::Debug for TlsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsPolicy::Verify => f.write_str("Verify"),
            TlsPolicy::CustomRoot(pem) => write!(f, "CustomRoot({} bytes)", pem.len()),
            TlsPolicy::AcceptInvalidCerts => f.write_str("AcceptInvalidCerts"),
        }
    }
}

/// Settings for one database endpoint.
///
/// A zero `max_connections` leaves the pool size to the HTTP library.
/// Timeouts of `None` never expire.
#[derive(Clone)]
pub struct Config {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub db_name: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub socket_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub max_connections: usize,
    pub proxy_host: Option<String>,
    pub proxy_port: Option<u16>,
    pub create_db_if_not_exist: bool,
    pub tls: TlsPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "127.0.0.1".to_string(),
            port: 5984,
            db_name: String::new(),
            username: None,
            password: None,
            socket_timeout: None,
            connect_timeout: None,
            max_connections: 0,
            proxy_host: None,
            proxy_port: None,
            create_db_if_not_exist: false,
            tls: TlsPolicy::Verify,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db_name", &self.db_name)
            .field("username", &self.username)
            .field("has_password", &self.password.is_some())
            .field("socket_timeout", &self.socket_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_connections", &self.max_connections)
            .field("proxy_host", &self.proxy_host)
            .field("proxy_port", &self.proxy_port)
            .field("create_db_if_not_exist", &self.create_db_if_not_exist)
            .field("tls", &self.tls)
            .finish()
    }
}

impl Config {
    /// Read settings from `COUCHDB_*` environment variables.
    ///
    /// Unset variables keep their default. Empty values count as unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Config::default();
        if let Some(protocol) = get("PROTOCOL") {
            config.protocol = protocol;
        }
        if let Some(host) = get("HOST") {
            config.host = host;
        }
        if let Some(port) = get("PORT") {
            config.port = parse_number("PORT", &port)?;
        }
        if let Some(name) = get("NAME") {
            config.db_name = name;
        }
        config.username = get("USERNAME");
        config.password = get("PASSWORD");
        config.socket_timeout = get("SOCKET_TIMEOUT_MS")
            .map(|v| parse_millis("SOCKET_TIMEOUT_MS", &v))
            .transpose()?
            .flatten();
        config.connect_timeout = get("CONNECT_TIMEOUT_MS")
            .map(|v| parse_millis("CONNECT_TIMEOUT_MS", &v))
            .transpose()?
            .flatten();
        if let Some(max) = get("MAX_CONNECTIONS") {
            config.max_connections = parse_number("MAX_CONNECTIONS", &max)?;
        }
        config.proxy_host = get("PROXY_HOST");
        config.proxy_port = get("PROXY_PORT")
            .map(|v| parse_number("PROXY_PORT", &v))
            .transpose()?;
        if let Some(flag) = get("CREATEDB_IF_NOT_EXIST") {
            config.create_db_if_not_exist = parse_bool("CREATEDB_IF_NOT_EXIST", &flag)?;
        }
        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        CouchError::precondition(format!("{ENV_PREFIX}{name} is not a valid number: {value}"))
    })
}

// 0 means "no timeout", matching the socket option convention.
fn parse_millis(name: &str, value: &str) -> Result<Option<Duration>> {
    let ms: u64 = parse_number(name, value)?;
    Ok((ms > 0).then(|| Duration::from_millis(ms)))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(CouchError::precondition(format!(
            "{ENV_PREFIX}{name} is not a valid boolean: {value}"
        ))),
    }
}
