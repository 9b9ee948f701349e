//! HTTP session and configuration.

use crate::config::{Config, TlsPolicy};
use crate::error::{CouchError, InvalidHeaderError, Result};
use crate::pool::ConnectionGate;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;

/// A CouchDB session bound to one database.
///
/// The client owns a pooled connection to a single endpoint and is safe to
/// share between threads (`&Client` or `Arc<Client>`). Release the pool with
/// [`shutdown`](Self::shutdown) when done.
pub struct Client {
    pub(crate) inner: reqwest::blocking::Client,
    pub(crate) base_url: Url,
    pub(crate) db_url: Url,
    pub(crate) config: Config,
    pub(crate) gate: Option<Arc<ConnectionGate>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url.as_str())
            .field("db_url", &self.db_url.as_str())
            .field("config", &self.config)
            .field(
                "connections_in_use",
                &self.gate.as_ref().map(|gate| gate.in_use()),
            )
            .finish()
    }
}

impl Client {
    /// Create a client builder for customization.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Build a client from `COUCHDB_*` environment variables.
    pub fn from_env() -> Result<Self> {
        ClientBuilder::from_config(Config::from_env()?).build()
    }

    /// Server root, e.g. `http://127.0.0.1:5984/`.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Database root, always ending with a slash.
    pub fn db_url(&self) -> &Url {
        &self.db_url
    }

    /// Effective configuration. The password is never retained.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The shared pooled connection handle.
    pub fn http(&self) -> &reqwest::blocking::Client {
        &self.inner
    }

    /// Release all pooled connections.
    pub fn shutdown(self) {
        tracing::info!(url = %self.base_url, "shutting down client");
        drop(self.inner);
    }
}

/// Builder for configuring a Client.
#[must_use = "builders do nothing unless you call .build()"]
pub struct ClientBuilder {
    config: Config,
    default_headers: HeaderMap,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self::from_config(Config::default())
    }

    /// Start from an existing configuration.
    pub fn from_config(config: Config) -> Self {
        Self {
            config,
            default_headers: HeaderMap::new(),
        }
    }

    /// Set protocol, host and port from a URL such as `https://db:6984`.
    ///
    /// An unparsable URL is reported by [`build`](Self::build).
    pub fn endpoint(mut self, url: &str) -> Self {
        match Url::parse(url) {
            Ok(parsed) => {
                self.config.protocol = parsed.scheme().to_string();
                if let Some(host) = parsed.host_str() {
                    self.config.host = host.to_string();
                }
                if let Some(port) = parsed.port_or_known_default() {
                    self.config.port = port;
                }
            }
            Err(_) => self.config.host = url.to_string(),
        }
        self
    }

    /// Scheme of the endpoint, `http` or `https`.
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.config.protocol = protocol.into();
        self
    }

    /// Host name or address of the endpoint.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Port of the endpoint (default 5984).
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the database every document operation targets.
    pub fn database(mut self, name: impl Into<String>) -> Self {
        self.config.db_name = name.into();
        self
    }

    /// Set basic-auth credentials, sent pre-emptively on every request.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self.config.password = Some(password.into());
        self
    }

    /// Bound the duration of buffered requests.
    ///
    /// Continuous change feeds are exempt; they rely on the server heartbeat.
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.config.socket_timeout = Some(timeout);
        self
    }

    /// Bound the time spent establishing a connection.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Maximum connections open at once; 0 means no cap.
    ///
    /// A request made while all are in use blocks until one is released.
    /// An open continuous feed occupies one connection.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Route every request through an HTTP proxy.
    pub fn proxy(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.proxy_host = Some(host.into());
        self.config.proxy_port = Some(port);
        self
    }

    /// How server certificates are checked on `https` endpoints.
    pub fn tls_policy(mut self, policy: TlsPolicy) -> Self {
        self.config.tls = policy;
        self
    }

    /// Create the database during [`build`](Self::build) when missing.
    pub fn create_db_if_not_exist(mut self, enabled: bool) -> Self {
        self.config.create_db_if_not_exist = enabled;
        self
    }

    /// Add a default header for all requests, returning an error if the
    /// name or value is invalid.
    pub fn default_header(
        mut self,
        key: &str,
        value: &str,
    ) -> std::result::Result<Self, InvalidHeaderError> {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| InvalidHeaderError::InvalidName(key.to_string()))?;
        let val = HeaderValue::from_str(value)
            .map_err(|_| InvalidHeaderError::InvalidValue(value.to_string()))?;
        self.default_headers.insert(name, val);
        Ok(self)
    }

    /// Build the client.
    ///
    /// Fails on an invalid endpoint, an empty database name, or when the
    /// underlying HTTP client cannot be built (e.g. a bad root certificate).
    pub fn build(self) -> Result<Client> {
        let mut config = self.config;

        if config.protocol != "http" && config.protocol != "https" {
            return Err(CouchError::precondition(format!(
                "unsupported protocol: {}",
                config.protocol
            )));
        }
        if config.db_name.is_empty() {
            return Err(CouchError::precondition("database name may not be empty"));
        }

        let base_url = Url::parse(&format!(
            "{}://{}:{}/",
            config.protocol, config.host, config.port
        ))
        .map_err(|e| CouchError::precondition(format!("invalid endpoint: {e}")))?;
        let mut db_url = base_url.clone();
        db_url
            .path_segments_mut()
            .map_err(|_| CouchError::precondition("endpoint cannot carry a path"))?
            .pop_if_empty()
            .push(&config.db_name)
            .push("");

        let mut headers = self.default_headers;
        headers
            .entry(ACCEPT)
            .or_insert(HeaderValue::from_static("application/json"));

        let token = match (&config.username, &config.password) {
            (Some(username), Some(password)) => {
                Some(STANDARD.encode(format!("{username}:{password}")))
            }
            _ => None,
        };
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Basic {token}"))
                .map_err(|_| InvalidHeaderError::InvalidValue("basic credentials".to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
            config.password = None;
        }

        let mut builder = reqwest::blocking::Client::builder()
            .default_headers(headers)
            .timeout(None::<Duration>)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90));

        // reqwest only bounds idle sockets; the gate bounds open ones.
        let mut gate = None;
        if config.max_connections > 0 {
            builder = builder.pool_max_idle_per_host(config.max_connections);
            gate = Some(ConnectionGate::new(config.max_connections));
        }

        if let Some(proxy_host) = &config.proxy_host {
            let proxy_url = format!("http://{}:{}", proxy_host, config.proxy_port.unwrap_or(80));
            builder = builder.proxy(reqwest::Proxy::all(&proxy_url)?);
        }

        match &config.tls {
            TlsPolicy::Verify => {}
            TlsPolicy::CustomRoot(pem) => {
                builder = builder.add_root_certificate(reqwest::Certificate::from_pem(pem)?);
            }
            TlsPolicy::AcceptInvalidCerts => {
                tracing::warn!(
                    host = %config.host,
                    "certificate validation disabled for this client"
                );
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        let inner = builder.build()?;

        let client = Client {
            inner,
            base_url,
            db_url,
            config,
            gate,
        };
        tracing::info!(url = %client.db_url, "client ready");

        if client.config.create_db_if_not_exist {
            let name = client.config.db_name.clone();
            client.create_db(&name)?;
        }

        Ok(client)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_urls() {
        let client = Client::builder()
            .endpoint("http://localhost:5984")
            .database("orders")
            .build()
            .unwrap();
        assert_eq!(client.base_url().as_str(), "http://localhost:5984/");
        assert_eq!(client.db_url().as_str(), "http://localhost:5984/orders/");
    }

    #[test]
    fn test_database_name_is_encoded() {
        let client = Client::builder()
            .database("team/orders")
            .build()
            .unwrap();
        assert_eq!(client.db_url().path(), "/team%2Forders/");
    }

    #[test]
    fn test_password_is_cleared_after_build() {
        let client = Client::builder()
            .database("orders")
            .credentials("admin", "secret")
            .build()
            .unwrap();
        assert_eq!(client.config().username.as_deref(), Some("admin"));
        assert!(client.config().password.is_none());
    }

    #[test]
    fn test_empty_database_is_rejected() {
        let err = Client::builder().build().unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn test_unknown_protocol_is_rejected() {
        let err = Client::builder()
            .protocol("ftp")
            .database("orders")
            .build()
            .unwrap_err();
        assert!(err.is_precondition());
    }

    const TEST_CA: &str = "-----BEGIN CERTIFICATE-----
MIIBijCCATGgAwIBAgIUYfwkB/Wi8HooS9oDZkHATi45hhowCgYIKoZIzj0EAwIw
GjEYMBYGA1UEAwwPY291Y2hkYi10ZXN0LWNhMCAXDTI2MTAxOTA3MzI0OFoYDzIx
MjYwOTI1MDczMjQ4WjAaMRgwFgYDVQQDDA9jb3VjaGRiLXRlc3QtY2EwWTATBgcq
hkjOPQIBBggqhkjOPQMBBwNCAASF6mOyOZP8nuGIUERBVxjMkSus3b5kx5BRmAYz
cd0TdzjdCQq+ysPh6rh+MmbMFz8IYcygMmpDT7G+tegUKCr+o1MwUTAdBgNVHQ4E
FgQUeeUuG5w/MiYCTPFmfItcYnid438wHwYDVR0jBBgwFoAUeeUuG5w/MiYCTPFm
fItcYnid438wDwYDVR0TAQH/BAUwAwEB/zAKBggqhkjOPQQDAgNHADBEAh9rP2+t
f+E1HBwnBSzItqyzuOIAwYk3fUeOcsLfbL6pAiEAgFDplywUCP5TTl8Zvck+Ljme
aAVWzu4Q6H1cYeDCh7o=
-----END CERTIFICATE-----
";

    #[test]
    fn test_build_with_custom_root() {
        let client = Client::builder()
            .endpoint("https://db.internal:6984")
            .database("orders")
            .tls_policy(TlsPolicy::CustomRoot(TEST_CA.as_bytes().to_vec()))
            .build()
            .unwrap();
        assert_eq!(client.base_url().as_str(), "https://db.internal:6984/");
    }

    #[test]
    fn test_build_accepting_invalid_certs() {
        let client = Client::builder()
            .endpoint("https://localhost:6984")
            .database("orders")
            .tls_policy(TlsPolicy::AcceptInvalidCerts)
            .build()
            .unwrap();
        assert!(matches!(client.config().tls, TlsPolicy::AcceptInvalidCerts));
    }

    #[test]
    fn test_build_with_proxy() {
        let client = Client::builder()
            .database("orders")
            .proxy("proxy.internal", 3128)
            .build()
            .unwrap();
        assert_eq!(client.config().proxy_host.as_deref(), Some("proxy.internal"));
        assert_eq!(client.config().proxy_port, Some(3128));
    }

    #[test]
    fn test_max_connections_installs_gate() {
        let capped = Client::builder()
            .database("orders")
            .max_connections(4)
            .build()
            .unwrap();
        assert!(capped.gate.is_some());

        let uncapped = Client::builder().database("orders").build().unwrap();
        assert!(uncapped.gate.is_none());
    }

    #[test]
    fn test_invalid_default_header() {
        assert!(ClientBuilder::new().default_header("bad header", "x").is_err());
        assert!(ClientBuilder::new().default_header("x-trace", "abc").is_ok());
    }
}
