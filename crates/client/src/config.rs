//! Client configuration.
//!
//! A plain value holder. Nothing here talks to the network; the client reads
//! it once at construction.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Url;
use xload_core::{ClientError, ClientResult};

/// Endpoint used when nothing else is configured.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:50000/services/rs/XLoad/";

/// Path (relative to the hosting URL) under which the service is mounted.
pub const DEFAULT_SERVICE_PATH: &str = "rs/XLoad/";

pub const ENV_ENDPOINT: &str = "XLOAD_ENDPOINT";
pub const ENV_ORIGIN: &str = "XLOAD_ORIGIN";
pub const ENV_ACTIVE_REQUEST_LIMIT: &str = "XLOAD_ACTIVE_REQUEST_LIMIT";
pub const ENV_USER: &str = "XLOAD_USER";
pub const ENV_PASSWORD: &str = "XLOAD_PASSWORD";

/// Basic-auth credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Absolute service URL (anything starting with `http`), a service
    /// instance name, or empty for the default mount point.
    pub endpoint: String,
    /// URL of the hosting context. Relative endpoints resolve against it, and
    /// its origin decides whether calls are cross-origin.
    pub origin: Option<Url>,
    /// Whether the runtime has a fully capable cross-origin transport.
    pub full_cross_origin: bool,
    /// Maximum number of concurrently active non-blocking calls (`<= 0` means
    /// unbounded).
    pub active_request_limit: i64,
    /// Extra request headers sent with every call.
    pub headers: Vec<(String, String)>,
    pub credentials: Option<Credentials>,
    /// Default timeout per operation name, used when a call passes none.
    pub timeouts: HashMap<String, Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            origin: None,
            full_cross_origin: true,
            active_request_limit: 0,
            headers: Vec::new(),
            credentials: None,
            timeouts: HashMap::new(),
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Read configuration from `XLOAD_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> ClientResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> ClientResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            config.endpoint = endpoint;
        }

        if let Some(origin) = lookup(ENV_ORIGIN) {
            let origin = Url::parse(origin.trim()).map_err(|e| {
                ClientError::configuration(format!("invalid {ENV_ORIGIN} {origin:?}: {e}"))
            })?;
            config.origin = Some(origin);
        }

        if let Some(limit) = lookup(ENV_ACTIVE_REQUEST_LIMIT) {
            config.active_request_limit = limit.trim().parse().map_err(|e| {
                ClientError::configuration(format!(
                    "invalid {ENV_ACTIVE_REQUEST_LIMIT} {limit:?}: {e}"
                ))
            })?;
        }

        if let Some(user) = lookup(ENV_USER) {
            let password = lookup(ENV_PASSWORD).unwrap_or_default();
            config.credentials = Some(Credentials::new(user, password));
        }

        Ok(config)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_full_cross_origin(mut self, supported: bool) -> Self {
        self.full_cross_origin = supported;
        self
    }

    pub fn with_active_request_limit(mut self, limit: i64) -> Self {
        self.active_request_limit = limit;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(user, password));
        self
    }

    pub fn with_timeout(mut self, operation: impl Into<String>, timeout: Duration) -> Self {
        self.timeouts.insert(operation.into(), timeout);
        self
    }

    /// Resolve the URL that operation names are appended to.
    ///
    /// - a value starting with `http` is used verbatim;
    /// - an empty value maps to `<origin>/rs/XLoad/`;
    /// - any other value `name` maps to `<origin>/rs/XLoad/<name>/`.
    pub fn resolve_endpoint(&self) -> ClientResult<Url> {
        let endpoint = self.endpoint.trim();

        if endpoint.starts_with("http") {
            return Url::parse(endpoint).map_err(|e| {
                ClientError::configuration(format!("invalid endpoint {endpoint:?}: {e}"))
            });
        }

        let origin = self.origin.as_ref().ok_or_else(|| {
            ClientError::configuration(format!(
                "endpoint {endpoint:?} is relative but no hosting origin is configured"
            ))
        })?;

        let path = if endpoint.is_empty() {
            DEFAULT_SERVICE_PATH.to_string()
        } else {
            format!("{DEFAULT_SERVICE_PATH}{endpoint}/")
        };

        origin.join(&path).map_err(|e| {
            ClientError::configuration(format!("cannot resolve endpoint {path:?} against {origin}: {e}"))
        })
    }
}
