//! Configuration from environment variables.
//!
//! Every setting has a default; an unset or empty variable keeps it.
//! Malformed values are rejected with the variable's name rather than
//! silently replaced.
//!
//! | Variable | Default |
//! |---|---|
//! | `ADDR`, `PORT` | `0.0.0.0`, `8000` |
//! | `READ_TIMEOUT`, `WRITE_TIMEOUT`, `IDLE_TIMEOUT` | `15s`, `15s`, `60s` |
//! | `MAX_HEADER_BYTES` | `1048576` |
//! | `PROVISIONING_HOST`, `PROVISIONING_PORT` | `localhost`, `50051` |
//! | `PROVISIONING_MAX_CONN` | `100` |
//! | `PROVISIONING_CONN_TIMEOUT`, `PROVISIONING_REQUEST_TIMEOUT` | `5s`, `30s` |
//! | `PROVISIONING_MAX_RETRIES` | `3` |
//! | `PROVISIONING_INITIAL_BACKOFF`, `PROVISIONING_MAX_BACKOFF` | `100ms`, `10s` |
//! | `LOG_LEVEL`, `LOG_FORMAT` | `info`, `json` |
//! | `TRACING_ENABLED`, `TRACING_SERVICE_NAME`, `TRACING_ENDPOINT` | `false`, `platform-api`, `http://localhost:4317` |
//! | `METRICS_ENABLED`, `METRICS_PORT` | `true`, `9090` |
//! | `AUTH_ENABLED` | `false` |
//! | `OIDC_ISSUER_URL`, `OIDC_CLIENT_ID`, `OIDC_CLIENT_SECRET` | empty |
//! | `JWT_AUDIENCE`, `TOKEN_CACHE_TTL` | `platform-api`, `5m` |
//!
//! Booleans are true for `true`, `1` or `yes`. Durations use `duration-str`
//! syntax (`250ms`, `15s`, `5m`).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

/// hyper refuses read buffers smaller than this.
pub const MIN_HEADER_BYTES: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}: {reason}")]
    Invalid { key: &'static str, value: String, reason: String },

    #[error("invalid server port: {0}")]
    Port(u16),

    #[error("provisioning service host is required")]
    MissingProvisioningHost,

    #[error("max header bytes must be at least {min}, got {0}", min = MIN_HEADER_BYTES)]
    HeaderLimit(usize),
}

/// Full service configuration.
#[derive(Debug, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub provisioning: ProvisioningConfig,
    pub observability: ObservabilityConfig,
    pub auth: AuthConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: String,
    pub port: u16,
    /// Bound on receiving a complete request head.
    pub read_timeout: Duration,
    /// Bound on producing a response once the request has been read.
    pub write_timeout: Duration,
    /// Keep-alive connections with no request in flight for this long are closed.
    pub idle_timeout: Duration,
    pub max_header_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0".to_owned(),
            port: 8000,
            read_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(60),
            max_header_bytes: 1 << 20,
        }
    }
}

/// Downstream provisioning service. Loaded and validated; no client uses it yet.
#[derive(Clone, Debug)]
pub struct ProvisioningConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    pub connection_timeout: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ProvisioningConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 50051,
            max_connections: 100,
            connection_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ObservabilityConfig {
    pub log_level: LogLevel,
    pub log_format: LogFormat,
    pub tracing_enabled: bool,
    pub tracing_service_name: String,
    pub tracing_endpoint: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_format: LogFormat::Json,
            tracing_enabled: false,
            tracing_service_name: "platform-api".to_owned(),
            tracing_endpoint: "http://localhost:4317".to_owned(),
            metrics_enabled: true,
            metrics_port: 9090,
        }
    }
}

/// OIDC settings. Token validation is not implemented; these are carried so
/// deployments can be configured ahead of it.
#[derive(Debug)]
pub struct AuthConfig {
    pub enabled: bool,
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub jwt_audience: String,
    pub token_cache_ttl: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            issuer_url: String::new(),
            client_id: String::new(),
            client_secret: SecretString::from(String::new()),
            jwt_audience: "platform-api".to_owned(),
            token_cache_ttl: Duration::from_secs(5 * 60),
        }
    }
}

// ── Log level / format ────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Lowercase name, usable as an `EnvFilter` directive.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info  => "info",
            Self::Warn  => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace"            => Ok(Self::Trace),
            "debug"            => Ok(Self::Debug),
            "info"             => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error"            => Ok(Self::Error),
            _ => Err("expected one of trace, debug, info, warn, error".to_owned()),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log encoding. JSON goes to stderr, text to stdout.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogFormat {
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            _ => Err("expected json or text".to_owned()),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl Config {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(lookup);
        let server = ServerConfig::default();
        let provisioning = ProvisioningConfig::default();
        let observability = ObservabilityConfig::default();
        let auth = AuthConfig::default();

        Ok(Self {
            server: ServerConfig {
                addr: env.string("ADDR", server.addr),
                port: env.parse("PORT", server.port)?,
                read_timeout: env.duration("READ_TIMEOUT", server.read_timeout)?,
                write_timeout: env.duration("WRITE_TIMEOUT", server.write_timeout)?,
                idle_timeout: env.duration("IDLE_TIMEOUT", server.idle_timeout)?,
                max_header_bytes: env.parse("MAX_HEADER_BYTES", server.max_header_bytes)?,
            },
            provisioning: ProvisioningConfig {
                host: env.string("PROVISIONING_HOST", provisioning.host),
                port: env.parse("PROVISIONING_PORT", provisioning.port)?,
                max_connections: env.parse("PROVISIONING_MAX_CONN", provisioning.max_connections)?,
                connection_timeout: env.duration("PROVISIONING_CONN_TIMEOUT", provisioning.connection_timeout)?,
                request_timeout: env.duration("PROVISIONING_REQUEST_TIMEOUT", provisioning.request_timeout)?,
                max_retries: env.parse("PROVISIONING_MAX_RETRIES", provisioning.max_retries)?,
                initial_backoff: env.duration("PROVISIONING_INITIAL_BACKOFF", provisioning.initial_backoff)?,
                max_backoff: env.duration("PROVISIONING_MAX_BACKOFF", provisioning.max_backoff)?,
            },
            observability: ObservabilityConfig {
                log_level: env.parse("LOG_LEVEL", observability.log_level)?,
                log_format: env.parse("LOG_FORMAT", observability.log_format)?,
                tracing_enabled: env.flag("TRACING_ENABLED", observability.tracing_enabled),
                tracing_service_name: env.string("TRACING_SERVICE_NAME", observability.tracing_service_name),
                tracing_endpoint: env.string("TRACING_ENDPOINT", observability.tracing_endpoint),
                metrics_enabled: env.flag("METRICS_ENABLED", observability.metrics_enabled),
                metrics_port: env.parse("METRICS_PORT", observability.metrics_port)?,
            },
            auth: AuthConfig {
                enabled: env.flag("AUTH_ENABLED", auth.enabled),
                issuer_url: env.string("OIDC_ISSUER_URL", auth.issuer_url),
                client_id: env.string("OIDC_CLIENT_ID", auth.client_id),
                client_secret: env.raw("OIDC_CLIENT_SECRET").map(SecretString::from).unwrap_or(auth.client_secret),
                jwt_audience: env.string("JWT_AUDIENCE", auth.jwt_audience),
                token_cache_ttl: env.duration("TOKEN_CACHE_TTL", auth.token_cache_ttl)?,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Port(self.server.port));
        }
        if self.provisioning.host.trim().is_empty() {
            return Err(ConfigError::MissingProvisioningHost);
        }
        if self.server.max_header_bytes < MIN_HEADER_BYTES {
            return Err(ConfigError::HeaderLimit(self.server.max_header_bytes));
        }
        Ok(())
    }
}

/// Typed access to a variable lookup. Empty values count as unset.
struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: String) -> String {
        self.raw(key).unwrap_or(default)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.raw(key).map_or(default, |v| matches!(v.as_str(), "true" | "1" | "yes"))
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let Some(value) = self.raw(key) else {
            return Ok(default);
        };
        let parsed: Result<T, T::Err> = value.trim().parse();
        parsed.map_err(|e| ConfigError::Invalid { key, reason: e.to_string(), value })
    }

    fn duration(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let Some(value) = self.raw(key) else {
            return Ok(default);
        };
        let parsed = duration_str::parse(value.trim());
        parsed.map_err(|e| ConfigError::Invalid { key, reason: e.to_string(), value })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars.iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = load(&[]).unwrap();

        assert_eq!(config.server.addr, "0.0.0.0");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.read_timeout, Duration::from_secs(15));
        assert_eq!(config.server.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.server.max_header_bytes, 1 << 20);
        assert_eq!(config.provisioning.endpoint(), "localhost:50051");
        assert_eq!(config.provisioning.initial_backoff, Duration::from_millis(100));
        assert_eq!(config.observability.log_level, LogLevel::Info);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert!(config.observability.metrics_enabled);
        assert!(!config.auth.enabled);
        assert_eq!(config.auth.token_cache_ttl, Duration::from_secs(300));
        config.validate().unwrap();
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = load(&[
            ("PORT", "9000"),
            ("WRITE_TIMEOUT", "250ms"),
            ("PROVISIONING_HOST", "provisioning-service"),
            ("PROVISIONING_MAX_RETRIES", "7"),
            ("LOG_LEVEL", "DEBUG"),
            ("LOG_FORMAT", "text"),
            ("TRACING_ENABLED", "yes"),
            ("METRICS_ENABLED", "0"),
            ("OIDC_CLIENT_SECRET", "hunter2"),
        ])
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.write_timeout, Duration::from_millis(250));
        assert_eq!(config.provisioning.endpoint(), "provisioning-service:50051");
        assert_eq!(config.provisioning.max_retries, 7);
        assert_eq!(config.observability.log_level, LogLevel::Debug);
        assert_eq!(config.observability.log_format, LogFormat::Text);
        assert!(config.observability.tracing_enabled);
        assert!(!config.observability.metrics_enabled);
        assert_eq!(config.auth.client_secret.expose_secret(), "hunter2");
    }

    #[test]
    fn empty_values_count_as_unset() {
        let config = load(&[("PORT", ""), ("LOG_FORMAT", ""), ("PROVISIONING_HOST", "")]).unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.provisioning.host, "localhost");
    }

    #[test]
    fn malformed_values_name_the_variable() {
        for (key, value) in [("PORT", "eighty"), ("READ_TIMEOUT", "soon"), ("LOG_LEVEL", "loud"), ("PORT", "70000")] {
            match load(&[(key, value)]) {
                Err(ConfigError::Invalid { key: bad, value: got, .. }) => {
                    assert_eq!(bad, key);
                    assert_eq!(got, value);
                }
                other => panic!("expected invalid {key}, got {other:?}"),
            }
        }
    }

    #[test]
    fn validation_rules() {
        let mut config = Config::default();
        config.validate().unwrap();

        config.server.port = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Port(0))));

        config.server.port = 8000;
        config.provisioning.host = " ".to_owned();
        assert!(matches!(config.validate(), Err(ConfigError::MissingProvisioningHost)));

        config.provisioning.host = "localhost".to_owned();
        config.server.max_header_bytes = 1024;
        assert!(matches!(config.validate(), Err(ConfigError::HeaderLimit(1024))));
    }

    #[test]
    fn secret_is_redacted_in_debug_output() {
        let config = load(&[("OIDC_CLIENT_SECRET", "hunter2")]).unwrap();
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn reads_the_process_environment() {
        temp_env::with_vars([("PORT", Some("8181")), ("LOG_LEVEL", Some("warn"))], || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.server.port, 8181);
            assert_eq!(config.observability.log_level, LogLevel::Warn);
        });
    }
}
