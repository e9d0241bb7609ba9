use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use proxy_metrics::TagPolicy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Defines the source of a config error
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

/// Indicates config related errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to save a file.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config file")]
    BadJson,
    /// Invalid config value
    #[error("invalid config value")]
    InvalidValue,
}

/// An error raised while loading or overriding the configuration.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    error: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            error: None,
        }
    }

    #[inline]
    fn wrap<E>(error: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            source: ConfigErrorSource::None,
            kind,
            error: Some(Box::new(error)),
        }
    }

    #[inline]
    fn for_field<E>(error: E, field: &'static str) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::wrap(error, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file<P: AsRef<Path>>(mut self, p: P) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.source = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ConfigErrorSource::None => fmt::Display::fmt(&self.kind, f),
            ConfigErrorSource::File(file_name) => {
                write!(f, "{} (file {})", self.kind, file_name.display())
            }
            ConfigErrorSource::FieldOverride(name) => write!(f, "{} (field {})", self.kind, name),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.error
            .as_deref()
            .map(|error| error as &(dyn Error + 'static))
    }
}

/// A field override could not be parsed as a boolean.
#[derive(Debug, thiserror::Error)]
#[error("expected a boolean, got {0:?}")]
struct ParseBoolError(String);

fn parse_bool(value: &str) -> Result<bool, ParseBoolError> {
    match value.to_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        _ => Err(ParseBoolError(value.to_owned())),
    }
}

enum ConfigFormat {
    Yaml,
}

impl ConfigFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yml",
        }
    }
}

trait ConfigObject: DeserializeOwned + Serialize {
    /// The format in which to serialize this configuration.
    fn format() -> ConfigFormat;

    /// The basename of the config file.
    fn name() -> &'static str;

    /// The full filename of the config file, including the file extension.
    fn path(base: &Path) -> PathBuf {
        base.join(format!("{}.{}", Self::name(), Self::format().extension()))
    }

    /// Loads the config file from a file within the given directory location.
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(base);

        let f = fs::File::open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path))?;

        match Self::format() {
            ConfigFormat::Yaml => serde_yaml::from_reader(io::BufReader::new(f))
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path)),
        }
    }

    /// Writes the configuration object to the given writer.
    fn write<W: Write>(&self, writer: &mut W) -> Result<(), ConfigError> {
        match Self::format() {
            ConfigFormat::Yaml => serde_yaml::to_writer(writer, self)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile)),
        }
    }
}

/// Structure used to hold information about configuration overrides via
/// CLI parameters or environment variables
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The host the HTTP server should bind to (network interface).
    pub http_host: Option<String>,
    /// The port of the HTTP server.
    pub http_port: Option<String>,
    /// Timeout in seconds for reading the request headers.
    pub http_timeout_read: Option<String>,
    /// Timeout in seconds for handling a request and writing the response.
    pub http_timeout_write: Option<String>,
    /// Timeout in seconds for idle keep-alive connections.
    pub http_timeout_idle: Option<String>,
    /// Path to a TLS certificate.
    pub tls_cert: Option<String>,
    /// Path to a TLS private key.
    pub tls_key: Option<String>,
    /// The host of the StatsD daemon.
    pub statsd_host: Option<String>,
    /// The port of the StatsD daemon.
    pub statsd_port: Option<String>,
    /// Prefix of all forwarded metric names.
    pub metric_prefix: Option<String>,
    /// Secret for verifying JSON web tokens.
    pub jwt_secret: Option<String>,
    /// The log level, for example `debug`.
    pub log_level: Option<String>,
    /// "true" if Prometheus naming rules are enforced, "false" otherwise.
    pub prometheus_compat: Option<String>,
    /// "true" if names and tags are lowercased, "false" otherwise.
    pub normalize: Option<String>,
    /// Capacity of the ingestion queue.
    pub queue_size: Option<String>,
    /// Number of forwarding workers.
    pub workers: Option<String>,
    /// Path prefix of all HTTP routes.
    pub root_path: Option<String>,
    /// Shutdown timeout in seconds.
    pub shutdown_timeout: Option<String>,
}

fn default_http_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// Controls the HTTP server.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Http {
    /// The host the server binds to.
    host: IpAddr,
    /// The port the server binds to.
    port: u16,
    /// Timeout in seconds for reading the request headers of a connection.
    read_timeout: u64,
    /// Timeout in seconds for handling a request, including writing the response.
    write_timeout: u64,
    /// Timeout in seconds after which an idle connection is closed.
    idle_timeout: u64,
    /// Path prefix under which all routes are served.
    root_path: String,
    /// Maximum size of a request body in bytes.
    max_body_size: usize,
    /// Path to a TLS certificate.
    #[serde(skip_serializing_if = "Option::is_none")]
    tls_cert: Option<PathBuf>,
    /// Path to a TLS private key.
    #[serde(skip_serializing_if = "Option::is_none")]
    tls_key: Option<PathBuf>,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            host: default_http_host(),
            port: 8825,
            read_timeout: 2,
            write_timeout: 2,
            idle_timeout: 5,
            root_path: String::new(),
            max_body_size: 5 * 1024 * 1024,
            tls_cert: None,
            tls_key: None,
        }
    }
}

/// Controls the StatsD backend.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Statsd {
    /// Host name or address of the StatsD daemon.
    host: String,
    /// UDP port of the StatsD daemon.
    port: u16,
    /// Number of lines buffered in front of the socket.
    max_queue_size: usize,
}

impl Default for Statsd {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8125,
            max_queue_size: 100_000,
        }
    }
}

/// Controls normalization and forwarding of metrics.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Processing {
    /// Prefix of all metric names. Suffixed with `_` if missing.
    metric_prefix: String,
    /// Lowercases metric names and tags.
    normalize: bool,
    /// Enforces Prometheus-compatible metric and tag names.
    prometheus_compat: bool,
    /// Handling of malformed tag pairs.
    tag_policy: TagPolicy,
    /// Capacity of the ingestion queue.
    queue_size: usize,
    /// Number of forwarding workers.
    workers: usize,
}

impl Default for Processing {
    fn default() -> Self {
        Self {
            metric_prefix: String::new(),
            normalize: false,
            prometheus_compat: false,
            tag_policy: TagPolicy::Lenient,
            queue_size: 1000,
            workers: 4,
        }
    }
}

/// Controls authentication of submissions.
#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(default)]
struct Auth {
    /// Shared secret for JSON web tokens. Authentication is disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    jwt_secret: Option<String>,
}

/// Controls various limits.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Limits {
    /// Seconds to wait for open connections to finish during shutdown.
    shutdown_timeout: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            shutdown_timeout: 5,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct ConfigValues {
    #[serde(default)]
    http: Http,
    #[serde(default)]
    statsd: Statsd,
    #[serde(default)]
    processing: Processing,
    #[serde(default)]
    auth: Auth,
    #[serde(default)]
    logging: proxy_log::LogConfig,
    #[serde(default)]
    limits: Limits,
}

impl ConfigObject for ConfigValues {
    fn format() -> ConfigFormat {
        ConfigFormat::Yaml
    }

    fn name() -> &'static str {
        "config"
    }
}

/// Config struct.
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Config {
    /// Loads a config from a given config folder.
    ///
    /// The folder may contain a `config.yml`. A missing folder or file results in the default
    /// configuration.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = std::env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        let values = if ConfigValues::path(&path).exists() {
            ConfigValues::load(&path)?
        } else {
            ConfigValues::default()
        };

        let config = Config { values, path };
        config.validate()?;
        Ok(config)
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        let config = Config {
            values: serde_json::from_value(value)
                .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadJson))?,
            path: PathBuf::new(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters)
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        let http = &mut self.values.http;

        if let Some(host) = overrides.http_host {
            http.host = host
                .parse::<IpAddr>()
                .map_err(|err| ConfigError::for_field(err, "http_host"))?;
        }

        if let Some(port) = overrides.http_port {
            http.port = port
                .parse()
                .map_err(|err| ConfigError::for_field(err, "http_port"))?;
        }

        if let Some(timeout) = overrides.http_timeout_read {
            http.read_timeout = timeout
                .parse()
                .map_err(|err| ConfigError::for_field(err, "http_timeout_read"))?;
        }

        if let Some(timeout) = overrides.http_timeout_write {
            http.write_timeout = timeout
                .parse()
                .map_err(|err| ConfigError::for_field(err, "http_timeout_write"))?;
        }

        if let Some(timeout) = overrides.http_timeout_idle {
            http.idle_timeout = timeout
                .parse()
                .map_err(|err| ConfigError::for_field(err, "http_timeout_idle"))?;
        }

        if let Some(root_path) = overrides.root_path {
            http.root_path = root_path;
        }

        if let Some(tls_cert) = overrides.tls_cert.filter(|s| !s.is_empty()) {
            http.tls_cert = Some(tls_cert.into());
        }

        if let Some(tls_key) = overrides.tls_key.filter(|s| !s.is_empty()) {
            http.tls_key = Some(tls_key.into());
        }

        let statsd = &mut self.values.statsd;

        if let Some(host) = overrides.statsd_host {
            statsd.host = host;
        }

        if let Some(port) = overrides.statsd_port {
            statsd.port = port
                .parse()
                .map_err(|err| ConfigError::for_field(err, "statsd_port"))?;
        }

        let processing = &mut self.values.processing;

        if let Some(prefix) = overrides.metric_prefix {
            processing.metric_prefix = prefix;
        }

        if let Some(enabled) = overrides.prometheus_compat {
            processing.prometheus_compat = parse_bool(&enabled)
                .map_err(|err| ConfigError::for_field(err, "prometheus_compat"))?;
        }

        if let Some(enabled) = overrides.normalize {
            processing.normalize = parse_bool(&enabled)
                .map_err(|err| ConfigError::for_field(err, "normalize"))?;
        }

        if let Some(queue_size) = overrides.queue_size {
            processing.queue_size = queue_size
                .parse()
                .map_err(|err| ConfigError::for_field(err, "queue_size"))?;
        }

        if let Some(workers) = overrides.workers {
            processing.workers = workers
                .parse()
                .map_err(|err| ConfigError::for_field(err, "workers"))?;
        }

        if let Some(secret) = overrides.jwt_secret.filter(|s| !s.is_empty()) {
            self.values.auth.jwt_secret = Some(secret);
        }

        if let Some(level) = overrides.log_level {
            self.values.logging.level = serde_yaml::from_str(&level)
                .map_err(|err| ConfigError::for_field(err, "log_level"))?;
        }

        if let Some(timeout) = overrides.shutdown_timeout {
            self.values.limits.shutdown_timeout = timeout
                .parse()
                .map_err(|err| ConfigError::for_field(err, "shutdown_timeout"))?;
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let processing = &self.values.processing;

        if processing.queue_size == 0 {
            return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("queue_size"));
        }

        if processing.workers == 0 {
            return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("workers"));
        }

        let http = &self.values.http;
        match (&http.tls_cert, &http.tls_key) {
            (Some(_), None) => {
                return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("tls_key"));
            }
            (None, Some(_)) => {
                return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("tls_cert"));
            }
            _ => (),
        }

        Ok(())
    }

    /// Returns the filename of the config file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        let mut buffer = Vec::new();
        self.values.write(&mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Returns the socket address the HTTP server binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.values.http.host, self.values.http.port)
    }

    /// Returns the host name of the StatsD daemon.
    pub fn statsd_host(&self) -> &str {
        &self.values.statsd.host
    }

    /// Returns the UDP port of the StatsD daemon.
    pub fn statsd_port(&self) -> u16 {
        self.values.statsd.port
    }

    /// Returns the StatsD address as `host:port`.
    pub fn statsd_addr(&self) -> String {
        format!("{}:{}", self.values.statsd.host, self.values.statsd.port)
    }

    /// Returns the number of lines the StatsD client buffers in front of the socket.
    pub fn statsd_max_queue_size(&self) -> usize {
        self.values.statsd.max_queue_size
    }

    /// Returns the prefix of all metric names.
    ///
    /// A non-empty prefix always ends in `_`, and is lowercased when names are normalized.
    pub fn metric_prefix(&self) -> String {
        let processing = &self.values.processing;

        let mut prefix = processing.metric_prefix.clone();
        if !prefix.is_empty() && !prefix.ends_with('_') {
            prefix.push('_');
        }

        if processing.normalize {
            prefix.make_ascii_lowercase();
        }

        prefix
    }

    /// Returns `true` if metric names and tags are lowercased.
    pub fn normalize(&self) -> bool {
        self.values.processing.normalize
    }

    /// Returns `true` if Prometheus naming rules are enforced.
    pub fn prometheus_compat(&self) -> bool {
        self.values.processing.prometheus_compat
    }

    /// Returns the handling of malformed tag pairs.
    pub fn tag_policy(&self) -> TagPolicy {
        self.values.processing.tag_policy
    }

    /// Returns the capacity of the ingestion queue.
    pub fn queue_size(&self) -> usize {
        self.values.processing.queue_size
    }

    /// Returns the number of forwarding workers.
    pub fn workers(&self) -> usize {
        self.values.processing.workers
    }

    /// Returns the JWT secret, if authentication is enabled.
    pub fn jwt_secret(&self) -> Option<&str> {
        self.values
            .auth
            .jwt_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
    }

    /// Returns the path prefix of all routes.
    ///
    /// The prefix is either empty or starts with `/` and has no trailing `/`.
    pub fn root_path(&self) -> String {
        let trimmed = self.values.http.root_path.trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        }
    }

    /// Returns the path to the TLS certificate.
    pub fn tls_cert(&self) -> Option<&Path> {
        self.values.http.tls_cert.as_deref()
    }

    /// Returns the path to the TLS private key.
    pub fn tls_key(&self) -> Option<&Path> {
        self.values.http.tls_key.as_deref()
    }

    /// Returns the certificate and key paths if HTTPS is enabled.
    ///
    /// Validation guarantees that either both or none are configured.
    pub fn tls_paths(&self) -> Option<(&Path, &Path)> {
        self.tls_cert().zip(self.tls_key())
    }

    /// Returns the timeout for reading request headers.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.values.http.read_timeout)
    }

    /// Returns the timeout for handling a request.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.values.http.write_timeout)
    }

    /// Returns the timeout after which idle connections are closed.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.values.http.idle_timeout)
    }

    /// Returns the maximum size of a request body in bytes.
    pub fn max_body_size(&self) -> usize {
        self.values.http.max_body_size
    }

    /// Returns the time to wait for open connections during shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.limits.shutdown_timeout)
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &proxy_log::LogConfig {
        &self.values.logging
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            values: ConfigValues::default(),
            path: PathBuf::new(),
        }
    }
}
