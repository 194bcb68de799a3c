use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

use config::{ConfigError, Source, Value};

use crate::error::Result;

/// Prefix of the environment variables imported into the host configuration.
pub const ENV_PREFIX: &str = "AZRATH";

/// Separator between section names in environment variable keys (`AZRATH_SERVER__PORT`).
pub const ENV_SECTION_SEPARATOR: &str = "__";

/// Configuration keys read by the host.
pub mod keys {
    pub const APPLICATION_NAME: &str = "application_name";
    pub const ENVIRONMENT: &str = "environment";
    pub const CONTENT_ROOT: &str = "content_root";
    pub const STARTUP_NAME: &str = "startup_name";
    pub const HOSTING_STARTUP_ASSEMBLIES: &str = "hosting_startup_assemblies";
    pub const HOSTING_STARTUP_EXCLUDE_ASSEMBLIES: &str = "hosting_startup_exclude_assemblies";
    pub const PREVENT_HOSTING_STARTUP: &str = "prevent_hosting_startup";
    pub const CAPTURE_STARTUP_ERRORS: &str = "capture_startup_errors";
    pub const SHUTDOWN_TIMEOUT_SECONDS: &str = "shutdown_timeout_seconds";
    pub const SERVER_URLS: &str = "urls";
    pub const PREFER_HOSTING_URLS: &str = "prefer_hosting_urls";
    pub const ALLOWED_HOSTS: &str = "allowed_hosts";
    /// `AllowedHosts` as written in settings files; `config` lower-cases it to this.
    pub const ALLOWED_HOSTS_FILE: &str = "allowedhosts";
    pub const WORKER_THREADS: &str = "worker_threads";
    /// Section forwarded to the HTTP server.
    pub const SERVER_SECTION: &str = "server";
}

/// A frozen, layered key-value configuration.
///
/// Keys are lower-case; sections are separated by `.`.
#[derive(Clone, Default)]
pub struct Configuration {
    inner: Arc<config::Config>,
}

impl Configuration {
    /// Returns the value under `key` as a string, if present.
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get_string(key).ok()
    }

    /// Parses `key` as a boolean: `true` (any case) or `1`. Everything else is `false`.
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|value| {
                let value = value.trim();
                value.eq_ignore_ascii_case("true") || value == "1"
            })
            .unwrap_or(false)
    }

    /// Splits the value under `key` on `;`, dropping empty entries.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|value| split_list(&value))
            .unwrap_or_default()
    }

    /// Deserializes a section, falling back to `T::default()` when it is absent.
    ///
    /// # Errors
    /// Returns a ConfigError if the section exists but cannot be deserialized.
    pub fn section<T>(&self, name: &str) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        match self.inner.get::<T>(name) {
            Ok(value) => Ok(value),
            Err(ConfigError::NotFound(_)) => Ok(T::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Underlying `config::Config`, for callers that need the full API.
    pub fn inner(&self) -> &config::Config {
        &self.inner
    }
}

impl From<config::Config> for Configuration {
    fn from(config: config::Config) -> Self {
        Self {
            inner: Arc::new(config),
        }
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration").finish_non_exhaustive()
    }
}

/// Splits a semicolon-delimited list, trimming entries and dropping empty ones.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Collects configuration sources in precedence order and freezes them into a [`Configuration`].
///
/// Sources added later override earlier ones. Values set with [`ConfigurationBuilder::set`]
/// override every source.
#[derive(Default)]
pub struct ConfigurationBuilder {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
    overrides: Vec<(String, String)>,
}

impl ConfigurationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds any `config` source.
    pub fn add_source<T>(&mut self, source: T) -> &mut Self
    where
        T: Source + Send + Sync + 'static,
    {
        let builder = std::mem::take(&mut self.builder);
        self.builder = builder.add_source(source);
        self
    }

    /// Layers an already built configuration.
    pub fn add_configuration(&mut self, configuration: &Configuration) -> &mut Self {
        self.add_source(configuration.inner().clone())
    }

    /// Imports environment variables.
    ///
    /// With a prefix, only `{PREFIX}_*` variables are imported and the prefix is stripped.
    /// `__` separates sections in both cases.
    pub fn add_environment(&mut self, prefix: Option<&str>) -> &mut Self {
        let source = match prefix {
            Some(prefix) => config::Environment::with_prefix(prefix)
                .prefix_separator("_")
                .separator(ENV_SECTION_SEPARATOR),
            None => config::Environment::default().separator(ENV_SECTION_SEPARATOR),
        };
        self.add_source(source)
    }

    /// Adds a configuration file. The format is inferred from the extension.
    pub fn add_file(&mut self, name: &str, required: bool) -> &mut Self {
        self.add_source(config::File::with_name(name).required(required))
    }

    /// Adds command-line `key=value` overrides.
    pub fn add_command_line<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_source(CommandLine::new(args))
    }

    /// Sets a value that overrides every source.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    /// Loads every source.
    ///
    /// # Errors
    /// Returns a ConfigError if a required source is missing or cannot be parsed.
    pub fn build(self) -> Result<Configuration> {
        let mut builder = self.builder;
        for (key, value) in self.overrides {
            builder = builder.set_override(key, value)?;
        }
        Ok(builder.build()?.into())
    }
}

impl fmt::Debug for ConfigurationBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationBuilder")
            .field("overrides", &self.overrides)
            .finish_non_exhaustive()
    }
}

/// Command-line configuration source.
///
/// Accepts `key=value`, `--key=value`, `/key=value`, `--key value` and `/key value`.
/// A `:` in a key separates sections, like `.`. Arguments that fit none of these
/// forms are ignored.
#[derive(Debug, Clone)]
pub struct CommandLine {
    args: Vec<String>,
}

impl CommandLine {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        let mut args = self.args.iter().peekable();

        while let Some(arg) = args.next() {
            let (flagged, body) = if let Some(rest) = arg.strip_prefix("--") {
                (true, rest)
            } else if let Some(rest) = arg.strip_prefix('/') {
                (true, rest)
            } else {
                (false, arg.as_str())
            };

            if let Some((key, value)) = body.split_once('=') {
                pairs.push((normalize_key(key), value.to_owned()));
            } else if flagged {
                if let Some(value) = args.next_if(|next| !next.starts_with("--") && !next.starts_with('/')) {
                    pairs.push((normalize_key(body), value.clone()));
                }
            }
        }

        pairs
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().replace(':', ".").to_lowercase()
}

impl Source for CommandLine {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> std::result::Result<config::Map<String, Value>, ConfigError> {
        let origin = String::from("command line");
        let mut map = config::Map::new();
        for (key, value) in self.pairs() {
            if key.is_empty() {
                continue;
            }
            map.insert(key, Value::new(Some(&origin), value));
        }
        Ok(map)
    }
}

/// Settings for the HTTP server, read from the `server` configuration section.
///
/// This section is forwarded to the server as-is. It can be set from environment
/// variables such as `AZRATH_SERVER__PORT` or from the `server` table of a config file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host used when neither hosting URLs nor endpoints are configured. Defaults to "127.0.0.1".
    #[serde(default = "default_host")]
    pub host: String,
    /// Port used together with `host`. Defaults to 5000.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Endpoints configured on the server itself. These win over hosting URLs
    /// unless `prefer_hosting_urls` is set.
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default = "default_true")]
    pub http1_keep_alive: bool,
    #[serde(default)]
    pub http1_half_close: bool,
    /// Maximum buffer size for HTTP/1.x requests. Defaults to 512kb (524,288 bytes).
    #[serde(default = "default_max_buf_size")]
    pub http1_max_buf_size: usize,
    #[serde(default)]
    pub http1_title_case_headers: bool,
    #[serde(default)]
    pub http1_preserve_header_case: bool,
    #[serde(default)]
    pub http1_only: bool,
    #[cfg(feature = "http2")]
    #[serde(default)]
    pub http2_only: bool,
    #[cfg(feature = "http2")]
    #[serde(default)]
    pub http2_initial_stream_window_size: Option<u32>,
    #[cfg(feature = "http2")]
    #[serde(default)]
    pub http2_initial_connection_window_size: Option<u32>,
    #[cfg(feature = "http2")]
    #[serde(default = "default_true")]
    pub http2_adaptive_window: bool,
    #[cfg(feature = "http2")]
    #[serde(default)]
    pub http2_max_frame_size: Option<u32>,
    #[cfg(feature = "http2")]
    #[serde(default)]
    pub http2_max_concurrent_streams: Option<u32>,
    #[cfg(feature = "http2")]
    #[serde(default = "default_max_buf_size")]
    pub http2_max_send_buf_size: usize,
}

impl ServerConfig {
    /// Reads the `server` section of `configuration`.
    ///
    /// # Errors
    /// Returns a ConfigError if the section cannot be deserialized.
    pub fn from_configuration(configuration: &Configuration) -> Result<Self> {
        configuration.section(keys::SERVER_SECTION)
    }

    /// The address bound when nothing else is configured.
    pub fn default_address(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Default host address.
fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Default port number.
fn default_port() -> u16 {
    5000
}

fn default_true() -> bool {
    true
}

/// Default maximum buffer size (512kb).
fn default_max_buf_size() -> usize {
    524_288
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            endpoints: Vec::new(),
            http1_keep_alive: true,
            http1_half_close: false,
            http1_max_buf_size: default_max_buf_size(),
            http1_title_case_headers: false,
            http1_preserve_header_case: false,
            http1_only: false,
            #[cfg(feature = "http2")]
            http2_only: false,
            #[cfg(feature = "http2")]
            http2_initial_stream_window_size: None,
            #[cfg(feature = "http2")]
            http2_initial_connection_window_size: None,
            #[cfg(feature = "http2")]
            http2_adaptive_window: true,
            #[cfg(feature = "http2")]
            http2_max_frame_size: None,
            #[cfg(feature = "http2")]
            http2_max_concurrent_streams: None,
            #[cfg(feature = "http2")]
            http2_max_send_buf_size: default_max_buf_size(),
        }
    }
}

/// Builds a configuration from in-memory pairs. Used by tests across the crate.
#[cfg(test)]
pub(crate) fn from_pairs(pairs: &[(&str, &str)]) -> Configuration {
    let mut builder = ConfigurationBuilder::new();
    for (key, value) in pairs {
        builder.set(*key, *value);
    }
    builder.build().expect("in-memory configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::env;

    /// Tests that the default server configuration values are set correctly.
    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.default_address(), "http://127.0.0.1:5000");
        assert!(config.endpoints.is_empty());
    }

    /// Tests server configuration loading from prefixed environment variables.
    #[test]
    fn test_server_config_from_env() {
        env::set_var("AZRATH_SERVER__PORT", "9000");
        env::set_var("AZRATH_SERVER__HOST", "0.0.0.0");

        let mut builder = ConfigurationBuilder::new();
        builder.add_environment(Some(ENV_PREFIX));
        let configuration = builder.build().unwrap();
        let config = ServerConfig::from_configuration(&configuration).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "0.0.0.0");

        env::remove_var("AZRATH_SERVER__PORT");
        env::remove_var("AZRATH_SERVER__HOST");
    }

    #[test]
    fn test_prefixed_environment_strips_prefix() {
        env::set_var("AZRATH_CONFIG_TEST_MARKER", "present");

        let mut builder = ConfigurationBuilder::new();
        builder.add_environment(Some(ENV_PREFIX));
        let configuration = builder.build().unwrap();
        assert_eq!(
            configuration.get("config_test_marker").as_deref(),
            Some("present")
        );

        env::remove_var("AZRATH_CONFIG_TEST_MARKER");
    }

    #[test]
    fn test_missing_section_uses_defaults() {
        let configuration = from_pairs(&[]);
        let config = ServerConfig::from_configuration(&configuration).unwrap();
        assert_eq!(config.port, 5000);
    }

    #[test]
    fn test_get_list_and_bool() {
        let configuration = from_pairs(&[
            ("urls", "http://a; ;http://b;"),
            ("flag_true", "TRUE"),
            ("flag_one", "1"),
            ("flag_other", "yes"),
        ]);

        assert_eq!(configuration.get_list("urls"), vec!["http://a", "http://b"]);
        assert!(configuration.get_list("missing").is_empty());
        assert!(configuration.get_bool("flag_true"));
        assert!(configuration.get_bool("flag_one"));
        assert!(!configuration.get_bool("flag_other"));
        assert!(!configuration.get_bool("missing"));
    }

    #[test]
    fn test_command_line_forms() {
        let source = CommandLine::new([
            "environment=Staging",
            "--urls=http://localhost:8080",
            "--server:port",
            "7000",
            "/application_name",
            "demo",
            "stray",
        ]);
        let pairs: HashMap<String, String> = source.pairs().into_iter().collect();

        assert_eq!(pairs["environment"], "Staging");
        assert_eq!(pairs["urls"], "http://localhost:8080");
        assert_eq!(pairs["server.port"], "7000");
        assert_eq!(pairs["application_name"], "demo");
        assert_eq!(pairs.len(), 4);
    }

    #[test]
    fn test_later_sources_and_overrides_win() {
        let mut builder = ConfigurationBuilder::new();
        builder
            .add_command_line(["environment=Staging", "urls=http://a"])
            .add_command_line(["environment=Development"])
            .set("urls", "http://b");
        let configuration = builder.build().unwrap();

        assert_eq!(configuration.get("environment").as_deref(), Some("Development"));
        assert_eq!(configuration.get("urls").as_deref(), Some("http://b"));
    }

    #[test]
    fn test_layering_built_configuration() {
        let base = from_pairs(&[("environment", "Staging"), ("urls", "http://a")]);
        let mut builder = ConfigurationBuilder::new();
        builder.add_configuration(&base).set("urls", "http://b");
        let configuration = builder.build().unwrap();

        assert_eq!(configuration.get("environment").as_deref(), Some("Staging"));
        assert_eq!(configuration.get("urls").as_deref(), Some("http://b"));
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("localhost;127.0.0.1;[::1]"), vec!["localhost", "127.0.0.1", "[::1]"]);
        assert!(split_list(";;").is_empty());
    }
}
