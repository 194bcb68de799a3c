use std::path::PathBuf;
use std::time::Duration;

use crate::config::{keys, Configuration};

/// Well-known environment names.
pub mod environments {
    pub const DEVELOPMENT: &str = "Development";
    pub const STAGING: &str = "Staging";
    pub const PRODUCTION: &str = "Production";
}

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings read once from configuration while the host is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOptions {
    pub application_name: String,
    pub environment: String,
    pub content_root: PathBuf,
    /// Name of the startup type registered with `use_startup`, if any.
    pub startup_name: Option<String>,
    /// Hosting startups that must be loaded in addition to the registered ones.
    pub hosting_startups: Vec<String>,
    pub hosting_startup_exclude: Vec<String>,
    pub prevent_hosting_startup: bool,
    pub capture_startup_errors: bool,
    pub shutdown_timeout: Duration,
}

impl HostOptions {
    /// Reads the options from `configuration`.
    ///
    /// `default_application_name` is used when `application_name` is not configured.
    pub fn from_configuration(configuration: &Configuration, default_application_name: &str) -> Self {
        let application_name = configuration
            .get(keys::APPLICATION_NAME)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| default_application_name.to_owned());

        let environment = configuration
            .get(keys::ENVIRONMENT)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| environments::PRODUCTION.to_owned());

        let content_root = configuration
            .get(keys::CONTENT_ROOT)
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        let shutdown_timeout = configuration
            .get(keys::SHUTDOWN_TIMEOUT_SECONDS)
            .and_then(|secs| secs.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        Self {
            application_name,
            environment,
            content_root,
            startup_name: configuration.get(keys::STARTUP_NAME),
            hosting_startups: configuration.get_list(keys::HOSTING_STARTUP_ASSEMBLIES),
            hosting_startup_exclude: configuration.get_list(keys::HOSTING_STARTUP_EXCLUDE_ASSEMBLIES),
            prevent_hosting_startup: configuration.get_bool(keys::PREVENT_HOSTING_STARTUP),
            capture_startup_errors: configuration.get_bool(keys::CAPTURE_STARTUP_ERRORS),
            shutdown_timeout,
        }
    }

    /// Whether the hosting startup `name` is excluded, compared case-insensitively.
    pub fn is_excluded(&self, name: &str) -> bool {
        self.hosting_startup_exclude
            .iter()
            .any(|excluded| excluded.eq_ignore_ascii_case(name))
    }
}

/// The environment an application runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostingEnvironment {
    pub environment_name: String,
    pub application_name: String,
    pub content_root_path: PathBuf,
}

impl HostingEnvironment {
    pub fn is_environment(&self, name: &str) -> bool {
        self.environment_name.eq_ignore_ascii_case(name)
    }

    pub fn is_development(&self) -> bool {
        self.is_environment(environments::DEVELOPMENT)
    }

    pub fn is_staging(&self) -> bool {
        self.is_environment(environments::STAGING)
    }

    pub fn is_production(&self) -> bool {
        self.is_environment(environments::PRODUCTION)
    }
}

impl From<&HostOptions> for HostingEnvironment {
    fn from(options: &HostOptions) -> Self {
        Self {
            environment_name: options.environment.clone(),
            application_name: options.application_name.clone(),
            content_root_path: options.content_root.clone(),
        }
    }
}
