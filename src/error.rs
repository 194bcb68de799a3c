use std::fmt;
use std::io;
use thiserror::Error;

/// Errors raised while building, starting or stopping a host.
#[derive(Debug, Error)]
pub enum HostError {
    /// The configuration sources could not be loaded or a value could not be converted.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// No configure-application function was registered before the web host started.
    #[error("no configure-application function was registered; call `configure` or `use_startup`")]
    MissingConfigureApplication,

    /// A startup method was registered more than once for the same environment.
    #[error("startup method `{method}` is registered more than once for environment `{environment}`")]
    AmbiguousStartupMethod {
        method: &'static str,
        environment: String,
    },

    /// The startup type asked the startup locator for a service it cannot answer.
    #[error("unable to resolve `{0}` while constructing the startup type")]
    UnresolvedStartupDependency(&'static str),

    /// A required service is missing from the registry.
    #[error("service `{0}` is not registered")]
    ServiceNotRegistered(&'static str),

    /// A feature the host recognises but does not implement.
    #[error("`{0}` is not supported")]
    Unsupported(&'static str),

    /// An operation was invoked in the wrong lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A server address could not be parsed or bound.
    #[error("invalid server address `{address}`: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// A hosted service failed to stop.
    #[error("{} hosted service(s) failed to stop: {}", .0.len(), join_messages(.0))]
    Stop(Vec<HostError>),

    /// Error reported by a user callback.
    #[error("{0}")]
    Callback(String),

    /// Error from the underlying HTTP server.
    #[error("server error: {0}")]
    Server(#[from] hyper::Error),

    /// Wrapper for standard I/O errors.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl HostError {
    /// Wraps a message produced by user code.
    pub fn callback(message: impl fmt::Display) -> Self {
        HostError::Callback(message.to_string())
    }
}

/// A single failure raised while loading or running a hosting startup.
#[derive(Debug, Error)]
pub enum HostingStartupError {
    #[error("hosting startup `{0}` is not registered")]
    NotFound(String),

    #[error("hosting startup `{name}` failed: {source}")]
    Failed {
        name: String,
        #[source]
        source: Box<HostError>,
    },
}

/// Every hosting startup failure captured during a build.
///
/// These are collected instead of thrown so they can be logged once logging is available.
#[derive(Debug, Default, Error)]
#[error("hosting startup errors: {}", join_messages(.errors))]
pub struct HostingStartupErrors {
    errors: Vec<HostingStartupError>,
}

impl HostingStartupErrors {
    pub fn push(&mut self, error: HostingStartupError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostingStartupError> {
        self.errors.iter()
    }

    /// Returns `None` when nothing was captured.
    pub fn into_option(self) -> Option<Self> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

fn join_messages<E: fmt::Display>(errors: &[E]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Type alias for Results using HostError as the error type
pub type Result<T> = std::result::Result<T, HostError>;
