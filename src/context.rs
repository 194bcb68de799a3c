use std::sync::Arc;

use crate::config::Configuration;
use crate::environment::{HostOptions, HostingEnvironment};

/// Build-time state handed to every configuration and service callback.
///
/// Created once by the host builder, after host configuration is loaded and before the
/// first callback that needs it. During app configuration `configuration` is the host
/// configuration; service callbacks see the final, merged configuration.
#[derive(Debug, Clone)]
pub struct HostBuilderContext {
    pub configuration: Configuration,
    pub environment: Arc<HostingEnvironment>,
    pub options: Arc<HostOptions>,
}

impl HostBuilderContext {
    pub fn new(configuration: Configuration, options: HostOptions) -> Self {
        let environment = Arc::new(HostingEnvironment::from(&options));
        Self {
            configuration,
            environment,
            options: Arc::new(options),
        }
    }

    /// Same environment and options, final configuration.
    pub(crate) fn with_configuration(&self, configuration: Configuration) -> Self {
        Self {
            configuration,
            environment: Arc::clone(&self.environment),
            options: Arc::clone(&self.options),
        }
    }
}
