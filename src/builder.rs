//! The host builder.
//!
//! Callbacks are queued while the builder is configured and run by [`HostBuilder::build`]
//! in a fixed order: host configuration, then application configuration (seeded with the
//! host configuration), then services. Within each group they run in registration order.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{keys, ConfigurationBuilder, ENV_PREFIX};
use crate::context::HostBuilderContext;
use crate::environment::HostOptions;
use crate::error::{HostError, Result};
use crate::host::{Host, HostedService};
use crate::host_filtering::add_host_filtering;
use crate::hosting_startup::{HostingStartup, HostingStartups};
use crate::lifetime::ApplicationLifetime;
use crate::services::ServiceCollection;
use crate::web_host_builder::{entry_application_name, WebHostBuilder};
use crate::web_host_service::{WebHostService, WebHostServiceOptions};

pub(crate) type HostConfigurationAction = Box<dyn FnOnce(&mut ConfigurationBuilder) -> Result<()>>;
pub(crate) type AppConfigurationAction =
    Box<dyn FnOnce(&HostBuilderContext, &mut ConfigurationBuilder) -> Result<()>>;
pub(crate) type ServicesAction = Box<dyn FnOnce(&HostBuilderContext, &mut ServiceCollection) -> Result<()>>;

/// Builds a [`Host`].
///
/// ```no_run
/// use azrath_host::{ApplicationBuilder, Body, Host, Response};
///
/// fn main() -> azrath_host::Result<()> {
///     let mut builder = Host::create_default_builder(std::env::args().skip(1));
///     builder.configure_web_host_defaults(|web| {
///         web.configure(|app: &mut ApplicationBuilder| {
///             app.run(|_context| async { Response::new(Body::new("Hello world!")) });
///         });
///         Ok(())
///     })?;
///     builder.build()?.run_blocking()
/// }
/// ```
#[derive(Default)]
pub struct HostBuilder {
    host_configuration: Vec<HostConfigurationAction>,
    app_configuration: Vec<AppConfigurationAction>,
    services: Vec<ServicesAction>,
    hosting_startups: HostingStartups,
    web_host_configured: bool,
}

impl HostBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure_host_configuration<F>(&mut self, f: F) -> &mut Self
    where
        F: FnOnce(&mut ConfigurationBuilder) -> Result<()> + 'static,
    {
        self.host_configuration.push(Box::new(f));
        self
    }

    pub fn configure_app_configuration<F>(&mut self, f: F) -> &mut Self
    where
        F: FnOnce(&HostBuilderContext, &mut ConfigurationBuilder) -> Result<()> + 'static,
    {
        self.app_configuration.push(Box::new(f));
        self
    }

    pub fn configure_services<F>(&mut self, f: F) -> &mut Self
    where
        F: FnOnce(&HostBuilderContext, &mut ServiceCollection) -> Result<()> + 'static,
    {
        self.services.push(Box::new(f));
        self
    }

    pub fn use_environment(&mut self, environment: &str) -> &mut Self {
        let environment = environment.to_owned();
        self.configure_host_configuration(move |config| {
            config.set(keys::ENVIRONMENT, environment);
            Ok(())
        })
    }

    pub fn use_content_root(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        let path = path.into().to_string_lossy().into_owned();
        self.configure_host_configuration(move |config| {
            config.set(keys::CONTENT_ROOT, path);
            Ok(())
        })
    }

    /// Registers a hosting startup. It runs when the web host is configured, unless
    /// excluded by `hosting_startup_exclude_assemblies` or `prevent_hosting_startup`.
    pub fn add_hosting_startup(&mut self, name: &str, startup: impl HostingStartup + 'static) -> &mut Self {
        self.hosting_startups.register(name, startup);
        self
    }

    /// Adds a web host.
    ///
    /// Hosting startups run first, then `f`. The web host's settings become host
    /// configuration and its callbacks are queued behind the web host services.
    ///
    /// # Errors
    /// Whatever `f` returns, a configuration error while reading the web settings, or
    /// `InvalidState` if a web host was already configured.
    pub fn configure_web_host<F>(&mut self, f: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut WebHostBuilder) -> Result<()>,
    {
        if self.web_host_configured {
            return Err(HostError::InvalidState("a web host is already configured".into()));
        }
        self.web_host_configured = true;

        let mut web = WebHostBuilder::new();
        let options = HostOptions::from_configuration(&web.settings_configuration()?, &entry_application_name());
        let startup_errors = self.hosting_startups.execute(&options, &mut web);
        if !startup_errors.is_empty() {
            log::debug!("{} hosting startup error(s) captured", startup_errors.len());
        }

        f(&mut web)?;

        let (settings, app_configuration, services) = web.into_parts();
        self.configure_host_configuration(move |config| {
            for (key, value) in settings {
                config.set(key, value);
            }
            Ok(())
        });

        let startup_errors = startup_errors.into_option().map(Arc::new);
        self.configure_services(move |context, services| {
            let options = Arc::clone(&context.options);
            services.configure(move |web: &mut WebHostServiceOptions| {
                web.options = Some(Arc::clone(&options));
                web.startup_errors = startup_errors.clone();
            });
            services.add_hosted_service(|provider| {
                Ok(Arc::new(WebHostService::new(provider)?) as Arc<dyn HostedService>)
            });
            Ok(())
        });

        self.app_configuration.extend(app_configuration);
        self.services.extend(services);
        Ok(self)
    }

    /// Adds a web host with the default HTTP server and host filtering.
    pub fn configure_web_host_defaults<F>(&mut self, f: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut WebHostBuilder) -> Result<()>,
    {
        self.configure_web_host(|web| {
            web.use_http_server()
                .configure_services(|context, services| add_host_filtering(services, &context.configuration));
            f(web)
        })
    }

    /// Runs every queued callback and freezes the result.
    ///
    /// # Errors
    /// The first error from a callback or from loading configuration.
    pub fn build(self) -> Result<Host> {
        let mut host_config = ConfigurationBuilder::new();
        host_config.add_environment(Some(ENV_PREFIX));
        for action in self.host_configuration {
            action(&mut host_config)?;
        }
        let host_configuration = host_config.build()?;

        let options = HostOptions::from_configuration(&host_configuration, &entry_application_name());
        let shutdown_timeout = options.shutdown_timeout;
        let context = HostBuilderContext::new(host_configuration.clone(), options);
        log::debug!(
            "Building host for {} in {}",
            context.environment.application_name,
            context.environment.environment_name
        );

        let mut app_config = ConfigurationBuilder::new();
        app_config.add_configuration(&host_configuration);
        for action in self.app_configuration {
            action(&context, &mut app_config)?;
        }
        let context = context.with_configuration(app_config.build()?);

        let mut services = ServiceCollection::new();
        services
            .add_singleton(context.configuration.clone())
            .add_singleton(Arc::clone(&context.environment))
            .add_singleton(Arc::clone(&context.options))
            .add_singleton(ApplicationLifetime::new());
        for action in self.services {
            action(&context, &mut services)?;
        }

        Ok(Host::new(services.build_provider(), shutdown_timeout))
    }
}

impl fmt::Debug for HostBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBuilder")
            .field("host_configuration", &self.host_configuration.len())
            .field("app_configuration", &self.app_configuration.len())
            .field("services", &self.services.len())
            .field("hosting_startups", &self.hosting_startups)
            .finish()
    }
}
