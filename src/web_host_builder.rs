use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::builder::{AppConfigurationAction, ServicesAction};
use crate::config::{keys, Configuration, ConfigurationBuilder, ENV_PREFIX, ENV_SECTION_SEPARATOR};
use crate::context::HostBuilderContext;
use crate::error::Result;
use crate::pipeline::{ApplicationBuilder, ConfigureApplication};
use crate::server::{HttpServer, Server};
use crate::services::ServiceCollection;
use crate::startup::{self, Startup};
use crate::web_host_service::WebHostServiceOptions;

/// Configures the web part of a host.
///
/// Obtained from [`HostBuilder::configure_web_host`](crate::HostBuilder::configure_web_host).
/// Settings made here become host configuration and win over its other sources. The
/// application configuration layers its own sources on top of them.
/// Callbacks are queued and run by the host builder, in the order they were added.
#[derive(Default)]
pub struct WebHostBuilder {
    settings: Vec<(String, String)>,
    app_configuration: Vec<AppConfigurationAction>,
    services: Vec<ServicesAction>,
}

impl WebHostBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a setting made with [`WebHostBuilder::use_setting`], falling back to the
    /// `AZRATH_`-prefixed environment variable.
    pub fn get_setting(&self, key: &str) -> Option<String> {
        let key = key.to_lowercase();
        self.settings
            .iter()
            .rev()
            .find(|(existing, _)| *existing == key)
            .map(|(_, value)| value.clone())
            .or_else(|| std::env::var(env_name(&key)).ok())
    }

    pub fn use_setting(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        let key = key.to_lowercase();
        let value = value.into();
        match self.settings.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => self.settings.push((key, value)),
        }
        self
    }

    /// Sets the addresses the server listens on, unless it defines its own endpoints.
    pub fn use_urls<I, S>(&mut self, urls: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let urls: Vec<String> = urls.into_iter().map(|url| url.as_ref().to_owned()).collect();
        self.use_setting(keys::SERVER_URLS, urls.join(";"))
    }

    pub fn use_environment(&mut self, environment: &str) -> &mut Self {
        self.use_setting(keys::ENVIRONMENT, environment)
    }

    pub fn use_content_root(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        let path = path.into();
        self.use_setting(keys::CONTENT_ROOT, path.to_string_lossy().into_owned())
    }

    /// Serve a `500` from every request instead of failing start when configuring the
    /// pipeline panics.
    pub fn capture_startup_errors(&mut self, capture: bool) -> &mut Self {
        self.use_setting(keys::CAPTURE_STARTUP_ERRORS, capture.to_string())
    }

    /// Let the `urls` setting win over endpoints configured on the server.
    pub fn prefer_hosting_urls(&mut self, prefer: bool) -> &mut Self {
        self.use_setting(keys::PREFER_HOSTING_URLS, prefer.to_string())
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

    /// Uses `S` to register services and configure the pipeline.
    ///
    /// The startup instance is created once, when services are configured. Its
    /// `configure`, if it has one, replaces any earlier configure-application function.
    pub fn use_startup<S: Startup>(&mut self) -> &mut Self {
        let name = short_type_name::<S>();
        if self.get_setting(keys::APPLICATION_NAME).is_none() {
            self.use_setting(keys::APPLICATION_NAME, name);
        }
        self.use_setting(keys::STARTUP_NAME, name);

        self.configure_services(move |context, services| {
            match startup::activate::<S>(context, services)? {
                Some(configure) => set_configure_application(services, configure),
                None => log::warn!(
                    "Startup type {} has no configure method for {}",
                    name,
                    context.environment.environment_name
                ),
            }
            Ok(())
        })
    }

    /// Uses `f` to configure the pipeline, replacing any earlier configure-application function.
    pub fn configure<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut ApplicationBuilder) + Send + Sync + 'static,
    {
        let configure: ConfigureApplication = Arc::new(f);
        self.configure_services(move |_context, services| {
            set_configure_application(services, configure);
            Ok(())
        })
    }

    /// Uses `server` instead of the default HTTP server.
    pub fn use_server<S: Server + 'static>(&mut self, server: Arc<S>) -> &mut Self {
        self.configure_services(move |_context, services| {
            services.add_singleton::<Arc<dyn Server>>(server);
            Ok(())
        })
    }

    /// Registers an [`HttpServer`] configured from the `server` section, unless a server
    /// is already registered.
    pub fn use_http_server(&mut self) -> &mut Self {
        self.configure_services(|context, services| {
            if !services.contains::<Arc<dyn Server>>() {
                let server = HttpServer::from_configuration(&context.configuration)?;
                services.add_singleton::<Arc<dyn Server>>(Arc::new(server));
            }
            Ok(())
        })
    }

    /// The settings on top of the `AZRATH_`-prefixed environment, as seen by hosting startups.
    pub(crate) fn settings_configuration(&self) -> Result<Configuration> {
        let mut config = ConfigurationBuilder::new();
        config.add_environment(Some(ENV_PREFIX));
        for (key, value) in &self.settings {
            config.set(key.clone(), value.clone());
        }
        config.build()
    }

    pub(crate) fn into_parts(self) -> (Vec<(String, String)>, Vec<AppConfigurationAction>, Vec<ServicesAction>) {
        (self.settings, self.app_configuration, self.services)
    }
}

fn set_configure_application(services: &mut ServiceCollection, configure: ConfigureApplication) {
    services.configure(move |options: &mut WebHostServiceOptions| {
        options.configure_application = Some(Arc::clone(&configure));
    });
}

fn env_name(key: &str) -> String {
    format!("{}_{}", ENV_PREFIX, key.replace('.', ENV_SECTION_SEPARATOR).to_uppercase())
}

fn short_type_name<T>() -> &'static str {
    let name = std::any::type_name::<T>();
    let base = name.split('<').next().unwrap_or(name);
    base.rsplit("::").next().unwrap_or(base)
}

/// File stem of the running executable, the default application name.
pub(crate) fn entry_application_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "application".to_owned())
}

impl fmt::Debug for WebHostBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebHostBuilder")
            .field("settings", &self.settings)
            .field("app_configuration", &self.app_configuration.len())
            .field("services", &self.services.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_are_case_insensitive_and_last_wins() {
        let mut builder = WebHostBuilder::new();
        builder.use_setting("Environment", "Staging").use_environment("Development");

        assert_eq!(builder.get_setting("ENVIRONMENT").as_deref(), Some("Development"));
        assert_eq!(builder.get_setting("azrath_host_tests_unset"), None);
    }

    #[test]
    fn test_use_urls_joins_with_semicolons() {
        let mut builder = WebHostBuilder::new();
        builder.use_urls(["http://a:1", "http://b:2"]);
        assert_eq!(builder.get_setting("urls").as_deref(), Some("http://a:1;http://b:2"));

        let config = builder.settings_configuration().unwrap();
        assert_eq!(config.get_list("urls"), vec!["http://a:1", "http://b:2"]);
    }

    #[test]
    fn test_env_names() {
        assert_eq!(env_name("server.port"), "AZRATH_SERVER__PORT");
        assert_eq!(env_name("urls"), "AZRATH_URLS");
    }

    #[test]
    fn test_use_startup_names_the_application_once() {
        struct Shop;
        impl Startup for Shop {
            fn create(_services: &startup::StartupServices<'_>) -> Result<Self> {
                Ok(Shop)
            }

            fn methods() -> startup::StartupMethods<Self> {
                startup::StartupMethods::new()
            }
        }

        let mut builder = WebHostBuilder::new();
        builder.use_startup::<Shop>();
        assert_eq!(builder.get_setting("application_name").as_deref(), Some("Shop"));
        assert_eq!(builder.get_setting("startup_name").as_deref(), Some("Shop"));

        let mut named = WebHostBuilder::new();
        named.use_setting("application_name", "orders").use_startup::<Shop>();
        assert_eq!(named.get_setting("application_name").as_deref(), Some("orders"));
    }
}
