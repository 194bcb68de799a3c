use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{keys, Configuration};
use crate::environment::HostOptions;
use crate::error::{HostError, HostingStartupErrors, Result};
use crate::filter::{self, StartupFilter};
use crate::host::HostedService;
use crate::hosting_application::{panic_message, HostingApplication};
use crate::http::{text_response, StatusCode};
use crate::logging;
use crate::pipeline::{handler, ApplicationBuilder, ConfigureApplication};
use crate::server::Server;
use crate::services::ServiceProvider;

/// What the web host service needs from the build: the configure-application function,
/// the host options and any hosting startup errors captured along the way.
///
/// Assembled with `ServiceCollection::configure`; the last `configure_application` wins.
#[derive(Clone, Default)]
pub struct WebHostServiceOptions {
    pub configure_application: Option<ConfigureApplication>,
    pub options: Option<Arc<HostOptions>>,
    pub startup_errors: Option<Arc<HostingStartupErrors>>,
}

impl fmt::Debug for WebHostServiceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebHostServiceOptions")
            .field("configure_application", &self.configure_application.is_some())
            .field("options", &self.options)
            .field("startup_errors", &self.startup_errors)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebHostState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Hosted service that builds the request pipeline and runs the server.
pub struct WebHostService {
    options: Mutex<Option<WebHostServiceOptions>>,
    services: Arc<ServiceProvider>,
    server: Arc<dyn Server>,
    filters: Vec<Arc<dyn StartupFilter>>,
    configuration: Configuration,
    state: Mutex<WebHostState>,
}

impl WebHostService {
    /// Resolves the service's dependencies.
    ///
    /// # Errors
    /// `MissingConfigureApplication` when neither `configure` nor `use_startup` ran. This is
    /// checked before the server is resolved. `ServiceNotRegistered` when no server is registered.
    pub fn new(services: &Arc<ServiceProvider>) -> Result<Self> {
        let options = services.options::<WebHostServiceOptions>();
        if options.configure_application.is_none() {
            return Err(HostError::MissingConfigureApplication);
        }

        Ok(Self {
            options: Mutex::new(Some(options)),
            server: services.require::<Arc<dyn Server>>()?,
            filters: services.get_all::<Arc<dyn StartupFilter>>(),
            configuration: services.get::<Configuration>().unwrap_or_default(),
            services: Arc::clone(services),
            state: Mutex::new(WebHostState::Created),
        })
    }

    pub fn state(&self) -> WebHostState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: WebHostState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn begin_start(&self) -> Result<WebHostServiceOptions> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != WebHostState::Created {
            return Err(HostError::InvalidState(format!(
                "web host cannot start while {:?}",
                *state
            )));
        }
        let options = self
            .options
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default();
        *state = WebHostState::Starting;
        Ok(options)
    }

    /// Fills an empty server address set from the `urls` setting.
    fn populate_addresses(&self) {
        let Some(addresses) = self.server.addresses() else {
            return;
        };
        if !addresses.is_empty() {
            return;
        }
        let urls = self.configuration.get_list(keys::SERVER_URLS);
        if urls.is_empty() {
            return;
        }
        addresses.set_prefer_hosting_urls(self.configuration.get_bool(keys::PREFER_HOSTING_URLS));
        for url in urls {
            addresses.add(url);
        }
    }

    /// Runs the filtered configure-application function and builds the pipeline.
    ///
    /// A panic while configuring fails the start, unless `capture_startup_errors` is set:
    /// then it is logged and every request is answered with `500`.
    fn build_application(&self, configure: ConfigureApplication, capture: bool) -> Result<HostingApplication> {
        let configure = filter::compose(&self.filters, configure);
        let mut builder =
            ApplicationBuilder::with_server_addresses(Arc::clone(&self.services), self.server.addresses());

        let pipeline = match panic::catch_unwind(AssertUnwindSafe(move || {
            configure(&mut builder);
            builder
        })) {
            Ok(builder) => builder.build(),
            Err(panic) => {
                let message = format!("configuring the application panicked: {}", panic_message(&*panic));
                if !capture {
                    return Err(HostError::Callback(message));
                }
                log::error!("Application startup exception\n{}", message);
                handler(|_context| async { text_response(StatusCode::INTERNAL_SERVER_ERROR, "") })
            }
        };
        Ok(HostingApplication::new(pipeline, Arc::clone(&self.services)))
    }
}

#[async_trait]
impl HostedService for WebHostService {
    async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let options = self.begin_start()?;
        let Some(configure) = options.configure_application else {
            self.set_state(WebHostState::Stopped);
            return Err(HostError::MissingConfigureApplication);
        };
        if let Some(errors) = &options.startup_errors {
            logging::log_hosting_startup_errors(errors);
        }

        self.populate_addresses();
        let capture = options
            .options
            .as_ref()
            .map_or(false, |options| options.capture_startup_errors);
        let application = match self.build_application(configure, capture) {
            Ok(application) => application,
            Err(e) => {
                self.set_state(WebHostState::Stopped);
                return Err(e);
            }
        };

        if let Err(e) = self.server.start(application, cancel).await {
            self.set_state(WebHostState::Stopped);
            return Err(e);
        }

        if let Some(addresses) = self.server.addresses() {
            for address in addresses.to_vec() {
                log::info!("Now listening on: {}", address);
            }
        }
        self.set_state(WebHostState::Running);
        Ok(())
    }

    async fn stop(&self, cancel: CancellationToken) -> Result<()> {
        if self.state() == WebHostState::Running {
            self.set_state(WebHostState::Stopping);
        }
        let result = self.server.stop(cancel).await;
        self.set_state(WebHostState::Stopped);
        result
    }
}

impl fmt::Debug for WebHostService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebHostService")
            .field("state", &self.state())
            .field("filters", &self.filters.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::from_pairs;
    use crate::server::ServerAddresses;
    use crate::services::ServiceCollection;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Server double that records calls and keeps the last application.
    #[derive(Default)]
    pub(crate) struct FakeServer {
        pub(crate) addresses: ServerAddresses,
        pub(crate) starts: AtomicUsize,
        pub(crate) stops: AtomicUsize,
        pub(crate) application: Mutex<Option<HostingApplication>>,
    }

    #[async_trait]
    impl Server for FakeServer {
        fn addresses(&self) -> Option<&ServerAddresses> {
            Some(&self.addresses)
        }

        async fn start(&self, application: HostingApplication, _cancel: CancellationToken) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            *self.application.lock().unwrap() = Some(application);
            Ok(())
        }

        async fn stop(&self, _cancel: CancellationToken) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn provider(server: &Arc<FakeServer>, settings: &[(&str, &str)], configure: bool) -> Arc<ServiceProvider> {
        with_configure(server, settings, configure.then(|| -> ConfigureApplication {
            Arc::new(|_app: &mut ApplicationBuilder| {})
        }))
    }

    fn with_configure(
        server: &Arc<FakeServer>,
        settings: &[(&str, &str)],
        configure: Option<ConfigureApplication>,
    ) -> Arc<ServiceProvider> {
        let configuration = from_pairs(settings);
        let options = Arc::new(crate::environment::HostOptions::from_configuration(&configuration, "tests"));
        let mut services = ServiceCollection::new();
        services.add_singleton::<Arc<dyn Server>>(server.clone());
        services.add_singleton(configuration);
        services.configure(move |web: &mut WebHostServiceOptions| {
            web.configure_application = configure.clone();
            web.options = Some(Arc::clone(&options));
        });
        Arc::new(services.build_provider())
    }

    fn panicking() -> Option<ConfigureApplication> {
        Some(Arc::new(|_app: &mut ApplicationBuilder| panic!("no routes")))
    }

    #[tokio::test]
    async fn test_configure_panic_fails_start() {
        let server = Arc::new(FakeServer::default());
        let service = WebHostService::new(&with_configure(&server, &[], panicking())).unwrap();

        let error = service.start(CancellationToken::new()).await.unwrap_err();
        assert_eq!(error.to_string(), "configuring the application panicked: no routes");
        assert_eq!(server.starts.load(Ordering::SeqCst), 0);
        assert_eq!(service.state(), WebHostState::Stopped);
    }

    #[tokio::test]
    async fn test_captured_configure_panic_serves_errors() {
        let server = Arc::new(FakeServer::default());
        let settings = [("capture_startup_errors", "true")];
        let service = WebHostService::new(&with_configure(&server, &settings, panicking())).unwrap();

        service.start(CancellationToken::new()).await.unwrap();
        let application = server.application.lock().unwrap().take().unwrap();
        let response = application
            .process_request(crate::http::Request::new(crate::http::Body::empty()), None)
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_missing_configure_application() {
        let server = Arc::new(FakeServer::default());
        let result = WebHostService::new(&provider(&server, &[], false));
        assert!(matches!(result, Err(HostError::MissingConfigureApplication)));
        assert_eq!(server.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_urls_fill_empty_addresses() {
        let server = Arc::new(FakeServer::default());
        let settings = [("urls", "http://a;;http://b"), ("prefer_hosting_urls", "TRUE")];
        let service = WebHostService::new(&provider(&server, &settings, true)).unwrap();

        service.start(CancellationToken::new()).await.unwrap();
        assert_eq!(server.addresses.to_vec(), vec!["http://a", "http://b"]);
        assert!(server.addresses.prefer_hosting_urls());
        assert_eq!(service.state(), WebHostState::Running);
    }

    #[tokio::test]
    async fn test_repeated_urls_are_bound_once() {
        let server = Arc::new(FakeServer::default());
        let service = WebHostService::new(&provider(&server, &[("urls", "http://a;http://a")], true)).unwrap();

        service.start(CancellationToken::new()).await.unwrap();
        assert_eq!(server.addresses.to_vec(), vec!["http://a"]);
    }

    #[tokio::test]
    async fn test_existing_addresses_are_kept() {
        let server = Arc::new(FakeServer::default());
        server.addresses.add("http://pre-bound");
        let service = WebHostService::new(&provider(&server, &[("urls", "http://a")], true)).unwrap();

        service.start(CancellationToken::new()).await.unwrap();
        assert_eq!(server.addresses.to_vec(), vec!["http://pre-bound"]);
    }

    #[tokio::test]
    async fn test_start_twice_and_stop_twice() {
        let server = Arc::new(FakeServer::default());
        let service = WebHostService::new(&provider(&server, &[], true)).unwrap();

        service.start(CancellationToken::new()).await.unwrap();
        assert!(matches!(
            service.start(CancellationToken::new()).await,
            Err(HostError::InvalidState(_))
        ));
        assert_eq!(server.starts.load(Ordering::SeqCst), 1);

        service.stop(CancellationToken::new()).await.unwrap();
        service.stop(CancellationToken::new()).await.unwrap();
        assert_eq!(service.state(), WebHostState::Stopped);
        assert_eq!(server.stops.load(Ordering::SeqCst), 2);
    }
}
