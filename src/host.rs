use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::builder::HostBuilder;
use crate::config::{keys, Configuration};
use crate::error::{HostError, Result};
use crate::lifetime::ApplicationLifetime;
use crate::logging;
use crate::services::{ServiceCollection, ServiceProvider};

/// A background service whose lifetime is tied to the host.
#[async_trait]
pub trait HostedService: Send + Sync {
    /// Called once when the host starts. `cancel` fires if startup should be abandoned.
    async fn start(&self, cancel: CancellationToken) -> Result<()>;

    /// Called once when the host stops. `cancel` fires when the shutdown timeout elapses.
    async fn stop(&self, cancel: CancellationToken) -> Result<()>;
}

/// Creates a hosted service once the registry is frozen.
pub type HostedServiceFactory =
    Arc<dyn Fn(&Arc<ServiceProvider>) -> Result<Arc<dyn HostedService>> + Send + Sync>;

impl ServiceCollection {
    /// Registers a hosted service. Hosted services start in registration order and stop in reverse.
    pub fn add_hosted_service<F>(&mut self, factory: F) -> &mut Self
    where
        F: Fn(&Arc<ServiceProvider>) -> Result<Arc<dyn HostedService>> + Send + Sync + 'static,
    {
        self.add::<HostedServiceFactory>(Arc::new(factory))
    }
}

/// A built host: the frozen service registry plus its hosted services.
pub struct Host {
    services: Arc<ServiceProvider>,
    lifetime: ApplicationLifetime,
    shutdown_timeout: Duration,
    hosted: tokio::sync::Mutex<Vec<Arc<dyn HostedService>>>,
}

impl Host {
    pub(crate) fn new(services: ServiceProvider, shutdown_timeout: Duration) -> Self {
        let lifetime = services.get::<ApplicationLifetime>().unwrap_or_default();
        Self {
            services: Arc::new(services),
            lifetime,
            shutdown_timeout,
            hosted: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// A builder with the usual configuration sources.
    ///
    /// Loads `.env` into the process environment. Host configuration reads
    /// `AZRATH_`-prefixed environment variables and `args`. Application configuration
    /// reads the optional `appsettings` and `appsettings.{environment}` files from the
    /// content root, then unprefixed environment variables, then `args`.
    pub fn create_default_builder<I, S>(args: I) -> HostBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        if let Err(e) = dotenv::dotenv() {
            log::debug!("No .env file loaded: {}", e);
        }

        let mut builder = HostBuilder::new();

        if let Ok(cwd) = std::env::current_dir() {
            builder.use_content_root(cwd);
        }

        let host_args = args.clone();
        builder.configure_host_configuration(move |config| {
            config.add_command_line(host_args);
            Ok(())
        });

        builder.configure_app_configuration(move |context, config| {
            let root = &context.environment.content_root_path;
            config
                .add_file(&settings_path(root, "appsettings"), false)
                .add_file(
                    &settings_path(root, &format!("appsettings.{}", context.environment.environment_name)),
                    false,
                )
                .add_environment(None)
                .add_command_line(args);
            Ok(())
        });

        builder
    }

    pub fn services(&self) -> &Arc<ServiceProvider> {
        &self.services
    }

    pub fn lifetime(&self) -> &ApplicationLifetime {
        &self.lifetime
    }

    /// Creates and starts every hosted service, then signals Started.
    ///
    /// # Errors
    /// The first error from creating or starting a hosted service. Services started
    /// before it keep running until [`Host::stop`].
    pub async fn start(&self) -> Result<()> {
        let mut hosted = self.hosted.lock().await;
        if !hosted.is_empty() {
            return Err(HostError::InvalidState("host is already started".into()));
        }

        let factories = self.services.get_all::<HostedServiceFactory>();
        let mut created = Vec::with_capacity(factories.len());
        for factory in factories {
            created.push(factory(&self.services)?);
        }

        let cancel = self.lifetime.stopping();
        for service in created {
            service.start(cancel.clone()).await?;
            hosted.push(service);
        }

        log::debug!("Hosting started");
        self.lifetime.notify_started();
        Ok(())
    }

    /// Stops started hosted services in reverse order.
    ///
    /// Each service sees a token that fires once the shutdown timeout elapses.
    ///
    /// # Errors
    /// `HostError::Stop` with every error the services returned.
    pub async fn stop(&self) -> Result<()> {
        self.lifetime.notify_stopping();

        let timeout = CancellationToken::new();
        let timer = {
            let timeout = timeout.clone();
            let after = self.shutdown_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                timeout.cancel();
            })
        };

        let mut errors = Vec::new();
        let hosted = std::mem::take(&mut *self.hosted.lock().await);
        for service in hosted.iter().rev() {
            if let Err(e) = service.stop(timeout.clone()).await {
                log::warn!("Hosted service failed to stop: {}", e);
                errors.push(e);
            }
        }
        timer.abort();

        log::debug!("Hosting stopped");
        self.lifetime.notify_stopped();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(HostError::Stop(errors))
        }
    }

    /// Starts the host, waits for Ctrl-C or [`ApplicationLifetime::stop_application`], then stops it.
    pub async fn run(self) -> Result<()> {
        self.run_until(tokio::signal::ctrl_c()).await
    }

    /// Like [`Host::run`] with `signal` standing in for Ctrl-C. A signal that fails
    /// still stops the host.
    async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        if let Err(e) = self.start().await {
            logging::log_application_error(&e);
            if let Err(stop) = self.stop().await {
                log::warn!("Error while stopping after a failed start: {}", stop);
            }
            return Err(e);
        }

        log::info!("Application started. Press Ctrl+C to shut down.");
        tokio::select! {
            signal = signal => {
                if let Err(e) = signal {
                    log::error!("Unable to listen for Ctrl+C: {}", e);
                }
            }
            _ = self.lifetime.stop_requested() => {}
        }
        log::info!("Application is shutting down...");

        self.stop().await
    }

    /// Runs the host on a new multi-threaded runtime.
    ///
    /// The worker count comes from `worker_threads` and defaults to the number of CPUs.
    pub fn run_blocking(self) -> Result<()> {
        let workers = self
            .services
            .get::<Configuration>()
            .and_then(|config| config.get(keys::WORKER_THREADS))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .filter(|&workers| workers > 0)
            .unwrap_or_else(num_cpus::get);

        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .enable_all()
            .build()?
            .block_on(self.run())
    }
}

fn settings_path(root: &Path, name: &str) -> String {
    root.join(name).to_string_lossy().into_owned()
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("services", &self.services)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::StartupFilter;
    use crate::http::{Body, Request, Response, StatusCode};
    use crate::pipeline::{ApplicationBuilder, ConfigureApplication};
    use crate::server::Server;
    use crate::web_host_service::tests::FakeServer;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl HostedService for Recorder {
        async fn start(&self, _cancel: CancellationToken) -> Result<()> {
            self.log.lock().unwrap().push(format!("start {}", self.name));
            Ok(())
        }

        async fn stop(&self, _cancel: CancellationToken) -> Result<()> {
            self.log.lock().unwrap().push(format!("stop {}", self.name));
            if self.name == "failing" {
                return Err(HostError::callback("cannot stop"));
            }
            Ok(())
        }
    }

    fn recorder(
        log: &Arc<Mutex<Vec<String>>>,
        name: &'static str,
    ) -> impl Fn(&Arc<ServiceProvider>) -> Result<Arc<dyn HostedService>> + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |_services| Ok(Arc::new(Recorder { name, log: Arc::clone(&log) }) as Arc<dyn HostedService>)
    }

    #[tokio::test]
    async fn test_hosted_services_start_in_order_and_stop_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (first, second) = (recorder(&log, "first"), recorder(&log, "failing"));
        let mut builder = HostBuilder::new();
        builder.configure_services(move |_context, services| {
            services.add_hosted_service(first).add_hosted_service(second);
            Ok(())
        });
        let host = builder.build().unwrap();
        let lifetime = host.lifetime().clone();

        host.start().await.unwrap();
        assert!(lifetime.started().is_cancelled());

        let result = host.stop().await;
        assert!(matches!(result, Err(HostError::Stop(ref errors)) if errors.len() == 1));
        assert!(lifetime.stopping().is_cancelled());
        assert!(lifetime.stopped().is_cancelled());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start first", "start failing", "stop failing", "stop first"]
        );

        // Nothing left to stop.
        host.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_signal_listener_still_stops_services() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let service = recorder(&log, "web");
        let mut builder = HostBuilder::new();
        builder.configure_services(move |_context, services| {
            services.add_hosted_service(service);
            Ok(())
        });
        let host = builder.build().unwrap();
        let lifetime = host.lifetime().clone();

        let signal = async { Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "signals unavailable")) };
        host.run_until(signal).await.unwrap();

        assert!(lifetime.stopped().is_cancelled());
        assert_eq!(*log.lock().unwrap(), vec!["start web", "stop web"]);
    }

    fn marker_filter(log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn StartupFilter> {
        let log = Arc::clone(log);
        Arc::new(move |next: ConfigureApplication| -> ConfigureApplication {
            let log = Arc::clone(&log);
            Arc::new(move |app: &mut ApplicationBuilder| {
                let log = Arc::clone(&log);
                app.use_fn(move |context, next| {
                    log.lock().unwrap().push("filter-marker".to_owned());
                    next(context)
                });
                next(app);
            })
        })
    }

    #[tokio::test]
    async fn test_end_to_end_filter_runs_before_user_pipeline() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let server = Arc::new(FakeServer::default());

        let mut builder = HostBuilder::new();
        let (filter_log, user_log, fake) = (Arc::clone(&log), Arc::clone(&log), Arc::clone(&server));
        builder
            .configure_web_host(move |web| {
                web.use_server(fake)
                    .use_setting("urls", "http://a;http://b")
                    .configure_services(move |_context, services| {
                        services.add(marker_filter(&filter_log));
                        Ok(())
                    })
                    .configure(move |app: &mut ApplicationBuilder| {
                        let log = Arc::clone(&user_log);
                        app.run(move |_context| {
                            log.lock().unwrap().push("user-marker".to_owned());
                            async { Response::new(Body::new("ok")) }
                        });
                    });
                Ok(())
            })
            .unwrap();
        let host = builder.build().unwrap();

        host.start().await.unwrap();
        assert_eq!(server.addresses.to_vec(), vec!["http://a", "http://b"]);

        let application = server.application.lock().unwrap().take().unwrap();
        let response = application.process_request(Request::new(Body::empty()), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*log.lock().unwrap(), vec!["filter-marker", "user-marker"]);

        host.stop().await.unwrap();
        host.stop().await.unwrap();
        assert_eq!(server.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_configure_never_starts_server() {
        let server = Arc::new(FakeServer::default());
        let fake = Arc::clone(&server);

        let mut builder = HostBuilder::new();
        builder
            .configure_web_host(move |web| {
                web.use_server(fake);
                Ok(())
            })
            .unwrap();
        let host = builder.build().unwrap();

        assert!(matches!(host.start().await, Err(HostError::MissingConfigureApplication)));
        assert_eq!(server.starts.load(Ordering::SeqCst), 0);
        assert!(!host.lifetime().started().is_cancelled());
    }

    #[test]
    fn test_server_trait_object_registration() {
        let mut services = ServiceCollection::new();
        services.add_singleton::<Arc<dyn Server>>(Arc::new(FakeServer::default()));
        assert!(services.build_provider().get::<Arc<dyn Server>>().is_some());
    }
}
