//! Startup types.
//!
//! A startup type registers services and configures the request pipeline. Its methods are
//! listed explicitly in a [`StartupMethods`] table, optionally per environment name:
//!
//! ```
//! use azrath_host::{
//!     ApplicationBuilder, Body, HostBuilderContext, Response, Result, ServiceCollection,
//!     Startup, StartupMethods, StartupServices,
//! };
//!
//! struct App;
//!
//! impl App {
//!     fn configure_services(&self, _context: &HostBuilderContext, services: &mut ServiceCollection) -> Result<()> {
//!         services.add_singleton(String::from("greeting"));
//!         Ok(())
//!     }
//!
//!     fn configure(&self, app: &mut ApplicationBuilder) {
//!         app.run(|_context| async { Response::new(Body::new("Hello world!")) });
//!     }
//!
//!     fn configure_development(&self, app: &mut ApplicationBuilder) {
//!         app.run(|_context| async { Response::new(Body::new("Hello developer!")) });
//!     }
//! }
//!
//! impl Startup for App {
//!     fn create(_services: &StartupServices<'_>) -> Result<Self> {
//!         Ok(App)
//!     }
//!
//!     fn methods() -> StartupMethods<Self> {
//!         StartupMethods::new()
//!             .configure_services(Self::configure_services)
//!             .configure(Self::configure)
//!             .configure_for("Development", Self::configure_development)
//!     }
//! }
//! ```

use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

use crate::config::Configuration;
use crate::context::HostBuilderContext;
use crate::environment::{HostOptions, HostingEnvironment};
use crate::error::{HostError, Result};
use crate::pipeline::{ApplicationBuilder, ConfigureApplication};
use crate::services::ServiceCollection;

pub type ConfigureServicesFn<S> = fn(&S, &HostBuilderContext, &mut ServiceCollection) -> Result<()>;
pub type ConfigureFn<S> = fn(&S, &mut ApplicationBuilder);
pub type ConfigureContainerFn<S> = fn(&S, &HostBuilderContext, &mut ServiceCollection);

/// A user type that configures services and the request pipeline.
pub trait Startup: Sized + Send + Sync + 'static {
    /// Creates the single instance used for every method in the table.
    fn create(services: &StartupServices<'_>) -> Result<Self>;

    /// The methods this type provides.
    fn methods() -> StartupMethods<Self>;
}

struct Method<F> {
    environment: Option<String>,
    f: F,
}

/// Table of startup methods, each generic or bound to one environment name.
pub struct StartupMethods<S> {
    configure_services: Vec<Method<ConfigureServicesFn<S>>>,
    configure: Vec<Method<ConfigureFn<S>>>,
    configure_container: Vec<Method<ConfigureContainerFn<S>>>,
}

impl<S> Default for StartupMethods<S> {
    fn default() -> Self {
        Self {
            configure_services: Vec::new(),
            configure: Vec::new(),
            configure_container: Vec::new(),
        }
    }
}

impl<S> StartupMethods<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure_services(mut self, f: ConfigureServicesFn<S>) -> Self {
        self.configure_services.push(Method { environment: None, f });
        self
    }

    pub fn configure_services_for(mut self, environment: &str, f: ConfigureServicesFn<S>) -> Self {
        self.configure_services.push(Method {
            environment: Some(environment.to_owned()),
            f,
        });
        self
    }

    pub fn configure(mut self, f: ConfigureFn<S>) -> Self {
        self.configure.push(Method { environment: None, f });
        self
    }

    pub fn configure_for(mut self, environment: &str, f: ConfigureFn<S>) -> Self {
        self.configure.push(Method {
            environment: Some(environment.to_owned()),
            f,
        });
        self
    }

    /// Container configuration is not supported; a table that has one fails to resolve.
    pub fn configure_container(mut self, f: ConfigureContainerFn<S>) -> Self {
        self.configure_container.push(Method { environment: None, f });
        self
    }

    pub fn configure_container_for(mut self, environment: &str, f: ConfigureContainerFn<S>) -> Self {
        self.configure_container.push(Method {
            environment: Some(environment.to_owned()),
            f,
        });
        self
    }

    /// Picks the methods that apply to `environment`.
    ///
    /// A method bound to `environment` (compared case-insensitively) wins over the generic one.
    /// A method with neither is absent.
    ///
    /// # Errors
    /// - `AmbiguousStartupMethod` if a method is listed twice for the same environment
    /// - `Unsupported` if a `configure_container` applies
    pub fn resolve(&self, environment: &str) -> Result<ResolvedStartup<S>> {
        let configure_services = select("configure_services", &self.configure_services, environment)?;
        let configure = select("configure", &self.configure, environment)?;

        if select("configure_container", &self.configure_container, environment)?.is_some() {
            return Err(HostError::Unsupported("configure_container"));
        }

        Ok(ResolvedStartup {
            configure_services,
            configure,
        })
    }
}

fn select<F: Copy>(method: &'static str, methods: &[Method<F>], environment: &str) -> Result<Option<F>> {
    for (i, a) in methods.iter().enumerate() {
        let duplicate = methods[i + 1..].iter().any(|b| match (&a.environment, &b.environment) {
            (None, None) => true,
            (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
            _ => false,
        });
        if duplicate {
            return Err(HostError::AmbiguousStartupMethod {
                method,
                environment: a.environment.clone().unwrap_or_default(),
            });
        }
    }

    let specific = methods.iter().find(|m| {
        m.environment
            .as_deref()
            .map_or(false, |env| env.eq_ignore_ascii_case(environment))
    });
    let generic = methods.iter().find(|m| m.environment.is_none());
    Ok(specific.or(generic).map(|m| m.f))
}

impl<S> fmt::Debug for StartupMethods<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartupMethods")
            .field("configure_services", &self.configure_services.len())
            .field("configure", &self.configure.len())
            .field("configure_container", &self.configure_container.len())
            .finish()
    }
}

/// The methods selected for one environment.
pub struct ResolvedStartup<S> {
    configure_services: Option<ConfigureServicesFn<S>>,
    configure: Option<ConfigureFn<S>>,
}

impl<S: Send + Sync + 'static> ResolvedStartup<S> {
    /// Runs the selected `configure_services`, if any.
    pub fn configure_services(
        &self,
        instance: &S,
        context: &HostBuilderContext,
        services: &mut ServiceCollection,
    ) -> Result<()> {
        match self.configure_services {
            Some(f) => f(instance, context, services),
            None => Ok(()),
        }
    }

    /// Binds the selected `configure` to `instance`. `None` when the table has none.
    pub fn configure_application(&self, instance: Arc<S>) -> Option<ConfigureApplication> {
        let f = self.configure?;
        Some(Arc::new(move |app: &mut ApplicationBuilder| f(&instance, app)))
    }
}

/// What a startup type may ask for while it is created.
///
/// Only the hosting environment, the configuration and the host options can be
/// resolved. Collections resolve to empty.
pub struct StartupServices<'a> {
    context: &'a HostBuilderContext,
}

impl<'a> StartupServices<'a> {
    pub fn new(context: &'a HostBuilderContext) -> Self {
        Self { context }
    }

    pub fn environment(&self) -> Arc<HostingEnvironment> {
        Arc::clone(&self.context.environment)
    }

    pub fn configuration(&self) -> Configuration {
        self.context.configuration.clone()
    }

    pub fn options(&self) -> Arc<HostOptions> {
        Arc::clone(&self.context.options)
    }

    /// Resolves `Arc<HostingEnvironment>`, `Configuration` or `Arc<HostOptions>`.
    ///
    /// # Errors
    /// Returns `UnresolvedStartupDependency` for any other type.
    pub fn get<T: Any>(&self) -> Result<T> {
        let candidates: [Box<dyn Any>; 3] = [
            Box::new(self.environment()),
            Box::new(self.configuration()),
            Box::new(self.options()),
        ];
        candidates
            .into_iter()
            .find_map(|candidate| candidate.downcast::<T>().ok())
            .map(|value| *value)
            .ok_or(HostError::UnresolvedStartupDependency(type_name::<T>()))
    }

    /// Always empty: nothing is registered yet while the startup type is created.
    pub fn get_all<T>(&self) -> Vec<T> {
        Vec::new()
    }
}

/// Creates the startup instance and registers its services.
///
/// Returns the configure-application function bound to the instance, if the type has one.
pub fn activate<S: Startup>(
    context: &HostBuilderContext,
    services: &mut ServiceCollection,
) -> Result<Option<ConfigureApplication>> {
    let resolved = S::methods().resolve(&context.environment.environment_name)?;
    let instance = Arc::new(S::create(&StartupServices::new(context))?);
    resolved.configure_services(&instance, context, services)?;
    Ok(resolved.configure_application(instance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::from_pairs;
    use crate::environment::HostOptions;

    fn context(environment: &str) -> HostBuilderContext {
        let configuration = from_pairs(&[("environment", environment), ("greeting", "hi")]);
        let options = HostOptions::from_configuration(&configuration, "tests");
        HostBuilderContext::new(configuration, options)
    }

    struct Recorder {
        greeting: String,
        environment: Arc<HostingEnvironment>,
    }

    impl Recorder {
        fn services(&self, _context: &HostBuilderContext, services: &mut ServiceCollection) -> Result<()> {
            services.add(format!("generic:{}", self.greeting));
            Ok(())
        }

        fn services_staging(&self, _context: &HostBuilderContext, services: &mut ServiceCollection) -> Result<()> {
            services.add(format!("staging:{}", self.environment.environment_name));
            Ok(())
        }

        fn configure(&self, app: &mut ApplicationBuilder) {
            app.run(|_context| async { crate::http::text_response(crate::http::StatusCode::OK, "") });
        }

        fn configure_staging(&self, app: &mut ApplicationBuilder) {
            app.run(|_context| async { crate::http::text_response(crate::http::StatusCode::ACCEPTED, "") });
        }
    }

    impl Startup for Recorder {
        fn create(services: &StartupServices<'_>) -> Result<Self> {
            let configuration: Configuration = services.get()?;
            Ok(Recorder {
                greeting: configuration.get("greeting").unwrap_or_default(),
                environment: services.get()?,
            })
        }

        fn methods() -> StartupMethods<Self> {
            StartupMethods::new()
                .configure_services(Self::services)
                .configure_services_for("Staging", Self::services_staging)
                .configure(Self::configure)
                .configure_for("staging", Self::configure_staging)
        }
    }

    async fn status_of(configure: ConfigureApplication) -> u16 {
        let mut app = ApplicationBuilder::new(Arc::new(ServiceCollection::new().build_provider()));
        configure(&mut app);
        let response = app.build()(crate::pipeline::tests::context()).await;
        response.status().as_u16()
    }

    #[tokio::test]
    async fn test_generic_methods_apply_without_matching_environment() {
        let context = context("Production");
        let mut services = ServiceCollection::new();
        let configure = activate::<Recorder>(&context, &mut services).unwrap().unwrap();

        assert_eq!(services.build_provider().get_all::<String>(), vec!["generic:hi"]);
        assert_eq!(status_of(configure).await, 200);
    }

    #[tokio::test]
    async fn test_environment_specific_methods_win() {
        let context = context("STAGING");
        let mut services = ServiceCollection::new();
        let configure = activate::<Recorder>(&context, &mut services).unwrap().unwrap();

        assert_eq!(services.build_provider().get_all::<String>(), vec!["staging:STAGING"]);
        assert_eq!(status_of(configure).await, 202);
    }

    #[test]
    fn test_duplicate_methods_are_rejected() {
        let methods = Recorder::methods().configure_for("Staging", Recorder::configure);
        let result = methods.resolve("Production");
        assert!(matches!(
            result,
            Err(HostError::AmbiguousStartupMethod { method: "configure", ref environment }) if environment == "staging"
        ));
    }

    #[test]
    fn test_missing_methods_are_absent() {
        let methods = StartupMethods::<Recorder>::new().configure_for("Staging", Recorder::configure_staging);
        let resolved = methods.resolve("Production").unwrap();
        let instance = Arc::new(Recorder {
            greeting: String::new(),
            environment: context("Production").environment,
        });

        let mut services = ServiceCollection::new();
        resolved
            .configure_services(&instance, &context("Production"), &mut services)
            .unwrap();
        assert!(services.build_provider().get_all::<String>().is_empty());
        assert!(resolved.configure_application(instance).is_none());
    }

    #[test]
    fn test_configure_container_is_unsupported() {
        fn container(_: &Recorder, _: &HostBuilderContext, _: &mut ServiceCollection) {}
        let methods = Recorder::methods().configure_container_for("Production", container);
        assert!(matches!(methods.resolve("production"), Err(HostError::Unsupported("configure_container"))));
        assert!(Recorder::methods().configure_container_for("Production", container).resolve("Staging").is_ok());
    }

    #[test]
    fn test_startup_services_only_answer_known_types() {
        let context = context("Production");
        let services = StartupServices::new(&context);

        assert!(services.get::<Arc<HostingEnvironment>>().is_ok());
        assert!(services.get::<Arc<HostOptions>>().is_ok());
        assert!(services.get_all::<String>().is_empty());
        assert!(matches!(
            services.get::<u32>(),
            Err(HostError::UnresolvedStartupDependency("u32"))
        ));
    }
}
