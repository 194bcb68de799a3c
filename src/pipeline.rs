//! The middleware pipeline.
//!
//! An [`ApplicationBuilder`] collects middleware in registration order and folds them
//! into a single [`RequestHandler`]. The first middleware registered sees the request first.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::http::{text_response, HttpContext, Response, StatusCode};
use crate::server::ServerAddresses;
use crate::services::ServiceProvider;

/// The built pipeline: turns a request context into a response.
pub type RequestHandler = Arc<dyn Fn(HttpContext) -> BoxFuture<'static, Response> + Send + Sync>;

/// A middleware component: wraps the rest of the pipeline.
pub type Middleware = Box<dyn FnOnce(RequestHandler) -> RequestHandler + Send>;

/// Function that populates an [`ApplicationBuilder`]. Startup filters wrap it.
pub type ConfigureApplication = Arc<dyn Fn(&mut ApplicationBuilder) + Send + Sync>;

/// Wraps a closure as a [`RequestHandler`].
pub fn handler<F, Fut>(f: F) -> RequestHandler
where
    F: Fn(HttpContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |context| f(context).boxed())
}

/// Collects middleware while the application is configured.
pub struct ApplicationBuilder {
    services: Arc<ServiceProvider>,
    server_addresses: Vec<String>,
    components: Vec<Middleware>,
}

impl ApplicationBuilder {
    pub fn new(services: Arc<ServiceProvider>) -> Self {
        Self {
            services,
            server_addresses: Vec::new(),
            components: Vec::new(),
        }
    }

    /// Builder that also knows the addresses the server will bind.
    pub fn with_server_addresses(services: Arc<ServiceProvider>, addresses: Option<&ServerAddresses>) -> Self {
        let mut builder = Self::new(services);
        if let Some(addresses) = addresses {
            builder.server_addresses = addresses.to_vec();
        }
        builder
    }

    pub fn services(&self) -> &Arc<ServiceProvider> {
        &self.services
    }

    /// Addresses known to the server when the pipeline was built.
    pub fn server_addresses(&self) -> &[String] {
        &self.server_addresses
    }

    /// Adds a middleware component.
    pub fn use_middleware<F>(&mut self, middleware: F) -> &mut Self
    where
        F: FnOnce(RequestHandler) -> RequestHandler + Send + 'static,
    {
        self.components.push(Box::new(middleware));
        self
    }

    /// Adds inline middleware that receives the context and the next handler.
    pub fn use_fn<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(HttpContext, RequestHandler) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let f = Arc::new(f);
        self.use_middleware(move |next: RequestHandler| -> RequestHandler {
            Arc::new(move |context| f(context, Arc::clone(&next)).boxed())
        })
    }

    /// Adds a terminal handler. Middleware added after it never runs.
    pub fn run<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(HttpContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let terminal = handler(f);
        self.use_middleware(move |_next| terminal)
    }

    /// Folds the components into one handler.
    ///
    /// The innermost handler answers `404 Not Found`.
    pub fn build(self) -> RequestHandler {
        let not_found = handler(|_context| async { text_response(StatusCode::NOT_FOUND, "") });
        self.components
            .into_iter()
            .rev()
            .fold(not_found, |next, component| component(next))
    }
}

impl fmt::Debug for ApplicationBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationBuilder")
            .field("server_addresses", &self.server_addresses)
            .field("components", &self.components.len())
            .finish()
    }
}
