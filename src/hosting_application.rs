use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;

use crate::http::{text_response, HttpContext, Request, Response, StatusCode};
use crate::pipeline::RequestHandler;
use crate::services::ServiceProvider;

/// Log target for per-request diagnostics.
pub const REQUEST_LOG_TARGET: &str = "azrath_host::requests";

/// Adapts the built pipeline to the server.
///
/// Creates the [`HttpContext`] for each request, records request diagnostics and turns
/// a panicking handler into a `500 Internal Server Error`.
#[derive(Clone)]
pub struct HostingApplication {
    handler: RequestHandler,
    services: Arc<ServiceProvider>,
}

impl HostingApplication {
    pub fn new(handler: RequestHandler, services: Arc<ServiceProvider>) -> Self {
        Self { handler, services }
    }

    pub fn create_context(&self, request: Request, remote_addr: Option<SocketAddr>) -> HttpContext {
        HttpContext::new(request, remote_addr, Arc::clone(&self.services))
    }

    /// Runs one request through the pipeline.
    pub async fn process_request(&self, request: Request, remote_addr: Option<SocketAddr>) -> Response {
        let started = Instant::now();
        let method = request.method().clone();
        let uri = request.uri().clone();
        log::debug!(target: REQUEST_LOG_TARGET, "Request starting {} {}", method, uri);

        let context = self.create_context(request, remote_addr);
        let pipeline = AssertUnwindSafe(async move { (self.handler)(context).await });
        let response = match pipeline.catch_unwind().await {
            Ok(response) => response,
            Err(panic) => {
                log::error!(
                    target: REQUEST_LOG_TARGET,
                    "Request {} {} failed: handler panicked: {}",
                    method,
                    uri,
                    panic_message(&*panic)
                );
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "")
            }
        };

        log::debug!(
            target: REQUEST_LOG_TARGET,
            "Request finished {} {} in {:?} - {}",
            method,
            uri,
            started.elapsed(),
            response.status()
        );
        response
    }
}

impl fmt::Debug for HostingApplication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostingApplication").finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Body;
    use crate::pipeline::handler;
    use crate::services::ServiceCollection;

    fn application(handler: RequestHandler) -> HostingApplication {
        HostingApplication::new(handler, Arc::new(ServiceCollection::new().build_provider()))
    }

    #[tokio::test]
    async fn test_process_request_passes_remote_address() {
        let app = application(handler(|context: HttpContext| async move {
            let peer = context.remote_addr.map(|addr| addr.to_string()).unwrap_or_default();
            Response::new(Body::new(peer))
        }));

        let remote: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        let response = app.process_request(Request::new(Body::empty()), Some(remote)).await;
        let body = response.into_body().into_bytes().await.unwrap();
        assert_eq!(&body[..], b"10.0.0.1:4000");
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_server_error() {
        let app = application(handler(|context: HttpContext| async move {
            if context.request.uri().path() == "/boom" {
                panic!("boom");
            }
            Response::new(Body::empty())
        }));

        let request = hyper::Request::get("/boom").body(Body::empty()).unwrap();
        let response = app.process_request(request, None).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_handler_panicking_before_its_future_becomes_server_error() {
        let handler: RequestHandler = Arc::new(|context: HttpContext| {
            if context.request.uri().path() == "/boom" {
                panic!("boom before the future");
            }
            async { Response::new(Body::empty()) }.boxed()
        });
        let app = application(handler);

        let request = hyper::Request::get("/boom").body(Body::empty()).unwrap();
        let response = app.process_request(request, None).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let request = hyper::Request::get("/fine").body(Body::empty()).unwrap();
        let response = app.process_request(request, None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
