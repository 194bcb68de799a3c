use core::fmt;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use hyper::body::HttpBody;

pub use hyper::body::Bytes;
pub use hyper::StatusCode;

use crate::services::ServiceProvider;

/// An HTTP request type that wraps hyper's Request with our custom Body type.
pub type Request = hyper::Request<Body>;

/// An HTTP response.
///
/// You can create a response with the [`new`](hyper::Response::new) method:
///
/// ```
/// # use azrath_host::{Response, Body};
/// let response = Response::new(Body::new("Hello world!"));
/// ```
///
/// Or with a [`ResponseBuilder`]:
///
/// ```
/// # use azrath_host::{ResponseBuilder, Body};
/// let response = ResponseBuilder::new()
///     .status(404)
///     .header("X-Custom-Foo", "Bar")
///     .body(Body::new("Page not found."))
///     .unwrap();
/// ```
pub type Response = hyper::Response<Body>;

/// A builder for constructing HTTP responses with a fluent API.
pub type ResponseBuilder = hyper::http::response::Builder;

/// A streaming HTTP body used for both requests and responses.
///
/// ```rust
/// # use azrath_host::Body;
/// let string = Body::new("Hello world!");
/// let bytes = Body::new(vec![0, 1, 0, 1, 0]);
/// ```
pub struct Body(pub(crate) hyper::Body);

impl Body {
    /// Create a body from a string or bytes.
    pub fn new(data: impl Into<Bytes>) -> Body {
        Body(hyper::Body::from(data.into()))
    }

    /// Create an empty body.
    pub fn empty() -> Body {
        Body(hyper::Body::empty())
    }

    /// Collects the whole body into memory.
    ///
    /// # Errors
    /// Returns the transport error that interrupted the body, if any.
    pub async fn into_bytes(self) -> Result<Bytes, hyper::Error> {
        hyper::body::to_bytes(self.0).await
    }
}

impl<T> From<T> for Body
where
    Bytes: From<T>,
{
    fn from(data: T) -> Body {
        Body::new(data)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_data(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        Pin::new(&mut self.0).poll_data(cx)
    }

    fn poll_trailers(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<hyper::HeaderMap>, Self::Error>> {
        Pin::new(&mut self.0).poll_trailers(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.0.is_end_stream()
    }

    fn size_hint(&self) -> hyper::body::SizeHint {
        self.0.size_hint()
    }
}

/// Builds a response with `status` and a plain-text body.
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response {
    let mut response = Response::new(Body::new(body));
    *response.status_mut() = status;
    response
}

/// Everything a middleware sees about one request.
pub struct HttpContext {
    pub request: Request,
    /// Peer address of the connection that carried the request.
    pub remote_addr: Option<SocketAddr>,
    pub services: Arc<ServiceProvider>,
}

impl HttpContext {
    pub fn new(request: Request, remote_addr: Option<SocketAddr>, services: Arc<ServiceProvider>) -> Self {
        Self {
            request,
            remote_addr,
            services,
        }
    }
}

impl fmt::Debug for HttpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpContext")
            .field("method", self.request.method())
            .field("uri", self.request.uri())
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_body_into_bytes() {
        let body = Body::new("Hello World!");
        assert_eq!(&body.into_bytes().await.unwrap()[..], b"Hello World!");
    }

    #[tokio::test]
    async fn test_empty_body() {
        let body = Body::empty();
        assert!(body.is_end_stream());
        assert!(body.into_bytes().await.unwrap().is_empty());
    }

    /// Tests the `ResponseBuilder` by creating a response and verifying its status and headers.
    #[test]
    fn test_response_builder() {
        let response = ResponseBuilder::new()
            .status(200)
            .header("Content-Type", "text/plain")
            .body(Body::new("OK"))
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "text/plain"
        );
    }

    #[test]
    fn test_text_response() {
        let response = text_response(StatusCode::BAD_REQUEST, "nope");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
