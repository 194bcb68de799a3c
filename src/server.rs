//! The server abstraction and its hyper implementation.

use std::convert::Infallible;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Configuration, ServerConfig};
use crate::error::{HostError, Result};
use crate::hosting_application::HostingApplication;
use crate::http::Body;

/// Addresses a server listens on, shared between the host and the server.
///
/// Keeps insertion order and ignores duplicates, since one address cannot be bound twice.
#[derive(Debug, Default)]
pub struct ServerAddresses {
    inner: Mutex<AddressesInner>,
}

#[derive(Debug, Default)]
struct AddressesInner {
    addresses: Vec<String>,
    prefer_hosting_urls: bool,
}

impl ServerAddresses {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AddressesInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `address` unless it is already present. Returns whether it was added.
    pub fn add(&self, address: impl Into<String>) -> bool {
        let address = address.into();
        let mut inner = self.lock();
        if inner.addresses.contains(&address) {
            return false;
        }
        inner.addresses.push(address);
        true
    }

    /// Replaces every address.
    pub fn replace(&self, addresses: Vec<String>) {
        self.lock().addresses = addresses;
    }

    pub fn is_empty(&self) -> bool {
        self.lock().addresses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().addresses.len()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.lock().addresses.clone()
    }

    /// Whether hosting URLs win over endpoints configured on the server itself.
    pub fn prefer_hosting_urls(&self) -> bool {
        self.lock().prefer_hosting_urls
    }

    pub fn set_prefer_hosting_urls(&self, prefer: bool) {
        self.lock().prefer_hosting_urls = prefer;
    }
}

/// A network server driven by the web host.
#[async_trait]
pub trait Server: Send + Sync {
    /// The server's address set, if it exposes one.
    fn addresses(&self) -> Option<&ServerAddresses> {
        None
    }

    /// Starts accepting requests for `application`. Returns once the server is listening.
    async fn start(&self, application: HostingApplication, cancel: CancellationToken) -> Result<()>;

    /// Stops accepting requests and drains in-flight ones.
    ///
    /// When `cancel` fires the server stops waiting and aborts what is left.
    async fn stop(&self, cancel: CancellationToken) -> Result<()>;
}

struct Running {
    shutdown: CancellationToken,
    listeners: Vec<JoinHandle<std::result::Result<(), hyper::Error>>>,
}

/// HTTP/1.x and HTTP/2 server built on hyper.
pub struct HttpServer {
    config: ServerConfig,
    addresses: ServerAddresses,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl HttpServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            addresses: ServerAddresses::new(),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Creates a server from the `server` configuration section.
    ///
    /// # Errors
    /// Returns a ConfigError if the section cannot be deserialized.
    pub fn from_configuration(configuration: &Configuration) -> Result<Self> {
        Ok(Self::new(ServerConfig::from_configuration(configuration)?))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Picks what to bind.
    ///
    /// Hosting URLs win when the server has no endpoints of its own or when
    /// `prefer_hosting_urls` is set. Otherwise the server's endpoints win. With neither,
    /// the default `host:port` is bound.
    fn select_urls(&self) -> Vec<String> {
        let addresses = self.addresses.to_vec();
        let endpoints = &self.config.endpoints;

        if !addresses.is_empty() && (endpoints.is_empty() || self.addresses.prefer_hosting_urls()) {
            if !endpoints.is_empty() {
                log::info!(
                    "Overriding server endpoints because prefer_hosting_urls is set. Binding to: {}",
                    addresses.join(", ")
                );
            }
            addresses
        } else if !endpoints.is_empty() {
            if !addresses.is_empty() {
                log::warn!(
                    "Overriding address(es) '{}'. Binding to endpoints defined in the server configuration instead.",
                    addresses.join(", ")
                );
            }
            endpoints.clone()
        } else {
            vec![self.config.default_address()]
        }
    }

    fn configure<I>(&self, builder: hyper::server::Builder<I>) -> hyper::server::Builder<I> {
        let config = &self.config;
        let builder = builder
            .http1_keepalive(config.http1_keep_alive)
            .http1_half_close(config.http1_half_close)
            .http1_max_buf_size(config.http1_max_buf_size.max(MIN_BUF_SIZE))
            .http1_title_case_headers(config.http1_title_case_headers)
            .http1_preserve_header_case(config.http1_preserve_header_case)
            .http1_only(config.http1_only);

        #[cfg(feature = "http2")]
        let builder = builder
            .http2_only(config.http2_only)
            .http2_initial_stream_window_size(config.http2_initial_stream_window_size)
            .http2_initial_connection_window_size(config.http2_initial_connection_window_size)
            .http2_adaptive_window(config.http2_adaptive_window)
            .http2_max_frame_size(config.http2_max_frame_size)
            .http2_max_concurrent_streams(config.http2_max_concurrent_streams)
            .http2_max_send_buf_size(config.http2_max_send_buf_size);

        builder
    }
}

/// hyper rejects HTTP/1 read buffers smaller than this.
const MIN_BUF_SIZE: usize = 8192;

#[async_trait]
impl Server for HttpServer {
    fn addresses(&self) -> Option<&ServerAddresses> {
        Some(&self.addresses)
    }

    async fn start(&self, application: HostingApplication, cancel: CancellationToken) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(HostError::InvalidState("server is already running".into()));
        }

        let mut bound = Vec::new();
        let mut sockets = Vec::new();
        for url in self.select_urls() {
            if cancel.is_cancelled() {
                return Err(HostError::InvalidState("server start was cancelled".into()));
            }
            let addr = parse_address(&url)?;
            let socket = std::net::TcpListener::bind(addr).map_err(|e| HostError::InvalidAddress {
                address: url.clone(),
                reason: e.to_string(),
            })?;
            socket.set_nonblocking(true)?;
            bound.push(format!("http://{}", socket.local_addr()?));
            sockets.push(socket);
        }

        let builders = sockets
            .into_iter()
            .map(|socket| hyper::Server::from_tcp(socket).map(|builder| self.configure(builder)))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let shutdown = CancellationToken::new();
        let mut listeners = Vec::with_capacity(builders.len());
        for builder in builders {
            let app = application.clone();
            let make_service = make_service_fn(move |conn: &AddrStream| {
                let app = app.clone();
                let remote = conn.remote_addr();
                async move {
                    Ok::<_, Infallible>(service_fn(move |request: hyper::Request<hyper::Body>| {
                        let app = app.clone();
                        async move {
                            Ok::<_, Infallible>(app.process_request(request.map(Body), Some(remote)).await)
                        }
                    }))
                }
            });

            let signal = shutdown.clone();
            let server = builder
                .serve(make_service)
                .with_graceful_shutdown(async move { signal.cancelled().await });
            listeners.push(tokio::spawn(server));
        }

        self.addresses.replace(bound);
        *running = Some(Running { shutdown, listeners });
        Ok(())
    }

    async fn stop(&self, cancel: CancellationToken) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };

        running.shutdown.cancel();
        let abort_handles: Vec<_> = running
            .listeners
            .iter()
            .map(JoinHandle::abort_handle)
            .collect();

        tokio::select! {
            results = futures::future::join_all(running.listeners) => {
                for result in results {
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => return Err(e.into()),
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => return Err(std::io::Error::new(std::io::ErrorKind::Other, e).into()),
                    }
                }
            }
            _ = cancel.cancelled() => {
                log::warn!("Server shutdown was cancelled; aborting {} listener(s)", abort_handles.len());
                for handle in &abort_handles {
                    handle.abort();
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServer")
            .field("config", &self.config)
            .field("addresses", &self.addresses.to_vec())
            .finish_non_exhaustive()
    }
}

/// Parses a bind address such as `http://localhost:5000`, `http://*:80` or `http://[::1]:0`.
///
/// `*` and `+` bind every IPv4 interface. The scheme defaults to `http`; `https` is rejected.
/// A missing port means 80.
pub fn parse_address(address: &str) -> Result<SocketAddr> {
    let invalid = |reason: &str| HostError::InvalidAddress {
        address: address.to_owned(),
        reason: reason.to_owned(),
    };

    let rest = match address.trim().split_once("://") {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("http") => rest,
        Some((scheme, _)) => return Err(invalid(&format!("scheme `{scheme}` is not supported"))),
        None => address.trim(),
    };
    let authority = rest.split('/').next().unwrap_or_default();

    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
        match after.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if after.is_empty() => (host, None),
            None => return Err(invalid("unexpected characters after IPv6 literal")),
        }
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    let port = match port {
        Some(port) => port.parse::<u16>().map_err(|_| invalid("invalid port"))?,
        None => 80,
    };

    let ip = match host {
        "" => return Err(invalid("missing host")),
        "*" | "+" => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        host if host.eq_ignore_ascii_case("localhost") => IpAddr::V4(Ipv4Addr::LOCALHOST),
        host => host
            .parse::<IpAddr>()
            .map_err(|_| invalid("host must be an IP address, `localhost`, `*` or `+`"))?,
    };

    Ok(SocketAddr::new(ip, port))
}
