#![allow(clippy::return_self_not_must_use)]
#![doc = include_str!("../README.md")]

//! ## Architecture
//!
//! - [`HostBuilder`] queues configuration and service callbacks and runs them in a fixed
//!   order when the host is built.
//! - [`WebHostBuilder`] adds the web part: a configure-application function (directly or
//!   through a [`Startup`] type), a [`Server`] and hosting startups.
//! - [`WebHostService`] is the hosted service that wraps the pipeline in the registered
//!   [`StartupFilter`]s, builds it and runs the server.
//! - [`Host`] starts and stops hosted services and fires the [`ApplicationLifetime`] signals.
//!
//! ## Configuration
//! The host configuration decides the environment, content root and other hosting
//! settings. It is read from, in increasing precedence:
//! - Environment variables prefixed with `AZRATH_` (`__` separates sections)
//! - Command-line `key=value` arguments
//! - Settings made in code with [`WebHostBuilder::use_setting`]
//!
//! The application configuration starts from the host configuration and layers, in
//! increasing precedence:
//! - `appsettings` and `appsettings.{environment}` files in the content root
//! - Unprefixed environment variables
//! - Command-line `key=value` arguments
//!
//! So a `urls` value in `appsettings.json` overrides [`WebHostBuilder::use_urls`] once the
//! application configuration is built.
//!
//! ## Features
//! - `http2`: Enables HTTP/2 support in [`HttpServer`] (enabled by default)

pub use crate::builder::HostBuilder;
pub use crate::config::{Configuration, ConfigurationBuilder, ServerConfig};
pub use crate::context::HostBuilderContext;
pub use crate::environment::{environments, HostOptions, HostingEnvironment};
pub use crate::error::{HostError, HostingStartupError, HostingStartupErrors, Result};
pub use crate::filter::StartupFilter;
pub use crate::host::{Host, HostedService, HostedServiceFactory};
pub use crate::host_filtering::{HostFilter, HostFilteringOptions, HostFilteringStartupFilter};
pub use crate::hosting_application::HostingApplication;
pub use crate::hosting_startup::{HostingStartup, HostingStartups};
pub use crate::http::{Body, Bytes, HttpContext, Request, Response, ResponseBuilder, StatusCode};
pub use crate::lifetime::ApplicationLifetime;
pub use crate::pipeline::{ApplicationBuilder, ConfigureApplication, Middleware, RequestHandler};
pub use crate::server::{HttpServer, Server, ServerAddresses};
pub use crate::services::{ServiceCollection, ServiceProvider};
pub use crate::startup::{Startup, StartupMethods, StartupServices};
pub use crate::web_host_builder::WebHostBuilder;
pub use crate::web_host_service::{WebHostService, WebHostServiceOptions, WebHostState};

pub mod config;
pub mod host_filtering;
pub mod http;
pub mod logging;
pub mod pipeline;
pub mod server;
pub mod startup;

mod builder;
mod context;
mod environment;
mod error;
mod filter;
mod host;
mod hosting_application;
mod hosting_startup;
mod lifetime;
mod services;
mod web_host_builder;
mod web_host_service;

// Re-export common types
pub use hyper;
