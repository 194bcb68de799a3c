//! Host header filtering.
//!
//! Requests whose `Host` header matches none of the allowed hosts are rejected with
//! `400 Bad Request` before they reach the application.

use std::sync::Arc;

use hyper::header::HOST;
use serde::Deserialize;

use crate::config::{keys, split_list, Configuration};
use crate::error::Result;
use crate::filter::StartupFilter;
use crate::http::{text_response, HttpContext, StatusCode};
use crate::pipeline::{ApplicationBuilder, ConfigureApplication};
use crate::services::ServiceCollection;

/// Configuration section bound to [`HostFilteringOptions`].
pub const HOST_FILTERING_SECTION: &str = "host_filtering";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HostFilteringOptions {
    /// Host names without ports. `*` allows every host, `*.example.com` allows subdomains.
    pub allowed_hosts: Vec<String>,
    /// Whether requests without a `Host` header are let through.
    pub allow_empty_hosts: bool,
    /// Whether the 400 response carries a body.
    pub include_failure_message: bool,
}

impl Default for HostFilteringOptions {
    fn default() -> Self {
        Self {
            allowed_hosts: Vec::new(),
            allow_empty_hosts: true,
            include_failure_message: true,
        }
    }
}

/// Allowed hosts from the `allowed_hosts` (or `AllowedHosts`) configuration value, or
/// `["*"]` when it yields none.
pub fn allowed_hosts_fallback(configuration: &Configuration) -> Vec<String> {
    let hosts = configuration
        .get(keys::ALLOWED_HOSTS)
        .or_else(|| configuration.get(keys::ALLOWED_HOSTS_FILE))
        .map(|value| split_list(&value))
        .unwrap_or_default();
    if hosts.is_empty() {
        vec!["*".to_owned()]
    } else {
        hosts
    }
}

fn apply_fallback(options: &mut HostFilteringOptions, configuration: &Configuration) {
    if options.allowed_hosts.is_empty() {
        options.allowed_hosts = allowed_hosts_fallback(configuration);
    }
}

/// Binds [`HostFilteringOptions`] to the `host_filtering` section, registers the
/// allowed-hosts fallback and the filter that installs the middleware.
///
/// # Errors
/// Returns a ConfigError if the section cannot be deserialized.
pub fn add_host_filtering(services: &mut ServiceCollection, configuration: &Configuration) -> Result<()> {
    let section: HostFilteringOptions = configuration.section(HOST_FILTERING_SECTION)?;
    services.configure(move |options: &mut HostFilteringOptions| *options = section.clone());

    let configuration = configuration.clone();
    services.post_configure(move |options: &mut HostFilteringOptions| apply_fallback(options, &configuration));
    services.add::<Arc<dyn StartupFilter>>(Arc::new(HostFilteringStartupFilter));
    Ok(())
}

/// Puts host filtering in front of the rest of the pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostFilteringStartupFilter;

impl StartupFilter for HostFilteringStartupFilter {
    fn configure(&self, next: ConfigureApplication) -> ConfigureApplication {
        Arc::new(move |app: &mut ApplicationBuilder| {
            app.use_host_filtering();
            next(app);
        })
    }
}

impl ApplicationBuilder {
    /// Adds the host filtering middleware using the registered [`HostFilteringOptions`].
    pub fn use_host_filtering(&mut self) -> &mut Self {
        let options = self.services().options::<HostFilteringOptions>();
        let filter = Arc::new(HostFilter::new(&options));
        let include_failure_message = options.include_failure_message;

        self.use_fn(move |context: HttpContext, next| {
            let filter = Arc::clone(&filter);
            async move {
                let allowed = match context.request.headers().get(HOST).map(|value| value.to_str()) {
                    None => filter.allows(None),
                    Some(Ok(host)) => {
                        let allowed = filter.allows(Some(host));
                        if !allowed {
                            log::info!("Request rejected because the Host header {:?} is not allowed", host);
                        }
                        allowed
                    }
                    Some(Err(_)) => {
                        log::info!("Request rejected because the Host header is not valid text");
                        false
                    }
                };
                if allowed {
                    return next(context).await;
                }
                let body = if include_failure_message { "Invalid Hostname" } else { "" };
                text_response(StatusCode::BAD_REQUEST, body)
            }
        })
    }
}

/// Compiled allow-list.
#[derive(Debug, Clone)]
pub struct HostFilter {
    allow_any: bool,
    allow_empty: bool,
    exact: Vec<String>,
    suffixes: Vec<String>,
}

impl HostFilter {
    pub fn new(options: &HostFilteringOptions) -> Self {
        let mut filter = Self {
            allow_any: false,
            allow_empty: options.allow_empty_hosts,
            exact: Vec::new(),
            suffixes: Vec::new(),
        };
        for host in &options.allowed_hosts {
            let host = host.trim().to_ascii_lowercase();
            if host == "*" {
                filter.allow_any = true;
            } else if let Some(domain) = host.strip_prefix("*.") {
                filter.suffixes.push(format!(".{domain}"));
            } else if !host.is_empty() {
                filter.exact.push(host);
            }
        }
        filter
    }

    /// Whether a request carrying `host` (with or without a port) is allowed.
    pub fn allows(&self, host: Option<&str>) -> bool {
        let host = match host.map(str::trim) {
            None | Some("") => return self.allow_empty,
            Some(host) => strip_port(host).to_ascii_lowercase(),
        };
        if self.allow_any {
            return true;
        }
        self.exact.iter().any(|allowed| *allowed == host)
            || self.suffixes.iter().any(|suffix| host.ends_with(suffix.as_str()))
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}
