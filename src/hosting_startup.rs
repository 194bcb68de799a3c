use std::fmt;
use std::sync::Arc;

use crate::environment::HostOptions;
use crate::error::{HostingStartupError, HostingStartupErrors, Result};
use crate::web_host_builder::WebHostBuilder;

/// Out-of-band configuration applied to the web host before the application's own startup.
///
/// Typical uses are selecting a server or adding cross-cutting services without
/// touching the entry point.
pub trait HostingStartup: Send + Sync {
    fn configure(&self, builder: &mut WebHostBuilder) -> Result<()>;
}

impl<F> HostingStartup for F
where
    F: Fn(&mut WebHostBuilder) -> Result<()> + Send + Sync,
{
    fn configure(&self, builder: &mut WebHostBuilder) -> Result<()> {
        self(builder)
    }
}

/// Named hosting startups, kept in registration order.
#[derive(Default, Clone)]
pub struct HostingStartups {
    entries: Vec<(String, Arc<dyn HostingStartup>)>,
}

impl HostingStartups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `startup` under `name`, replacing a previous registration with the same name.
    pub fn register(&mut self, name: impl Into<String>, startup: impl HostingStartup + 'static) -> &mut Self {
        let name = name.into();
        let startup: Arc<dyn HostingStartup> = Arc::new(startup);
        match self.entries.iter_mut().find(|(existing, _)| existing.eq_ignore_ascii_case(&name)) {
            Some(entry) => entry.1 = startup,
            None => self.entries.push((name, startup)),
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Runs every registered startup that `options` does not exclude.
    ///
    /// Nothing here fails the build: names requested in `options.hosting_startups` that
    /// were never registered, and errors returned by a startup, are collected and returned.
    pub fn execute(&self, options: &HostOptions, builder: &mut WebHostBuilder) -> HostingStartupErrors {
        let mut errors = HostingStartupErrors::default();
        if options.prevent_hosting_startup {
            log::debug!("Hosting startups are disabled");
            return errors;
        }

        for name in &options.hosting_startups {
            if !self.contains(name) && !options.is_excluded(name) {
                errors.push(HostingStartupError::NotFound(name.clone()));
            }
        }

        for (name, startup) in &self.entries {
            if options.is_excluded(name) {
                log::debug!("Skipping excluded hosting startup {}", name);
                continue;
            }
            log::debug!("Running hosting startup {}", name);
            if let Err(e) = startup.configure(builder) {
                errors.push(HostingStartupError::Failed {
                    name: name.clone(),
                    source: Box::new(e),
                });
            }
        }

        errors
    }
}

impl fmt::Debug for HostingStartups {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
