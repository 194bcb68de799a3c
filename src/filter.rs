use std::sync::Arc;

use crate::pipeline::ConfigureApplication;

/// Wraps the configure-application function to add behaviour around the user's pipeline.
///
/// Filters are registered in the service registry as `Arc<dyn StartupFilter>`.
pub trait StartupFilter: Send + Sync {
    fn configure(&self, next: ConfigureApplication) -> ConfigureApplication;
}

impl<F> StartupFilter for F
where
    F: Fn(ConfigureApplication) -> ConfigureApplication + Send + Sync,
{
    fn configure(&self, next: ConfigureApplication) -> ConfigureApplication {
        self(next)
    }
}

/// Composes `filters` around `configure`.
///
/// Folds right to left: the last filter wraps `configure` first, so the first
/// registered filter ends up outermost and runs before all others.
pub fn compose(filters: &[Arc<dyn StartupFilter>], configure: ConfigureApplication) -> ConfigureApplication {
    filters
        .iter()
        .rev()
        .fold(configure, |next, filter| filter.configure(next))
}
