//! Startup failure reporting.

use std::error::Error;

use crate::error::{HostError, HostingStartupErrors};

/// Renders `error` under `header`, followed by its source chain.
pub fn flatten_error(header: &str, error: &(dyn Error + 'static)) -> String {
    let mut message = String::from(header);
    push_chain(&mut message, error);
    message
}

/// Renders every captured hosting startup failure under `header` as one message.
pub fn flatten_hosting_startup_errors(header: &str, errors: &HostingStartupErrors) -> String {
    let mut message = String::from(header);
    for error in errors.iter() {
        push_chain(&mut message, error);
    }
    message
}

fn push_chain(message: &mut String, error: &(dyn Error + 'static)) {
    message.push('\n');
    message.push_str(&error.to_string());
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str("\n  caused by: ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
}

pub fn log_application_error(error: &HostError) {
    log::error!("{}", flatten_error("Application startup exception", error));
}

/// Logs errors captured while hosting startups ran. Does nothing when there are none.
pub fn log_hosting_startup_errors(errors: &HostingStartupErrors) {
    if !errors.is_empty() {
        log::error!("{}", flatten_hosting_startup_errors("Hosting startup exception", errors));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HostingStartupError;
    use std::io;

    #[test]
    fn test_flatten_hosting_startup_errors() {
        let mut errors = HostingStartupErrors::default();
        errors.push(HostingStartupError::NotFound("Sockets".into()));
        errors.push(HostingStartupError::NotFound("Metrics".into()));
        errors.push(HostingStartupError::Failed {
            name: "Tls".into(),
            source: Box::new(HostError::from(io::Error::new(io::ErrorKind::NotFound, "no certificate"))),
        });

        let message = flatten_hosting_startup_errors("Hosting startup exception", &errors);
        assert_eq!(
            message,
            "Hosting startup exception\n\
             hosting startup `Sockets` is not registered\n\
             hosting startup `Metrics` is not registered\n\
             hosting startup `Tls` failed: io error: no certificate\n  \
             caused by: io error: no certificate\n  \
             caused by: no certificate"
        );
    }

    #[test]
    fn test_flatten_source_chain() {
        let error = HostError::from(io::Error::new(io::ErrorKind::AddrInUse, "port taken"));
        let message = flatten_error("boot", &error);
        assert!(message.starts_with("boot\nio error: port taken"));
    }
}
