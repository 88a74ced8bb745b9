use std::net::SocketAddr;

use http::Method;

use crate::{
    config::models::{MountConfig, RouteConfig, ServerConfig},
    core::router::{RoutePattern, normalize_prefix},
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Route conflict detected: {message}")]
    RouteConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Server configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire server configuration
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_duration("shutdown_timeout", &config.shutdown_timeout) {
            errors.push(e);
        }
        if let Some(max_age) = &config.session.max_age {
            if let Err(e) = Self::validate_duration("session.max_age", max_age) {
                errors.push(e);
            }
        }

        if config.max_body_bytes == 0 {
            errors.push(ValidationError::InvalidField {
                field: "max_body_bytes".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if config.stream_capacity == 0 {
            errors.push(ValidationError::InvalidField {
                field: "stream_capacity".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if config.mounts.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "mounts".to_string(),
            });
        }
        for (index, mount) in config.mounts.iter().enumerate() {
            if let Err(mut mount_errors) = Self::validate_mount(index, mount) {
                errors.append(&mut mount_errors);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_duration(field: &str, value: &str) -> ValidationResult<()> {
        humantime::parse_duration(value)
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidField {
                field: field.to_string(),
                message: format!("'{value}' is not a duration: {e}"),
            })
    }

    fn validate_mount(index: usize, mount: &MountConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let field = format!("mounts[{index}]");

        if let Err(e) = normalize_prefix(&mount.prefix) {
            errors.push(ValidationError::InvalidField {
                field: format!("{field}.prefix"),
                message: e.to_string(),
            });
        }
        if mount.routes.is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("{field}.routes"),
            });
        }

        let mut seen: Vec<(RoutePattern, Option<Vec<Method>>, &str)> = Vec::new();
        for (route_index, route) in mount.routes.iter().enumerate() {
            let route_field = format!("{field}.routes[{route_index}]");

            if route.module.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: format!("{route_field}.module"),
                });
            }

            let methods = match route.http_methods() {
                Ok(methods) => methods,
                Err(message) => {
                    errors.push(ValidationError::InvalidField {
                        field: format!("{route_field}.methods"),
                        message,
                    });
                    continue;
                }
            };

            let pattern = match RoutePattern::parse(&route.pattern) {
                Ok(pattern) => pattern,
                Err(e) => {
                    errors.push(ValidationError::InvalidField {
                        field: format!("{route_field}.pattern"),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            if let Some((_, _, earlier)) = seen.iter().find(|(other, other_methods, _)| {
                other.same_shape(&pattern) && Self::methods_overlap(other_methods, &methods)
            }) {
                errors.push(ValidationError::RouteConflict {
                    message: format!(
                        "{route_field} '{}' repeats a method already routed by '{earlier}' under '{}'",
                        route.pattern, mount.prefix
                    ),
                });
            }
            seen.push((pattern, methods, route.pattern.as_str()));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// `None` stands for every method.
    fn methods_overlap(a: &Option<Vec<Method>>, b: &Option<Vec<Method>>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => a.iter().any(|method| b.contains(method)),
            _ => true,
        }
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

impl RouteConfig {
    /// Parsed methods; `None` when the route accepts every method.
    pub fn http_methods(&self) -> Result<Option<Vec<Method>>, String> {
        if self.methods.is_empty() {
            return Ok(None);
        }
        self.methods
            .iter()
            .map(|name| {
                Method::from_bytes(name.trim().to_ascii_uppercase().as_bytes())
                    .map_err(|_| format!("'{name}' is not an HTTP method"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}
