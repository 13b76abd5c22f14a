//! Pool configuration.

use std::fmt;
use std::time::Duration;

use crate::error::PoolError;

/// Configuration for the connection pool.
///
/// Immutable once handed to [`Pool::new`](crate::Pool::new). This struct is
/// marked `#[non_exhaustive]` to allow adding new fields in future minor
/// versions without breaking changes; use the builder methods or
/// [`Default::default()`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Opaque connection target handed to the factory (host, DSN, socket
    /// path, whatever the backend understands).
    pub endpoint: String,

    /// Credentials handed to the factory alongside the endpoint.
    pub credentials: Credentials,

    /// Connections opened eagerly by [`Pool::initialize`](crate::Pool::initialize).
    pub initial_size: u32,

    /// Hard cap on total outstanding connections, idle and leased combined.
    pub max_active: u32,

    /// Cap on the idle set; a released connection past this is closed.
    pub max_idle: u32,

    /// Maximum time an acquire call blocks waiting for capacity.
    pub wait_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            credentials: Credentials::default(),
            initial_size: 0,
            max_active: 10,
            max_idle: 10,
            wait_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection target.
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the credentials passed to the factory.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the number of connections opened at initialization.
    #[must_use]
    pub fn initial_size(mut self, count: u32) -> Self {
        self.initial_size = count;
        self
    }

    /// Set the cap on total outstanding connections.
    #[must_use]
    pub fn max_active(mut self, count: u32) -> Self {
        self.max_active = count;
        self
    }

    /// Set the cap on the idle set.
    #[must_use]
    pub fn max_idle(mut self, count: u32) -> Self {
        self.max_idle = count;
        self
    }

    /// Set the maximum blocking duration per acquire call.
    #[must_use]
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_active == 0 {
            return Err(PoolError::Configuration(
                "max_active must be greater than 0".into(),
            ));
        }
        if self.initial_size > self.max_active {
            return Err(PoolError::Configuration(
                "initial_size cannot be greater than max_active".into(),
            ));
        }
        if self.max_idle > self.max_active {
            return Err(PoolError::Configuration(
                "max_idle cannot be greater than max_active".into(),
            ));
        }
        Ok(())
    }
}

/// Credentials handed to the connection factory.
///
/// The secret is redacted from `Debug` output so configuration can be logged
/// safely.
#[derive(Clone, Default)]
pub struct Credentials {
    /// Account name, if the backend uses one.
    pub username: String,
    /// Secret material; never printed.
    pub secret: String,
}

impl Credentials {
    /// Create credentials from a username and secret.
    #[must_use]
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.initial_size, 0);
        assert_eq!(config.max_active, 10);
        assert_eq!(config.max_idle, 10);
        assert_eq!(config.wait_timeout, Duration::from_secs(30));
        assert!(config.endpoint.is_empty());
    }

    #[test]
    fn test_config_builder_methods() {
        let config = PoolConfig::new()
            .endpoint("backend:9000")
            .credentials(Credentials::new("svc", "hunter2"))
            .initial_size(2)
            .max_active(8)
            .max_idle(4)
            .wait_timeout(Duration::from_millis(250));

        assert_eq!(config.endpoint, "backend:9000");
        assert_eq!(config.credentials.username, "svc");
        assert_eq!(config.initial_size, 2);
        assert_eq!(config.max_active, 8);
        assert_eq!(config.max_idle, 4);
        assert_eq!(config.wait_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_config_validation_success() {
        let config = PoolConfig::new().initial_size(2).max_active(4).max_idle(4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_zero_max_active() {
        let config = PoolConfig::new().max_active(0).max_idle(0);
        let result = config.validate();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("max_active must be greater than 0")
        );
    }

    #[test]
    fn test_config_validation_initial_exceeds_max_active() {
        let config = PoolConfig::new().initial_size(5).max_active(2).max_idle(2);
        let result = config.validate();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("initial_size cannot be greater than max_active")
        );
    }

    #[test]
    fn test_config_validation_idle_exceeds_max_active() {
        let config = PoolConfig::new().max_active(2).max_idle(5);
        let result = config.validate();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("max_idle cannot be greater than max_active")
        );
    }

    #[test]
    fn test_config_equal_limits() {
        let config = PoolConfig::new().initial_size(4).max_active(4).max_idle(4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = Credentials::new("svc", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("svc"));
        assert!(!rendered.contains("hunter2"));
    }
}
