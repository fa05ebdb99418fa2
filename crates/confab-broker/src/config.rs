//! Broker configuration

use serde::{Deserialize, Serialize};

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Hostname to bind
    pub hostname: String,
    /// Port to listen on
    pub port: u16,
    /// Externally reachable base URL used in login links
    ///
    /// Defaults to `http://{hostname}:{port}` when unset.
    #[serde(default)]
    pub public_url: Option<String>,
}

impl BrokerConfig {
    /// Socket address string to bind the listener on
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    /// Base URL clients are sent to for login pages
    pub fn public_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.hostname, self.port))
    }

    /// Clamp invalid values to usable defaults
    pub fn validate(&mut self) {
        if self.hostname.is_empty() {
            self.hostname = "localhost".to_string();
        }
        if let Some(url) = &self.public_url {
            if url.is_empty() {
                self.public_url = None;
            }
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { hostname: "localhost".to_string(), port: 8100, public_url: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.bind_addr(), "localhost:8100");
        assert_eq!(config.public_url(), "http://localhost:8100");
    }

    #[test]
    fn test_validate_restores_hostname() {
        let mut config =
            BrokerConfig { hostname: String::new(), port: 9000, public_url: Some(String::new()) };
        config.validate();
        assert_eq!(config.hostname, "localhost");
        assert_eq!(config.public_url(), "http://localhost:9000");
    }
}
