//! Environment-driven configuration, in the style of `OximyConfig::from_env`:
//! a `Default` baseline overridden field-by-field by whichever environment
//! variables are actually set.

use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub proxy_addr: SocketAddr,
    pub api_addr: SocketAddr,
    pub ca_cert_path: PathBuf,
    pub ca_key_path: PathBuf,
    pub scan_concurrency: usize,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_addr: "0.0.0.0:8080".parse().unwrap(),
            api_addr: "0.0.0.0:8000".parse().unwrap(),
            ca_cert_path: PathBuf::from("ca.crt"),
            ca_key_path: PathBuf::from("ca.key"),
            scan_concurrency: mitmkit_replay::default_concurrency(),
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Load defaults, then apply any of `MITMKIT_PROXY_ADDR`,
    /// `MITMKIT_API_ADDR`, `MITMKIT_CA_CERT`, `MITMKIT_CA_KEY`,
    /// `MITMKIT_SCAN_CONCURRENCY`, `MITMKIT_LOG` that are set.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("MITMKIT_PROXY_ADDR") {
            match val.parse() {
                Ok(addr) => config.proxy_addr = addr,
                Err(e) => tracing::warn!(value = %val, error = %e, "ignoring invalid MITMKIT_PROXY_ADDR"),
            }
        }
        if let Ok(val) = std::env::var("MITMKIT_API_ADDR") {
            match val.parse() {
                Ok(addr) => config.api_addr = addr,
                Err(e) => tracing::warn!(value = %val, error = %e, "ignoring invalid MITMKIT_API_ADDR"),
            }
        }
        if let Ok(val) = std::env::var("MITMKIT_CA_CERT") {
            config.ca_cert_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("MITMKIT_CA_KEY") {
            config.ca_key_path = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("MITMKIT_SCAN_CONCURRENCY") {
            match val.parse() {
                Ok(n) => config.scan_concurrency = n,
                Err(e) => {
                    tracing::warn!(value = %val, error = %e, "ignoring invalid MITMKIT_SCAN_CONCURRENCY")
                }
            }
        }
        if let Ok(val) = std::env::var("MITMKIT_LOG") {
            config.log_filter = val;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_out_of_the_box() {
        let config = Config::default();
        assert_eq!(config.proxy_addr.port(), 8080);
        assert_eq!(config.api_addr.port(), 8000);
        assert!(config.scan_concurrency > 0);
    }
}
