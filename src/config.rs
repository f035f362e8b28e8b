use std::env;
use std::path::PathBuf;

use crate::error::{Error, Result};

pub const DEFAULT_IP_ENDPOINT: &str = "https://api.ipify.org?format=json";

#[derive(Debug, Clone)]
pub struct Config {
    /// Connection string for the Postgres backend.
    pub database_url: String,
    /// Endpoint returning `{"ip": "..."}` for anonymous identity derivation.
    pub ip_endpoint: String,
    /// Optional path for the device-local vote marker file.
    pub device_store_path: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let database_url = env::var("LIVEPOLL_DATABASE_URL")
            .map_err(|_| Error::Configuration("LIVEPOLL_DATABASE_URL is not set".to_owned()))?;

        let ip_endpoint = env::var("LIVEPOLL_IP_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_IP_ENDPOINT.to_owned());

        let device_store_path = env::var("LIVEPOLL_DEVICE_STORE").ok().map(PathBuf::from);

        Ok(Self {
            database_url,
            ip_endpoint,
            device_store_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test: the environment is process-global state.
    #[test]
    fn load_requires_database_url_and_defaults_the_rest() {
        env::remove_var("LIVEPOLL_DATABASE_URL");
        let r = Config::load();
        assert!(matches!(r, Err(Error::Configuration(_))));

        env::set_var("LIVEPOLL_DATABASE_URL", "postgres://localhost/livepoll");
        let config = Config::load().unwrap();
        assert_eq!(config.ip_endpoint, DEFAULT_IP_ENDPOINT);
        assert!(config.device_store_path.is_none());
        env::remove_var("LIVEPOLL_DATABASE_URL");
    }
}
