use std::{path::PathBuf, time::Duration};

use anyhow::Context;

use crate::gateway::DEFAULT_TIMEOUT;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub db_connection_string: String,
    pub catalog_path: PathBuf,
    pub request_timeout: Duration,
    pub login_route: String,
}

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";
const DEFAULT_DB_CONNECTION_STRING: &str = "sqlite://reader.sqlite?mode=rwc";
const DEFAULT_CATALOG_PATH: &str = "books.json";
const DEFAULT_LOGIN_ROUTE: &str = "/login";

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let api_base_url = lookup("READER_API_BASE_URL").unwrap_or(DEFAULT_API_BASE_URL.into());
        let db_connection_string = lookup("READER_DB_CONNECTION_STRING")
            .unwrap_or(DEFAULT_DB_CONNECTION_STRING.into());
        let catalog_path = lookup("READER_CATALOG_PATH").unwrap_or(DEFAULT_CATALOG_PATH.into());
        let login_route = lookup("READER_LOGIN_ROUTE").unwrap_or(DEFAULT_LOGIN_ROUTE.into());
        let request_timeout = match lookup("READER_REQUEST_TIMEOUT_MS") {
            Some(ms) => Duration::from_millis(
                ms.trim()
                    .parse()
                    .with_context(|| format!("Invalid READER_REQUEST_TIMEOUT_MS: {}", ms))?,
            ),
            None => DEFAULT_TIMEOUT,
        };
        Ok(Config {
            api_base_url,
            db_connection_string,
            catalog_path: PathBuf::from(catalog_path),
            request_timeout,
            login_route,
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.api_base_url.is_empty() {
            return Err("READER_API_BASE_URL is missing".into());
        }
        if self.db_connection_string.is_empty() {
            return Err("READER_DB_CONNECTION_STRING is missing".into());
        }
        if self.request_timeout.is_zero() {
            return Err("READER_REQUEST_TIMEOUT_MS must be greater than 0".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = from(&[]).unwrap();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.request_timeout, Duration::from_millis(30_000));
        assert_eq!(config.catalog_path, PathBuf::from("books.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn overrides_and_validation() {
        let config = from(&[
            ("READER_API_BASE_URL", ""),
            ("READER_REQUEST_TIMEOUT_MS", "1500"),
        ])
        .unwrap();
        assert_eq!(config.request_timeout, Duration::from_millis(1500));
        assert_eq!(
            config.validate().unwrap_err(),
            "READER_API_BASE_URL is missing"
        );

        let zero = from(&[("READER_REQUEST_TIMEOUT_MS", "0")]).unwrap();
        assert!(zero.validate().is_err());
    }

    #[test]
    fn bad_timeout_is_rejected() {
        let err = from(&[("READER_REQUEST_TIMEOUT_MS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("READER_REQUEST_TIMEOUT_MS"));
    }
}
