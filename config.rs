//! Configuration management with environment variable support.
//!
//! This module provides [`Config`] for loading and validating store and key
//! settings from JSON files and environment variables.
//!
//! ## Environment Variables
//!
//! - `S3BACKUP_CONFIG`: Override config file path
//! - `S3BACKUP_REGION`: Override the S3 region
//! - `S3BACKUP_ENDPOINT`: Override the S3 endpoint
//! - `S3BACKUP_KEY_PATH`: Encryption key file (enables the encrypted pipeline)
//! - `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN`: credentials

use crate::store::S3Config;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Environment variable names for configuration overrides
pub const ENV_CONFIG_PATH: &str = "S3BACKUP_CONFIG";
pub const ENV_REGION: &str = "S3BACKUP_REGION";
pub const ENV_ENDPOINT: &str = "S3BACKUP_ENDPOINT";
pub const ENV_KEY_PATH: &str = "S3BACKUP_KEY_PATH";
pub const ENV_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const ENV_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const ENV_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Symmetric key file; when set, transfers are encrypted
    pub key_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            key_path: None,
        }
    }
}

impl Config {
    /// Load config from file path
    pub fn load(path: &str) -> Result<Self> {
        let s =
            fs::read_to_string(path).with_context(|| format!("reading config file {}", path))?;
        let mut config: Config =
            serde_json::from_str(&s).with_context(|| format!("parsing config file {}", path))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config with environment variable overrides
    /// Priority: ENV vars > config file > defaults
    pub fn load_with_env(path: Option<&str>) -> Result<Self> {
        let config_path = path
            .map(String::from)
            .or_else(|| env::var(ENV_CONFIG_PATH).ok());

        let mut config = match config_path {
            Some(ref p) if Path::new(p).exists() => {
                info!(path = p, "loading config from file");
                let s = fs::read_to_string(p)
                    .with_context(|| format!("reading config file {}", p))?;
                serde_json::from_str(&s).with_context(|| format!("parsing config file {}", p))?
            }
            Some(ref p) => {
                debug!(path = p, "config file not found, using defaults");
                Config::default()
            }
            None => {
                debug!("using default configuration");
                Config::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(region) = env::var(ENV_REGION) {
            debug!(region = %region, "overriding region from environment");
            self.region = region;
        }

        if let Ok(endpoint) = env::var(ENV_ENDPOINT) {
            debug!(endpoint = %endpoint, "overriding endpoint from environment");
            self.endpoint = Some(endpoint);
        }

        if let Ok(key_path) = env::var(ENV_KEY_PATH) {
            debug!(key_path = %key_path, "overriding key_path from environment");
            self.key_path = Some(key_path);
        }

        // credential values are never logged
        if let Ok(v) = env::var(ENV_ACCESS_KEY_ID) {
            self.access_key_id = Some(v);
        }
        if let Ok(v) = env::var(ENV_SECRET_ACCESS_KEY) {
            self.secret_access_key = Some(v);
        }
        if let Ok(v) = env::var(ENV_SESSION_TOKEN) {
            self.session_token = Some(v);
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.region.trim().is_empty() {
            anyhow::bail!("region cannot be empty");
        }

        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            anyhow::bail!("access_key_id and secret_access_key must be set together");
        }

        if self.session_token.is_some() && self.access_key_id.is_none() {
            anyhow::bail!("session_token requires access_key_id and secret_access_key");
        }

        if let Some(endpoint) = self.endpoint.as_deref() {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                anyhow::bail!("endpoint must be an http(s) URL, got {}", endpoint);
            }
        }

        if let Some(key_path) = self.key_path.as_deref() {
            if key_path.trim().is_empty() {
                anyhow::bail!("key_path cannot be empty");
            }

            // Warn if key path looks like it might be in a public directory
            if let Some(parent) = Path::new(key_path).parent() {
                let parent_str = parent.to_string_lossy().to_lowercase();
                if parent_str.contains("public")
                    || parent_str.contains("www")
                    || parent_str.contains("htdocs")
                {
                    warn!(
                        path = %key_path,
                        "key file path appears to be in a public directory - this is a security risk"
                    );
                }
            }
        }

        Ok(())
    }

    /// Backend settings for [`crate::store::OpendalStore::s3`]
    pub fn s3_config(&self) -> S3Config {
        S3Config {
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            session_token: self.session_token.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_partial_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, r#"{ "endpoint": "https://minio.local:9000" }"#).unwrap();

        let cfg: Config = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(cfg.region, "us-east-1");
        assert_eq!(cfg.endpoint.as_deref(), Some("https://minio.local:9000"));
        assert!(cfg.key_path.is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_half_credentials() {
        let cfg = Config {
            access_key_id: Some("AKIA".to_string()),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_token_without_keys() {
        let cfg = Config {
            session_token: Some("token".to_string()),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_endpoint_and_region() {
        let cfg = Config {
            endpoint: Some("localhost:9000".to_string()),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            region: "  ".to_string(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_s3_config_carries_settings() {
        let cfg = Config {
            region: "eu-west-1".to_string(),
            endpoint: Some("https://s3.example.com".to_string()),
            access_key_id: Some("id".to_string()),
            secret_access_key: Some("secret".to_string()),
            session_token: None,
            key_path: Some("backup.key".to_string()),
        };
        cfg.validate().unwrap();

        let s3 = cfg.s3_config();
        assert_eq!(s3.region, "eu-west-1");
        assert_eq!(s3.endpoint.as_deref(), Some("https://s3.example.com"));
        assert_eq!(s3.access_key_id.as_deref(), Some("id"));
        assert_eq!(s3.secret_access_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("absent.json");
        assert!(Config::load(&path.to_string_lossy()).is_err());
    }
}
