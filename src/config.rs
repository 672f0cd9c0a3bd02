//! Configuration management for the upload server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub access: AccessConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Prefix prepended to `Location` headers, without a trailing slash
    pub base_url: String,
}

/// Which commit strategy the deployment uses. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Local,
    S3,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub storage_type: StorageType,
    /// Root directory for the local backend
    pub root: PathBuf,
    pub provider: StorageProvider,
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Minio,
    R2,
    S3,
    B2,
}

impl StorageProvider {
    /// Unknown names fall back to MinIO
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "r2" => Self::R2,
            "s3" => Self::S3,
            "b2" => Self::B2,
            _ => Self::Minio,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Sliding idle window after which a session is evicted
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    pub keepalive_interval: Duration,
    /// Largest request body accepted as one chunk
    pub max_chunk_size: u64,
    /// Chunk size advertised to clients
    pub chunk_size: u64,
    pub retry_count: u32,
    /// Shell command run after each completed upload
    pub hook_command: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    pub allow_create: bool,
    pub allow_modify: bool,
    pub deny_paths: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                base_url: String::new(),
            },
            storage: StorageConfig {
                storage_type: StorageType::Local,
                root: PathBuf::from("./data"),
                provider: StorageProvider::Minio,
                endpoint: "http://localhost:9000".to_string(),
                bucket: "uploads".to_string(),
                access_key: "admin".to_string(),
                secret_key: "password123".to_string(),
                region: Some("us-east-1".to_string()),
            },
            upload: UploadConfig::default(),
            access: AccessConfig {
                allow_create: true,
                allow_modify: true,
                deny_paths: Vec::new(),
            },
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            idle_timeout: Duration::from_secs(180),
            sweep_interval: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(2),
            max_chunk_size: 100 * 1024 * 1024,
            chunk_size: 10 * 1024 * 1024,
            retry_count: 5,
            hook_command: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = UploadConfig::default();

        let storage_type = match env::var("STORAGE_TYPE")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "local" => StorageType::Local,
            "s3" => StorageType::S3,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "STORAGE_TYPE",
                    value: other.to_string(),
                })
            }
        };

        let config = Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("SERVER_PORT", 8080)?,
                base_url: env::var("BASE_URL")
                    .map(|url| url.trim_end_matches('/').to_string())
                    .unwrap_or_default(),
            },
            storage: StorageConfig {
                storage_type,
                root: env::var("STORAGE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("./data")),
                provider: StorageProvider::parse(&env::var("S3_PROVIDER").unwrap_or_default()),
                endpoint: env::var("S3_ENDPOINT").unwrap_or_default(),
                bucket: env::var("S3_BUCKET").unwrap_or_default(),
                access_key: env::var("S3_ACCESS_KEY").unwrap_or_default(),
                secret_key: env::var("S3_SECRET_KEY").unwrap_or_default(),
                region: env::var("S3_REGION").ok(),
            },
            upload: UploadConfig {
                idle_timeout: Duration::from_secs(parse_var(
                    "UPLOAD_IDLE_TIMEOUT_SECS",
                    defaults.idle_timeout.as_secs(),
                )?),
                sweep_interval: Duration::from_secs(parse_var(
                    "UPLOAD_SWEEP_INTERVAL_SECS",
                    defaults.sweep_interval.as_secs(),
                )?),
                keepalive_interval: Duration::from_secs(parse_var(
                    "UPLOAD_KEEPALIVE_INTERVAL_SECS",
                    defaults.keepalive_interval.as_secs(),
                )?),
                max_chunk_size: parse_var("UPLOAD_MAX_CHUNK_SIZE", defaults.max_chunk_size)?,
                chunk_size: parse_var("TUS_CHUNK_SIZE", defaults.chunk_size)?,
                retry_count: parse_var("TUS_RETRY_COUNT", defaults.retry_count)?,
                hook_command: env::var("UPLOAD_HOOK_COMMAND")
                    .ok()
                    .filter(|cmd| !cmd.trim().is_empty()),
            },
            access: AccessConfig {
                allow_create: parse_var("PERM_CREATE", true)?,
                allow_modify: parse_var("PERM_MODIFY", true)?,
                deny_paths: env::var("ACCESS_DENY_PATHS")
                    .map(|paths| split_list(&paths))
                    .unwrap_or_default(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject S3 deployments that are missing connection settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.storage_type == StorageType::S3 {
            let required = [
                ("S3_ENDPOINT", &self.storage.endpoint),
                ("S3_ACCESS_KEY", &self.storage.access_key),
                ("S3_SECRET_KEY", &self.storage.secret_key),
                ("S3_BUCKET", &self.storage.bucket),
            ];
            for (key, value) in required {
                if value.is_empty() {
                    return Err(ConfigError::MissingS3Setting(key));
                }
            }
        }
        if self.upload.keepalive_interval.is_zero() || self.upload.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "UPLOAD_KEEPALIVE_INTERVAL_SECS/UPLOAD_SWEEP_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        Err(_) => Ok(default),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list(" /private, /tmp/,, "),
            vec!["/private".to_string(), "/tmp/".to_string()]
        );
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_s3_requires_settings() {
        let mut config = Config::default();
        config.storage.storage_type = StorageType::S3;
        config.storage.endpoint = String::new();

        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingS3Setting("S3_ENDPOINT"))
        );

        config.storage.endpoint = "http://localhost:9000".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_provider_names() {
        assert_eq!(StorageProvider::parse("r2"), StorageProvider::R2);
        assert_eq!(StorageProvider::parse(" S3 "), StorageProvider::S3);
        assert_eq!(StorageProvider::parse("b2"), StorageProvider::B2);
        assert_eq!(StorageProvider::parse(""), StorageProvider::Minio);
        assert_eq!(StorageProvider::parse("garage"), StorageProvider::Minio);
    }

    #[test]
    fn test_default_is_local() {
        let config = Config::default();
        assert_eq!(config.storage.storage_type, StorageType::Local);
        assert_eq!(config.upload.idle_timeout, Duration::from_secs(180));
        assert!(config.validate().is_ok());
    }
}
