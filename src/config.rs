//! Configuration management

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{self, Context, Result};

use crate::services::chunked_importer::{ImportSettings, MAX_BATCH_SIZE};

/// 15 MiB, the web form's upload limit
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 15 * 1024 * 1024;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// JWT secret key for token validation
    pub jwt_secret: String,

    /// Where uploads are staged until their job finishes
    pub upload_dir: PathBuf,

    pub max_upload_bytes: u64,

    pub import: ImportSettings,

    /// How long JetStream waits for an import to be acknowledged
    pub import_ack_wait: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let nats_url = get("NATS_URL").unwrap_or_else(|| "nats://localhost:4222".to_string());

        let database_url = get("DATABASE_URL").context("DATABASE_URL must be set")?;

        let jwt_secret = get("JWT_SECRET")
            .context("JWT_SECRET must be set (share it with the web application)")?;
        if jwt_secret.len() < 32 {
            anyhow::bail!(
                "JWT_SECRET must be at least 32 bytes (current: {} bytes)",
                jwt_secret.len()
            );
        }

        let batch_size: usize = parse_or(&get, "IMPORT_BATCH_SIZE", 50)?;
        if !(1..=MAX_BATCH_SIZE).contains(&batch_size) {
            anyhow::bail!("IMPORT_BATCH_SIZE must be between 1 and {}", MAX_BATCH_SIZE);
        }

        let import = ImportSettings {
            batch_size,
            progress_interval: positive(parse_or(&get, "IMPORT_PROGRESS_INTERVAL", 50)?, "IMPORT_PROGRESS_INTERVAL")?,
            memory_check_interval: positive(
                parse_or(&get, "IMPORT_MEMORY_CHECK_INTERVAL", 1000)?,
                "IMPORT_MEMORY_CHECK_INTERVAL",
            )?,
            memory_threshold_mb: parse_or(&get, "IMPORT_MEMORY_THRESHOLD_MB", 256)?,
        };

        Ok(Self {
            nats_url,
            database_url,
            jwt_secret,
            upload_dir: get("UPLOAD_DIR").unwrap_or_else(|| "storage/uploads".to_string()).into(),
            max_upload_bytes: parse_or(&get, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            import,
            import_ack_wait: Duration::from_secs(parse_or(&get, "IMPORT_ACK_WAIT_SECS", 1800)?),
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        None => Ok(default),
    }
}

fn positive(value: u64, key: &str) -> Result<u64> {
    if value == 0 {
        anyhow::bail!("{} must be greater than zero", key);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("DATABASE_URL", "postgres://test"),
        ("JWT_SECRET", "0123456789abcdef0123456789abcdef"),
    ];

    #[test]
    fn test_defaults() {
        let config = load(&REQUIRED).unwrap();
        assert_eq!(config.nats_url, "nats://localhost:4222");
        assert_eq!(config.upload_dir, PathBuf::from("storage/uploads"));
        assert_eq!(config.max_upload_bytes, 15 * 1024 * 1024);
        assert_eq!(config.import, ImportSettings::default());
        assert_eq!(config.import_ack_wait, Duration::from_secs(1800));
    }

    #[test]
    fn test_overrides() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("IMPORT_BATCH_SIZE", "100"),
            ("IMPORT_PROGRESS_INTERVAL", "100"),
            ("IMPORT_MEMORY_THRESHOLD_MB", "512"),
            ("UPLOAD_DIR", "/var/lmt/uploads"),
        ]);
        let config = load(&vars).unwrap();
        assert_eq!(config.import.batch_size, 100);
        assert_eq!(config.import.progress_interval, 100);
        assert_eq!(config.import.memory_threshold_mb, 512);
        assert_eq!(config.upload_dir, PathBuf::from("/var/lmt/uploads"));
    }

    #[test]
    fn test_missing_database_url_fails() {
        assert!(load(&[REQUIRED[1]]).is_err());
    }

    #[test]
    fn test_short_jwt_secret_fails() {
        assert!(load(&[REQUIRED[0], ("JWT_SECRET", "short")]).is_err());
    }

    #[test]
    fn test_batch_size_out_of_range_fails() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("IMPORT_BATCH_SIZE", "5000"));
        assert!(load(&vars).is_err());

        let mut vars = REQUIRED.to_vec();
        vars.push(("IMPORT_BATCH_SIZE", "0"));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_non_numeric_value_fails() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("IMPORT_PROGRESS_INTERVAL", "often"));
        assert!(load(&vars).is_err());
    }
}
