//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Segment size used when planning uploads, in bytes.
    /// Must not exceed the relay backend's per-object ceiling.
    #[serde(default = "default_segment_size")]
    pub segment_size: u64,
    /// Maximum accepted request body for a direct upload, in bytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
    /// Directory used to spool direct-upload bodies before chunking.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_segment_size() -> u64 {
    crate::DEFAULT_SEGMENT_SIZE
}

fn default_max_upload_size() -> u64 {
    50 * 1024 * 1024 * 1024 // 50 GiB
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("./data/staging")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            segment_size: default_segment_size(),
            max_upload_size: default_max_upload_size(),
            staging_dir: default_staging_dir(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.segment_size < crate::MIN_SEGMENT_SIZE
            || self.segment_size > crate::MAX_SEGMENT_SIZE
        {
            return Err(format!(
                "segment_size must be between {} and {}",
                crate::MIN_SEGMENT_SIZE,
                crate::MAX_SEGMENT_SIZE
            ));
        }
        Ok(())
    }
}

/// Relay backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayConfig {
    /// Local directory relay (development and tests only).
    Directory {
        /// Root directory for stored objects.
        path: PathBuf,
        /// Per-object size ceiling in bytes.
        #[serde(default = "default_object_ceiling")]
        max_object_size: u64,
    },
    /// Telegram Bot API relay.
    ///
    /// The hosted Bot API caps uploads well below 2 GiB; point `api_base` at
    /// a self-hosted telegram-bot-api instance to get the full ceiling.
    Telegram {
        /// Bot API base URL.
        #[serde(default = "default_telegram_api_base")]
        api_base: String,
        /// Bot token.
        /// WARNING: Prefer the DEPOT_RELAY__BOT_TOKEN env var over storing
        /// secrets in config files.
        bot_token: String,
        /// Destination chat (channel) ID the bot sends objects to.
        chat_id: i64,
        /// Per-object size ceiling in bytes.
        #[serde(default = "default_object_ceiling")]
        max_object_size: u64,
    },
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_object_ceiling() -> u64 {
    crate::MAX_SEGMENT_SIZE
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::Directory {
            path: PathBuf::from("./data/relay"),
            max_object_size: default_object_ceiling(),
        }
    }
}

impl RelayConfig {
    /// The backend's per-object size ceiling.
    pub fn max_object_size(&self) -> u64 {
        match self {
            Self::Directory {
                max_object_size, ..
            }
            | Self::Telegram {
                max_object_size, ..
            } => *max_object_size,
        }
    }

    /// Validate relay configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_object_size() == 0 {
            return Err("max_object_size must be non-zero".to_string());
        }
        match self {
            Self::Telegram { bot_token, .. } if bot_token.is_empty() => {
                Err("telegram relay requires a non-empty bot_token".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (single-process deployments and tests).
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
    /// PostgreSQL database (horizontally scaled deployments).
    Postgres {
        /// Connection URL (optional if using individual fields).
        /// Takes precedence over individual fields if both are provided.
        url: Option<String>,
        /// Database host.
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Database username.
        username: Option<String>,
        /// Database password.
        /// WARNING: Prefer the DEPOT_METADATA__PASSWORD env var over storing
        /// secrets in config files.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds (prevents hung queries).
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_max_connections() -> u32 {
    10
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(300_000) // 5 minutes
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url.as_ref(), host.as_ref(), database.as_ref()) {
                (Some(_), _, _) => Ok(()),
                (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => {
                    Err("postgres config requires either 'url' or 'host' + 'database'".to_string())
                }
                (None, Some(_), None) => Err(
                    "postgres config requires 'database' when using individual fields".to_string(),
                ),
            },
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Relay backend configuration.
    #[serde(default)]
    pub relay: RelayConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
}

impl AppConfig {
    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.relay.validate()?;
        self.metadata.validate()?;
        if self.server.segment_size > self.relay.max_object_size() {
            return Err(format!(
                "segment_size {} exceeds the relay's max_object_size {}",
                self.server.segment_size,
                self.relay.max_object_size()
            ));
        }
        Ok(())
    }

    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses a directory relay and SQLite metadata.
    pub fn for_testing() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn test_relay_config_roundtrip() {
        let config = RelayConfig::Telegram {
            api_base: "http://localhost:8081".to_string(),
            bot_token: "123:abc".to_string(),
            chat_id: -1000123,
            max_object_size: 1024,
        };
        let json = serde_json::to_string(&config).unwrap();
        let decoded: RelayConfig = serde_json::from_str(&json).unwrap();
        match decoded {
            RelayConfig::Telegram {
                chat_id,
                max_object_size,
                ..
            } => {
                assert_eq!(chat_id, -1000123);
                assert_eq!(max_object_size, 1024);
            }
            _ => panic!("expected telegram config"),
        }
    }

    #[test]
    fn test_relay_config_rejects_empty_token() {
        let config = RelayConfig::Telegram {
            api_base: default_telegram_api_base(),
            bot_token: String::new(),
            chat_id: 1,
            max_object_size: 1024,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_metadata_config_postgres_requires_url_or_host() {
        let invalid = MetadataConfig::Postgres {
            url: None,
            host: None,
            port: default_pg_port(),
            username: None,
            password: None,
            database: None,
            max_connections: 10,
            statement_timeout_ms: None,
        };
        assert!(invalid.validate().is_err());

        let valid = MetadataConfig::Postgres {
            url: Some("postgres://localhost/depot".to_string()),
            host: None,
            port: default_pg_port(),
            username: None,
            password: None,
            database: None,
            max_connections: 10,
            statement_timeout_ms: None,
        };
        valid.validate().unwrap();
    }

    #[test]
    fn test_segment_size_must_fit_relay_ceiling() {
        let mut config = AppConfig::default();
        config.relay = RelayConfig::Directory {
            path: PathBuf::from("./relay"),
            max_object_size: crate::MIN_SEGMENT_SIZE,
        };
        config.server.segment_size = crate::MIN_SEGMENT_SIZE * 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_directory_relay_deserialize_defaults_ceiling() {
        let json = r#"{"type":"directory","path":"/tmp/relay"}"#;
        let config: RelayConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_object_size(), crate::MAX_SEGMENT_SIZE);
    }
}
