/// Configuration management for Cipherpost
use crate::error::{ServerError, ServerResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub mail: MailConfig,
    pub storage: StorageConfig,
    pub notary: NotaryConfig,
    pub federation: FederationConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Mail routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// This server's MX host, as peers see it
    pub mx_host: String,
    /// Extra domains delivered to this server
    pub local_domains: Vec<String>,
    /// Static domain to MX host pairs, checked before DNS
    pub mx_overrides: HashMap<String, String>,
    pub mx_cache_ttl_secs: u64,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database: PathBuf,
}

/// Notary configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotaryConfig {
    /// secp256k1 private key, hex
    pub signing_key_hex: String,
}

/// Outbound key query configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationConfig {
    /// Wall-clock budget for peer replies, from dispatch start
    pub query_deadline_ms: u64,
    /// How long late replies are drained before their tasks are aborted
    pub drain_timeout_secs: u64,
    /// Per-request HTTP timeout
    pub peer_timeout_secs: u64,
    pub peer_scheme: String,
    pub peer_port: Option<u16>,
}

impl FederationConfig {
    pub fn query_deadline(&self) -> Duration {
        Duration::from_millis(self.query_deadline_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            query_deadline_ms: 5000,
            drain_timeout_secs: 30,
            peer_timeout_secs: 30,
            peer_scheme: "https".to_string(),
            peer_port: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ServerResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("CIPHERPOST_HOSTNAME").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("CIPHERPOST_PORT")
            .unwrap_or_else(|_| "8888".to_string())
            .parse()
            .map_err(|_| ServerError::Validation("Invalid port number".to_string()))?;
        let version = env!("CARGO_PKG_VERSION").to_string();

        let mx_host = env::var("CIPHERPOST_MX_HOST")
            .unwrap_or_else(|_| "localhost".to_string())
            .to_lowercase();
        let local_domains = split_list(&env::var("CIPHERPOST_LOCAL_DOMAINS").unwrap_or_default());
        let mx_overrides = parse_overrides(&env::var("CIPHERPOST_MX_OVERRIDES").unwrap_or_default())?;
        let mx_cache_ttl_secs = env::var("CIPHERPOST_MX_CACHE_TTL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .unwrap_or(300);

        let database = env::var("CIPHERPOST_DATABASE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/directory.sqlite"));

        let signing_key_hex = env::var("CIPHERPOST_NOTARY_SIGNING_KEY_HEX")
            .map_err(|_| ServerError::Validation("Notary signing key required".to_string()))?;

        let defaults = FederationConfig::default();
        let query_deadline_ms = env::var("CIPHERPOST_QUERY_DEADLINE_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.query_deadline_ms);
        let drain_timeout_secs = env::var("CIPHERPOST_DRAIN_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.drain_timeout_secs);
        let peer_timeout_secs = env::var("CIPHERPOST_PEER_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.peer_timeout_secs);
        let peer_scheme = env::var("CIPHERPOST_PEER_SCHEME").unwrap_or(defaults.peer_scheme);
        let peer_port = match env::var("CIPHERPOST_PEER_PORT") {
            Ok(v) => Some(
                v.parse()
                    .map_err(|_| ServerError::Validation("Invalid peer port number".to_string()))?,
            ),
            Err(_) => None,
        };

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            mail: MailConfig {
                mx_host,
                local_domains,
                mx_overrides,
                mx_cache_ttl_secs,
            },
            storage: StorageConfig { database },
            notary: NotaryConfig { signing_key_hex },
            federation: FederationConfig {
                query_deadline_ms,
                drain_timeout_secs,
                peer_timeout_secs,
                peer_scheme,
                peer_port,
            },
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> ServerResult<()> {
        if self.service.hostname.is_empty() {
            return Err(ServerError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.mail.mx_host.is_empty() {
            return Err(ServerError::Validation("MX host cannot be empty".to_string()));
        }

        if self.notary.signing_key_hex.trim().len() != 64 {
            return Err(ServerError::Validation(
                "Notary signing key must be 32 bytes of hex".to_string(),
            ));
        }

        if self.federation.query_deadline_ms == 0 {
            return Err(ServerError::Validation("Query deadline must be positive".to_string()));
        }

        if !matches!(self.federation.peer_scheme.as_str(), "http" | "https") {
            return Err(ServerError::Validation(format!(
                "Unsupported peer scheme: {}",
                self.federation.peer_scheme
            )));
        }

        Ok(())
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse `domain=mxhost` pairs
fn parse_overrides(value: &str) -> ServerResult<HashMap<String, String>> {
    let mut overrides = HashMap::new();

    for pair in split_list(value) {
        let (domain, mx_host) = pair
            .split_once('=')
            .ok_or_else(|| ServerError::Validation(format!("Invalid MX override: {}", pair)))?;
        overrides.insert(domain.trim().to_string(), mx_host.trim().to_string());
    }

    Ok(overrides)
}

#[cfg(test)]
pub(crate) fn test_config() -> ServerConfig {
    ServerConfig {
        service: ServiceConfig {
            hostname: "127.0.0.1".to_string(),
            port: 0,
            version: "test".to_string(),
        },
        mail: MailConfig {
            mx_host: "mx.home.test".to_string(),
            local_domains: vec!["home.test".to_string()],
            mx_overrides: HashMap::new(),
            mx_cache_ttl_secs: 300,
        },
        storage: StorageConfig {
            database: PathBuf::from(":memory:"),
        },
        notary: NotaryConfig {
            signing_key_hex: "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef".to_string(),
        },
        federation: FederationConfig {
            query_deadline_ms: 200,
            drain_timeout_secs: 1,
            ..FederationConfig::default()
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
    }
}
