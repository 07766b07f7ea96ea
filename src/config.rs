use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, NzbFetchError};

type Result<T> = std::result::Result<T, NzbFetchError>;

/// Expand tilde (~) in paths to the actual home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if let Some(rest) = path_str.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        } else if path_str == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    #[serde(default)]
    pub download: DownloadConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One news server: where to connect and how many connections it
/// grants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    /// Optional TLS cipher suite allowlist, matched by name.
    #[serde(default)]
    pub cipher: Vec<String>,
    #[serde(default = "default_max_conn")]
    pub max_conn: u16,
    // Last field so TOML serialization emits the sub-table after the
    // server's scalar keys.
    #[serde(default)]
    pub auth: Option<AuthConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Destination directory for downloaded files.
    pub dir: PathBuf,
    /// Cap on segments in flight across the whole NZB. Defaults to the
    /// sum of the servers' `max_conn` plus a little headroom.
    #[serde(default)]
    pub max_in_flight: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

fn default_port() -> u16 {
    119
}

fn default_max_conn() -> u16 {
    20
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            tls: false,
            cipher: Vec::new(),
            max_conn: default_max_conn(),
            auth: None,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("downloads"),
            max_in_flight: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            download: DownloadConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Get the standard config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::Invalid {
            field: "config_dir".to_string(),
            reason: "could not determine config directory".to_string(),
        })?;
        Ok(config_dir.join("nzbfetch").join("config.toml"))
    }

    /// Load configuration from the working directory or the standard
    /// location, creating a commented sample on first run.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("nzbfetch.toml");
        let config_path = if local_config.exists() {
            local_config
        } else {
            let standard_config = Self::config_path()?;
            if !standard_config.exists() {
                if let Some(parent) = standard_config.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                Self::create_sample(&standard_config)?;
                println!(
                    "Created default configuration at: {}",
                    standard_config.display()
                );
                println!("Edit it with your news server and credentials, then rerun.");
            }
            standard_config
        };

        tracing::debug!(path = %config_path.display(), "loading configuration");
        Self::from_file(&config_path)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()).into());
        }
        let content = std::fs::read_to_string(path)?;
        let mut config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.download.dir = expand_tilde(&config.download.dir);

        config.validate()?;
        Ok(config)
    }

    /// Create a sample configuration file
    pub fn create_sample<P: AsRef<Path>>(path: P) -> Result<()> {
        let sample = r#"# nzbfetch configuration file
#
# Every [[servers]] block is one news server; segments are spread over
# all of them. max_conn is the connection cap per server.

[[servers]]
host = "news.example.com"
port = 563
tls = true
max_conn = 20
# Optional TLS cipher allowlist, matched by suite name:
# cipher = ["TLS13_AES_256_GCM_SHA384", "TLS13_AES_128_GCM_SHA256"]

[servers.auth]
user = "username"
password = "password"

[download]
dir = "downloads"
# Cap on segments in flight across the whole NZB. Defaults to the sum
# of the servers' max_conn plus a little headroom.
# max_in_flight = 50

[logging]
level = "info"
"#;
        std::fs::write(path, sample)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(ConfigError::NoServer.into());
        }

        for server in &self.servers {
            if server.host.is_empty() || server.host == "news.example.com" {
                return Err(ConfigError::NoServer.into());
            }
            if server.port == 0 {
                return Err(ConfigError::Invalid {
                    field: "port".to_string(),
                    reason: format!("invalid port for {}", server.host),
                }
                .into());
            }
            if server.max_conn == 0 || server.max_conn > 100 {
                return Err(ConfigError::InvalidConnections {
                    count: server.max_conn,
                }
                .into());
            }
            if !server.cipher.is_empty() && !server.tls {
                return Err(ConfigError::Invalid {
                    field: "cipher".to_string(),
                    reason: format!("cipher allowlist for {} requires tls = true", server.host),
                }
                .into());
            }
            if let Some(auth) = &server.auth {
                if auth.user.is_empty() {
                    return Err(ConfigError::Invalid {
                        field: "auth.user".to_string(),
                        reason: format!("empty user for {}", server.host),
                    }
                    .into());
                }
            }
        }

        if self.download.dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "download.dir".to_string(),
                reason: "download directory not specified".to_string(),
            }
            .into());
        }
        if self.download.max_in_flight == Some(0) {
            return Err(ConfigError::Invalid {
                field: "download.max_in_flight".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Ensure required directories exist
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.download.dir)?;
        Ok(())
    }

    /// Apply command-line overrides
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(dir) = overrides.output_dir {
            self.download.dir = dir;
        }
        if let Some(connections) = overrides.connections {
            for server in &mut self.servers {
                server.max_conn = connections;
            }
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
    }

    /// Sum of all servers' connection caps.
    pub fn total_connections(&self) -> usize {
        self.servers.iter().map(|s| s.max_conn as usize).sum()
    }
}

/// Command-line configuration overrides
#[derive(Debug, Default)]
pub struct ConfigOverrides {
    pub output_dir: Option<PathBuf>,
    pub connections: Option<u16>,
    pub log_level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            servers: vec![ServerConfig {
                host: "news.example.org".to_string(),
                port: 563,
                tls: true,
                cipher: Vec::new(),
                max_conn: 8,
                auth: Some(AuthConfig {
                    user: "user".to_string(),
                    password: "pass".to_string(),
                }),
            }],
            download: DownloadConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_default_config_has_no_servers() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_connection_count_bounds() {
        let mut config = valid_config();
        config.servers[0].max_conn = 0;
        assert!(config.validate().is_err());
        config.servers[0].max_conn = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cipher_requires_tls() {
        let mut config = valid_config();
        config.servers[0].tls = false;
        config.servers[0].cipher = vec!["TLS13_AES_256_GCM_SHA384".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            [[servers]]
            host = "news.example.org"
            port = 563
            tls = true
            max_conn = 8

            [servers.auth]
            user = "u"
            password = "p"

            [[servers]]
            host = "backup.example.org"

            [download]
            dir = "out"
            max_in_flight = 12
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].port, 563);
        assert!(config.servers[0].tls);
        assert_eq!(config.servers[1].port, 119);
        assert_eq!(config.servers[1].max_conn, 20);
        assert!(config.servers[1].auth.is_none());
        assert_eq!(config.download.dir, PathBuf::from("out"));
        assert_eq!(config.download.max_in_flight, Some(12));
        assert_eq!(config.total_connections(), 28);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = valid_config();
        let serialized = toml::to_string(&config).unwrap();
        let reparsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(reparsed.servers.len(), 1);
        assert_eq!(reparsed.servers[0].host, "news.example.org");
        assert_eq!(reparsed.servers[0].max_conn, 8);
        assert!(reparsed.servers[0].tls);
        assert_eq!(
            reparsed.servers[0].auth.as_ref().map(|a| a.user.as_str()),
            Some("user")
        );
    }

    #[test]
    fn test_overrides_apply_to_all_servers() {
        let mut config = valid_config();
        config.apply_overrides(ConfigOverrides {
            output_dir: Some(PathBuf::from("elsewhere")),
            connections: Some(3),
            log_level: None,
        });
        assert_eq!(config.download.dir, PathBuf::from("elsewhere"));
        assert_eq!(config.servers[0].max_conn, 3);
    }
}
