//! Agent configuration.
//!
//! Values are resolved with priority:
//! 1. Environment variables (`PRINTINATOR_CLOUD_URL`, `FORMLABS_CLIENT_ID`, `FORMLABS_CLIENT_SECRET`)
//! 2. Config file (`~/.config/printinator/config.toml`)
//! 3. Defaults

use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Default cloud API URL
pub const DEFAULT_CLOUD_URL: &str = "https://api.formlabs.com/developer/v1";

/// Service type advertised by LAN printers
pub const DEFAULT_SERVICE_TYPE: &str = "_makerbot-jsonrpc._tcp";

/// JSON-RPC port used when a service does not advertise one
pub const DEFAULT_RPC_PORT: u16 = 9999;

const ENV_CLOUD_URL: &str = "PRINTINATOR_CLOUD_URL";
const ENV_CLIENT_ID: &str = "FORMLABS_CLIENT_ID";
const ENV_CLIENT_SECRET: &str = "FORMLABS_CLIENT_SECRET";

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    cloud: Option<CloudSection>,
    lan: Option<LanSection>,
    pairing: Option<PairingSection>,
}

#[derive(Debug, Deserialize, Default)]
struct CloudSection {
    api_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    poll_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct LanSection {
    client_id: Option<String>,
    client_secret: Option<String>,
    service_type: Option<String>,
    auth_port: Option<u16>,
    poll_concurrency: Option<usize>,
    rpc_timeout_secs: Option<u64>,
    address_debounce_secs: Option<u64>,
    hosts: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct PairingSection {
    poll_interval_secs: Option<u64>,
    max_attempts: Option<u32>,
}

/// Where the cloud endpoint came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    Default,
    Environment,
    ConfigFile,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::ConfigFile => write!(f, "config file"),
        }
    }
}

/// Cloud API settings
#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub api_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub poll_interval: Duration,
    pub source: ConfigSource,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_CLOUD_URL.to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            poll_interval: Duration::from_secs(60),
            source: ConfigSource::Default,
        }
    }
}

/// LAN discovery and JSON-RPC settings
#[derive(Debug, Clone)]
pub struct LanConfig {
    pub client_id: String,
    pub client_secret: String,
    pub service_type: String,
    pub domain: String,
    pub auth_port: u16,
    pub poll_concurrency: usize,
    pub rpc_timeout: Duration,
    pub address_debounce: Duration,
    /// Printers to register without waiting for service discovery
    pub hosts: Vec<String>,
}

impl Default for LanConfig {
    fn default() -> Self {
        Self {
            client_id: "MakerWare".to_string(),
            client_secret: "secret".to_string(),
            service_type: DEFAULT_SERVICE_TYPE.to_string(),
            domain: "local".to_string(),
            auth_port: 80,
            poll_concurrency: 4,
            rpc_timeout: Duration::from_secs(10),
            address_debounce: Duration::from_secs(5),
            hosts: Vec::new(),
        }
    }
}

/// Knob-press polling settings
#[derive(Debug, Clone)]
pub struct PairingConfig {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_attempts: 60,
        }
    }
}

/// Runtime configuration for the whole agent
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    pub cloud: CloudConfig,
    pub lan: LanConfig,
    pub pairing: PairingConfig,
    /// Quiet period before an edited username/password is acted on
    pub credential_debounce: Duration,
}

impl AgentConfig {
    pub fn new() -> Self {
        Self {
            credential_debounce: Duration::from_millis(200),
            ..Default::default()
        }
    }
}

/// Get the printinator config directory
pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("printinator"))
}

fn get_config_file_path() -> Option<PathBuf> {
    get_config_dir().map(|p| p.join("config.toml"))
}

fn load_config_file() -> Option<ConfigFile> {
    let path = get_config_file_path()?;

    if !path.exists() {
        return None;
    }

    match fs::read_to_string(&path) {
        Ok(content) => match parse_config_file(&content) {
            Ok(config) => {
                tracing::debug!("Loaded config from {:?}", path);
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read config file {:?}: {}", path, e);
            None
        }
    }
}

fn parse_config_file(content: &str) -> Result<ConfigFile, toml::de::Error> {
    toml::from_str(content)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn apply_file(config: &mut AgentConfig, file: ConfigFile) {
    if let Some(cloud) = file.cloud {
        if let Some(url) = non_empty(cloud.api_url) {
            config.cloud.api_url = url.trim_end_matches('/').to_string();
            config.cloud.source = ConfigSource::ConfigFile;
        }
        if let Some(id) = non_empty(cloud.client_id) {
            config.cloud.client_id = id;
        }
        if let Some(secret) = non_empty(cloud.client_secret) {
            config.cloud.client_secret = secret;
        }
        if let Some(secs) = cloud.poll_interval_secs.filter(|s| *s > 0) {
            config.cloud.poll_interval = Duration::from_secs(secs);
        }
    }

    if let Some(lan) = file.lan {
        if let Some(id) = non_empty(lan.client_id) {
            config.lan.client_id = id;
        }
        if let Some(secret) = non_empty(lan.client_secret) {
            config.lan.client_secret = secret;
        }
        if let Some(service_type) = non_empty(lan.service_type) {
            config.lan.service_type = service_type;
        }
        if let Some(port) = lan.auth_port {
            config.lan.auth_port = port;
        }
        if let Some(limit) = lan.poll_concurrency.filter(|l| *l > 0) {
            config.lan.poll_concurrency = limit;
        }
        if let Some(secs) = lan.rpc_timeout_secs.filter(|s| *s > 0) {
            config.lan.rpc_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = lan.address_debounce_secs {
            config.lan.address_debounce = Duration::from_secs(secs);
        }
        if let Some(hosts) = lan.hosts {
            config.lan.hosts = hosts;
        }
    }

    if let Some(pairing) = file.pairing {
        if let Some(secs) = pairing.poll_interval_secs {
            config.pairing.poll_interval = Duration::from_secs(secs);
        }
        if let Some(attempts) = pairing.max_attempts.filter(|a| *a > 0) {
            config.pairing.max_attempts = attempts;
        }
    }
}

fn apply_env(config: &mut AgentConfig) {
    if let Some(url) = non_empty(std::env::var(ENV_CLOUD_URL).ok()) {
        tracing::info!("Using cloud API URL from environment variable: {}", url);
        config.cloud.api_url = url.trim_end_matches('/').to_string();
        config.cloud.source = ConfigSource::Environment;
    }
    if let Some(id) = non_empty(std::env::var(ENV_CLIENT_ID).ok()) {
        config.cloud.client_id = id;
    }
    if let Some(secret) = non_empty(std::env::var(ENV_CLIENT_SECRET).ok()) {
        config.cloud.client_secret = secret;
    }
}

/// Load agent configuration with priority env > file > defaults.
pub fn load_config() -> AgentConfig {
    let mut config = AgentConfig::new();

    if let Some(file) = load_config_file() {
        apply_file(&mut config, file);
    }
    apply_env(&mut config);

    if config.cloud.client_id.is_empty() {
        tracing::warn!(
            "No cloud client id configured; set {} or [cloud] client_id",
            ENV_CLIENT_ID
        );
    }
    tracing::debug!(
        "Cloud API URL: {} (from {})",
        config.cloud.api_url,
        config.cloud.source
    );

    config
}

/// Get the path to the config file for documentation purposes
pub fn get_config_file_path_string() -> String {
    get_config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/printinator/config.toml".to_string())
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# Printinator Agent Configuration
# Place this file at: ~/.config/printinator/config.toml

[cloud]
# api_url = "https://api.formlabs.com/developer/v1"
# client_id = "your-client-id"
# client_secret = "your-client-secret"
# poll_interval_secs = 60

[lan]
# Printers to poll even when service discovery does not see them
# hosts = ["192.168.1.50:9999"]
# poll_concurrency = 4
# rpc_timeout_secs = 10
# auth_port = 80

[pairing]
# Seconds between knob-press checks, and how many checks before giving up
# poll_interval_secs = 2
# max_attempts = 60
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::new();
        assert_eq!(config.cloud.api_url, DEFAULT_CLOUD_URL);
        assert_eq!(config.cloud.poll_interval, Duration::from_secs(60));
        assert_eq!(config.lan.service_type, "_makerbot-jsonrpc._tcp");
        assert_eq!(config.pairing.max_attempts, 60);
        assert_eq!(config.pairing.poll_interval, Duration::from_secs(2));
        assert_eq!(config.credential_debounce, Duration::from_millis(200));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = parse_config_file(
            r#"
[cloud]
api_url = "https://example.test/api/"
client_id = "abc"

[lan]
hosts = ["10.0.0.2:9999"]
poll_concurrency = 0

[pairing]
max_attempts = 5
"#,
        )
        .unwrap();

        let mut config = AgentConfig::new();
        apply_file(&mut config, file);

        assert_eq!(config.cloud.api_url, "https://example.test/api");
        assert_eq!(config.cloud.source, ConfigSource::ConfigFile);
        assert_eq!(config.cloud.client_id, "abc");
        assert_eq!(config.lan.hosts, vec!["10.0.0.2:9999".to_string()]);
        // zero concurrency is ignored
        assert_eq!(config.lan.poll_concurrency, 4);
        assert_eq!(config.pairing.max_attempts, 5);
    }

    #[test]
    fn test_example_config_parses() {
        assert!(parse_config_file(&generate_example_config()).is_ok());
    }
}
