//! Guard Configuration
//!
//! Loaded from a TOML (or JSON) file, then overridden from the
//! environment. Every field has a default, so an empty file is valid.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete guard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Known non-tunneled public IP. Empty disables leak detection.
    pub real_ip: String,
    /// Plain-text "what is my IP" endpoint
    pub ip_checker_url: String,
    /// Torrent client control API base, e.g. `http://gluetun:8080/api/v2`
    pub torrent_api_url: String,
    /// HTTP forward proxy for all outbound guard traffic
    pub http_proxy: Option<String>,
    /// Per-request timeout for outbound HTTP
    pub request_timeout_secs: u64,
    pub directory: DirectoryConfig,
    pub benchmark: BenchmarkConfig,
    pub rotation: RotationConfig,
    pub health: HealthConfig,
    pub reconnect: ReconnectConfig,
    /// Forwarded-port sync; disabled when absent
    pub port_sync: Option<PortSyncConfig>,
    pub api: ApiConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            real_ip: String::new(),
            ip_checker_url: "https://ifconfig.me/ip".to_string(),
            torrent_api_url: "http://gluetun:8080/api/v2".to_string(),
            http_proxy: None,
            request_timeout_secs: 10,
            directory: DirectoryConfig::default(),
            benchmark: BenchmarkConfig::default(),
            rotation: RotationConfig::default(),
            health: HealthConfig::default(),
            reconnect: ReconnectConfig::default(),
            port_sync: None,
            api: ApiConfig::default(),
        }
    }
}

/// Candidate directory service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub url: String,
    /// Directory-specific country filter (209 = Switzerland)
    pub country_id: u32,
    /// How many recommendations to request
    pub limit: u32,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            url: "https://api.nordvpn.com/v1/servers/recommendations".to_string(),
            country_id: 209,
            limit: 10,
        }
    }
}

/// Latency and throughput probes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Large file on a stable mirror, fetched with a byte range
    pub mirror_url: String,
    /// Last byte requested (`Range: bytes=0-<range_end>`)
    pub range_end: u64,
    /// TCP port dialed for the latency probe
    pub probe_port: u16,
    pub dial_timeout_secs: u64,
    /// Deadline for the whole concurrent batch
    pub batch_timeout_secs: u64,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            mirror_url: "https://mirror.init7.net/archlinux/iso/latest/archlinux-x86_64.iso"
                .to_string(),
            range_end: 10 * 1024 * 1024,
            probe_port: 443,
            dial_timeout_secs: 2,
            batch_timeout_secs: 30,
        }
    }
}

impl BenchmarkConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }
}

/// Rotation cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Candidates kept from the directory's own ranking
    pub max_candidates: usize,
    /// Flat wait after reconnect before re-checking the IP
    pub grace_period_secs: u64,
    /// Local wall-clock time of the daily rotation (`HH:MM`)
    pub daily_at: String,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_candidates: 5,
            grace_period_secs: 10,
            daily_at: "04:00".to_string(),
        }
    }
}

impl RotationConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Parse `daily_at`
    pub fn daily_at(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(&self.daily_at, "%H:%M")
            .map_err(|_| ConfigError::InvalidTime(self.daily_at.clone()))
    }
}

/// Health-check loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { interval_secs: 30 * 60 }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// How a newly selected exit server is applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ReconnectConfig {
    /// Restart the container running the VPN client
    Container {
        #[serde(default = "default_container")]
        container: String,
        #[serde(default = "default_socket")]
        socket: PathBuf,
        #[serde(default = "default_api_version")]
        api_version: String,
        #[serde(default = "default_container_timeout")]
        timeout_secs: u64,
    },
    /// Run `<program> connect <server-name>`
    Cli {
        #[serde(default = "default_program")]
        program: String,
        #[serde(default = "default_cli_timeout")]
        timeout_secs: u64,
    },
}

fn default_container() -> String {
    "gluetun".to_string()
}

fn default_socket() -> PathBuf {
    PathBuf::from("/var/run/docker.sock")
}

fn default_api_version() -> String {
    "v1.41".to_string()
}

fn default_container_timeout() -> u64 {
    30
}

fn default_program() -> String {
    "nordvpn".to_string()
}

fn default_cli_timeout() -> u64 {
    60
}

impl ReconnectConfig {
    /// Container mode with default settings
    pub fn container() -> Self {
        ReconnectConfig::Container {
            container: default_container(),
            socket: default_socket(),
            api_version: default_api_version(),
            timeout_secs: default_container_timeout(),
        }
    }

    /// CLI mode with default settings
    pub fn cli() -> Self {
        ReconnectConfig::Cli {
            program: default_program(),
            timeout_secs: default_cli_timeout(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::cli()
    }
}

/// Forwarded-port sync
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSyncConfig {
    /// File the VPN client writes its forwarded port to
    pub port_file: PathBuf,
    pub interval_secs: u64,
}

impl Default for PortSyncConfig {
    fn default() -> Self {
        Self {
            port_file: PathBuf::from("/tmp/gluetun/forwarded_port"),
            interval_secs: 15 * 60,
        }
    }
}

impl PortSyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Local control API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub listen: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:5001".to_string(),
        }
    }
}

impl GuardConfig {
    /// Load from a `.toml` or `.json` file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;

        match ext {
            "toml" => Self::from_toml(&content),
            "json" => Self::from_json(&content),
            _ => Err(ConfigError::UnsupportedFormat),
        }
    }

    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from JSON string
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Export as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply overrides from process environment variables
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from a key lookup.
    ///
    /// Recognised keys: `REAL_IP`, `QBIT_URL`, `DOCKER_MODE`,
    /// `VPN_PORT_FILE`, `HTTP_PROXY_URL`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(real_ip) = lookup("REAL_IP") {
            self.real_ip = real_ip.trim().to_string();
        }

        if let Some(qbit_url) = lookup("QBIT_URL") {
            self.torrent_api_url = format!("{}/api/v2", qbit_url.trim().trim_end_matches('/'));
        }

        let docker_mode = lookup("DOCKER_MODE")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if docker_mode && !matches!(self.reconnect, ReconnectConfig::Container { .. }) {
            self.reconnect = ReconnectConfig::container();
        }

        if let Some(port_file) = lookup("VPN_PORT_FILE") {
            let sync = self.port_sync.get_or_insert_with(PortSyncConfig::default);
            sync.port_file = PathBuf::from(port_file);
        }

        if let Some(proxy) = lookup("HTTP_PROXY_URL") {
            let proxy = proxy.trim();
            self.http_proxy = (!proxy.is_empty()).then(|| proxy.to_string());
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("ip_checker_url", &self.ip_checker_url)?;
        check_url("torrent_api_url", &self.torrent_api_url)?;
        check_url("directory.url", &self.directory.url)?;
        check_url("benchmark.mirror_url", &self.benchmark.mirror_url)?;
        if let Some(proxy) = &self.http_proxy {
            check_url("http_proxy", proxy)?;
        }

        self.rotation.daily_at()?;

        let non_zero = [
            ("request_timeout_secs", self.request_timeout_secs),
            ("health.interval_secs", self.health.interval_secs),
            ("benchmark.dial_timeout_secs", self.benchmark.dial_timeout_secs),
            ("benchmark.batch_timeout_secs", self.benchmark.batch_timeout_secs),
            ("rotation.max_candidates", self.rotation.max_candidates as u64),
            ("directory.limit", u64::from(self.directory.limit)),
        ];
        if let Some((field, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero(*field));
        }

        if let Some(sync) = &self.port_sync {
            if sync.interval_secs == 0 {
                return Err(ConfigError::Zero("port_sync.interval_secs"));
            }
        }

        Ok(())
    }
}

fn check_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|_| ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        })
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported config format (expected .toml or .json)")]
    UnsupportedFormat,

    #[error("Invalid daily time {0:?} (expected HH:MM)")]
    InvalidTime(String),

    #[error("Invalid URL for {field}: {value}")]
    InvalidUrl { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = GuardConfig::from_toml("").unwrap();

        assert!(config.real_ip.is_empty());
        assert_eq!(config.ip_checker_url, "https://ifconfig.me/ip");
        assert_eq!(config.rotation.max_candidates, 5);
        assert_eq!(config.rotation.grace_period(), Duration::from_secs(10));
        assert_eq!(config.health.interval(), Duration::from_secs(1800));
        assert_eq!(config.benchmark.probe_port, 443);
        assert_eq!(config.reconnect, ReconnectConfig::cli());
        assert!(config.port_sync.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_container_mode() {
        let config = GuardConfig::from_toml(
            r#"
            real_ip = "82.10.10.10"
            http_proxy = "http://gluetun:8888"

            [reconnect]
            mode = "container"
            container = "vpn"

            [rotation]
            daily_at = "03:30"
            "#,
        )
        .unwrap();

        assert_eq!(config.real_ip, "82.10.10.10");
        assert_eq!(config.http_proxy.as_deref(), Some("http://gluetun:8888"));
        match &config.reconnect {
            ReconnectConfig::Container { container, socket, api_version, .. } => {
                assert_eq!(container, "vpn");
                assert_eq!(socket, &PathBuf::from("/var/run/docker.sock"));
                assert_eq!(api_version, "v1.41");
            }
            other => panic!("unexpected reconnect mode: {:?}", other),
        }
        assert_eq!(
            config.rotation.daily_at().unwrap(),
            NaiveTime::from_hms_opt(3, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_env_overrides() {
        let mut config = GuardConfig::default();
        config.apply_overrides(lookup(&[
            ("REAL_IP", " 1.2.3.4 "),
            ("QBIT_URL", "http://qbit:8080/"),
            ("DOCKER_MODE", "TRUE"),
            ("VPN_PORT_FILE", "/run/port"),
        ]));

        assert_eq!(config.real_ip, "1.2.3.4");
        assert_eq!(config.torrent_api_url, "http://qbit:8080/api/v2");
        assert!(matches!(config.reconnect, ReconnectConfig::Container { .. }));
        let sync = config.port_sync.unwrap();
        assert_eq!(sync.port_file, PathBuf::from("/run/port"));
        assert_eq!(sync.interval_secs, 900);
    }

    #[test]
    fn test_docker_mode_keeps_explicit_container_settings() {
        let mut config = GuardConfig::from_toml("[reconnect]\nmode = \"container\"\ncontainer = \"wg\"").unwrap();
        config.apply_overrides(lookup(&[("DOCKER_MODE", "true")]));

        assert!(matches!(
            &config.reconnect,
            ReconnectConfig::Container { container, .. } if container == "wg"
        ));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = GuardConfig::default();
        config.rotation.daily_at = "4am".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTime(_))));

        let mut config = GuardConfig::default();
        config.ip_checker_url = "ifconfig.me".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { field: "ip_checker_url", .. })
        ));

        let mut config = GuardConfig::default();
        config.rotation.max_candidates = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Zero("rotation.max_candidates"))
        ));
    }

    #[test]
    fn test_json_config() {
        let config = GuardConfig::from_json(r#"{"real_ip": "5.6.7.8", "reconnect": {"mode": "cli", "program": "vpnctl"}}"#).unwrap();

        assert_eq!(config.real_ip, "5.6.7.8");
        assert!(matches!(
            &config.reconnect,
            ReconnectConfig::Cli { program, timeout_secs: 60 } if program == "vpnctl"
        ));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guard.yaml");
        std::fs::write(&path, "real_ip: x").unwrap();

        assert!(matches!(GuardConfig::from_file(&path), Err(ConfigError::UnsupportedFormat)));
    }

    #[test]
    fn test_toml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guard.toml");
        let mut config = GuardConfig::default();
        config.real_ip = "9.9.9.9".to_string();
        config.port_sync = Some(PortSyncConfig::default());
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();

        let loaded = GuardConfig::from_file(&path).unwrap();
        assert_eq!(loaded.real_ip, "9.9.9.9");
        assert!(loaded.port_sync.is_some());
    }
}
