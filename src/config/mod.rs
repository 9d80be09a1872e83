// ABOUTME: Runtime configuration for socket discovery and exposure
// Values come from built-in defaults, an optional TOML file, then CLI flags

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default socket path filter
pub const DEFAULT_PATH_PATTERN: &str = "ssh|docker|tmux|tmp";

/// Default first port handed out (the directory listener gets it)
pub const DEFAULT_START_PORT: u16 = 51111;

/// Default wait between scans
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Configuration for discovering and exposing sockets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposeConfig {
    /// Socket paths must match this regex to be served
    pub path_pattern: String,

    /// First port to try; later listeners take the following ones
    pub start_port: u16,

    /// Topmost directory searched for sockets
    pub scan_root: PathBuf,

    /// Time to wait between scans for new sockets
    #[serde(with = "duration_secs")]
    pub scan_interval: Duration,

    /// Address every TCP listener binds to
    pub bind_addr: IpAddr,

    /// Directories under these are never descended into
    pub prune_prefixes: Vec<PathBuf>,

    /// Verbose logging
    pub verbose: bool,
}

impl Default for ExposeConfig {
    fn default() -> Self {
        Self {
            path_pattern: DEFAULT_PATH_PATTERN.to_string(),
            start_port: DEFAULT_START_PORT,
            scan_root: PathBuf::from("/"),
            scan_interval: DEFAULT_SCAN_INTERVAL,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            prune_prefixes: vec![
                PathBuf::from("/proc"),
                PathBuf::from("/sys"),
                PathBuf::from("/dev"),
            ],
            verbose: false,
        }
    }
}

impl ExposeConfig {
    /// Load configuration from a TOML file; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Compile the socket path filter.
    pub fn compile_pattern(&self) -> Result<Regex, regex::Error> {
        Regex::new(&self.path_pattern)
    }
}

/// Serde helper for Duration as seconds (u64)
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ExposeConfig::default();
        assert_eq!(config.path_pattern, "ssh|docker|tmux|tmp");
        assert_eq!(config.start_port, 51111);
        assert_eq!(config.scan_root, PathBuf::from("/"));
        assert_eq!(config.scan_interval, Duration::from_secs(300));
        assert_eq!(config.bind_addr, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert!(!config.verbose);
    }

    #[test]
    fn test_default_pattern_matches_expected_paths() {
        let pattern = ExposeConfig::default().compile_pattern().unwrap();
        assert!(pattern.is_match("/var/run/docker.sock"));
        assert!(pattern.is_match("/run/user/1000/ssh-agent"));
        assert!(pattern.is_match("/tmp/tmux-1000/default"));
        assert!(!pattern.is_match("/run/dbus/system_bus_socket"));
    }

    #[test]
    fn test_from_toml_partial() {
        let config = ExposeConfig::from_toml(
            r#"
            start_port = 60000
            scan_interval = 30
            scan_root = "/var/run"
            "#,
        )
        .unwrap();

        assert_eq!(config.start_port, 60000);
        assert_eq!(config.scan_interval, Duration::from_secs(30));
        assert_eq!(config.scan_root, PathBuf::from("/var/run"));
        // Untouched keys keep defaults
        assert_eq!(config.path_pattern, DEFAULT_PATH_PATTERN);
        assert_eq!(config.prune_prefixes.len(), 3);
    }

    #[test]
    fn test_from_toml_rejects_bad_port() {
        assert!(ExposeConfig::from_toml("start_port = 70000").is_err());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = ExposeConfig {
            verbose: true,
            ..ExposeConfig::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(ExposeConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file_has_context() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("docksock.toml");

        let err = ExposeConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }

    #[test]
    fn test_load_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("docksock.toml");
        fs::write(&path, "path_pattern = \"docker\"\nverbose = true\n").unwrap();

        let config = ExposeConfig::load(&path).unwrap();
        assert_eq!(config.path_pattern, "docker");
        assert!(config.verbose);
    }

    #[test]
    fn test_invalid_pattern() {
        let config = ExposeConfig {
            path_pattern: "(unclosed".to_string(),
            ..ExposeConfig::default()
        };
        assert!(config.compile_pattern().is_err());
    }
}
