// ABOUTME: CLI argument parsing for docksock
//
// Flags override values from an optional TOML config file, which in turn
// override the built-in defaults.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::ExposeConfig;

/// Finds unix sockets matching a regex and, for each found socket, listens on
/// a TCP port and forwards connections to the Unix socket. Every so often the
/// filesystem is scanned for new sockets.
///
/// The first port sends a list of port -> socket mappings to any connecting
/// client.
#[derive(Parser, Debug)]
#[command(name = "docksock")]
#[command(author, version, about, long_about)]
pub struct Cli {
    /// Socket paths must match this regex to be served [default: ssh|docker|tmux|tmp]
    #[arg(long = "path-re", value_name = "REGEX")]
    pub path_re: Option<String>,

    /// Starting port to use for socket service [default: 51111]
    #[arg(long, value_name = "PORT")]
    pub start_port: Option<u16>,

    /// Topmost directory in which to search for sockets [default: /]
    #[arg(long, value_name = "DIRECTORY")]
    pub top_dir: Option<PathBuf>,

    /// Seconds to wait between scans for new sockets [default: 300]
    #[arg(long, value_name = "SECS")]
    pub scan_interval: Option<u64>,

    /// Address to bind listeners on [default: 0.0.0.0]
    #[arg(long = "bind", value_name = "IP")]
    pub bind_addr: Option<IpAddr>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// TOML config file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, default_value = "text")]
    pub log_format: LogFormat,
}

/// Log line format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Cli {
    /// Resolve the effective configuration: defaults, then file, then flags.
    pub fn resolve(&self) -> Result<ExposeConfig> {
        let base = match &self.config {
            Some(path) => ExposeConfig::load(path)?,
            None => ExposeConfig::default(),
        };
        Ok(self.apply(base))
    }

    /// Overlay explicitly given flags onto `config`.
    pub fn apply(&self, mut config: ExposeConfig) -> ExposeConfig {
        if let Some(pattern) = &self.path_re {
            config.path_pattern.clone_from(pattern);
        }
        if let Some(port) = self.start_port {
            config.start_port = port;
        }
        if let Some(dir) = &self.top_dir {
            config.scan_root.clone_from(dir);
        }
        if let Some(secs) = self.scan_interval {
            config.scan_interval = Duration::from_secs(secs);
        }
        if let Some(addr) = self.bind_addr {
            config.bind_addr = addr;
        }
        config.verbose |= self.verbose;
        config
    }
}
