//! YAML configuration file for the daemon. Unknown keys are ignored; the
//! `ports` entry accepts either bare integers or `{port, description}` maps.

use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use crate::protocol::PortInfo;

#[derive(Debug, Default, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub socket: Option<String>,
    #[serde(default)]
    pub retention_days: Option<u32>,
    #[serde(default)]
    pub log_level: Option<String>,
}

/// One entry of the `ports` sequence, in either accepted shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    Plain(i64),
    Detailed {
        port: i64,
        #[serde(default)]
        description: String,
    },
}

impl PortSpec {
    /// Validate and normalize into the richer form. Bare integers yield an
    /// empty description.
    pub fn resolve(&self) -> Result<PortInfo, ConfigError> {
        let (port, description) = match self {
            PortSpec::Plain(p) => (*p, String::new()),
            PortSpec::Detailed { port, description } => (*port, description.clone()),
        };
        if !(1..=65535).contains(&port) {
            return Err(ConfigError::InvalidPort(port));
        }
        Ok(PortInfo {
            port: port as u16,
            description,
        })
    }
}

impl Config {
    /// Resolve all port entries, rejecting out-of-range ports.
    pub fn resolve_ports(&self) -> Result<Vec<PortInfo>, ConfigError> {
        self.ports.iter().map(PortSpec::resolve).collect()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error parsing config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid port {0}: must be between 1 and 65535")]
    InvalidPort(i64),
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(s).map_err(ConfigError::Parse)
    }
}

/// Expand a leading `~` to the invoking user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest.trim_start_matches('/'));
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_port_list() {
        let cfg: Config = "ports: [80, 443]\nretention_days: 30\n".parse().unwrap();
        let ports = cfg.resolve_ports().unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].port, 80);
        assert_eq!(ports[0].description, "");
        assert_eq!(cfg.retention_days, Some(30));
    }

    #[test]
    fn parses_detailed_port_list() {
        let yaml = "\
ports:
  - port: 8080
    description: app server
  - port: 5432
socket: /tmp/pw.sock
";
        let cfg: Config = yaml.parse().unwrap();
        let ports = cfg.resolve_ports().unwrap();
        assert_eq!(ports[0].port, 8080);
        assert_eq!(ports[0].description, "app server");
        assert_eq!(ports[1].port, 5432);
        assert_eq!(ports[1].description, "");
        assert_eq!(cfg.socket.as_deref(), Some("/tmp/pw.sock"));
    }

    #[test]
    fn rejects_non_positive_port() {
        let cfg: Config = "ports: [0]\n".parse().unwrap();
        assert!(cfg.resolve_ports().is_err());

        let cfg: Config = "ports: [-5]\n".parse().unwrap();
        assert!(cfg.resolve_ports().is_err());

        let cfg: Config = "ports: [70000]\n".parse().unwrap();
        assert!(cfg.resolve_ports().is_err());
    }

    #[test]
    fn ignores_unknown_keys() {
        let cfg: Config = "ports: [22]\nfuture_option: true\n".parse().unwrap();
        assert_eq!(cfg.resolve_ports().unwrap()[0].port, 22);
    }

    #[test]
    fn expands_leading_tilde() {
        std::env::set_var("HOME", "/home/ops");
        assert_eq!(
            expand_tilde("~/portwatch/data"),
            PathBuf::from("/home/ops/portwatch/data")
        );
        assert_eq!(expand_tilde("/var/lib/pw"), PathBuf::from("/var/lib/pw"));
    }
}
