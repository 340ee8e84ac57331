//! Daemon configuration
//!
//! Loaded once from a YAML file at startup. Every field has a default, so a
//! config only needs the reflectors it enables:
//!
//! ```yaml
//! reflectors:
//!   ysf:
//!     enabled: true
//!     name: KO4UYJ-YSF
//!     description: Test reflector
//! ```

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use dv_protocol::callsign::encode_base40;
use dv_protocol::{CodecOptions, Protocol};
use dv_reflector::{ActorTimers, ReflectorConfig, ReflectorSettings};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub logger: LoggerConfig,
    pub acl: AclConfig,
    pub reporter: ReporterConfig,
    pub rest: RestConfig,
    pub reflectors: ReflectorsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Directory for `mmdvm_reflector.log`; no file log when unset
    pub path: Option<PathBuf>,
    /// Filter directive for our crates, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            path: None,
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AclConfig {
    /// ACL file; everyone is admitted when unset
    pub path: Option<PathBuf>,
    pub reload_secs: u64,
}

impl Default for AclConfig {
    fn default() -> Self {
        Self {
            path: None,
            reload_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    pub enabled: bool,
    pub ip: IpAddr,
    pub port: u16,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 3000,
        }
    }
}

impl ReporterConfig {
    /// Where events go, if anywhere
    pub fn target(&self) -> Option<SocketAddr> {
        self.enabled.then(|| SocketAddr::new(self.ip, self.port))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    pub enabled: bool,
    pub ip: IpAddr,
    pub port: u16,
    /// Required in `X-Api-Password` for state-changing requests
    pub password: String,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectorsConfig {
    pub p25: ReflectorSection,
    pub ysf: ReflectorSection,
    pub nxdn: ReflectorSection,
    pub m17: ReflectorSection,
}

impl ReflectorsConfig {
    pub fn section(&self, protocol: Protocol) -> &ReflectorSection {
        match protocol {
            Protocol::P25 => &self.p25,
            Protocol::Ysf => &self.ysf,
            Protocol::Nxdn => &self.nxdn,
            Protocol::M17 => &self.m17,
        }
    }

    /// Enabled reflectors in protocol order
    pub fn enabled(&self) -> Vec<(Protocol, &ReflectorSection)> {
        Protocol::ALL
            .into_iter()
            .map(|p| (p, self.section(p)))
            .filter(|(_, section)| section.enabled)
            .collect()
    }
}

/// Settings for one protocol's reflector
///
/// `callsign` is used by P25, NXDN and M17, `name`/`description` by YSF,
/// `talk_group` by NXDN and `module` by M17.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectorSection {
    pub enabled: bool,
    pub bind: IpAddr,
    /// Defaults to the protocol's well-known port
    pub port: Option<u16>,
    pub session_timeout_secs: u64,
    pub voice_frame_timeout_ms: u64,
    pub hang_time_ms: u64,
    pub handshake_timeout_secs: u64,
    pub sweep_interval_ms: u64,
    pub keepalive_interval_secs: u64,
    pub stats_interval_secs: u64,
    pub callsign: String,
    pub name: String,
    pub description: String,
    pub talk_group: u16,
    pub module: char,
}

impl Default for ReflectorSection {
    fn default() -> Self {
        let codec = CodecOptions::default();
        Self {
            enabled: false,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: None,
            session_timeout_secs: 60,
            voice_frame_timeout_ms: 1500,
            hang_time_ms: 2000,
            handshake_timeout_secs: 10,
            sweep_interval_ms: 1000,
            keepalive_interval_secs: 3,
            stats_interval_secs: 60,
            callsign: codec.callsign,
            name: codec.name,
            description: codec.description,
            talk_group: codec.talk_group,
            module: codec.module,
        }
    }
}

impl ReflectorSection {
    pub fn bind_addr(&self, protocol: Protocol) -> SocketAddr {
        SocketAddr::new(self.bind, self.port.unwrap_or_else(|| protocol.default_port()))
    }

    /// Engine settings for `protocol`
    pub fn settings(&self, protocol: Protocol) -> ReflectorSettings {
        let mut settings = ReflectorSettings::new(protocol, self.bind_addr(protocol));
        settings.codec = CodecOptions {
            callsign: self.callsign.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            talk_group: self.talk_group,
            module: self.module.to_ascii_uppercase(),
        };
        settings.engine = ReflectorConfig {
            session_timeout: Duration::from_secs(self.session_timeout_secs),
            voice_frame_timeout: Duration::from_millis(self.voice_frame_timeout_ms),
            hang_time: Duration::from_millis(self.hang_time_ms),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            ..ReflectorConfig::default()
        };
        settings.timers = ActorTimers {
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
            keepalive_interval: Duration::from_secs(self.keepalive_interval_secs),
            stats_interval: Duration::from_secs(self.stats_interval_secs),
        };
        settings
    }

    fn validate(&self, protocol: Protocol) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(format!("reflectors.{}: {}", protocol.name(), msg)));

        if self.port == Some(0) {
            return invalid("port must not be 0");
        }
        let timers = [
            ("session_timeout_secs", self.session_timeout_secs),
            ("voice_frame_timeout_ms", self.voice_frame_timeout_ms),
            ("handshake_timeout_secs", self.handshake_timeout_secs),
            ("sweep_interval_ms", self.sweep_interval_ms),
            ("keepalive_interval_secs", self.keepalive_interval_secs),
            ("stats_interval_secs", self.stats_interval_secs),
        ];
        if let Some((field, _)) = timers.iter().find(|(_, value)| *value == 0) {
            return invalid(&format!("{field} must not be 0"));
        }

        match protocol {
            Protocol::Ysf if self.name.trim().is_empty() => invalid("name must not be empty"),
            Protocol::M17 if !self.module.is_ascii_alphabetic() => {
                invalid("module must be a letter A-Z")
            }
            Protocol::M17 if encode_base40(&self.callsign).is_err() => {
                invalid("callsign cannot be encoded for M17")
            }
            Protocol::P25 | Protocol::Nxdn if self.callsign.trim().is_empty() => {
                invalid("callsign must not be empty")
            }
            _ => Ok(()),
        }
    }
}

impl GlobalConfig {
    /// Read, parse and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: GlobalConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let enabled = self.reflectors.enabled();
        if enabled.is_empty() {
            return Err(ConfigError::Invalid("no reflectors enabled".to_string()));
        }

        let mut ports: HashMap<SocketAddr, Protocol> = HashMap::new();
        for (protocol, section) in &enabled {
            section.validate(*protocol)?;
            let addr = section.bind_addr(*protocol);
            if let Some(other) = ports.insert(addr, *protocol) {
                return Err(ConfigError::Invalid(format!(
                    "reflectors.{} and reflectors.{} both use {}",
                    other.name(),
                    protocol.name(),
                    addr
                )));
            }
        }

        if self.rest.enabled && self.rest.password.is_empty() {
            return Err(ConfigError::Invalid(
                "rest.password must be set when the REST API is enabled".to_string(),
            ));
        }
        if self.reporter.enabled && self.reporter.port == 0 {
            return Err(ConfigError::Invalid("reporter.port must not be 0".to_string()));
        }
        if self.acl.path.is_some() && self.acl.reload_secs == 0 {
            return Err(ConfigError::Invalid("acl.reload_secs must not be 0".to_string()));
        }
        Ok(())
    }
}
