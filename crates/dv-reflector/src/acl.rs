//! Callsign access control
//!
//! The engine asks an [`AccessControl`] once per login attempt. The file-backed
//! [`CallsignAcl`] reads a YAML list:
//!
//! ```yaml
//! mode: deny          # disabled | allow | deny
//! callsigns:
//!   - N0CALL
//!   - KO4*            # prefix match
//! ```
//!
//! Entries are compared against the base callsign (the part before any
//! space, `-` or `/` suffix), ignoring case.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::AclError;

/// Login gate consulted by the engine
pub trait AccessControl: Send + Sync {
    /// Whether a client with this identity may link
    fn is_allowed(&self, identity: &str) -> bool;
}

/// Access control that admits everyone
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn is_allowed(&self, _identity: &str) -> bool {
        true
    }
}

/// How the callsign list is applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclMode {
    /// Everyone is admitted
    #[default]
    Disabled,
    /// Only listed callsigns are admitted
    Allow,
    /// Listed callsigns are refused
    Deny,
}

/// On-disk ACL format
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclFile {
    #[serde(default)]
    pub mode: AclMode,
    #[serde(default)]
    pub callsigns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Exact(String),
    Prefix(String),
}

impl Pattern {
    fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim().to_ascii_uppercase();
        if entry.is_empty() {
            return None;
        }
        Some(match entry.strip_suffix('*') {
            Some(prefix) => Pattern::Prefix(prefix.to_string()),
            None => Pattern::Exact(base_callsign(&entry).to_string()),
        })
    }

    fn matches(&self, base: &str) -> bool {
        match self {
            Pattern::Exact(call) => call == base,
            Pattern::Prefix(prefix) => base.starts_with(prefix.as_str()),
        }
    }
}

/// Strip SSID/suffix from a callsign (`KO4UYJ-7`, `KO4UYJ/P`, `KO4UYJ B`)
pub fn base_callsign(callsign: &str) -> &str {
    let trimmed = callsign.trim();
    trimmed
        .split(|c: char| c == ' ' || c == '-' || c == '/')
        .next()
        .unwrap_or(trimmed)
}

#[derive(Debug, Default)]
struct AclRules {
    mode: AclMode,
    patterns: Vec<Pattern>,
    modified: Option<SystemTime>,
}

impl AclRules {
    fn from_file(file: AclFile, modified: Option<SystemTime>) -> Self {
        Self {
            mode: file.mode,
            patterns: file.callsigns.iter().filter_map(|c| Pattern::parse(c)).collect(),
            modified,
        }
    }

    fn is_allowed(&self, identity: &str) -> bool {
        let base = base_callsign(identity).to_ascii_uppercase();
        let listed = self.patterns.iter().any(|p| p.matches(&base));
        match self.mode {
            AclMode::Disabled => true,
            AclMode::Allow => listed,
            AclMode::Deny => !listed,
        }
    }
}

/// Callsign allow/deny list, optionally backed by a reloadable file
#[derive(Debug)]
pub struct CallsignAcl {
    path: Option<PathBuf>,
    rules: RwLock<AclRules>,
}

impl CallsignAcl {
    /// Build from an in-memory list
    pub fn new(mode: AclMode, callsigns: &[&str]) -> Self {
        let file = AclFile {
            mode,
            callsigns: callsigns.iter().map(|c| c.to_string()).collect(),
        };
        Self {
            path: None,
            rules: RwLock::new(AclRules::from_file(file, None)),
        }
    }

    /// Parse from a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self, AclError> {
        let file: AclFile = serde_yaml::from_str(yaml)?;
        Ok(Self {
            path: None,
            rules: RwLock::new(AclRules::from_file(file, None)),
        })
    }

    /// Load from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AclError> {
        let path = path.as_ref().to_path_buf();
        let rules = Self::read_rules(&path)?;
        info!(
            "Loaded ACL from {} ({:?}, {} entries)",
            path.display(),
            rules.mode,
            rules.patterns.len()
        );
        Ok(Self {
            path: Some(path),
            rules: RwLock::new(rules),
        })
    }

    fn read_rules(path: &Path) -> Result<AclRules, AclError> {
        let io_err = |source| AclError::Io {
            path: path.to_path_buf(),
            source,
        };
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        let content = std::fs::read_to_string(path).map_err(io_err)?;
        let file: AclFile = serde_yaml::from_str(&content)?;
        Ok(AclRules::from_file(file, modified))
    }

    /// Current mode
    pub fn mode(&self) -> AclMode {
        self.rules
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .mode
    }

    /// Re-read the backing file if its modification time changed
    ///
    /// Returns whether the list was replaced. On error the previous list
    /// stays in force.
    pub fn reload_if_changed(&self) -> Result<bool, AclError> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        let modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|source| AclError::Io {
                path: path.clone(),
                source,
            })?;
        let current = self
            .rules
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .modified;
        if current == Some(modified) {
            return Ok(false);
        }

        let rules = Self::read_rules(path)?;
        info!(
            "Reloaded ACL from {} ({:?}, {} entries)",
            path.display(),
            rules.mode,
            rules.patterns.len()
        );
        *self
            .rules
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = rules;
        Ok(true)
    }

    /// Poll the backing file for changes every `period`
    pub fn spawn_reload_task(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match self.reload_if_changed() {
                    Ok(true) => {}
                    Ok(false) => debug!("ACL unchanged"),
                    Err(e) => warn!("ACL reload failed, keeping previous list: {}", e),
                }
            }
        })
    }
}

impl AccessControl for CallsignAcl {
    fn is_allowed(&self, identity: &str) -> bool {
        self.rules
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_allowed(identity)
    }
}
