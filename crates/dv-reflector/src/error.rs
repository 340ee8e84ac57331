//! Error types for the reflector engine

use std::net::SocketAddr;
use std::path::PathBuf;

use dv_protocol::Protocol;
use thiserror::Error;

/// Errors that can occur in a reflector engine
#[derive(Debug, Error)]
pub enum ReflectorError {
    /// UDP socket could not be bound
    #[error("failed to bind {protocol} reflector to {addr}: {source}")]
    Bind {
        protocol: Protocol,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No session exists for this address
    #[error("no session for {0}")]
    UnknownSession(SocketAddr),

    /// Address does not hold the talker lock
    #[error("{0} does not hold the talker lock")]
    NotTalker(SocketAddr),

    /// Internal state is inconsistent; the engine must be restarted
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// The reflector actor is not running
    #[error("{0} reflector is not running")]
    ActorClosed(Protocol),
}

/// Errors loading a callsign access list
#[derive(Debug, Error)]
pub enum AclError {
    /// ACL file could not be read
    #[error("failed to read ACL file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// ACL file is not valid YAML
    #[error("invalid ACL file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
