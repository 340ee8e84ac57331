//! Session and reflector state tracking

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use dv_protocol::Protocol;
use serde::{Deserialize, Serialize};

/// Link state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Login accepted, waiting for the client to confirm
    Linking,
    /// Fully linked; receives relayed traffic
    Linked,
    /// Being torn down
    Unlinking,
}

impl SessionState {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Linking => "Linking",
            Self::Linked => "Linked",
            Self::Unlinking => "Unlinking",
        }
    }
}

/// One client linked to a reflector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Remote UDP endpoint; the only reliable handle to a client
    pub address: SocketAddr,
    /// Callsign from the login frame
    pub identity: String,
    /// Link state
    pub state: SessionState,
    /// Last datagram of any kind
    pub last_seen: Instant,
    /// When the login was accepted
    pub linked_at: Instant,
}

impl Session {
    /// Create a session in the `Linking` state
    pub fn new(address: SocketAddr, identity: String, now: Instant) -> Self {
        Self {
            address,
            identity,
            state: SessionState::Linking,
            last_seen: now,
            linked_at: now,
        }
    }

    /// Update the activity timestamp
    pub fn touch(&mut self, now: Instant) {
        self.last_seen = now;
    }

    pub fn is_linked(&self) -> bool {
        self.state == SessionState::Linked
    }

    /// Time since the last datagram
    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    /// Snapshot for status reporting
    pub fn snapshot(&self, now: Instant) -> SessionSnapshot {
        SessionSnapshot {
            address: self.address,
            callsign: self.identity.clone(),
            state: self.state,
            idle_ms: duration_ms(self.idle(now)),
            connected_secs: now.saturating_duration_since(self.linked_at).as_secs(),
        }
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Serializable view of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub address: SocketAddr,
    pub callsign: String,
    pub state: SessionState,
    /// Milliseconds since the last datagram
    pub idle_ms: u64,
    /// Seconds since the login was accepted
    pub connected_secs: u64,
}

/// Serializable view of the current transmission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TalkerSnapshot {
    pub address: SocketAddr,
    pub callsign: Option<String>,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub duration_ms: u64,
}

/// Running counters of a reflector engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectorStats {
    /// Datagrams received
    pub datagrams_received: u64,
    /// Datagrams that failed to decode
    pub malformed: u64,
    /// Datagrams from unknown addresses that were not logins
    pub unknown_source: u64,
    /// Logins refused by the access list
    pub denied_logins: u64,
    /// Voice frames relayed
    pub voice_relayed: u64,
    /// Voice frames dropped by talker arbitration
    pub voice_dropped: u64,
    /// Datagrams handed to the socket
    pub datagrams_sent: u64,
    /// Datagrams the socket refused
    pub send_failures: u64,
    /// Transmissions started
    pub transmissions: u64,
    /// Status queries answered
    pub status_replies: u64,
}

/// Serializable view of one reflector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectorSnapshot {
    pub protocol: Protocol,
    /// Bound socket address, filled in by the actor
    pub local_addr: Option<SocketAddr>,
    pub sessions: Vec<SessionSnapshot>,
    pub talker: Option<TalkerSnapshot>,
    pub stats: ReflectorStats,
}

impl ReflectorSnapshot {
    /// Number of fully linked sessions
    pub fn linked_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|s| s.state == SessionState::Linked)
            .count()
    }
}
