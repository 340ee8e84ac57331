//! Reflector event stream
//!
//! Engines buffer events while handling datagrams and timer ticks; the actor
//! drains them into the reporter channel after every step. Each event carries
//! the protocol it came from so a single reporter can serve all engines.

use std::net::SocketAddr;

use dv_protocol::Protocol;
use serde::{Deserialize, Serialize};

use crate::state::ReflectorStats;

/// Why a session went away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlinkReason {
    /// The client sent an unlink/disconnect frame
    Requested,
    /// No datagrams within the session timeout
    Timeout,
    /// The client never confirmed its login
    HandshakeTimeout,
    /// A login with a different callsign arrived from the same address
    Replaced,
    /// Force-unlinked by an operator
    Administrative,
    /// The reflector is shutting down
    Shutdown,
}

/// Why a transmission ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransmissionEnd {
    /// End-of-transmission frame received
    EndOfTransmission,
    /// The talker fell silent
    Timeout,
    /// The talker's session was removed mid-transmission
    Unlinked,
}

/// Events emitted by a reflector engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReflectorEvent {
    /// A client completed its login
    SessionLinked {
        protocol: Protocol,
        address: SocketAddr,
        callsign: String,
    },

    /// A client was removed
    SessionUnlinked {
        protocol: Protocol,
        address: SocketAddr,
        callsign: String,
        reason: UnlinkReason,
    },

    /// A client took the floor
    TransmissionStarted {
        protocol: Protocol,
        address: SocketAddr,
        callsign: String,
        source: Option<String>,
        destination: Option<String>,
    },

    /// The floor was released
    TransmissionEnded {
        protocol: Protocol,
        address: SocketAddr,
        callsign: String,
        source: Option<String>,
        destination: Option<String>,
        reason: TransmissionEnd,
        duration_ms: u64,
    },

    /// Periodic counters
    Stats {
        protocol: Protocol,
        linked: usize,
        stats: ReflectorStats,
    },
}

impl ReflectorEvent {
    /// Protocol of the engine that emitted this event
    pub fn protocol(&self) -> Protocol {
        match self {
            ReflectorEvent::SessionLinked { protocol, .. }
            | ReflectorEvent::SessionUnlinked { protocol, .. }
            | ReflectorEvent::TransmissionStarted { protocol, .. }
            | ReflectorEvent::TransmissionEnded { protocol, .. }
            | ReflectorEvent::Stats { protocol, .. } => *protocol,
        }
    }

    /// Client address, if this event concerns one client
    pub fn address(&self) -> Option<SocketAddr> {
        match self {
            ReflectorEvent::SessionLinked { address, .. }
            | ReflectorEvent::SessionUnlinked { address, .. }
            | ReflectorEvent::TransmissionStarted { address, .. }
            | ReflectorEvent::TransmissionEnded { address, .. } => Some(*address),
            ReflectorEvent::Stats { .. } => None,
        }
    }

    /// Check if this is a session lifecycle event
    pub fn is_session_lifecycle(&self) -> bool {
        matches!(
            self,
            ReflectorEvent::SessionLinked { .. } | ReflectorEvent::SessionUnlinked { .. }
        )
    }

    /// Check if this is a transmission event
    pub fn is_transmission(&self) -> bool {
        matches!(
            self,
            ReflectorEvent::TransmissionStarted { .. } | ReflectorEvent::TransmissionEnded { .. }
        )
    }
}
