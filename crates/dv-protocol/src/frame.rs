//! Normalized frame representation
//!
//! This module provides the [`Frame`] enum, the common intermediate
//! representation the reflector engine uses for datagrams of every protocol.

use std::fmt;

/// A station address as carried in a voice header
///
/// P25 and NXDN address stations by numeric radio id, YSF and M17 by callsign.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum StationId {
    /// Numeric radio or talk group id
    Numeric(u32),
    /// Callsign
    Callsign(String),
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationId::Numeric(id) => write!(f, "{id}"),
            StationId::Callsign(call) => f.write_str(call),
        }
    }
}

/// Header fields of a voice frame that the reflector looks at
///
/// Everything else in the datagram is opaque payload and is relayed as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceHeader {
    /// Originating station, when this frame carries it
    pub source: Option<StationId>,
    /// Destination station or talk group, when this frame carries it
    pub destination: Option<StationId>,
    /// Stream identifier (M17)
    pub stream_id: Option<u16>,
    /// Frame sequence marker (record tag, frame counter or frame number)
    pub sequence: Option<u16>,
    /// Whether this frame ends the transmission
    pub end_of_transmission: bool,
}

/// Normalized reflector frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Login, link or poll carrying the station identity
    ///
    /// Poll-based protocols repeat this frame as their keepalive.
    Link { identity: String },

    /// Keepalive answer from an already linked client
    Keepalive { identity: Option<String> },

    /// Client is leaving
    Unlink { identity: Option<String> },

    /// Voice or voice-header frame to be relayed
    Voice(VoiceHeader),

    /// Reflector status query (YSF registry)
    StatusRequest,
}

impl Frame {
    /// Whether this frame is relayed to other clients
    pub fn is_voice(&self) -> bool {
        matches!(self, Frame::Voice(_))
    }

    /// Whether this voice frame ends a transmission
    pub fn is_end_of_transmission(&self) -> bool {
        matches!(self, Frame::Voice(header) if header.end_of_transmission)
    }

    /// Whether this frame is a login/link attempt
    pub fn is_login(&self) -> bool {
        matches!(self, Frame::Link { .. })
    }

    /// Station identity carried by a control frame
    pub fn identity(&self) -> Option<&str> {
        match self {
            Frame::Link { identity } => Some(identity),
            Frame::Keepalive { identity } | Frame::Unlink { identity } => identity.as_deref(),
            Frame::Voice(_) | Frame::StatusRequest => None,
        }
    }

    /// Voice header, if this is a voice frame
    #[cfg(test)]
    pub(crate) fn voice_header(&self) -> Option<&VoiceHeader> {
        match self {
            Frame::Voice(header) => Some(header),
            _ => None,
        }
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Link { .. } => "link",
            Frame::Keepalive { .. } => "keepalive",
            Frame::Unlink { .. } => "unlink",
            Frame::Voice(h) if h.end_of_transmission => "end-of-transmission",
            Frame::Voice(_) => "voice",
            Frame::StatusRequest => "status",
        }
    }
}
