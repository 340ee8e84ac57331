//! Digital Voice Reflector Protocol Library
//!
//! This crate provides parsing and encoding for the UDP link protocols spoken
//! between MMDVM gateways/hotspots and a reflector:
//!
//! - **P25**: single-byte record tags (`0xF0` poll, `0x62..=0x73` LDU records, `0x80` terminator)
//! - **YSF**: four-byte ASCII tags (`YSFP`, `YSFU`, `YSFD`, `YSFS`)
//! - **NXDN**: five-byte ASCII tags (`NXDNP`, `NXDNU`, `NXDND`) scoped to one talk group
//! - **M17**: four-byte ASCII tags (`CONN`, `PING`/`PONG`, `DISC`, `M17 `) with base-40 callsigns
//!
//! # Architecture
//!
//! Each protocol module provides:
//! - A typed frame enum that parses one datagram and encodes back to bytes
//! - Conversion to the normalized [`Frame`] the reflector engine works with
//! - A [`FrameCodec`] implementation carrying the reflector-side options
//!   (reflector callsign, talk group, module) needed to answer clients
//!
//! The reflector never interprets voice payloads. It only needs to know
//! whether a datagram is a link, keepalive, unlink or voice frame, who sent
//! it, and whether it ends a transmission.
//!
//! # Example
//!
//! ```rust
//! use dv_protocol::{Frame, FrameCodec};
//! use dv_protocol::ysf::YsfCodec;
//!
//! let codec = YsfCodec::new("PARROT", "Test reflector");
//! let frame = codec.decode(b"YSFPKO4UYJ    ").unwrap();
//!
//! assert!(frame.is_login());
//! assert_eq!(frame.identity(), Some("KO4UYJ"));
//! ```

pub mod callsign;
pub mod error;
pub mod frame;
pub mod m17;
pub mod nxdn;
pub mod p25;
pub mod ysf;

pub use error::ParseError;
pub use frame::{Frame, StationId, VoiceHeader};

/// Identifies which digital voice network a reflector instance serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Protocol {
    /// APCO Project 25 (P25Gateway network)
    P25,
    /// Yaesu System Fusion
    Ysf,
    /// NXDN (Kenwood/Icom digital)
    Nxdn,
    /// M17 open digital voice
    M17,
}

impl Protocol {
    /// All supported protocols, in display order
    pub const ALL: [Protocol; 4] = [Protocol::P25, Protocol::Ysf, Protocol::Nxdn, Protocol::M17];

    /// Returns a human-readable name for the protocol
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::P25 => "P25",
            Protocol::Ysf => "YSF",
            Protocol::Nxdn => "NXDN",
            Protocol::M17 => "M17",
        }
    }

    /// Well-known UDP port used by reflectors of this protocol
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::P25 => 41000,
            Protocol::Ysf => 42000,
            Protocol::Nxdn => 41400,
            Protocol::M17 => 17000,
        }
    }

    /// Parse a protocol from its lowercase or display name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How many exchanges a client needs before it counts as linked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// The login frame alone links the client (poll-based protocols)
    SingleRoundTrip,
    /// The login is acknowledged, and the client's next datagram confirms it
    Confirmed,
}

/// Convert a protocol-specific frame into the normalized [`Frame`]
///
/// Returns `None` for frames that only a reflector sends (acknowledgements,
/// pings, status replies) and that are therefore meaningless when received.
pub trait ToReflectorFrame {
    /// Normalize this frame
    fn to_reflector_frame(&self) -> Option<Frame>;
}

/// Trait for frames that can be encoded to bytes
pub trait EncodeFrame {
    /// Encode this frame to its wire format
    fn encode(&self) -> Vec<u8>;
}

/// Object-safe codec used by the reflector engine
///
/// One implementation exists per protocol. Besides decoding inbound
/// datagrams it produces the few control frames a reflector sends on its
/// own behalf. Encoders return `None` when the protocol has no such frame.
pub trait FrameCodec: Send + Sync {
    /// The protocol this codec speaks
    fn protocol(&self) -> Protocol;

    /// Handshake style for new clients
    fn handshake(&self) -> Handshake {
        Handshake::SingleRoundTrip
    }

    /// Decode one datagram
    fn decode(&self, data: &[u8]) -> Result<Frame, ParseError>;

    /// Reply sent to a client whose login or poll was accepted
    fn encode_link_ack(&self) -> Option<Vec<u8>>;

    /// Reply sent to a client that unlinked itself
    fn encode_unlink_ack(&self) -> Option<Vec<u8>> {
        None
    }

    /// Keepalive the reflector sends to every client periodically
    fn encode_keepalive(&self) -> Option<Vec<u8>> {
        None
    }

    /// Notification sent to a client that is being disconnected by the reflector
    fn encode_disconnect(&self) -> Option<Vec<u8>> {
        None
    }

    /// Reply to a status query, given the number of linked clients
    fn encode_status(&self, _linked: usize) -> Option<Vec<u8>> {
        None
    }
}

/// Reflector-side options the codecs need to build replies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecOptions {
    /// Callsign the reflector announces (P25 poll replies, NXDN polls, M17 pings)
    pub callsign: String,
    /// YSF reflector name (status replies)
    pub name: String,
    /// YSF reflector description (status replies)
    pub description: String,
    /// NXDN talk group served by the reflector
    pub talk_group: u16,
    /// M17 module served by the reflector
    pub module: char,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            callsign: "REFLECTOR".to_string(),
            name: "REFLECTOR".to_string(),
            description: "MMDVM Reflector".to_string(),
            talk_group: 10200,
            module: 'A',
        }
    }
}

/// Create a codec for the given protocol
pub fn create_frame_codec(protocol: Protocol, options: &CodecOptions) -> Box<dyn FrameCodec> {
    match protocol {
        Protocol::P25 => Box::new(p25::P25Codec::new(&options.callsign)),
        Protocol::Ysf => Box::new(ysf::YsfCodec::new(&options.name, &options.description)),
        Protocol::Nxdn => Box::new(nxdn::NxdnCodec::new(&options.callsign, options.talk_group)),
        Protocol::M17 => Box::new(m17::M17Codec::new(&options.callsign, options.module)),
    }
}
