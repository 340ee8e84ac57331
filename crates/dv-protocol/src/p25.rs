//! P25 Reflector Network Protocol
//!
//! P25 gateways exchange IMBE voice as a stream of network records, one record
//! per datagram. The first byte of every datagram is its record tag.
//!
//! # Frame Format
//! ```text
//! F0 [callsign x10]          poll (login and keepalive)
//! F1 [callsign x10]          unlink
//! 62..6A [record]            LDU1 voice records
//! 6B..73 [record]            LDU2 voice records
//! 80 [00 x16]                terminator (end of transmission)
//! ```
//!
//! Record `0x65` carries the destination talk group and record `0x66` the
//! source radio id, both as 24-bit big-endian values in bytes 1..4.

use crate::callsign::{pad_callsign, parse_callsign};
use crate::error::ParseError;
use crate::frame::{Frame, StationId, VoiceHeader};
use crate::{EncodeFrame, FrameCodec, Protocol, ToReflectorFrame};

/// Poll record tag
pub const POLL: u8 = 0xF0;
/// Unlink record tag
pub const UNLINK: u8 = 0xF1;
/// Terminator record tag
pub const TERMINATOR: u8 = 0x80;
/// Record carrying the destination talk group
pub const TALK_GROUP_RECORD: u8 = 0x65;
/// Record carrying the source radio id
pub const SOURCE_RECORD: u8 = 0x66;

/// Width of the callsign field in poll/unlink records
pub const CALLSIGN_LEN: usize = 10;
/// Length of poll and unlink records
pub const LINK_FRAME_LEN: usize = 1 + CALLSIGN_LEN;
/// Length of the terminator record
pub const TERMINATOR_LEN: usize = 17;

/// LDU1 record tags, in transmission order
pub const LDU1_RECORDS: [u8; 9] = [0x62, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69, 0x6A];
/// LDU2 record tags, in transmission order
pub const LDU2_RECORDS: [u8; 9] = [0x6B, 0x6C, 0x6D, 0x6E, 0x6F, 0x70, 0x71, 0x72, 0x73];

/// Length of a voice record (including its tag), or `None` for unknown tags
pub fn record_len(tag: u8) -> Option<usize> {
    match tag {
        0x62 | 0x6B => Some(22),
        0x63 | 0x6C => Some(14),
        0x64..=0x66 | 0x6D..=0x6F => Some(17),
        0x67..=0x6A | 0x70..=0x73 => Some(16),
        TERMINATOR => Some(TERMINATOR_LEN),
        _ => None,
    }
}

/// Parsed P25 network record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum P25Frame {
    /// Poll from a gateway, or the reflector's poll reply
    Poll { callsign: String },
    /// Gateway leaving the reflector
    Unlink { callsign: String },
    /// LDU1/LDU2 voice record, kept verbatim
    Voice { data: Vec<u8> },
    /// End of transmission
    Terminator { data: Vec<u8> },
}

impl P25Frame {
    /// Parse one datagram
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let tag = *data.first().ok_or(ParseError::Empty)?;
        match tag {
            POLL | UNLINK => {
                if data.len() != LINK_FRAME_LEN {
                    return Err(ParseError::InvalidLength {
                        frame: if tag == POLL { "P25 poll" } else { "P25 unlink" },
                        expected: LINK_FRAME_LEN,
                        actual: data.len(),
                    });
                }
                let callsign = parse_callsign(&data[1..])?;
                Ok(if tag == POLL {
                    P25Frame::Poll { callsign }
                } else {
                    P25Frame::Unlink { callsign }
                })
            }
            _ => {
                let expected = record_len(tag)
                    .ok_or_else(|| ParseError::UnknownFrame(format!("P25 record 0x{tag:02X}")))?;
                if data.len() != expected {
                    return Err(ParseError::InvalidLength {
                        frame: "P25 record",
                        expected,
                        actual: data.len(),
                    });
                }
                if tag == TERMINATOR {
                    Ok(P25Frame::Terminator {
                        data: data.to_vec(),
                    })
                } else {
                    Ok(P25Frame::Voice {
                        data: data.to_vec(),
                    })
                }
            }
        }
    }

    /// Build a voice record with zeroed voice bits
    ///
    /// `source` is written into record `0x66` and `talk_group` into `0x65`;
    /// other records ignore them.
    pub fn voice_record(tag: u8, source: u32, talk_group: u32) -> Result<Self, ParseError> {
        let len = record_len(tag)
            .filter(|_| tag != TERMINATOR)
            .ok_or_else(|| ParseError::UnknownFrame(format!("P25 record 0x{tag:02X}")))?;
        let mut data = vec![0u8; len];
        data[0] = tag;
        match tag {
            TALK_GROUP_RECORD => data[1..4].copy_from_slice(&talk_group.to_be_bytes()[1..]),
            SOURCE_RECORD => data[1..4].copy_from_slice(&source.to_be_bytes()[1..]),
            _ => {}
        }
        Ok(P25Frame::Voice { data })
    }

    /// Build a terminator record
    pub fn terminator() -> Self {
        let mut data = vec![0u8; TERMINATOR_LEN];
        data[0] = TERMINATOR;
        P25Frame::Terminator { data }
    }

    /// Record tag of this frame
    pub fn tag(&self) -> u8 {
        match self {
            P25Frame::Poll { .. } => POLL,
            P25Frame::Unlink { .. } => UNLINK,
            P25Frame::Voice { data } => data.first().copied().unwrap_or(TERMINATOR),
            P25Frame::Terminator { .. } => TERMINATOR,
        }
    }
}

fn read_u24(bytes: &[u8]) -> u32 {
    (u32::from(bytes[0]) << 16) | (u32::from(bytes[1]) << 8) | u32::from(bytes[2])
}

impl ToReflectorFrame for P25Frame {
    fn to_reflector_frame(&self) -> Option<Frame> {
        let frame = match self {
            P25Frame::Poll { callsign } => Frame::Link {
                identity: callsign.clone(),
            },
            P25Frame::Unlink { callsign } => Frame::Unlink {
                identity: Some(callsign.clone()),
            },
            P25Frame::Voice { data } => {
                let tag = self.tag();
                let id = data.get(1..4).map(|bytes| StationId::Numeric(read_u24(bytes)));
                Frame::Voice(VoiceHeader {
                    source: id.clone().filter(|_| tag == SOURCE_RECORD),
                    destination: id.filter(|_| tag == TALK_GROUP_RECORD),
                    stream_id: None,
                    sequence: Some(u16::from(tag)),
                    end_of_transmission: false,
                })
            }
            P25Frame::Terminator { .. } => Frame::Voice(VoiceHeader {
                sequence: Some(u16::from(TERMINATOR)),
                end_of_transmission: true,
                ..Default::default()
            }),
        };
        Some(frame)
    }
}

impl EncodeFrame for P25Frame {
    fn encode(&self) -> Vec<u8> {
        match self {
            P25Frame::Poll { callsign } | P25Frame::Unlink { callsign } => {
                let mut out = Vec::with_capacity(LINK_FRAME_LEN);
                out.push(self.tag());
                out.extend_from_slice(&pad_callsign(callsign, CALLSIGN_LEN));
                out
            }
            P25Frame::Voice { data } | P25Frame::Terminator { data } => data.clone(),
        }
    }
}

/// P25 reflector codec
#[derive(Debug, Clone)]
pub struct P25Codec {
    callsign: String,
}

impl P25Codec {
    /// Create a codec that answers polls with the given reflector callsign
    pub fn new(callsign: &str) -> Self {
        Self {
            callsign: callsign.to_string(),
        }
    }
}

impl FrameCodec for P25Codec {
    fn protocol(&self) -> Protocol {
        Protocol::P25
    }

    fn decode(&self, data: &[u8]) -> Result<Frame, ParseError> {
        P25Frame::parse(data)?
            .to_reflector_frame()
            .ok_or(ParseError::UnexpectedFrame("P25"))
    }

    fn encode_link_ack(&self) -> Option<Vec<u8>> {
        Some(
            P25Frame::Poll {
                callsign: self.callsign.clone(),
            }
            .encode(),
        )
    }
}
