//! NXDN Reflector Network Protocol
//!
//! An NXDN reflector serves exactly one talk group. Gateways poll with their
//! callsign and the talk group they want; voice frames carry 16-bit source
//! and destination ids.
//!
//! # Frame Format
//! ```text
//! NXDNP [callsign x10][tg hi][tg lo]                       poll (17 bytes)
//! NXDNU [callsign x10][tg hi][tg lo]                       unlink (17 bytes)
//! NXDND [src x2][dst x2][flags] [payload x33]              data (43 bytes)
//! ```
//!
//! Flag `0x01` marks a group call, flag `0x08` the last frame of a transmission.

use crate::callsign::{pad_callsign, parse_callsign};
use crate::error::ParseError;
use crate::frame::{Frame, StationId, VoiceHeader};
use crate::{EncodeFrame, FrameCodec, Protocol, ToReflectorFrame};

/// Poll tag
pub const POLL_TAG: &[u8; 5] = b"NXDNP";
/// Unlink tag
pub const UNLINK_TAG: &[u8; 5] = b"NXDNU";
/// Data tag
pub const DATA_TAG: &[u8; 5] = b"NXDND";

/// Width of the callsign field
pub const CALLSIGN_LEN: usize = 10;
/// Length of poll and unlink frames
pub const LINK_FRAME_LEN: usize = 5 + CALLSIGN_LEN + 2;
/// Length of data frames
pub const DATA_FRAME_LEN: usize = 43;
/// Length of the payload in data frames
pub const PAYLOAD_LEN: usize = 33;

/// Group call flag
pub const FLAG_GROUP: u8 = 0x01;
/// End of transmission flag
pub const FLAG_END: u8 = 0x08;

/// NXDN data frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NxdnData {
    /// Source radio id
    pub source: u16,
    /// Destination talk group or radio id
    pub destination: u16,
    /// Group call (destination is a talk group)
    pub group: bool,
    /// Last frame of the transmission
    pub end_of_transmission: bool,
    /// Raw flag byte, preserved for encoding
    pub flags: u8,
    /// NXDN frame payload, relayed untouched
    pub payload: Vec<u8>,
}

impl NxdnData {
    /// Build a group call frame to a talk group
    pub fn group_call(source: u16, talk_group: u16, end_of_transmission: bool) -> Self {
        let mut flags = FLAG_GROUP;
        if end_of_transmission {
            flags |= FLAG_END;
        }
        Self {
            source,
            destination: talk_group,
            group: true,
            end_of_transmission,
            flags,
            payload: vec![0u8; PAYLOAD_LEN],
        }
    }
}

/// Parsed NXDN network frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NxdnFrame {
    /// Poll from a gateway, or the reflector's poll reply
    Poll { callsign: String, talk_group: u16 },
    /// Gateway leaving the reflector
    Unlink { callsign: String, talk_group: u16 },
    /// Voice/data frame
    Data(NxdnData),
}

impl NxdnFrame {
    /// Parse one datagram
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.is_empty() {
            return Err(ParseError::Empty);
        }
        if data.len() < 5 {
            return Err(ParseError::UnknownFrame(format!("NXDN {:02X?}", data)));
        }

        let tag = &data[..5];
        if tag == POLL_TAG || tag == UNLINK_TAG {
            if data.len() != LINK_FRAME_LEN {
                return Err(ParseError::InvalidLength {
                    frame: "NXDN poll/unlink",
                    expected: LINK_FRAME_LEN,
                    actual: data.len(),
                });
            }
            let callsign = parse_callsign(&data[5..15])?;
            let talk_group = u16::from_be_bytes([data[15], data[16]]);
            return Ok(if tag == POLL_TAG {
                NxdnFrame::Poll {
                    callsign,
                    talk_group,
                }
            } else {
                NxdnFrame::Unlink {
                    callsign,
                    talk_group,
                }
            });
        }

        if tag == DATA_TAG {
            if data.len() != DATA_FRAME_LEN {
                return Err(ParseError::InvalidLength {
                    frame: "NXDN data",
                    expected: DATA_FRAME_LEN,
                    actual: data.len(),
                });
            }
            let flags = data[9];
            return Ok(NxdnFrame::Data(NxdnData {
                source: u16::from_be_bytes([data[5], data[6]]),
                destination: u16::from_be_bytes([data[7], data[8]]),
                group: flags & FLAG_GROUP == FLAG_GROUP,
                end_of_transmission: flags & FLAG_END == FLAG_END,
                flags,
                payload: data[10..].to_vec(),
            }));
        }

        Err(ParseError::UnknownFrame(
            String::from_utf8_lossy(tag).into_owned(),
        ))
    }
}

impl ToReflectorFrame for NxdnFrame {
    fn to_reflector_frame(&self) -> Option<Frame> {
        let frame = match self {
            NxdnFrame::Poll { callsign, .. } => Frame::Link {
                identity: callsign.clone(),
            },
            NxdnFrame::Unlink { callsign, .. } => Frame::Unlink {
                identity: Some(callsign.clone()),
            },
            NxdnFrame::Data(data) => Frame::Voice(VoiceHeader {
                source: Some(StationId::Numeric(u32::from(data.source))),
                destination: Some(StationId::Numeric(u32::from(data.destination))),
                stream_id: None,
                sequence: None,
                end_of_transmission: data.end_of_transmission,
            }),
        };
        Some(frame)
    }
}

impl EncodeFrame for NxdnFrame {
    fn encode(&self) -> Vec<u8> {
        match self {
            NxdnFrame::Poll {
                callsign,
                talk_group,
            }
            | NxdnFrame::Unlink {
                callsign,
                talk_group,
            } => {
                let tag = if matches!(self, NxdnFrame::Poll { .. }) {
                    POLL_TAG
                } else {
                    UNLINK_TAG
                };
                let mut out = Vec::with_capacity(LINK_FRAME_LEN);
                out.extend_from_slice(tag);
                out.extend_from_slice(&pad_callsign(callsign, CALLSIGN_LEN));
                out.extend_from_slice(&talk_group.to_be_bytes());
                out
            }
            NxdnFrame::Data(data) => {
                let mut flags = data.flags & !(FLAG_GROUP | FLAG_END);
                if data.group {
                    flags |= FLAG_GROUP;
                }
                if data.end_of_transmission {
                    flags |= FLAG_END;
                }
                let mut out = Vec::with_capacity(DATA_FRAME_LEN);
                out.extend_from_slice(DATA_TAG);
                out.extend_from_slice(&data.source.to_be_bytes());
                out.extend_from_slice(&data.destination.to_be_bytes());
                out.push(flags);
                let mut payload = data.payload.clone();
                payload.resize(PAYLOAD_LEN, 0);
                out.extend_from_slice(&payload);
                out
            }
        }
    }
}

/// NXDN reflector codec, bound to one talk group
#[derive(Debug, Clone)]
pub struct NxdnCodec {
    callsign: String,
    talk_group: u16,
}

impl NxdnCodec {
    /// Create a codec for the given reflector callsign and talk group
    pub fn new(callsign: &str, talk_group: u16) -> Self {
        Self {
            callsign: callsign.to_string(),
            talk_group,
        }
    }

    /// Talk group served by this reflector
    pub fn talk_group(&self) -> u16 {
        self.talk_group
    }

    fn check_talk_group(&self, actual: u16) -> Result<(), ParseError> {
        if actual == self.talk_group {
            Ok(())
        } else {
            Err(ParseError::ForeignTalkGroup {
                expected: self.talk_group,
                actual,
            })
        }
    }
}

impl FrameCodec for NxdnCodec {
    fn protocol(&self) -> Protocol {
        Protocol::Nxdn
    }

    fn decode(&self, data: &[u8]) -> Result<Frame, ParseError> {
        let frame = NxdnFrame::parse(data)?;
        match &frame {
            NxdnFrame::Poll { talk_group, .. } => self.check_talk_group(*talk_group)?,
            NxdnFrame::Data(d) if d.group => self.check_talk_group(d.destination)?,
            // Unlinks are honoured whatever talk group they name
            NxdnFrame::Unlink { .. } | NxdnFrame::Data(_) => {}
        }
        frame
            .to_reflector_frame()
            .ok_or(ParseError::UnexpectedFrame("NXDN"))
    }

    fn encode_link_ack(&self) -> Option<Vec<u8>> {
        Some(
            NxdnFrame::Poll {
                callsign: self.callsign.clone(),
                talk_group: self.talk_group,
            }
            .encode(),
        )
    }
}
