//! YSF Reflector Network Protocol
//!
//! YSF gateways link to a reflector with a periodic poll and exchange System
//! Fusion frames wrapped in a 35-byte network header.
//!
//! # Frame Format
//! ```text
//! YSFP [callsign x10]                              poll (14 bytes)
//! YSFU [callsign x10]                              unlink (14 bytes)
//! YSFD [gateway x10][source x10][dest x10][ctr] [payload x120]   data (155 bytes)
//! YSFS                                             status query (4 bytes)
//! YSFS [id x5][name x16][description x14][count x3]   status reply (42 bytes)
//! ```
//!
//! Bit 0 of the counter byte marks the last frame of a transmission; bits 1..7
//! carry the frame counter.

use crate::callsign::{pad_callsign, parse_callsign, parse_callsign_lossy};
use crate::error::ParseError;
use crate::frame::{Frame, StationId, VoiceHeader};
use crate::{EncodeFrame, FrameCodec, Protocol, ToReflectorFrame};

/// Poll tag
pub const POLL_TAG: &[u8; 4] = b"YSFP";
/// Unlink tag
pub const UNLINK_TAG: &[u8; 4] = b"YSFU";
/// Data tag
pub const DATA_TAG: &[u8; 4] = b"YSFD";
/// Status tag
pub const STATUS_TAG: &[u8; 4] = b"YSFS";

/// Width of callsign fields
pub const CALLSIGN_LEN: usize = 10;
/// Length of poll and unlink frames
pub const LINK_FRAME_LEN: usize = 4 + CALLSIGN_LEN;
/// Length of data frames
pub const DATA_FRAME_LEN: usize = 155;
/// Length of the network header in data frames
pub const DATA_HEADER_LEN: usize = 35;
/// Length of the payload in data frames
pub const PAYLOAD_LEN: usize = DATA_FRAME_LEN - DATA_HEADER_LEN;
/// Length of a status reply
pub const STATUS_REPLY_LEN: usize = 42;
/// Callsign the reflector answers polls with
pub const REFLECTOR_CALLSIGN: &str = "REFLECTOR";

const NAME_LEN: usize = 16;
const DESCRIPTION_LEN: usize = 14;

/// YSF data frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YsfData {
    /// Gateway that forwarded the frame
    pub gateway: Option<String>,
    /// Originating station
    pub source: Option<String>,
    /// Destination
    pub destination: Option<String>,
    /// Frame counter (7 bits)
    pub frame_counter: u8,
    /// Last frame of the transmission
    pub end_of_transmission: bool,
    /// Fusion payload (FICH + data), relayed untouched
    pub payload: Vec<u8>,
}

/// Parsed YSF network frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YsfFrame {
    /// Poll from a gateway, or the reflector's poll reply
    Poll { callsign: String },
    /// Gateway leaving the reflector
    Unlink { callsign: String },
    /// Voice/data frame
    Data(YsfData),
    /// Status query from the YSF registry
    StatusRequest,
    /// Status reply from the reflector
    Status {
        id: u32,
        name: String,
        description: String,
        count: usize,
    },
}

fn check_len(frame: &'static str, data: &[u8], expected: usize) -> Result<(), ParseError> {
    if data.len() == expected {
        Ok(())
    } else {
        Err(ParseError::InvalidLength {
            frame,
            expected,
            actual: data.len(),
        })
    }
}

impl YsfFrame {
    /// Parse one datagram
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.is_empty() {
            return Err(ParseError::Empty);
        }
        if data.len() < 4 {
            return Err(ParseError::UnknownFrame(format!("YSF {:02X?}", data)));
        }

        match &data[..4] {
            tag if tag == POLL_TAG => {
                check_len("YSF poll", data, LINK_FRAME_LEN)?;
                Ok(YsfFrame::Poll {
                    callsign: parse_callsign(&data[4..])?,
                })
            }
            tag if tag == UNLINK_TAG => {
                check_len("YSF unlink", data, LINK_FRAME_LEN)?;
                Ok(YsfFrame::Unlink {
                    callsign: parse_callsign(&data[4..])?,
                })
            }
            tag if tag == DATA_TAG => {
                check_len("YSF data", data, DATA_FRAME_LEN)?;
                Ok(YsfFrame::Data(YsfData {
                    gateway: parse_callsign_lossy(&data[4..14]),
                    source: parse_callsign_lossy(&data[14..24]),
                    destination: parse_callsign_lossy(&data[24..34]),
                    frame_counter: data[34] >> 1,
                    end_of_transmission: data[34] & 0x01 == 0x01,
                    payload: data[DATA_HEADER_LEN..].to_vec(),
                }))
            }
            tag if tag == STATUS_TAG => match data.len() {
                4 => Ok(YsfFrame::StatusRequest),
                STATUS_REPLY_LEN => Self::parse_status(data),
                actual => Err(ParseError::InvalidLength {
                    frame: "YSF status",
                    expected: 4,
                    actual,
                }),
            },
            _ => Err(ParseError::UnknownFrame(
                String::from_utf8_lossy(&data[..4]).into_owned(),
            )),
        }
    }

    fn parse_status(data: &[u8]) -> Result<Self, ParseError> {
        let text = std::str::from_utf8(&data[4..])
            .ok()
            .filter(|t| t.is_ascii())
            .ok_or_else(|| ParseError::UnknownFrame("YSF status reply".into()))?;
        let id = text[..5]
            .parse()
            .map_err(|_| ParseError::UnknownFrame("YSF status id".into()))?;
        let count = text[35..38]
            .parse()
            .map_err(|_| ParseError::UnknownFrame("YSF status count".into()))?;
        Ok(YsfFrame::Status {
            id,
            name: text[5..21].trim_end().to_string(),
            description: text[21..35].trim_end().to_string(),
            count,
        })
    }
}

impl ToReflectorFrame for YsfFrame {
    fn to_reflector_frame(&self) -> Option<Frame> {
        match self {
            YsfFrame::Poll { callsign } => Some(Frame::Link {
                identity: callsign.clone(),
            }),
            YsfFrame::Unlink { callsign } => Some(Frame::Unlink {
                identity: Some(callsign.clone()),
            }),
            YsfFrame::Data(data) => Some(Frame::Voice(VoiceHeader {
                source: data.source.clone().map(StationId::Callsign),
                destination: data.destination.clone().map(StationId::Callsign),
                stream_id: None,
                sequence: Some(u16::from(data.frame_counter)),
                end_of_transmission: data.end_of_transmission,
            })),
            YsfFrame::StatusRequest => Some(Frame::StatusRequest),
            YsfFrame::Status { .. } => None,
        }
    }
}

impl EncodeFrame for YsfFrame {
    fn encode(&self) -> Vec<u8> {
        match self {
            YsfFrame::Poll { callsign } => {
                [&POLL_TAG[..], &pad_callsign(callsign, CALLSIGN_LEN)[..]].concat()
            }
            YsfFrame::Unlink { callsign } => {
                [&UNLINK_TAG[..], &pad_callsign(callsign, CALLSIGN_LEN)[..]].concat()
            }
            YsfFrame::Data(data) => {
                let mut out = Vec::with_capacity(DATA_FRAME_LEN);
                out.extend_from_slice(DATA_TAG);
                for field in [&data.gateway, &data.source, &data.destination] {
                    out.extend_from_slice(&pad_callsign(
                        field.as_deref().unwrap_or(""),
                        CALLSIGN_LEN,
                    ));
                }
                out.push((data.frame_counter << 1) | u8::from(data.end_of_transmission));
                let mut payload = data.payload.clone();
                payload.resize(PAYLOAD_LEN, 0);
                out.extend_from_slice(&payload);
                out
            }
            YsfFrame::StatusRequest => STATUS_TAG.to_vec(),
            YsfFrame::Status {
                id,
                name,
                description,
                count,
            } => {
                let mut out = Vec::with_capacity(STATUS_REPLY_LEN);
                out.extend_from_slice(STATUS_TAG);
                out.extend_from_slice(format!("{:05}", id % 100_000).as_bytes());
                out.extend_from_slice(&pad_callsign(name, NAME_LEN));
                out.extend_from_slice(&pad_callsign(description, DESCRIPTION_LEN));
                out.extend_from_slice(format!("{:03}", (*count).min(999)).as_bytes());
                out
            }
        }
    }
}

/// Reflector id the YSF registry derives from the reflector name
///
/// Jenkins one-at-a-time hash of the name, reduced to five decimal digits.
pub fn reflector_id(name: &str) -> u32 {
    let mut hash: u32 = 0;
    for b in name.bytes() {
        hash = hash.wrapping_add(u32::from(b));
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash = hash.wrapping_add(hash << 15);
    hash % 100_000
}

/// YSF reflector codec
#[derive(Debug, Clone)]
pub struct YsfCodec {
    id: u32,
    name: String,
    description: String,
}

impl YsfCodec {
    /// Create a codec for a reflector with the given registry name and description
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            id: reflector_id(name),
            name: name.to_string(),
            description: description.to_string(),
        }
    }

    /// Registry id of this reflector
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl FrameCodec for YsfCodec {
    fn protocol(&self) -> Protocol {
        Protocol::Ysf
    }

    fn decode(&self, data: &[u8]) -> Result<Frame, ParseError> {
        YsfFrame::parse(data)?
            .to_reflector_frame()
            .ok_or(ParseError::UnexpectedFrame("YSF status reply"))
    }

    fn encode_link_ack(&self) -> Option<Vec<u8>> {
        Some(
            YsfFrame::Poll {
                callsign: REFLECTOR_CALLSIGN.to_string(),
            }
            .encode(),
        )
    }

    fn encode_status(&self, linked: usize) -> Option<Vec<u8>> {
        Some(
            YsfFrame::Status {
                id: self.id,
                name: self.name.clone(),
                description: self.description.clone(),
                count: linked,
            }
            .encode(),
        )
    }
}
