//! M17 Reflector Network Protocol
//!
//! M17 clients connect to one module of a reflector and must confirm the link
//! by answering the reflector's pings. Callsigns travel base-40 encoded.
//!
//! # Frame Format
//! ```text
//! CONN [callsign x6][module]                        connect (11 bytes)
//! ACKN / NACK                                       connect reply (4 bytes)
//! PING [callsign x6]                                reflector keepalive (10 bytes)
//! PONG [callsign x6]                                client keepalive (10 bytes)
//! DISC [callsign x6]                                client disconnect (10 bytes)
//! DISC                                              reflector disconnect (4 bytes)
//! M17  [sid x2][dst x6][src x6][type x2][meta x14][fn x2][payload x16][crc x2]
//!                                                   stream (54 bytes)
//! ```
//!
//! Bit 15 of the frame number marks the last frame of a stream. The CRC is
//! CRC-16/M17 over the first 52 bytes; streams that fail it are rejected.

use crc::{Crc, CRC_16_M17};

use crate::callsign::{decode_base40, encode_base40};
use crate::error::ParseError;
use crate::frame::{Frame, StationId, VoiceHeader};
use crate::{EncodeFrame, FrameCodec, Handshake, Protocol, ToReflectorFrame};

pub const CONNECT_TAG: &[u8; 4] = b"CONN";
pub const ACK_TAG: &[u8; 4] = b"ACKN";
pub const NACK_TAG: &[u8; 4] = b"NACK";
pub const PING_TAG: &[u8; 4] = b"PING";
pub const PONG_TAG: &[u8; 4] = b"PONG";
pub const DISCONNECT_TAG: &[u8; 4] = b"DISC";
pub const STREAM_TAG: &[u8; 4] = b"M17 ";

/// Length of a connect frame
pub const CONNECT_LEN: usize = 11;
/// Length of ping, pong and client disconnect frames
pub const CALLSIGN_FRAME_LEN: usize = 10;
/// Length of a bare tag frame (ACKN, NACK, reflector DISC)
pub const TAG_LEN: usize = 4;
/// Length of a stream frame
pub const STREAM_LEN: usize = 54;
/// Length of the stream payload
pub const PAYLOAD_LEN: usize = 16;
/// Length of the LSF meta field
pub const META_LEN: usize = 14;

/// Last-frame bit of the frame number
pub const LAST_FRAME: u16 = 0x8000;

const M17_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_M17);

/// CRC-16/M17 checksum
pub fn crc16(data: &[u8]) -> u16 {
    M17_CRC.checksum(data)
}

/// M17 stream frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct M17Stream {
    pub stream_id: u16,
    /// Destination callsign, `None` if it does not decode
    pub destination: Option<String>,
    /// Source callsign, `None` if it does not decode
    pub source: Option<String>,
    pub stream_type: u16,
    pub meta: [u8; META_LEN],
    /// Frame number without the last-frame bit
    pub frame_number: u16,
    pub last: bool,
    pub payload: [u8; PAYLOAD_LEN],
}

impl M17Stream {
    /// Build a stream frame with a zeroed payload
    pub fn new(stream_id: u16, source: &str, destination: &str, frame_number: u16, last: bool) -> Self {
        Self {
            stream_id,
            destination: Some(destination.to_string()),
            source: Some(source.to_string()),
            stream_type: 0x0005,
            meta: [0u8; META_LEN],
            frame_number: frame_number & !LAST_FRAME,
            last,
            payload: [0u8; PAYLOAD_LEN],
        }
    }
}

/// Parsed M17 network frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum M17Frame {
    Connect { callsign: String, module: char },
    Ack,
    Nack,
    Ping { callsign: String },
    Pong { callsign: String },
    /// Client disconnect carries a callsign, the reflector's reply does not
    Disconnect { callsign: Option<String> },
    Stream(M17Stream),
}

fn check_len(frame: &'static str, data: &[u8], expected: usize) -> Result<(), ParseError> {
    if data.len() != expected {
        return Err(ParseError::InvalidLength {
            frame,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

impl M17Frame {
    /// Parse one datagram
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.is_empty() {
            return Err(ParseError::Empty);
        }
        if data.len() < TAG_LEN {
            return Err(ParseError::UnknownFrame(format!("M17 {:02X?}", data)));
        }

        let tag = &data[..TAG_LEN];
        if tag == CONNECT_TAG {
            check_len("M17 connect", data, CONNECT_LEN)?;
            let callsign = decode_base40(&data[4..10])?;
            let module = char::from(data[10]).to_ascii_uppercase();
            return Ok(M17Frame::Connect { callsign, module });
        }
        if tag == ACK_TAG {
            check_len("M17 ack", data, TAG_LEN)?;
            return Ok(M17Frame::Ack);
        }
        if tag == NACK_TAG {
            check_len("M17 nack", data, TAG_LEN)?;
            return Ok(M17Frame::Nack);
        }
        if tag == PING_TAG || tag == PONG_TAG {
            check_len("M17 ping/pong", data, CALLSIGN_FRAME_LEN)?;
            let callsign = decode_base40(&data[4..10])?;
            return Ok(if tag == PING_TAG {
                M17Frame::Ping { callsign }
            } else {
                M17Frame::Pong { callsign }
            });
        }
        if tag == DISCONNECT_TAG {
            return match data.len() {
                TAG_LEN => Ok(M17Frame::Disconnect { callsign: None }),
                CALLSIGN_FRAME_LEN => Ok(M17Frame::Disconnect {
                    callsign: Some(decode_base40(&data[4..10])?),
                }),
                actual => Err(ParseError::InvalidLength {
                    frame: "M17 disconnect",
                    expected: CALLSIGN_FRAME_LEN,
                    actual,
                }),
            };
        }
        if tag == STREAM_TAG {
            check_len("M17 stream", data, STREAM_LEN)?;
            let crc = u16::from_be_bytes([data[52], data[53]]);
            let expected = crc16(&data[..52]);
            if crc != expected {
                tracing::debug!(
                    "M17 stream {:04X} failed CRC check",
                    u16::from_be_bytes([data[4], data[5]])
                );
                return Err(ParseError::BadChecksum {
                    frame: "M17 stream",
                    expected,
                    actual: crc,
                });
            }
            let raw_fn = u16::from_be_bytes([data[34], data[35]]);
            let mut meta = [0u8; META_LEN];
            meta.copy_from_slice(&data[20..34]);
            let mut payload = [0u8; PAYLOAD_LEN];
            payload.copy_from_slice(&data[36..52]);
            // Voice is relayed verbatim, so undecodable callsigns are not fatal
            return Ok(M17Frame::Stream(M17Stream {
                stream_id: u16::from_be_bytes([data[4], data[5]]),
                destination: decode_base40(&data[6..12]).ok(),
                source: decode_base40(&data[12..18]).ok(),
                stream_type: u16::from_be_bytes([data[18], data[19]]),
                meta,
                frame_number: raw_fn & !LAST_FRAME,
                last: raw_fn & LAST_FRAME == LAST_FRAME,
                payload,
            }));
        }

        Err(ParseError::UnknownFrame(
            String::from_utf8_lossy(tag).into_owned(),
        ))
    }
}

impl ToReflectorFrame for M17Frame {
    fn to_reflector_frame(&self) -> Option<Frame> {
        match self {
            M17Frame::Connect { callsign, .. } => Some(Frame::Link {
                identity: callsign.clone(),
            }),
            M17Frame::Pong { callsign } => Some(Frame::Keepalive {
                identity: Some(callsign.clone()),
            }),
            M17Frame::Disconnect { callsign } => Some(Frame::Unlink {
                identity: callsign.clone(),
            }),
            M17Frame::Stream(stream) => Some(Frame::Voice(VoiceHeader {
                source: stream.source.clone().map(StationId::Callsign),
                destination: stream.destination.clone().map(StationId::Callsign),
                stream_id: Some(stream.stream_id),
                sequence: Some(stream.frame_number),
                end_of_transmission: stream.last,
            })),
            M17Frame::Ack | M17Frame::Nack | M17Frame::Ping { .. } => None,
        }
    }
}

fn encode_callsign(callsign: &str) -> [u8; 6] {
    // Frames built here carry callsigns validated at construction; an
    // unencodable one goes out as all zeroes, which peers reject
    encode_base40(callsign).unwrap_or([0u8; 6])
}

impl EncodeFrame for M17Frame {
    fn encode(&self) -> Vec<u8> {
        match self {
            M17Frame::Connect { callsign, module } => {
                let mut out = Vec::with_capacity(CONNECT_LEN);
                out.extend_from_slice(CONNECT_TAG);
                out.extend_from_slice(&encode_callsign(callsign));
                out.push(u8::try_from(*module).unwrap_or(b'A'));
                out
            }
            M17Frame::Ack => ACK_TAG.to_vec(),
            M17Frame::Nack => NACK_TAG.to_vec(),
            M17Frame::Ping { callsign } | M17Frame::Pong { callsign } => {
                let tag = if matches!(self, M17Frame::Ping { .. }) {
                    PING_TAG
                } else {
                    PONG_TAG
                };
                let mut out = Vec::with_capacity(CALLSIGN_FRAME_LEN);
                out.extend_from_slice(tag);
                out.extend_from_slice(&encode_callsign(callsign));
                out
            }
            M17Frame::Disconnect { callsign: None } => DISCONNECT_TAG.to_vec(),
            M17Frame::Disconnect {
                callsign: Some(callsign),
            } => {
                let mut out = Vec::with_capacity(CALLSIGN_FRAME_LEN);
                out.extend_from_slice(DISCONNECT_TAG);
                out.extend_from_slice(&encode_callsign(callsign));
                out
            }
            M17Frame::Stream(stream) => {
                let mut out = Vec::with_capacity(STREAM_LEN);
                out.extend_from_slice(STREAM_TAG);
                out.extend_from_slice(&stream.stream_id.to_be_bytes());
                out.extend_from_slice(&encode_callsign(
                    stream.destination.as_deref().unwrap_or_default(),
                ));
                out.extend_from_slice(&encode_callsign(stream.source.as_deref().unwrap_or_default()));
                out.extend_from_slice(&stream.stream_type.to_be_bytes());
                out.extend_from_slice(&stream.meta);
                let mut fn_word = stream.frame_number & !LAST_FRAME;
                if stream.last {
                    fn_word |= LAST_FRAME;
                }
                out.extend_from_slice(&fn_word.to_be_bytes());
                out.extend_from_slice(&stream.payload);
                let crc = crc16(&out);
                out.extend_from_slice(&crc.to_be_bytes());
                out
            }
        }
    }
}

/// M17 reflector codec, serving a single module
#[derive(Debug, Clone)]
pub struct M17Codec {
    callsign: String,
    module: char,
    ping: Option<Vec<u8>>,
}

impl M17Codec {
    /// Create a codec for the given reflector callsign and module
    ///
    /// A callsign that cannot be base-40 encoded leaves the codec without a
    /// keepalive frame.
    pub fn new(callsign: &str, module: char) -> Self {
        let ping = encode_base40(callsign).ok().map(|encoded| {
            let mut out = Vec::with_capacity(CALLSIGN_FRAME_LEN);
            out.extend_from_slice(PING_TAG);
            out.extend_from_slice(&encoded);
            out
        });
        Self {
            callsign: callsign.to_string(),
            module: module.to_ascii_uppercase(),
            ping,
        }
    }

    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    pub fn module(&self) -> char {
        self.module
    }
}

impl FrameCodec for M17Codec {
    fn protocol(&self) -> Protocol {
        Protocol::M17
    }

    fn handshake(&self) -> Handshake {
        Handshake::Confirmed
    }

    fn decode(&self, data: &[u8]) -> Result<Frame, ParseError> {
        let frame = M17Frame::parse(data)?;
        if let M17Frame::Connect { module, .. } = &frame {
            if *module != self.module {
                return Err(ParseError::ForeignModule {
                    expected: self.module,
                    actual: *module,
                });
            }
        }
        frame
            .to_reflector_frame()
            .ok_or(ParseError::UnexpectedFrame("M17 reflector frame"))
    }

    fn encode_link_ack(&self) -> Option<Vec<u8>> {
        Some(M17Frame::Ack.encode())
    }

    fn encode_unlink_ack(&self) -> Option<Vec<u8>> {
        Some(M17Frame::Disconnect { callsign: None }.encode())
    }

    fn encode_keepalive(&self) -> Option<Vec<u8>> {
        self.ping.clone()
    }

    fn encode_disconnect(&self) -> Option<Vec<u8>> {
        Some(M17Frame::Disconnect { callsign: None }.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> M17Codec {
        M17Codec::new("M17-REF", 'C')
    }

    #[test]
    fn test_crc_check_value() {
        assert_eq!(crc16(b"123456789"), 0x772B);
    }

    #[test]
    fn test_connect_to_served_module() {
        let bytes = M17Frame::Connect {
            callsign: "KO4UYJ".into(),
            module: 'C',
        }
        .encode();
        assert_eq!(bytes.len(), CONNECT_LEN);
        assert_eq!(
            codec().decode(&bytes).unwrap(),
            Frame::Link {
                identity: "KO4UYJ".into()
            }
        );
    }

    #[test]
    fn test_connect_to_other_module_rejected() {
        let bytes = M17Frame::Connect {
            callsign: "KO4UYJ".into(),
            module: 'A',
        }
        .encode();
        assert_eq!(
            codec().decode(&bytes),
            Err(ParseError::ForeignModule {
                expected: 'C',
                actual: 'A'
            })
        );
    }

    #[test]
    fn test_pong_is_keepalive() {
        let bytes = M17Frame::Pong {
            callsign: "KO4UYJ".into(),
        }
        .encode();
        assert_eq!(
            codec().decode(&bytes).unwrap(),
            Frame::Keepalive {
                identity: Some("KO4UYJ".into())
            }
        );
    }

    #[test]
    fn test_reflector_frames_not_accepted_from_client() {
        for frame in [
            M17Frame::Ack,
            M17Frame::Nack,
            M17Frame::Ping {
                callsign: "KO4UYJ".into(),
            },
        ] {
            assert!(matches!(
                codec().decode(&frame.encode()),
                Err(ParseError::UnexpectedFrame(_))
            ));
        }
    }

    #[test]
    fn test_disconnect_forms() {
        let client = M17Frame::Disconnect {
            callsign: Some("KO4UYJ".into()),
        }
        .encode();
        assert_eq!(client.len(), CALLSIGN_FRAME_LEN);
        assert_eq!(
            codec().decode(&client).unwrap(),
            Frame::Unlink {
                identity: Some("KO4UYJ".into())
            }
        );

        assert_eq!(codec().encode_disconnect().unwrap(), b"DISC".to_vec());
        assert_eq!(codec().encode_unlink_ack().unwrap(), b"DISC".to_vec());
    }

    #[test]
    fn test_stream_header_and_crc() {
        let bytes = M17Frame::Stream(M17Stream::new(0xBEEF, "KO4UYJ", "@ALL", 7, false)).encode();
        assert_eq!(bytes.len(), STREAM_LEN);
        assert_eq!(
            u16::from_be_bytes([bytes[52], bytes[53]]),
            crc16(&bytes[..52])
        );

        let frame = codec().decode(&bytes).unwrap();
        let header = frame.voice_header().unwrap();
        assert_eq!(header.stream_id, Some(0xBEEF));
        assert_eq!(header.source, Some(StationId::Callsign("KO4UYJ".into())));
        assert_eq!(header.destination, Some(StationId::Callsign("@ALL".into())));
        assert_eq!(header.sequence, Some(7));
        assert!(!header.end_of_transmission);
    }

    #[test]
    fn test_stream_with_bad_crc_rejected() {
        let mut bytes = M17Frame::Stream(M17Stream::new(0xBEEF, "KO4UYJ", "@ALL", 7, false)).encode();
        bytes[40] ^= 0xFF;
        assert!(matches!(
            codec().decode(&bytes),
            Err(ParseError::BadChecksum { frame: "M17 stream", .. })
        ));
    }

    #[test]
    fn test_last_frame_bit() {
        let bytes = M17Frame::Stream(M17Stream::new(1, "KO4UYJ", "@ALL", 42, true)).encode();
        assert_eq!(bytes[34] & 0x80, 0x80);
        let frame = codec().decode(&bytes).unwrap();
        assert!(frame.is_end_of_transmission());
        assert_eq!(frame.voice_header().unwrap().sequence, Some(42));
    }

    #[test]
    fn test_keepalive_is_ping_with_reflector_callsign() {
        let ping = codec().encode_keepalive().unwrap();
        assert_eq!(&ping[..4], PING_TAG);
        assert_eq!(decode_base40(&ping[4..10]).unwrap(), "M17-REF");

        assert!(M17Codec::new("NOT_VALID_CALL", 'A').encode_keepalive().is_none());
    }
}
