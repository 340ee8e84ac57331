//! Virtual hotspot
//!
//! Produces the datagrams a hotspot or gateway sends to a reflector, in the
//! wire format of its protocol.

use dv_protocol::{
    m17::{M17Frame, M17Stream},
    nxdn::{NxdnData, NxdnFrame},
    p25::{P25Frame, LDU1_RECORDS, LDU2_RECORDS},
    ysf::{YsfData, YsfFrame, PAYLOAD_LEN as YSF_PAYLOAD_LEN, STATUS_TAG},
    EncodeFrame, Protocol,
};
use serde::{Deserialize, Serialize};

/// Configuration for creating a virtual hotspot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualHotspotConfig {
    /// Callsign sent in link frames
    pub callsign: String,
    /// Protocol to speak
    pub protocol: Protocol,
    /// Talk group for NXDN polls and P25/NXDN voice
    pub talk_group: u16,
    /// Radio id for P25/NXDN voice
    pub source_id: u16,
    /// M17 module to connect to
    pub module: char,
}

impl Default for VirtualHotspotConfig {
    fn default() -> Self {
        Self {
            callsign: "N0CALL".to_string(),
            protocol: Protocol::P25,
            talk_group: 10200,
            source_id: 1,
            module: 'A',
        }
    }
}

/// A simulated hotspot that generates protocol-accurate datagrams
#[derive(Debug, Clone)]
pub struct VirtualHotspot {
    callsign: String,
    protocol: Protocol,
    talk_group: u16,
    source_id: u16,
    module: char,
    /// Frames sent in the current transmission
    frame_counter: u16,
    stream_id: u16,
}

impl VirtualHotspot {
    /// Create a hotspot with default talk group, id and module
    pub fn new(callsign: impl Into<String>, protocol: Protocol) -> Self {
        Self::from_config(VirtualHotspotConfig {
            callsign: callsign.into(),
            protocol,
            ..Default::default()
        })
    }

    pub fn from_config(config: VirtualHotspotConfig) -> Self {
        Self {
            callsign: config.callsign,
            protocol: config.protocol,
            talk_group: config.talk_group,
            source_id: config.source_id,
            module: config.module,
            frame_counter: 0,
            stream_id: 1,
        }
    }

    pub fn with_talk_group(mut self, talk_group: u16) -> Self {
        self.talk_group = talk_group;
        self
    }

    pub fn with_module(mut self, module: char) -> Self {
        self.module = module;
        self
    }

    pub fn with_source_id(mut self, source_id: u16) -> Self {
        self.source_id = source_id;
        self
    }

    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Frames sent so far in the current transmission
    pub fn frame_counter(&self) -> u16 {
        self.frame_counter
    }

    /// Login / poll datagram
    pub fn link_frame(&self) -> Vec<u8> {
        let callsign = self.callsign.clone();
        match self.protocol {
            Protocol::P25 => P25Frame::Poll { callsign }.encode(),
            Protocol::Ysf => YsfFrame::Poll { callsign }.encode(),
            Protocol::Nxdn => NxdnFrame::Poll {
                callsign,
                talk_group: self.talk_group,
            }
            .encode(),
            Protocol::M17 => M17Frame::Connect {
                callsign,
                module: self.module,
            }
            .encode(),
        }
    }

    /// Periodic liveness datagram
    ///
    /// Poll-based protocols repeat the link frame; M17 answers the
    /// reflector's ping with a pong.
    pub fn keepalive_frame(&self) -> Vec<u8> {
        match self.protocol {
            Protocol::M17 => M17Frame::Pong {
                callsign: self.callsign.clone(),
            }
            .encode(),
            _ => self.link_frame(),
        }
    }

    /// Leave the reflector
    pub fn unlink_frame(&self) -> Vec<u8> {
        let callsign = self.callsign.clone();
        match self.protocol {
            Protocol::P25 => P25Frame::Unlink { callsign }.encode(),
            Protocol::Ysf => YsfFrame::Unlink { callsign }.encode(),
            Protocol::Nxdn => NxdnFrame::Unlink {
                callsign,
                talk_group: self.talk_group,
            }
            .encode(),
            Protocol::M17 => M17Frame::Disconnect {
                callsign: Some(callsign),
            }
            .encode(),
        }
    }

    /// YSF registry status query; other protocols have none
    pub fn status_request(&self) -> Option<Vec<u8>> {
        (self.protocol == Protocol::Ysf).then(|| STATUS_TAG.to_vec())
    }

    /// Next voice frame of the current transmission
    pub fn voice_frame(&mut self) -> Vec<u8> {
        let frame = self.encode_voice(false);
        self.frame_counter = self.frame_counter.wrapping_add(1);
        frame
    }

    /// Final frame of the current transmission
    ///
    /// The next voice frame starts a new transmission.
    pub fn end_frame(&mut self) -> Vec<u8> {
        let frame = self.encode_voice(true);
        self.frame_counter = 0;
        self.stream_id = self.stream_id.wrapping_add(1);
        frame
    }

    fn encode_voice(&self, last: bool) -> Vec<u8> {
        match self.protocol {
            Protocol::P25 => {
                if last {
                    return P25Frame::terminator().encode();
                }
                let records: Vec<u8> = LDU1_RECORDS.iter().chain(&LDU2_RECORDS).copied().collect();
                let tag = records[usize::from(self.frame_counter) % records.len()];
                P25Frame::voice_record(tag, u32::from(self.source_id), u32::from(self.talk_group))
                    .map(|frame| frame.encode())
                    .unwrap_or_default()
            }
            Protocol::Ysf => YsfFrame::Data(YsfData {
                gateway: Some(self.callsign.clone()),
                source: Some(self.callsign.clone()),
                destination: Some("ALL".to_string()),
                frame_counter: (self.frame_counter % 128) as u8,
                end_of_transmission: last,
                payload: vec![0u8; YSF_PAYLOAD_LEN],
            })
            .encode(),
            Protocol::Nxdn => {
                NxdnFrame::Data(NxdnData::group_call(self.source_id, self.talk_group, last)).encode()
            }
            Protocol::M17 => M17Frame::Stream(M17Stream::new(
                self.stream_id,
                &self.callsign,
                "@ALL",
                self.frame_counter,
                last,
            ))
            .encode(),
        }
    }
}
