//! UDP driver for a virtual hotspot

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::trace;

use crate::hotspot::VirtualHotspot;

/// Errors from a hotspot client
#[derive(Debug, Error)]
pub enum SimError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no datagram within {0:?}")]
    Timeout(Duration),
}

/// A virtual hotspot talking to a reflector over a real UDP socket
#[derive(Debug)]
pub struct HotspotClient {
    hotspot: VirtualHotspot,
    socket: UdpSocket,
    reflector: SocketAddr,
}

impl HotspotClient {
    /// Bind a local socket for `hotspot`, addressed at `reflector`
    pub async fn connect(hotspot: VirtualHotspot, reflector: SocketAddr) -> Result<Self, SimError> {
        let bind: SocketAddr = if reflector.is_ipv4() {
            ([127, 0, 0, 1], 0).into()
        } else {
            (std::net::Ipv6Addr::LOCALHOST, 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        Ok(Self {
            hotspot,
            socket,
            reflector,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SimError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn hotspot(&self) -> &VirtualHotspot {
        &self.hotspot
    }

    pub fn hotspot_mut(&mut self) -> &mut VirtualHotspot {
        &mut self.hotspot
    }

    /// Send raw bytes to the reflector
    pub async fn send(&self, data: &[u8]) -> Result<(), SimError> {
        trace!("{} -> {}: {:02X?}", self.hotspot.callsign(), self.reflector, data);
        self.socket.send_to(data, self.reflector).await?;
        Ok(())
    }

    pub async fn link(&self) -> Result<(), SimError> {
        self.send(&self.hotspot.link_frame()).await
    }

    pub async fn keepalive(&self) -> Result<(), SimError> {
        self.send(&self.hotspot.keepalive_frame()).await
    }

    pub async fn unlink(&self) -> Result<(), SimError> {
        self.send(&self.hotspot.unlink_frame()).await
    }

    /// Send the next voice frame, returning the bytes sent
    pub async fn voice(&mut self) -> Result<Vec<u8>, SimError> {
        let frame = self.hotspot.voice_frame();
        self.send(&frame).await?;
        Ok(frame)
    }

    /// Send the end-of-transmission frame, returning the bytes sent
    pub async fn end(&mut self) -> Result<Vec<u8>, SimError> {
        let frame = self.hotspot.end_frame();
        self.send(&frame).await?;
        Ok(frame)
    }

    /// Wait up to `timeout` for a datagram from the reflector
    pub async fn recv(&self, timeout: Duration) -> Result<Vec<u8>, SimError> {
        let mut buf = vec![0u8; 2048];
        loop {
            let (len, from) = tokio::time::timeout(timeout, self.socket.recv_from(&mut buf))
                .await
                .map_err(|_| SimError::Timeout(timeout))??;
            if from == self.reflector {
                buf.truncate(len);
                return Ok(buf);
            }
            trace!("Ignoring datagram from {}", from);
        }
    }

    /// Like [`recv`](Self::recv), but a timeout is `None`
    pub async fn try_recv(&self, timeout: Duration) -> Result<Option<Vec<u8>>, SimError> {
        match self.recv(timeout).await {
            Ok(data) => Ok(Some(data)),
            Err(SimError::Timeout(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Discard everything already queued on the socket
    pub async fn drain(&self) -> Result<usize, SimError> {
        let mut drained = 0;
        while self.try_recv(Duration::from_millis(20)).await?.is_some() {
            drained += 1;
        }
        Ok(drained)
    }
}
