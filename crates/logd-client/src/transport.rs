// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8126;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to send datagram: {0}")]
    Io(#[from] io::Error),
}

/// Something that carries one encoded envelope to the server.
pub trait Transport: Send + Sync {
    fn send_to(&self, datagram: &[u8]) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send_to(&self, datagram: &[u8]) -> Result<(), TransportError> {
        (**self).send_to(datagram)
    }
}

/// Where the client sends to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// UDP socket connected to a single logd server.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Resolves the configured address once and connects a non-blocking
    /// socket to it. A full send buffer surfaces as a failed send instead of
    /// stalling the caller.
    ///
    /// IPv4 is preferred when the host resolves to both families, matching
    /// the server's default `0.0.0.0` bind.
    pub fn connect(config: &ClientConfig) -> io::Result<Self> {
        let addr = preferred_address((config.host.as_str(), config.port).to_socket_addrs()?)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no address found for {}", config.host),
                )
            })?;

        let local: SocketAddr = match addr {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket.peer_addr()
    }
}

/// First IPv4 address, or the first address when there is none.
fn preferred_address(addrs: impl IntoIterator<Item = SocketAddr>) -> Option<SocketAddr> {
    let mut first = None;
    for addr in addrs {
        if addr.is_ipv4() {
            return Some(addr);
        }
        first.get_or_insert(addr);
    }
    first
}

impl Transport for UdpTransport {
    fn send_to(&self, datagram: &[u8]) -> Result<(), TransportError> {
        self.socket.send(datagram)?;
        Ok(())
    }
}
