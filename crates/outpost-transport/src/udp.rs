//! UDP transport implementation using `tokio::net::UdpSocket`.

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::{Datagram, DatagramTransport, MAX_DATAGRAM_LEN, TransportError};

/// A [`DatagramTransport`] over a single bound UDP socket.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Binds a new UDP transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(TransportError::BindFailed)?;
        let local = socket.local_addr().map_err(TransportError::BindFailed)?;
        tracing::info!(%local, "UDP transport listening");
        Ok(Self { socket })
    }

    /// Wraps an already bound socket.
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

impl DatagramTransport for UdpTransport {
    type Error = TransportError;

    async fn recv(&self) -> Result<Datagram, Self::Error> {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        let (len, from) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(TransportError::ReceiveFailed)?;
        buf.truncate(len);
        Ok(Datagram { from, data: buf })
    }

    fn try_recv(&self) -> Result<Option<Datagram>, Self::Error> {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        match self.socket.try_recv_from(&mut buf) {
            Ok((len, from)) => {
                buf.truncate(len);
                Ok(Some(Datagram { from, data: buf }))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(TransportError::ReceiveFailed(e)),
        }
    }

    async fn send_to(&self, data: &[u8], to: SocketAddr) -> Result<(), Self::Error> {
        let sent = self
            .socket
            .send_to(data, to)
            .await
            .map_err(TransportError::SendFailed)?;
        if sent != data.len() {
            return Err(TransportError::ShortSend {
                sent,
                len: data.len(),
            });
        }
        tracing::trace!(%to, len = sent, "datagram sent");
        Ok(())
    }

    async fn readable(&self) -> Result<(), Self::Error> {
        self.socket
            .readable()
            .await
            .map_err(TransportError::ReceiveFailed)
    }

    fn local_addr(&self) -> Result<SocketAddr, Self::Error> {
        self.socket.local_addr().map_err(TransportError::BindFailed)
    }
}
