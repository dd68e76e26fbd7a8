//! Blocking TCP glue: run the handshake over a socket, then exchange records on it.
//!
//! Each act read is bounded by [`HANDSHAKE_READ_TIMEOUT`] so a stalled peer cannot pin the
//! connection. No retries, no reconnects; on any error the socket is dropped.

use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};

use bytes::Bytes;
use secp256k1::PublicKey;
use tracing::debug;

use crate::{
    config::{MachineConfig, Role},
    error::{Error, Result},
    machine::{HandshakeStage, Machine},
    HANDSHAKE_READ_TIMEOUT,
};

/// A TCP stream carrying a completed handshake.
pub struct SecureStream {
    stream: TcpStream,
    machine: Machine,
}

impl SecureStream {
    /// Dials `addr` and runs the initiator side. `config` must be an initiator config.
    pub fn connect<A: ToSocketAddrs>(addr: A, config: MachineConfig) -> Result<Self> {
        if config.role == Role::Responder {
            return Err(Error::WrongState { operation: "connect", stage: HandshakeStage::Created });
        }
        let stream = TcpStream::connect(addr)?;
        Self::handshake(stream, config)
    }

    /// Runs the responder side on an accepted socket. `config` must be a responder config.
    pub fn accept(stream: TcpStream, config: MachineConfig) -> Result<Self> {
        if config.role != Role::Responder {
            return Err(Error::WrongState { operation: "accept", stage: HandshakeStage::Created });
        }
        Self::handshake(stream, config)
    }

    fn handshake(mut stream: TcpStream, config: MachineConfig) -> Result<Self> {
        let mut machine = Machine::new(config);

        stream.set_read_timeout(Some(HANDSHAKE_READ_TIMEOUT))?;
        if machine.is_initiator() {
            machine.initiate_handshake(&mut stream)?;
        } else {
            machine.respond_handshake(&mut stream)?;
        }
        stream.set_read_timeout(None)?;

        debug!(peer = ?stream.peer_addr().ok(), "secure stream established");
        Ok(Self { stream, machine })
    }

    /// Sends one record.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.machine.write_message(&mut self.stream, payload)
    }

    /// Blocks until the next record arrives.
    pub fn recv(&mut self) -> Result<Bytes> {
        self.machine.read_message(&mut self.stream)
    }

    /// The authenticated long-term key of the peer.
    pub fn remote_static(&self) -> Option<PublicKey> {
        self.machine.remote_static()
    }

    /// Address of the peer.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Returns the read buffer to its pool and shuts the socket down.
    pub fn close(self) -> Result<()> {
        self.machine.close();
        match self.stream.shutdown(Shutdown::Both) {
            // already torn down by the peer
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            res => Ok(res?),
        }
    }
}
