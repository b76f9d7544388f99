use crate::error::{BlockchainError, Result};
use log::debug;
use std::io::Write;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Outbound delivery of one encoded frame to one peer. A peer that cannot be
/// dialed is reported as [`BlockchainError::Unreachable`]; failures after the
/// connection is up are [`BlockchainError::Network`].
pub trait Transport: Send + Sync {
    fn send(&self, addr: &str, frame: &[u8]) -> Result<()>;
}

/// Dials, writes the frame, and closes the write half so the receiver sees
/// end of message.
pub struct TcpTransport {
    write_timeout: Duration,
}

impl TcpTransport {
    pub fn new(write_timeout: Duration) -> TcpTransport {
        TcpTransport { write_timeout }
    }

    fn connect(&self, addr: &str) -> Result<TcpStream> {
        let candidates = addr
            .to_socket_addrs()
            .map_err(|e| BlockchainError::Unreachable(format!("Invalid address {addr}: {e}")))?;

        let mut last_error = None;
        for socket_addr in candidates {
            match TcpStream::connect_timeout(&socket_addr, self.write_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }
        Err(BlockchainError::Unreachable(match last_error {
            Some(e) => format!("Failed to connect to {addr}: {e}"),
            None => format!("Address {addr} did not resolve"),
        }))
    }
}

impl Transport for TcpTransport {
    fn send(&self, addr: &str, frame: &[u8]) -> Result<()> {
        let mut stream = self.connect(addr)?;
        stream
            .set_write_timeout(Some(self.write_timeout))
            .map_err(|e| BlockchainError::Network(format!("Failed to set write timeout: {e}")))?;
        stream
            .write_all(frame)
            .and_then(|_| stream.flush())
            .map_err(|e| BlockchainError::Network(format!("Failed to send data to {addr}: {e}")))?;
        let _ = stream.shutdown(Shutdown::Write);
        debug!("Sent {} bytes to {addr}", frame.len());
        Ok(())
    }
}
