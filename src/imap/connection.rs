//! Blocking byte transport to the IMAP server.
//!
//! The transport only moves bytes; response boundaries are found by the
//! parser in [`crate::imap::response`], so a receive that times out half-way
//! through a response loses nothing.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use native_tls::{TlsConnector, TlsStream};

use crate::error::{Error, Result};

/// Read chunk size.
const READ_CHUNK: usize = 16 * 1024;

/// A bidirectional byte stream with bounded receives.
pub trait Transport {
    /// Write one complete command, CRLF included.
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for more bytes from the server.
    ///
    /// Returns `Ok(None)` when the timeout elapsed with nothing received.
    /// A chunk may hold part of a response or several responses.
    fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Close the connection. Idempotent.
    fn close(&mut self);
}

/// IMAP over implicit TLS (port 993).
pub struct TlsTransport {
    stream: TlsStream<TcpStream>,
    closed: bool,
}

impl TlsTransport {
    /// Dial `host:port`, then perform the TLS handshake with `host` as SNI name.
    ///
    /// `timeout` bounds the TCP connect and each handshake read.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let server = format!("{host}:{port}");
        let addrs = (host, port).to_socket_addrs().map_err(|e| Error::Connection {
            server: server.clone(),
            reason: e.to_string(),
        })?;

        let mut last_err = None;
        let mut tcp = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(s) => {
                    tcp = Some(s);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let tcp = tcp.ok_or_else(|| Error::Connection {
            server: server.clone(),
            reason: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no addresses resolved".to_string()),
        })?;

        tcp.set_read_timeout(Some(timeout))?;
        tcp.set_write_timeout(Some(timeout))?;

        let connector = TlsConnector::new()?;
        let stream = connector
            .connect(host, tcp)
            .map_err(|e| Error::Tls(format!("handshake with {server} failed: {e}")))?;

        Ok(Self {
            stream,
            closed: false,
        })
    }
}

impl Transport for TlsTransport {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data)?;
        self.stream.flush()?;
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        // a zero read timeout means "block forever" to the OS
        let timeout = timeout.max(Duration::from_millis(1));
        self.stream.get_ref().set_read_timeout(Some(timeout))?;

        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(Error::Protocol("connection closed by server".to_string()));
                }
                Ok(n) => {
                    chunk.truncate(n);
                    return Ok(Some(chunk));
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.stream.shutdown();
        let _ = self.stream.get_ref().shutdown(Shutdown::Both);
    }
}

impl Drop for TlsTransport {
    fn drop(&mut self) {
        self.close();
    }
}
