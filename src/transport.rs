//! The network transport contract and the codec-facing receive adapter.

use std::io;
use std::time::{Duration, Instant};

use crate::codec::NetworkIo;
use crate::config::MESSAGE_RECEIVE_TIMEOUT_MS;

/// Broker endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerInfo {
    pub host: String,
    pub port: u16,
}

/// TLS and authentication material for a secure connection.
///
/// Presence of credentials at client creation puts the client in secure
/// mode; the transport decides how to consume the individual fields.
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    pub root_ca: Option<Vec<u8>>,
    pub client_cert: Option<Vec<u8>>,
    pub private_key: Option<Vec<u8>>,
    pub sni_host_name: Option<String>,
    pub alpn_protocols: Vec<String>,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

/// Installed into the transport at connection setup; invoked from the
/// transport's own thread when the connection drops underneath the session.
pub type DisconnectNotifier = Box<dyn Fn() + Send + Sync>;

/// Byte transport consumed by the session core: TCP, or TLS over TCP when
/// credentials are present.
pub trait Transport: Send {
    /// Prepare a connection to `server`, arming `notifier` for asynchronous
    /// disconnect notification.
    fn create(
        &mut self,
        server: &ServerInfo,
        credentials: Option<&Credentials>,
        notifier: DisconnectNotifier,
    ) -> io::Result<()>;

    /// Establish the TCP (and TLS) connection.
    fn connect(&mut self, send_timeout_ms: u32, recv_timeout_ms: u32) -> io::Result<()>;

    fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Receive up to `buf.len()` bytes. `Ok(0)` means no data within the
    /// socket receive timeout; short reads are expected.
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn disconnect(&mut self) -> io::Result<()>;

    /// Release connection resources (socket, TLS session).
    fn delete(&mut self) -> io::Result<()>;
}

/// Adapts a [`Transport`] to the codec's [`NetworkIo`] interface.
///
/// The codec expects `recv` to deliver the requested byte count or report
/// that no packet has started arriving; the transport only promises short
/// reads. `recv` therefore re-reads under a wall-time budget, resetting the
/// budget whenever bytes arrive. This is the only place tolerant of the
/// transport delivering fewer bytes than requested per call.
pub(crate) struct TransportIo<'a> {
    transport: &'a mut dyn Transport,
    budget: Duration,
}

impl<'a> TransportIo<'a> {
    pub fn new(transport: &'a mut dyn Transport) -> Self {
        TransportIo::with_budget(transport, Duration::from_millis(MESSAGE_RECEIVE_TIMEOUT_MS))
    }

    pub fn with_budget(transport: &'a mut dyn Transport, budget: Duration) -> Self {
        TransportIo { transport, budget }
    }
}

impl NetworkIo for TransportIo<'_> {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.transport.send(buf)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut total = 0;
        let mut remaining = self.budget;

        while total < buf.len() {
            let entry = Instant::now();
            let read = self.transport.receive(&mut buf[total..])?;
            let mut elapsed = entry.elapsed();

            if read == 0 {
                if total == 0 {
                    // No packet has started arriving; let the codec retry later.
                    return Ok(0);
                }
            } else {
                total += read;
                trace!("received {} of {} requested bytes", total, buf.len());
                // Progress resets the re-read budget.
                remaining = self.budget;
                elapsed = Duration::from_millis(0);
            }

            remaining = remaining.saturating_sub(elapsed);
            if remaining.is_zero() {
                break;
            }
        }

        Ok(total)
    }
}
