//! Byte-level transport over the probe UART.

use std::io;
use std::time::Duration;

use log::trace;

use crate::probe::Probe;
use crate::{Error, Result};

/// Serial link to the target, owning the probe and its receive deadline.
///
/// The link is single-threaded by contract; every call blocks until the
/// probe accepts the bytes or the deadline elapses.
pub struct Link<P> {
    probe: P,
}

impl<P: Probe> Link<P> {
    pub fn new(probe: P) -> Self {
        Self { probe }
    }

    /// Transmit every byte in order.
    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        trace!("tx {:02X?}", bytes);
        self.probe.transmit(bytes).map_err(from_io)
    }

    /// Receive exactly `n` bytes, or fail with [`Error::Timeout`].
    pub fn recv(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.probe.receive(&mut buf).map_err(from_io)?;
        trace!("rx {:02X?}", buf);
        Ok(buf)
    }

    pub fn recv_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8];
        self.probe.receive(&mut buf).map_err(from_io)?;
        trace!("rx {:02X?}", buf);
        Ok(buf[0])
    }

    /// Drain any stale bytes from the receive side.
    pub fn flush(&mut self) -> Result<()> {
        self.probe.flush().map_err(from_io)
    }

    /// Set the deadline used by subsequent `recv` calls. Callers that raise
    /// the deadline temporarily restore it themselves.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.probe.set_timeout(timeout).map_err(from_io)
    }

    pub fn timeout(&self) -> Duration {
        self.probe.timeout()
    }

    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.probe.set_baud_rate(baud_rate).map_err(from_io)
    }

    pub fn probe_mut(&mut self) -> &mut P {
        &mut self.probe
    }
}

fn from_io(error: io::Error) -> Error {
    match error.kind() {
        io::ErrorKind::TimedOut => Error::Timeout,
        _ => Error::Io(error),
    }
}
