//! Instrumentation probe interface.
//!
//! The target is not driven over the serial link alone: entering the system
//! bootloader requires control of the target supply, the NRST line and the
//! boot-mode straps. This module defines the capability trait the rest of
//! the crate programs against, plus an adapter for plain USB-serial cables.

use std::io;
use std::thread;
use std::time::Duration;

use log::{debug, trace};
use serialport::{ClearBuffer, SerialPort};

use crate::Result;

/// Capabilities required from the instrumentation board.
///
/// All I/O is synchronous and may block; `receive` blocks up to the timeout
/// configured with [`Probe::set_timeout`]. Implementations are owned by a
/// single [`Session`](crate::Session) and never shared.
pub trait Probe {
    /// Switch the target supply rail.
    fn set_power(&mut self, on: bool) -> io::Result<()>;

    /// Drive the BOOT0 strap.
    fn set_boot0(&mut self, high: bool) -> io::Result<()>;

    /// Drive the BOOT1 strap.
    fn set_boot1(&mut self, high: bool) -> io::Result<()>;

    /// Drive the NRST line.
    fn set_nrst(&mut self, high: bool) -> io::Result<()>;

    /// Program the UART baud rate.
    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()>;

    /// Set the deadline used by subsequent [`Probe::receive`] calls.
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// The deadline currently in effect.
    fn timeout(&self) -> Duration;

    /// Transmit every byte in order.
    fn transmit(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Fill `buf` exactly, or fail with [`io::ErrorKind::TimedOut`] once the
    /// deadline elapses.
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Drain any pending receive data.
    fn flush(&mut self) -> io::Result<()>;

    /// Wait for the given duration between pin transitions.
    fn delay(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Probe adapter for a plain USB-serial cable.
///
/// The modem-control lines stand in for the strap and reset signals: RTS is
/// wired to NRST (asserted pulls the line low) and DTR to BOOT0. Such cables
/// carry no supply switch and no BOOT1 pin, so [`Probe::set_power`] and
/// [`Probe::set_boot1`] do nothing here; a scaffold-class board gets its own
/// [`Probe`] implementation instead.
pub struct SerialProbe {
    port: Box<dyn SerialPort>,
}

impl SerialProbe {
    /// Open the given serial device with the 8E1 framing the ST bootloader
    /// expects.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        debug!("opening serial port: {path} {baud_rate} 8E1");
        let port = serialport::new(path, baud_rate)
            .parity(serialport::Parity::Even)
            .stop_bits(serialport::StopBits::One)
            .data_bits(serialport::DataBits::Eight)
            .timeout(Duration::from_secs(1))
            .open()
            .map_err(into_io)?;
        Ok(Self { port })
    }
}

impl Probe for SerialProbe {
    fn set_power(&mut self, on: bool) -> io::Result<()> {
        trace!("power rail {} (no supply switch on serial cable)", on as u8);
        Ok(())
    }

    fn set_boot0(&mut self, high: bool) -> io::Result<()> {
        trace!("boot0 <- {}", high as u8);
        self.port.write_data_terminal_ready(high).map_err(into_io)
    }

    fn set_boot1(&mut self, high: bool) -> io::Result<()> {
        trace!("boot1 <- {} (not wired on serial cable)", high as u8);
        Ok(())
    }

    fn set_nrst(&mut self, high: bool) -> io::Result<()> {
        trace!("nrst <- {}", high as u8);
        // RTS asserted holds the target in reset
        self.port.write_request_to_send(!high).map_err(into_io)
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        self.port.set_baud_rate(baud_rate).map_err(into_io)
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(into_io)
    }

    fn timeout(&self) -> Duration {
        self.port.timeout()
    }

    fn transmit(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.port.read_exact(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(into_io)
    }
}

fn into_io(error: serialport::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, error)
}
