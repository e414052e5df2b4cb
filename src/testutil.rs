//! Scripted probe double used by the protocol tests.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use crate::probe::Probe;

/// Pin, supply and timing operations observed by the fake probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOp {
    Power(bool),
    Boot0(bool),
    Boot1(bool),
    Nrst(bool),
    Delay(Duration),
}

/// A probe that records everything the driver does and plays back scripted
/// replies. A `None` entry in the reply queue forces a receive timeout, as
/// does queue exhaustion.
pub struct FakeProbe {
    pub sent: Vec<u8>,
    pub ops: Vec<ProbeOp>,
    pub replies: VecDeque<Option<u8>>,
    pub flushes: usize,
    pub baud_rate: Option<u32>,
    /// Every value passed to `set_timeout`, in order.
    pub timeouts: Vec<Duration>,
    timeout: Duration,
}

impl FakeProbe {
    pub fn new() -> Self {
        Self {
            sent: Vec::new(),
            ops: Vec::new(),
            replies: VecDeque::new(),
            flushes: 0,
            baud_rate: None,
            timeouts: Vec::new(),
            timeout: Duration::from_secs(1),
        }
    }

    /// Script the next bytes the target will answer with.
    pub fn queue(&mut self, bytes: &[u8]) {
        self.replies.extend(bytes.iter().copied().map(Some));
    }

    /// Script a receive timeout at this point of the reply stream.
    pub fn queue_timeout(&mut self) {
        self.replies.push_back(None);
    }
}

impl Probe for FakeProbe {
    fn set_power(&mut self, on: bool) -> io::Result<()> {
        self.ops.push(ProbeOp::Power(on));
        Ok(())
    }

    fn set_boot0(&mut self, high: bool) -> io::Result<()> {
        self.ops.push(ProbeOp::Boot0(high));
        Ok(())
    }

    fn set_boot1(&mut self, high: bool) -> io::Result<()> {
        self.ops.push(ProbeOp::Boot1(high));
        Ok(())
    }

    fn set_nrst(&mut self, high: bool) -> io::Result<()> {
        self.ops.push(ProbeOp::Nrst(high));
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        self.baud_rate = Some(baud_rate);
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.timeouts.push(timeout);
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn transmit(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.sent.extend_from_slice(bytes);
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<()> {
        for slot in buf.iter_mut() {
            match self.replies.pop_front() {
                Some(Some(byte)) => *slot = byte,
                Some(None) | None => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "scripted timeout"))
                }
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flushes += 1;
        Ok(())
    }

    fn delay(&mut self, duration: Duration) {
        self.ops.push(ProbeOp::Delay(duration));
    }
}
