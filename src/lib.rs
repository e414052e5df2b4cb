//! Host-side driver for the STM32 system-memory bootloader.
//!
//! Implements the USART protocol of ST application notes AN3155 and AN4872,
//! driving the target through an instrumentation probe that controls power,
//! reset and the boot-mode straps in addition to the serial link.
//!
//! The [`Probe`] trait abstracts the board; [`Session`] owns one probe and
//! exposes every bootloader command as a typed operation:
//!
//! ```no_run
//! use stm32boot::{Catalog, SerialProbe, Session};
//!
//! # fn main() -> stm32boot::Result<()> {
//! let probe = SerialProbe::open("/dev/ttyUSB0", 115_200)?;
//! let mut session = Session::new(probe, Catalog::builtin()?)?;
//! session.reset_from_system_memory(None)?;
//! let firmware = session.read_memory_data(0x0800_0000, 0x4000)?;
//! # let _ = firmware;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod codec;
mod error;
pub mod link;
pub mod probe;
pub mod session;
pub mod target;

#[cfg(test)]
pub(crate) mod testutil;

pub use catalog::{Catalog, DeviceRecord};
pub use codec::Command;
pub use error::{Error, Result};
pub use probe::{Probe, SerialProbe};
pub use session::{BootState, DeviceUid, Session, SpecialErase};

/// Start of internal flash on every STM32 part.
pub const FLASH_BASE_ADDRESS: u32 = 0x0800_0000;
