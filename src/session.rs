//! Bootloader session: the protocol engine and its high-level API.
//!
//! A [`Session`] owns the probe for its whole life. It power-cycles the
//! target into system-memory boot, performs the synchronization handshake
//! and then exposes every command of the ST serial bootloader as a typed
//! operation. Long transfers are chunked to the 256-byte protocol window;
//! device-specific flash geometry comes from the [`Catalog`].

use std::fmt;
use std::time::Duration;

use log::{debug, info, warn};

use crate::catalog::{Catalog, DeviceRecord};
use crate::codec::{self, Command};
use crate::link::Link;
use crate::probe::Probe;
use crate::target;
use crate::{Error, Result};

/// Flash page size assumed until a device record is installed.
pub const DEFAULT_FLASH_PAGE_SIZE: u32 = 1024;

/// Receive deadline for ordinary commands.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Mass erase and readout unprotect can keep the bootloader busy for
/// seconds; their terminal ACK gets a wider window.
const LONG_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

const SYNCHRONIZE_ATTEMPTS: usize = 2;
const UART_BAUD_RATE: u32 = 115_200;
const UID_LENGTH: usize = 12;

/// Bootloader lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootState {
    /// Target powered down or running unknown code.
    Cold,
    /// Reset sequence done, synchronization handshake in flight.
    Synchronizing,
    /// Bootloader answered the handshake and accepts commands.
    Live,
    /// A GO command handed control to user code.
    Gone,
}

/// Bank selectors of the extended erase command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpecialErase {
    /// Erase both banks.
    Mass,
    Bank1,
    Bank2,
}

impl SpecialErase {
    fn payload(self) -> [u8; 3] {
        match self {
            SpecialErase::Mass => [0xFF, 0xFF, 0x00],
            SpecialErase::Bank1 => [0xFF, 0xFE, 0x01],
            SpecialErase::Bank2 => [0xFF, 0xFD, 0x02],
        }
    }
}

/// 96-bit factory-programmed unique device identifier.
///
/// `Display` renders the documented `[2,2,4,4]` grouping with the
/// half-word/word swap applied, hex encoded and hyphen joined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceUid([u8; UID_LENGTH]);

const UID_SWAP: [&[usize]; 4] = [&[1, 0], &[3, 2], &[7, 6, 5, 4], &[11, 10, 9, 8]];

impl DeviceUid {
    pub fn as_bytes(&self) -> &[u8; UID_LENGTH] {
        &self.0
    }
}

impl fmt::Display for DeviceUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, group) in UID_SWAP.iter().enumerate() {
            if i > 0 {
                f.write_str("-")?;
            }
            for &index in *group {
                write!(f, "{:02X}", self.0[index])?;
            }
        }
        Ok(())
    }
}

/// A driver session bound to one probe and one target.
pub struct Session<P: Probe> {
    link: Link<P>,
    catalog: Catalog,
    state: BootState,
    commands: Vec<u8>,
    extended_erase: bool,
    device: Option<DeviceRecord>,
    data_transfer_size: usize,
    flash_page_size: u32,
}

impl<P: Probe> Session<P> {
    /// Bind to a probe and program the UART for the ST bootloader.
    pub fn new(probe: P, catalog: Catalog) -> Result<Self> {
        let mut link = Link::new(probe);
        link.set_baud_rate(UART_BAUD_RATE)?;
        link.set_timeout(DEFAULT_TIMEOUT)?;
        Ok(Self {
            link,
            catalog,
            state: BootState::Cold,
            commands: Vec::new(),
            extended_erase: false,
            device: None,
            data_transfer_size: codec::MAX_TRANSFER_SIZE,
            flash_page_size: DEFAULT_FLASH_PAGE_SIZE,
        })
    }

    pub fn state(&self) -> BootState {
        self.state
    }

    /// The record installed after GET_ID matched the catalog.
    pub fn device(&self) -> Option<&DeviceRecord> {
        self.device.as_ref()
    }

    pub fn flash_page_size(&self) -> u32 {
        self.flash_page_size
    }

    pub fn data_transfer_size(&self) -> usize {
        self.data_transfer_size
    }

    /// Whether the capability set from the last GET includes `command`.
    pub fn supports(&self, command: Command) -> bool {
        self.commands.contains(&(command as u8))
    }

    pub fn extended_erase_supported(&self) -> bool {
        self.extended_erase
    }

    /// Power-cycle the target into system-memory boot, synchronize the
    /// bootloader and identify the device.
    ///
    /// `startup` overrides the wait after reset release; the ST ROM needs
    /// time to set up its auto-baud detector before the sync byte arrives.
    pub fn reset_from_system_memory(&mut self, startup: Option<Duration>) -> Result<()> {
        let startup = startup.unwrap_or(target::DEFAULT_SYSTEM_STARTUP);
        self.state = BootState::Synchronizing;
        target::enter_system_boot(self.link.probe_mut(), startup)?;
        self.link.flush()?;
        if let Err(error) = self.synchronize() {
            self.state = BootState::Cold;
            return Err(error);
        }
        self.state = BootState::Live;
        let id = self.get_id()?;
        if self.device.is_none() {
            info!("device 0x{id:03X} not in catalog, using defaults");
        }
        Ok(())
    }

    /// Power-cycle the target back into user flash. The bootloader is gone
    /// afterwards and live-only commands are rejected.
    pub fn reset_from_flash(&mut self, startup: Option<Duration>) -> Result<()> {
        let startup = startup.unwrap_or(target::DEFAULT_FLASH_STARTUP);
        target::enter_user_boot(self.link.probe_mut(), startup)?;
        self.state = BootState::Cold;
        Ok(())
    }

    /// Wake the bootloader with the 0x7F sync byte. A NACK also counts as
    /// alive: it means this power cycle already synchronized once.
    fn synchronize(&mut self) -> Result<()> {
        for attempt in 0..SYNCHRONIZE_ATTEMPTS {
            if attempt > 0 {
                warn!("bootloader activation timeout, retrying");
                // the leading zero re-aligns the auto-baud detector
                self.link.send(&[0x00, Command::Synchronize as u8])?;
            } else {
                self.link.send(&[Command::Synchronize as u8])?;
            }
            match self.link.recv_byte() {
                Ok(codec::ACK) | Ok(codec::NACK) => {
                    debug!("bootloader is alive");
                    return Ok(());
                }
                Ok(other) => debug!("unexpected sync reply 0x{other:02X}"),
                Err(Error::Timeout) => debug!("no reply to sync byte"),
                Err(error) => return Err(error),
            }
        }
        Err(Error::SyncFailed)
    }

    /// GET: capability discovery. Returns the protocol version byte
    /// followed by the supported opcodes, and records both.
    pub fn get(&mut self) -> Result<Vec<u8>> {
        self.ensure_live()?;
        self.command(Command::Get)?;
        let header = self.link.recv(2)?;
        let commands = self.link.recv(header[0] as usize)?;
        self.read_ack()?;
        self.extended_erase = commands.contains(&(Command::ExtendedErase as u8));
        debug!("available commands: {:02X?}", commands);
        self.commands = commands;
        let mut reply = vec![header[1]];
        reply.extend_from_slice(&self.commands);
        Ok(reply)
    }

    /// GET_VERSION: the bootloader protocol version byte.
    pub fn get_version(&mut self) -> Result<u8> {
        self.ensure_live()?;
        self.command(Command::GetVersion)?;
        let reply = self.link.recv(3)?;
        self.read_ack()?;
        debug!(
            "protocol version 0x{:02X}, option bytes 0x{:02X} 0x{:02X}",
            reply[0], reply[1], reply[2]
        );
        Ok(reply[0])
    }

    /// GET_ID: the product ID, composed big-endian. A catalog match
    /// installs the device record and its flash geometry.
    pub fn get_id(&mut self) -> Result<u32> {
        self.ensure_live()?;
        self.command(Command::GetId)?;
        let count = self.link.recv_byte()? as usize;
        let bytes = self.link.recv(count + 1)?;
        self.read_ack()?;
        let id = bytes.iter().fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte));
        info!("chip id 0x{id:03X}");
        if let Some(record) = self.catalog.get(id).cloned() {
            self.install_device(record);
        }
        Ok(id)
    }

    fn install_device(&mut self, record: DeviceRecord) {
        info!("target identified as {} ({})", record.name, record.series);
        self.flash_page_size = record.flash.page_size;
        self.device = Some(record);
    }

    /// The 96-bit unique ID, or `None` when the catalog has no address for
    /// the current device. No wire traffic happens in the `None` case.
    pub fn get_uid(&mut self) -> Result<Option<DeviceUid>> {
        let address = match self.device.as_ref().and_then(|d| d.universal_id) {
            Some(register) => register.address,
            None => return Ok(None),
        };
        let bytes = self.read_memory(address, UID_LENGTH)?;
        let mut uid = [0u8; UID_LENGTH];
        uid.copy_from_slice(&bytes);
        Ok(Some(DeviceUid(uid)))
    }

    /// The flash size in KiB from the device's flash-size register, or
    /// `None` when the address is unknown.
    pub fn get_flash_size(&mut self) -> Result<Option<u16>> {
        let address = match self.device.as_ref().and_then(|d| d.flash_size) {
            Some(register) => register.address,
            None => return Ok(None),
        };
        let bytes = self.read_memory(address, 2)?;
        Ok(Some(u16::from_le_bytes([bytes[0], bytes[1]])))
    }

    /// The one-byte bootloader ID, or `None` when the address is unknown.
    pub fn get_bootloader_id(&mut self) -> Result<Option<u8>> {
        let address = match self.device.as_ref().and_then(|d| d.bootloader) {
            Some(block) => block.id,
            None => return Ok(None),
        };
        Ok(Some(self.read_memory(address, 1)?[0]))
    }

    /// READ_MEMORY: one chunk of up to 256 bytes.
    pub fn read_memory(&mut self, address: u32, length: usize) -> Result<Vec<u8>> {
        self.ensure_live()?;
        if length == 0 {
            return Ok(Vec::new());
        }
        if length > self.data_transfer_size {
            return Err(Error::DataLength {
                requested: length,
                max: self.data_transfer_size,
            });
        }
        let length_request = codec::encode_read_length(length)?;
        self.command(Command::ReadMemory)?;
        self.link.send(&codec::encode_address(address))?;
        self.read_ack()?;
        self.link.send(&length_request)?;
        self.read_ack()?;
        self.link.recv(length)
    }

    /// Read an arbitrary range, split into 256-byte chunks in increasing
    /// address order.
    pub fn read_memory_data(&mut self, address: u32, length: usize) -> Result<Vec<u8>> {
        let chunks = length.div_ceil(self.data_transfer_size);
        debug!("reading {length} bytes in {chunks} chunks from 0x{address:08X}");
        let mut data = Vec::with_capacity(length);
        let mut address = address;
        let mut remaining = length;
        while remaining > 0 {
            let step = remaining.min(self.data_transfer_size);
            data.extend(self.read_memory(address, step)?);
            address += step as u32;
            remaining -= step;
        }
        Ok(data)
    }

    /// WRITE_MEMORY: one chunk of up to 256 bytes. The payload is padded
    /// with 0xFF to a 4-byte multiple on the wire. Zero-length writes are a
    /// no-op.
    pub fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.ensure_live()?;
        if data.is_empty() {
            return Ok(());
        }
        if data.len() > self.data_transfer_size {
            return Err(Error::DataLength {
                requested: data.len(),
                max: self.data_transfer_size,
            });
        }
        let payload = codec::encode_data(data)?;
        self.command(Command::WriteMemory)?;
        self.link.send(&codec::encode_address(address))?;
        self.read_ack()?;
        self.link.send(&payload)?;
        self.read_ack()
    }

    /// Write an arbitrary range, chunked like [`Session::read_memory_data`].
    pub fn write_memory_data(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let chunks = data.len().div_ceil(self.data_transfer_size);
        debug!("writing {} bytes in {chunks} chunks at 0x{address:08X}", data.len());
        for (index, chunk) in data.chunks(self.data_transfer_size).enumerate() {
            let chunk_address = address + (index * self.data_transfer_size) as u32;
            self.write_memory(chunk_address, chunk)?;
        }
        Ok(())
    }

    /// ERASE (classical): erase the given pages, or the whole flash when
    /// `pages` is `None` (the AN3155 `0xFF 0x00` global escape).
    pub fn erase_memory(&mut self, pages: Option<&[u8]>) -> Result<()> {
        self.ensure_live()?;
        let payload = match pages {
            Some(pages) => codec::encode_pages(pages)?,
            None => vec![0xFF, 0x00],
        };
        self.command(Command::Erase)?;
        self.link.send(&payload)?;
        self.read_ack()
    }

    /// EXTENDED_ERASE with a two-byte page list, or the mass erase when
    /// `pages` is `None`. Requires the capability advertised by a prior
    /// [`Session::get`].
    pub fn extended_erase_pages(&mut self, pages: Option<&[u16]>) -> Result<()> {
        let pages = match pages {
            Some(pages) => pages,
            None => return self.extended_erase_special(SpecialErase::Mass),
        };
        self.ensure_live()?;
        self.ensure_extended_erase()?;
        let payload = codec::encode_pages_extended(pages)?;
        self.command(Command::ExtendedErase)?;
        self.link.send(&payload)?;
        self.read_long_ack()
    }

    /// EXTENDED_ERASE with a bank selector payload.
    pub fn extended_erase_special(&mut self, mode: SpecialErase) -> Result<()> {
        self.ensure_live()?;
        self.ensure_extended_erase()?;
        debug!("extended erase, {mode:?} mode");
        self.command(Command::ExtendedErase)?;
        self.link.send(&mode.payload())?;
        self.read_long_ack()
    }

    /// WRITE_PROTECT: enable write protection on the given pages.
    pub fn write_protect(&mut self, pages: &[u8]) -> Result<()> {
        self.ensure_live()?;
        let payload = codec::encode_pages(pages)?;
        self.command(Command::WriteProtect)?;
        self.link.send(&payload)?;
        self.read_ack()
    }

    /// WRITE_UNPROTECT: disable write protection on the whole flash.
    pub fn write_unprotect(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.command(Command::WriteUnprotect)?;
        self.read_ack()
    }

    /// READOUT_PROTECT: enable readout protection.
    pub fn readout_protect(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.command(Command::ReadoutProtect)
    }

    /// READOUT_UNPROTECT: disable readout protection. A locked device mass
    /// erases itself first, then resets; on success the session re-enters
    /// system-memory boot and synchronizes again.
    pub fn readout_unprotect(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.command(Command::ReadoutUnprotect)?;
        info!("mass erase in progress, this may take a while");
        self.read_long_ack()?;
        debug!("target reset itself, synchronizing again");
        self.reset_from_system_memory(None)
    }

    /// GO: jump to the application at `address`. The bootloader stops
    /// responding afterwards.
    pub fn go(&mut self, address: u32) -> Result<()> {
        self.ensure_live()?;
        self.command(Command::Go)?;
        self.link.send(&codec::encode_address(address))?;
        self.read_ack()?;
        info!("jumped to 0x{address:08X}");
        self.state = BootState::Gone;
        Ok(())
    }

    /// Page indices covering `[start, end)`, both given as page-aligned
    /// offsets from the start of flash.
    pub fn pages_from_range(&self, start: u32, end: u32) -> Result<Vec<u16>> {
        let page_size = self.flash_page_size;
        for address in [start, end] {
            if address % page_size != 0 {
                return Err(Error::PageAlignment { address, page_size });
            }
        }
        let first = start / page_size;
        let last = end / page_size;
        if last > u16::MAX as u32 + 1 {
            return Err(Error::PageCount {
                count: (last - first) as usize,
                max: codec::MAX_EXTENDED_ERASE_PAGES,
            });
        }
        Ok((first..last).map(|page| page as u16).collect())
    }

    fn ensure_live(&self) -> Result<()> {
        match self.state {
            BootState::Live => Ok(()),
            _ => Err(Error::NotSynchronized),
        }
    }

    fn ensure_extended_erase(&self) -> Result<()> {
        if self.extended_erase {
            Ok(())
        } else {
            Err(Error::Unsupported("extended erase"))
        }
    }

    /// Send a command envelope and wait for its ACK.
    fn command(&mut self, command: Command) -> Result<()> {
        debug!("sending {command:?} command");
        self.link.send(&command.frame())?;
        self.read_ack()
    }

    fn read_ack(&mut self) -> Result<()> {
        codec::decode_ack(self.link.recv_byte()?)
    }

    /// Wait for the terminal ACK of a long-running command with a raised
    /// receive deadline, restoring the previous deadline on every path.
    fn read_long_ack(&mut self) -> Result<()> {
        let previous = self.link.timeout();
        self.link.set_timeout(LONG_OPERATION_TIMEOUT)?;
        let result = self.read_ack();
        self.link.set_timeout(previous)?;
        result
    }
}
