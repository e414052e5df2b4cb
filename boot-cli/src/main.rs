use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use log::info;
use stm32boot::{Catalog, SerialProbe, Session, SpecialErase, FLASH_BASE_ADDRESS};

#[derive(clap::Parser)]
#[command(author, version, about, long_about = None)]
struct Opt {
    /// Probe serial port
    #[arg(short, long, default_value_t = String::from("/dev/ttyUSB0"))]
    port: String,

    /// Directory with additional device description files
    #[arg(short, long)]
    devices: Option<PathBuf>,

    /// Seconds to wait for the ST ROM after releasing reset
    #[arg(short, long, default_value_t = 2.7)]
    startup: f64,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Print bootloader and device identity
    Info,
    /// Read memory into a file, or hex dump it to stdout
    Read {
        /// Starting address
        #[arg(short, long, default_value_t = String::from("0x08000000"))]
        address: String,

        /// Number of bytes to read
        #[arg(short, long)]
        length: usize,

        /// Output file for the raw bytes
        file: Option<PathBuf>,
    },
    /// Write a raw binary file to flash
    Write {
        /// Starting address
        #[arg(short, long, default_value_t = String::from("0x08000000"))]
        address: String,

        /// Filename of raw firmware binary
        file: PathBuf,

        /// Read the range back and compare
        #[arg(short, long)]
        verify: bool,
    },
    /// Erase the flash pages covering a range, or whole banks
    Erase {
        /// Starting address, on a page boundary
        #[arg(short, long, default_value_t = String::from("0x08000000"))]
        address: String,

        /// Number of bytes to erase, a multiple of the page size
        #[arg(short, long, default_value_t = 0)]
        length: usize,

        /// Erase whole banks instead of a range (extended erase only)
        #[arg(short, long, value_enum)]
        mode: Option<EraseMode>,
    },
    /// Enable or disable readout/write protection
    Protect {
        #[arg(short, long, value_enum, default_value = "read")]
        mode: ProtectKind,

        #[arg(long, value_enum, default_value = "disable")]
        state: ProtectState,

        /// Range to write-protect
        #[arg(short, long, default_value_t = String::from("0x08000000"))]
        address: String,

        #[arg(short, long, default_value_t = 0)]
        length: usize,
    },
    /// Jump to the application at the given address
    Go {
        #[arg(short, long, default_value_t = String::from("0x08000000"))]
        address: String,
    },
    /// List the devices known to the catalog
    Devices,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum EraseMode {
    Mass,
    Bank1,
    Bank2,
}

impl From<EraseMode> for SpecialErase {
    fn from(mode: EraseMode) -> Self {
        match mode {
            EraseMode::Mass => SpecialErase::Mass,
            EraseMode::Bank1 => SpecialErase::Bank1,
            EraseMode::Bank2 => SpecialErase::Bank2,
        }
    }
}

#[derive(Clone, Copy, PartialEq, clap::ValueEnum)]
enum ProtectKind {
    Read,
    Write,
}

#[derive(Clone, Copy, PartialEq, clap::ValueEnum)]
enum ProtectState {
    Enable,
    Disable,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Opt::parse();

    let mut catalog = Catalog::builtin().context("Failed to parse built-in device descriptions")?;
    if let Some(dir) = &cli.devices {
        let extra = Catalog::load_dir(dir).with_context(|| {
            format!("Failed to load device descriptions from {}", dir.display())
        })?;
        catalog.merge(extra);
    }

    if matches!(cli.command, Command::Devices) {
        list_devices(&catalog);
        return Ok(());
    }

    let probe =
        SerialProbe::open(&cli.port, 115_200).context("Failed to open probe serial port")?;
    let mut session = Session::new(probe, catalog)?;
    session
        .reset_from_system_memory(Some(Duration::from_secs_f64(cli.startup)))
        .context("Failed to bring up the bootloader, consider a longer --startup")?;

    match cli.command {
        Command::Devices => unreachable!(),
        Command::Info => print_info(&mut session)?,
        Command::Read {
            address,
            length,
            file,
        } => {
            let address = parse_address(&address)?;
            let data = session.read_memory_data(address, length)?;
            match file {
                Some(path) => {
                    fs::write(&path, &data)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("wrote {} bytes to {}", data.len(), path.display());
                }
                None => hex_dump(address, &data),
            }
        }
        Command::Write {
            address,
            file,
            verify,
        } => {
            let address = parse_address(&address)?;
            let data =
                fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?;
            info!("writing {} bytes from {} to 0x{address:08X}", data.len(), file.display());
            session.write_memory_data(address, &data)?;
            if verify {
                info!("reading back memory for verification");
                let reload = session.read_memory_data(address, data.len())?;
                if reload != data {
                    bail!("Verification failed");
                }
                info!("verification successful");
            }
        }
        Command::Erase {
            address,
            length,
            mode,
        } => {
            let address = parse_address(&address)?;
            // capability discovery picks the erase flavor
            session.get()?;
            match mode {
                Some(mode) => session.extended_erase_special(mode.into())?,
                None => {
                    if length == 0 {
                        bail!("Nothing to erase, give --length or --mode");
                    }
                    let pages = range_pages(&session, address, length)?;
                    if session.extended_erase_supported() {
                        session.extended_erase_pages(Some(&pages))?;
                    } else {
                        session.erase_memory(Some(&narrow_pages(&pages)?))?;
                    }
                }
            }
        }
        Command::Protect {
            mode,
            state,
            address,
            length,
        } => match (mode, state) {
            (ProtectKind::Read, ProtectState::Enable) => session.readout_protect()?,
            (ProtectKind::Read, ProtectState::Disable) => session.readout_unprotect()?,
            (ProtectKind::Write, ProtectState::Enable) => {
                if length == 0 {
                    bail!("Nothing to protect, give --length");
                }
                let address = parse_address(&address)?;
                let pages = range_pages(&session, address, length)?;
                session.write_protect(&narrow_pages(&pages)?)?;
            }
            (ProtectKind::Write, ProtectState::Disable) => session.write_unprotect()?,
        },
        Command::Go { address } => {
            let address = parse_address(&address)?;
            session.go(address)?;
        }
    }

    Ok(())
}

fn print_info(session: &mut Session<SerialProbe>) -> anyhow::Result<()> {
    let reply = session.get()?;
    let version = session.get_version()?;
    println!("Bootloader version: {}.{}", version >> 4, version & 0x0F);
    print!("Available commands:");
    for opcode in &reply[1..] {
        print!(" 0x{opcode:02X}");
    }
    println!();
    match session.device() {
        Some(device) => println!(
            "Device: {} ({}, {})",
            device.name, device.series, device.cpu
        ),
        None => println!("Device: not in catalog"),
    }
    match session.get_uid()? {
        Some(uid) => println!("Unique ID: {uid}"),
        None => println!("Unique ID: address unknown"),
    }
    match session.get_flash_size()? {
        Some(size) => println!("Flash size: {size} KiB"),
        None => println!("Flash size: not supported"),
    }
    match session.get_bootloader_id()? {
        Some(id) => println!("Bootloader ID: 0x{id:02X}"),
        None => println!("Bootloader ID: address unknown"),
    }
    Ok(())
}

fn list_devices(catalog: &Catalog) {
    let mut records: Vec<_> = catalog.records().collect();
    records.sort_by_key(|record| record.device_id);
    for record in records {
        println!(
            "0x{:03X}  {:<20} {:<10} {:<12} {}",
            record.device_id, record.name, record.series, record.cpu, record.description
        );
    }
}

/// Page indices for an absolute address range, checked against the flash
/// base and the device page size.
fn range_pages(
    session: &Session<SerialProbe>,
    address: u32,
    length: usize,
) -> anyhow::Result<Vec<u16>> {
    if address < FLASH_BASE_ADDRESS {
        bail!("Start address below flash base 0x{FLASH_BASE_ADDRESS:08X}");
    }
    let start = address - FLASH_BASE_ADDRESS;
    let pages = session.pages_from_range(start, start + length as u32)?;
    Ok(pages)
}

fn narrow_pages(pages: &[u16]) -> anyhow::Result<Vec<u8>> {
    if let Some(page) = pages.iter().find(|&&page| page > u8::MAX.into()) {
        bail!("Page {page} out of range for the classical page commands");
    }
    Ok(pages.iter().map(|&page| page as u8).collect())
}

fn parse_address(text: &str) -> anyhow::Result<u32> {
    u32::from_str_radix(text.trim_start_matches("0x"), 16)
        .with_context(|| format!("Unable to parse address from string: {text}"))
}

fn hex_dump(base: u32, data: &[u8]) {
    for (index, row) in data.chunks(16).enumerate() {
        print!("{:08X}:", base as usize + index * 16);
        for byte in row {
            print!(" {byte:02X}");
        }
        println!();
    }
}
