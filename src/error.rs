use std::io;

use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(ThisError, Debug)]
pub enum Error {
    /// The receive deadline elapsed before the target answered.
    #[error("timed out waiting for the target")]
    Timeout,

    #[error("received a NACK from the bootloader")]
    Nack,

    /// The target sent a byte that is neither ACK nor NACK.
    #[error("received 0x{0:02X} instead of ACK or NACK")]
    UnexpectedReply(u8),

    /// Both synchronization attempts failed.
    #[error("bad reply from bootloader")]
    SyncFailed,

    /// A command that needs a live bootloader was issued while the target
    /// is cold or already running user code.
    #[error("bootloader is not active, reset to system memory first")]
    NotSynchronized,

    #[error("can not transfer more than {max} bytes at once, got {requested}")]
    DataLength { requested: usize, max: usize },

    #[error("can not select more than {max} pages at once, got {count}")]
    PageCount { count: usize, max: usize },

    #[error("address 0x{address:08X} is not on a {page_size} byte page boundary")]
    PageAlignment { address: u32, page_size: u32 },

    #[error("{0} is not supported by the target bootloader")]
    Unsupported(&'static str),

    #[error("invalid device description: {0}")]
    Catalog(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}
