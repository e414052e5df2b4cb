//! Command framing for the ST serial bootloader.
//!
//! Every host-to-target group is one of three shapes: an `(opcode, !opcode)`
//! pair, a 4-byte big-endian address followed by its XOR, or a payload whose
//! last byte is the XOR of everything before it. See ST AN3155 and AN4872.

use crate::{Error, Result};

/// Positive reply byte.
pub const ACK: u8 = 0x79;
/// Negative reply byte.
pub const NACK: u8 = 0x1F;

/// Largest payload a single read or write command can carry.
pub const MAX_TRANSFER_SIZE: usize = 256;
/// Largest page list the classical erase command accepts.
pub const MAX_ERASE_PAGES: usize = 255;
/// Largest page list the extended erase command accepts.
pub const MAX_EXTENDED_ERASE_PAGES: usize = 65_535;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Gets the allowed commands supported by the current protocol version.
    Get = 0x00,
    /// Gets the protocol version and the option bytes.
    GetVersion = 0x01,
    /// Gets the chip product ID.
    GetId = 0x02,
    /// Reads up to 256 bytes of memory starting from a given address.
    ReadMemory = 0x11,
    /// Jumps to application code in flash or SRAM.
    Go = 0x21,
    /// Writes up to 256 bytes to RAM or flash starting from a given address.
    WriteMemory = 0x31,
    /// Erases from one to all flash pages.
    Erase = 0x43,
    /// Erase with two-byte page addressing (USART bootloader v3.0 and up).
    ExtendedErase = 0x44,
    /// Enables write protection for some pages.
    WriteProtect = 0x63,
    /// Disables write protection for all pages.
    WriteUnprotect = 0x73,
    /// Enables readout protection.
    ReadoutProtect = 0x82,
    /// Disables readout protection.
    ReadoutUnprotect = 0x92,
    /// Wakes the bootloader and locks the auto-baud detector.
    Synchronize = 0x7F,
}

impl Command {
    /// The `(opcode, opcode XOR 0xFF)` pair every command except
    /// [`Command::Synchronize`] is transmitted as.
    pub fn frame(self) -> [u8; 2] {
        let opcode = self as u8;
        [opcode, opcode ^ 0xFF]
    }
}

/// XOR of all bytes in the slice.
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, byte| acc ^ byte)
}

/// Four big-endian address bytes followed by their XOR.
pub fn encode_address(address: u32) -> [u8; 5] {
    let bytes = address.to_be_bytes();
    [bytes[0], bytes[1], bytes[2], bytes[3], xor_checksum(&bytes)]
}

/// Classical erase and write-protect page list:
/// `[count-1, page..., xor of all emitted bytes]`.
pub fn encode_pages(pages: &[u8]) -> Result<Vec<u8>> {
    if pages.is_empty() || pages.len() > MAX_ERASE_PAGES {
        return Err(Error::PageCount {
            count: pages.len(),
            max: MAX_ERASE_PAGES,
        });
    }
    let mut out = Vec::with_capacity(pages.len() + 2);
    out.push((pages.len() - 1) as u8);
    out.extend_from_slice(pages);
    out.push(xor_checksum(&out));
    Ok(out)
}

/// Extended erase page list:
/// `[count-1 as u16 BE, page as u16 BE..., xor of all emitted bytes]`.
pub fn encode_pages_extended(pages: &[u16]) -> Result<Vec<u8>> {
    if pages.is_empty() || pages.len() > MAX_EXTENDED_ERASE_PAGES {
        return Err(Error::PageCount {
            count: pages.len(),
            max: MAX_EXTENDED_ERASE_PAGES,
        });
    }
    let count = (pages.len() - 1) as u16;
    let mut out = Vec::with_capacity(2 * pages.len() + 3);
    out.extend_from_slice(&count.to_be_bytes());
    for page in pages {
        out.extend_from_slice(&page.to_be_bytes());
    }
    out.push(xor_checksum(&out));
    Ok(out)
}

/// Write-memory payload: `[len-1, data..., xor]`, with the data padded to a
/// 4-byte multiple with 0xFF (the erased-flash value) before length and
/// checksum are computed.
pub fn encode_data(data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() || data.len() > MAX_TRANSFER_SIZE {
        return Err(Error::DataLength {
            requested: data.len(),
            max: MAX_TRANSFER_SIZE,
        });
    }
    let padded_len = data.len().next_multiple_of(4);
    let mut out = Vec::with_capacity(padded_len + 2);
    out.push((padded_len - 1) as u8);
    out.extend_from_slice(data);
    out.resize(padded_len + 1, 0xFF);
    out.push(xor_checksum(&out));
    Ok(out)
}

/// Read-memory length request: `[n-1, (n-1) XOR 0xFF]`.
pub fn encode_read_length(length: usize) -> Result<[u8; 2]> {
    if length == 0 || length > MAX_TRANSFER_SIZE {
        return Err(Error::DataLength {
            requested: length,
            max: MAX_TRANSFER_SIZE,
        });
    }
    let n = (length - 1) as u8;
    Ok([n, n ^ 0xFF])
}

/// Classify a reply byte.
pub fn decode_ack(byte: u8) -> Result<()> {
    match byte {
        ACK => Ok(()),
        NACK => Err(Error::Nack),
        other => Err(Error::UnexpectedReply(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_frames_pair_opcode_with_complement() {
        assert_eq!(Command::Get.frame(), [0x00, 0xFF]);
        assert_eq!(Command::WriteMemory.frame(), [0x31, 0xCE]);
        assert_eq!(Command::ExtendedErase.frame(), [0x44, 0xBB]);
        assert_eq!(Command::ReadoutUnprotect.frame(), [0x92, 0x6D]);
    }

    #[test]
    fn address_is_big_endian_with_xor() {
        assert_eq!(encode_address(0x0800_0000), [0x08, 0x00, 0x00, 0x00, 0x08]);
        assert_eq!(encode_address(0x2000_0100), [0x20, 0x00, 0x01, 0x00, 0x21]);
    }

    #[test]
    fn data_payload_matches_write_trace() {
        // 4 bytes need no padding: [len-1, data, xor]
        let payload = encode_data(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        assert_eq!(
            payload,
            vec![0x03, 0xDE, 0xAD, 0xBE, 0xEF, 0x03 ^ 0xDE ^ 0xAD ^ 0xBE ^ 0xEF]
        );
    }

    #[test]
    fn data_payload_pads_to_four_byte_multiple() {
        let payload = encode_data(&[0x01, 0x02, 0x03, 0x04, 0x05]).unwrap();
        let data = &payload[1..payload.len() - 1];
        assert_eq!(data.len() % 4, 0);
        assert_eq!(payload[0] as usize, data.len() - 1);
        assert_eq!(&data[5..], &[0xFF, 0xFF, 0xFF]);
        assert_eq!(*payload.last().unwrap(), xor_checksum(&payload[..payload.len() - 1]));
    }

    #[test]
    fn data_payload_rejects_oversized_and_empty_chunks() {
        assert!(matches!(
            encode_data(&[0u8; 257]),
            Err(Error::DataLength { requested: 257, max: 256 })
        ));
        assert!(encode_data(&[]).is_err());
        // a full window pads to itself
        assert_eq!(encode_data(&[0xAB; 256]).unwrap().len(), 258);
    }

    #[test]
    fn classical_page_list_checksums_count_and_pages() {
        let payload = encode_pages(&[3, 4, 5]).unwrap();
        assert_eq!(payload, vec![0x02, 3, 4, 5, 0x02 ^ 3 ^ 4 ^ 5]);
        assert!(encode_pages(&[0u8; 256]).is_err());
        assert!(encode_pages(&[]).is_err());
    }

    #[test]
    fn extended_page_list_uses_u16_big_endian() {
        let payload = encode_pages_extended(&[0x0102, 0x0304]).unwrap();
        let expected_xor = xor_checksum(&[0x00, 0x01, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(payload, vec![0x00, 0x01, 0x01, 0x02, 0x03, 0x04, expected_xor]);
    }

    #[test]
    fn read_length_pair_is_complemented() {
        assert_eq!(encode_read_length(4).unwrap(), [0x03, 0xFC]);
        assert_eq!(encode_read_length(256).unwrap(), [0xFF, 0x00]);
        assert!(encode_read_length(257).is_err());
        assert!(encode_read_length(0).is_err());
    }

    #[test]
    fn ack_decode_classifies_every_byte() {
        assert!(decode_ack(ACK).is_ok());
        assert!(matches!(decode_ack(NACK), Err(Error::Nack)));
        assert!(matches!(decode_ack(0x42), Err(Error::UnexpectedReply(0x42))));
    }
}
