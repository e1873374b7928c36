//! The binary image codec (spec §3, §4.1).
//!
//! A Pendragon image is a small header (machine identity, program name)
//! followed by a data segment and a code segment, all little-endian. This
//! module is a leaf: it knows nothing about the assembler's code graph or
//! the CPU, only about bytes in and bytes out.

use crate::error::ImageError;

/// ASCII name every image must advertise; anything else is rejected.
pub const MACHINE_NAME: &str = "Pendragon";

/// `(major, minor, revision)` stamped into both the header-version and the
/// machine-version fields of every image this crate writes.
pub const VERSION: (u8, u8, u16) = (1, 0, 0);

/// Program names longer than this are truncated by the writer (spec §4.1).
pub const MAX_PROGRAM_NAME_LEN: usize = 32;

/// The parsed header of an image, with the program name already decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub header_size: u16,
    pub header_version: (u8, u8, u16),
    pub machine_version: (u8, u8, u16),
    pub program_name: String,
}

/// A decoded image: the header plus the raw data and code segments.
///
/// Placing these is the caller's job (loading the data segment into a data
/// context, the code segment into a code context) — this type only
/// guarantees the bytes were framed correctly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub header: Header,
    pub data: Vec<u8>,
    pub code: Vec<u8>,
}

/// A cursor over a byte slice that fails loudly instead of panicking on a
/// short read, the way every reader in this crate is expected to behave.
struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ImageError> {
        let available = self.bytes.len().saturating_sub(self.offset);
        if available < len {
            return Err(ImageError::TruncatedImage {
                needed: len - available,
                available,
            });
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ImageError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ImageError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, ImageError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a `(major, minor, revision)` version field: one byte major,
    /// one byte minor, then a little-endian `u16` revision.
    fn version(&mut self) -> Result<(u8, u8, u16), ImageError> {
        let major = self.u8()?;
        let minor = self.u8()?;
        let revision = self.u16()?;
        Ok((major, minor, revision))
    }

    fn ascii(&mut self, len: usize) -> Result<String, ImageError> {
        let bytes = self.take(len)?;
        Ok(bytes.iter().map(|&byte| byte as char).collect())
    }
}

fn push_version(out: &mut Vec<u8>, version: (u8, u8, u16)) {
    out.push(version.0);
    out.push(version.1);
    out.extend_from_slice(&version.2.to_le_bytes());
}

/// Assembles a binary image from already-encoded data and code segments.
///
/// `program_name` is truncated to [`MAX_PROGRAM_NAME_LEN`] bytes if longer
/// (spec §4.1). Truncation happens on raw bytes, matching the on-the-wire
/// ASCII encoding, not on Unicode scalar boundaries.
pub fn write(program_name: &str, data: &[u8], code: &[u8]) -> Vec<u8> {
    let mut name_bytes = program_name.as_bytes().to_vec();
    name_bytes.truncate(MAX_PROGRAM_NAME_LEN);

    let machine_name = MACHINE_NAME.as_bytes();
    let header_size = 6 + 1 + machine_name.len() + 4 + 2 + name_bytes.len();

    let mut out = Vec::with_capacity(
        header_size + 4 + data.len() + 4 + code.len(),
    );
    out.extend_from_slice(&(header_size as u16).to_le_bytes());
    push_version(&mut out, VERSION);
    out.push(machine_name.len() as u8);
    out.extend_from_slice(machine_name);
    push_version(&mut out, VERSION);
    out.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
    out.extend_from_slice(&name_bytes);

    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(&(code.len() as u32).to_le_bytes());
    out.extend_from_slice(code);
    out
}

/// Parses and validates a binary image, per spec §4.1's field-by-field
/// reader and §3's layout table.
pub fn read(bytes: &[u8]) -> Result<Image, ImageError> {
    let mut reader = Reader::new(bytes);

    let header_size = reader.u16()?;
    let header_version = reader.version()?;
    if header_version != VERSION {
        return Err(ImageError::UnsupportedHeaderVersion {
            major: header_version.0,
            minor: header_version.1,
            revision: header_version.2,
        });
    }

    let machine_name_len = reader.u8()? as usize;
    let machine_name = reader.ascii(machine_name_len)?;
    if machine_name != MACHINE_NAME {
        return Err(ImageError::WrongMachine {
            found: machine_name,
        });
    }

    let machine_version = reader.version()?;
    if machine_version != VERSION {
        return Err(ImageError::WrongMachineVersion {
            major: machine_version.0,
            minor: machine_version.1,
            revision: machine_version.2,
        });
    }

    let program_name_len = reader.u16()? as usize;
    let program_name = reader.ascii(program_name_len)?;

    let data_len = reader.u32()? as usize;
    let data = reader.take(data_len)?.to_vec();

    let code_len = reader.u32()? as usize;
    let code = reader.take(code_len)?.to_vec();

    Ok(Image {
        header: Header {
            header_size,
            header_version,
            machine_version,
            program_name,
        },
        data,
        code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_identity() {
        let bytes = write("hello", &[1, 2, 3], &[0xAA, 0xBB]);
        let image = read(&bytes).unwrap();
        assert_eq!(image.header.program_name, "hello");
        assert_eq!(image.data, vec![1, 2, 3]);
        assert_eq!(image.code, vec![0xAA, 0xBB]);

        let rewritten = write(&image.header.program_name, &image.data, &image.code);
        assert_eq!(bytes, rewritten);
    }

    #[test]
    fn empty_segments_round_trip() {
        let bytes = write("empty", &[], &[]);
        let image = read(&bytes).unwrap();
        assert!(image.data.is_empty());
        assert!(image.code.is_empty());
    }

    #[test]
    fn long_program_name_is_truncated_to_32_bytes() {
        let name: String = "x".repeat(500);
        let bytes = write(&name, &[], &[]);
        let image = read(&bytes).unwrap();
        assert_eq!(image.header.program_name.len(), MAX_PROGRAM_NAME_LEN);
    }

    #[test]
    fn wrong_machine_name_is_rejected() {
        let mut bytes = write("p", &[], &[]);
        // Machine name starts right after the 2-byte size and 4-byte version fields.
        let name_len_offset = 6;
        let name_start = name_len_offset + 1;
        bytes[name_start..name_start + MACHINE_NAME.len()].copy_from_slice(b"Unknown\0\0");
        let err = read(&bytes).unwrap_err();
        assert!(matches!(err, ImageError::WrongMachine { .. }));
    }

    #[test]
    fn truncated_code_segment_length_is_rejected() {
        let mut bytes = write("p", &[], &[1, 2, 3, 4]);
        let len = bytes.len();
        bytes.truncate(len - 2);
        let err = read(&bytes).unwrap_err();
        assert!(matches!(err, ImageError::TruncatedImage { .. }));
    }
}
