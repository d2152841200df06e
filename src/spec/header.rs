//! Header block codec.
//!
//! Both index kinds start with a header block that records how the file was
//! built. The first 101 bytes are fixed fields; from offset 101 on the block
//! holds the source name and every build argument, each terminated by
//! [`EOR`], with the rest of the block filled with [`DEL`].
//!
//! ISI header (one block, `block_size` bytes):
//!
//! | Offset | Len | Content |
//! |--------|-----|---------|
//! | 0      | 1   | `i` while building, `I` when complete |
//! | 1      | 24  | four 6-byte pointers: 0, deleted chain, top block, high block |
//! | 41     | 5   | block size, right-justified decimal |
//! | 54     | 1   | `L` |
//! | 55     | 1   | `T` for text marker |
//! | 56     | 1   | `D` when duplicates are allowed |
//! | 57     | 1   | `S` for fixed-length records |
//! | 58     | 2   | key size: tens (digit, or `A`.. from 100) then ones |
//! | 64     | 5   | fixed record length |
//! | 98     | 2   | version `10` |
//! | 100    | 1   | `EOR` |
//!
//! AIM header (1024 bytes):
//!
//! | Offset | Len | Content |
//! |--------|-----|---------|
//! | 0      | 1   | `a` while building, `A` when complete |
//! | 7      | 6   | first deleted record number + 1 |
//! | 13     | 6   | record count |
//! | 32     | 5   | slot count |
//! | 41     | 5   | record length (256 for variable) |
//! | 55     | 1   | `T` for text marker |
//! | 57     | 1   | `Y` distinct, `N` case folded |
//! | 58     | 1   | match wildcard |
//! | 59     | 1   | `S` reclaim, `F` fixed, `V` variable |
//! | 60     | 6   | secondary record count |
//! | 99     | 1   | version `9` |
//! | 100    | 1   | `EOR` |

use crate::error::{BuildError, Result};
use crate::utils::encoding::{decode_pointer, encode_pointer, read_decimal, write_decimal};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Record separator between stored arguments.
pub const EOR: u8 = 0xFA;
/// Padding and deleted marker.
pub const DEL: u8 = 0xFF;
/// Offset of the stored source name.
pub const NAME_OFFSET: usize = 101;
/// Bytes rewritten when an ISI build completes.
pub const TRAILER_LEN: usize = 25;

pub const ISI_VERSION: u32 = 10;
pub const AIM_VERSION: u32 = 9;
pub const AIM_HEADER_SIZE: usize = 1024;
const MIN_ISI_HEADER: usize = 512;
const LEGACY_NAME_FIELD: usize = 64;

/// Which header layout a file uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Isi,
    Aim,
}

/// Fixed fields of an ISI header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsiHeader {
    pub block_size: usize,
    pub text_marker: bool,
    pub allow_duplicates: bool,
    pub fixed_length: Option<usize>,
    pub key_size: usize,
}

/// Pointers written into the ISI header once the tree is complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IsiPointers {
    pub delete_chain: u64,
    pub top_block: u64,
    pub high_block: u64,
}

impl IsiPointers {
    /// First [`TRAILER_LEN`] bytes of a completed header.
    pub fn encode(&self) -> [u8; TRAILER_LEN] {
        let mut out = [0u8; TRAILER_LEN];
        out[0] = b'I';
        encode_pointer(0, &mut out[1..7]);
        encode_pointer(self.delete_chain, &mut out[7..13]);
        encode_pointer(self.top_block, &mut out[13..19]);
        encode_pointer(self.high_block, &mut out[19..25]);
        out
    }

    pub fn decode(header: &[u8]) -> Self {
        Self {
            delete_chain: decode_pointer(&header[7..13]),
            top_block: decode_pointer(&header[13..19]),
            high_block: decode_pointer(&header[19..25]),
        }
    }
}

impl IsiHeader {
    /// Build the in-progress header block.
    pub fn encode(&self, source_name: &str, arguments: &[String]) -> Result<Vec<u8>> {
        let mut block = vec![0u8; self.block_size];
        block[0] = b'i';
        block[25..100].fill(b' ');
        write_decimal(self.block_size as u64, &mut block[41..46]);
        block[54] = b'L';
        if self.text_marker {
            block[55] = b'T';
        }
        if self.allow_duplicates {
            block[56] = b'D';
        }
        if let Some(len) = self.fixed_length {
            block[57] = b'S';
            write_decimal(len as u64, &mut block[64..69]);
        }
        let size = self.key_size;
        if size > 99 {
            block[58] = b'A' + ((size - 100) / 10) as u8;
        } else if size > 9 {
            block[58] = b'0' + (size / 10) as u8;
        }
        block[59] = b'0' + (size % 10) as u8;
        block[98] = b'1';
        block[99] = b'0';
        block[100] = EOR;
        write_argument_area(&mut block, source_name, arguments)?;
        Ok(block)
    }

    pub fn decode(header: &[u8]) -> Result<Self> {
        if header.len() < NAME_OFFSET {
            return Err(BuildError::BadHeader("Invalid index".into()));
        }
        let block_size = read_decimal(&header[41..46])
            .ok_or_else(|| BuildError::BadHeader("Invalid index".into()))? as usize;
        let tens = match header[58] {
            c @ b'A'..=b'Z' => 100 + (c - b'A') as usize * 10,
            c @ b'0'..=b'9' => (c - b'0') as usize * 10,
            _ => 0,
        };
        let key_size = tens + header[59].wrapping_sub(b'0') as usize % 10;
        let fixed_length = (header[57] == b'S')
            .then(|| read_decimal(&header[64..69]).map(|v| v as usize))
            .flatten();
        Ok(Self {
            block_size,
            text_marker: header[55] == b'T',
            allow_duplicates: header[56] == b'D',
            fixed_length,
            key_size,
        })
    }
}

/// Record organization flag of an AIM file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AimOrganization {
    Variable,
    Fixed,
    /// Fixed-length with a reclaim plane.
    Reclaim,
}

impl AimOrganization {
    fn tag(self) -> u8 {
        match self {
            AimOrganization::Variable => b'V',
            AimOrganization::Fixed => b'F',
            AimOrganization::Reclaim => b'S',
        }
    }
}

/// Fixed fields of an AIM header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AimHeader {
    pub slot_count: usize,
    pub record_length: usize,
    pub text_marker: bool,
    pub distinct: bool,
    pub wildcard: u8,
    pub organization: AimOrganization,
    pub record_count: u64,
    pub secondary_records: u64,
    /// First deleted record number + 1, zero when none.
    pub first_deleted: u64,
}

impl AimHeader {
    pub fn encode(&self, source_name: &str, arguments: &[String]) -> Result<Vec<u8>> {
        let mut block = vec![0u8; AIM_HEADER_SIZE];
        block[0] = b'a';
        encode_pointer(self.first_deleted, &mut block[7..13]);
        encode_pointer(self.record_count, &mut block[13..19]);
        block[28..100].fill(b' ');
        write_decimal(self.slot_count as u64, &mut block[32..37]);
        write_decimal(self.record_length as u64, &mut block[41..46]);
        if self.text_marker {
            block[55] = b'T';
        }
        block[57] = if self.distinct { b'Y' } else { b'N' };
        block[58] = self.wildcard;
        block[59] = self.organization.tag();
        encode_pointer(self.secondary_records, &mut block[60..66]);
        block[99] = b'9';
        block[100] = EOR;
        write_argument_area(&mut block, source_name, arguments)?;
        Ok(block)
    }

    pub fn decode(header: &[u8]) -> Result<Self> {
        if header.len() < NAME_OFFSET {
            return Err(BuildError::BadHeader("Invalid AIM header block".into()));
        }
        let organization = match header[59] {
            b'S' => AimOrganization::Reclaim,
            b'F' => AimOrganization::Fixed,
            _ => AimOrganization::Variable,
        };
        let slot_count = read_decimal(&header[32..37])
            .ok_or_else(|| BuildError::BadHeader("Invalid AIM header block".into()))?
            as usize;
        Ok(Self {
            slot_count,
            record_length: read_decimal(&header[41..46]).unwrap_or(0) as usize,
            text_marker: header[55] == b'T',
            distinct: header[57] == b'Y',
            wildcard: header[58],
            organization,
            record_count: decode_pointer(&header[13..19]),
            secondary_records: decode_pointer(&header[60..66]),
            first_deleted: decode_pointer(&header[7..13]),
        })
    }
}

/// Write name and arguments from [`NAME_OFFSET`], then fill with [`DEL`].
fn write_argument_area(block: &mut [u8], source_name: &str, arguments: &[String]) -> Result<()> {
    let needed = NAME_OFFSET
        + source_name.len()
        + 1
        + arguments.iter().map(|a| a.len() + 1).sum::<usize>();
    if needed > block.len() {
        return Err(BuildError::TooLong(
            "Block size is too small to hold the arguments".into(),
        ));
    }
    let mut pos = NAME_OFFSET;
    for part in std::iter::once(source_name).chain(arguments.iter().map(String::as_str)) {
        block[pos..pos + part.len()].copy_from_slice(part.as_bytes());
        pos += part.len();
        block[pos] = EOR;
        pos += 1;
    }
    block[pos..].fill(DEL);
    Ok(())
}

/// A header read back from an existing file, validated for its version.
#[derive(Debug, Clone)]
pub struct StoredHeader {
    format: IndexFormat,
    version: u32,
    bytes: Vec<u8>,
}

impl StoredHeader {
    /// Read and validate the header of an existing index.
    pub fn read(path: &Path, format: IndexFormat) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| BuildError::open(path, e))?;
        let mut bytes = Vec::with_capacity(AIM_HEADER_SIZE);
        file.by_ref()
            .take(AIM_HEADER_SIZE as u64)
            .read_to_end(&mut bytes)
            .map_err(BuildError::Read)?;
        Self::from_bytes(bytes, format)
    }

    pub fn from_bytes(mut bytes: Vec<u8>, format: IndexFormat) -> Result<Self> {
        let invalid = || match format {
            IndexFormat::Isi => BuildError::BadHeader("Invalid index".into()),
            IndexFormat::Aim => BuildError::BadHeader("Invalid AIM header block".into()),
        };
        let min = match format {
            IndexFormat::Isi => MIN_ISI_HEADER,
            IndexFormat::Aim => AIM_HEADER_SIZE,
        };
        if bytes.len() < min {
            return Err(invalid());
        }
        let version = header_version(&bytes);
        let legal = match format {
            IndexFormat::Isi => {
                let c = bytes[57];
                match version {
                    v if v > 10 => false,
                    9 | 10 => c == b' ' || c == b'S',
                    7 | 8 => c == b'V' || c == b'S',
                    6 => c == b'V' || c == b'F',
                    _ => c == b'D',
                }
            }
            IndexFormat::Aim => {
                let c = bytes[59];
                match version {
                    v if v > 10 => false,
                    7..=10 => matches!(c, b'V' | b'F' | b'S'),
                    _ => c == b'V' || c == b'F',
                }
            }
        };
        let magic = match format {
            IndexFormat::Isi => b'I',
            IndexFormat::Aim => b'A',
        };
        if bytes[0] != magic || bytes[100] != EOR || !legal {
            return Err(invalid());
        }

        let length = match format {
            IndexFormat::Isi => {
                let block = read_decimal(&bytes[41..46]).unwrap_or(0) as usize;
                if block >= MIN_ISI_HEADER { bytes.len().min(block) } else { bytes.len() }
            }
            IndexFormat::Aim if version == 0 => 512,
            IndexFormat::Aim => AIM_HEADER_SIZE,
        };
        bytes.truncate(length);
        Ok(Self { format, version, bytes })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Source name and argument strings recorded at build time.
    pub fn stored_arguments(&self) -> Result<(String, Vec<String>)> {
        let invalid = || BuildError::BadHeader("Invalid index: damaged argument list".into());
        let mut parts = Vec::new();
        let mut pos = NAME_OFFSET;
        while pos < self.bytes.len() && self.bytes[pos] != DEL {
            let start = pos;
            while pos < self.bytes.len() && self.bytes[pos] != EOR && self.bytes[pos] != DEL {
                pos += 1;
            }
            if pos == self.bytes.len() || self.bytes[pos] == DEL {
                return Err(invalid());
            }
            parts.push(String::from_utf8_lossy(&self.bytes[start..pos]).into_owned());
            pos += 1;
        }
        if parts.is_empty() {
            return Err(invalid());
        }
        let name = parts.remove(0);
        Ok((name, parts))
    }

    /// Ensure the header supports a reindex.
    pub fn require_reindexable(&self) -> Result<()> {
        if self.version < 8 {
            let what = match self.format {
                IndexFormat::Isi => "-E option not valid on pre-version 8 ISI",
                IndexFormat::Aim => "-E option not valid on pre-version 8 AIM",
            };
            return Err(BuildError::BadHeader(what.into()));
        }
        Ok(())
    }

    /// Replace the stored source name in place.
    pub fn rename(&mut self, new_name: &str, text_marker: bool) -> Result<()> {
        let len = self.bytes.len();
        let name = new_name.as_bytes();
        if self.version >= 9 {
            let name_end = self.bytes[NAME_OFFSET..]
                .iter()
                .position(|&b| b == EOR)
                .map(|p| p + NAME_OFFSET)
                .ok_or_else(|| BuildError::BadHeader("Invalid index".into()))?;
            let content_end = self.bytes[name_end..]
                .iter()
                .position(|&b| b == DEL)
                .map_or(len, |p| p + name_end);
            let tail = self.bytes[name_end..content_end].to_vec();
            if NAME_OFFSET + name.len() + tail.len() > len {
                return Err(BuildError::Rename(format!(
                    "{new_name} does not fit in the header block"
                )));
            }
            let mut pos = NAME_OFFSET;
            self.bytes[pos..pos + name.len()].copy_from_slice(name);
            pos += name.len();
            self.bytes[pos..pos + tail.len()].copy_from_slice(&tail);
            pos += tail.len();
            self.bytes[pos..].fill(DEL);
        } else {
            if name.len() > LEGACY_NAME_FIELD {
                return Err(BuildError::Rename(format!(
                    "{new_name} is longer than {LEGACY_NAME_FIELD} bytes"
                )));
            }
            self.bytes[NAME_OFFSET..NAME_OFFSET + LEGACY_NAME_FIELD].fill(b' ');
            self.bytes[NAME_OFFSET..NAME_OFFSET + name.len()].copy_from_slice(name);
        }
        if text_marker {
            self.bytes[55] = b'T';
        }
        Ok(())
    }
}

/// Two-digit version at offsets 98..100; a blank ones digit means 0.
fn header_version(bytes: &[u8]) -> u32 {
    if bytes[99] == b' ' {
        return 0;
    }
    let ones = bytes[99].wrapping_sub(b'0') as u32;
    let tens = if bytes[98] == b' ' {
        0
    } else {
        bytes[98].wrapping_sub(b'0') as u32 * 10
    };
    ones.saturating_add(tens)
}
