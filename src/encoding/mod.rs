//! Name encodings used inside batch containers.
//!
//! # Identity rules
//! A container never says which encoding its names use.  Batches written on
//! Windows store names as UTF-16LE; batches written on macOS store them as
//! UTF-32BE.  The `nameLength` field always counts code units, so the byte
//! span of a name is `nameLength * unit_width()`.
//!
//! A byte-order mark is never interpreted: a leading U+FEFF code unit is
//! decoded like any other character.

use std::fmt;

use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use serde::Serialize;
use thiserror::Error;
use widestring::{U16Str, U32Str};

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("Name needs {needed} bytes but only {available} remain")]
    Truncated { needed: u64, available: u64 },
    #[error("Name contains malformed code units")]
    Malformed,
}

// ── NameEncoding enum ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NameEncoding {
    /// UTF-16, little-endian, 2 bytes per code unit.
    Windows,
    /// UTF-32, big-endian, 4 bytes per code unit.
    Mac,
}

impl NameEncoding {
    /// Order in which detection tries the encodings.  The first one that
    /// parses a whole container wins, so Windows takes ties.
    pub const PRIORITY: [NameEncoding; 2] = [NameEncoding::Windows, NameEncoding::Mac];

    #[inline]
    pub fn unit_width(self) -> u64 {
        match self {
            NameEncoding::Windows => 2,
            NameEncoding::Mac     => 4,
        }
    }

    /// Byte length of a name of `char_count` code units.
    #[inline]
    pub fn span(self, char_count: u32) -> u64 {
        u64::from(char_count) * self.unit_width()
    }

    pub fn name(self) -> &'static str {
        match self {
            NameEncoding::Windows => "windows",
            NameEncoding::Mac     => "mac",
        }
    }

    /// Decode a name of `char_count` code units from the front of `buf`.
    ///
    /// Returns the decoded name and the number of bytes it occupied.  The
    /// whole span must decode; there is no lossy fallback.
    pub fn decode_name(self, buf: &[u8], char_count: u32) -> Result<(String, usize), NameError> {
        let needed = self.span(char_count);
        if needed > buf.len() as u64 {
            return Err(NameError::Truncated { needed, available: buf.len() as u64 });
        }
        // needed <= buf.len(), so it fits in usize.
        let bytes = &buf[..needed as usize];

        let name = match self {
            NameEncoding::Windows => {
                let units: Vec<u16> = bytes.chunks_exact(2).map(LittleEndian::read_u16).collect();
                U16Str::from_slice(&units).to_string().map_err(|_| NameError::Malformed)?
            }
            NameEncoding::Mac => {
                let units: Vec<u32> = bytes.chunks_exact(4).map(BigEndian::read_u32).collect();
                U32Str::from_slice(&units).to_string().map_err(|_| NameError::Malformed)?
            }
        };
        Ok((name, bytes.len()))
    }

    /// Encode `name` the way a batch writer on this platform would.
    ///
    /// Returns the code unit count (the on-disk `nameLength`) and the bytes.
    pub fn encode_name(self, name: &str) -> (u32, Vec<u8>) {
        let mut out = Vec::with_capacity(name.len() * self.unit_width() as usize);
        let mut count = 0u32;
        match self {
            NameEncoding::Windows => {
                for unit in name.encode_utf16() {
                    // Writing into a Vec cannot fail.
                    let _ = out.write_u16::<LittleEndian>(unit);
                    count += 1;
                }
            }
            NameEncoding::Mac => {
                for ch in name.chars() {
                    let _ = out.write_u32::<BigEndian>(ch as u32);
                    count += 1;
                }
            }
        }
        (count, out)
    }
}

impl fmt::Display for NameEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
