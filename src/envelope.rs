//! Log envelope: the fixed 256-byte header in front of many batch entries.
//!
//! # Layout (little-endian)
//! ```text
//! magic:u64  version:u32  capabilities:u32  processingFlags:u32
//! imagePlatform:u32  imageType:u32
//! imageVersion[64]  imagePlatformVersion[64]  reserved[100]
//! ```
//! When a compression capability bit is set, everything after the header is
//! a gzip stream.  Unpacking replaces it with the plaintext and clears the
//! compression bits, so the result is a valid uncompressed envelope.

use std::borrow::Cow;
use std::io::{self, Cursor, Read, Write};
use std::ops::RangeInclusive;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::MultiGzDecoder;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// `"EBFGONED"` read as a little-endian u64.
pub const ENVELOPE_MAGIC: u64 = 0x4445_4E4F_4746_4245;
pub const ENVELOPE_HEADER_SIZE: usize = 256;
pub const SUPPORTED_VERSIONS: RangeInclusive<u32> = 1..=3;

/// Suffix carried by names of compressed envelopes (`*.odlgz`).
pub const GZ_SUFFIX: &str = "gz";

// ── Capability bits ──────────────────────────────────────────────────────────

pub const CAP_AUTO_FLF:                    u32 = 0x01;
pub const CAP_64BIT_POINTERS:              u32 = 0x02;
pub const CAP_PRIVACY_OBFUSCATION:         u32 = 0x04;
pub const CAP_KERNEL_LOGS:                 u32 = 0x08;
pub const CAP_COMPRESSED_CONTENTS:         u32 = 0x10;
pub const CAP_COMPRESSED_CONTENTS_CHUNKED: u32 = 0x20;
pub const CAP_TRACE_ID:                    u32 = 0x40;
pub const CAP_PRIVACY_OBFUSCATION_GENERAL: u32 = 0x80;

/// Either compression bit means the payload is gzip.
pub const CAP_ANY_COMPRESSION: u32 = CAP_COMPRESSED_CONTENTS | CAP_COMPRESSED_CONTENTS_CHUNKED;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("Invalid envelope magic: {0:#018x}")]
    InvalidMagic(u64),
    #[error("Unsupported envelope version: {0}")]
    UnsupportedVersion(u32),
    #[error("Envelope is not compressed")]
    NotCompressed,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Platform / image type ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImagePlatform {
    Windows,
    Mac,
    /// Obsolete.
    Windows10X,
    MacAppleSiliconNative,
    MacAppleSiliconRosetta,
    Unknown(u32),
}

impl ImagePlatform {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => ImagePlatform::Windows,
            1 => ImagePlatform::Mac,
            2 => ImagePlatform::Windows10X,
            3 => ImagePlatform::MacAppleSiliconNative,
            4 => ImagePlatform::MacAppleSiliconRosetta,
            n => ImagePlatform::Unknown(n),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ImagePlatform::Windows                => "windows",
            ImagePlatform::Mac                    => "mac",
            ImagePlatform::Windows10X             => "windows10x",
            ImagePlatform::MacAppleSiliconNative  => "mac-arm64",
            ImagePlatform::MacAppleSiliconRosetta => "mac-rosetta",
            ImagePlatform::Unknown(_)             => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImageType {
    Debug,
    Ship,
    Retail,
    Unknown(u32),
}

impl ImageType {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => ImageType::Debug,
            1 => ImageType::Ship,
            2 => ImageType::Retail,
            n => ImageType::Unknown(n),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ImageType::Debug      => "debug",
            ImageType::Ship       => "ship",
            ImageType::Retail     => "retail",
            ImageType::Unknown(_) => "unknown",
        }
    }
}

// ── EnvelopeHeader ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub magic:                  u64,
    pub version:                u32,
    pub capabilities:           u32,
    pub processing_flags:       u32,
    pub image_platform:         u32,
    pub image_type:             u32,
    pub image_version:          [u8; 64],
    pub image_platform_version: [u8; 64],
    pub reserved:               [u8; 100],
}

impl EnvelopeHeader {
    /// A fresh header with the given version and capabilities; all other
    /// fields zeroed.
    pub fn new(version: u32, capabilities: u32) -> Self {
        Self {
            magic:                  ENVELOPE_MAGIC,
            version,
            capabilities,
            processing_flags:       0,
            image_platform:         0,
            image_type:             0,
            image_version:          [0u8; 64],
            image_platform_version: [0u8; 64],
            reserved:               [0u8; 100],
        }
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.magic)?;
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_u32::<LittleEndian>(self.capabilities)?;
        writer.write_u32::<LittleEndian>(self.processing_flags)?;
        writer.write_u32::<LittleEndian>(self.image_platform)?;
        writer.write_u32::<LittleEndian>(self.image_type)?;
        writer.write_all(&self.image_version)?;
        writer.write_all(&self.image_platform_version)?;
        writer.write_all(&self.reserved)?;
        Ok(())
    }

    /// Read and validate a header.  Fails on short input, a foreign magic
    /// or a version outside [`SUPPORTED_VERSIONS`].
    pub fn read<R: Read>(mut reader: R) -> Result<Self, EnvelopeError> {
        let magic = reader.read_u64::<LittleEndian>()?;
        if magic != ENVELOPE_MAGIC {
            return Err(EnvelopeError::InvalidMagic(magic));
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(EnvelopeError::UnsupportedVersion(version));
        }
        let capabilities     = reader.read_u32::<LittleEndian>()?;
        let processing_flags = reader.read_u32::<LittleEndian>()?;
        let image_platform   = reader.read_u32::<LittleEndian>()?;
        let image_type       = reader.read_u32::<LittleEndian>()?;
        let mut image_version = [0u8; 64];
        reader.read_exact(&mut image_version)?;
        let mut image_platform_version = [0u8; 64];
        reader.read_exact(&mut image_platform_version)?;
        let mut reserved = [0u8; 100];
        reader.read_exact(&mut reserved)?;
        Ok(Self {
            magic,
            version,
            capabilities,
            processing_flags,
            image_platform,
            image_type,
            image_version,
            image_platform_version,
            reserved,
        })
    }

    /// Parse the header at the front of `content`, if there is one.
    pub fn parse(content: &[u8]) -> Result<Self, EnvelopeError> {
        Self::read(Cursor::new(content))
    }

    pub fn is_compressed(&self) -> bool {
        self.capabilities & CAP_ANY_COMPRESSION != 0
    }

    pub fn is_chunked(&self) -> bool {
        self.capabilities & CAP_COMPRESSED_CONTENTS_CHUNKED != 0
    }

    /// The header describing the same envelope after decompression.
    pub fn decompressed(&self) -> Self {
        Self { capabilities: self.capabilities & !CAP_ANY_COMPRESSION, ..self.clone() }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ENVELOPE_HEADER_SIZE);
        // Writing into a Vec cannot fail.
        let _ = self.write(&mut out);
        out
    }

    pub fn platform(&self) -> ImagePlatform {
        ImagePlatform::from_raw(self.image_platform)
    }

    pub fn kind(&self) -> ImageType {
        ImageType::from_raw(self.image_type)
    }

    pub fn image_version_str(&self) -> Cow<'_, str> {
        nul_trimmed(&self.image_version)
    }

    pub fn image_platform_version_str(&self) -> Cow<'_, str> {
        nul_trimmed(&self.image_platform_version)
    }
}

fn nul_trimmed(field: &[u8]) -> Cow<'_, str> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end])
}

// ── Unpacking ────────────────────────────────────────────────────────────────

/// Strip one trailing `gz` from `name`.
pub fn strip_gz_suffix(name: &str) -> &str {
    name.strip_suffix(GZ_SUFFIX).unwrap_or(name)
}

/// Decompress a compressed envelope, if `content` is one.
///
/// Best effort: anything that is not a recognised, compressed, intact
/// envelope comes back unchanged.
pub fn unpack<'a>(content: &'a [u8], name: &'a str) -> (Cow<'a, [u8]>, Cow<'a, str>) {
    match try_unpack(content) {
        Ok(plain) => {
            debug!(name, from = content.len(), to = plain.len(), "decompressed log envelope");
            (Cow::Owned(plain), Cow::Borrowed(strip_gz_suffix(name)))
        }
        Err(EnvelopeError::InvalidMagic(_)) => (Cow::Borrowed(content), Cow::Borrowed(name)),
        Err(err) => {
            debug!(name, error = %err, "leaving envelope as is");
            (Cow::Borrowed(content), Cow::Borrowed(name))
        }
    }
}

/// Header with compression bits cleared, followed by the plaintext.
fn try_unpack(content: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let mut cursor = Cursor::new(content);
    let header = EnvelopeHeader::read(&mut cursor)?;
    if !header.is_compressed() {
        return Err(EnvelopeError::NotCompressed);
    }
    debug!(version = header.version, chunked = header.is_chunked(), "decompressing log envelope");

    let payload = &content[cursor.position() as usize..];
    let mut plain = Vec::new();
    MultiGzDecoder::new(payload).read_to_end(&mut plain)?;

    let mut out = Vec::with_capacity(ENVELOPE_HEADER_SIZE + plain.len());
    header.decompressed().write(&mut out)?;
    out.extend_from_slice(&plain);
    Ok(out)
}
