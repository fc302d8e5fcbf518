//! Batch container decoding.
//!
//! # Layout
//! ```text
//! Header:  version:u32                        (must be 2)
//! Entry:   type:u16
//!          nameLength:u32                     (code units, see `encoding`)
//!          name:nameLength * unit_width bytes
//!          contentLength:u64
//!          content:contentLength bytes
//! ```
//! Entries repeat until the stream ends exactly on an entry boundary; that
//! is the only successful termination.  All integers are little-endian.
//!
//! The whole container is resident in memory, so entry contents are handed
//! out as borrowed slices of the input buffer.

use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::encoding::{NameEncoding, NameError};
use crate::error::Error;

/// The only container version this crate decodes.
pub const SUPPORTED_VERSION: u32 = 2;

// ── ContainerHeader ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version: u32,
}

impl ContainerHeader {
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.version)
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, Error> {
        let version = reader
            .read_u32::<LittleEndian>()
            .map_err(|_| Error::Truncated { field: "header", offset: 0 })?;
        if version != SUPPORTED_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        Ok(Self { version })
    }
}

// ── Entry ────────────────────────────────────────────────────────────────────

/// One named blob, borrowed from the container buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<'a> {
    /// Raw `type` field.  Carried through but not interpreted.
    pub kind:    u16,
    pub name:    String,
    pub content: &'a [u8],
}

/// Entry fields that precede the content.
struct EntryHeader {
    kind:        u16,
    name:        String,
    content_len: u64,
}

// ── ContainerReader ──────────────────────────────────────────────────────────

/// Pull-style decoder over an in-memory container.
pub struct ContainerReader<'a> {
    cursor:   Cursor<&'a [u8]>,
    encoding: NameEncoding,
}

impl<'a> ContainerReader<'a> {
    /// Read and validate the header.  Entries are decoded lazily.
    pub fn new(buf: &'a [u8], encoding: NameEncoding) -> Result<Self, Error> {
        let mut cursor = Cursor::new(buf);
        ContainerHeader::read(&mut cursor)?;
        Ok(Self { cursor, encoding })
    }

    /// Current byte offset into the container.
    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> u64 {
        (self.buf().len() as u64).saturating_sub(self.cursor.position())
    }

    /// Decode the next entry, or `Ok(None)` at a clean end of stream.
    pub fn next_entry(&mut self) -> Result<Option<Entry<'a>>, Error> {
        let Some(header) = self.read_entry_header()? else {
            return Ok(None);
        };
        // read_entry_header guarantees content_len <= remaining.
        let start = self.cursor.position() as usize;
        let end   = start + header.content_len as usize;
        let content = &self.buf()[start..end];
        self.cursor.set_position(end as u64);
        Ok(Some(Entry { kind: header.kind, name: header.name, content }))
    }

    /// Decode the next entry's header and step over its content without
    /// touching it.  Returns `false` at a clean end of stream.
    pub fn skip_entry(&mut self) -> Result<bool, Error> {
        match self.read_entry_header()? {
            Some(header) => {
                let pos = self.cursor.position();
                self.cursor.set_position(pos + header.content_len);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn buf(&self) -> &'a [u8] {
        *self.cursor.get_ref()
    }

    fn read_entry_header(&mut self) -> Result<Option<EntryHeader>, Error> {
        // Running dry before `type` is the clean end; anywhere else is corruption.
        if self.remaining() == 0 {
            return Ok(None);
        }
        let kind       = self.read_field("type", |c| c.read_u16::<LittleEndian>())?;
        let char_count = self.read_field("nameLength", |c| c.read_u32::<LittleEndian>())?;

        let name_offset = self.cursor.position();
        let (name, used) = self
            .encoding
            .decode_name(&self.buf()[name_offset as usize..], char_count)
            .map_err(|e| match e {
                NameError::Truncated { .. } => Error::Truncated { field: "name", offset: name_offset },
                NameError::Malformed => Error::InvalidName { encoding: self.encoding, offset: name_offset },
            })?;
        self.cursor.set_position(name_offset + used as u64);

        let content_len = self.read_field("contentLength", |c| c.read_u64::<LittleEndian>())?;
        let remaining = self.remaining();
        if content_len > remaining {
            return Err(Error::ContentOutOfBounds { declared: content_len, remaining });
        }
        Ok(Some(EntryHeader { kind, name, content_len }))
    }

    fn read_field<T>(
        &mut self,
        field: &'static str,
        read:  impl FnOnce(&mut Cursor<&'a [u8]>) -> io::Result<T>,
    ) -> Result<T, Error> {
        let offset = self.cursor.position();
        read(&mut self.cursor).map_err(|_| Error::Truncated { field, offset })
    }
}

// ── walk ─────────────────────────────────────────────────────────────────────

/// Decode a whole container with `encoding`, feeding each entry to `sink`.
///
/// Without a sink, contents are skipped rather than sliced; this is the
/// cheap structural check used by detection.  Any error the sink returns
/// stops the walk and is returned unchanged.
///
/// Returns the number of entries traversed.
pub fn walk<'a>(
    buf:      &'a [u8],
    encoding: NameEncoding,
    sink:     Option<&mut dyn FnMut(Entry<'a>) -> Result<(), Error>>,
) -> Result<usize, Error> {
    let mut reader = ContainerReader::new(buf, encoding)?;
    let mut count = 0usize;
    match sink {
        Some(sink) => {
            while let Some(entry) = reader.next_entry()? {
                sink(entry)?;
                count += 1;
            }
        }
        None => {
            while reader.skip_entry()? {
                count += 1;
            }
        }
    }
    Ok(count)
}

// ── ContainerWriter ──────────────────────────────────────────────────────────

/// Produces version-2 containers.  Used to build fixtures and to repack
/// entries; the extraction path never writes containers.
pub struct ContainerWriter<W: Write> {
    writer:   W,
    encoding: NameEncoding,
}

impl<W: Write> ContainerWriter<W> {
    pub fn new(mut writer: W, encoding: NameEncoding) -> io::Result<Self> {
        ContainerHeader { version: SUPPORTED_VERSION }.write(&mut writer)?;
        Ok(Self { writer, encoding })
    }

    pub fn add_entry(&mut self, kind: u16, name: &str, content: &[u8]) -> io::Result<()> {
        let (char_count, name_bytes) = self.encoding.encode_name(name);
        self.writer.write_u16::<LittleEndian>(kind)?;
        self.writer.write_u32::<LittleEndian>(char_count)?;
        self.writer.write_all(&name_bytes)?;
        self.writer.write_u64::<LittleEndian>(content.len() as u64)?;
        self.writer.write_all(content)
    }

    pub fn finish(mut self) -> io::Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}
