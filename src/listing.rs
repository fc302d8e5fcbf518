//! Read-only inspection of a container's entries, for `scalpel list`.

use serde::Serialize;

use crate::detect::decode_container;
use crate::encoding::NameEncoding;
use crate::envelope::{EnvelopeHeader, ImagePlatform, ImageType};
use crate::error::Error;

#[derive(Debug, Clone, Serialize)]
pub struct ContainerListing {
    pub path:     String,
    pub encoding: NameEncoding,
    pub entries:  Vec<EntryListing>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryListing {
    pub kind:     u16,
    pub name:     String,
    pub size:     u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub envelope: Option<EnvelopeSummary>,
}

/// The parts of a log envelope header worth showing to a person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvelopeSummary {
    pub version:          u32,
    pub platform:         ImagePlatform,
    pub image_type:       ImageType,
    pub image_version:    String,
    pub platform_version: String,
    pub compressed:       bool,
    pub chunked:          bool,
}

impl From<&EnvelopeHeader> for EnvelopeSummary {
    fn from(h: &EnvelopeHeader) -> Self {
        EnvelopeSummary {
            version:          h.version,
            platform:         h.platform(),
            image_type:       h.kind(),
            image_version:    h.image_version_str().into_owned(),
            platform_version: h.image_platform_version_str().into_owned(),
            compressed:       h.is_compressed(),
            chunked:          h.is_chunked(),
        }
    }
}

/// Decode `content` and describe every entry in it.
pub fn describe(path: &str, content: &[u8]) -> Result<ContainerListing, Error> {
    let (encoding, entries) = decode_container(content)?;
    let entries = entries
        .into_iter()
        .map(|e| EntryListing {
            kind:     e.kind,
            size:     e.content.len() as u64,
            envelope: EnvelopeHeader::parse(e.content).ok().as_ref().map(EnvelopeSummary::from),
            name:     e.name,
        })
        .collect();
    Ok(ContainerListing { path: path.to_owned(), encoding, entries })
}
