//! Name-encoding detection.
//!
//! A wrong encoding desynchronises every length field after the first name,
//! so the only reliable check is a full structural pass.  Each candidate in
//! [`NameEncoding::PRIORITY`] gets one content-free walk over the whole
//! buffer; the first that reaches a clean end is the container's encoding.

use tracing::{debug, trace};

use crate::container::{walk, Entry};
use crate::encoding::NameEncoding;
use crate::error::Error;

/// Determine which name encoding `buf` uses without materialising content.
pub fn detect(buf: &[u8]) -> Result<NameEncoding, Error> {
    let mut attempts = Vec::with_capacity(NameEncoding::PRIORITY.len());
    for encoding in NameEncoding::PRIORITY {
        match walk(buf, encoding, None) {
            Ok(entries) => {
                trace!(%encoding, entries, "dry run reached clean end");
                return Ok(encoding);
            }
            Err(err) => {
                debug!(%encoding, error = %err, "dry run failed");
                attempts.push((encoding, err));
            }
        }
    }
    Err(Error::Unrecognized { attempts })
}

/// Detect the encoding of `buf` and decode every entry.
///
/// Raw access for callers that want the entries without any filtering or
/// writing policy.
pub fn decode_container(buf: &[u8]) -> Result<(NameEncoding, Vec<Entry<'_>>), Error> {
    let encoding = detect(buf)?;
    let mut entries = Vec::new();
    walk(buf, encoding, Some(&mut |entry| {
        entries.push(entry);
        Ok(())
    }))?;
    Ok((encoding, entries))
}
