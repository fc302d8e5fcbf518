pub mod error;
pub mod encoding;
pub mod container;
pub mod detect;
pub mod envelope;
pub mod extract;
pub mod batch;
pub mod listing;

pub use error::Error;
pub use encoding::NameEncoding;
pub use container::{ContainerHeader, ContainerReader, ContainerWriter, Entry, walk};
pub use detect::{detect, decode_container};
pub use envelope::{EnvelopeHeader, unpack};
pub use extract::{ExtractOptions, ExtractSummary, NameFilter, extract};
pub use batch::{BatchSummary, discover, extract_batches};
