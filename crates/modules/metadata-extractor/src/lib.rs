//! Process metadata extraction.
//!
//! The [`MetadataExtractor`] rebuilds the identity of the process behind an
//! event: executable path, parent pid, working directory and arguments. Queries
//! the agent isn't allowed to run are escalated to the privileged peer.

mod extractor;
mod source;

pub use extractor::MetadataExtractor;
pub use source::{DelegatedSource, LocalSource, MetadataSource, SourceError, SourceErrorKind};
