//! Raw, privilege sensitive process queries and the parsing of the buffers
//! they return.

pub mod procargs;
pub mod procfs;

pub use procargs::{ProcargsError, parse_procargs};
pub use procfs::{
    ProcessStatus, ProcfsReader, RawProcessReader, ReadError, ReadErrorKind, read_arguments,
};
