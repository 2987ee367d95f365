//! Direct process queries backed by procfs.

use std::{
    fs::{self, File},
    io::{self, BufRead, BufReader},
    os::unix::ffi::OsStrExt,
    path::PathBuf,
};

use nix::{
    errno::Errno,
    unistd::{Pid, SysconfVar, sysconf},
};
use thiserror::Error;

use crate::procargs;

/// How a failed query should be handled by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadErrorKind {
    /// The process has already exited.
    NotFound,
    /// The caller lacks the privileges to inspect the process.
    PermissionDenied,
    Other,
}

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("reading {path} failed")]
    ReadFile {
        #[source]
        source: io::Error,
        path: String,
    },
    #[error("parent for process {0} not found")]
    ParentNotFound(Pid),
    #[error("querying the argument size ceiling failed")]
    ArgMax(#[source] Errno),
    #[error("argument size ceiling is indeterminate")]
    ArgMaxUnknown,
}

impl ReadError {
    pub fn kind(&self) -> ReadErrorKind {
        match self {
            ReadError::ReadFile { source, .. } => classify(source),
            _ => ReadErrorKind::Other,
        }
    }
}

fn classify(err: &io::Error) -> ReadErrorKind {
    if err.raw_os_error() == Some(Errno::ESRCH as i32) {
        return ReadErrorKind::NotFound;
    }
    match err.kind() {
        io::ErrorKind::NotFound => ReadErrorKind::NotFound,
        io::ErrorKind::PermissionDenied => ReadErrorKind::PermissionDenied,
        _ => ReadErrorKind::Other,
    }
}

/// Fixed part of the process status needed by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStatus {
    pub ppid: Pid,
}

/// Privileged OS queries returning raw process information.
///
/// Implementations don't interpret the results: they only fetch them and
/// report why a query failed.
pub trait RawProcessReader: Send + Sync {
    /// Path of the executable image.
    fn image_path(&self, pid: Pid) -> Result<PathBuf, ReadError>;

    /// Process status record, holding the parent pid.
    fn status(&self, pid: Pid) -> Result<ProcessStatus, ReadError>;

    /// Current working directory.
    fn cwd(&self, pid: Pid) -> Result<PathBuf, ReadError>;

    /// System wide ceiling of the argument buffer size.
    fn arg_max(&self) -> Result<usize, ReadError>;

    /// Raw argument buffer of at most `size` bytes, laid out as described in
    /// [`procargs`].
    fn procargs(&self, pid: Pid, size: usize) -> Result<Vec<u8>, ReadError>;
}

/// [`RawProcessReader`] reading from `/proc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcfsReader;

impl RawProcessReader for ProcfsReader {
    fn image_path(&self, pid: Pid) -> Result<PathBuf, ReadError> {
        read_link(&format!("/proc/{pid}/exe"))
    }

    fn status(&self, pid: Pid) -> Result<ProcessStatus, ReadError> {
        let path = format!("/proc/{pid}/status");
        let file = File::open(&path).map_err(|source| ReadError::ReadFile { source, path })?;

        let reader = BufReader::new(file);
        for line in reader.lines().map_while(Result::ok) {
            if let Some(value) = line.strip_prefix("PPid:") {
                return value
                    .trim()
                    .parse()
                    .map(|ppid| ProcessStatus {
                        ppid: Pid::from_raw(ppid),
                    })
                    .map_err(|_| ReadError::ParentNotFound(pid));
            }
        }

        Err(ReadError::ParentNotFound(pid))
    }

    fn cwd(&self, pid: Pid) -> Result<PathBuf, ReadError> {
        read_link(&format!("/proc/{pid}/cwd"))
    }

    fn arg_max(&self) -> Result<usize, ReadError> {
        match sysconf(SysconfVar::ARG_MAX) {
            Ok(Some(value)) => usize::try_from(value).map_err(|_| ReadError::ArgMaxUnknown),
            Ok(None) => Err(ReadError::ArgMaxUnknown),
            Err(errno) => Err(ReadError::ArgMax(errno)),
        }
    }

    fn procargs(&self, pid: Pid, size: usize) -> Result<Vec<u8>, ReadError> {
        let image = self.image_path(pid)?;
        let path = format!("/proc/{pid}/cmdline");
        let cmdline = fs::read(&path).map_err(|source| ReadError::ReadFile { source, path })?;
        // argv[0] names the image, already given by the path above
        let args: Vec<&[u8]> = cmdline
            .split(|b| *b == 0)
            .skip(1)
            .filter(|arg| !arg.is_empty())
            .collect();

        Ok(procargs::encode_procargs(
            image.as_os_str().as_bytes(),
            &args,
            size,
        ))
    }
}

/// Best effort argument vector of a process.
///
/// Fails only when the raw buffer can't be fetched. A missing ceiling or a
/// malformed buffer yield an empty vector.
pub fn read_arguments<R>(reader: &R, pid: Pid) -> Result<Vec<String>, ReadError>
where
    R: RawProcessReader + ?Sized,
{
    let size = match reader.arg_max() {
        Ok(size) => size,
        Err(err) => {
            log::debug!("argument ceiling unavailable: {err}");
            return Ok(Vec::new());
        }
    };
    let buffer = reader.procargs(pid, size)?;
    Ok(procargs::parse_procargs(&buffer).unwrap_or_default())
}

/// Return where a link is pointing to.
fn read_link(path: &str) -> Result<PathBuf, ReadError> {
    fs::read_link(path).map_err(|source| ReadError::ReadFile {
        source,
        path: path.to_string(),
    })
}
