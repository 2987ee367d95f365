use std::{future::Future, path::PathBuf};

use proc_common::ProcfsReader;
use vigil_core::{Pid, ProcessMetadata, SecurityEvent};

use crate::source::{DelegatedSource, LocalSource, MetadataSource, SourceError, SourceErrorKind};

/// Reconstructs the identity of a process.
///
/// Each query is first tried on the `local` source. When it is refused for lack
/// of privileges, the same query is escalated to the `delegated` source. Any
/// failure leaves the matching field empty: extraction never fails.
pub struct MetadataExtractor<L = LocalSource<ProcfsReader>, D = DelegatedSource> {
    local: L,
    delegated: D,
}

impl<L: MetadataSource, D: MetadataSource> MetadataExtractor<L, D> {
    pub fn new(local: L, delegated: D) -> Self {
        Self { local, delegated }
    }

    /// Collect all the metadata of `pid`.
    pub async fn extract(&self, pid: Pid) -> ProcessMetadata {
        let (path, (ppid, cwd), argv) = tokio::join!(
            self.resolve_path(pid),
            self.resolve_parent_and_cwd(pid),
            self.resolve_arguments(pid),
        );
        ProcessMetadata {
            path,
            ppid,
            cwd,
            argv,
        }
    }

    /// Enrich `event` with the metadata of its subject process.
    pub async fn enrich(&self, event: &mut SecurityEvent) {
        let metadata = self.extract(Pid::from_raw(event.pid)).await;
        event.apply_metadata(metadata);
    }

    pub async fn resolve_path(&self, pid: Pid) -> Option<PathBuf> {
        escalate("path", pid, self.local.path(pid), || {
            self.delegated.path(pid)
        })
        .await
    }

    pub async fn resolve_parent_and_cwd(&self, pid: Pid) -> (Option<i32>, Option<PathBuf>) {
        let ppid = escalate("parent", pid, self.local.parent_pid(pid), || {
            self.delegated.parent_pid(pid)
        })
        .await
        .map(|ppid| ppid.as_raw());
        let cwd = escalate("cwd", pid, self.local.cwd(pid), || self.delegated.cwd(pid)).await;
        (ppid, cwd)
    }

    pub async fn resolve_arguments(&self, pid: Pid) -> Vec<String> {
        escalate("arguments", pid, self.local.arguments(pid), || {
            self.delegated.arguments(pid)
        })
        .await
        .unwrap_or_default()
    }
}

/// Run `direct`, falling back on `delegated` if it was denied.
async fn escalate<T, F, G>(
    query: &str,
    pid: Pid,
    direct: F,
    delegated: impl FnOnce() -> G,
) -> Option<T>
where
    F: Future<Output = Result<T, SourceError>>,
    G: Future<Output = Result<T, SourceError>>,
{
    let err = match direct.await {
        Ok(value) => return Some(value),
        Err(err) => err,
    };

    match err.kind() {
        SourceErrorKind::NotFound => {
            log::trace!("process {pid} exited before its {query} was read");
            None
        }
        SourceErrorKind::PermissionDenied => {
            log::debug!("{query} of process {pid} denied, escalating to the privileged peer");
            match delegated().await {
                Ok(value) => Some(value),
                Err(err) if err.kind() == SourceErrorKind::NotFound => None,
                Err(err) => {
                    log::warn!("escalated {query} query for process {pid} failed: {err}");
                    None
                }
            }
        }
        SourceErrorKind::Unavailable | SourceErrorKind::Other => {
            log::warn!("{query} query for process {pid} failed: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use nix::errno::Errno;
    use peer_api::error::PeerError;
    use proc_common::{ProcessStatus, RawProcessReader, ReadError};
    use vigil_core::EventKind;

    use super::*;

    const PID: Pid = Pid::from_raw(4242);

    fn os_error(errno: Errno) -> ReadError {
        ReadError::ReadFile {
            source: io::Error::from_raw_os_error(errno as i32),
            path: "/proc/4242".to_string(),
        }
    }

    /// Raw reader failing every query with the same error, or answering with
    /// fixed values when `errno` is `None`.
    struct FakeReader {
        errno: Option<Errno>,
        arg_max: Option<usize>,
        procargs: Vec<u8>,
    }

    impl FakeReader {
        fn failing(errno: Errno) -> Self {
            Self {
                errno: Some(errno),
                arg_max: Some(4096),
                procargs: Vec::new(),
            }
        }

        fn with_procargs(procargs: Vec<u8>) -> Self {
            Self {
                errno: None,
                arg_max: Some(4096),
                procargs,
            }
        }

        fn check(&self) -> Result<(), ReadError> {
            match self.errno {
                Some(errno) => Err(os_error(errno)),
                None => Ok(()),
            }
        }
    }

    impl RawProcessReader for FakeReader {
        fn image_path(&self, _pid: Pid) -> Result<PathBuf, ReadError> {
            self.check().map(|_| PathBuf::from("/usr/bin/local"))
        }

        fn status(&self, _pid: Pid) -> Result<ProcessStatus, ReadError> {
            self.check().map(|_| ProcessStatus {
                ppid: Pid::from_raw(1),
            })
        }

        fn cwd(&self, _pid: Pid) -> Result<PathBuf, ReadError> {
            self.check().map(|_| PathBuf::from("/local"))
        }

        fn arg_max(&self) -> Result<usize, ReadError> {
            self.arg_max.ok_or(ReadError::ArgMaxUnknown)
        }

        fn procargs(&self, _pid: Pid, size: usize) -> Result<Vec<u8>, ReadError> {
            self.check()?;
            let mut buffer = self.procargs.clone();
            buffer.truncate(size);
            Ok(buffer)
        }
    }

    /// Delegated source counting the queries it receives.
    #[derive(Default)]
    struct FakePeer {
        unreachable: bool,
        calls: AtomicUsize,
    }

    impl FakePeer {
        fn answer<T>(&self, value: T) -> Result<T, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.unreachable {
                Err(PeerError::Unavailable("connection refused".to_string()).into())
            } else {
                Ok(value)
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl MetadataSource for FakePeer {
        async fn path(&self, _pid: Pid) -> Result<PathBuf, SourceError> {
            self.answer(PathBuf::from("/usr/bin/peer"))
        }

        async fn parent_pid(&self, _pid: Pid) -> Result<Pid, SourceError> {
            self.answer(Pid::from_raw(77))
        }

        async fn cwd(&self, _pid: Pid) -> Result<PathBuf, SourceError> {
            self.answer(PathBuf::from("/peer"))
        }

        async fn arguments(&self, _pid: Pid) -> Result<Vec<String>, SourceError> {
            self.answer(vec!["--from-peer".to_string()])
        }
    }

    fn raw_args(count: i32, parts: &[&[u8]]) -> Vec<u8> {
        let mut buffer = count.to_ne_bytes().to_vec();
        for part in parts {
            buffer.extend_from_slice(part);
        }
        buffer
    }

    #[tokio::test]
    async fn direct_success_skips_the_peer() {
        let reader = FakeReader::with_procargs(raw_args(3, &[b"/bin/ls\0", b"-l\0", b"-a\0", b"x\0"]));
        let extractor = MetadataExtractor::new(LocalSource::new(reader), FakePeer::default());

        let metadata = extractor.extract(PID).await;
        assert_eq!(
            metadata,
            ProcessMetadata {
                path: Some(PathBuf::from("/usr/bin/local")),
                ppid: Some(1),
                cwd: Some(PathBuf::from("/local")),
                argv: vec!["-l".to_string(), "-a".to_string(), "x".to_string()],
            }
        );
        assert_eq!(extractor.delegated.calls(), 0);
    }

    #[tokio::test]
    async fn permission_denied_escalates() {
        let extractor = MetadataExtractor::new(
            LocalSource::new(FakeReader::failing(Errno::EACCES)),
            FakePeer::default(),
        );

        let metadata = extractor.extract(PID).await;
        assert_eq!(metadata.path, Some(PathBuf::from("/usr/bin/peer")));
        assert_eq!(metadata.ppid, Some(77));
        assert_eq!(metadata.cwd, Some(PathBuf::from("/peer")));
        assert_eq!(metadata.argv, vec!["--from-peer".to_string()]);
        assert_eq!(extractor.delegated.calls(), 4);
    }

    #[tokio::test]
    async fn exited_process_is_left_empty() {
        let extractor = MetadataExtractor::new(
            LocalSource::new(FakeReader::failing(Errno::ESRCH)),
            FakePeer::default(),
        );

        assert_eq!(extractor.extract(PID).await, ProcessMetadata::default());
        assert_eq!(extractor.delegated.calls(), 0);
    }

    #[tokio::test]
    async fn other_errors_are_not_escalated() {
        let extractor = MetadataExtractor::new(
            LocalSource::new(FakeReader::failing(Errno::EIO)),
            FakePeer::default(),
        );

        assert_eq!(extractor.extract(PID).await, ProcessMetadata::default());
        assert_eq!(extractor.delegated.calls(), 0);
    }

    #[tokio::test]
    async fn unreachable_peer_degrades() {
        let extractor = MetadataExtractor::new(
            LocalSource::new(FakeReader::failing(Errno::EPERM)),
            FakePeer {
                unreachable: true,
                ..Default::default()
            },
        );

        assert_eq!(extractor.extract(PID).await, ProcessMetadata::default());
        assert_eq!(extractor.delegated.calls(), 4);

        let extractor = MetadataExtractor::new(
            LocalSource::new(FakeReader::failing(Errno::EPERM)),
            DelegatedSource::disabled(),
        );
        assert_eq!(extractor.resolve_path(PID).await, None);
    }

    #[tokio::test]
    async fn malformed_arguments_are_empty() {
        let reader = FakeReader::with_procargs(raw_args(3, &[b"/bin/ls-l-ax"]));
        let extractor = MetadataExtractor::new(LocalSource::new(reader), FakePeer::default());
        assert!(extractor.resolve_arguments(PID).await.is_empty());

        let mut reader = FakeReader::with_procargs(raw_args(1, &[b"/bin/ls\0", b"-l\0"]));
        reader.arg_max = None;
        let extractor = MetadataExtractor::new(LocalSource::new(reader), FakePeer::default());
        assert!(extractor.resolve_arguments(PID).await.is_empty());
        assert_eq!(extractor.delegated.calls(), 0);
    }

    #[tokio::test]
    async fn enrich_fills_missing_fields() {
        let reader = FakeReader::with_procargs(raw_args(1, &[b"/bin/ls\0", b"-l\0"]));
        let extractor = MetadataExtractor::new(LocalSource::new(reader), FakePeer::default());

        let mut event = SecurityEvent::new(EventKind::ProcessCreate, 1, PID.as_raw());
        extractor.enrich(&mut event).await;
        assert_eq!(event.path, "/usr/bin/local");
        assert_eq!(event.ppid, 1);
        assert_eq!(
            event.process.as_ref().map(|p| p.argv.clone()),
            Some(vec!["-l".to_string()])
        );
    }

    /// Reader blocking the calling thread on every query.
    struct BlockingReader;

    impl BlockingReader {
        const DELAY: std::time::Duration = std::time::Duration::from_millis(50);
    }

    impl RawProcessReader for BlockingReader {
        fn image_path(&self, _pid: Pid) -> Result<PathBuf, ReadError> {
            std::thread::sleep(Self::DELAY);
            Ok(PathBuf::from("/usr/bin/slow"))
        }

        fn status(&self, _pid: Pid) -> Result<ProcessStatus, ReadError> {
            std::thread::sleep(Self::DELAY);
            Ok(ProcessStatus {
                ppid: Pid::from_raw(1),
            })
        }

        fn cwd(&self, _pid: Pid) -> Result<PathBuf, ReadError> {
            std::thread::sleep(Self::DELAY);
            Ok(PathBuf::from("/"))
        }

        fn arg_max(&self) -> Result<usize, ReadError> {
            Ok(4096)
        }

        fn procargs(&self, _pid: Pid, _size: usize) -> Result<Vec<u8>, ReadError> {
            std::thread::sleep(Self::DELAY);
            Ok(raw_args(0, &[b"/usr/bin/slow\0"]))
        }
    }

    #[tokio::test]
    async fn blocking_reads_do_not_serialize_extractions() {
        let extractor = MetadataExtractor::new(LocalSource::new(BlockingReader), FakePeer::default());

        let started = std::time::Instant::now();
        let (a, b, c, d) = tokio::join!(
            extractor.extract(Pid::from_raw(1)),
            extractor.extract(Pid::from_raw(2)),
            extractor.extract(Pid::from_raw(3)),
            extractor.extract(Pid::from_raw(4)),
        );
        // 20 blocking reads in a row would take a full second
        assert!(started.elapsed() < std::time::Duration::from_millis(500));
        for metadata in [a, b, c, d] {
            assert_eq!(metadata.path, Some(PathBuf::from("/usr/bin/slow")));
            assert_eq!(metadata.cwd, Some(PathBuf::from("/")));
        }
    }
}
