use std::{collections::BTreeMap, fmt, path::PathBuf};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Property key holding the remote endpoint of a [`EventKind::NetworkAccess`] event.
///
/// The value is the address followed by a space and the port, e.g. `10.0.0.1 443`.
pub const PROP_REMOTE_ADDR: &str = "RemoteAddress";
/// Property key holding the local endpoint of a network event.
pub const PROP_LOCAL_ADDR: &str = "LocalAddress";
/// Property key holding the queried name of a [`EventKind::DnsQuery`] event.
pub const PROP_DNS_QUERY: &str = "DnsQuery";
/// Property key holding the destination of a [`EventKind::FileRename`] event.
pub const PROP_NEW_PATH: &str = "NewPath";

/// Kind of a [`SecurityEvent`], as reported by the kernel event source.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum EventKind {
    ProcessCreate,
    ProcessExit,
    FileCreate,
    FileDelete,
    FileCloseModify,
    FileRename,
    NetworkAccess,
    #[serde(rename = "DNSQuery")]
    #[strum(serialize = "DNSQuery")]
    DnsQuery,
    /// Anything the agent doesn't know how to classify.
    #[serde(other)]
    Unknown,
}

impl EventKind {
    /// Returns the counter category of this kind, `None` for unknown kinds.
    pub fn category(&self) -> Option<Category> {
        match self {
            EventKind::ProcessCreate | EventKind::ProcessExit => Some(Category::Process),
            EventKind::FileCreate
            | EventKind::FileDelete
            | EventKind::FileCloseModify
            | EventKind::FileRename => Some(Category::File),
            EventKind::NetworkAccess | EventKind::DnsQuery => Some(Category::Network),
            EventKind::Unknown => None,
        }
    }

    /// Kernel sources only wait for a verdict on process creation.
    pub fn requires_authorization(&self) -> bool {
        matches!(self, EventKind::ProcessCreate)
    }
}

/// Event categories. Used both to index the counters and as display mode.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum Category {
    All,
    Process,
    File,
    Network,
}

impl Category {
    pub const COUNT: usize = 4;

    pub const ALL: [Category; Category::COUNT] = [
        Category::All,
        Category::Process,
        Category::File,
        Category::Network,
    ];

    pub fn index(&self) -> usize {
        match self {
            Category::All => 0,
            Category::Process => 1,
            Category::File => 2,
            Category::Network => 3,
        }
    }

    /// Returns true if a display mode set to `self` shows events of `category`.
    pub fn shows(&self, category: Category) -> bool {
        *self == Category::All || *self == category
    }
}

/// Process identity reconstructed by the metadata extractor.
///
/// Every field is optional: extraction is best effort and a partial record is
/// always acceptable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessMetadata {
    pub path: Option<PathBuf>,
    pub ppid: Option<i32>,
    pub cwd: Option<PathBuf>,
    /// Argument vector without the leading image path.
    pub argv: Vec<String>,
}

/// Security relevant event delivered by the kernel event source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub kind: EventKind,
    /// Seconds since the epoch.
    pub timestamp: u64,
    pub pid: i32,
    #[serde(default)]
    pub ppid: i32,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub props: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessMetadata>,
}

impl SecurityEvent {
    pub fn new(kind: EventKind, timestamp: u64, pid: i32) -> Self {
        Self {
            kind,
            timestamp,
            pid,
            ppid: 0,
            path: String::new(),
            props: BTreeMap::new(),
            process: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_ppid(mut self, ppid: i32) -> Self {
        self.ppid = ppid;
        self
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    pub fn prop(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(String::as_str)
    }

    /// Remote address of a network event, lower-cased.
    ///
    /// The property holds the address and the port separated by a space: only
    /// the token before the first space is returned.
    pub fn remote_address(&self) -> Option<String> {
        self.prop(PROP_REMOTE_ADDR)?
            .split(' ')
            .next()
            .filter(|addr| !addr.is_empty())
            .map(str::to_lowercase)
    }

    /// Attach extracted metadata. Fields already reported by the kernel source
    /// are kept.
    pub fn apply_metadata(&mut self, metadata: ProcessMetadata) {
        if self.path.is_empty() {
            if let Some(path) = &metadata.path {
                self.path = path.to_string_lossy().into_owned();
            }
        }
        if self.ppid == 0 {
            if let Some(ppid) = metadata.ppid {
                self.ppid = ppid;
            }
        }
        self.process = Some(metadata);
    }
}

/// Multi-line description used by list renderers and by the free-text filter.
impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Event Type: {}", self.kind)?;
        writeln!(f, "Timestamp: {}", self.timestamp)?;
        writeln!(f, "Pid: {} (Parent) -> {}", self.pid, self.ppid)?;
        writeln!(f, "ProcPath: {}", self.path)?;
        writeln!(f, "Props:")?;
        for (key, value) in &self.props {
            writeln!(f, "    {key}: {value}")?;
        }
        if let Some(process) = &self.process {
            if let Some(cwd) = &process.cwd {
                writeln!(f, "    Cwd: {}", cwd.display())?;
            }
            if !process.argv.is_empty() {
                writeln!(f, "    Args: {}", process.argv.join(" "))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_deserializes() {
        let event: SecurityEvent =
            serde_json::from_str(r#"{"kind":"KextLoad","timestamp":1,"pid":2}"#).unwrap();
        assert_eq!(event.kind, EventKind::Unknown);
        assert_eq!(event.kind.category(), None);

        let event: SecurityEvent =
            serde_json::from_str(r#"{"kind":"DNSQuery","timestamp":1,"pid":2}"#).unwrap();
        assert_eq!(event.kind, EventKind::DnsQuery);
    }

    #[test]
    fn remote_address_takes_first_token() {
        let event = SecurityEvent::new(EventKind::NetworkAccess, 0, 1)
            .with_prop(PROP_REMOTE_ADDR, "FE80::1 443");
        assert_eq!(event.remote_address().as_deref(), Some("fe80::1"));

        let event =
            SecurityEvent::new(EventKind::NetworkAccess, 0, 1).with_prop(PROP_REMOTE_ADDR, "");
        assert_eq!(event.remote_address(), None);
        assert_eq!(
            SecurityEvent::new(EventKind::NetworkAccess, 0, 1).remote_address(),
            None
        );
    }

    #[test]
    fn metadata_does_not_override_kernel_fields() {
        let mut event = SecurityEvent::new(EventKind::ProcessCreate, 0, 10)
            .with_path("/usr/bin/true")
            .with_ppid(0);
        event.apply_metadata(ProcessMetadata {
            path: Some("/proc/self/exe".into()),
            ppid: Some(1),
            cwd: Some("/tmp".into()),
            argv: vec!["-x".to_string()],
        });
        assert_eq!(event.path, "/usr/bin/true");
        assert_eq!(event.ppid, 1);

        let description = event.to_string();
        assert!(description.contains("Event Type: ProcessCreate"));
        assert!(description.contains("Pid: 10 (Parent) -> 1"));
        assert!(description.contains("Cwd: /tmp"));
        assert!(description.contains("Args: -x"));
    }

    #[test]
    fn display_mode_gating() {
        assert!(Category::All.shows(Category::File));
        assert!(Category::File.shows(Category::File));
        assert!(!Category::File.shows(Category::Process));
        assert_eq!("network".parse::<Category>().unwrap(), Category::Network);
    }
}
