//! Connection parameters handed to the backend at attach time.

use std::fmt;

/// Tag of a single init-data entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitDataKind {
    XenEventChannel,
    MemoryMap,
    KvmiSocket,
}

impl fmt::Display for InitDataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitDataKind::XenEventChannel => write!(f, "xen-evtchn"),
            InitDataKind::MemoryMap => write!(f, "memmap"),
            InitDataKind::KvmiSocket => write!(f, "kvmi-socket"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitDataEntry {
    pub kind: InitDataKind,
    pub value: String,
}

/// Ordered set of (kind, owned value) connection parameters.
///
/// Every value is an independent copy of what the caller passed in, so the
/// caller's string may go away as soon as the builder returns. Dropping the
/// `InitData` releases the entries and the container together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitData {
    entries: Vec<InitDataEntry>,
}

impl InitData {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Build the init data for an optional KVMi socket path.
    ///
    /// Returns `None` when no path was given; the backend is then attached
    /// without any connection parameters.
    pub fn from_socket_path(path: Option<&str>) -> Option<Self> {
        path.map(|p| Self {
            entries: vec![InitDataEntry {
                kind: InitDataKind::KvmiSocket,
                value: p.to_owned(),
            }],
        })
    }

    pub fn push(&mut self, kind: InitDataKind, value: impl Into<String>) {
        self.entries.push(InitDataEntry {
            kind,
            value: value.into(),
        });
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[InitDataEntry] {
        &self.entries
    }

    pub fn get(&self, kind: InitDataKind) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.kind == kind)
            .map(|e| e.value.as_str())
    }

    pub fn socket_path(&self) -> Option<&str> {
        self.get(InitDataKind::KvmiSocket)
    }
}
