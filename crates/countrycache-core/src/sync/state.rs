use std::fmt;

/// The two independently tracked request streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// The country list
    List,
    /// A single country by name
    Detail,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::List => write!(f, "list"),
            EntityKind::Detail => write!(f, "detail"),
        }
    }
}

/// Why a remote request was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Primary load, or network fallback after a cache miss
    Load,
    /// Explicit refresh of data that may already be displayed
    Refresh,
}

/// Flags consumers observe for one entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestStatus {
    pub loading: bool,
    pub refreshing: bool,
    pub failed: bool,
}

impl RequestStatus {
    pub fn idle() -> Self {
        Self::default()
    }

    /// Flag-wise OR of two sources.
    pub fn union(self, other: Self) -> Self {
        Self {
            loading: self.loading || other.loading,
            refreshing: self.refreshing || other.refreshing,
            failed: self.failed || other.failed,
        }
    }

    pub fn is_idle(&self) -> bool {
        *self == Self::idle()
    }
}

/// Snapshot of one kind's request bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestState {
    pub loading: bool,
    pub refreshing: bool,
    pub failed: bool,
    /// Key of the most recent load or refresh (always `None` for the list)
    pub last_requested_key: Option<String>,
}

/// Carried by every cache read and remote fetch so the result can be
/// matched to the request that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub kind: EntityKind,
    pub key: Option<String>,
    pub mode: FetchMode,
    /// Cancellation epoch of `kind` when the request started
    pub epoch: u64,
}
