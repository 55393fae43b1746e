use facet::Facet;

use crate::{ClosedKind, OpenKind};

/// Read-only view of one tracking entry, produced for reporting.
#[derive(Facet, Clone, Debug)]
pub struct EntrySnapshot {
    /// Raw descriptor value of the tracked stream.
    pub handle: i32,

    /// Bounded copy of the name used to open the file; `"unknown"` when the
    /// originating name is not knowable.
    pub filename: String,

    /// Bounded copy of the open/access mode string.
    pub mode: String,

    pub open_kind: OpenKind,

    /// Call site of the open, as `{file}:{line}`.
    pub open_site: String,

    /// Call site of the most recent mode change, if any occurred.
    pub last_mode_change_site: Option<String>,

    pub closed_kind: ClosedKind,

    /// Call site of the close; absent while the entry is open.
    pub close_site: Option<String>,
}

impl EntrySnapshot {
    pub fn is_closed(&self) -> bool {
        !matches!(self.closed_kind, ClosedKind::NotClosed)
    }
}

/// Outcome of the shutdown sweep.
#[derive(Facet, Clone, Debug, Default)]
pub struct SweepReport {
    /// Entries that were still open when the sweep ran, force-closed.
    pub leaked: Vec<EntrySnapshot>,

    /// Total entries the sweep walked, open or closed.
    pub swept: u32,

    /// Entries skipped because a registry invariant was violated.
    pub corrupted: u32,
}
