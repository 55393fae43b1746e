//! Entry Lifecycle Engine: the tracking registry and its state machine.
//!
//! The registry owns every tracking entry and the platform stream behind
//! it; callers hold only `StreamHandle` values and drive transitions
//! through the operations here. Callers are expected to hold the tracker's
//! global lock; the engine itself is a plain state machine.

use std::collections::HashMap;
use std::fs::File;

use compact_str::CompactString;
use tattle_types::{
    ClosedKind, EntrySnapshot, ErrorKind, MODE_LEN_MAX, OpenKind, Source, StreamHandle,
    SweepReport, TMPFILE_MODE, UNKNOWN_FILENAME, bounded_copy,
};

use crate::{diag, sys};

/// Initial capacity of both stores, from the original table sizing.
const ENTRY_TABLE_CAPACITY: usize = 64;

/// Filename bound used for synthesized entries, which always carry the
/// `"unknown"` placeholder.
const SYNTHESIZED_NAME_LIMIT: usize = 8;

// ── Retention ────────────────────────────────────────────

/// What happens to an entry once its stream closes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetentionMode {
    /// Closed entries are retained so leaks, double-closes and unsafe
    /// deletes can be inspected later.
    Diagnostic,

    /// Entries are dropped on close to bound memory; no filename index is
    /// maintained and no close history survives.
    Lean,
}

// ── Entries ──────────────────────────────────────────────

/// One tracked stream, live or historical.
pub struct TrackEntry {
    handle: StreamHandle,
    stream: Option<File>,
    filename: CompactString,
    mode: CompactString,
    open_kind: OpenKind,
    open_site: Source,
    last_mode_change_site: Option<Source>,
    closed_kind: ClosedKind,
    close_site: Option<Source>,
}

impl TrackEntry {
    pub fn handle(&self) -> StreamHandle {
        self.handle
    }

    pub fn filename(&self) -> &CompactString {
        &self.filename
    }

    pub fn mode(&self) -> &CompactString {
        &self.mode
    }

    pub fn open_kind(&self) -> OpenKind {
        self.open_kind
    }

    pub fn open_site(&self) -> Source {
        self.open_site
    }

    pub fn last_mode_change_site(&self) -> Option<Source> {
        self.last_mode_change_site
    }

    pub fn closed_kind(&self) -> ClosedKind {
        self.closed_kind
    }

    pub fn close_site(&self) -> Option<Source> {
        self.close_site
    }

    pub fn is_closed(&self) -> bool {
        !matches!(self.closed_kind, ClosedKind::NotClosed)
    }

    pub fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            handle: self.handle.raw(),
            filename: self.filename.to_string(),
            mode: self.mode.to_string(),
            open_kind: self.open_kind,
            open_site: self.open_site.to_string(),
            last_mode_change_site: self.last_mode_change_site.map(|site| site.to_string()),
            closed_kind: self.closed_kind,
            close_site: self.close_site.map(|site| site.to_string()),
        }
    }
}

// ── Deletion guard ───────────────────────────────────────

/// Verdict of the deletion guard.
pub enum RemovalVerdict {
    Allow,

    /// The file is still open; removing it now risks platform-dependent
    /// data loss. Carries the open call responsible.
    StillOpen {
        handle: StreamHandle,
        open_site: Source,
    },
}

// ── Registry ─────────────────────────────────────────────

/// The tracking registry: primary store keyed by stream handle, plus the
/// filename index consulted before deletions.
pub struct TrackRegistry {
    entries: HashMap<StreamHandle, TrackEntry>,

    // filename -> handle that currently owns it. Rows go stale when their
    // entry closes; the guard checks `is_closed` on lookup instead of
    // eagerly deleting them.
    filenames: HashMap<CompactString, StreamHandle>,

    retention: RetentionMode,
}

impl TrackRegistry {
    pub fn new(retention: RetentionMode) -> Self {
        Self {
            entries: HashMap::with_capacity(ENTRY_TABLE_CAPACITY),
            filenames: HashMap::with_capacity(ENTRY_TABLE_CAPACITY),
            retention,
        }
    }

    pub fn retention(&self) -> RetentionMode {
        self.retention
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, handle: StreamHandle) -> Option<&TrackEntry> {
        self.entries.get(&handle)
    }

    /// Creates a tracking entry for `handle`, overwriting any prior entry
    /// for that key (handle-reuse case). Invalid arguments are recorded
    /// into the diagnostic channel and leave the registry untouched.
    pub fn add(
        &mut self,
        handle: StreamHandle,
        open_kind: OpenKind,
        filename: &str,
        mode: &str,
        name_len_limit: usize,
        site: Source,
        stream: Option<File>,
    ) {
        if !handle.is_valid() {
            diag::record("entry_add", ErrorKind::InvalidArgument);
            tracing::error!(%handle, site = %site, "stream is invalid; file cannot be tracked");
            return;
        }
        if name_len_limit < 1 {
            diag::record("entry_add", ErrorKind::InvalidArgument);
            tracing::error!(site = %site, "name_len_limit must be at least 1");
            return;
        }

        let filename = bounded_copy(filename, name_len_limit);
        let mode = bounded_copy(mode, MODE_LEN_MAX);
        let index_exempt = mode == TMPFILE_MODE;

        let entry = TrackEntry {
            handle,
            stream,
            filename: filename.clone(),
            mode,
            open_kind,
            open_site: site,
            last_mode_change_site: None,
            closed_kind: ClosedKind::NotClosed,
            close_site: None,
        };
        self.entries.insert(handle, entry);

        // Anonymous temp files have no name to index.
        if index_exempt || self.retention == RetentionMode::Lean {
            return;
        }
        self.filenames.insert(filename, handle);
    }

    /// Records a mode change for an already-open handle. `filename` must be
    /// absent; anything else means the wrapper contract was violated, which
    /// is fatal rather than an ordinary runtime failure.
    ///
    /// A missing entry is recovered by synthesizing an UNKNOWN-origin entry
    /// so the handle keeps being tracked.
    pub fn update(&mut self, handle: StreamHandle, filename: Option<&str>, mode: &str, site: Source) {
        assert!(
            filename.is_none(),
            "filename must be absent when changing the mode of an open handle"
        );

        if !handle.is_valid() {
            diag::record("entry_update", ErrorKind::InvalidArgument);
            tracing::error!(%handle, site = %site, "stream is invalid; entry cannot be updated");
            return;
        }

        if !self.entries.contains_key(&handle) {
            diag::record("entry_update", ErrorKind::NotFound);
            tracing::error!(%handle, site = %site, "no entry found to update; the stream might not be tracked");
            self.add(
                handle,
                OpenKind::Unknown,
                UNKNOWN_FILENAME,
                mode,
                SYNTHESIZED_NAME_LIMIT,
                site,
                None,
            );
            return;
        }
        if let Some(entry) = self.entries.get_mut(&handle) {
            entry.mode = bounded_copy(mode, MODE_LEN_MAX);
            entry.last_mode_change_site = Some(site);
        }
    }

    /// Runs the close transition for `handle` and hands back the owned
    /// platform stream, if any, so the caller can perform the real close.
    ///
    /// Diagnostic retention keeps the closed entry for later inspection;
    /// lean retention deletes it outright.
    pub fn close(
        &mut self,
        handle: StreamHandle,
        closed_kind: ClosedKind,
        site: Source,
    ) -> Option<File> {
        if !self.entries.contains_key(&handle) {
            diag::record("entry_close", ErrorKind::NotFound);
            tracing::error!(%handle, site = %site, "no entry found to close; the stream might not be tracked");
            return None;
        }

        match self.retention {
            RetentionMode::Lean => self.entries.remove(&handle).and_then(|entry| entry.stream),
            RetentionMode::Diagnostic => {
                let entry = self.entries.get_mut(&handle)?;
                entry.closed_kind = closed_kind;
                entry.close_site = Some(site);
                entry.stream.take()
            }
        }
    }

    /// Moves an entry (and its filename index row) to a new handle value,
    /// after a mode-change reopen produced a different descriptor.
    pub fn rekey(&mut self, old: StreamHandle, new: StreamHandle) {
        if old == new {
            return;
        }
        let Some(mut entry) = self.entries.remove(&old) else {
            diag::record("entry_rekey", ErrorKind::InternalCorruption);
            tracing::error!(%old, %new, "no entry found to rekey");
            return;
        };
        entry.handle = new;
        if let Some(owner) = self.filenames.get_mut(entry.filename.as_str()) {
            if *owner == old {
                *owner = new;
            }
        }
        self.entries.insert(new, entry);
    }

    /// Swaps the owned platform stream of an entry, returning the previous
    /// one. Used by mode-change reopens, where the new stream replaces the
    /// old before the entry is rekeyed.
    pub fn swap_stream(&mut self, handle: StreamHandle, stream: Option<File>) -> Option<File> {
        match self.entries.get_mut(&handle) {
            Some(entry) => std::mem::replace(&mut entry.stream, stream),
            None => {
                diag::record("entry_update", ErrorKind::NotFound);
                tracing::error!(%handle, "no entry found to swap stream");
                drop(stream);
                None
            }
        }
    }

    /// Mutable access to the live stream behind `handle`, if any.
    pub fn stream_mut(&mut self, handle: StreamHandle) -> Option<&mut File> {
        self.entries
            .get_mut(&handle)
            .and_then(|entry| entry.stream.as_mut())
    }

    /// Answers "may a file by this name be removed right now".
    ///
    /// An absent index row, a stale row (entry since closed), or a row
    /// whose entry vanished (corruption, recorded) all allow the removal;
    /// only a row referencing a still-open entry denies it.
    pub fn removal_guard(
        &self,
        filename: &str,
        name_len_limit: usize,
        site: Source,
    ) -> RemovalVerdict {
        let key = bounded_copy(filename, name_len_limit);
        if key.is_empty() {
            diag::record("removal_guard", ErrorKind::InvalidArgument);
            tracing::error!(site = %site, "failed to take a bounded copy of the filename");
            return RemovalVerdict::Allow;
        }

        let Some(&owner) = self.filenames.get(key.as_str()) else {
            return RemovalVerdict::Allow;
        };
        let Some(entry) = self.entries.get(&owner) else {
            diag::record("removal_guard", ErrorKind::InternalCorruption);
            tracing::error!(filename = %key, handle = %owner, site = %site, "filename index references a vanished entry");
            return RemovalVerdict::Allow;
        };
        if entry.is_closed() {
            return RemovalVerdict::Allow;
        }
        RemovalVerdict::StillOpen {
            handle: owner,
            open_site: entry.open_site,
        }
    }

    /// Read-only view of one entry, if it is tracked.
    pub fn snapshot_of(&self, handle: StreamHandle) -> Option<EntrySnapshot> {
        self.entries.get(&handle).map(TrackEntry::snapshot)
    }

    /// Read-only snapshots of every entry, ordered by handle.
    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        let mut snapshots: Vec<EntrySnapshot> =
            self.entries.values().map(TrackEntry::snapshot).collect();
        snapshots.sort_by_key(|snapshot| snapshot.handle);
        snapshots
    }

    /// Shutdown sweep: force-closes every surviving open entry through the
    /// normal close path, then tears both stores down. Corrupted entries
    /// are recorded and skipped; the sweep never aborts early.
    pub fn sweep(&mut self, site: Source) -> SweepReport {
        let mut outcome = SweepReport::default();

        let handles: Vec<StreamHandle> = self.entries.keys().copied().collect();
        for handle in handles {
            outcome.swept += 1;

            if !handle.is_valid() {
                outcome.corrupted += 1;
                diag::record("sweep", ErrorKind::InternalCorruption);
                tracing::error!(%handle, "entry has an invalid stream identity");
                continue;
            }

            let snapshot = match self.entries.get(&handle) {
                Some(entry) if !entry.is_closed() => entry.snapshot(),
                _ => continue,
            };

            if let Some(stream) = self.close(handle, ClosedKind::Fclose, site) {
                if let Err(err) = sys::close_stream(stream) {
                    diag::record("sweep", ErrorKind::PlatformFailure);
                    tracing::error!(%handle, error = %err, "failed to close leaked stream");
                }
            }
            outcome.leaked.push(snapshot);
        }

        // Teardown: release the stores, not just their contents.
        self.entries = HashMap::new();
        self.filenames = HashMap::new();

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TrackRegistry {
        TrackRegistry::new(RetentionMode::Diagnostic)
    }

    fn add_plain(reg: &mut TrackRegistry, fd: i32, filename: &str) -> StreamHandle {
        let handle = StreamHandle::from_raw(fd);
        reg.add(
            handle,
            OpenKind::Fopen,
            filename,
            "w",
            256,
            Source::caller(),
            None,
        );
        handle
    }

    #[test]
    fn add_then_lookup() {
        let mut reg = registry();
        let handle = add_plain(&mut reg, 7, "a.txt");

        let entry = reg.entry(handle).expect("entry should exist");
        assert_eq!(entry.handle(), handle);
        assert_eq!(entry.filename(), "a.txt");
        assert_eq!(entry.mode(), "w");
        assert_eq!(entry.open_kind(), OpenKind::Fopen);
        assert!(!entry.is_closed());
        assert_eq!(entry.closed_kind(), ClosedKind::NotClosed);
        assert!(entry.close_site().is_none());
        assert!(entry.last_mode_change_site().is_none());
    }

    #[test]
    fn add_overwrites_on_handle_reuse() {
        let mut reg = registry();
        let handle = add_plain(&mut reg, 7, "a.txt");
        add_plain(&mut reg, 7, "b.txt");

        assert_eq!(reg.len(), 1);
        assert_eq!(reg.entry(handle).unwrap().filename(), "b.txt");
    }

    #[test]
    fn add_rejects_invalid_handle() {
        diag::clear();
        let mut reg = registry();
        reg.add(
            StreamHandle::from_raw(-1),
            OpenKind::Fopen,
            "a.txt",
            "w",
            256,
            Source::caller(),
            None,
        );

        assert!(reg.is_empty());
        assert_eq!(diag::last_error().unwrap().kind, ErrorKind::InvalidArgument);
        assert_eq!(diag::last_error().unwrap().op, "entry_add");
    }

    #[test]
    fn add_rejects_zero_name_limit() {
        diag::clear();
        let mut reg = registry();
        reg.add(
            StreamHandle::from_raw(7),
            OpenKind::Fopen,
            "a.txt",
            "w",
            0,
            Source::caller(),
            None,
        );

        assert!(reg.is_empty());
        assert_eq!(diag::last_error().unwrap().kind, ErrorKind::InvalidArgument);
    }

    #[test]
    fn add_bounds_the_filename_copy() {
        let mut reg = registry();
        let handle = StreamHandle::from_raw(7);
        reg.add(
            handle,
            OpenKind::Fopen,
            "abcdefgh",
            "w",
            4,
            Source::caller(),
            None,
        );
        assert_eq!(reg.entry(handle).unwrap().filename(), "abcd");
    }

    #[test]
    fn tmpfile_entries_are_not_indexed() {
        let mut reg = registry();
        let handle = StreamHandle::from_raw(7);
        reg.add(
            handle,
            OpenKind::Tmpfile,
            UNKNOWN_FILENAME,
            TMPFILE_MODE,
            8,
            Source::caller(),
            None,
        );

        assert!(matches!(
            reg.removal_guard(UNKNOWN_FILENAME, 256, Source::caller()),
            RemovalVerdict::Allow
        ));
    }

    #[test]
    fn update_replaces_mode_and_records_site() {
        let mut reg = registry();
        let handle = add_plain(&mut reg, 7, "a.txt");
        let open_site = reg.entry(handle).unwrap().open_site();

        reg.update(handle, None, "r", Source::caller());

        let entry = reg.entry(handle).unwrap();
        assert_eq!(entry.mode(), "r");
        assert!(entry.last_mode_change_site().is_some());
        // The open site and kind survive a mode change.
        assert_eq!(entry.open_site().line(), open_site.line());
        assert_eq!(entry.open_kind(), OpenKind::Fopen);
    }

    #[test]
    fn update_missing_entry_synthesizes_unknown() {
        diag::clear();
        let mut reg = registry();
        let handle = StreamHandle::from_raw(9);

        reg.update(handle, None, "r", Source::caller());

        assert_eq!(diag::last_error().unwrap().kind, ErrorKind::NotFound);
        let entry = reg.entry(handle).expect("entry should be synthesized");
        assert_eq!(entry.open_kind(), OpenKind::Unknown);
        assert_eq!(entry.filename(), UNKNOWN_FILENAME);
        assert_eq!(entry.mode(), "r");
        assert!(!entry.is_closed());
    }

    #[test]
    #[should_panic(expected = "filename must be absent")]
    fn update_with_filename_is_fatal() {
        let mut reg = registry();
        let handle = add_plain(&mut reg, 7, "a.txt");
        reg.update(handle, Some("b.txt"), "r", Source::caller());
    }

    #[test]
    fn close_marks_entry_and_keeps_it() {
        let mut reg = registry();
        let handle = add_plain(&mut reg, 7, "a.txt");

        reg.close(handle, ClosedKind::Fclose, Source::caller());

        let entry = reg.entry(handle).expect("closed entry is retained");
        assert!(entry.is_closed());
        assert_eq!(entry.closed_kind(), ClosedKind::Fclose);
        assert!(entry.close_site().is_some());
    }

    #[test]
    fn close_missing_entry_records_not_found() {
        diag::clear();
        let mut reg = registry();

        let stream = reg.close(StreamHandle::from_raw(7), ClosedKind::Fclose, Source::caller());

        assert!(stream.is_none());
        assert_eq!(diag::last_error().unwrap().kind, ErrorKind::NotFound);
        assert_eq!(diag::last_error().unwrap().op, "entry_close");
    }

    #[test]
    fn lean_close_removes_the_entry() {
        let mut reg = TrackRegistry::new(RetentionMode::Lean);
        let handle = add_plain(&mut reg, 7, "a.txt");

        reg.close(handle, ClosedKind::Fclose, Source::caller());

        assert!(reg.is_empty());
    }

    #[test]
    fn lean_add_skips_the_filename_index() {
        let mut reg = TrackRegistry::new(RetentionMode::Lean);
        add_plain(&mut reg, 7, "a.txt");

        assert!(matches!(
            reg.removal_guard("a.txt", 256, Source::caller()),
            RemovalVerdict::Allow
        ));
    }

    #[test]
    fn removal_guard_denies_while_open() {
        let mut reg = registry();
        let handle = add_plain(&mut reg, 7, "a.txt");

        match reg.removal_guard("a.txt", 256, Source::caller()) {
            RemovalVerdict::StillOpen {
                handle: owner,
                open_site,
            } => {
                assert_eq!(owner, handle);
                assert!(open_site.file().ends_with("registry.rs"));
            }
            RemovalVerdict::Allow => panic!("removal of an open file must be denied"),
        }
    }

    #[test]
    fn removal_guard_tolerates_stale_rows() {
        let mut reg = registry();
        let handle = add_plain(&mut reg, 7, "a.txt");
        reg.close(handle, ClosedKind::Fclose, Source::caller());

        // The index row is still there; only the entry's state changed.
        assert!(reg.filenames.contains_key("a.txt"));
        assert!(matches!(
            reg.removal_guard("a.txt", 256, Source::caller()),
            RemovalVerdict::Allow
        ));
    }

    #[test]
    fn removal_guard_reports_vanished_entries_and_continues() {
        diag::clear();
        let mut reg = registry();
        let handle = add_plain(&mut reg, 7, "a.txt");
        reg.entries.remove(&handle);

        assert!(matches!(
            reg.removal_guard("a.txt", 256, Source::caller()),
            RemovalVerdict::Allow
        ));
        assert_eq!(
            diag::last_error().unwrap().kind,
            ErrorKind::InternalCorruption
        );
    }

    #[test]
    fn removal_guard_truncates_the_query_like_the_stored_copy() {
        let mut reg = registry();
        let handle = StreamHandle::from_raw(7);
        reg.add(
            handle,
            OpenKind::Fopen,
            "abcdefgh",
            "w",
            4,
            Source::caller(),
            None,
        );

        // Stored under the bounded copy "abcd"; the same bound must apply
        // to the query for the row to be found.
        assert!(matches!(
            reg.removal_guard("abcdefgh", 4, Source::caller()),
            RemovalVerdict::StillOpen { .. }
        ));
    }

    #[test]
    fn rekey_moves_entry_and_index_row() {
        let mut reg = registry();
        let old = add_plain(&mut reg, 7, "a.txt");
        let new = StreamHandle::from_raw(11);

        reg.rekey(old, new);

        assert!(reg.entry(old).is_none());
        let entry = reg.entry(new).expect("entry should move");
        assert_eq!(entry.handle(), new);
        match reg.removal_guard("a.txt", 256, Source::caller()) {
            RemovalVerdict::StillOpen { handle, .. } => assert_eq!(handle, new),
            RemovalVerdict::Allow => panic!("index row should follow the rekey"),
        }
    }

    #[test]
    fn sweep_reports_exactly_the_open_entries() {
        let mut reg = registry();
        add_plain(&mut reg, 7, "a.txt");
        add_plain(&mut reg, 8, "b.txt");
        let closed = add_plain(&mut reg, 9, "c.txt");
        reg.close(closed, ClosedKind::Fclose, Source::caller());

        let outcome = reg.sweep(Source::caller());

        assert_eq!(outcome.leaked.len(), 2);
        assert_eq!(outcome.swept, 3);
        assert_eq!(outcome.corrupted, 0);
        let mut leaked: Vec<i32> = outcome.leaked.iter().map(|s| s.handle).collect();
        leaked.sort_unstable();
        assert_eq!(leaked, vec![7, 8]);

        // Teardown leaves both stores empty.
        assert!(reg.is_empty());
        assert!(reg.filenames.is_empty());
    }

    #[test]
    fn sweep_skips_corrupted_entries_without_aborting() {
        let mut reg = registry();
        add_plain(&mut reg, 7, "a.txt");
        let bad = StreamHandle::from_raw(-3);
        reg.entries.insert(
            bad,
            TrackEntry {
                handle: bad,
                stream: None,
                filename: CompactString::from("broken"),
                mode: CompactString::from("w"),
                open_kind: OpenKind::Unknown,
                open_site: Source::caller(),
                last_mode_change_site: None,
                closed_kind: ClosedKind::NotClosed,
                close_site: None,
            },
        );

        let outcome = reg.sweep(Source::caller());

        assert_eq!(outcome.swept, 2);
        assert_eq!(outcome.corrupted, 1);
        assert_eq!(outcome.leaked.len(), 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn closed_state_invariant_holds_both_ways() {
        let mut reg = registry();
        let handle = add_plain(&mut reg, 7, "a.txt");

        let entry = reg.entry(handle).unwrap();
        assert!(!entry.is_closed());
        assert_eq!(entry.closed_kind(), ClosedKind::NotClosed);
        assert!(entry.close_site().is_none());

        reg.close(handle, ClosedKind::Fclose, Source::caller());

        let entry = reg.entry(handle).unwrap();
        assert!(entry.is_closed());
        assert_ne!(entry.closed_kind(), ClosedKind::NotClosed);
        assert!(entry.close_site().is_some());
    }
}
