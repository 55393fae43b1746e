//! Process-scoped tracker: the global lock discipline and the wrappers
//! that preserve the lifecycle transition contract.
//!
//! One mutex serializes every mutating registry operation end to end,
//! including the platform I/O call itself. That trades throughput for a
//! total ordering of lifecycle events, which the double-close and
//! deletion-guard checks depend on.

use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use ctor::dtor;
use tattle_types::{
    ClosedKind, EntrySnapshot, ErrorKind, OpenKind, Result, Source, StreamHandle, SweepReport,
    TMPFILE_MODE, TrackError, UNKNOWN_FILENAME,
};

use crate::mode::open_options;
use crate::registry::{RemovalVerdict, RetentionMode, TrackRegistry};
use crate::{diag, report, sys};

/// Filename bound applied to entries that only ever carry the `"unknown"`
/// placeholder.
const UNKNOWN_NAME_LIMIT: usize = 8;

// ── Global instance ──────────────────────────────────────

static GLOBAL: OnceLock<FileTracker> = OnceLock::new();

fn default_retention() -> RetentionMode {
    if cfg!(feature = "diagnostics") {
        RetentionMode::Diagnostic
    } else {
        RetentionMode::Lean
    }
}

/// Process-exit leak sweep for the global tracker. Runs in the
/// single-threaded teardown context; a never-touched tracker is left alone.
#[dtor]
fn sweep_global_at_exit() {
    if let Some(tracker) = GLOBAL.get() {
        tracker.sweep();
    }
}

pub(crate) fn shutdown_global() -> Option<SweepReport> {
    GLOBAL.get().map(FileTracker::sweep)
}

// ── Tracker ──────────────────────────────────────────────

/// A tracking context: one registry behind one lock.
///
/// Embedders normally use [`FileTracker::global`]; tests construct
/// independent instances so they cannot observe each other's entries.
pub struct FileTracker {
    registry: Mutex<TrackRegistry>,
}

impl FileTracker {
    pub fn new(retention: RetentionMode) -> Self {
        Self {
            registry: Mutex::new(TrackRegistry::new(retention)),
        }
    }

    /// The process-wide tracker, created on first use. Retention follows
    /// the `diagnostics` feature.
    pub fn global() -> &'static FileTracker {
        GLOBAL.get_or_init(|| FileTracker::new(default_retention()))
    }

    // A panic elsewhere must not disable tracking.
    fn lock(&self) -> MutexGuard<'_, TrackRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` against the locked registry. Escape hatch for wrapper
    /// authors composing their own entry transitions.
    pub fn with_registry<R>(&self, f: impl FnOnce(&mut TrackRegistry) -> R) -> R {
        f(&mut self.lock())
    }

    // ── open ─────────────────────────────────────────────

    #[track_caller]
    pub fn open(&self, filename: &str, mode: &str, name_len_limit: usize) -> Result<StreamHandle> {
        self.open_with_source(filename, mode, name_len_limit, Source::caller())
    }

    pub fn open_with_source(
        &self,
        filename: &str,
        mode: &str,
        name_len_limit: usize,
        source: Source,
    ) -> Result<StreamHandle> {
        let mut reg = self.lock();

        if filename.is_empty() {
            return fail("open", source, invalid("open", "filename is empty"));
        }
        if mode.is_empty() {
            return fail("open", source, invalid("open", "mode is empty"));
        }
        if name_len_limit < 1 {
            return fail("open", source, invalid("open", "name_len_limit must be at least 1"));
        }
        let Some(options) = open_options(mode) else {
            return fail("open", source, invalid("open", "unrecognized mode string"));
        };

        let file = match options.open(filename) {
            Ok(file) => file,
            // No entry is created for a failed open.
            Err(err) => return fail("open", source, platform("open", err)),
        };
        let handle = StreamHandle::from_raw(file.as_raw_fd());
        reg.add(
            handle,
            OpenKind::Fopen,
            filename,
            mode,
            name_len_limit,
            source,
            Some(file),
        );
        succeed(handle)
    }

    // ── temp-open ────────────────────────────────────────

    #[track_caller]
    pub fn temp_open(&self) -> Result<StreamHandle> {
        self.temp_open_with_source(Source::caller())
    }

    pub fn temp_open_with_source(&self, source: Source) -> Result<StreamHandle> {
        let mut reg = self.lock();

        let file = match tempfile::tempfile() {
            Ok(file) => file,
            Err(err) => return fail("temp_open", source, platform("temp_open", err)),
        };
        let handle = StreamHandle::from_raw(file.as_raw_fd());
        reg.add(
            handle,
            OpenKind::Tmpfile,
            UNKNOWN_FILENAME,
            TMPFILE_MODE,
            UNKNOWN_NAME_LIMIT,
            source,
            Some(file),
        );
        succeed(handle)
    }

    // ── reopen ───────────────────────────────────────────

    /// Reopen with a filename is close-and-reopen: the old entry closes
    /// with kind `Reopen` and a fresh entry is created for the resulting
    /// handle. Reopen without a filename changes the access mode of the
    /// existing entry in place, preserving its open site and kind; the
    /// resulting handle may differ from the one passed in.
    #[track_caller]
    pub fn reopen(
        &self,
        filename: Option<&str>,
        mode: &str,
        handle: StreamHandle,
        name_len_limit: usize,
    ) -> Result<StreamHandle> {
        self.reopen_with_source(filename, mode, handle, name_len_limit, Source::caller())
    }

    pub fn reopen_with_source(
        &self,
        filename: Option<&str>,
        mode: &str,
        handle: StreamHandle,
        name_len_limit: usize,
        source: Source,
    ) -> Result<StreamHandle> {
        let mut reg = self.lock();

        if matches!(filename, Some("")) {
            return fail("reopen", source, invalid("reopen", "filename is empty"));
        }
        if mode.is_empty() {
            return fail("reopen", source, invalid("reopen", "mode is empty"));
        }
        if !handle.is_valid() {
            return fail("reopen", source, invalid("reopen", "stream handle is invalid"));
        }
        if name_len_limit < 1 {
            return fail(
                "reopen",
                source,
                invalid("reopen", "name_len_limit must be at least 1"),
            );
        }
        let Some(options) = open_options(mode) else {
            return fail("reopen", source, invalid("reopen", "unrecognized mode string"));
        };

        match filename {
            Some(name) => {
                if handle.is_standard() {
                    // Standard streams are redirected but never tracked.
                    let file = match options.open(name) {
                        Ok(file) => file,
                        Err(err) => return fail("reopen", source, platform("reopen", err)),
                    };
                    return match sys::dup_onto(&file, handle.raw()) {
                        Ok(()) => succeed(handle),
                        Err(err) => fail("reopen", source, platform("reopen", err)),
                    };
                }

                let was_open = reg.entry(handle).map(|entry| !entry.is_closed());
                match options.open(name) {
                    Ok(file) => {
                        let old = reg.close(handle, ClosedKind::Reopen, source);
                        retire_old_stream("reopen", handle, old, was_open, source);

                        let new_handle = StreamHandle::from_raw(file.as_raw_fd());
                        reg.add(
                            new_handle,
                            OpenKind::Reopen,
                            name,
                            mode,
                            name_len_limit,
                            source,
                            Some(file),
                        );
                        succeed(new_handle)
                    }
                    Err(err) => {
                        // A failed platform reopen closes the original
                        // stream regardless.
                        let old = reg.close(handle, ClosedKind::Reopen, source);
                        retire_old_stream("reopen", handle, old, was_open, source);
                        fail("reopen", source, platform("reopen", err))
                    }
                }
            }
            None => {
                let state = reg
                    .entry(handle)
                    .map(|entry| (entry.filename().clone(), entry.is_closed()));
                match state {
                    None => {
                        // Keep tracking the handle rather than losing it;
                        // the echo keeps the recovery visible.
                        diag::record("reopen", ErrorKind::NotFound);
                        tracing::error!(%handle, site = %source, "no entry found to update; the stream might not be tracked");
                        reg.update(handle, None, mode, source);
                        Ok(handle)
                    }
                    Some((_, true)) => fail(
                        "reopen",
                        source,
                        TrackError::Misuse {
                            op: "reopen",
                            reason: "stream already closed".to_string(),
                        },
                    ),
                    Some((name, false)) if name == UNKNOWN_FILENAME => {
                        // No name to reopen under; platform semantics still
                        // close the original stream.
                        let old = reg.close(handle, ClosedKind::Reopen, source);
                        retire_old_stream("reopen", handle, old, Some(true), source);
                        fail(
                            "reopen",
                            source,
                            platform(
                                "reopen",
                                io::Error::new(
                                    io::ErrorKind::Unsupported,
                                    "stream has no knowable filename",
                                ),
                            ),
                        )
                    }
                    Some((name, false)) => match options.open(name.as_str()) {
                        Ok(file) => {
                            let new_handle = StreamHandle::from_raw(file.as_raw_fd());
                            let old = reg.swap_stream(handle, Some(file));
                            retire_old_stream("reopen", handle, old, Some(true), source);
                            reg.rekey(handle, new_handle);
                            reg.update(new_handle, None, mode, source);
                            succeed(new_handle)
                        }
                        Err(err) => {
                            let old = reg.close(handle, ClosedKind::Reopen, source);
                            retire_old_stream("reopen", handle, old, Some(true), source);
                            fail("reopen", source, platform("reopen", err))
                        }
                    },
                }
            }
        }
    }

    // ── close ────────────────────────────────────────────

    #[track_caller]
    pub fn close(&self, handle: StreamHandle) -> Result<()> {
        self.close_with_source(handle, Source::caller())
    }

    pub fn close_with_source(&self, handle: StreamHandle, source: Source) -> Result<()> {
        let mut reg = self.lock();

        if !handle.is_valid() {
            return fail(
                "close",
                source,
                TrackError::Misuse {
                    op: "close",
                    reason: "stream handle is invalid".to_string(),
                },
            );
        }
        if handle.is_standard() {
            return fail(
                "close",
                source,
                TrackError::Misuse {
                    op: "close",
                    reason: format!("cannot close standard stream (descriptor {handle})"),
                },
            );
        }

        match reg.entry(handle).map(|e| (e.is_closed(), e.close_site())) {
            // Never invoke the platform close twice.
            Some((true, prev_site)) => {
                let reason = match prev_site {
                    Some(site) => format!("stream already closed at {site}"),
                    None => "stream already closed".to_string(),
                };
                fail(
                    "close",
                    source,
                    TrackError::Misuse {
                        op: "close",
                        reason,
                    },
                )
            }
            Some((false, _)) => {
                let stream = reg.close(handle, ClosedKind::Fclose, source);
                // The handle identity is retired whether or not the
                // platform close succeeds.
                match retire(stream, handle) {
                    Ok(()) => succeed(()),
                    Err(err) => fail("close", source, platform("close", err)),
                }
            }
            None => {
                diag::record("close", ErrorKind::NotFound);
                tracing::error!(%handle, site = %source, "no entry found to close; the stream might not be tracked");
                match sys::close_fd(handle.raw()) {
                    // The echo keeps the missing entry visible.
                    Ok(()) => Ok(()),
                    Err(err) => fail("close", source, platform("close", err)),
                }
            }
        }
    }

    // ── remove ───────────────────────────────────────────

    #[track_caller]
    pub fn remove(&self, filename: &str, name_len_limit: usize) -> Result<()> {
        self.remove_with_source(filename, name_len_limit, Source::caller())
    }

    pub fn remove_with_source(
        &self,
        filename: &str,
        name_len_limit: usize,
        source: Source,
    ) -> Result<()> {
        let reg = self.lock();

        if filename.is_empty() {
            return fail("remove", source, invalid("remove", "filename is empty"));
        }
        if name_len_limit < 1 {
            return fail(
                "remove",
                source,
                invalid("remove", "name_len_limit must be at least 1"),
            );
        }

        match reg.removal_guard(filename, name_len_limit, source) {
            RemovalVerdict::StillOpen { handle, open_site } => fail(
                "remove",
                source,
                TrackError::RemoveDenied {
                    filename: filename.to_string(),
                    handle,
                    open_site: open_site.to_string(),
                },
            ),
            RemovalVerdict::Allow => match std::fs::remove_file(filename) {
                Ok(()) => succeed(()),
                Err(err) => fail("remove", source, platform("remove", err)),
            },
        }
    }

    // ── stream access ────────────────────────────────────

    /// Runs `f` on the live stream behind `handle`, under the global lock.
    #[track_caller]
    pub fn with_stream<R>(
        &self,
        handle: StreamHandle,
        f: impl FnOnce(&mut File) -> io::Result<R>,
    ) -> Result<R> {
        let source = Source::caller();
        let mut reg = self.lock();
        let Some(stream) = reg.stream_mut(handle) else {
            return fail(
                "with_stream",
                source,
                TrackError::NotFound {
                    op: "with_stream",
                    handle,
                },
            );
        };
        match f(stream) {
            Ok(value) => succeed(value),
            Err(err) => fail("with_stream", source, platform("with_stream", err)),
        }
    }

    // ── reporting & sweep ────────────────────────────────

    /// Snapshots every entry and emits the formatted dump.
    pub fn dump_all(&self) -> Vec<EntrySnapshot> {
        let snapshots = self.lock().snapshot();
        report::emit_dump(&snapshots);
        snapshots
    }

    /// Force-closes every surviving open entry, reports each leak, and
    /// tears the registry down.
    #[track_caller]
    pub fn sweep(&self) -> SweepReport {
        let source = Source::caller();
        let outcome = self.lock().sweep(source);
        for entry in &outcome.leaked {
            report::emit_leak(entry);
        }
        outcome
    }
}

// ── Shared failure plumbing ──────────────────────────────

fn invalid(op: &'static str, reason: &'static str) -> TrackError {
    TrackError::InvalidArgument { op, reason }
}

fn platform(op: &'static str, source: io::Error) -> TrackError {
    TrackError::Platform { op, source }
}

fn fail<T>(op: &'static str, source: Source, err: TrackError) -> Result<T> {
    diag::record(op, err.kind());
    tracing::error!(op, site = %source, error = %err, "file tracking operation failed");
    Err(err)
}

fn succeed<T>(value: T) -> Result<T> {
    diag::clear();
    Ok(value)
}

/// Performs the platform close for a retired handle: the engine-owned
/// stream when there is one, the raw descriptor otherwise (untracked or
/// synthesized entries, whose descriptor the caller asked us to retire).
fn retire(stream: Option<File>, handle: StreamHandle) -> io::Result<()> {
    match stream {
        Some(stream) => sys::close_stream(stream),
        None => sys::close_fd(handle.raw()),
    }
}

/// Retires the original stream during a reopen. `was_open == Some(false)`
/// means the entry was already closed earlier, in which case the
/// descriptor must not be closed a second time.
fn retire_old_stream(
    op: &'static str,
    handle: StreamHandle,
    stream: Option<File>,
    was_open: Option<bool>,
    source: Source,
) {
    if stream.is_none() && was_open == Some(false) {
        return;
    }
    if let Err(err) = retire(stream, handle) {
        diag::record(op, ErrorKind::PlatformFailure);
        tracing::error!(%handle, site = %source, error = %err, "failed to close the original stream");
    }
}
