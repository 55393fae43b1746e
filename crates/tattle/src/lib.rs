//! Diagnostic tracker for file-stream lifecycles.
//!
//! Wraps open, reopen, mode-change, close and delete so every live and
//! historical handle is registered with the call site responsible. Leaks
//! are reported and force-closed by a shutdown sweep, double-closes are
//! rejected before the platform is touched, and deleting a file the
//! process still has open is denied with the offending open site.
//!
//! Unix-only: handle identity is the file descriptor.
//!
//! ```no_run
//! use tattle::{FileTracker, RetentionMode};
//!
//! let tracker = FileTracker::new(RetentionMode::Diagnostic);
//! let handle = tracker.open("data.txt", "w", 256)?;
//! tracker.with_stream(handle, |f| {
//!     use std::io::Write;
//!     f.write_all(b"hello")
//! })?;
//! assert!(tracker.remove("data.txt", 256).is_err()); // still open
//! tracker.close(handle)?;
//! tracker.remove("data.txt", 256)?;
//! # Ok::<(), tattle::TrackError>(())
//! ```

pub mod diag;
mod mode;
mod registry;
mod report;
mod sys;
mod tracker;


pub use registry::{RemovalVerdict, RetentionMode, TrackEntry, TrackRegistry};
pub use report::{render, render_json};
pub use tattle_types::{
    ClosedKind, EntrySnapshot, ErrorKind, MODE_LEN_MAX, OpenKind, Result, Source, StreamHandle,
    SweepReport, TMPFILE_MODE, TrackError, UNKNOWN_FILENAME, bounded_copy,
};
pub use tracker::FileTracker;

use std::fs::File;
use std::io;

/// Opens `filename` through the global tracker.
#[track_caller]
pub fn open(filename: &str, mode: &str, name_len_limit: usize) -> Result<StreamHandle> {
    FileTracker::global().open_with_source(filename, mode, name_len_limit, Source::caller())
}

/// Opens an anonymous temporary file through the global tracker.
#[track_caller]
pub fn temp_open() -> Result<StreamHandle> {
    FileTracker::global().temp_open_with_source(Source::caller())
}

/// Reopens `handle` through the global tracker: with a filename this is
/// close-and-reopen, without one it changes the access mode in place.
#[track_caller]
pub fn reopen(
    filename: Option<&str>,
    mode: &str,
    handle: StreamHandle,
    name_len_limit: usize,
) -> Result<StreamHandle> {
    FileTracker::global().reopen_with_source(filename, mode, handle, name_len_limit, Source::caller())
}

/// Closes `handle` through the global tracker.
#[track_caller]
pub fn close(handle: StreamHandle) -> Result<()> {
    FileTracker::global().close_with_source(handle, Source::caller())
}

/// Removes `filename` through the global tracker, unless the file is still
/// open.
#[track_caller]
pub fn remove(filename: &str, name_len_limit: usize) -> Result<()> {
    FileTracker::global().remove_with_source(filename, name_len_limit, Source::caller())
}

/// Runs `f` on the live stream behind `handle` in the global tracker.
#[track_caller]
pub fn with_stream<R>(
    handle: StreamHandle,
    f: impl FnOnce(&mut File) -> io::Result<R>,
) -> Result<R> {
    FileTracker::global().with_stream(handle, f)
}

/// Dumps every entry of the global tracker through the reporting sink.
pub fn dump_all() -> Vec<EntrySnapshot> {
    FileTracker::global().dump_all()
}

/// Sweeps the global tracker now instead of waiting for process exit.
/// `None` when it was never used.
pub fn shutdown() -> Option<SweepReport> {
    tracker::shutdown_global()
}
