//! Core nomenclature shared across the tattle runtime.
//!
//! - `StreamHandle`: platform identity of a tracked stream.
//! - `OpenKind` / `ClosedKind`: how an entry came to exist and how it ended.
//! - `Source`: the call site responsible for a lifecycle transition.
//! - `TrackError`: the per-call failure value, with its `ErrorKind` taxonomy.
//! - `EntrySnapshot` / `SweepReport`: read-only views consumed by reporting.

pub(crate) mod bounded;
pub(crate) mod error;
pub(crate) mod handle;
pub(crate) mod kinds;
pub(crate) mod snapshots;
pub(crate) mod source;

pub use bounded::*;
pub use error::*;
pub use handle::*;
pub use kinds::*;
pub use snapshots::*;
pub use source::*;
