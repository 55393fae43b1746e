//! Per-thread "last failing operation" echo.
//!
//! Every public operation returns an explicit `Result`; this channel is the
//! compatibility echo for call sites that cannot change their signature.
//! It is thread-scoped so one thread's failure is never attributed to
//! another thread's concurrent call.

use std::cell::Cell;

use tattle_types::ErrorKind;

/// The most recent failing operation on this thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LastError {
    /// Operation name, e.g. `"close"` or `"entry_add"`.
    pub op: &'static str,
    pub kind: ErrorKind,
}

thread_local! {
    static LAST_ERROR: Cell<Option<LastError>> = const { Cell::new(None) };
}

/// Reads the echo without clearing it; `None` when no error has occurred
/// since the last successful operation on this thread.
pub fn last_error() -> Option<LastError> {
    LAST_ERROR.with(|cell| cell.get())
}

pub(crate) fn record(op: &'static str, kind: ErrorKind) {
    LAST_ERROR.with(|cell| cell.set(Some(LastError { op, kind })));
}

pub(crate) fn clear() {
    LAST_ERROR.with(|cell| cell.set(None));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_clear_round_trips() {
        clear();
        assert_eq!(last_error(), None);

        record("close", ErrorKind::Misuse);
        assert_eq!(
            last_error(),
            Some(LastError {
                op: "close",
                kind: ErrorKind::Misuse
            })
        );

        clear();
        assert_eq!(last_error(), None);
    }

    #[test]
    fn echo_is_thread_scoped() {
        clear();
        record("open", ErrorKind::InvalidArgument);

        let other = std::thread::spawn(|| last_error()).join().unwrap();
        assert_eq!(other, None);
        assert!(last_error().is_some());
    }
}
