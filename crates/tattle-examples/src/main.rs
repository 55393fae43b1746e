//! Provokes each failure tattle reports: a denied delete, a double close,
//! and a leak picked up by the exit sweep.
//!
//! Run with `RUST_LOG=info` (or `debug`) to see the report lines.

use std::io::Write;

use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let dir = tempfile::tempdir().expect("scenario scratch dir");
    let path = dir.path().join("report.txt");
    let path = path.to_str().expect("scratch paths are utf-8");

    // A well-behaved open/write.
    let handle = tattle::open(path, "w", 256).expect("open should succeed");
    tattle::with_stream(handle, |f| f.write_all(b"scenario output\n"))
        .expect("write should succeed");

    // Deleting a file we still have open is denied, with the open site.
    match tattle::remove(path, 256) {
        Err(err) => tracing::info!("delete denied as expected: {err}"),
        Ok(()) => tracing::warn!("delete unexpectedly allowed"),
    }

    tattle::close(handle).expect("close should succeed");

    // A second close is misuse and never reaches the platform.
    if let Err(err) = tattle::close(handle) {
        tracing::info!("double close rejected as expected: {err}");
    }

    tattle::remove(path, 256).expect("remove after close should succeed");

    // Mode change keeps the entry, its open site, and its history.
    let log = dir.path().join("rw.txt");
    let log = log.to_str().unwrap();
    let writer = tattle::open(log, "w", 256).expect("open should succeed");
    tattle::with_stream(writer, |f| f.write_all(b"line\n")).expect("write should succeed");
    let reader = tattle::reopen(None, "r", writer, 256).expect("mode change should succeed");
    tattle::close(reader).expect("close should succeed");

    // Leak on purpose: the exit sweep force-closes it and reports the
    // open site below.
    let leaked = dir.path().join("leaked.txt");
    tattle::open(leaked.to_str().unwrap(), "w", 256).expect("open should succeed");

    tattle::dump_all();
}
