//! Reporting sink: renders read-only snapshots into human-readable lines
//! and emits them through `tracing`.

use tattle_types::{ClosedKind, EntrySnapshot};

/// One-line human-readable rendition of a snapshot.
pub fn render(entry: &EntrySnapshot) -> String {
    let mut line = format!(
        "handle {} file '{}' mode '{}' opened {} at {}",
        entry.handle,
        entry.filename,
        entry.mode,
        entry.open_kind.as_str(),
        entry.open_site,
    );
    if let Some(site) = &entry.last_mode_change_site {
        line.push_str(&format!(", mode changed at {site}"));
    }
    match (entry.closed_kind, &entry.close_site) {
        (ClosedKind::NotClosed, _) => line.push_str(", still open"),
        (kind, Some(site)) => line.push_str(&format!(", closed {} at {}", kind.as_str(), site)),
        (kind, None) => line.push_str(&format!(", closed {}", kind.as_str())),
    }
    line
}

/// JSON rendition of a snapshot, for machine consumers.
pub fn render_json(entry: &EntrySnapshot) -> String {
    facet_json::to_string(entry).unwrap()
}

pub(crate) fn emit_dump(entries: &[EntrySnapshot]) {
    tracing::info!(count = entries.len(), "tracked stream dump");
    for entry in entries {
        tracing::info!(target: "tattle::report", "{}", render(entry));
    }
}

pub(crate) fn emit_leak(entry: &EntrySnapshot) {
    tracing::error!(target: "tattle::report", "file not closed: {}", render(entry));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tattle_types::OpenKind;

    fn snapshot() -> EntrySnapshot {
        EntrySnapshot {
            handle: 7,
            filename: "a.txt".to_string(),
            mode: "w".to_string(),
            open_kind: OpenKind::Fopen,
            open_site: "src/main.rs:10".to_string(),
            last_mode_change_site: None,
            closed_kind: ClosedKind::NotClosed,
            close_site: None,
        }
    }

    #[test]
    fn open_entries_render_as_still_open() {
        let line = render(&snapshot());
        assert_eq!(
            line,
            "handle 7 file 'a.txt' mode 'w' opened fopen at src/main.rs:10, still open"
        );
    }

    #[test]
    fn closed_entries_render_their_close_site() {
        let mut entry = snapshot();
        entry.closed_kind = ClosedKind::Fclose;
        entry.close_site = Some("src/main.rs:20".to_string());
        entry.last_mode_change_site = Some("src/main.rs:15".to_string());

        let line = render(&entry);
        assert!(line.contains("mode changed at src/main.rs:15"));
        assert!(line.ends_with("closed fclose at src/main.rs:20"));
    }

    #[test]
    fn json_rendition_carries_the_kinds() {
        let json = render_json(&snapshot());
        assert!(json.contains("\"fopen\""));
        assert!(json.contains("\"not_closed\""));
    }
}
