use facet::Facet;

/// How a tracking entry came to exist.
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum OpenKind {
    /// Opened by name through the tracked open path.
    Fopen,

    /// Anonymous temporary file; its name is never knowable.
    Tmpfile,

    /// Created by a close-and-reopen transition.
    Reopen,

    /// Synthesized for a handle the registry had never seen.
    Unknown,
}

impl OpenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OpenKind::Fopen => "fopen",
            OpenKind::Tmpfile => "tmpfile",
            OpenKind::Reopen => "reopen",
            OpenKind::Unknown => "unknown",
        }
    }
}

/// How a tracking entry was closed, if it was.
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum ClosedKind {
    NotClosed,

    /// Closed through the tracked close path.
    Fclose,

    /// Closed as the first half of a close-and-reopen transition.
    Reopen,

    Unknown,
}

impl ClosedKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ClosedKind::NotClosed => "not_closed",
            ClosedKind::Fclose => "fclose",
            ClosedKind::Reopen => "reopen",
            ClosedKind::Unknown => "unknown",
        }
    }
}
