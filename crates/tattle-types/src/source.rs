use std::fmt;
use std::panic::Location;

use compact_str::CompactString;

/// Call site responsible for a lifecycle transition, as `{file}:{line}`.
#[derive(Clone, Copy, Debug)]
pub struct Source {
    location: &'static Location<'static>,
}

impl Source {
    #[track_caller]
    pub fn caller() -> Self {
        Self {
            location: Location::caller(),
        }
    }

    pub fn file(&self) -> &'static str {
        self.location.file()
    }

    pub fn line(&self) -> u32 {
        self.location.line()
    }

    pub fn render(&self) -> CompactString {
        CompactString::from(format!(
            "{}:{}",
            self.location.file(),
            self.location.line()
        ))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.location.file(), self.location.line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_captures_this_file() {
        let source = Source::caller();
        assert!(source.file().ends_with("source.rs"));
        assert!(source.line() > 0);
        assert_eq!(source.render(), format!("{source}"));
    }
}
