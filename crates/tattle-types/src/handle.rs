use std::fmt;

/// Platform identity of a stream: the raw file descriptor.
///
/// A freed descriptor may be reassigned by the platform to an unrelated new
/// stream; the registry accepts that aliasing and overwrites on key
/// collision rather than carrying a generation counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamHandle(i32);

impl StreamHandle {
    pub const STDIN: StreamHandle = StreamHandle(0);
    pub const STDOUT: StreamHandle = StreamHandle(1);
    pub const STDERR: StreamHandle = StreamHandle(2);

    pub const fn from_raw(fd: i32) -> Self {
        Self(fd)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Negative descriptors are the "no stream" value and never tracked.
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }

    /// Descriptors 0/1/2 are exempt from tracking entirely.
    pub const fn is_standard(self) -> bool {
        self.0 >= 0 && self.0 <= 2
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_descriptors_are_flagged() {
        assert!(StreamHandle::STDIN.is_standard());
        assert!(StreamHandle::STDOUT.is_standard());
        assert!(StreamHandle::STDERR.is_standard());
        assert!(!StreamHandle::from_raw(3).is_standard());
    }

    #[test]
    fn negative_descriptors_are_invalid() {
        assert!(!StreamHandle::from_raw(-1).is_valid());
        assert!(StreamHandle::from_raw(0).is_valid());
    }
}
