//! fopen-style mode strings mapped onto `OpenOptions`.

use std::fs::OpenOptions;

/// Parses `r`, `w`, `a`, `r+`, `w+`, `a+`, with an optional `b` anywhere
/// after the first character. Returns `None` for anything else.
pub(crate) fn open_options(mode: &str) -> Option<OpenOptions> {
    let mut chars = mode.chars();
    let base = chars.next()?;

    let mut plus = false;
    for c in chars {
        match c {
            '+' if !plus => plus = true,
            // Binary flag: no effect on unix, accepted for compatibility.
            'b' => {}
            _ => return None,
        }
    }

    let mut options = OpenOptions::new();
    match (base, plus) {
        ('r', false) => options.read(true),
        ('r', true) => options.read(true).write(true),
        ('w', false) => options.write(true).create(true).truncate(true),
        ('w', true) => options.read(true).write(true).create(true).truncate(true),
        ('a', false) => options.append(true).create(true),
        ('a', true) => options.read(true).append(true).create(true),
        _ => return None,
    };
    Some(options)
}
