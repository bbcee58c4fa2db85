//! Small host utilities shared by the runtime
//!
//! - [`hrtime`]: monotonic nanoseconds, unrelated to the time of day
//! - [`search`]: binary substring search

/// Current high-resolution monotonic time in nanoseconds.
///
/// Relative to an arbitrary point in the past and not subject to clock drift.
/// On Unix this reads `CLOCK_MONOTONIC` directly, so every thread sees the
/// same timeline.
#[inline]
#[cfg(unix)]
pub fn hrtime() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid pointer to a timespec struct
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    // tv_sec/tv_nsec types vary by platform
    #[allow(clippy::unnecessary_cast)]
    let secs = (ts.tv_sec as u64).saturating_mul(1_000_000_000);
    #[allow(clippy::unnecessary_cast)]
    secs.saturating_add(ts.tv_nsec as u64)
}

/// Fallback using `Instant` with a process-wide base time.
#[inline]
#[cfg(not(unix))]
pub fn hrtime() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static BASE: OnceLock<Instant> = OnceLock::new();
    let base = BASE.get_or_init(Instant::now);
    base.elapsed().as_nanos().try_into().unwrap_or(u64::MAX)
}

/// Position of the first occurrence of `needle` in `haystack`.
///
/// An empty needle matches at offset 0.
pub fn search(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    let first = needle[0];
    let last_start = haystack.len() - needle.len();
    let mut pos = 0;
    while pos <= last_start {
        // Skip ahead to the next candidate first byte
        match haystack[pos..=last_start].iter().position(|&b| b == first) {
            Some(offset) => pos += offset,
            None => return None,
        }
        if &haystack[pos..pos + needle.len()] == needle {
            return Some(pos);
        }
        pos += 1;
    }
    None
}
