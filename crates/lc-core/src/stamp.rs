//! Timestamp formatting shared by request naming and the fault log.
//!
//! The format (`2026-08-29_14:03:22.07`, hundredths of a second) matches the
//! stamps embedded in existing request file names, so records created by
//! older deployments keep sorting correctly next to new ones.

use chrono::{DateTime, Local, Timelike};

/// Current local time in the record-stamp format.
pub fn now() -> String {
    format(Local::now())
}

/// Format a specific instant in the record-stamp format.
pub fn format(t: DateTime<Local>) -> String {
    let centis = t.nanosecond() / 10_000_000;
    format!("{}.{:02}", t.format("%Y-%m-%d_%H:%M:%S"), centis)
}
