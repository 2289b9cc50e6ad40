//! Common utility types shared across models

use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};

/// A byte range representing a contiguous region of a backing store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    /// Start byte (inclusive)
    pub start: u64,

    /// End byte (exclusive)
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Get the size of this range in bytes
    pub fn size(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Whether this range touches `other` (overlapping or contiguous)
    pub fn touches(&self, other: &ByteRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// The smallest range covering both `self` and `other`
    pub fn union(&self, other: &ByteRange) -> ByteRange {
        ByteRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

const UNITS: [&str; 9] = ["B", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

/// Convert bytes to human-readable form (e.g., "1.50 GB"); with
/// `add_bytes` the exact count is appended for operator output.
pub fn bytes_to_pretty(bytes: u64, add_bytes: bool) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;

    while value > 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if add_bytes {
        format!(
            "{:.2} {} ({} bytes)",
            value,
            UNITS[unit],
            bytes.to_formatted_string(&Locale::en)
        )
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
