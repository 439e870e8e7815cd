//! Compact `PT[nH][nM][nS]` durations as used by `contentDetails.duration`.

use crate::error::{CatalogError, Result};

/// Clips at or under this many seconds are treated as short-form.
pub const DEFAULT_SHORT_THRESHOLD_SECS: u64 = 60;

/// Parses a `PT[nH][nM][nS]` duration into whole seconds.
///
/// Components are optional but must appear in hour, minute, second order, each at most once.
/// Anything else (including day components such as `P1DT2H`) is rejected with
/// [`CatalogError::MalformedDuration`] rather than being read as zero.
pub fn parse_duration(duration: &str) -> Result<u64> {
    let malformed = || CatalogError::MalformedDuration(duration.to_string());

    let mut rest = duration.strip_prefix("PT").ok_or_else(malformed)?;
    let mut total: u64 = 0;
    // designators that may still appear, in order
    let mut allowed: &[(char, u64)] = &[('H', 3600), ('M', 60), ('S', 1)];

    while !rest.is_empty() {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return Err(malformed());
        }
        let (number, tail) = rest.split_at(digits);
        let mut chars = tail.chars();
        let designator = chars.next().ok_or_else(malformed)?;
        let position = allowed
            .iter()
            .position(|&(d, _)| d == designator)
            .ok_or_else(malformed)?;
        let unit = allowed[position].1;
        allowed = &allowed[position + 1..];

        let value: u64 = number.parse().map_err(|_| malformed())?;
        total = value
            .checked_mul(unit)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(malformed)?;
        rest = chars.as_str();
    }

    Ok(total)
}

/// Formats whole seconds back into the compact notation, omitting zero components.
pub fn format_duration(seconds: u64) -> String {
    if seconds == 0 {
        return "PT0S".to_string();
    }
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    let mut out = String::from("PT");
    if h > 0 {
        out.push_str(&format!("{h}H"));
    }
    if m > 0 {
        out.push_str(&format!("{m}M"));
    }
    if s > 0 {
        out.push_str(&format!("{s}S"));
    }
    out
}

/// Whether a clip of `duration_secs` counts as short-form under `threshold_secs`.
pub fn is_short(duration_secs: u64, threshold_secs: u64) -> bool {
    duration_secs <= threshold_secs
}

/// Anything with a duration in seconds.
pub trait HasDuration {
    fn duration_secs(&self) -> u64;
}

/// Keeps only the items that are not short-form under `threshold_secs`, preserving order.
pub fn filter_out_shorts<T: HasDuration>(items: Vec<T>, threshold_secs: u64) -> Vec<T> {
    items
        .into_iter()
        .filter(|item| !is_short(item.duration_secs(), threshold_secs))
        .collect()
}
