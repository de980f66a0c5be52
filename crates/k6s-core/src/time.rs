//! Timestamp helpers.
//!
//! All persisted timestamps are ISO-8601 UTC with millisecond precision
//! and a `Z` suffix (`2026-01-01T00:00:00.000Z`). Stored as TEXT; the
//! format sorts lexicographically, which the store relies on for
//! `ORDER BY` and range filters.

use chrono::{DateTime, SecondsFormat, Utc};

/// Current UTC time rendered in the canonical storage format.
#[must_use]
pub fn now_iso() -> String {
    to_iso(Utc::now())
}

/// Render a datetime in the canonical storage format.
#[must_use]
pub fn to_iso(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp back into a UTC datetime.
pub fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Current time plus `seconds`, in the canonical storage format.
#[must_use]
pub fn iso_after_seconds(seconds: i64) -> String {
    to_iso(Utc::now() + chrono::Duration::seconds(seconds))
}

/// True if the stored timestamp is in the past.
#[must_use]
pub fn is_past(iso: &str) -> bool {
    match parse_iso(iso) {
        Some(dt) => dt < Utc::now(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_iso_has_millis_and_z() {
        let ts = now_iso();
        assert!(ts.ends_with('Z'), "got: {ts}");
        // 2026-01-01T00:00:00.000Z → 24 chars
        assert_eq!(ts.len(), 24, "got: {ts}");
        assert_eq!(&ts[19..20], ".");
    }

    #[test]
    fn roundtrip() {
        let ts = now_iso();
        let parsed = parse_iso(&ts).unwrap();
        assert_eq!(to_iso(parsed), ts);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_iso("not a timestamp").is_none());
    }

    #[test]
    fn iso_ordering_is_lexicographic() {
        let earlier = "2026-01-01T00:00:00.000Z";
        let later = "2026-01-01T00:00:01.000Z";
        assert!(earlier < later);
        assert!(parse_iso(earlier).unwrap() < parse_iso(later).unwrap());
    }

    #[test]
    fn expiry_helpers() {
        let past = to_iso(Utc::now() - chrono::Duration::seconds(5));
        let future = iso_after_seconds(300);
        assert!(is_past(&past));
        assert!(!is_past(&future));
    }
}
