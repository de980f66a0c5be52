//! The hook stdin payload.
//!
//! Host runtimes disagree on key names (`duration_ms`, `durationMs`,
//! `timing.elapsed_ms`, …) and sometimes ship the same value under two
//! of them, so the payload is kept as raw JSON with alias-aware
//! accessors instead of a rigid struct. Unknown fields are ignored.

use std::io::Read;

use chrono::{DateTime, Utc};

/// Maximum accepted stdin size. Anything larger is treated as a
/// truncated payload and the pipeline no-ops.
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Valid tool durations: non-negative, at most one hour.
pub const MAX_DURATION_MS: i64 = 3_600_000;

#[derive(Clone, Debug)]
pub struct HookPayload {
    raw: serde_json::Map<String, serde_json::Value>,
}

impl HookPayload {
    /// Parse a payload string. Empty, non-object, or malformed input is
    /// `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.trim().is_empty() {
            return None;
        }
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(map)) => Some(Self { raw: map }),
            _ => None,
        }
    }

    /// Read a payload from a stream, bounded to [`MAX_PAYLOAD_BYTES`].
    #[must_use]
    pub fn read_from(reader: &mut impl Read) -> Option<Self> {
        let mut buf = String::new();
        let mut bounded = reader.take(MAX_PAYLOAD_BYTES as u64 + 1);
        if bounded.read_to_string(&mut buf).is_err() {
            return None;
        }
        if buf.len() > MAX_PAYLOAD_BYTES {
            return None;
        }
        Self::parse(&buf)
    }

    fn first(&self, keys: &[&str]) -> Option<&serde_json::Value> {
        keys.iter().find_map(|k| self.raw.get(*k))
    }

    fn first_str(&self, keys: &[&str]) -> Option<&str> {
        self.first(keys).and_then(serde_json::Value::as_str)
    }

    #[must_use]
    pub fn tool_name(&self) -> Option<&str> {
        self.first_str(&["tool_name"])
    }

    #[must_use]
    pub fn tool_input(&self) -> Option<&serde_json::Value> {
        self.raw.get("tool_input")
    }

    #[must_use]
    pub fn tool_response(&self) -> Option<&serde_json::Value> {
        self.first(&["tool_response", "tool_result", "result"])
    }

    /// The host runtime's session identifier (external, not ours).
    #[must_use]
    pub fn external_session_id(&self) -> Option<&str> {
        self.first_str(&["session_id"])
    }

    #[must_use]
    pub fn tool_use_id(&self) -> Option<&str> {
        self.first_str(&["tool_use_id"])
    }

    /// Explicit duration if present and in range, else derived from the
    /// start/end timestamps. Out-of-range values are discarded.
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        const DURATION_KEYS: &[&str] = &["duration_ms", "durationMs", "elapsed_ms", "elapsedMs"];

        let explicit = self
            .first(DURATION_KEYS)
            .and_then(as_millis)
            .or_else(|| {
                self.raw
                    .get("timing")
                    .and_then(serde_json::Value::as_object)
                    .and_then(|timing| {
                        DURATION_KEYS.iter().find_map(|k| timing.get(*k).and_then(as_millis))
                    })
            });

        let candidate = explicit.or_else(|| self.derive_from_timestamps());
        candidate.filter(|ms| (0..=MAX_DURATION_MS).contains(ms))
    }

    fn derive_from_timestamps(&self) -> Option<i64> {
        const START_KEYS: &[&str] = &["started_at", "start_time", "startTime"];
        const END_KEYS: &[&str] = &["ended_at", "finished_at", "end_time", "endTime", "timestamp"];

        let lookup = |keys: &[&str]| -> Option<DateTime<Utc>> {
            self.first(keys)
                .or_else(|| {
                    self.raw
                        .get("timing")
                        .and_then(serde_json::Value::as_object)
                        .and_then(|timing| keys.iter().find_map(|k| timing.get(*k)))
                })
                .and_then(as_datetime)
        };

        let start = lookup(START_KEYS)?;
        let end = lookup(END_KEYS)?;
        Some((end - start).num_milliseconds())
    }
}

fn as_millis(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    }
}

fn as_datetime(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        serde_json::Value::Number(n) => {
            // Epoch milliseconds.
            n.as_i64().and_then(DateTime::from_timestamp_millis)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(json: &str) -> HookPayload {
        HookPayload::parse(json).unwrap()
    }

    #[test]
    fn parses_basic_fields() {
        let p = payload(
            r#"{"tool_name": "Write", "tool_input": {"path": "x.txt"},
                "session_id": "ext-1", "tool_use_id": "t-1", "tool_response": "ok"}"#,
        );
        assert_eq!(p.tool_name(), Some("Write"));
        assert_eq!(p.external_session_id(), Some("ext-1"));
        assert_eq!(p.tool_use_id(), Some("t-1"));
        assert_eq!(p.tool_input().unwrap()["path"], "x.txt");
        assert_eq!(p.tool_response().unwrap(), "ok");
    }

    #[test]
    fn response_aliases() {
        assert!(payload(r#"{"tool_result": 1}"#).tool_response().is_some());
        assert!(payload(r#"{"result": 1}"#).tool_response().is_some());
    }

    #[test]
    fn malformed_or_empty_is_none() {
        assert!(HookPayload::parse("").is_none());
        assert!(HookPayload::parse("   ").is_none());
        assert!(HookPayload::parse("{not json").is_none());
        assert!(HookPayload::parse("[1, 2]").is_none());
        assert!(HookPayload::parse("\"just a string\"").is_none());
    }

    #[test]
    fn extra_fields_ignored() {
        let p = payload(r#"{"tool_name": "Read", "totally_new_field": {"a": 1}}"#);
        assert_eq!(p.tool_name(), Some("Read"));
    }

    #[test]
    fn oversized_payload_rejected() {
        let huge = format!(r#"{{"pad": "{}"}}"#, "x".repeat(MAX_PAYLOAD_BYTES));
        let mut cursor = std::io::Cursor::new(huge.into_bytes());
        assert!(HookPayload::read_from(&mut cursor).is_none());
    }

    #[test]
    fn bounded_read_accepts_normal_payloads() {
        let mut cursor = std::io::Cursor::new(br#"{"tool_name": "Read"}"#.to_vec());
        let p = HookPayload::read_from(&mut cursor).unwrap();
        assert_eq!(p.tool_name(), Some("Read"));
    }

    #[test]
    fn explicit_duration_keys() {
        assert_eq!(payload(r#"{"duration_ms": 42}"#).duration_ms(), Some(42));
        assert_eq!(payload(r#"{"durationMs": 42}"#).duration_ms(), Some(42));
        assert_eq!(payload(r#"{"elapsed_ms": 42}"#).duration_ms(), Some(42));
        assert_eq!(payload(r#"{"elapsedMs": 42.7}"#).duration_ms(), Some(42));
    }

    #[test]
    fn timing_object_duration() {
        assert_eq!(
            payload(r#"{"timing": {"durationMs": 150}}"#).duration_ms(),
            Some(150)
        );
    }

    #[test]
    fn duration_out_of_range_discarded() {
        assert_eq!(payload(r#"{"duration_ms": -1}"#).duration_ms(), None);
        assert_eq!(payload(r#"{"duration_ms": 3600001}"#).duration_ms(), None);
        assert_eq!(payload(r#"{"duration_ms": 3600000}"#).duration_ms(), Some(3_600_000));
        assert_eq!(payload(r#"{"duration_ms": 0}"#).duration_ms(), Some(0));
    }

    #[test]
    fn duration_derived_from_timestamps() {
        let p = payload(
            r#"{"started_at": "2026-01-01T00:00:00.000Z",
                "ended_at": "2026-01-01T00:00:01.250Z"}"#,
        );
        assert_eq!(p.duration_ms(), Some(1250));
    }

    #[test]
    fn duration_from_alternate_timestamp_keys() {
        let p = payload(
            r#"{"startTime": "2026-01-01T00:00:00.000Z",
                "endTime": "2026-01-01T00:00:02.000Z"}"#,
        );
        assert_eq!(p.duration_ms(), Some(2000));
    }

    #[test]
    fn duration_from_epoch_millis() {
        let p = payload(r#"{"start_time": 1767225600000, "end_time": 1767225600500}"#);
        assert_eq!(p.duration_ms(), Some(500));
    }

    #[test]
    fn negative_timestamp_delta_discarded() {
        let p = payload(
            r#"{"started_at": "2026-01-01T00:00:05.000Z",
                "ended_at": "2026-01-01T00:00:00.000Z"}"#,
        );
        assert_eq!(p.duration_ms(), None);
    }

    #[test]
    fn explicit_duration_preferred_over_timestamps() {
        let p = payload(
            r#"{"duration_ms": 10,
                "started_at": "2026-01-01T00:00:00.000Z",
                "ended_at": "2026-01-01T00:00:05.000Z"}"#,
        );
        assert_eq!(p.duration_ms(), Some(10));
    }
}
