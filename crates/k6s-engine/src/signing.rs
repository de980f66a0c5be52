//! Key lifecycle and the HMAC chain over audit events.
//!
//! The per-project key is 32 random bytes, hex-encoded at
//! `.khoregos/signing.key` with 0600 permissions. Events are chained with
//! `hmac_i = HMAC-SHA256(key, hmac_{i-1} ∥ canonical(event_i))`, seeded by
//! a synthetic genesis value for the first link.
//!
//! Canonical form is the event serialized as a compact JSON object with
//! the `hmac` field excluded and keys sorted bytewise ascending (UTF-8
//! byte order, the ordering `serde_json`'s BTreeMap-backed objects
//! produce). `details` and `files_affected` appear exactly as stored:
//! JSON-encoded strings or null.

use std::path::Path;

use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Serialize;
use sha2::Sha256;
use tracing::info;

use k6s_store::models::AuditEvent;
use k6s_store::StoreError;

type HmacSha256 = Hmac<Sha256>;

/// Key length in raw bytes (hex file is twice this).
pub const KEY_LEN: usize = 32;

/// Filename under `.khoregos/`.
pub const KEY_FILENAME: &str = "signing.key";

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("malformed signing key: {0}")]
    MalformedKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Generate a fresh key file. Returns `false` without touching anything
/// if the file already exists; keys are never overwritten.
pub fn generate_key(khoregos_dir: &Path) -> Result<bool, SigningError> {
    let key_path = khoregos_dir.join(KEY_FILENAME);
    if key_path.exists() {
        return Ok(false);
    }

    std::fs::create_dir_all(khoregos_dir)?;
    set_mode(khoregos_dir, 0o700);

    let mut key = [0u8; KEY_LEN];
    rand::rng().fill_bytes(&mut key);
    std::fs::write(&key_path, hex_encode(&key))?;
    set_mode(&key_path, 0o600);

    info!(path = %key_path.display(), "signing key generated");
    Ok(true)
}

/// Load the project key. `None` when the file is absent.
pub fn load_key(khoregos_dir: &Path) -> Result<Option<[u8; KEY_LEN]>, SigningError> {
    let key_path = khoregos_dir.join(KEY_FILENAME);
    if !key_path.exists() {
        return Ok(None);
    }
    let hex = std::fs::read_to_string(&key_path)?;
    let bytes = hex_decode(hex.trim())
        .ok_or_else(|| SigningError::MalformedKey("invalid hex encoding".to_owned()))?;
    if bytes.len() != KEY_LEN {
        return Err(SigningError::MalformedKey(format!(
            "expected {KEY_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&bytes);
    Ok(Some(key))
}

/// Synthetic previous-link value for a session's first event.
#[must_use]
pub fn genesis(session_id: &str) -> String {
    format!("k6s:genesis:{session_id}")
}

/// Byte-stable canonical serialization of an event: compact JSON object,
/// keys sorted bytewise, `hmac` excluded, no trailing newline.
pub fn canonical(event: &AuditEvent) -> Result<String, StoreError> {
    // BTreeMap-backed map ⇒ bytewise key order in the output.
    let mut map = serde_json::Map::new();
    let _ = map.insert("action".into(), event.action.clone().into());
    let _ = map.insert("agent_id".into(), opt_str(event.agent_id.as_ref().map(|a| a.as_str())));
    let _ = map.insert("details".into(), opt_owned(event.details_json()?));
    let _ = map.insert("event_type".into(), event.event_type.as_str().into());
    let _ = map.insert("files_affected".into(), opt_owned(event.files_affected_json()?));
    let _ = map.insert("gate_id".into(), opt_str(event.gate_id.as_deref()));
    let _ = map.insert("id".into(), event.id.as_str().into());
    let _ = map.insert("sequence".into(), event.sequence.into());
    let _ = map.insert("session_id".into(), event.session_id.as_str().into());
    let _ = map.insert("severity".into(), event.severity.as_str().into());
    let _ = map.insert("timestamp".into(), event.timestamp.clone().into());
    Ok(serde_json::to_string(&serde_json::Value::Object(map))?)
}

fn opt_str(value: Option<&str>) -> serde_json::Value {
    value.map_or(serde_json::Value::Null, |s| s.into())
}

fn opt_owned(value: Option<String>) -> serde_json::Value {
    value.map_or(serde_json::Value::Null, serde_json::Value::String)
}

/// One chain link: lowercase hex of
/// `HMAC-SHA256(key, previous ∥ canonical(event))`.
pub fn compute_hmac(
    key: &[u8; KEY_LEN],
    previous: &str,
    event: &AuditEvent,
) -> Result<String, StoreError> {
    let canonical = canonical(event)?;
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(previous.as_bytes());
    mac.update(canonical.as_bytes());
    Ok(hex_encode(&mac.finalize().into_bytes()))
}

/// Kind of chain break found by [`verify_chain`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainErrorKind {
    Gap,
    Missing,
    Mismatch,
}

/// One broken link.
#[derive(Clone, Debug, Serialize)]
pub struct ChainError {
    pub kind: ChainErrorKind,
    pub sequence: i64,
    pub detail: String,
}

/// Result of verifying a session's chain.
#[derive(Clone, Debug, Serialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub events_checked: usize,
    pub errors: Vec<ChainError>,
}

/// Verify a session's chain over events in ascending sequence order.
///
/// Best-effort: a missing hmac or mismatch is recorded and verification
/// continues, resuming each link from the *stored* hmac so downstream
/// breaks are still reported.
pub fn verify_chain(
    key: &[u8; KEY_LEN],
    session_id: &str,
    events: &[AuditEvent],
) -> Result<ChainVerification, StoreError> {
    let mut errors = Vec::new();
    let mut previous = genesis(session_id);
    let mut expected_sequence = 1;

    for event in events {
        if event.sequence != expected_sequence {
            errors.push(ChainError {
                kind: ChainErrorKind::Gap,
                sequence: event.sequence,
                detail: format!(
                    "expected sequence {expected_sequence}, found {}",
                    event.sequence
                ),
            });
        }
        expected_sequence = event.sequence + 1;

        match &event.hmac {
            None => {
                errors.push(ChainError {
                    kind: ChainErrorKind::Missing,
                    sequence: event.sequence,
                    detail: "event has no hmac".to_owned(),
                });
                // No stored link to resume from; keep the previous one.
            }
            Some(stored) => {
                let expected = compute_hmac(key, &previous, event)?;
                if &expected != stored {
                    errors.push(ChainError {
                        kind: ChainErrorKind::Mismatch,
                        sequence: event.sequence,
                        detail: format!("stored {stored}, computed {expected}"),
                    });
                }
                previous = stored.clone();
            }
        }
    }

    Ok(ChainVerification {
        valid: errors.is_empty(),
        events_checked: events.len(),
        errors,
    })
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode));
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) {}
