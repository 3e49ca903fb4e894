//! Identity resolution from the raw content of the local identity slot.
//!
//! The slot is written by the identification flow, usually as a JSON
//! encoding (`"\"u123\""`), sometimes as bare text (`u123`). Both are
//! accepted; a value that fails to decode is used as-is.

use serde_json::Value;

use crate::types::UserId;

/// Resolve a user identifier from raw slot content.
///
/// | raw content          | result               |
/// |----------------------|----------------------|
/// | missing / blank      | `None`               |
/// | `"u1"` (JSON string) | `u1`                 |
/// | `42` (JSON number)   | `42`                 |
/// | `null`, `false`, `""`| `None`               |
/// | `{..}`, `[..]`, `true` | raw text, trimmed  |
/// | `u1` (not JSON)      | `u1`                 |
pub fn resolve_identity(raw: Option<&str>) -> Option<UserId> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::String(s)) => UserId::new(s),
        Ok(Value::Number(n)) => UserId::new(n.to_string()),
        Ok(Value::Null) | Ok(Value::Bool(false)) => None,
        // Structured but not an identifier: keep the stored text.
        Ok(Value::Bool(true)) | Ok(Value::Array(_)) | Ok(Value::Object(_)) => UserId::new(raw),
        Err(_) => UserId::new(raw),
    }
}
