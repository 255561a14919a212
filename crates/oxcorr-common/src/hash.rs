use serde_json::Value;
use sha2::{Digest, Sha256};

/// Stable content hash of a JSON value, as a 32-character lowercase hex
/// string.
///
/// `serde_json` object maps are key-ordered, so two structurally equal
/// values always serialize to the same bytes regardless of insertion
/// order. Used for dimension hashes and query-config identity.
///
/// # Examples
///
/// ```
/// use oxcorr_common::hash::content_hash;
///
/// let a = serde_json::json!({"ip": "10.0.0.1", "bk_cloud_id": 0});
/// let b = serde_json::json!({"bk_cloud_id": 0, "ip": "10.0.0.1"});
/// assert_eq!(content_hash(&a), content_hash(&b));
/// assert_eq!(content_hash(&a).len(), 32);
/// ```
pub fn content_hash(value: &Value) -> String {
    use std::fmt::Write;

    let canonical = serde_json::to_string(value).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
