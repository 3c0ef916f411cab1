//! Query keys and their deterministic fingerprints.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Something that identifies a cacheable query.
///
/// The fingerprint must cover every parameter that affects the result, so two
/// keys with equal fingerprints are interchangeable.
pub trait QueryKey {
  /// Stable cache key, `<namespace>:<hash>` so that namespaces can be
  /// invalidated by prefix.
  fn cache_hash(&self) -> String;

  /// Human readable description for logs.
  fn description(&self) -> String;
}

/// Hash the canonical JSON form of `params` under `namespace`.
///
/// Serialization of a struct is field-ordered, so the same parameters always
/// yield the same fingerprint.
pub fn fingerprint<P: Serialize + ?Sized>(namespace: &str, params: &P) -> String {
  // Plain data structs always serialize
  let input = serde_json::to_vec(params).unwrap_or_default();

  // SHA256 hash for stable, fixed-length keys
  let mut hasher = Sha256::new();
  hasher.update(namespace.as_bytes());
  hasher.update(b"\0");
  hasher.update(&input);
  format!("{}:{}", namespace, hex::encode(hasher.finalize()))
}
