//! Caching and request deduplication for remote reads.
//!
//! This module provides a backend-agnostic cache that:
//! - Keeps payloads under deterministic query fingerprints with a per-entry TTL
//! - Never serves an entry past its expiry
//! - Shares one in-flight producer between concurrent callers of the same key
//! - Supports prefix invalidation after writes

mod key;
mod store;

pub use key::{fingerprint, QueryKey};
pub use store::CacheStore;
