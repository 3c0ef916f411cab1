//! Localized catalog access.
//!
//! [`Catalog`] composes the cache, retry policy and translation resolver
//! into list/get/mutate operations; [`CatalogSession`] adds per-view
//! generation gating on top.

pub mod accessor;
pub mod key;
pub mod resolve;
pub mod session;
pub mod types;

pub use accessor::{Catalog, CatalogSettings};
pub use key::ListParams;
pub use session::CatalogSession;
pub use types::{Language, LocalizedRecord, RecordPatch};
