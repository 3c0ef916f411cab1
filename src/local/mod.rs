//! Durable offline copy of the catalog and its sync bookkeeping.

mod schema;
mod store;
mod sync;

pub use store::{LocalFilter, LocalStore, SyncStatus};
pub use sync::{diverged, Resolution, SyncJob};
