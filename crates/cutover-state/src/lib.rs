//! cutover-state: append-only audit store for rollouts.
//!
//! Backed by [redb](https://docs.rs/redb). Switch records, readiness
//! verdicts, and rollout outcomes are JSON-serialized into `&[u8]` value
//! columns under `{service}#{sequence}` keys, so a prefix scan returns one
//! service's history in the order it was written.
//!
//! The store only ever appends. There is no update or delete path for a
//! written record.
//!
//! `AuditStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::AuditStore;
