//! Live configuration for the dispatch engine.
//!
//! [`ConfigCache`] holds the plugin, selector and rule mappings the request
//! path reads on every plugin invocation. It is fed by [`ConfigSync`], which
//! loads everything from a [`ConfigStore`] at startup and then applies the
//! store's change notifications. [`snapshot`] publishes a YAML file into a
//! store and optionally keeps watching it.

pub mod cache;
pub mod error;
pub mod path;
pub mod snapshot;
pub mod store;
pub mod sync;

pub use cache::{CacheStats, ChangeOutcome, ConfigCache};
pub use error::{CacheError, SnapshotError, StoreError};
pub use path::{ConfigKind, ConfigPath, ROOT};
pub use snapshot::{ConfigSnapshot, PublishSummary};
pub use store::{Change, ConfigEvent, ConfigStore, MemoryStore};
pub use sync::{ConfigSync, UpdateListener};
