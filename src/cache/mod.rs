//! Durable caching for offline support.
//!
//! Three pieces:
//! - [`VersionedStore`]: named, version-tagged key→payload stores in SQLite;
//!   superseded generations are purged on rotation.
//! - [`FallbackStore`]: a separate flat key-value store holding the last
//!   known good reading set, untouched by version rotation.
//! - [`LifecycleManager`]: install-time pre-population and version rotation,
//!   gated so the resolver never reads a store mid-rotation.

mod fallback;
mod lifecycle;
mod store;

pub use fallback::{FallbackStore, CACHED_SENSOR_DATA_KEY};
pub use lifecycle::LifecycleManager;
pub use store::{StoreKind, VersionedStore};
