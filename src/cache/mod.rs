//! Local execution cache
//!
//! Content-addressed entries keyed by a hash of the artifact
//! specification, guarded by a cross-process lock file.
//!
//! # Entry States
//!
//! | State | On disk | Description |
//! |-------|---------|-------------|
//! | Absent | no dir, empty dir, or bad metadata | Fetch required |
//! | Writing | live `.dlx.lock` | Another process is populating it |
//! | Published | metadata + matching payload | Ready to execute |
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   <16-hex key>/
//!     .dlx.lock            transient
//!     .dlx-metadata.json   written last
//!     <binary> | node_modules/<package>/
//! ```

pub mod entry;
pub mod gc;
pub mod key;
pub mod lock;
pub mod ttl;

pub use entry::{
    CacheEntry, EntryMetadata, EntryState, EntryStore, Payload, Source, SourceKind, UpdateCheck,
};
pub use gc::{list_entries, remove_entry, sweep, EntryInfo};
pub use key::cache_key;
pub use lock::{with_lock, LockGuard, LockOptions};
pub use ttl::{ClearOptions, TtlCache, TtlCacheOptions};
