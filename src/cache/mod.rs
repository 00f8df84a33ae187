//! # Cache Module
//!
//! Time-to-live caches for resolved tracks and related-track stubs.
//!
//! Both caches share the same [`TtlCache`] implementation: a `DashMap` of
//! entries, each remembering when it was inserted and how long it lives, plus
//! atomic hit/miss counters. Entries are never returned once their age
//! exceeds their TTL. They are evicted lazily on lookup and by an optional
//! background sweeper.
//!
//! ## Cache Types
//!
//! - **Track Cache**: query or identifier → [`LoadResult`], one hour by default
//! - **Related Cache**: video id → ordered [`RelatedStub`] list, twelve hours
//!   by default
//!
//! Only successful lookups are ever stored; a `NO_MATCHES` or `LOAD_FAILED`
//! result is returned to the caller and forgotten.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use lavaqueue::cache::TrackCache;
//! use std::time::Duration;
//!
//! let cache = TrackCache::new("tracks", Duration::from_secs(3600));
//! if let Some(result) = cache.get("never gonna give you up") {
//!     println!("cached {} tracks", result.tracks.len());
//! }
//! println!("{}", cache.stats());
//! ```

pub mod ttl_cache;

pub use ttl_cache::{CacheStats, TtlCache};

use crate::sources::{LoadResult, RelatedStub};

/// Resolved tracks keyed by the raw query string or by track identifier.
pub type TrackCache = TtlCache<LoadResult>;

/// Related-track stubs keyed by source video id.
pub type RelatedCache = TtlCache<Vec<RelatedStub>>;
