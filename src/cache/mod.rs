//! Bounded metadata cache (C8, spec.md §4.8), reused by the token engine
//! (C6) for hot metadata reads.

pub mod lru;

pub use lru::LruMetadataCache;
