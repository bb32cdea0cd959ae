//! Cache module for storing app metadata to disk
//!
//! This module provides a cache manager that persists resolved metadata to the
//! filesystem with expiry timestamps. The resolver uses it as a second tier
//! behind its in-memory cache.

mod manager;

pub use manager::{CacheManager, CachedData};
