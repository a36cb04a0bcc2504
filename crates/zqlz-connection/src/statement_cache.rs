//! Per-connection cache of prepared statements
//!
//! Each pooled connection owns one [`StatementCache`]. Lookups are exact:
//! the SQL text must be byte-identical and the preparation options
//! (plain or callable, cursor settings, generated keys) must match.
//!
//! # Example
//!
//! ```ignore
//! use zqlz_connection::statement_cache::StatementCache;
//! use zqlz_core::StatementSignature;
//!
//! let cache = StatementCache::new(2, |_: &StatementSignature, stmt: Statement| {
//!     stmt.close();
//! });
//! cache.insert(StatementSignature::new("SELECT 1"), prepared);
//! ```

mod cache;
mod profile;

#[cfg(test)]
mod tests;

pub use cache::{Admission, CacheStats, EvictionListener, StatementCache};
pub use profile::{DEFAULT_PROFILE_CAPACITY, StatementProfile, StatementTiming};
