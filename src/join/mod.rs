//! # Join Cache
//!
//! Row buffering for block nested-loop joins. Outer rows are packed into a
//! [`JoinCache`] until it reports full; the inner table is then scanned
//! once and matched against every cached combination.
//!
//! ```ignore
//! let mut cache = JoinCache::new(vec![JoinTable::new(&outer).with_row_id()], &options)?;
//! for (row, pos) in outer_rows {
//!     if cache.store_record_in_cache(&[(row, pos)])? {
//!         cache.for_each_record(|rows, ids| probe_inner(rows, ids))?;
//!         cache.reset_cache_write();
//!     }
//! }
//! ```

mod cache;

pub use cache::{CacheField, CacheFieldKind, JoinCache, JoinTable};
