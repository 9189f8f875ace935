//! # Sort-Merge Engine
//!
//! External sorting for ORDER BY and deduplication for index-merge row
//! sets. Both share one run-file format and one k-way merge.
//!
//! ## Module Organization
//!
//! | Module     | Contents                                          |
//! |------------|---------------------------------------------------|
//! | `sort_key` | `SortField`, `SortKey`, `AddonFields`             |
//! | `merge`    | run files, `merge_buffers`, `merge_many_buff`     |
//! | `filesort` | `FileSort`, `RowSource`, `SortedRows`, `SortStats`|
//! | `unique`   | `Unique` and its cost model                       |
//!
//! ## Memory and Disk
//!
//! Sort buffers are reserved from the `Sort` pool of the session's
//! `MemoryBudget`. Runs live in temporary files under the session's
//! `tmp_dir`, named with the `qc_sort` or `qc_uniq` prefix, and are removed
//! when the sort result is dropped.
//!
//! ## Usage
//!
//! ```ignore
//! let mut sort = FileSort::new(&layout, &[SortField::desc(2), SortField::asc(0)], &options)?
//!     .with_limit(100);
//! let sorted = sort.run(&mut SliceSource::new(&rows))?;
//! for payload in sorted.iter() { ... }
//! ```

mod filesort;
mod merge;
mod sort_key;
mod unique;

pub use filesort::{FileSort, RowSource, SliceSource, SortStats, SortedRows};
pub use merge::Buffpek;
pub use sort_key::{AddonFields, SortField, SortKey};
pub use unique::Unique;
