//! # querycore - SQL Query Execution Core
//!
//! The parts of a relational engine that sit between a parsed statement and
//! the storage engine's fixed-width rows:
//!
//! - **Typed field codec**: typed SQL values to and from memcmp-ordered
//!   binary row images
//! - **Decimal engine**: exact fixed-point arithmetic with MySQL precision
//!   rules and an order-preserving binary form
//! - **Range analysis**: WHERE conditions to per-index key ranges and
//!   index-merge plans
//! - **Sort-merge engine**: external `FileSort` and the deduplicating
//!   `Unique`
//! - **Join cache**: packed buffering of outer rows for nested-loop joins
//!
//! ## Quick Start
//!
//! ```ignore
//! use querycore::{FieldType, FileSort, RowLayout, SessionOptions, SliceSource, SortField};
//!
//! let layout = RowLayout::builder()
//!     .column("id", FieldType::Int64)
//!     .nullable("name", FieldType::varchar(32))
//!     .build()?;
//! let options = SessionOptions::builder().sort_buffer_size(256 * 1024).build()?;
//!
//! let mut sort = FileSort::new(&layout, &[SortField::asc(1)], &options)?;
//! let sorted = sort.run(&mut SliceSource::new(&rows))?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  optimizer (Cond -> SelTree -> KeyRange)      │
//! ├───────────────────────┬───────────────────────┤
//! │  sort (FileSort,      │  join (JoinCache)     │
//! │        Unique)        │                       │
//! ├───────────────────────┴───────────────────────┤
//! │  field (FieldType, Field, RowLayout)          │
//! ├───────────────────────┬───────────────────────┤
//! │  decimal              │  temporal             │
//! ├───────────────────────┴───────────────────────┤
//! │  config, memory, error                        │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Execution Model
//!
//! Everything runs synchronously on the caller's thread. Sessions share
//! nothing but the [`MemoryBudget`]; each carries its own buffers, temporary
//! files and [`KillSwitch`].
//!
//! ## Module Overview
//!
//! - [`config`]: limits, defaults and `SessionOptions`
//! - [`error`]: `SqlError` conditions and the `Diagnostics` warning queue
//! - [`memory`]: pooled memory budget with RAII reservations
//! - [`decimal`]: `Decimal` arithmetic and binary format
//! - [`temporal`]: calendar parsing and formatting
//! - [`field`]: field types, views and row layouts
//! - [`optimizer`]: range predicate trees and cost vectors
//! - [`sort`]: external sort and deduplication
//! - [`join`]: join cache

pub mod config;
pub mod decimal;
pub mod error;
pub mod field;
pub mod join;
pub mod memory;
pub mod optimizer;
pub mod sort;
pub mod temporal;

pub use config::{KillSwitch, SessionOptions};
pub use decimal::Decimal;
pub use error::{Diagnostics, SqlError, SqlResult};
pub use field::{Collation, Field, FieldDef, FieldType, RowLayout, Value};
pub use join::{JoinCache, JoinTable};
pub use memory::{MemoryBudget, Pool};
pub use optimizer::{Cond, IndexDef, KeyRange, RangeAnalyzer, SelTree};
pub use sort::{FileSort, RowSource, SliceSource, SortField, SortedRows, Unique};
