//! # Execution Core Constants
//!
//! This module centralizes the numeric limits used by the execution core,
//! grouping interdependent values together. Constants that depend on each
//! other are co-located and their relationships are checked at compile time.
//!
//! ## Dependency Graph
//!
//! ```text
//! MIN_SORT_MEMORY (32 KB)
//!       │
//!       └─> MAX_SORT_MEMORY (2 MB, default sort_buffer_size, must be >=)
//!             The sort buffer shrinks by SORT_BUFFER_SHRINK_NUM/DEN on
//!             allocation failure but never below
//!             max(MIN_SORT_MEMORY, rec_length * MERGEBUFF2).
//!
//! MERGEBUFF (7)
//!       │
//!       └─> MERGEBUFF2 (15, must be > MERGEBUFF)
//!             Merge passes run while more than MERGEBUFF2 runs remain;
//!             each pass merges groups of MERGEBUFF runs into one.
//!
//! DECIMAL_MAX_SCALE (30)
//!       │
//!       ├─> DECIMAL_MAX_PRECISION (65, declared column limit)
//!       │
//!       └─> DECIMAL_MAX_POSSIBLE_PRECISION (81, nine limbs of nine digits)
//!             Intermediate results may use up to this many digits.
//!
//! SORT_RESERVED + JOIN_RESERVED
//!       │
//!       └─> TOTAL_RESERVED (must fit inside MIN_BUDGET_FLOOR)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use crate::config::{MERGEBUFF, MERGEBUFF2, MIN_SORT_MEMORY};
//! ```

// ============================================================================
// Sort / Merge
// ============================================================================

/// Smallest sort buffer the engine will run with.
pub const MIN_SORT_MEMORY: usize = 32 * 1024;

/// Default sort buffer size.
pub const MAX_SORT_MEMORY: usize = 2 * 1024 * 1024;

/// Number of runs merged together by one intermediate merge step.
pub const MERGEBUFF: usize = 7;

/// Run count at which intermediate merge passes start.
pub const MERGEBUFF2: usize = 15;

/// Sort buffer shrink factor applied after a failed allocation.
pub const SORT_BUFFER_SHRINK_NUM: usize = 3;
pub const SORT_BUFFER_SHRINK_DEN: usize = 4;

/// Per-key bookkeeping in the in-memory sort buffer (one `u32` record index).
pub const SORT_POINTER_SIZE: usize = 4;

/// Length of a row reference carried in a sort record when addon fields
/// are not used.
pub const ROW_REF_LENGTH: usize = 8;

pub const DEFAULT_MAX_LENGTH_FOR_SORT_DATA: usize = 1024;

/// Upper bound on the sort key bytes produced for one string column.
pub const DEFAULT_MAX_SORT_LENGTH: usize = 1024;

pub const SORT_FILE_PREFIX: &str = "qc_sort";
pub const UNIQUE_FILE_PREFIX: &str = "qc_uniq";

/// Bookkeeping charged per element of the in-memory Unique tree.
pub const TREE_ELEMENT_OVERHEAD: usize = 24;

// ============================================================================
// Cost model
// ============================================================================

pub const IO_SIZE: usize = 4096;
pub const TIME_FOR_COMPARE: f64 = 5.0;
pub const TIME_FOR_COMPARE_ROWID: f64 = TIME_FOR_COMPARE * 2.0;
pub const DISK_SEEK_BASE_COST: f64 = 0.9;

// ============================================================================
// Decimal
// ============================================================================

pub const DECIMAL_DIGITS_PER_LIMB: usize = 9;
pub const DECIMAL_LIMB_BASE: u32 = 1_000_000_000;
pub const DECIMAL_BUFF_LENGTH: usize = 9;
pub const DECIMAL_MAX_POSSIBLE_PRECISION: usize = DECIMAL_BUFF_LENGTH * DECIMAL_DIGITS_PER_LIMB;
pub const DECIMAL_MAX_PRECISION: u8 = 65;
pub const DECIMAL_MAX_SCALE: u8 = 30;
pub const DEFAULT_DIV_PRECISION_INCREMENT: u8 = 4;
pub const MAX_DIV_PRECISION_INCREMENT: u8 = 30;

// ============================================================================
// Range analysis
// ============================================================================

/// Upper bound on SelArg nodes built for one statement.
pub const MAX_SEL_ARGS: usize = 16_000;
pub const MAX_KEY_PARTS: usize = 16;
pub const MAX_INDEXES: usize = 64;

// ============================================================================
// Join cache
// ============================================================================

pub const DEFAULT_JOIN_BUFFER_SIZE: usize = 128 * 1024;
pub const MIN_JOIN_BUFFER_SIZE: usize = 8 * 1024;

/// CHAR columns at least this long are cached with trailing spaces stripped.
pub const JOIN_STRIP_MIN_LENGTH: usize = 4;

// ============================================================================
// Temporal and string limits
// ============================================================================

pub const EPOCH_MIN_SECONDS: i64 = 0;
pub const EPOCH_MAX_SECONDS: i64 = i32::MAX as i64;

/// 838:59:59 expressed in seconds.
pub const TIME_MAX_SECONDS: i64 = 838 * 3600 + 59 * 60 + 59;

/// Largest fixed-width row image a layout may describe.
pub const MAX_ROW_LENGTH: usize = 65_535;
pub const VARCHAR_SHORT_PREFIX_MAX: usize = 255;

// ============================================================================
// Memory budget
// ============================================================================

pub const SORT_RESERVED: usize = 2 * 1024 * 1024;
pub const JOIN_RESERVED: usize = 512 * 1024;
pub const TOTAL_RESERVED: usize = SORT_RESERVED + JOIN_RESERVED;
pub const MIN_BUDGET_FLOOR: usize = 4 * 1024 * 1024;
pub const DEFAULT_BUDGET_PERCENT: usize = 25;

// ============================================================================
// Compile-time checks
// ============================================================================

const _: () = assert!(MIN_SORT_MEMORY <= MAX_SORT_MEMORY);
const _: () = assert!(MERGEBUFF < MERGEBUFF2);
const _: () = assert!(SORT_BUFFER_SHRINK_NUM < SORT_BUFFER_SHRINK_DEN);
const _: () = assert!(DECIMAL_MAX_SCALE < DECIMAL_MAX_PRECISION);
const _: () = assert!((DECIMAL_MAX_PRECISION as usize) <= DECIMAL_MAX_POSSIBLE_PRECISION);
const _: () = assert!(DEFAULT_DIV_PRECISION_INCREMENT <= MAX_DIV_PRECISION_INCREMENT);
const _: () = assert!(TOTAL_RESERVED <= MIN_BUDGET_FLOOR);
const _: () = assert!(MIN_JOIN_BUFFER_SIZE <= DEFAULT_JOIN_BUFFER_SIZE);
const _: () = assert!(MAX_KEY_PARTS <= u8::MAX as usize);
