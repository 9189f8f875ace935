//! # Memory Budget Management
//!
//! Budget tracking for the per-statement buffers of the execution core. Every
//! session shares one [`MemoryBudget`]; sort and join engines charge their
//! buffers against it before allocating.
//!
//! ## Architecture
//!
//! The budget uses a **reserved minimums + shared pool** model:
//!
//! ```text
//! +----------------------------------------------------------+
//! |                  Total Memory Budget                      |
//! |  (default: 25% of system RAM, minimum floor: 4 MB)       |
//! +----------------------------------------------------------+
//! |  Reserved Pools (guaranteed minimums):                   |
//! |  +-----------------+ +-----------------+                 |
//! |  | Sort   2 MB     | | Join   512 KB   |                 |
//! |  +-----------------+ +-----------------+                 |
//! |                                                          |
//! |  Shared Pool (remainder):                                |
//! |  +----------------------------------------------------+  |
//! |  | Overflow of either engine once reserved is spent   |  |
//! |  +----------------------------------------------------+  |
//! +----------------------------------------------------------+
//! ```
//!
//! ## Enforcement Model
//!
//! Hard limits: a request that would exceed the budget is refused with
//! [`MemoryError`]. FileSort retries with a smaller buffer; the join cache
//! fails the statement.
//!
//! ```rust,ignore
//! let budget = Arc::new(MemoryBudget::with_limit(16 * 1024 * 1024));
//! let guard = budget.reserve(Pool::Sort, 256 * 1024)?;
//! // ... guard released on drop
//! ```

mod budget;

pub use budget::{BudgetStats, MemoryBudget, MemoryError, Pool, Reservation};
