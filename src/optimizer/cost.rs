//! # Cost Vectors
//!
//! Access paths are costed as a vector of independent components that are
//! only collapsed into one number when two plans are compared:
//!
//! | Component     | Unit                                  |
//! |---------------|---------------------------------------|
//! | `io_count`    | block reads or seeks                  |
//! | `avg_io_cost` | cost of one of those reads            |
//! | `cpu_cost`    | row evaluations and key comparisons   |
//! | `mem_cost`    | buffer memory the plan needs          |
//! | `import_cost` | rows brought in from another engine   |
//!
//! ```text
//! total = IO_COEFF * io_count * avg_io_cost
//!       + CPU_COEFF * cpu_cost
//!       + MEM_COEFF * mem_cost
//!       + IMPORT_COEFF * import_cost
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let mut cost = full_scan_cost(rows, row_length);
//! let range = range_scan_cost(ranges.len(), matched_rows, row_length);
//! if range.total_cost() < cost.total_cost() { ... }
//! ```

use crate::config::{DISK_SEEK_BASE_COST, IO_SIZE, TIME_FOR_COMPARE};

pub const IO_COEFF: f64 = 1.0;
pub const CPU_COEFF: f64 = 1.0;
pub const MEM_COEFF: f64 = 1.0;
pub const IMPORT_COEFF: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CostVector {
    pub io_count: f64,
    pub avg_io_cost: f64,
    pub cpu_cost: f64,
    pub mem_cost: f64,
    pub import_cost: f64,
}

impl CostVector {
    pub fn new() -> Self {
        Self {
            avg_io_cost: 1.0,
            ..Self::default()
        }
    }

    pub fn zero(&mut self) {
        *self = Self::new();
    }

    pub fn is_zero(&self) -> bool {
        self.io_count == 0.0 && self.cpu_cost == 0.0 && self.mem_cost == 0.0 && self.import_cost == 0.0
    }

    pub fn total_cost(&self) -> f64 {
        IO_COEFF * self.io_count * self.avg_io_cost
            + CPU_COEFF * self.cpu_cost
            + MEM_COEFF * self.mem_cost
            + IMPORT_COEFF * self.import_cost
    }

    /// Adds another vector; the average I/O cost becomes the weighted mean.
    pub fn add(&mut self, other: &CostVector) {
        let io = self.io_count + other.io_count;
        if io > 0.0 {
            self.avg_io_cost =
                (self.io_count * self.avg_io_cost + other.io_count * other.avg_io_cost) / io;
        }
        self.io_count = io;
        self.cpu_cost += other.cpu_cost;
        self.mem_cost += other.mem_cost;
        self.import_cost += other.import_cost;
    }

    pub fn add_io(&mut self, add_io_count: f64, add_avg_cost: f64) {
        let io = self.io_count + add_io_count;
        if io > 0.0 {
            self.avg_io_cost =
                (self.io_count * self.avg_io_cost + add_io_count * add_avg_cost) / io;
        }
        self.io_count = io;
    }

    /// Scales the per-execution components; memory is allocated once.
    pub fn multiply(&mut self, m: f64) {
        self.io_count *= m;
        self.cpu_cost *= m;
        self.import_cost *= m;
    }
}

fn blocks(rows: f64, row_length: usize) -> f64 {
    (rows * row_length as f64 / IO_SIZE as f64).ceil().max(1.0)
}

/// Sequential read of every row.
pub fn full_scan_cost(rows: f64, row_length: usize) -> CostVector {
    let mut cost = CostVector::new();
    cost.add_io(blocks(rows, row_length), 1.0);
    cost.cpu_cost = rows / TIME_FOR_COMPARE;
    cost
}

/// One seek per range, then a read of the matching rows.
pub fn range_scan_cost(ranges: usize, rows: f64, row_length: usize) -> CostVector {
    let mut cost = CostVector::new();
    if ranges == 0 {
        return cost;
    }
    cost.add_io(ranges as f64, DISK_SEEK_BASE_COST);
    cost.add_io(blocks(rows, row_length), 1.0);
    cost.cpu_cost = rows / TIME_FOR_COMPARE + ranges as f64 / TIME_FOR_COMPARE;
    cost
}
