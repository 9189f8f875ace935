//! # Memory Budget Implementation
//!
//! Accounting for the buffers a statement holds while it runs: the sort
//! buffer of a FileSort or Unique, and the record buffer of a join cache.
//!
//! ## Charging Rules
//!
//! A request against a pool is granted when it fits in what is left of the
//! pool's reservation plus the shared remainder. Bytes beyond the
//! reservation count against the shared remainder until released.
//!
//! | Pool | Reserved | Typical holder |
//! |------|----------|----------------|
//! | Sort | 2 MB | FileSort buffer, Unique tree |
//! | Join | 512 KB | JoinCache record buffer |
//!
//! A refusal is reported as [`MemoryError`]. FileSort shrinks its request
//! and retries; the join cache fails the statement.
//!
//! Counters are atomics and a single budget is shared by every session.
//! [`MemoryBudget::reserve`] hands out a [`Reservation`] that gives its
//! bytes back on drop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use eyre::Result;
use sysinfo::System;
use thiserror::Error;
use tracing::trace;

pub use crate::config::{
    DEFAULT_BUDGET_PERCENT, JOIN_RESERVED, MIN_BUDGET_FLOOR, SORT_RESERVED, TOTAL_RESERVED,
};

static SYSTEM_TOTAL_MEMORY: OnceLock<usize> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pool {
    Sort,
    Join,
}

impl Pool {
    const ALL: [Pool; 2] = [Pool::Sort, Pool::Join];

    pub fn reserved_size(&self) -> usize {
        match self {
            Pool::Sort => SORT_RESERVED,
            Pool::Join => JOIN_RESERVED,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Pool::Sort => "sort",
            Pool::Join => "join",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetStats {
    pub total_limit: usize,
    pub total_used: usize,
    pub sort_used: usize,
    pub sort_peak: usize,
    pub join_used: usize,
    pub join_peak: usize,
    pub shared_available: usize,
}

impl std::fmt::Display for BudgetStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "used {}/{} (sort {} peak {}, join {} peak {}, shared free {})",
            self.total_used,
            self.total_limit,
            self.sort_used,
            self.sort_peak,
            self.join_used,
            self.join_peak,
            self.shared_available
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} buffer of {requested} bytes refused, {available} available", .pool.name())]
pub struct MemoryError {
    pub pool: Pool,
    pub requested: usize,
    pub available: usize,
}

#[derive(Debug)]
pub struct MemoryBudget {
    limit: usize,
    used: [AtomicUsize; 2],
    peak: [AtomicUsize; 2],
}

impl MemoryBudget {
    /// Sizes the budget as a share of physical memory.
    pub fn auto_detect() -> Self {
        let total_memory = *SYSTEM_TOTAL_MEMORY.get_or_init(|| {
            let mut sys = System::new();
            sys.refresh_memory();
            sys.total_memory() as usize
        });
        Self::with_limit(total_memory / 100 * DEFAULT_BUDGET_PERCENT)
    }

    /// Limits below `MIN_BUDGET_FLOOR` are raised to it.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: limit.max(MIN_BUDGET_FLOOR),
            used: [AtomicUsize::new(0), AtomicUsize::new(0)],
            peak: [AtomicUsize::new(0), AtomicUsize::new(0)],
        }
    }

    pub fn total_limit(&self) -> usize {
        self.limit
    }

    pub fn total_used(&self) -> usize {
        Pool::ALL.iter().map(|p| self.pool_used(*p)).sum()
    }

    pub(crate) fn pool_used(&self, pool: Pool) -> usize {
        self.used[pool.slot()].load(Ordering::Acquire)
    }

    /// Bytes of the shared remainder not yet claimed by any pool's overflow.
    pub fn shared_available(&self) -> usize {
        let overflow: usize = Pool::ALL
            .iter()
            .map(|p| self.pool_used(*p).saturating_sub(p.reserved_size()))
            .sum();
        self.limit
            .saturating_sub(TOTAL_RESERVED)
            .saturating_sub(overflow)
    }

    /// Largest request `pool` could be granted right now.
    pub fn available(&self, pool: Pool) -> usize {
        let reserved_left = pool.reserved_size().saturating_sub(self.pool_used(pool));
        let headroom = self.limit.saturating_sub(self.total_used());
        (reserved_left + self.shared_available()).min(headroom)
    }

    pub fn allocate(&self, pool: Pool, bytes: usize) -> Result<()> {
        if bytes == 0 {
            return Ok(());
        }
        let counter = &self.used[pool.slot()];
        loop {
            let current = counter.load(Ordering::Acquire);
            let available = self.available(pool);
            if bytes > available {
                return Err(MemoryError {
                    pool,
                    requested: bytes,
                    available,
                }
                .into());
            }
            if counter
                .compare_exchange_weak(current, current + bytes, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.peak[pool.slot()].fetch_max(current + bytes, Ordering::AcqRel);
                trace!(pool = pool.name(), bytes, used = current + bytes, "budget charged");
                return Ok(());
            }
        }
    }

    /// Returns bytes to `pool`. Releasing more than is held clamps at zero.
    pub fn release(&self, pool: Pool, bytes: usize) {
        if bytes == 0 {
            return;
        }
        let _ = self.used[pool.slot()].fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
            Some(v.saturating_sub(bytes))
        });
    }

    /// Allocates `bytes` from `pool` and returns a guard that releases them.
    pub fn reserve(self: &Arc<Self>, pool: Pool, bytes: usize) -> Result<Reservation> {
        self.allocate(pool, bytes)?;
        Ok(Reservation {
            budget: Arc::clone(self),
            pool,
            bytes,
        })
    }

    pub fn stats(&self) -> BudgetStats {
        let sort_used = self.pool_used(Pool::Sort);
        let join_used = self.pool_used(Pool::Join);
        BudgetStats {
            total_limit: self.limit,
            total_used: sort_used + join_used,
            sort_used,
            sort_peak: self.peak[Pool::Sort.slot()].load(Ordering::Acquire),
            join_used,
            join_peak: self.peak[Pool::Join.slot()].load(Ordering::Acquire),
            shared_available: self.shared_available(),
        }
    }
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self::auto_detect()
    }
}

/// Accounted bytes held by one buffer; released on drop.
#[derive(Debug)]
pub struct Reservation {
    budget: Arc<MemoryBudget>,
    pool: Pool,
    bytes: usize,
}

impl Reservation {
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn pool(&self) -> Pool {
        self.pool
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.budget.release(self.pool, self.bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_limits_are_raised_to_the_floor() {
        assert_eq!(MemoryBudget::with_limit(1000).total_limit(), MIN_BUDGET_FLOOR);
        assert!(MemoryBudget::auto_detect().total_limit() >= MIN_BUDGET_FLOOR);
    }

    #[test]
    fn reservation_then_shared_remainder() {
        let budget = MemoryBudget::with_limit(MIN_BUDGET_FLOOR);
        let shared = MIN_BUDGET_FLOOR - TOTAL_RESERVED;
        assert_eq!(budget.available(Pool::Join), JOIN_RESERVED + shared);

        budget.allocate(Pool::Join, JOIN_RESERVED).unwrap();
        assert_eq!(budget.shared_available(), shared);
        budget.allocate(Pool::Join, 64 * 1024).unwrap();
        assert_eq!(budget.shared_available(), shared - 64 * 1024);
        assert_eq!(budget.available(Pool::Sort), SORT_RESERVED + shared - 64 * 1024);
    }

    #[test]
    fn refusal_reports_what_was_left() {
        let budget = MemoryBudget::with_limit(MIN_BUDGET_FLOOR);
        let available = budget.available(Pool::Sort);
        let err = budget.allocate(Pool::Sort, available + 1).unwrap_err();
        let err = err.downcast_ref::<MemoryError>().unwrap();
        assert_eq!(err.pool, Pool::Sort);
        assert_eq!(err.available, available);
        assert_eq!(budget.total_used(), 0);
    }

    #[test]
    fn one_pool_cannot_take_the_others_reservation() {
        let budget = MemoryBudget::with_limit(MIN_BUDGET_FLOOR);
        budget.allocate(Pool::Sort, budget.available(Pool::Sort)).unwrap();
        assert!(budget.allocate(Pool::Sort, 1).is_err());
        assert_eq!(budget.available(Pool::Join), JOIN_RESERVED);
        budget.allocate(Pool::Join, JOIN_RESERVED).unwrap();
    }

    #[test]
    fn release_clamps_at_zero() {
        let budget = MemoryBudget::with_limit(MIN_BUDGET_FLOOR);
        budget.allocate(Pool::Sort, 10).unwrap();
        budget.release(Pool::Sort, 1000);
        assert_eq!(budget.pool_used(Pool::Sort), 0);
    }

    #[test]
    fn reservation_releases_on_drop_and_peak_remains() {
        let budget = Arc::new(MemoryBudget::with_limit(MIN_BUDGET_FLOOR));
        {
            let r = budget.reserve(Pool::Sort, 128 * 1024).unwrap();
            assert_eq!((r.bytes(), r.pool()), (128 * 1024, Pool::Sort));
            assert_eq!(budget.stats().sort_used, 128 * 1024);
        }
        let stats = budget.stats();
        assert_eq!(stats.sort_used, 0);
        assert_eq!(stats.sort_peak, 128 * 1024);
        assert!(stats.to_string().starts_with("used 0/"));
    }
}
