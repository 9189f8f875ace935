//! # Unique
//!
//! Deduplicating collector of fixed-length keys. Keys accumulate in an
//! ordered in-memory set; when the set reaches its element limit it is
//! written to a run file and cleared. `get` merges the runs, dropping
//! duplicates that landed in different runs.
//!
//! ```text
//! add(key) ──> BTreeSet ──full──> run file (qc_uniq) ──┐
//!                  │                                   v
//!                  └────────────── get ──────> dedup merge ──> SortedRows
//! ```
//!
//! The element limit is `max_in_memory_size / (key_length +
//! TREE_ELEMENT_OVERHEAD)`, the same figure `get_use_cost` uses to predict
//! how many runs a given number of keys produces.

use std::collections::BTreeSet;

use eyre::{ensure, Result};
use tracing::debug;

use super::filesort::{SortStats, SortedRows};
use super::merge::{check_killed, merge_index, merge_many_buff, Buffpek, MergeShape, SpillFile};
use crate::config::{
    SessionOptions, DISK_SEEK_BASE_COST, IO_SIZE, MERGEBUFF, MERGEBUFF2, TIME_FOR_COMPARE_ROWID,
    TREE_ELEMENT_OVERHEAD, UNIQUE_FILE_PREFIX,
};
use crate::error::SqlError;
use crate::memory::{Pool, Reservation};

pub struct Unique<'a> {
    options: &'a SessionOptions,
    key_length: usize,
    max_elements: usize,
    tree: BTreeSet<Vec<u8>>,
    file: Option<SpillFile>,
    runs: Vec<Buffpek>,
    flushed: u64,
    _reservation: Reservation,
}

impl<'a> Unique<'a> {
    pub fn new(key_length: usize, max_in_memory_size: usize, options: &'a SessionOptions) -> Result<Self> {
        ensure!(key_length > 0, "unique keys must have a length");
        let max_elements = max_in_memory_size / (key_length + TREE_ELEMENT_OVERHEAD);
        ensure!(
            max_elements > 0,
            "{} bytes cannot hold one key of {} bytes",
            max_in_memory_size,
            key_length
        );
        let reservation = options
            .budget()
            .reserve(Pool::Sort, max_in_memory_size)
            .map_err(|e| SqlError::resource_exhausted("unique buffer", e))?;
        Ok(Self {
            options,
            key_length,
            max_elements,
            tree: BTreeSet::new(),
            file: None,
            runs: Vec::new(),
            flushed: 0,
            _reservation: reservation,
        })
    }

    pub fn key_length(&self) -> usize {
        self.key_length
    }

    /// Adds `key`; false when it is already in the in-memory set.
    pub fn add(&mut self, key: &[u8]) -> Result<bool> {
        ensure!(
            key.len() == self.key_length,
            "key of {} bytes added to unique of {} byte keys",
            key.len(),
            self.key_length
        );
        if self.tree.contains(key) {
            return Ok(false);
        }
        if self.tree.len() >= self.max_elements {
            self.flush()?;
        }
        self.tree.insert(key.to_vec());
        Ok(true)
    }

    /// Keys held so far, counting keys repeated across flushed runs.
    pub fn elements(&self) -> u64 {
        self.flushed + self.tree.len() as u64
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    pub fn reset(&mut self) {
        self.tree.clear();
        self.file = None;
        self.runs.clear();
        self.flushed = 0;
    }

    fn flush(&mut self) -> Result<()> {
        check_killed(self.options.kill_switch(), "unique flush")?;
        if self.file.is_none() {
            self.file = Some(SpillFile::create(self.options.tmp_dir(), UNIQUE_FILE_PREFIX)?);
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        let file_pos = file.position();
        for key in &self.tree {
            file.append(key)?;
        }
        let count = self.tree.len() as u64;
        debug!(run = self.runs.len(), keys = count, "unique run flushed");
        self.runs.push(Buffpek { file_pos, count });
        self.flushed += count;
        self.tree.clear();
        Ok(())
    }

    /// Distinct keys in ascending order. Leaves the collector empty.
    pub fn get(&mut self) -> Result<SortedRows> {
        let mut stats = SortStats {
            examined_rows: self.elements(),
            ..SortStats::default()
        };

        if self.runs.is_empty() {
            let tree = std::mem::take(&mut self.tree);
            let count = tree.len();
            let mut data = Vec::with_capacity(count * self.key_length);
            for key in tree {
                data.extend_from_slice(&key);
            }
            stats.found_rows = count as u64;
            self.reset();
            return Ok(SortedRows::in_memory(data, self.key_length, count, stats));
        }

        if !self.tree.is_empty() {
            self.flush()?;
        }
        let file = self.file.take();
        let runs = std::mem::take(&mut self.runs);
        self.reset();
        let Some(file) = file else {
            return Ok(SortedRows::in_memory(Vec::new(), self.key_length, 0, stats));
        };
        stats.runs = runs.len();

        let shape = MergeShape {
            rec_length: self.key_length,
            key_length: self.key_length,
            dedup: true,
        };
        let dir = self.options.tmp_dir();
        let kill = self.options.kill_switch();
        let (file, runs) = merge_many_buff(
            file.into_mapped()?,
            runs,
            &shape,
            dir,
            UNIQUE_FILE_PREFIX,
            kill,
            &mut stats.merge_passes,
        )?;
        check_killed(kill, "final merge")?;
        let (out, count) = merge_index(
            &file,
            &runs,
            &shape,
            0..self.key_length,
            None,
            dir,
            UNIQUE_FILE_PREFIX,
        )?;
        stats.found_rows = count;
        Ok(SortedRows::on_disk(out, self.key_length, count as usize, stats))
    }

    // ========================================================================
    // Cost model
    // ========================================================================

    /// Estimated cost of collecting `nkeys` keys and reading them back.
    pub fn get_use_cost(nkeys: u64, key_size: usize, max_in_memory_size: usize) -> f64 {
        let max_elements = max_elements_in_tree(key_size, max_in_memory_size);
        let n_full_trees = nkeys / max_elements;
        let last_tree_elems = nkeys % max_elements;

        let mut result = 2.0 * log2_n_fact(last_tree_elems as f64 + 1.0);
        if n_full_trees > 0 {
            result += n_full_trees as f64 * log2_n_fact(max_elements as f64 + 1.0);
        }
        result /= TIME_FOR_COMPARE_ROWID;

        if n_full_trees == 0 {
            return result;
        }

        let io = IO_SIZE as f64;
        result += DISK_SEEK_BASE_COST
            * n_full_trees as f64
            * (key_size as f64 * max_elements as f64 / io).ceil();
        result += DISK_SEEK_BASE_COST * (key_size as f64 * last_tree_elems as f64 / io).ceil();
        result += merge_many_buffs_cost(n_full_trees, max_elements, last_tree_elems, key_size);
        result += (key_size as f64 * nkeys as f64 / io).ceil();
        result
    }

    /// Bytes needed for the run bookkeeping of `nkeys` keys.
    pub fn get_cost_calc_buff_size(nkeys: u64, key_size: usize, max_in_memory_size: usize) -> usize {
        let max_elements = max_elements_in_tree(key_size, max_in_memory_size);
        std::mem::size_of::<u32>() * (1 + (nkeys / max_elements) as usize)
    }
}

fn max_elements_in_tree(key_size: usize, max_in_memory_size: usize) -> u64 {
    (max_in_memory_size / (key_size + TREE_ELEMENT_OVERHEAD)).max(1) as u64
}

/// log2(n!) by Stirling's approximation.
fn log2_n_fact(x: f64) -> f64 {
    ((2.0 * std::f64::consts::PI * x).ln() / 2.0 + x * (x / std::f64::consts::E).ln())
        / std::f64::consts::LN_2
}

fn merge_buffers_cost(elems: &[u64], elem_size: usize) -> f64 {
    let total: u64 = elems.iter().sum();
    let total = total as f64;
    2.0 * total * elem_size as f64 / IO_SIZE as f64
        + total * (elems.len() as f64).ln() / (TIME_FOR_COMPARE_ROWID * std::f64::consts::LN_2)
}

fn merge_many_buffs_cost(
    n_full_trees: u64,
    max_elements: u64,
    last_tree_elems: u64,
    key_size: usize,
) -> f64 {
    let mut elems: Vec<u64> = vec![max_elements; n_full_trees as usize];
    elems.push(last_tree_elems);

    let mut total = 0.0;
    while elems.len() > MERGEBUFF2 {
        let mut merged = Vec::with_capacity(elems.len() / MERGEBUFF + 1);
        let mut i = 0;
        while i < elems.len() {
            let remaining = elems.len() - i;
            let take = if remaining < MERGEBUFF * 3 / 2 {
                remaining
            } else {
                MERGEBUFF
            };
            let group = &elems[i..i + take];
            total += merge_buffers_cost(group, key_size);
            merged.push(group.iter().sum());
            i += take;
        }
        elems = merged;
    }
    total + merge_buffers_cost(&elems, key_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn options(dir: &tempfile::TempDir) -> SessionOptions {
        SessionOptions::builder().tmp_dir(dir.path()).build().unwrap()
    }

    #[test]
    fn in_memory_dedup() {
        let dir = tempdir().unwrap();
        let opts = options(&dir);
        let mut u = Unique::new(1, 64 * 1024, &opts).unwrap();
        let added: Vec<bool> = [b"a", b"a", b"b", b"c", b"c", b"c"]
            .iter()
            .map(|k| u.add(*k).unwrap())
            .collect();
        assert_eq!(added, vec![true, false, true, true, false, false]);
        assert_eq!(u.elements(), 3);

        let rows = u.get().unwrap();
        assert!(!rows.is_on_disk());
        let keys: Vec<&[u8]> = rows.iter().collect();
        assert_eq!(keys, vec![b"a".as_slice(), b"b".as_slice(), b"c".as_slice()]);
        assert_eq!(u.elements(), 0);
    }

    #[test]
    fn spilled_runs_merge_without_duplicates() {
        let dir = tempdir().unwrap();
        let opts = options(&dir);
        // 4 keys of 4 bytes per run
        let mut u = Unique::new(4, 4 * (4 + TREE_ELEMENT_OVERHEAD), &opts).unwrap();
        for round in 0..3u32 {
            for k in 0..10u32 {
                u.add(&(k * 3 + round % 2).to_be_bytes()).unwrap();
            }
        }
        assert!(u.run_count() > 1);
        let rows = u.get().unwrap();
        assert!(rows.is_on_disk());

        let got: Vec<u32> = rows
            .iter()
            .map(|r| u32::from_be_bytes([r[0], r[1], r[2], r[3]]))
            .collect();
        let mut expected: Vec<u32> = (0..10).flat_map(|k| [k * 3, k * 3 + 1]).collect();
        expected.sort_unstable();
        assert_eq!(got, expected);
    }

    #[test]
    fn reset_discards_everything() {
        let dir = tempdir().unwrap();
        let opts = options(&dir);
        let mut u = Unique::new(2, 2 * (2 + TREE_ELEMENT_OVERHEAD), &opts).unwrap();
        for k in 0..9u16 {
            u.add(&k.to_be_bytes()).unwrap();
        }
        u.reset();
        assert_eq!(u.elements(), 0);
        assert_eq!(u.run_count(), 0);
        assert!(u.get().unwrap().is_empty());
    }

    #[test]
    fn wrong_key_length_is_rejected() {
        let dir = tempdir().unwrap();
        let opts = options(&dir);
        let mut u = Unique::new(4, 1024, &opts).unwrap();
        assert!(u.add(b"ab").is_err());
    }

    #[test]
    fn use_cost_grows_with_key_count() {
        let small = Unique::get_use_cost(1000, 8, 4 * 1024);
        let large = Unique::get_use_cost(100_000, 8, 4 * 1024);
        assert!(small > 0.0);
        assert!(large > small);
        assert!(Unique::get_use_cost(1000, 8, 1024 * 1024).is_finite());
    }

    #[test]
    fn cost_calc_buff_size_counts_trees() {
        let per_tree = 1024 / (8 + TREE_ELEMENT_OVERHEAD) as u64;
        assert_eq!(Unique::get_cost_calc_buff_size(0, 8, 1024), 4);
        assert_eq!(
            Unique::get_cost_calc_buff_size(per_tree * 3, 8, 1024),
            4 * 4
        );
    }
}
