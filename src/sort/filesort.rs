//! # FileSort
//!
//! External sort of rows by a list of `SortField`s under a bounded buffer.
//!
//! ## Phases
//!
//! ```text
//! RowSource ──filter──> make_sortkey ──> sort buffer ──full──> run file
//!                                            │                    │
//!                                            │ (no spill)         v
//!                                            │            merge_many_buff
//!                                            v                    v
//!                                       SortedRows <──── merge_index
//! ```
//!
//! 1. **Buffer**: `sort_buffer_size` bytes are reserved from the `Sort`
//!    pool. On refusal the request shrinks by 3/4 down to
//!    `max(MIN_SORT_MEMORY, rec_length * MERGEBUFF2)`, then the sort fails
//!    with `ResourceExhausted`.
//! 2. **Scan**: every row is counted in `examined_rows`; rows passing the
//!    filter are encoded and counted in `found_rows`. A full buffer is
//!    sorted and written as one run.
//! 3. **Merge**: runs are merged down to `MERGEBUFF2` and then into the
//!    output, which keeps only the payload of each record.
//!
//! Without a spill the buffer is sorted in place and nothing touches disk.
//!
//! ## Payload
//!
//! When `sort_length + addon length <= max_length_for_sort_data` the
//! payload carries the row's columns (`AddonFields`); otherwise it is the
//! 8-byte position the source reported for the row.
//!
//! ## Cancellation
//!
//! The kill switch is checked before the scan, at every run flush and
//! before every merge pass. A cancelled sort returns `SqlError::Cancelled`
//! and its temporary files are removed.

use eyre::Result;
use tracing::{debug, trace};

use super::merge::{check_killed, merge_index, merge_many_buff, Buffpek, MappedFile, MergeShape, SpillFile};
use super::sort_key::{AddonFields, SortField, SortKey};
use crate::config::{
    SessionOptions, MERGEBUFF2, MIN_SORT_MEMORY, ROW_REF_LENGTH, SORT_BUFFER_SHRINK_DEN,
    SORT_BUFFER_SHRINK_NUM, SORT_FILE_PREFIX, SORT_POINTER_SIZE,
};
use crate::error::SqlError;
use crate::field::RowLayout;
use crate::memory::{Pool, Reservation};

/// Rows to sort, each with the position a row reference should point at.
pub trait RowSource {
    fn next_row(&mut self) -> Result<Option<(&[u8], u64)>>;
}

/// Rows held in memory; a row's position is its index.
pub struct SliceSource<'r> {
    rows: &'r [Vec<u8>],
    next: usize,
}

impl<'r> SliceSource<'r> {
    pub fn new(rows: &'r [Vec<u8>]) -> Self {
        Self { rows, next: 0 }
    }
}

impl RowSource for SliceSource<'_> {
    fn next_row(&mut self) -> Result<Option<(&[u8], u64)>> {
        let Some(row) = self.rows.get(self.next) else {
            return Ok(None);
        };
        let pos = self.next as u64;
        self.next += 1;
        Ok(Some((row.as_slice(), pos)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortStats {
    pub examined_rows: u64,
    pub found_rows: u64,
    pub runs: usize,
    pub merge_passes: usize,
}

// ============================================================================
// Sorted output
// ============================================================================

#[derive(Debug)]
enum Storage {
    Memory(Vec<u8>),
    File(MappedFile),
}

/// Payloads of the sorted rows, in order.
#[derive(Debug)]
pub struct SortedRows {
    storage: Storage,
    res_length: usize,
    count: usize,
    addon: Option<AddonFields>,
    stats: SortStats,
}

impl SortedRows {
    fn bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Memory(v) => v,
            Storage::File(f) => f.bytes(),
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn stats(&self) -> SortStats {
        self.stats
    }

    pub fn is_on_disk(&self) -> bool {
        matches!(self.storage, Storage::File(_))
    }

    pub fn addon_fields(&self) -> Option<&AddonFields> {
        self.addon.as_ref()
    }

    pub fn record(&self, idx: usize) -> Option<&[u8]> {
        if idx >= self.count {
            return None;
        }
        let start = idx * self.res_length;
        Some(&self.bytes()[start..start + self.res_length])
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.bytes()[..self.count * self.res_length].chunks_exact(self.res_length.max(1))
    }

    /// Row position of record `idx` when the sort carried references.
    pub fn row_position(&self, idx: usize) -> Option<u64> {
        if self.addon.is_some() {
            return None;
        }
        let rec = self.record(idx)?;
        let mut buf = [0u8; ROW_REF_LENGTH];
        buf.copy_from_slice(&rec[..ROW_REF_LENGTH]);
        Some(u64::from_be_bytes(buf))
    }

    /// Restores record `idx` into `row` when the sort carried addon fields.
    pub fn unpack(&self, idx: usize, row: &mut [u8]) -> bool {
        match (&self.addon, self.record(idx)) {
            (Some(addon), Some(rec)) => {
                addon.unpack(rec, row);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn in_memory(data: Vec<u8>, res_length: usize, count: usize, stats: SortStats) -> Self {
        Self {
            storage: Storage::Memory(data),
            res_length,
            count,
            addon: None,
            stats,
        }
    }

    pub(crate) fn on_disk(file: MappedFile, res_length: usize, count: usize, stats: SortStats) -> Self {
        Self {
            storage: Storage::File(file),
            res_length,
            count,
            addon: None,
            stats,
        }
    }
}

// ============================================================================
// Sort buffer
// ============================================================================

pub(crate) fn reserve_sort_buffer(
    options: &SessionOptions,
    requested: usize,
    rec_length: usize,
) -> Result<Reservation> {
    let min_size = MIN_SORT_MEMORY.max(rec_length * MERGEBUFF2);
    let mut size = requested.max(min_size);
    loop {
        match options.budget().reserve(Pool::Sort, size) {
            Ok(r) => {
                debug!(bytes = size, rec_length, "sort buffer reserved");
                return Ok(r);
            }
            Err(e) if size > min_size => {
                let next = (size / SORT_BUFFER_SHRINK_DEN * SORT_BUFFER_SHRINK_NUM).max(min_size);
                debug!(from = size, to = next, error = %e, "shrinking sort buffer");
                size = next;
            }
            Err(e) => {
                return Err(SqlError::resource_exhausted(
                    "sort buffer",
                    format!("{} bytes unavailable: {}", size, e),
                )
                .into())
            }
        }
    }
}

struct SortBuffer {
    data: Vec<u8>,
    order: Vec<u32>,
    rec_length: usize,
    key_length: usize,
    keys: usize,
}

impl SortBuffer {
    fn new(bytes: usize, rec_length: usize, key_length: usize) -> Self {
        let keys = (bytes / (rec_length + SORT_POINTER_SIZE)).max(1);
        Self {
            data: Vec::with_capacity(keys * rec_length),
            order: Vec::with_capacity(keys),
            rec_length,
            key_length,
            keys,
        }
    }

    fn is_full(&self) -> bool {
        self.order.len() >= self.keys
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Appends a zeroed record and returns it for encoding.
    fn push(&mut self) -> &mut [u8] {
        let start = self.data.len();
        self.order.push(self.order.len() as u32);
        self.data.resize(start + self.rec_length, 0);
        &mut self.data[start..]
    }

    fn record(&self, idx: u32) -> &[u8] {
        let start = idx as usize * self.rec_length;
        &self.data[start..start + self.rec_length]
    }

    fn sort(&mut self) {
        let (data, rec, key) = (&self.data, self.rec_length, self.key_length);
        self.order.sort_by(|a, b| {
            let a = *a as usize * rec;
            let b = *b as usize * rec;
            data[a..a + key].cmp(&data[b..b + key])
        });
    }

    fn sorted(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.order.iter().map(|i| self.record(*i))
    }

    fn clear(&mut self) {
        self.data.clear();
        self.order.clear();
    }
}

// ============================================================================
// FileSort
// ============================================================================

type RowFilter<'a> = Box<dyn FnMut(&[u8]) -> bool + 'a>;

pub struct FileSort<'a> {
    options: &'a SessionOptions,
    key: SortKey,
    addon: Option<AddonFields>,
    rec_length: usize,
    max_rows: Option<u64>,
    filter: Option<RowFilter<'a>>,
}

impl<'a> FileSort<'a> {
    pub fn new(layout: &RowLayout, fields: &[SortField], options: &'a SessionOptions) -> Result<Self> {
        let key = SortKey::new(layout, fields, options.max_sort_length())?;
        let addon = AddonFields::all(layout)?;
        let addon = (key.sort_length() + addon.length() <= options.max_length_for_sort_data())
            .then_some(addon);
        let payload = addon.as_ref().map_or(ROW_REF_LENGTH, AddonFields::length);
        Ok(Self {
            options,
            rec_length: key.sort_length() + payload,
            key,
            addon,
            max_rows: None,
            filter: None,
        })
    }

    /// Keeps only the first `n` rows of the sorted output.
    pub fn with_limit(mut self, n: u64) -> Self {
        self.max_rows = Some(n);
        self
    }

    pub fn with_filter(mut self, filter: impl FnMut(&[u8]) -> bool + 'a) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn sort_length(&self) -> usize {
        self.key.sort_length()
    }

    pub fn record_length(&self) -> usize {
        self.rec_length
    }

    pub fn uses_addon_fields(&self) -> bool {
        self.addon.is_some()
    }

    /// Buffer bytes needed to hold `keys` records.
    pub fn buffer_size_for(&self, keys: usize) -> usize {
        keys * (self.rec_length + SORT_POINTER_SIZE)
    }

    fn payload_length(&self) -> usize {
        self.rec_length - self.key.sort_length()
    }

    fn encode(&self, row: &[u8], pos: u64, dest: &mut [u8]) {
        let key_len = self.key.sort_length();
        self.key.make_sortkey(row, &mut dest[..key_len]);
        match &self.addon {
            Some(addon) => addon.pack(row, &mut dest[key_len..]),
            None => dest[key_len..].copy_from_slice(&pos.to_be_bytes()),
        }
    }

    pub fn run(&mut self, source: &mut dyn RowSource) -> Result<SortedRows> {
        let kill = self.options.kill_switch().clone();
        check_killed(&kill, "scan")?;

        let reservation =
            reserve_sort_buffer(self.options, self.options.sort_buffer_size(), self.rec_length)?;
        let mut buffer = SortBuffer::new(reservation.bytes(), self.rec_length, self.key.sort_length());
        let shape = MergeShape {
            rec_length: self.rec_length,
            key_length: self.key.sort_length(),
            dedup: false,
        };

        let mut stats = SortStats::default();
        let mut spill: Option<SpillFile> = None;
        let mut runs: Vec<Buffpek> = Vec::new();
        let tmp_dir = self.options.tmp_dir();

        while let Some((row, pos)) = source.next_row()? {
            stats.examined_rows += 1;
            if let Some(filter) = self.filter.as_mut() {
                if !filter(row) {
                    continue;
                }
            }
            if buffer.is_full() {
                check_killed(&kill, "run flush")?;
                if spill.is_none() {
                    spill = Some(SpillFile::create(tmp_dir, SORT_FILE_PREFIX)?);
                }
                if let Some(file) = spill.as_mut() {
                    runs.push(write_run(&mut buffer, file, self.max_rows)?);
                }
            }
            stats.found_rows += 1;
            let dest = buffer.push();
            self.encode(row, pos, dest);
        }

        let res_length = self.payload_length();
        let key_len = self.key.sort_length();

        let Some(mut file) = spill else {
            buffer.sort();
            let limit = self.max_rows.map_or(usize::MAX, |n| n as usize);
            let mut out = Vec::with_capacity(buffer.order.len().min(limit) * res_length);
            let mut count = 0;
            for rec in buffer.sorted().take(limit) {
                out.extend_from_slice(&rec[key_len..]);
                count += 1;
            }
            debug!(rows = count, "sorted in memory");
            let mut rows = SortedRows::in_memory(out, res_length, count, stats);
            rows.addon = self.addon.clone();
            return Ok(rows);
        };

        if !buffer.is_empty() {
            check_killed(&kill, "run flush")?;
            runs.push(write_run(&mut buffer, &mut file, self.max_rows)?);
        }
        drop(buffer);
        drop(reservation);
        stats.runs = runs.len();

        let (file, runs) = merge_many_buff(
            file.into_mapped()?,
            runs,
            &shape,
            tmp_dir,
            SORT_FILE_PREFIX,
            &kill,
            &mut stats.merge_passes,
        )?;
        check_killed(&kill, "final merge")?;
        let (out, count) = merge_index(
            &file,
            &runs,
            &shape,
            key_len..self.rec_length,
            self.max_rows,
            tmp_dir,
            SORT_FILE_PREFIX,
        )?;
        debug!(
            rows = count,
            runs = stats.runs,
            passes = stats.merge_passes,
            "sorted with merge"
        );
        let mut rows = SortedRows::on_disk(out, res_length, count as usize, stats);
        rows.addon = self.addon.clone();
        Ok(rows)
    }
}

fn write_run(buffer: &mut SortBuffer, file: &mut SpillFile, limit: Option<u64>) -> Result<Buffpek> {
    buffer.sort();
    let file_pos = file.position();
    let limit = limit.map_or(usize::MAX, |n| n as usize);
    let mut count = 0u64;
    for rec in buffer.sorted().take(limit) {
        file.append(rec)?;
        count += 1;
    }
    trace!(file_pos, count, "run written");
    buffer.clear();
    Ok(Buffpek { file_pos, count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KillSwitch;
    use crate::field::FieldType;
    use crate::memory::MemoryBudget;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    fn layout() -> RowLayout {
        RowLayout::builder()
            .column("id", FieldType::Int32)
            .nullable("grp", FieldType::Int32)
            .build()
            .unwrap()
    }

    fn rows(layout: &RowLayout, n: i64) -> Vec<Vec<u8>> {
        (0..n)
            .map(|i| {
                let mut row = layout.new_row();
                layout.field_mut(0, &mut row).store_int((i * 7919) % n).unwrap();
                if i % 5 != 0 {
                    layout.field_mut(1, &mut row).store_int(i % 3).unwrap();
                }
                row
            })
            .collect()
    }

    fn options(dir: &TempDir, sort_buffer: usize, max_data: usize) -> SessionOptions {
        SessionOptions::builder()
            .tmp_dir(dir.path())
            .sort_buffer_size(sort_buffer)
            .max_length_for_sort_data(max_data)
            .memory_budget(Arc::new(MemoryBudget::with_limit(64 * 1024 * 1024)))
            .build()
            .unwrap()
    }

    fn ids(layout: &RowLayout, sorted: &SortedRows, source: &[Vec<u8>]) -> Vec<i64> {
        (0..sorted.len())
            .map(|i| match sorted.row_position(i) {
                Some(pos) => layout.field(0, &source[pos as usize]).val_int(),
                None => {
                    let mut row = layout.new_row();
                    assert!(sorted.unpack(i, &mut row));
                    layout.field(0, &row).val_int()
                }
            })
            .collect()
    }

    #[test]
    fn in_memory_sort_with_row_refs() {
        let dir = tempdir().unwrap();
        let opts = options(&dir, 256 * 1024, 0);
        let layout = layout();
        let data = rows(&layout, 500);
        let mut sort = FileSort::new(&layout, &[SortField::asc(0)], &opts).unwrap();
        assert!(!sort.uses_addon_fields());
        let sorted = sort.run(&mut SliceSource::new(&data)).unwrap();
        assert!(!sorted.is_on_disk());
        assert_eq!(ids(&layout, &sorted, &data), (0..500).collect::<Vec<_>>());
        assert_eq!(sorted.stats().examined_rows, 500);
        assert_eq!(sorted.stats().runs, 0);
    }

    #[test]
    fn spilled_sort_matches_in_memory_order() {
        let dir = tempdir().unwrap();
        let layout = layout();
        let data = rows(&layout, 5000);
        let fields = [SortField::desc(1), SortField::asc(0)];

        let big = options(&dir, 1024 * 1024, 1024);
        let mut in_memory = FileSort::new(&layout, &fields, &big).unwrap();
        assert!(in_memory.uses_addon_fields());
        let expected = in_memory.run(&mut SliceSource::new(&data)).unwrap();

        let sizing = FileSort::new(&layout, &fields, &big).unwrap();
        let small = options(&dir, sizing.buffer_size_for(MIN_SORT_MEMORY / sizing.record_length()), 1024);
        let mut spilled = FileSort::new(&layout, &fields, &small).unwrap();
        let got = spilled.run(&mut SliceSource::new(&data)).unwrap();

        assert!(got.is_on_disk());
        assert!(got.stats().runs > 1);
        assert_eq!(got.len(), expected.len());
        assert!(got.iter().eq(expected.iter()));
    }

    #[test]
    fn filter_and_limit() {
        let dir = tempdir().unwrap();
        let opts = options(&dir, 64 * 1024, 0);
        let layout = layout();
        let data = rows(&layout, 1000);
        let filter_layout = layout.clone();
        let mut sort = FileSort::new(&layout, &[SortField::desc(0)], &opts)
            .unwrap()
            .with_filter(move |row| filter_layout.field(0, row).val_int() % 2 == 0)
            .with_limit(3);
        let sorted = sort.run(&mut SliceSource::new(&data)).unwrap();
        assert_eq!(ids(&layout, &sorted, &data), vec![998, 996, 994]);
        assert_eq!(sorted.stats().examined_rows, 1000);
        assert_eq!(sorted.stats().found_rows, 500);
    }

    #[test]
    fn killed_sort_is_cancelled() {
        let dir = tempdir().unwrap();
        let kill = KillSwitch::new();
        let opts = SessionOptions::builder()
            .tmp_dir(dir.path())
            .kill_switch(kill.clone())
            .build()
            .unwrap();
        kill.kill();
        let layout = layout();
        let data = rows(&layout, 10);
        let mut sort = FileSort::new(&layout, &[SortField::asc(0)], &opts).unwrap();
        let err = sort.run(&mut SliceSource::new(&data)).unwrap_err();
        assert!(matches!(err.downcast_ref::<SqlError>(), Some(SqlError::Cancelled)));
    }

    #[test]
    fn refused_buffer_is_resource_exhausted() {
        let dir = tempdir().unwrap();
        let budget = Arc::new(MemoryBudget::with_limit(0));
        budget
            .allocate(Pool::Sort, budget.available(Pool::Sort))
            .unwrap();
        let opts = SessionOptions::builder()
            .tmp_dir(dir.path())
            .memory_budget(Arc::clone(&budget))
            .build()
            .unwrap();
        let layout = layout();
        let data = rows(&layout, 10);
        let mut sort = FileSort::new(&layout, &[SortField::asc(0)], &opts).unwrap();
        let err = sort.run(&mut SliceSource::new(&data)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SqlError>(),
            Some(SqlError::ResourceExhausted { .. })
        ));
    }
}
