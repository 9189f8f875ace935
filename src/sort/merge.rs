//! # Run Files and Merging
//!
//! Sorted runs are appended to anonymous temporary files and read back
//! through a read-only memory map. A run is addressed by a `Buffpek`:
//!
//! ```text
//! run file: [run 0 records][run 1 records]...[run n records]
//!            ^file_pos      ^file_pos
//!            count * rec_length bytes each
//! ```
//!
//! ## Merge passes
//!
//! While more than `MERGEBUFF2` runs exist, groups of `MERGEBUFF` runs are
//! merged into a fresh file (the final group absorbs a remainder shorter
//! than `MERGEBUFF * 3 / 2`). The surviving runs are merged once more by
//! the caller into the output, keeping only the payload bytes.
//!
//! Records compare on their first `key_length` bytes. Equal keys leave in
//! run order, so a key that ends in a unique column merges
//! deterministically.
//!
//! ## Resident memory
//!
//! The whole run file is mapped, but only touched pages are resident. A
//! merge walks each of its runs front to back, so the working set is about
//! one page per open run plus the buffered writer it fills, and pages
//! already consumed are clean and can be dropped by the kernel at any time.
//!
//! ## Cleanup
//!
//! Files are `tempfile::NamedTempFile`s and disappear when dropped, so an
//! error or a cancelled sort leaves nothing behind.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use memmap2::Mmap;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::config::{KillSwitch, MERGEBUFF, MERGEBUFF2};
use crate::error::SqlError;

/// Location of one sorted run inside a run file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buffpek {
    pub file_pos: u64,
    pub count: u64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct MergeShape {
    pub rec_length: usize,
    pub key_length: usize,
    pub dedup: bool,
}

pub(crate) fn check_killed(kill: &KillSwitch, stage: &str) -> Result<()> {
    if let Err(e) = kill.check() {
        debug!(stage, "sort cancelled");
        return Err(e.into());
    }
    Ok(())
}

// ============================================================================
// Run files
// ============================================================================

pub(crate) struct SpillFile {
    temp: NamedTempFile,
    writer: BufWriter<File>,
    written: u64,
}

impl SpillFile {
    pub fn create(dir: &Path, prefix: &str) -> Result<Self> {
        let temp = tempfile::Builder::new()
            .prefix(prefix)
            .tempfile_in(dir)
            .map_err(|e| {
                SqlError::resource_exhausted(
                    "temporary file",
                    format!("{}: {}", dir.display(), e),
                )
            })?;
        let handle = temp
            .as_file()
            .try_clone()
            .wrap_err("failed to open run file for writing")?;
        Ok(Self {
            temp,
            writer: BufWriter::new(handle),
            written: 0,
        })
    }

    pub fn position(&self) -> u64 {
        self.written
    }

    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer
            .write_all(bytes)
            .map_err(|e| SqlError::resource_exhausted("temporary file", e))?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    pub fn into_mapped(mut self) -> Result<MappedFile> {
        self.writer
            .flush()
            .map_err(|e| SqlError::resource_exhausted("temporary file", e))?;
        drop(self.writer);

        let map = if self.written == 0 {
            None
        } else {
            let mmap = unsafe { Mmap::map(self.temp.as_file()) }
                .wrap_err_with(|| format!("failed to mmap run file {:?}", self.temp.path()))?;
            ensure!(
                mmap.len() as u64 == self.written,
                "run file holds {} bytes, expected {}",
                mmap.len(),
                self.written
            );
            Some(mmap)
        };
        Ok(MappedFile {
            _temp: self.temp,
            map,
        })
    }
}

/// A finished run file, mapped for reading.
pub(crate) struct MappedFile {
    _temp: NamedTempFile,
    map: Option<Mmap>,
}

impl MappedFile {
    pub fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }
}

impl std::fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedFile")
            .field("len", &self.bytes().len())
            .finish()
    }
}

// ============================================================================
// Merging
// ============================================================================

struct HeapEntry<'m> {
    key: &'m [u8],
    run: usize,
}

impl PartialEq for HeapEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry<'_> {}

impl PartialOrd for HeapEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry<'_> {
    // reversed: BinaryHeap pops the smallest key, lowest run first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(self.key)
            .then_with(|| other.run.cmp(&self.run))
    }
}

/// Merges `runs` of `src` into `out`, writing the `output` byte range of
/// each record. Returns the run written, holding at most `limit` records.
pub(crate) fn merge_buffers(
    src: &[u8],
    runs: &[Buffpek],
    shape: &MergeShape,
    out: &mut SpillFile,
    output: Range<usize>,
    limit: Option<u64>,
) -> Result<Buffpek> {
    let rec = shape.rec_length;
    let mut cursors = Vec::with_capacity(runs.len());
    let mut heap = BinaryHeap::with_capacity(runs.len());
    for (run, b) in runs.iter().enumerate() {
        let start = b.file_pos as usize;
        let end = start + b.count as usize * rec;
        ensure!(end <= src.len(), "run {} extends past end of file", run);
        cursors.push((start, end));
        if b.count > 0 {
            heap.push(HeapEntry {
                key: &src[start..start + shape.key_length],
                run,
            });
        }
    }

    let file_pos = out.position();
    let limit = limit.unwrap_or(u64::MAX);
    let mut count = 0u64;
    let mut last: Option<&[u8]> = None;

    while let Some(top) = heap.pop() {
        if count >= limit {
            break;
        }
        let (pos, end) = cursors[top.run];
        let record = &src[pos..pos + rec];
        if !(shape.dedup && last == Some(top.key)) {
            out.append(&record[output.clone()])?;
            count += 1;
            last = Some(top.key);
        }
        let next = pos + rec;
        cursors[top.run].0 = next;
        if next < end {
            heap.push(HeapEntry {
                key: &src[next..next + shape.key_length],
                run: top.run,
            });
        }
    }

    Ok(Buffpek { file_pos, count })
}

/// Reduces `runs` to at most `MERGEBUFF2` by repeated merge passes.
pub(crate) fn merge_many_buff(
    mut file: MappedFile,
    mut runs: Vec<Buffpek>,
    shape: &MergeShape,
    dir: &Path,
    prefix: &str,
    kill: &KillSwitch,
    passes: &mut usize,
) -> Result<(MappedFile, Vec<Buffpek>)> {
    while runs.len() > MERGEBUFF2 {
        check_killed(kill, "merge pass")?;

        let mut out = SpillFile::create(dir, prefix)?;
        let mut merged = Vec::with_capacity(runs.len() / MERGEBUFF + 1);
        let mut i = 0;
        while i < runs.len() {
            let remaining = runs.len() - i;
            let take = if remaining < MERGEBUFF * 3 / 2 {
                remaining
            } else {
                MERGEBUFF
            };
            merged.push(merge_buffers(
                file.bytes(),
                &runs[i..i + take],
                shape,
                &mut out,
                0..shape.rec_length,
                None,
            )?);
            i += take;
        }

        *passes += 1;
        debug!(
            pass = *passes,
            runs_in = runs.len(),
            runs_out = merged.len(),
            "merge pass complete"
        );
        file = out.into_mapped()?;
        runs = merged;
    }
    Ok((file, runs))
}

/// Final merge: all `runs` into a new file holding only the `output` part
/// of each record.
pub(crate) fn merge_index(
    file: &MappedFile,
    runs: &[Buffpek],
    shape: &MergeShape,
    output: Range<usize>,
    limit: Option<u64>,
    dir: &Path,
    prefix: &str,
) -> Result<(MappedFile, u64)> {
    let mut out = SpillFile::create(dir, prefix)?;
    let written = merge_buffers(file.bytes(), runs, shape, &mut out, output, limit)?;
    Ok((out.into_mapped()?, written.count))
}
