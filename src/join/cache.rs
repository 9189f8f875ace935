//! # Join Cache
//!
//! Packs combinations of outer-table rows into one contiguous buffer so a
//! nested-loop join can scan the inner table once per buffer instead of
//! once per outer row.
//!
//! ## Record Format
//!
//! A cached record is the concatenation, table by table, of that table's
//! cache fields:
//!
//! | Kind       | Bytes in the cache                              |
//! |------------|-------------------------------------------------|
//! | `NullBits` | the row's null bitmap, verbatim                 |
//! | `Fixed`    | the full image                                  |
//! | `Strip`    | u16 length + CHAR data without trailing spaces  |
//! | `Varying`  | u16 length + VARCHAR prefix and used bytes      |
//! | `RowId`    | u64 position of the row, big-endian             |
//!
//! Strip and Varying records are shorter than `record_length`, the
//! maximal size every free-space check uses.
//!
//! ## Lifecycle
//!
//! ```text
//! reset_cache_write ─> store_record_in_cache* ─(full)─> for_each_record
//!        ^                                                   │
//!        └───────────────────────────────────────────────────┘
//! ```

use eyre::{ensure, Result};
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::config::{SessionOptions, JOIN_STRIP_MIN_LENGTH, ROW_REF_LENGTH};
use crate::error::SqlError;
use crate::field::{FieldType, RowLayout};
use crate::memory::{Pool, Reservation};

const LENGTH_BYTES: usize = 2;

/// One outer table taking part in the cache.
#[derive(Debug, Clone, Copy)]
pub struct JoinTable<'l> {
    pub layout: &'l RowLayout,
    pub row_id: bool,
}

impl<'l> JoinTable<'l> {
    pub fn new(layout: &'l RowLayout) -> Self {
        Self {
            layout,
            row_id: false,
        }
    }

    pub fn with_row_id(mut self) -> Self {
        self.row_id = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFieldKind {
    NullBits,
    Fixed,
    Strip,
    Varying,
    RowId,
}

/// Placement of one cached field: where it lives in its table's row and
/// how many bytes it may take in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheField {
    pub table: usize,
    pub kind: CacheFieldKind,
    pub offset: usize,
    pub length: usize,
    pub field_type: Option<FieldType>,
}

impl CacheField {
    /// Largest number of cache bytes this field can occupy.
    pub fn max_cached_length(&self) -> usize {
        match self.kind {
            CacheFieldKind::Strip | CacheFieldKind::Varying => LENGTH_BYTES + self.length,
            _ => self.length,
        }
    }

    fn pack(&self, row: &[u8], row_id: u64, dest: &mut Vec<u8>) {
        match self.kind {
            CacheFieldKind::NullBits | CacheFieldKind::Fixed => {
                dest.extend_from_slice(&row[self.offset..self.offset + self.length]);
            }
            CacheFieldKind::Strip => {
                let image = &row[self.offset..self.offset + self.length];
                let used = image.iter().rposition(|b| *b != b' ').map_or(0, |i| i + 1);
                dest.extend_from_slice(&(used as u16).to_be_bytes());
                dest.extend_from_slice(&image[..used]);
            }
            CacheFieldKind::Varying => {
                let image = &row[self.offset..self.offset + self.length];
                let used = self
                    .field_type
                    .map_or(self.length, |ft| ft.data_length(image));
                dest.extend_from_slice(&(used as u16).to_be_bytes());
                dest.extend_from_slice(&image[..used]);
            }
            CacheFieldKind::RowId => dest.extend_from_slice(&row_id.to_be_bytes()),
        }
    }

    /// Restores the field into `row` and returns the cache bytes consumed.
    fn unpack(&self, src: &[u8], row: &mut [u8], row_id: &mut u64) -> usize {
        match self.kind {
            CacheFieldKind::NullBits | CacheFieldKind::Fixed => {
                row[self.offset..self.offset + self.length].copy_from_slice(&src[..self.length]);
                self.length
            }
            CacheFieldKind::Strip | CacheFieldKind::Varying => {
                let used = u16::from_be_bytes([src[0], src[1]]) as usize;
                let image = &mut row[self.offset..self.offset + self.length];
                image[..used].copy_from_slice(&src[LENGTH_BYTES..LENGTH_BYTES + used]);
                let pad = if self.kind == CacheFieldKind::Strip { b' ' } else { 0 };
                image[used..].fill(pad);
                LENGTH_BYTES + used
            }
            CacheFieldKind::RowId => {
                let mut buf = [0u8; ROW_REF_LENGTH];
                buf.copy_from_slice(&src[..ROW_REF_LENGTH]);
                *row_id = u64::from_be_bytes(buf);
                ROW_REF_LENGTH
            }
        }
    }
}

fn cache_fields(table: usize, t: &JoinTable<'_>) -> Vec<CacheField> {
    let layout = t.layout;
    let mut fields = Vec::with_capacity(layout.field_count() + 2);
    if layout.null_bytes() > 0 {
        fields.push(CacheField {
            table,
            kind: CacheFieldKind::NullBits,
            offset: 0,
            length: layout.null_bytes(),
            field_type: None,
        });
    }
    for def in layout.fields() {
        let kind = match def.field_type {
            FieldType::Varchar { .. } => CacheFieldKind::Varying,
            FieldType::Char { length, .. } if length as usize >= JOIN_STRIP_MIN_LENGTH => {
                CacheFieldKind::Strip
            }
            _ => CacheFieldKind::Fixed,
        };
        fields.push(CacheField {
            table,
            kind,
            offset: def.offset,
            length: def.pack_length(),
            field_type: Some(def.field_type),
        });
    }
    if t.row_id {
        fields.push(CacheField {
            table,
            kind: CacheFieldKind::RowId,
            offset: 0,
            length: ROW_REF_LENGTH,
            field_type: None,
        });
    }
    fields
}

// ============================================================================
// JoinCache
// ============================================================================

pub struct JoinCache<'l> {
    tables: Vec<JoinTable<'l>>,
    fields: Vec<CacheField>,
    buffer: Vec<u8>,
    size: usize,
    length: usize,
    records: usize,
    read_pos: usize,
    read_records: usize,
    _reservation: Reservation,
}

impl<'l> JoinCache<'l> {
    pub fn new(tables: Vec<JoinTable<'l>>, options: &SessionOptions) -> Result<Self> {
        ensure!(!tables.is_empty(), "join cache needs at least one table");
        let fields: Vec<CacheField> = tables
            .iter()
            .enumerate()
            .flat_map(|(i, t)| cache_fields(i, t))
            .collect();
        let length: usize = fields.iter().map(CacheField::max_cached_length).sum();
        let size = options.join_buffer_size().max(length);

        let reservation = options
            .budget()
            .reserve(Pool::Join, size)
            .map_err(|e| SqlError::resource_exhausted("join buffer", e))?;
        debug!(
            tables = tables.len(),
            fields = fields.len(),
            record_length = length,
            bytes = size,
            "join cache allocated"
        );

        Ok(Self {
            tables,
            fields,
            buffer: Vec::with_capacity(size),
            size,
            length,
            records: 0,
            read_pos: 0,
            read_records: 0,
            _reservation: reservation,
        })
    }

    pub fn fields(&self) -> &[CacheField] {
        &self.fields
    }

    /// Maximal size of one cached record.
    pub fn record_length(&self) -> usize {
        self.length
    }

    pub fn buffer_size(&self) -> usize {
        self.size
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Bytes of the buffer in use.
    pub fn used(&self) -> usize {
        self.buffer.len()
    }

    fn is_full(&self) -> bool {
        self.size - self.buffer.len() < self.length
    }

    /// Appends one record built from `rows`, one `(row, position)` per
    /// table. Returns true when the next record might not fit and the
    /// cache must be drained first.
    pub fn store_record_in_cache(&mut self, rows: &[(&[u8], u64)]) -> Result<bool> {
        ensure!(
            rows.len() == self.tables.len(),
            "expected {} rows, got {}",
            self.tables.len(),
            rows.len()
        );
        ensure!(!self.is_full(), "join cache is full");
        for (i, (row, _)) in rows.iter().enumerate() {
            ensure!(
                row.len() == self.tables[i].layout.row_length(),
                "row for table {} has {} bytes, expected {}",
                i,
                row.len(),
                self.tables[i].layout.row_length()
            );
        }

        for field in &self.fields {
            let (row, pos) = rows[field.table];
            field.pack(row, pos, &mut self.buffer);
        }
        self.records += 1;

        let full = self.is_full();
        if full {
            debug!(records = self.records, bytes = self.buffer.len(), "join cache full");
        }
        Ok(full)
    }

    pub fn reset_cache_read(&mut self) {
        self.read_pos = 0;
        self.read_records = 0;
    }

    pub fn reset_cache_write(&mut self) {
        self.buffer.clear();
        self.records = 0;
        self.reset_cache_read();
    }

    /// Restores the next cached record into `rows` (one buffer per table)
    /// and `row_ids`. Returns false once every record has been read.
    pub fn read_cached_record(&mut self, rows: &mut [Vec<u8>], row_ids: &mut [u64]) -> Result<bool> {
        if self.read_records >= self.records {
            return Ok(false);
        }
        ensure!(
            rows.len() == self.tables.len() && row_ids.len() == self.tables.len(),
            "expected buffers for {} tables",
            self.tables.len()
        );
        let mut pos = self.read_pos;
        for field in &self.fields {
            pos += field.unpack(
                &self.buffer[pos..],
                &mut rows[field.table],
                &mut row_ids[field.table],
            );
        }
        self.read_pos = pos;
        self.read_records += 1;
        Ok(true)
    }

    /// Feeds every cached record to `f`, from the start of the cache.
    pub fn for_each_record<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&[Vec<u8>], &[u64]) -> Result<()>,
    {
        self.reset_cache_read();
        let mut rows: Vec<Vec<u8>> = self.tables.iter().map(|t| t.layout.new_row()).collect();
        let mut row_ids: SmallVec<[u64; 4]> = SmallVec::from_elem(0, self.tables.len());
        while self.read_cached_record(&mut rows, &mut row_ids)? {
            f(&rows, &row_ids)?;
        }
        trace!(records = self.records, "join cache drained");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Collation;
    use tempfile::tempdir;

    fn outer() -> RowLayout {
        RowLayout::builder()
            .column("id", FieldType::Int32)
            .nullable("code", FieldType::char(8))
            .column("note", FieldType::varchar(20))
            .column("flag", FieldType::char(2))
            .build()
            .unwrap()
    }

    fn other() -> RowLayout {
        RowLayout::builder()
            .column("k", FieldType::Int64)
            .column("tag", FieldType::char(6).with_collation(Collation::CaseInsensitive))
            .build()
            .unwrap()
    }

    fn options(dir: &tempfile::TempDir, join_buffer: usize) -> SessionOptions {
        SessionOptions::builder()
            .tmp_dir(dir.path())
            .join_buffer_size(join_buffer)
            .build()
            .unwrap()
    }

    fn outer_row(layout: &RowLayout, id: i64, code: Option<&str>, note: &str) -> Vec<u8> {
        let mut row = layout.new_row();
        layout.field_mut(0, &mut row).store_int(id).unwrap();
        if let Some(c) = code {
            layout.field_mut(1, &mut row).store_str(c).unwrap();
        }
        layout.field_mut(2, &mut row).store_str(note).unwrap();
        layout.field_mut(3, &mut row).store_str("y").unwrap();
        row
    }

    #[test]
    fn field_kinds_follow_column_types() {
        let dir = tempdir().unwrap();
        let layout = outer();
        let cache = JoinCache::new(vec![JoinTable::new(&layout).with_row_id()], &options(&dir, 8192)).unwrap();
        let kinds: Vec<CacheFieldKind> = cache.fields().iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![
                CacheFieldKind::NullBits,
                CacheFieldKind::Fixed,
                CacheFieldKind::Strip,
                CacheFieldKind::Varying,
                CacheFieldKind::Fixed,
                CacheFieldKind::RowId,
            ]
        );
        assert_eq!(cache.record_length(), 1 + 4 + (2 + 8) + (2 + 21) + 2 + 8);
    }

    #[test]
    fn records_round_trip_across_tables() {
        let dir = tempdir().unwrap();
        let (a, b) = (outer(), other());
        let mut cache = JoinCache::new(
            vec![JoinTable::new(&a).with_row_id(), JoinTable::new(&b)],
            &options(&dir, 8192),
        )
        .unwrap();

        let mut stored = Vec::new();
        for i in 0..10i64 {
            let ra = outer_row(&a, i, (i % 3 != 0).then_some("ab"), &"n".repeat(i as usize));
            let mut rb = b.new_row();
            b.field_mut(0, &mut rb).store_int(i * 100).unwrap();
            b.field_mut(1, &mut rb).store_str("Tag").unwrap();
            assert!(!cache.store_record_in_cache(&[(ra.as_slice(), 1000 + i as u64), (rb.as_slice(), 0)]).unwrap());
            stored.push((ra, rb, 1000 + i as u64));
        }
        assert_eq!(cache.records(), 10);
        assert!(cache.used() < 10 * cache.record_length());

        let mut seen = 0;
        cache
            .for_each_record(|rows, ids| {
                let (ra, rb, id) = &stored[seen];
                assert_eq!(&rows[0], ra);
                assert_eq!(&rows[1], rb);
                assert_eq!(ids[0], *id);
                seen += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, 10);
    }

    #[test]
    fn reports_full_before_overflow_and_resets() {
        let dir = tempdir().unwrap();
        let layout = outer();
        let mut cache = JoinCache::new(vec![JoinTable::new(&layout)], &options(&dir, 8192)).unwrap();
        let row = outer_row(&layout, 1, Some("abcdefgh"), &"x".repeat(20));

        let mut stored = 0;
        loop {
            stored += 1;
            if cache.store_record_in_cache(&[(row.as_slice(), 0)]).unwrap() {
                break;
            }
        }
        assert_eq!(stored, 8192 / cache.record_length());
        assert!(cache.store_record_in_cache(&[(row.as_slice(), 0)]).is_err());

        cache.reset_cache_write();
        assert!(cache.is_empty());
        assert!(!cache.store_record_in_cache(&[(row.as_slice(), 0)]).unwrap());
    }

    #[test]
    fn read_cursor_rewinds() {
        let dir = tempdir().unwrap();
        let layout = outer();
        let mut cache = JoinCache::new(vec![JoinTable::new(&layout)], &options(&dir, 8192)).unwrap();
        for i in 0..3 {
            let row = outer_row(&layout, i, None, "v");
            cache.store_record_in_cache(&[(row.as_slice(), 0)]).unwrap();
        }
        let mut rows = vec![layout.new_row()];
        let mut ids = [0u64];
        let mut first_pass = 0;
        while cache.read_cached_record(&mut rows, &mut ids).unwrap() {
            first_pass += 1;
        }
        assert_eq!(first_pass, 3);
        assert_eq!(layout.field(0, &rows[0]).val_int(), 2);

        cache.reset_cache_read();
        assert!(cache.read_cached_record(&mut rows, &mut ids).unwrap());
        assert_eq!(layout.field(0, &rows[0]).val_int(), 0);
        assert!(layout.field(1, &rows[0]).is_null());
    }

    #[test]
    fn buffer_grows_to_hold_one_record() {
        let dir = tempdir().unwrap();
        let wide = RowLayout::builder()
            .column("blob", FieldType::varchar(9000))
            .build()
            .unwrap();
        let cache = JoinCache::new(vec![JoinTable::new(&wide)], &options(&dir, 8192)).unwrap();
        assert_eq!(cache.buffer_size(), cache.record_length());
        assert_eq!(cache.record_length(), 2 + 2 + 9000);
    }
}
