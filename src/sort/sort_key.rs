//! # Sort Keys and Addon Fields
//!
//! A sort record is a memcmp-comparable key followed by a payload:
//!
//! ```text
//! +---------------------------------------+-------------------------------+
//! | key part 0 | key part 1 | ...         | payload                       |
//! | [null][sort_string]                   | addon fields  or  row ref (8) |
//! +---------------------------------------+-------------------------------+
//!  <------------- sort_length ----------->
//!  <------------------------- rec_length -------------------------------->
//! ```
//!
//! Each key part is the column's `sort_string`, prefixed by a null flag byte
//! (0 for NULL, 1 otherwise) when the column is nullable. A descending part
//! has all of its bytes inverted, so NULL sorts first ascending and last
//! descending.
//!
//! Addon fields carry the row's column images in the payload so the sorted
//! output can be consumed without going back to the base rows:
//!
//! ```text
//! addon payload: [addon null bitmap][image col a][image col b]...
//! ```

use eyre::{ensure, Result};

use crate::field::{FieldDef, NullBit, RowLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortField {
    pub column: usize,
    pub descending: bool,
}

impl SortField {
    pub fn asc(column: usize) -> Self {
        Self {
            column,
            descending: false,
        }
    }

    pub fn desc(column: usize) -> Self {
        Self {
            column,
            descending: true,
        }
    }
}

#[derive(Debug, Clone)]
struct KeyPart {
    field: FieldDef,
    descending: bool,
    length: usize,
}

impl KeyPart {
    fn stored_length(&self) -> usize {
        self.length + usize::from(self.field.nullable())
    }
}

/// Encoder for the key half of a sort record.
#[derive(Debug, Clone)]
pub struct SortKey {
    parts: Vec<KeyPart>,
    sort_length: usize,
}

impl SortKey {
    pub fn new(layout: &RowLayout, fields: &[SortField], max_sort_length: usize) -> Result<Self> {
        ensure!(!fields.is_empty(), "sort needs at least one field");
        let mut parts = Vec::with_capacity(fields.len());
        for f in fields {
            ensure!(
                f.column < layout.field_count(),
                "sort column {} out of range",
                f.column
            );
            let field = layout.field_def(f.column).clone();
            let length = field.field_type.sort_length(max_sort_length);
            parts.push(KeyPart {
                field,
                descending: f.descending,
                length,
            });
        }
        let sort_length = parts.iter().map(KeyPart::stored_length).sum();
        Ok(Self { parts, sort_length })
    }

    pub fn sort_length(&self) -> usize {
        self.sort_length
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Writes the key of `row` into `dest[..sort_length]`.
    pub fn make_sortkey(&self, row: &[u8], dest: &mut [u8]) {
        let mut pos = 0;
        for part in &self.parts {
            let start = pos;
            if part.field.nullable() {
                if part.field.is_null_in(row) {
                    dest[pos..pos + 1 + part.length].fill(0);
                    pos += 1 + part.length;
                    invert_if(part.descending, &mut dest[start..pos]);
                    continue;
                }
                dest[pos] = 1;
                pos += 1;
            }
            let slot = &mut dest[pos..pos + part.length];
            part.field.field_type.sort_string(part.field.image(row), slot);
            pos += part.length;
            invert_if(part.descending, &mut dest[start..pos]);
        }
    }
}

fn invert_if(descending: bool, bytes: &mut [u8]) {
    if descending {
        for b in bytes {
            *b = !*b;
        }
    }
}

// ============================================================================
// Addon fields
// ============================================================================

#[derive(Debug, Clone)]
struct AddonColumn {
    row_offset: usize,
    pack_length: usize,
    row_null: Option<NullBit>,
    addon_null: Option<NullBit>,
    offset: usize,
}

/// Column images carried in a sort record's payload.
#[derive(Debug, Clone)]
pub struct AddonFields {
    columns: Vec<AddonColumn>,
    null_bytes: usize,
    length: usize,
}

impl AddonFields {
    pub fn new(layout: &RowLayout, columns: &[usize]) -> Result<Self> {
        ensure!(!columns.is_empty(), "addon fields need at least one column");
        let nullable = columns
            .iter()
            .filter(|c| *c < &layout.field_count() && layout.field_def(**c).nullable())
            .count();
        let null_bytes = nullable.div_ceil(8);

        let mut offset = null_bytes;
        let mut null_index = 0;
        let mut out = Vec::with_capacity(columns.len());
        for column in columns {
            ensure!(
                *column < layout.field_count(),
                "addon column {} out of range",
                column
            );
            let def = layout.field_def(*column);
            let addon_null = def.null.map(|_| {
                let bit = NullBit {
                    byte: null_index / 8,
                    mask: 1 << (null_index % 8),
                };
                null_index += 1;
                bit
            });
            out.push(AddonColumn {
                row_offset: def.offset,
                pack_length: def.pack_length(),
                row_null: def.null,
                addon_null,
                offset,
            });
            offset += def.pack_length();
        }

        Ok(Self {
            columns: out,
            null_bytes,
            length: offset,
        })
    }

    /// Addon fields over every column of the layout.
    pub fn all(layout: &RowLayout) -> Result<Self> {
        let columns: Vec<usize> = (0..layout.field_count()).collect();
        Self::new(layout, &columns)
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn pack(&self, row: &[u8], dest: &mut [u8]) {
        dest[..self.null_bytes].fill(0);
        for col in &self.columns {
            let is_null = col.row_null.is_some_and(|b| row[b.byte] & b.mask != 0);
            if let (true, Some(bit)) = (is_null, col.addon_null) {
                dest[bit.byte] |= bit.mask;
            }
            dest[col.offset..col.offset + col.pack_length]
                .copy_from_slice(&row[col.row_offset..col.row_offset + col.pack_length]);
        }
    }

    /// Restores the carried columns into `row`, a buffer of the layout the
    /// fields were built from.
    pub fn unpack(&self, src: &[u8], row: &mut [u8]) {
        for col in &self.columns {
            if let (Some(row_bit), Some(addon_bit)) = (col.row_null, col.addon_null) {
                if src[addon_bit.byte] & addon_bit.mask != 0 {
                    row[row_bit.byte] |= row_bit.mask;
                } else {
                    row[row_bit.byte] &= !row_bit.mask;
                }
            }
            row[col.row_offset..col.row_offset + col.pack_length]
                .copy_from_slice(&src[col.offset..col.offset + col.pack_length]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldType, Value};

    fn layout() -> RowLayout {
        RowLayout::builder()
            .column("id", FieldType::Int32)
            .nullable("score", FieldType::Int64)
            .column("name", FieldType::varchar(12))
            .build()
            .unwrap()
    }

    fn row(layout: &RowLayout, id: i64, score: Option<i64>, name: &str) -> Vec<u8> {
        let mut row = layout.new_row();
        layout.field_mut(0, &mut row).store_int(id).unwrap();
        if let Some(s) = score {
            layout.field_mut(1, &mut row).store_int(s).unwrap();
        }
        layout.field_mut(2, &mut row).store_str(name).unwrap();
        row
    }

    fn key(sk: &SortKey, row: &[u8]) -> Vec<u8> {
        let mut dest = vec![0u8; sk.sort_length()];
        sk.make_sortkey(row, &mut dest);
        dest
    }

    #[test]
    fn sort_length_counts_null_flags() {
        let layout = layout();
        let sk = SortKey::new(&layout, &[SortField::asc(1), SortField::asc(0)], 64).unwrap();
        assert_eq!(sk.sort_length(), 1 + 8 + 4);
        assert_eq!(sk.part_count(), 2);
    }

    #[test]
    fn nulls_first_ascending_last_descending() {
        let layout = layout();
        let null_row = row(&layout, 1, None, "a");
        let low_row = row(&layout, 1, Some(i64::MIN), "a");

        let asc = SortKey::new(&layout, &[SortField::asc(1)], 64).unwrap();
        assert!(key(&asc, &null_row) < key(&asc, &low_row));

        let desc = SortKey::new(&layout, &[SortField::desc(1)], 64).unwrap();
        assert!(key(&desc, &null_row) > key(&desc, &low_row));
    }

    #[test]
    fn multi_column_keys_order_column_by_column() {
        let layout = layout();
        let sk = SortKey::new(&layout, &[SortField::asc(2), SortField::desc(0)], 64).unwrap();
        let a1 = key(&sk, &row(&layout, 1, None, "apple"));
        let a2 = key(&sk, &row(&layout, 2, None, "apple"));
        let b1 = key(&sk, &row(&layout, 1, None, "banana"));
        assert!(a2 < a1);
        assert!(a1 < b1);
    }

    #[test]
    fn addon_fields_round_trip_a_row() {
        let layout = layout();
        let addon = AddonFields::all(&layout).unwrap();
        assert_eq!(addon.length(), 1 + 4 + 8 + 13);

        let source = row(&layout, 42, None, "zed");
        let mut payload = vec![0u8; addon.length()];
        addon.pack(&source, &mut payload);

        let mut restored = layout.new_row();
        layout
            .field_mut(1, &mut restored)
            .store(&Value::Int(5))
            .unwrap();
        addon.unpack(&payload, &mut restored);
        assert_eq!(restored, source);
        assert!(layout.field(1, &restored).is_null());
        assert_eq!(layout.field(2, &restored).val_str(), "zed");
    }

    #[test]
    fn rejects_out_of_range_columns() {
        let layout = layout();
        assert!(SortKey::new(&layout, &[SortField::asc(7)], 64).is_err());
        assert!(SortKey::new(&layout, &[], 64).is_err());
        assert!(AddonFields::new(&layout, &[9]).is_err());
    }
}
