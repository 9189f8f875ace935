//! # Row Layout
//!
//! Fixed-width row format shared by the codec, the sort engine and the join
//! cache:
//!
//! ```text
//! +-------------------+----------+----------+-----+
//! | null bitmap       | column 0 | column 1 | ... |
//! | ceil(nullable/8)  | pack_len | pack_len |     |
//! +-------------------+----------+----------+-----+
//! ```
//!
//! Only nullable columns get a bit. A set bit means NULL.

use eyre::{ensure, Result};

use super::{Field, FieldDef, FieldType, NullBit, Value};
use crate::config::{DECIMAL_MAX_PRECISION, DECIMAL_MAX_SCALE, MAX_KEY_PARTS, MAX_ROW_LENGTH};
use crate::decimal::Decimal;
use crate::error::{Diagnostics, SqlResult};

#[derive(Debug, Clone)]
pub struct RowLayout {
    fields: Vec<FieldDef>,
    null_bytes: usize,
    row_length: usize,
}

#[derive(Debug, Default)]
pub struct RowLayoutBuilder {
    columns: Vec<(String, FieldType, bool)>,
}

impl RowLayoutBuilder {
    pub fn column(mut self, name: &str, field_type: FieldType) -> Self {
        self.columns.push((name.to_string(), field_type, false));
        self
    }

    pub fn nullable(mut self, name: &str, field_type: FieldType) -> Self {
        self.columns.push((name.to_string(), field_type, true));
        self
    }

    pub fn build(self) -> Result<RowLayout> {
        ensure!(!self.columns.is_empty(), "row layout needs at least one column");

        for (i, (name, field_type, _)) in self.columns.iter().enumerate() {
            ensure!(
                !self.columns[..i].iter().any(|(other, _, _)| other == name),
                "duplicate column name '{}'",
                name
            );
            if let FieldType::Decimal { precision, scale } = field_type {
                ensure!(
                    *precision >= 1
                        && *precision <= DECIMAL_MAX_PRECISION
                        && scale <= precision
                        && *scale <= DECIMAL_MAX_SCALE,
                    "invalid DECIMAL({}, {}) for column '{}'",
                    precision,
                    scale,
                    name
                );
            }
        }

        let nullable_count = self.columns.iter().filter(|c| c.2).count();
        let null_bytes = nullable_count.div_ceil(8);

        let mut fields = Vec::with_capacity(self.columns.len());
        let mut offset = null_bytes;
        let mut null_index = 0;
        for (name, field_type, nullable) in self.columns {
            let null = nullable.then(|| {
                let bit = NullBit {
                    byte: null_index / 8,
                    mask: 1 << (null_index % 8),
                };
                null_index += 1;
                bit
            });
            fields.push(FieldDef {
                name,
                field_type,
                offset,
                null,
            });
            offset += field_type.pack_length();
        }
        ensure!(
            offset <= MAX_ROW_LENGTH,
            "row length {} exceeds {} bytes",
            offset,
            MAX_ROW_LENGTH
        );

        Ok(RowLayout {
            fields,
            null_bytes,
            row_length: offset,
        })
    }
}

impl RowLayout {
    pub fn builder() -> RowLayoutBuilder {
        RowLayoutBuilder::default()
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field_def(&self, idx: usize) -> &FieldDef {
        &self.fields[idx]
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn null_bytes(&self) -> usize {
        self.null_bytes
    }

    pub fn row_length(&self) -> usize {
        self.row_length
    }

    /// A zeroed row with every nullable column set to NULL.
    pub fn new_row(&self) -> Vec<u8> {
        let mut row = vec![0u8; self.row_length];
        for bit in self.fields.iter().filter_map(|f| f.null) {
            row[bit.byte] |= bit.mask;
        }
        row
    }

    pub fn field<'r>(&self, idx: usize, row: &'r [u8]) -> Field<'_, &'r [u8]> {
        Field::new(&self.fields[idx], row)
    }

    pub fn field_mut<'r>(&self, idx: usize, row: &'r mut [u8]) -> Field<'_, &'r mut [u8]> {
        Field::new(&self.fields[idx], row)
    }

    /// Validates a key definition against this layout.
    pub fn check_key(&self, columns: &[usize]) -> Result<()> {
        ensure!(!columns.is_empty(), "key needs at least one column");
        ensure!(
            columns.len() <= MAX_KEY_PARTS,
            "key has {} parts, limit is {}",
            columns.len(),
            MAX_KEY_PARTS
        );
        for col in columns {
            ensure!(*col < self.fields.len(), "key column {} out of range", col);
        }
        Ok(())
    }

    // ========================================================================
    // Statement-level stores
    // ========================================================================

    pub fn store(
        &self,
        row: &mut [u8],
        idx: usize,
        value: &Value,
        diag: &mut Diagnostics,
    ) -> SqlResult<()> {
        let outcome = self.field_mut(idx, row).store(value);
        diag.check(outcome)
    }

    pub fn store_str(
        &self,
        row: &mut [u8],
        idx: usize,
        text: &str,
        diag: &mut Diagnostics,
    ) -> SqlResult<()> {
        let outcome = self.field_mut(idx, row).store_str(text);
        diag.check(outcome)
    }

    pub fn store_int(
        &self,
        row: &mut [u8],
        idx: usize,
        v: i64,
        diag: &mut Diagnostics,
    ) -> SqlResult<()> {
        let outcome = self.field_mut(idx, row).store_int(v);
        diag.check(outcome)
    }

    pub fn store_decimal(
        &self,
        row: &mut [u8],
        idx: usize,
        v: &Decimal,
        diag: &mut Diagnostics,
    ) -> SqlResult<()> {
        let outcome = self.field_mut(idx, row).store_decimal(v);
        diag.check(outcome)
    }

    /// Stores one value per column, stopping at the first escalated
    /// condition.
    pub fn fill_row(
        &self,
        row: &mut [u8],
        values: &[Value],
        diag: &mut Diagnostics,
    ) -> SqlResult<()> {
        for (idx, value) in values.iter().enumerate().take(self.fields.len()) {
            self.store(row, idx, value, diag)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SqlError;

    fn layout() -> RowLayout {
        RowLayout::builder()
            .column("id", FieldType::Int32)
            .nullable("name", FieldType::varchar(10))
            .nullable("price", FieldType::decimal(6, 2))
            .column("flag", FieldType::boolean())
            .build()
            .unwrap()
    }

    #[test]
    fn offsets_follow_null_bitmap() {
        let layout = layout();
        assert_eq!(layout.null_bytes(), 1);
        assert_eq!(layout.field_def(0).offset, 1);
        assert_eq!(layout.field_def(1).offset, 5);
        assert_eq!(layout.field_def(2).offset, 16);
        assert_eq!(layout.row_length(), 16 + 3 + 1);
        assert_eq!(layout.field_def(2).null, Some(NullBit { byte: 0, mask: 2 }));
        assert_eq!(layout.field_index("flag"), Some(3));
    }

    #[test]
    fn new_row_marks_nullable_columns_null() {
        let layout = layout();
        let row = layout.new_row();
        assert!(!layout.field(0, &row).is_null());
        assert!(layout.field(1, &row).is_null());
        assert!(layout.field(2, &row).is_null());
    }

    #[test]
    fn store_clears_null_flag() {
        let layout = layout();
        let mut row = layout.new_row();
        let mut diag = Diagnostics::new(true);
        layout.store_str(&mut row, 1, "widget", &mut diag).unwrap();
        assert!(!layout.field(1, &row).is_null());
        assert_eq!(layout.field(1, &row).val_str(), "widget");

        layout.store(&mut row, 1, &Value::Null, &mut diag).unwrap();
        assert!(layout.field(1, &row).is_null());
    }

    #[test]
    fn non_strict_store_keeps_substitute_and_warns() {
        let layout = layout();
        let mut row = layout.new_row();
        let mut diag = Diagnostics::new(false);
        layout
            .store_str(&mut row, 2, "123456.789", &mut diag)
            .unwrap();
        assert_eq!(layout.field(2, &row).val_str(), "9999.99");
        assert_eq!(diag.warning_count(), 1);
        assert_eq!(diag.warnings()[0].condition, SqlError::out_of_range("price"));
    }

    #[test]
    fn strict_store_escalates() {
        let layout = layout();
        let mut row = layout.new_row();
        let mut diag = Diagnostics::new(true);
        let err = layout
            .store_str(&mut row, 3, "perhaps", &mut diag)
            .unwrap_err();
        assert_eq!(err, SqlError::invalid_value("BOOLEAN", "flag", "perhaps"));
    }

    #[test]
    fn fill_row_stores_each_column() {
        let layout = layout();
        let mut row = layout.new_row();
        let mut diag = Diagnostics::new(true);
        let values = [
            Value::Int(7),
            Value::from("bolt"),
            Value::Decimal("3.50".parse().unwrap()),
            Value::from("yes"),
        ];
        layout.fill_row(&mut row, &values, &mut diag).unwrap();
        assert_eq!(layout.field(0, &row).val_int(), 7);
        assert_eq!(layout.field(2, &row).val_str(), "3.50");
        assert_eq!(layout.field(3, &row).val_int(), 1);
    }

    #[test]
    fn builder_rejects_duplicates_and_bad_decimals() {
        assert!(RowLayout::builder()
            .column("a", FieldType::Int32)
            .column("a", FieldType::Int64)
            .build()
            .is_err());
        assert!(RowLayout::builder()
            .column("d", FieldType::decimal(70, 2))
            .build()
            .is_err());
        assert!(RowLayout::builder().build().is_err());
    }
}
