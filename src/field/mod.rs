//! # Typed Field Codec
//!
//! Maps typed SQL values to the binary images stored in row buffers, and
//! defines the total order of each type.
//!
//! ## Types
//!
//! | Type              | Pack length        | Image                                  |
//! |-------------------|--------------------|----------------------------------------|
//! | Boolean           | 1                  | 0 / 1                                  |
//! | Int32 / Int64     | 4 / 8              | big-endian, sign bit flipped           |
//! | Double            | 8                  | IEEE bits, order-preserving transform  |
//! | Decimal(p,s)      | `bin_size(p,s)`    | grouped base-10^9, see `decimal`       |
//! | Epoch             | 8                  | big-endian seconds since 1970          |
//! | Microtime         | 12                 | seconds (8) + microseconds (4)         |
//! | Time              | 4                  | signed seconds, sign bit flipped       |
//! | Date              | 4                  | big-endian `YYYYMMDD`                  |
//! | DateTime          | 8                  | big-endian `YYYYMMDDHHMMSS`            |
//! | Ipv6 / Uuid       | 16                 | network order bytes                    |
//! | Varchar(n)        | 1 or 2 + n         | little-endian length prefix + bytes    |
//! | Char(n)           | n                  | space padded                           |
//!
//! Every fixed-width image is stored in comparison order, so comparing two
//! images is a `memcmp` and the sort key is a plain copy. String types
//! compare through their [`Collation`] and produce collation weights as
//! sort keys.
//!
//! ## Views
//!
//! A [`Field`] never owns storage. It pairs a [`FieldDef`] (name, type,
//! offset, null bit) with a borrowed row buffer:
//!
//! ```ignore
//! let layout = RowLayout::builder()
//!     .column("id", FieldType::Int64)
//!     .nullable("name", FieldType::varchar(32))
//!     .build()?;
//! let mut row = layout.new_row();
//! layout.field_mut(0, &mut row).store_int(42)?;
//! assert_eq!(layout.field(0, &row).val_int(), 42);
//! ```
//!
//! Write methods are only available when the view holds a mutable buffer.
//!
//! ## Conditions
//!
//! Stores always leave a defined value in the row: the parsed value, or a
//! truncated, clamped or zero substitute. The condition is returned as a
//! [`SqlError`] naming the field; [`RowLayout`]'s store helpers route it
//! through [`Diagnostics`](crate::error::Diagnostics).

mod inet;
mod numeric;
mod row;
mod string;
mod temporal;

use std::cmp::Ordering;

use crate::decimal::{bin_size, Decimal};
use crate::error::{SqlError, SqlResult};

pub use row::{RowLayout, RowLayoutBuilder};

use crate::config::VARCHAR_SHORT_PREFIX_MAX;

/// String comparison rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Collation {
    /// Byte order; VARCHAR keeps trailing spaces significant.
    #[default]
    Binary,
    /// Simple case folding with PAD SPACE semantics.
    CaseInsensitive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Boolean { ansi_display: bool },
    Int32,
    Int64,
    Double,
    Decimal { precision: u8, scale: u8 },
    Epoch,
    Microtime,
    Time,
    Date,
    DateTime,
    Ipv6,
    Uuid,
    Varchar { max_length: u16, collation: Collation },
    Char { length: u16, collation: Collation },
}

/// Scalar input accepted by every store path.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Real(f64),
    Decimal(Decimal),
    Str(String),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{}", v),
            Value::Decimal(v) => write!(f, "{}", v),
            Value::Str(v) => f.write_str(v),
        }
    }
}

/// Outcome of encoding one value into an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    Ok,
    /// Precision or length was lost; a shortened value was stored.
    Truncated,
    /// The value was clamped to the type's range.
    OutOfRange,
    /// The input could not be read as the type; a default was stored (or,
    /// for IPv6/UUID, nothing was written).
    Invalid,
}

enum Family {
    Numeric,
    Temporal,
    Inet,
    Text,
}

impl FieldType {
    pub fn boolean() -> Self {
        FieldType::Boolean {
            ansi_display: false,
        }
    }

    pub fn decimal(precision: u8, scale: u8) -> Self {
        FieldType::Decimal { precision, scale }
    }

    pub fn varchar(max_length: u16) -> Self {
        FieldType::Varchar {
            max_length,
            collation: Collation::Binary,
        }
    }

    pub fn char(length: u16) -> Self {
        FieldType::Char {
            length,
            collation: Collation::Binary,
        }
    }

    /// Replaces the collation of a string type; other types are unchanged.
    pub fn with_collation(self, collation: Collation) -> Self {
        match self {
            FieldType::Varchar { max_length, .. } => FieldType::Varchar {
                max_length,
                collation,
            },
            FieldType::Char { length, .. } => FieldType::Char { length, collation },
            other => other,
        }
    }

    fn family(&self) -> Family {
        match self {
            FieldType::Boolean { .. }
            | FieldType::Int32
            | FieldType::Int64
            | FieldType::Double
            | FieldType::Decimal { .. } => Family::Numeric,
            FieldType::Epoch
            | FieldType::Microtime
            | FieldType::Time
            | FieldType::Date
            | FieldType::DateTime => Family::Temporal,
            FieldType::Ipv6 | FieldType::Uuid => Family::Inet,
            FieldType::Varchar { .. } | FieldType::Char { .. } => Family::Text,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldType::Boolean { .. } => "BOOLEAN",
            FieldType::Int32 => "INT",
            FieldType::Int64 => "BIGINT",
            FieldType::Double => "DOUBLE",
            FieldType::Decimal { .. } => "DECIMAL",
            FieldType::Epoch => "TIMESTAMP",
            FieldType::Microtime => "TIMESTAMP(6)",
            FieldType::Time => "TIME",
            FieldType::Date => "DATE",
            FieldType::DateTime => "DATETIME",
            FieldType::Ipv6 => "IPV6",
            FieldType::Uuid => "UUID",
            FieldType::Varchar { .. } => "VARCHAR",
            FieldType::Char { .. } => "CHAR",
        }
    }

    /// Bytes the image occupies in a row.
    pub fn pack_length(&self) -> usize {
        match self {
            FieldType::Boolean { .. } => 1,
            FieldType::Int32 => 4,
            FieldType::Int64 | FieldType::Double => 8,
            FieldType::Decimal { precision, scale } => bin_size(*precision, *scale),
            FieldType::Epoch => 8,
            FieldType::Microtime => 12,
            FieldType::Time | FieldType::Date => 4,
            FieldType::DateTime => 8,
            FieldType::Ipv6 | FieldType::Uuid => 16,
            FieldType::Varchar { max_length, .. } => {
                self.length_prefix_bytes() + *max_length as usize
            }
            FieldType::Char { length, .. } => *length as usize,
        }
    }

    /// Bytes of an index key image; VARCHAR keys always use a 2-byte length.
    pub fn key_length(&self) -> usize {
        match self {
            FieldType::Varchar { max_length, .. } => *max_length as usize + 2,
            _ => self.pack_length(),
        }
    }

    pub fn max_display_length(&self) -> usize {
        match self {
            FieldType::Boolean { .. } => 5,
            FieldType::Int32 => 11,
            FieldType::Int64 => 20,
            FieldType::Double => 22,
            FieldType::Decimal { precision, scale } => {
                *precision as usize + 1 + usize::from(*scale > 0)
            }
            FieldType::Epoch | FieldType::DateTime => 19,
            FieldType::Microtime => 26,
            FieldType::Time => 10,
            FieldType::Date => 10,
            FieldType::Ipv6 => 39,
            FieldType::Uuid => 36,
            FieldType::Varchar { max_length, .. } => *max_length as usize,
            FieldType::Char { length, .. } => *length as usize,
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self.family(), Family::Text)
    }

    pub fn collation(&self) -> Option<Collation> {
        match self {
            FieldType::Varchar { collation, .. } | FieldType::Char { collation, .. } => {
                Some(*collation)
            }
            _ => None,
        }
    }

    /// True when `cmp_images` is a plain byte comparison.
    pub fn is_memcmp_ordered(&self) -> bool {
        !self.is_string()
    }

    pub(crate) fn length_prefix_bytes(&self) -> usize {
        match self {
            FieldType::Varchar { max_length, .. }
                if *max_length as usize <= VARCHAR_SHORT_PREFIX_MAX =>
            {
                1
            }
            FieldType::Varchar { .. } => 2,
            _ => 0,
        }
    }

    /// Bytes produced by `sort_string`. String keys are limited to
    /// `max_sort_length` characters.
    pub fn sort_length(&self, max_sort_length: usize) -> usize {
        match self {
            FieldType::Varchar { .. } | FieldType::Char { .. } => {
                string::sort_length(self, max_sort_length)
            }
            _ => self.pack_length(),
        }
    }

    // ========================================================================
    // Image codec
    // ========================================================================

    pub(crate) fn store_value(&self, image: &mut [u8], value: &Value) -> Status {
        match value {
            Value::Null => Status::Ok,
            Value::Int(v) => self.store_int(image, *v),
            Value::Real(v) => self.store_real(image, *v),
            Value::Decimal(v) => self.store_decimal(image, v),
            Value::Str(v) => self.store_str(image, v),
        }
    }

    pub(crate) fn store_str(&self, image: &mut [u8], text: &str) -> Status {
        match self.family() {
            Family::Numeric => numeric::store_str(self, image, text),
            Family::Temporal => temporal::store_str(self, image, text),
            Family::Inet => inet::store_str(self, image, text),
            Family::Text => string::store_str(self, image, text),
        }
    }

    pub(crate) fn store_int(&self, image: &mut [u8], v: i64) -> Status {
        match self.family() {
            Family::Numeric => numeric::store_int(self, image, v),
            Family::Temporal => temporal::store_int(self, image, v),
            Family::Inet => Status::Invalid,
            Family::Text => string::store_str(self, image, &v.to_string()),
        }
    }

    pub(crate) fn store_real(&self, image: &mut [u8], v: f64) -> Status {
        match self.family() {
            Family::Numeric => numeric::store_real(self, image, v),
            Family::Temporal => temporal::store_real(self, image, v),
            Family::Inet => Status::Invalid,
            Family::Text => string::store_str(self, image, &v.to_string()),
        }
    }

    pub(crate) fn store_decimal(&self, image: &mut [u8], v: &Decimal) -> Status {
        match self.family() {
            Family::Numeric => numeric::store_decimal(self, image, v),
            Family::Temporal => temporal::store_decimal(self, image, v),
            Family::Inet => Status::Invalid,
            Family::Text => string::store_str(self, image, &v.to_string()),
        }
    }

    pub fn val_int(&self, image: &[u8]) -> i64 {
        match self.family() {
            Family::Numeric => numeric::val_int(self, image),
            Family::Temporal => temporal::val_int(self, image),
            Family::Inet => 0,
            Family::Text => string::val_int(self, image),
        }
    }

    pub fn val_real(&self, image: &[u8]) -> f64 {
        match self.family() {
            Family::Numeric => numeric::val_real(self, image),
            Family::Temporal => temporal::val_int(self, image) as f64,
            Family::Inet => 0.0,
            Family::Text => string::val_real(self, image),
        }
    }

    pub fn val_str(&self, image: &[u8]) -> String {
        match self.family() {
            Family::Numeric => numeric::val_str(self, image),
            Family::Temporal => temporal::val_str(self, image),
            Family::Inet => inet::val_str(self, image),
            Family::Text => string::val_str(self, image),
        }
    }

    pub fn val_decimal(&self, image: &[u8]) -> Decimal {
        match self.family() {
            Family::Numeric => numeric::val_decimal(self, image),
            Family::Temporal => temporal::val_decimal(self, image),
            Family::Inet => Decimal::zero(),
            Family::Text => string::val_decimal(self, image),
        }
    }

    /// Seconds since 1970-01-01 UTC for temporal types; `None` for other
    /// types and for zero dates.
    pub fn get_timestamp(&self, image: &[u8]) -> Option<i64> {
        match self.family() {
            Family::Temporal => temporal::get_timestamp(self, image),
            _ => None,
        }
    }

    /// Orders two images of this type.
    pub fn cmp_images(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self.family() {
            Family::Text => string::cmp(self, a, b),
            _ => {
                let len = self.pack_length();
                a[..len].cmp(&b[..len])
            }
        }
    }

    /// Writes the memcmp-comparable key of an image into `dest`, whose
    /// length is the key budget for this field.
    pub fn sort_string(&self, image: &[u8], dest: &mut [u8]) {
        match self.family() {
            Family::Text => string::sort_string(self, image, dest),
            _ => {
                let len = self.pack_length().min(dest.len());
                dest[..len].copy_from_slice(&image[..len]);
                dest[len..].fill(0);
            }
        }
    }

    /// Bytes of the image that carry data. Fixed types use the full pack
    /// length; VARCHAR uses its prefix plus the stored bytes.
    pub fn data_length(&self, image: &[u8]) -> usize {
        match self {
            FieldType::Varchar { .. } => self.length_prefix_bytes() + string::stored_len(self, image),
            _ => self.pack_length(),
        }
    }
}

/// Location of a column's null flag in the row's null bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NullBit {
    pub byte: usize,
    pub mask: u8,
}

/// One column's physical description within a row.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub offset: usize,
    pub null: Option<NullBit>,
}

impl FieldDef {
    pub fn nullable(&self) -> bool {
        self.null.is_some()
    }

    pub fn pack_length(&self) -> usize {
        self.field_type.pack_length()
    }

    /// The column's image within `row`.
    pub fn image<'r>(&self, row: &'r [u8]) -> &'r [u8] {
        &row[self.offset..self.offset + self.pack_length()]
    }

    pub fn is_null_in(&self, row: &[u8]) -> bool {
        match self.null {
            Some(bit) => row[bit.byte] & bit.mask != 0,
            None => false,
        }
    }

    fn report(&self, status: Status, input: &dyn std::fmt::Display) -> SqlResult<()> {
        match status {
            Status::Ok => Ok(()),
            Status::Truncated => Err(SqlError::truncated(&self.name)),
            Status::OutOfRange => Err(SqlError::out_of_range(&self.name)),
            Status::Invalid => Err(SqlError::invalid_value(
                self.field_type.type_name(),
                &self.name,
                input.to_string(),
            )),
        }
    }
}

/// A typed view of one column in a borrowed row buffer.
#[derive(Debug)]
pub struct Field<'d, B> {
    def: &'d FieldDef,
    row: B,
}

impl<'d, B: AsRef<[u8]>> Field<'d, B> {
    pub fn new(def: &'d FieldDef, row: B) -> Self {
        Self { def, row }
    }

    pub fn def(&self) -> &'d FieldDef {
        self.def
    }

    pub fn name(&self) -> &'d str {
        &self.def.name
    }

    pub fn field_type(&self) -> FieldType {
        self.def.field_type
    }

    pub fn pack_length(&self) -> usize {
        self.def.pack_length()
    }

    pub fn key_length(&self) -> usize {
        self.def.field_type.key_length()
    }

    pub fn max_display_length(&self) -> usize {
        self.def.field_type.max_display_length()
    }

    pub fn image(&self) -> &[u8] {
        self.def.image(self.row.as_ref())
    }

    pub fn is_null(&self) -> bool {
        self.def.is_null_in(self.row.as_ref())
    }

    pub fn val_int(&self) -> i64 {
        self.def.field_type.val_int(self.image())
    }

    pub fn val_real(&self) -> f64 {
        self.def.field_type.val_real(self.image())
    }

    pub fn val_str(&self) -> String {
        self.def.field_type.val_str(self.image())
    }

    pub fn val_decimal(&self) -> Decimal {
        self.def.field_type.val_decimal(self.image())
    }

    pub fn get_timestamp(&self) -> Option<i64> {
        self.def.field_type.get_timestamp(self.image())
    }

    /// Compares the stored values of two views over the same column
    /// definition. NULL is not considered.
    pub fn cmp<C: AsRef<[u8]>>(&self, other: &Field<'_, C>) -> Ordering {
        self.def.field_type.cmp_images(self.image(), other.image())
    }

    pub fn sort_string(&self, dest: &mut [u8]) {
        self.def.field_type.sort_string(self.image(), dest)
    }
}

impl<'d, B: AsRef<[u8]> + AsMut<[u8]>> Field<'d, B> {
    fn image_mut(&mut self) -> &mut [u8] {
        let (offset, len) = (self.def.offset, self.def.pack_length());
        &mut self.row.as_mut()[offset..offset + len]
    }

    pub fn set_null(&mut self) {
        if let Some(bit) = self.def.null {
            self.row.as_mut()[bit.byte] |= bit.mask;
        }
    }

    pub fn set_not_null(&mut self) {
        if let Some(bit) = self.def.null {
            self.row.as_mut()[bit.byte] &= !bit.mask;
        }
    }

    pub fn store_str(&mut self, text: &str) -> SqlResult<()> {
        self.set_not_null();
        let ft = self.def.field_type;
        let status = ft.store_str(self.image_mut(), text);
        self.def.report(status, &text)
    }

    pub fn store_int(&mut self, v: i64) -> SqlResult<()> {
        self.set_not_null();
        let ft = self.def.field_type;
        let status = ft.store_int(self.image_mut(), v);
        self.def.report(status, &v)
    }

    pub fn store_real(&mut self, v: f64) -> SqlResult<()> {
        self.set_not_null();
        let ft = self.def.field_type;
        let status = ft.store_real(self.image_mut(), v);
        self.def.report(status, &v)
    }

    pub fn store_decimal(&mut self, v: &Decimal) -> SqlResult<()> {
        self.set_not_null();
        let ft = self.def.field_type;
        let status = ft.store_decimal(self.image_mut(), v);
        self.def.report(status, v)
    }

    /// Stores any scalar. NULL into a NOT NULL column stores the type's
    /// zero value and reports `InvalidValueForType`.
    pub fn store(&mut self, value: &Value) -> SqlResult<()> {
        match value {
            Value::Null if self.def.nullable() => {
                self.set_null();
                Ok(())
            }
            Value::Null => {
                self.image_mut().fill(0);
                self.def.report(Status::Invalid, value)
            }
            Value::Int(v) => self.store_int(*v),
            Value::Real(v) => self.store_real(*v),
            Value::Decimal(v) => self.store_decimal(v),
            Value::Str(v) => self.store_str(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standalone(field_type: FieldType) -> (FieldDef, Vec<u8>) {
        let def = FieldDef {
            name: "c".to_string(),
            field_type,
            offset: 0,
            null: None,
        };
        let row = vec![0u8; field_type.pack_length()];
        (def, row)
    }

    #[test]
    fn pack_lengths_are_fixed_per_type() {
        assert_eq!(FieldType::boolean().pack_length(), 1);
        assert_eq!(FieldType::decimal(14, 4).pack_length(), 7);
        assert_eq!(FieldType::decimal(2, 5).pack_length(), 3);
        assert_eq!(FieldType::Microtime.pack_length(), 12);
        assert_eq!(FieldType::varchar(10).pack_length(), 11);
        assert_eq!(FieldType::varchar(300).pack_length(), 302);
        assert_eq!(FieldType::varchar(10).key_length(), 12);
    }

    #[test]
    fn boolean_text_forms_round_trip() {
        let (def, mut row) = standalone(FieldType::boolean());
        for (text, expected) in [
            ("yes", 1),
            ("Y", 1),
            ("t", 1),
            ("TRUE", 1),
            ("no", 0),
            ("N", 0),
            ("f", 0),
            ("FALSE", 0),
        ] {
            Field::new(&def, &mut row[..]).store_str(text).unwrap();
            assert_eq!(Field::new(&def, &row[..]).val_int(), expected, "{}", text);
        }
        Field::new(&def, &mut row[..]).store_str("FALSE").unwrap();
        assert_eq!(Field::new(&def, &row[..]).val_str(), "FALSE");
    }

    #[test]
    fn boolean_ansi_display() {
        let (def, mut row) = standalone(FieldType::Boolean { ansi_display: true });
        Field::new(&def, &mut row[..]).store_int(7).unwrap();
        assert_eq!(Field::new(&def, &row[..]).val_str(), "YES");
    }

    #[test]
    fn invalid_boolean_stores_false_and_reports() {
        let (def, mut row) = standalone(FieldType::boolean());
        row[0] = 1;
        let err = Field::new(&def, &mut row[..]).store_str("maybe").unwrap_err();
        assert_eq!(err, SqlError::invalid_value("BOOLEAN", "c", "maybe"));
        assert_eq!(Field::new(&def, &row[..]).val_int(), 0);
    }

    #[test]
    fn null_into_not_null_column_reports() {
        let (def, mut row) = standalone(FieldType::Int32);
        let err = Field::new(&def, &mut row[..]).store(&Value::Null).unwrap_err();
        assert!(matches!(err, SqlError::InvalidValueForType { .. }));
        assert_eq!(Field::new(&def, &row[..]).val_int(), 0);
    }

    #[test]
    fn views_compare_through_their_type() {
        let (def, mut a) = standalone(FieldType::Int64);
        let mut b = a.clone();
        Field::new(&def, &mut a[..]).store_int(-5).unwrap();
        Field::new(&def, &mut b[..]).store_int(3).unwrap();
        let fa = Field::new(&def, &a[..]);
        let fb = Field::new(&def, &b[..]);
        assert_eq!(fa.cmp(&fb), Ordering::Less);
        assert_eq!(fb.cmp(&fa), Ordering::Greater);
    }
}
