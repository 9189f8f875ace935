//! # Range Analysis
//!
//! Converts a boolean condition over one table into a [`SelTree`] that
//! restricts the table's indexes. Every leaf comparison between an indexed
//! column and a constant becomes an interval on the key part that column
//! occupies; `AND`/`OR` combine trees with [`tree_and`]/[`tree_or`].
//!
//! ## Key Images
//!
//! One key part image is the column's `sort_string` over its full length,
//! prefixed by a null flag byte when the column is nullable:
//!
//! ```text
//! nullable:      [0x00][zeros ...]        NULL
//!                [0x01][sort key ...]     value
//! not nullable:  [sort key ...]
//! ```
//!
//! NULL therefore sorts before every value, and all bounds compare with
//! `memcmp`.
//!
//! ## Constants That Do Not Fit
//!
//! A constant is stored into the column type before it becomes a bound:
//!
//! | Stored value          | `=` / `<=>`     | `<`, `<=`, `>`, `>=`      |
//! |-----------------------|-----------------|---------------------------|
//! | equals the constant   | point           | bound as written          |
//! | rounded or truncated  | no restriction  | bound made inclusive      |
//! | out of range, invalid | no restriction  | no restriction            |
//!
//! `<>` against a rounded constant is not restricted.
//!
//! Every shape the analyzer does not understand degrades to "no restriction"
//! rather than failing the statement.

use std::cmp::Ordering;

use bumpalo::Bump;
use eyre::{ensure, Result};
use tracing::debug;

use super::sel_arg::{flags, ArgId, KeyArg, SelArgArena, Span};
use super::sel_tree::{tree_and, tree_or, SelTree};
use crate::config::MAX_INDEXES;
use crate::decimal::Decimal;
use crate::error::SqlError;
use crate::field::{FieldType, RowLayout, Status, Value};

// ============================================================================
// Conditions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    /// `<=>`: equality where NULL equals NULL.
    NullSafeEq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// The operator of `NOT (a op b)`; `None` for `<=>`.
    pub fn negate(self) -> Option<CmpOp> {
        Some(match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
            CmpOp::NullSafeEq => return None,
        })
    }

    fn holds(self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq | CmpOp::NullSafeEq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        }
    }
}

/// Predicate over the columns of one row layout. Columns are referenced by
/// position.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    And(Vec<Cond>),
    Or(Vec<Cond>),
    Not(Box<Cond>),
    Cmp {
        column: usize,
        op: CmpOp,
        value: Value,
    },
    Between {
        column: usize,
        low: Value,
        high: Value,
        negated: bool,
    },
    In {
        column: usize,
        values: Vec<Value>,
        negated: bool,
    },
    IsNull {
        column: usize,
        negated: bool,
    },
    /// Comparison between two columns of the same row.
    ColumnCmp {
        left: usize,
        op: CmpOp,
        right: usize,
    },
    Const(bool),
    /// Any predicate the analyzer cannot read.
    Opaque,
}

impl Cond {
    pub fn cmp(column: usize, op: CmpOp, value: impl Into<Value>) -> Self {
        Cond::Cmp {
            column,
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: usize, value: impl Into<Value>) -> Self {
        Self::cmp(column, CmpOp::Eq, value)
    }

    pub fn lt(column: usize, value: impl Into<Value>) -> Self {
        Self::cmp(column, CmpOp::Lt, value)
    }

    pub fn gt(column: usize, value: impl Into<Value>) -> Self {
        Self::cmp(column, CmpOp::Gt, value)
    }

    pub fn between(column: usize, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Cond::Between {
            column,
            low: low.into(),
            high: high.into(),
            negated: false,
        }
    }

    pub fn is_null(column: usize) -> Self {
        Cond::IsNull {
            column,
            negated: false,
        }
    }

    pub fn and(items: Vec<Cond>) -> Self {
        Cond::And(items)
    }

    pub fn or(items: Vec<Cond>) -> Self {
        Cond::Or(items)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Cond) -> Self {
        Cond::Not(Box::new(inner))
    }

    /// Pushes one level of negation inward.
    pub fn negate(&self) -> Cond {
        match self {
            Cond::And(items) => Cond::Or(items.iter().map(Cond::negate).collect()),
            Cond::Or(items) => Cond::And(items.iter().map(Cond::negate).collect()),
            Cond::Not(inner) => (**inner).clone(),
            Cond::Cmp { column, op, value } => match (op.negate(), value) {
                (Some(op), _) => Cond::cmp(*column, op, value.clone()),
                (None, Value::Null) => Cond::IsNull {
                    column: *column,
                    negated: true,
                },
                (None, value) => Cond::Or(vec![
                    Cond::is_null(*column),
                    Cond::cmp(*column, CmpOp::Ne, value.clone()),
                ]),
            },
            Cond::Between {
                column,
                low,
                high,
                negated,
            } => Cond::Between {
                column: *column,
                low: low.clone(),
                high: high.clone(),
                negated: !negated,
            },
            Cond::In {
                column,
                values,
                negated,
            } => Cond::In {
                column: *column,
                values: values.clone(),
                negated: !negated,
            },
            Cond::IsNull { column, negated } => Cond::IsNull {
                column: *column,
                negated: !negated,
            },
            Cond::ColumnCmp { left, op, right } => match op.negate() {
                Some(op) => Cond::ColumnCmp {
                    left: *left,
                    op,
                    right: *right,
                },
                None => Cond::Opaque,
            },
            Cond::Const(b) => Cond::Const(!b),
            Cond::Opaque => Cond::Opaque,
        }
    }

    /// SQL three-valued evaluation against one row. `None` is UNKNOWN.
    pub fn evaluate(&self, layout: &RowLayout, row: &[u8]) -> Option<bool> {
        match self {
            Cond::And(items) => {
                let mut unknown = false;
                for item in items {
                    match item.evaluate(layout, row) {
                        Some(false) => return Some(false),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                (!unknown).then_some(true)
            }
            Cond::Or(items) => {
                let mut unknown = false;
                for item in items {
                    match item.evaluate(layout, row) {
                        Some(true) => return Some(true),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                (!unknown).then_some(false)
            }
            Cond::Not(inner) => inner.evaluate(layout, row).map(|b| !b),
            Cond::Cmp { column, op, value } => {
                let is_null = layout.field_def(*column).is_null_in(row);
                match (op, value, is_null) {
                    (CmpOp::NullSafeEq, Value::Null, null) => Some(null),
                    (CmpOp::NullSafeEq, _, true) => Some(false),
                    (_, Value::Null, _) | (_, _, true) => None,
                    _ => compare_column(layout, *column, row, value).map(|o| op.holds(o)),
                }
            }
            Cond::Between {
                column,
                low,
                high,
                negated,
            } => {
                let inside = Cond::And(vec![
                    Cond::cmp(*column, CmpOp::Ge, low.clone()),
                    Cond::cmp(*column, CmpOp::Le, high.clone()),
                ])
                .evaluate(layout, row);
                inside.map(|b| b != *negated)
            }
            Cond::In {
                column,
                values,
                negated,
            } => {
                let any = Cond::Or(values.iter().map(|v| Cond::eq(*column, v.clone())).collect())
                    .evaluate(layout, row);
                any.map(|b| b != *negated)
            }
            Cond::IsNull { column, negated } => {
                Some(layout.field_def(*column).is_null_in(row) != *negated)
            }
            Cond::ColumnCmp { left, op, right } => {
                let (l, r) = (layout.field_def(*left), layout.field_def(*right));
                if l.is_null_in(row) || r.is_null_in(row) {
                    return None;
                }
                if l.field_type != r.field_type {
                    return None;
                }
                Some(op.holds(l.field_type.cmp_images(l.image(row), r.image(row))))
            }
            Cond::Const(b) => Some(*b),
            Cond::Opaque => None,
        }
    }
}

/// Orders a column's stored value against a constant using the column
/// type's comparison, without losing precision on either side.
fn compare_column(layout: &RowLayout, column: usize, row: &[u8], value: &Value) -> Option<Ordering> {
    let def = layout.field_def(column);
    let ft = def.field_type;
    let image = def.image(row);
    match ft {
        FieldType::Boolean { .. } | FieldType::Int32 | FieldType::Int64 | FieldType::Decimal { .. } => {
            let constant = match value {
                Value::Int(v) => Decimal::from_i64(*v),
                Value::Real(v) => Decimal::from_f64(*v).ok()?,
                Value::Decimal(d) => d.clone(),
                Value::Str(s) => Decimal::parse(s.trim()).ok()?,
                Value::Null => return None,
            };
            Some(ft.val_decimal(image).cmp(&constant))
        }
        FieldType::Double => {
            let constant = match value {
                Value::Int(v) => *v as f64,
                Value::Real(v) => *v,
                Value::Decimal(d) => d.to_f64(),
                Value::Str(s) => s.trim().parse().ok()?,
                Value::Null => return None,
            };
            ft.val_real(image).partial_cmp(&constant)
        }
        FieldType::Varchar { .. } | FieldType::Char { .. } => {
            let text = value.to_string();
            let wide = widened(ft, text.len());
            let mut a = vec![0u8; wide.pack_length()];
            let mut b = vec![0u8; wide.pack_length()];
            wide.store_str(&mut a, &ft.val_str(image));
            wide.store_str(&mut b, &text);
            Some(wide.cmp_images(&a, &b))
        }
        _ => {
            let mut scratch = vec![0u8; ft.pack_length()];
            if ft.store_value(&mut scratch, value) != Status::Ok {
                return None;
            }
            Some(ft.cmp_images(image, &scratch))
        }
    }
}

/// A string type long enough to hold `len` bytes without truncation.
fn widened(ft: FieldType, len: usize) -> FieldType {
    let len = u16::try_from(len).unwrap_or(u16::MAX);
    match ft {
        FieldType::Varchar {
            max_length,
            collation,
        } => FieldType::Varchar {
            max_length: max_length.max(len),
            collation,
        },
        FieldType::Char { length, collation } => FieldType::Char {
            length: length.max(len),
            collation,
        },
        other => other,
    }
}

// ============================================================================
// Indexes and scan ranges
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    /// Column positions, in key part order.
    pub columns: Vec<usize>,
    pub unique: bool,
}

impl IndexDef {
    pub fn new(name: &str, columns: &[usize]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.to_vec(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// One scan interval over an index. Keys are concatenated key part images;
/// a key shorter than the full index key compares as a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
    pub flags: u8,
}

impl KeyRange {
    pub fn full() -> Self {
        Self {
            min_key: Vec::new(),
            max_key: Vec::new(),
            flags: flags::NO_MIN_RANGE | flags::NO_MAX_RANGE,
        }
    }

    pub fn is_full(&self) -> bool {
        self.flags & flags::NO_MIN_RANGE != 0 && self.flags & flags::NO_MAX_RANGE != 0
    }

    /// True when the range is a single full-length key.
    pub fn is_point(&self, key_length: usize) -> bool {
        self.flags == 0 && self.min_key == self.max_key && self.min_key.len() == key_length
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        if self.flags & flags::NO_MIN_RANGE == 0 {
            let prefix = &key[..self.min_key.len().min(key.len())];
            match prefix.cmp(&self.min_key) {
                Ordering::Less => return false,
                Ordering::Equal if self.flags & flags::NEAR_MIN != 0 => return false,
                _ => {}
            }
        }
        if self.flags & flags::NO_MAX_RANGE == 0 {
            let prefix = &key[..self.max_key.len().min(key.len())];
            match prefix.cmp(&self.max_key) {
                Ordering::Greater => return false,
                Ordering::Equal if self.flags & flags::NEAR_MAX != 0 => return false,
                _ => {}
            }
        }
        true
    }
}

// ============================================================================
// Analyzer
// ============================================================================

/// Builds range trees for one table. Key images live in `bump`; interval
/// nodes live in the analyzer's arena.
pub struct RangeAnalyzer<'a> {
    layout: &'a RowLayout,
    indexes: &'a [IndexDef],
    bump: &'a Bump,
    arena: SelArgArena<'a>,
}

impl<'a> RangeAnalyzer<'a> {
    pub fn new(layout: &'a RowLayout, indexes: &'a [IndexDef], bump: &'a Bump) -> Result<Self> {
        Self::with_arena(layout, indexes, bump, SelArgArena::new())
    }

    pub fn with_arena(
        layout: &'a RowLayout,
        indexes: &'a [IndexDef],
        bump: &'a Bump,
        arena: SelArgArena<'a>,
    ) -> Result<Self> {
        ensure!(
            indexes.len() <= MAX_INDEXES,
            "{} indexes exceed the limit of {}",
            indexes.len(),
            MAX_INDEXES
        );
        for index in indexes {
            layout.check_key(&index.columns)?;
        }
        Ok(Self {
            layout,
            indexes,
            bump,
            arena,
        })
    }

    pub fn arena(&self) -> &SelArgArena<'a> {
        &self.arena
    }

    pub fn indexes(&self) -> &[IndexDef] {
        self.indexes
    }

    pub fn analyze(&mut self, cond: &Cond) -> SelTree {
        let n = self.indexes.len();
        match cond {
            Cond::And(items) => {
                let mut tree = SelTree::always(n);
                for item in items {
                    let next = self.analyze(item);
                    tree = tree_and(&mut self.arena, tree, next);
                    if tree.is_impossible() {
                        break;
                    }
                }
                tree
            }
            Cond::Or(items) => {
                let mut tree = SelTree::impossible(n);
                for item in items {
                    let next = self.analyze(item);
                    tree = tree_or(&mut self.arena, tree, next);
                    if tree.is_always() {
                        break;
                    }
                }
                tree
            }
            Cond::Not(inner) => self.analyze(&inner.negate()),
            Cond::Cmp { column, op, value } => self.comparison(*column, *op, value),
            Cond::Between {
                column,
                low,
                high,
                negated: false,
            } => self.analyze(&Cond::And(vec![
                Cond::cmp(*column, CmpOp::Ge, low.clone()),
                Cond::cmp(*column, CmpOp::Le, high.clone()),
            ])),
            Cond::Between {
                column,
                low,
                high,
                negated: true,
            } => self.analyze(&Cond::Or(vec![
                Cond::cmp(*column, CmpOp::Lt, low.clone()),
                Cond::cmp(*column, CmpOp::Gt, high.clone()),
            ])),
            Cond::In {
                column,
                values,
                negated,
            } => {
                let op = if *negated { CmpOp::Ne } else { CmpOp::Eq };
                let leaves = values.iter().map(|v| Cond::cmp(*column, op, v.clone())).collect();
                if *negated {
                    self.analyze(&Cond::And(leaves))
                } else {
                    self.analyze(&Cond::Or(leaves))
                }
            }
            Cond::IsNull { column, negated } => self.null_test(*column, *negated),
            Cond::ColumnCmp { left, right, .. } => self.maybe_tree(&[*left, *right]),
            Cond::Const(true) => SelTree::always(n),
            Cond::Const(false) => SelTree::impossible(n),
            Cond::Opaque => {
                debug!("predicate not usable for range analysis, no restriction");
                SelTree::always(n)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Leaves
    // ------------------------------------------------------------------------

    /// `(index, key part)` for every index that contains `column`.
    fn key_parts(&self, column: usize) -> Vec<(usize, u8)> {
        self.indexes
            .iter()
            .enumerate()
            .filter_map(|(i, index)| {
                index
                    .columns
                    .iter()
                    .position(|c| *c == column)
                    .map(|part| (i, part as u8))
            })
            .collect()
    }

    fn tree_from_spans(&mut self, column: usize, spans: &[Span<'a>]) -> SelTree {
        let n = self.indexes.len();
        let parts = self.key_parts(column);
        let mut tree = SelTree::keys(n);
        for (index, part) in parts {
            tree.keys[index] = self.arena.build(part, spans);
        }
        if tree.keys.iter().all(Option::is_none) {
            return SelTree::always(n);
        }
        tree
    }

    fn comparison(&mut self, column: usize, op: CmpOp, value: &Value) -> SelTree {
        let n = self.indexes.len();
        if matches!(value, Value::Null) {
            return match op {
                CmpOp::NullSafeEq => self.null_test(column, false),
                _ => SelTree::impossible(n),
            };
        }
        if self.key_parts(column).is_empty() {
            return SelTree::always(n);
        }
        let Some((key, exact)) = self.constant_key(column, value) else {
            debug!(column, %value, "constant does not fit the column, no restriction");
            return SelTree::always(n);
        };
        if !exact && matches!(op, CmpOp::Eq | CmpOp::NullSafeEq) {
            return SelTree::always(n);
        }

        let below = self.below(column, key, exact && op != CmpOp::Le);
        let above = Span::new(
            key,
            &[],
            flags::NO_MAX_RANGE | if exact && op != CmpOp::Ge { flags::NEAR_MIN } else { 0 },
        );
        let spans: Vec<Span<'a>> = match op {
            CmpOp::Eq | CmpOp::NullSafeEq => vec![Span::point(key)],
            CmpOp::Lt | CmpOp::Le => vec![below],
            CmpOp::Gt | CmpOp::Ge => vec![above],
            CmpOp::Ne if exact => vec![below, above],
            CmpOp::Ne => return SelTree::always(n),
        };
        self.tree_from_spans(column, &spans)
    }

    /// Interval from the smallest non-NULL value up to `key`.
    fn below(&self, column: usize, key: &'a [u8], exclusive: bool) -> Span<'a> {
        let near_max = if exclusive { flags::NEAR_MAX } else { 0 };
        if self.layout.field_def(column).nullable() {
            Span::new(self.null_key(column), key, flags::NEAR_MIN | near_max)
        } else {
            Span::new(&[], key, flags::NO_MIN_RANGE | near_max)
        }
    }

    fn null_test(&mut self, column: usize, negated: bool) -> SelTree {
        let n = self.indexes.len();
        if !self.layout.field_def(column).nullable() {
            return if negated {
                SelTree::always(n)
            } else {
                SelTree::impossible(n)
            };
        }
        let null = self.null_key(column);
        let span = if negated {
            Span::new(null, &[], flags::NEAR_MIN | flags::NO_MAX_RANGE)
        } else {
            Span::point(null)
        };
        self.tree_from_spans(column, &[span])
    }

    fn maybe_tree(&mut self, columns: &[usize]) -> SelTree {
        let n = self.indexes.len();
        let mut tree = SelTree::keys(n);
        for column in columns {
            for (index, part) in self.key_parts(*column) {
                if tree.keys[index].is_none() {
                    tree.keys[index] = Some(KeyArg::Maybe { part });
                }
            }
        }
        if tree.keys.iter().all(Option::is_none) {
            return SelTree::always(n);
        }
        tree
    }

    // ------------------------------------------------------------------------
    // Key images
    // ------------------------------------------------------------------------

    fn part_length(&self, column: usize) -> usize {
        let def = self.layout.field_def(column);
        usize::from(def.nullable()) + def.field_type.sort_length(usize::MAX)
    }

    fn null_key(&self, column: usize) -> &'a [u8] {
        self.bump.alloc_slice_fill_copy(self.part_length(column), 0u8)
    }

    /// Key part image of `column` as stored in `row`.
    pub fn part_image(&self, column: usize, row: &[u8]) -> Vec<u8> {
        let def = self.layout.field_def(column);
        let mut out = vec![0u8; self.part_length(column)];
        let body = if def.nullable() {
            if def.is_null_in(row) {
                return out;
            }
            out[0] = 1;
            &mut out[1..]
        } else {
            &mut out[..]
        };
        def.field_type.sort_string(def.image(row), body);
        out
    }

    /// Image of a constant stored into `column`, and whether the stored
    /// value still equals the constant. `None` when the constant cannot bound the column.
    fn constant_key(&self, column: usize, value: &Value) -> Option<(&'a [u8], bool)> {
        let mut row = self.layout.new_row();
        match self.layout.field_mut(column, &mut row).store(value) {
            Ok(()) | Err(SqlError::Truncated { .. }) => {}
            Err(_) => return None,
        }
        let exact = compare_column(self.layout, column, &row, value) == Some(Ordering::Equal);
        let image = self.part_image(column, &row);
        Some((self.bump.alloc_slice_copy(&image), exact))
    }

    /// One key part image per column of `index`.
    pub fn key_tuple(&self, index: usize, row: &[u8]) -> Vec<Vec<u8>> {
        self.indexes[index]
            .columns
            .iter()
            .map(|c| self.part_image(*c, row))
            .collect()
    }

    /// Full index key of `row`: the concatenated key part images.
    pub fn index_key(&self, index: usize, row: &[u8]) -> Vec<u8> {
        self.key_tuple(index, row).concat()
    }

    pub fn key_length(&self, index: usize) -> usize {
        self.indexes[index]
            .columns
            .iter()
            .map(|c| self.part_length(*c))
            .sum()
    }

    /// Whether `row` may satisfy `tree`. Never false for a row that
    /// satisfies the analyzed condition.
    pub fn matches_row(&self, tree: &SelTree, row: &[u8]) -> bool {
        let owned: Vec<Vec<Vec<u8>>> = (0..self.indexes.len())
            .map(|i| self.key_tuple(i, row))
            .collect();
        let tuples: Vec<Vec<&[u8]>> = owned
            .iter()
            .map(|parts| parts.iter().map(Vec::as_slice).collect())
            .collect();
        tree.matches(&self.arena, &tuples)
    }

    // ------------------------------------------------------------------------
    // Scan ranges
    // ------------------------------------------------------------------------

    /// Flattens an index's restriction into scan ranges over full index
    /// keys. Key parts after a non-point interval are not used.
    pub fn ranges(&self, key: Option<KeyArg>) -> Vec<KeyRange> {
        match key {
            Some(KeyArg::Impossible) => Vec::new(),
            Some(KeyArg::Range(root)) if self.arena.get(root).part() == 0 => {
                let mut out = Vec::new();
                self.collect_ranges(root, &mut Vec::new(), &mut out);
                out
            }
            _ => vec![KeyRange::full()],
        }
    }

    fn collect_ranges(&self, root: ArgId, prefix: &mut Vec<u8>, out: &mut Vec<KeyRange>) {
        for arg in self.arena.iter(root) {
            if arg.is_singlepoint() {
                if let Some(KeyArg::Range(next)) = arg.next_key_part() {
                    if self.arena.get(next).part() == arg.part() + 1 {
                        let len = prefix.len();
                        prefix.extend_from_slice(arg.min_key());
                        self.collect_ranges(next, prefix, out);
                        prefix.truncate(len);
                        continue;
                    }
                }
            }

            let mut range_flags = 0;
            let mut min_key = prefix.clone();
            if arg.has_min() {
                min_key.extend_from_slice(arg.min_key());
                range_flags |= arg.flags() & flags::NEAR_MIN;
            } else if prefix.is_empty() {
                range_flags |= flags::NO_MIN_RANGE;
            }
            let mut max_key = prefix.clone();
            if arg.has_max() {
                max_key.extend_from_slice(arg.max_key());
                range_flags |= arg.flags() & flags::NEAR_MAX;
            } else if prefix.is_empty() {
                range_flags |= flags::NO_MAX_RANGE;
            }
            out.push(KeyRange {
                min_key,
                max_key,
                flags: range_flags,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Collation;
    use crate::optimizer::sel_tree::TreeKind;

    fn layout() -> RowLayout {
        RowLayout::builder()
            .column("x", FieldType::Int32)
            .nullable("y", FieldType::Int64)
            .column("name", FieldType::varchar(8))
            .nullable("label", FieldType::char(6).with_collation(Collation::CaseInsensitive))
            .build()
            .unwrap()
    }

    fn indexes() -> Vec<IndexDef> {
        vec![
            IndexDef::new("ix", &[0]),
            IndexDef::new("iy_name", &[1, 2]),
        ]
    }

    fn row(layout: &RowLayout, x: i64, y: Option<i64>, name: &str) -> Vec<u8> {
        let mut row = layout.new_row();
        layout.field_mut(0, &mut row).store_int(x).unwrap();
        if let Some(y) = y {
            layout.field_mut(1, &mut row).store_int(y).unwrap();
        }
        layout.field_mut(2, &mut row).store_str(name).unwrap();
        row
    }

    #[test]
    fn disjunction_on_one_column_gives_two_ranges() {
        let layout = layout();
        let indexes = indexes();
        let bump = Bump::new();
        let mut analyzer = RangeAnalyzer::new(&layout, &indexes, &bump).unwrap();

        let tree = analyzer.analyze(&Cond::or(vec![Cond::lt(0, 5i64), Cond::gt(0, 10i64)]));
        assert_eq!(tree.kind, TreeKind::Key);
        let ranges = analyzer.ranges(tree.keys[0]);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].flags, flags::NO_MIN_RANGE | flags::NEAR_MAX);
        assert_eq!(ranges[1].flags, flags::NEAR_MIN | flags::NO_MAX_RANGE);

        for x in [-3, 4, 5, 7, 10, 11] {
            let r = row(&layout, x, None, "");
            let key = analyzer.index_key(0, &r);
            let expected = x < 5 || x > 10;
            assert_eq!(ranges.iter().any(|kr| kr.contains(&key)), expected, "x = {}", x);
            assert_eq!(analyzer.matches_row(&tree, &r), expected, "x = {}", x);
        }
    }

    #[test]
    fn conflicting_equalities_are_impossible() {
        let layout = layout();
        let indexes = indexes();
        let bump = Bump::new();
        let mut analyzer = RangeAnalyzer::new(&layout, &indexes, &bump).unwrap();
        let tree = analyzer.analyze(&Cond::and(vec![Cond::eq(0, 5i64), Cond::eq(0, 6i64)]));
        assert!(tree.is_impossible());
    }

    #[test]
    fn unindexed_or_opaque_predicates_degrade_to_always() {
        let layout = layout();
        let indexes = indexes();
        let bump = Bump::new();
        let mut analyzer = RangeAnalyzer::new(&layout, &indexes, &bump).unwrap();
        assert!(analyzer.analyze(&Cond::Opaque).is_always());
        assert!(analyzer.analyze(&Cond::eq(3, "abc")).is_always());
        let tree = analyzer.analyze(&Cond::or(vec![Cond::eq(0, 1i64), Cond::Opaque]));
        assert!(tree.is_always());
        let tree = analyzer.analyze(&Cond::and(vec![Cond::eq(0, 1i64), Cond::Opaque]));
        assert_eq!(analyzer.arena().interval_count(tree.keys[0]), 1);
    }

    #[test]
    fn null_handling_on_nullable_key_part() {
        let layout = layout();
        let indexes = indexes();
        let bump = Bump::new();
        let mut analyzer = RangeAnalyzer::new(&layout, &indexes, &bump).unwrap();

        let lt = analyzer.analyze(&Cond::lt(1, 100i64));
        let is_null = analyzer.analyze(&Cond::is_null(1));
        let null_row = row(&layout, 1, None, "a");
        let small_row = row(&layout, 1, Some(-5), "a");
        assert!(!analyzer.matches_row(&lt, &null_row));
        assert!(analyzer.matches_row(&lt, &small_row));
        assert!(analyzer.matches_row(&is_null, &null_row));
        assert!(!analyzer.matches_row(&is_null, &small_row));

        assert!(analyzer.analyze(&Cond::eq(1, Value::Null)).is_impossible());
        assert!(analyzer.analyze(&Cond::is_null(0)).is_impossible());
        assert!(analyzer.analyze(&Cond::not(Cond::is_null(0))).is_always());
    }

    #[test]
    fn equality_prefix_extends_into_second_key_part() {
        let layout = layout();
        let indexes = indexes();
        let bump = Bump::new();
        let mut analyzer = RangeAnalyzer::new(&layout, &indexes, &bump).unwrap();

        let cond = Cond::and(vec![
            Cond::cmp(1, CmpOp::Eq, 7i64),
            Cond::cmp(2, CmpOp::Ge, "m"),
        ]);
        let tree = analyzer.analyze(&cond);
        let ranges = analyzer.ranges(tree.keys[1]);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].flags, 0);
        assert!(ranges[0].min_key.len() > analyzer.part_image(1, &row(&layout, 0, Some(7), "")).len());

        let inside = row(&layout, 0, Some(7), "zeta");
        let outside = row(&layout, 0, Some(7), "alpha");
        let other = row(&layout, 0, Some(8), "zeta");
        assert!(ranges[0].contains(&analyzer.index_key(1, &inside)));
        assert!(!ranges[0].contains(&analyzer.index_key(1, &outside)));
        assert!(!ranges[0].contains(&analyzer.index_key(1, &other)));
    }

    #[test]
    fn rounded_constants_never_exclude_matching_rows() {
        let layout = layout();
        let indexes = indexes();
        let bump = Bump::new();
        let mut analyzer = RangeAnalyzer::new(&layout, &indexes, &bump).unwrap();

        for cond in [
            Cond::lt(0, 5.5f64),
            Cond::lt(0, 5.4f64),
            Cond::gt(0, 5.4f64),
            Cond::gt(0, 5.5f64),
            Cond::cmp(0, CmpOp::Ne, 5.5f64),
        ] {
            let tree = analyzer.analyze(&cond);
            for x in 3..9 {
                let r = row(&layout, x, None, "");
                if cond.evaluate(&layout, &r) == Some(true) {
                    assert!(analyzer.matches_row(&tree, &r), "{:?} x = {}", cond, x);
                }
            }
        }
        assert!(analyzer.analyze(&Cond::eq(0, 5.5f64)).is_always());
        assert!(analyzer.analyze(&Cond::lt(0, 1e12f64)).is_always());
    }

    #[test]
    fn in_and_not_in_lists() {
        let layout = layout();
        let indexes = indexes();
        let bump = Bump::new();
        let mut analyzer = RangeAnalyzer::new(&layout, &indexes, &bump).unwrap();

        let values: Vec<Value> = [3i64, 9, 1].iter().map(|v| Value::Int(*v)).collect();
        let tree = analyzer.analyze(&Cond::In {
            column: 0,
            values: values.clone(),
            negated: false,
        });
        assert_eq!(analyzer.arena().interval_count(tree.keys[0]), 3);

        let tree = analyzer.analyze(&Cond::In {
            column: 0,
            values,
            negated: true,
        });
        assert_eq!(analyzer.arena().interval_count(tree.keys[0]), 4);
        assert!(!analyzer.matches_row(&tree, &row(&layout, 9, None, "")));
        assert!(analyzer.matches_row(&tree, &row(&layout, 4, None, "")));
    }

    #[test]
    fn column_comparison_marks_maybe_keys() {
        let layout = layout();
        let indexes = indexes();
        let bump = Bump::new();
        let mut analyzer = RangeAnalyzer::new(&layout, &indexes, &bump).unwrap();
        let tree = analyzer.analyze(&Cond::ColumnCmp {
            left: 0,
            op: CmpOp::Lt,
            right: 1,
        });
        assert_eq!(tree.keys[0], Some(KeyArg::Maybe { part: 0 }));
        assert_eq!(tree.keys[1], Some(KeyArg::Maybe { part: 0 }));
    }

    #[test]
    fn evaluate_uses_three_valued_logic() {
        let layout = layout();
        let r = row(&layout, 5, None, "Bob");
        assert_eq!(Cond::eq(0, 5i64).evaluate(&layout, &r), Some(true));
        assert_eq!(Cond::lt(1, 5i64).evaluate(&layout, &r), None);
        assert_eq!(Cond::not(Cond::lt(1, 5i64)).evaluate(&layout, &r), None);
        assert_eq!(
            Cond::or(vec![Cond::lt(1, 5i64), Cond::eq(0, 5i64)]).evaluate(&layout, &r),
            Some(true)
        );
        assert_eq!(
            Cond::cmp(1, CmpOp::NullSafeEq, Value::Null).evaluate(&layout, &r),
            Some(true)
        );
        assert_eq!(Cond::eq(2, "Bob").evaluate(&layout, &r), Some(true));
        assert_eq!(Cond::lt(2, "Bobby-long-name").evaluate(&layout, &r), Some(true));
    }

    #[test]
    fn rejects_bad_index_definitions() {
        let layout = layout();
        let bump = Bump::new();
        let bad = vec![IndexDef::new("broken", &[9])];
        assert!(RangeAnalyzer::new(&layout, &bad, &bump).is_err());
    }
}
