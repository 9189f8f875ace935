//! # SelArg Interval Trees
//!
//! A key part's restriction is a set of disjoint, ordered intervals kept in a
//! red-black tree. Every interval may carry a `next_key_part` restriction that
//! applies to rows falling inside it, which gives the classic "interval graph"
//! over a multi-part index:
//!
//! ```text
//!  part 0:   [1,1] ─────────── [5,5] ──── (10,+inf)
//!              │                 │
//!  part 1:   [a,a] [c,c]       (-inf,m)
//! ```
//!
//! ## Arena Layout
//!
//! Nodes live in one `Vec` and refer to each other by `u32` index. A tree is
//! immutable once built: `key_and`/`key_or` always build fresh trees from the
//! intervals of their operands, so handles can be shared freely between
//! `SelTree`s without reference counting.
//!
//! ## Key Images
//!
//! Bounds are byte strings compared with `memcmp`. They are allocated by the
//! caller (normally in a `bumpalo::Bump`) and borrowed for the arena's
//! lifetime.
//!
//! ## Degradation
//!
//! The arena holds at most `MAX_SEL_ARGS` nodes. When a result would not fit,
//! `key_and` keeps one operand and `key_or` drops the restriction. Both keep
//! every matching row inside the result.

use std::cmp::Ordering;

use tracing::debug;

use crate::config::MAX_SEL_ARGS;

/// Bound flags carried by every interval.
pub mod flags {
    /// Lower bound is exclusive.
    pub const NEAR_MIN: u8 = 0x01;
    /// Upper bound is exclusive.
    pub const NEAR_MAX: u8 = 0x02;
    /// No lower bound.
    pub const NO_MIN_RANGE: u8 = 0x04;
    /// No upper bound.
    pub const NO_MAX_RANGE: u8 = 0x08;
}

use flags::{NEAR_MAX, NEAR_MIN, NO_MAX_RANGE, NO_MIN_RANGE};

const NIL: u32 = u32::MAX;

/// Handle to the root of an interval tree.
pub type ArgId = u32;

/// Restriction on one key part.
///
/// `Option<KeyArg>` is used throughout: `None` means the key part is not
/// restricted at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyArg {
    /// Disjoint intervals rooted at the given node.
    Range(ArgId),
    /// The part is referenced by a condition that cannot be turned into
    /// intervals, such as `a = b` between two columns.
    Maybe { part: u8 },
    /// No key value can satisfy the condition.
    Impossible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

/// One interval of a key part.
#[derive(Debug, Clone, Copy)]
pub struct SelArg<'a> {
    part: u8,
    min: &'a [u8],
    max: &'a [u8],
    flags: u8,
    next_key_part: Option<KeyArg>,
    left: u32,
    right: u32,
    parent: u32,
    color: Color,
}

impl<'a> SelArg<'a> {
    pub fn part(&self) -> u8 {
        self.part
    }

    pub fn min_key(&self) -> &'a [u8] {
        self.min
    }

    pub fn max_key(&self) -> &'a [u8] {
        self.max
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn next_key_part(&self) -> Option<KeyArg> {
        self.next_key_part
    }

    pub fn has_min(&self) -> bool {
        self.flags & NO_MIN_RANGE == 0
    }

    pub fn has_max(&self) -> bool {
        self.flags & NO_MAX_RANGE == 0
    }

    /// True for a closed single-value interval.
    pub fn is_singlepoint(&self) -> bool {
        self.flags & (NEAR_MIN | NEAR_MAX | NO_MIN_RANGE | NO_MAX_RANGE) == 0
            && self.min == self.max
    }

    fn span(&self) -> Span<'a> {
        Span {
            min: self.min,
            max: self.max,
            flags: self.flags,
            next: self.next_key_part,
        }
    }
}

/// Interval used while computing AND/OR results, before it is placed in a
/// tree.
#[derive(Debug, Clone, Copy)]
pub struct Span<'a> {
    pub min: &'a [u8],
    pub max: &'a [u8],
    pub flags: u8,
    pub next: Option<KeyArg>,
}

impl<'a> Span<'a> {
    pub fn new(min: &'a [u8], max: &'a [u8], flags: u8) -> Self {
        Self {
            min,
            max,
            flags,
            next: None,
        }
    }

    pub fn point(key: &'a [u8]) -> Self {
        Self::new(key, key, 0)
    }

    pub fn full() -> Self {
        Self::new(&[], &[], NO_MIN_RANGE | NO_MAX_RANGE)
    }

    fn min_flags(&self) -> u8 {
        self.flags & (NEAR_MIN | NO_MIN_RANGE)
    }

    fn max_flags(&self) -> u8 {
        self.flags & (NEAR_MAX | NO_MAX_RANGE)
    }

    fn with_min_of(mut self, other: &Span<'a>) -> Self {
        self.min = other.min;
        self.flags = self.max_flags() | other.min_flags();
        self
    }

    fn with_max_of(mut self, other: &Span<'a>) -> Self {
        self.max = other.max;
        self.flags = self.min_flags() | other.max_flags();
        self
    }

    /// Upper bound just below `other`'s lower bound.
    fn with_max_before(mut self, other: &Span<'a>) -> Self {
        self.max = other.min;
        let near = if other.flags & NEAR_MIN != 0 { 0 } else { NEAR_MAX };
        self.flags = self.min_flags() | near;
        self
    }

    /// Lower bound just above `other`'s upper bound.
    fn with_min_after(mut self, other: &Span<'a>) -> Self {
        self.min = other.max;
        let near = if other.flags & NEAR_MAX != 0 { 0 } else { NEAR_MIN };
        self.flags = self.max_flags() | near;
        self
    }

    fn is_empty(&self) -> bool {
        if self.flags & (NO_MIN_RANGE | NO_MAX_RANGE) != 0 {
            return false;
        }
        match self.min.cmp(self.max) {
            Ordering::Less => false,
            Ordering::Greater => true,
            Ordering::Equal => self.flags & (NEAR_MIN | NEAR_MAX) != 0,
        }
    }

    fn is_full(&self) -> bool {
        self.flags & NO_MIN_RANGE != 0 && self.flags & NO_MAX_RANGE != 0
    }
}

// ============================================================================
// Bound comparisons
// ============================================================================

fn cmp_min_to_min(a: &Span, b: &Span) -> Ordering {
    match (a.flags & NO_MIN_RANGE != 0, b.flags & NO_MIN_RANGE != 0) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }
    a.min.cmp(b.min).then_with(|| {
        let (na, nb) = (a.flags & NEAR_MIN != 0, b.flags & NEAR_MIN != 0);
        na.cmp(&nb)
    })
}

fn cmp_max_to_max(a: &Span, b: &Span) -> Ordering {
    match (a.flags & NO_MAX_RANGE != 0, b.flags & NO_MAX_RANGE != 0) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }
    a.max.cmp(b.max).then_with(|| {
        let (na, nb) = (a.flags & NEAR_MAX != 0, b.flags & NEAR_MAX != 0);
        nb.cmp(&na)
    })
}

/// True when `a` ends strictly before `b` starts, with no shared point.
fn ends_before(a: &Span, b: &Span) -> bool {
    if a.flags & NO_MAX_RANGE != 0 || b.flags & NO_MIN_RANGE != 0 {
        return false;
    }
    match a.max.cmp(b.min) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => a.flags & NEAR_MAX != 0 || b.flags & NEAR_MIN != 0,
    }
}

/// True when `a` ends exactly where `b` starts, with the boundary value
/// belonging to exactly one of them.
fn adjoins(a: &Span, b: &Span) -> bool {
    if a.flags & NO_MAX_RANGE != 0 || b.flags & NO_MIN_RANGE != 0 || a.max != b.min {
        return false;
    }
    (a.flags & NEAR_MAX != 0) != (b.flags & NEAR_MIN != 0)
}

fn below_min(value: &[u8], arg: &SelArg) -> bool {
    if !arg.has_min() {
        return false;
    }
    match value.cmp(arg.min) {
        Ordering::Less => true,
        Ordering::Equal => arg.flags & NEAR_MIN != 0,
        Ordering::Greater => false,
    }
}

fn above_max(value: &[u8], arg: &SelArg) -> bool {
    if !arg.has_max() {
        return false;
    }
    match value.cmp(arg.max) {
        Ordering::Greater => true,
        Ordering::Equal => arg.flags & NEAR_MAX != 0,
        Ordering::Less => false,
    }
}

// ============================================================================
// Arena
// ============================================================================

/// Owner of every `SelArg` built while analysing one statement.
#[derive(Debug)]
pub struct SelArgArena<'a> {
    nodes: Vec<SelArg<'a>>,
    limit: usize,
}

impl Default for SelArgArena<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> SelArgArena<'a> {
    pub fn new() -> Self {
        Self::with_limit(MAX_SEL_ARGS)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            nodes: Vec::new(),
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: ArgId) -> &SelArg<'a> {
        &self.nodes[id as usize]
    }

    /// Key part restricted by `key`, if any.
    pub fn part_of(&self, key: KeyArg) -> Option<u8> {
        match key {
            KeyArg::Range(root) => Some(self.get(root).part),
            KeyArg::Maybe { part } => Some(part),
            KeyArg::Impossible => None,
        }
    }

    /// Builds a tree from ordered, disjoint spans. Returns `None` when the
    /// arena cannot hold the result.
    pub fn build(&mut self, part: u8, spans: &[Span<'a>]) -> Option<KeyArg> {
        if spans.is_empty() {
            return Some(KeyArg::Impossible);
        }
        if self.nodes.len() + spans.len() > self.limit {
            debug!(
                nodes = self.nodes.len(),
                requested = spans.len(),
                limit = self.limit,
                "sel_arg arena full"
            );
            return None;
        }
        let mut root = NIL;
        for span in spans {
            root = self.insert(root, part, *span);
        }
        Some(KeyArg::Range(root))
    }

    /// In-order intervals of the tree rooted at `root`.
    pub fn iter(&self, root: ArgId) -> Iter<'_, 'a> {
        let mut cur = root;
        if cur != NIL {
            while self.nodes[cur as usize].left != NIL {
                cur = self.nodes[cur as usize].left;
            }
        }
        Iter { arena: self, cur }
    }

    pub fn interval_count(&self, key: Option<KeyArg>) -> usize {
        match key {
            Some(KeyArg::Range(root)) => self.iter(root).count(),
            _ => 0,
        }
    }

    fn spans(&self, root: ArgId) -> Vec<Span<'a>> {
        self.iter(root).map(|a| a.span()).collect()
    }

    // ------------------------------------------------------------------------
    // Red-black insertion
    // ------------------------------------------------------------------------

    fn insert(&mut self, root: u32, part: u8, span: Span<'a>) -> u32 {
        let id = self.nodes.len() as u32;
        self.nodes.push(SelArg {
            part,
            min: span.min,
            max: span.max,
            flags: span.flags,
            next_key_part: span.next,
            left: NIL,
            right: NIL,
            parent: NIL,
            color: Color::Red,
        });

        if root == NIL {
            self.nodes[id as usize].color = Color::Black;
            return id;
        }

        let mut cur = root;
        loop {
            let goes_left =
                cmp_min_to_min(&span, &self.nodes[cur as usize].span()) == Ordering::Less;
            let child = if goes_left {
                self.nodes[cur as usize].left
            } else {
                self.nodes[cur as usize].right
            };
            if child == NIL {
                if goes_left {
                    self.nodes[cur as usize].left = id;
                } else {
                    self.nodes[cur as usize].right = id;
                }
                self.nodes[id as usize].parent = cur;
                break;
            }
            cur = child;
        }

        self.rebalance_after_insert(root, id)
    }

    fn color(&self, id: u32) -> Color {
        if id == NIL {
            Color::Black
        } else {
            self.nodes[id as usize].color
        }
    }

    fn rebalance_after_insert(&mut self, mut root: u32, mut x: u32) -> u32 {
        while x != root && self.color(self.nodes[x as usize].parent) == Color::Red {
            let parent = self.nodes[x as usize].parent;
            let grand = self.nodes[parent as usize].parent;
            let parent_is_left = self.nodes[grand as usize].left == parent;
            let uncle = if parent_is_left {
                self.nodes[grand as usize].right
            } else {
                self.nodes[grand as usize].left
            };

            if self.color(uncle) == Color::Red {
                self.nodes[parent as usize].color = Color::Black;
                self.nodes[uncle as usize].color = Color::Black;
                self.nodes[grand as usize].color = Color::Red;
                x = grand;
                continue;
            }

            if parent_is_left {
                if self.nodes[parent as usize].right == x {
                    x = parent;
                    root = self.rotate_left(root, x);
                }
                let parent = self.nodes[x as usize].parent;
                let grand = self.nodes[parent as usize].parent;
                self.nodes[parent as usize].color = Color::Black;
                self.nodes[grand as usize].color = Color::Red;
                root = self.rotate_right(root, grand);
            } else {
                if self.nodes[parent as usize].left == x {
                    x = parent;
                    root = self.rotate_right(root, x);
                }
                let parent = self.nodes[x as usize].parent;
                let grand = self.nodes[parent as usize].parent;
                self.nodes[parent as usize].color = Color::Black;
                self.nodes[grand as usize].color = Color::Red;
                root = self.rotate_left(root, grand);
            }
        }
        self.nodes[root as usize].color = Color::Black;
        root
    }

    fn replace_child(&mut self, root: u32, old: u32, new: u32) -> u32 {
        let parent = self.nodes[old as usize].parent;
        self.nodes[new as usize].parent = parent;
        if parent == NIL {
            return new;
        }
        if self.nodes[parent as usize].left == old {
            self.nodes[parent as usize].left = new;
        } else {
            self.nodes[parent as usize].right = new;
        }
        root
    }

    fn rotate_left(&mut self, root: u32, x: u32) -> u32 {
        let y = self.nodes[x as usize].right;
        let inner = self.nodes[y as usize].left;
        self.nodes[x as usize].right = inner;
        if inner != NIL {
            self.nodes[inner as usize].parent = x;
        }
        let root = self.replace_child(root, x, y);
        self.nodes[y as usize].left = x;
        self.nodes[x as usize].parent = y;
        root
    }

    fn rotate_right(&mut self, root: u32, x: u32) -> u32 {
        let y = self.nodes[x as usize].left;
        let inner = self.nodes[y as usize].right;
        self.nodes[x as usize].left = inner;
        if inner != NIL {
            self.nodes[inner as usize].parent = x;
        }
        let root = self.replace_child(root, x, y);
        self.nodes[y as usize].right = x;
        self.nodes[x as usize].parent = y;
        root
    }

    /// Height in black nodes, or `None` if the red-black rules are broken.
    pub fn black_height(&self, root: ArgId) -> Option<usize> {
        if root == NIL {
            return Some(1);
        }
        let node = &self.nodes[root as usize];
        if node.color == Color::Red
            && (self.color(node.left) == Color::Red || self.color(node.right) == Color::Red)
        {
            return None;
        }
        let left = self.black_height(node.left)?;
        let right = self.black_height(node.right)?;
        if left != right {
            return None;
        }
        Some(left + usize::from(node.color == Color::Black))
    }

    // ------------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------------

    /// Interval of the tree rooted at `root` that contains `value`.
    pub fn find(&self, root: ArgId, value: &[u8]) -> Option<&SelArg<'a>> {
        let mut cur = root;
        while cur != NIL {
            let node = &self.nodes[cur as usize];
            if below_min(value, node) {
                cur = node.left;
            } else if above_max(value, node) {
                cur = node.right;
            } else {
                return Some(node);
            }
        }
        None
    }

    /// Whether a key tuple, one image per key part, satisfies `key`.
    pub fn contains(&self, key: Option<KeyArg>, parts: &[&[u8]]) -> bool {
        match key {
            None | Some(KeyArg::Maybe { .. }) => true,
            Some(KeyArg::Impossible) => false,
            Some(KeyArg::Range(root)) => {
                let part = self.get(root).part as usize;
                let Some(value) = parts.get(part) else {
                    return true;
                };
                match self.find(root, value) {
                    Some(arg) => self.contains(arg.next_key_part, parts),
                    None => false,
                }
            }
        }
    }

    /// Structural equality of two restrictions.
    pub fn eq_tree(&self, a: Option<KeyArg>, b: Option<KeyArg>) -> bool {
        match (a, b) {
            (Some(KeyArg::Range(ra)), Some(KeyArg::Range(rb))) => {
                if ra == rb {
                    return true;
                }
                let mut ia = self.iter(ra);
                let mut ib = self.iter(rb);
                loop {
                    match (ia.next(), ib.next()) {
                        (None, None) => return true,
                        (Some(x), Some(y)) => {
                            if x.part != y.part
                                || x.flags != y.flags
                                || (x.has_min() && x.min != y.min)
                                || (x.has_max() && x.max != y.max)
                                || !self.eq_tree(x.next_key_part, y.next_key_part)
                            {
                                return false;
                            }
                        }
                        _ => return false,
                    }
                }
            }
            (a, b) => a == b,
        }
    }

    // ========================================================================
    // AND
    // ========================================================================

    /// Intersection of two restrictions.
    pub fn key_and(&mut self, a: Option<KeyArg>, b: Option<KeyArg>) -> Option<KeyArg> {
        let (a_key, b_key) = match (a, b) {
            (None, other) | (other, None) => return other,
            (Some(KeyArg::Impossible), _) | (_, Some(KeyArg::Impossible)) => {
                return Some(KeyArg::Impossible)
            }
            (Some(x), Some(y)) => (x, y),
        };

        let (pa, pb) = (self.part_of(a_key), self.part_of(b_key));
        if pa != pb {
            return if pa < pb {
                self.and_all_keys(a_key, b_key)
            } else {
                self.and_all_keys(b_key, a_key)
            };
        }

        match (a_key, b_key) {
            (KeyArg::Maybe { .. }, other) | (other, KeyArg::Maybe { .. }) => Some(other),
            (KeyArg::Range(ra), KeyArg::Range(rb)) => self.intersect(ra, rb).or(a),
            _ => Some(KeyArg::Impossible),
        }
    }

    /// ANDs `lower` (an earlier key part) with `higher` by pushing `higher`
    /// into every interval's `next_key_part`.
    fn and_all_keys(&mut self, lower: KeyArg, higher: KeyArg) -> Option<KeyArg> {
        let (part, spans) = match lower {
            KeyArg::Maybe { part } => (part, vec![Span::full()]),
            KeyArg::Range(root) => (self.get(root).part, self.spans(root)),
            KeyArg::Impossible => return Some(KeyArg::Impossible),
        };

        let mut kept = Vec::with_capacity(spans.len());
        for mut span in spans {
            match self.key_and(span.next, Some(higher)) {
                Some(KeyArg::Impossible) => continue,
                next => {
                    span.next = next;
                    kept.push(span);
                }
            }
        }
        if kept.is_empty() {
            return Some(KeyArg::Impossible);
        }
        self.build(part, &kept).or(Some(lower))
    }

    fn intersect(&mut self, ra: ArgId, rb: ArgId) -> Option<KeyArg> {
        let part = self.get(ra).part;
        let xs = self.spans(ra);
        let ys = self.spans(rb);

        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < xs.len() && j < ys.len() {
            let (x, y) = (xs[i], ys[j]);
            let lo = if cmp_min_to_min(&x, &y) == Ordering::Less { y } else { x };
            let hi = if cmp_max_to_max(&x, &y) == Ordering::Greater { y } else { x };
            let piece = lo.with_max_of(&hi);
            if !piece.is_empty() {
                let next = self.key_and(x.next, y.next);
                if next != Some(KeyArg::Impossible) {
                    out.push(Span { next, ..piece });
                }
            }
            match cmp_max_to_max(&x, &y) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => {
                    i += 1;
                    j += 1;
                }
            }
        }

        if out.is_empty() {
            return Some(KeyArg::Impossible);
        }
        self.build(part, &out)
    }

    // ========================================================================
    // OR
    // ========================================================================

    /// Union of two restrictions. `None` when the union restricts nothing
    /// that can be scanned.
    pub fn key_or(&mut self, a: Option<KeyArg>, b: Option<KeyArg>) -> Option<KeyArg> {
        let (a_key, b_key) = match (a, b) {
            (None, _) | (_, None) => return None,
            (Some(KeyArg::Impossible), other) | (other, Some(KeyArg::Impossible)) => {
                return other
            }
            (Some(x), Some(y)) => (x, y),
        };

        let part = self.part_of(a_key);
        if part != self.part_of(b_key) {
            return None;
        }

        match (a_key, b_key) {
            (KeyArg::Maybe { part }, _) | (_, KeyArg::Maybe { part }) => {
                Some(KeyArg::Maybe { part })
            }
            (KeyArg::Range(ra), KeyArg::Range(rb)) => self.union(ra, rb),
            _ => None,
        }
    }

    fn union(&mut self, ra: ArgId, rb: ArgId) -> Option<KeyArg> {
        let part = self.get(ra).part;
        let xs = self.spans(ra);
        let ys = self.spans(rb);

        let mut pieces: Vec<Span<'a>> = Vec::with_capacity(xs.len() + ys.len());
        let (mut i, mut j) = (0, 0);
        let mut cur_x = xs.first().copied();
        let mut cur_y = ys.first().copied();

        loop {
            let (x, y) = match (cur_x, cur_y) {
                (Some(x), Some(y)) => (x, y),
                (Some(x), None) => {
                    pieces.push(x);
                    pieces.extend_from_slice(&xs[i + 1..]);
                    break;
                }
                (None, Some(y)) => {
                    pieces.push(y);
                    pieces.extend_from_slice(&ys[j + 1..]);
                    break;
                }
                (None, None) => break,
            };

            // `first` starts no later than `second`.
            let x_first = cmp_min_to_min(&x, &y) != Ordering::Greater;
            let (mut first, second) = if x_first { (x, y) } else { (y, x) };

            if ends_before(&first, &second) {
                pieces.push(first);
                if x_first {
                    i += 1;
                    cur_x = xs.get(i).copied();
                } else {
                    j += 1;
                    cur_y = ys.get(j).copied();
                }
                continue;
            }

            if cmp_min_to_min(&first, &second) == Ordering::Less {
                pieces.push(first.with_max_before(&second));
                first = first.with_min_of(&second);
            }

            let (lo_max, hi_max) = match cmp_max_to_max(&first, &second) {
                Ordering::Greater => (second, Some(first)),
                Ordering::Less => (first, Some(second)),
                Ordering::Equal => (first, None),
            };
            let next = self.key_or(first.next, second.next);
            pieces.push(Span {
                next,
                ..first.with_max_of(&lo_max)
            });

            // The side that ends later keeps its remainder as the current
            // interval; the other side advances.
            let (x_rest, y_rest) = match hi_max {
                None => (None, None),
                Some(longer) => {
                    let rest = longer.with_min_after(&lo_max);
                    let longer_is_first = cmp_max_to_max(&first, &second) == Ordering::Greater;
                    if longer_is_first == x_first {
                        (Some(rest), None)
                    } else {
                        (None, Some(rest))
                    }
                }
            };
            match x_rest {
                Some(rest) => cur_x = Some(rest),
                None => {
                    i += 1;
                    cur_x = xs.get(i).copied();
                }
            }
            match y_rest {
                Some(rest) => cur_y = Some(rest),
                None => {
                    j += 1;
                    cur_y = ys.get(j).copied();
                }
            }
        }

        let merged = self.coalesce(pieces);
        if merged.len() == 1 && merged[0].is_full() && merged[0].next.is_none() {
            return None;
        }
        self.build(part, &merged)
    }

    /// Joins neighbouring pieces that touch and share the same
    /// `next_key_part`.
    fn coalesce(&self, pieces: Vec<Span<'a>>) -> Vec<Span<'a>> {
        let mut out: Vec<Span<'a>> = Vec::with_capacity(pieces.len());
        for piece in pieces {
            if let Some(last) = out.last_mut() {
                let touching = adjoins(last, &piece) || !ends_before(last, &piece);
                if touching && self.eq_tree(last.next, piece.next) {
                    if cmp_max_to_max(&piece, last) == Ordering::Greater {
                        *last = last.with_max_of(&piece);
                    }
                    continue;
                }
            }
            out.push(piece);
        }
        out
    }
}

/// In-order iterator over one interval tree.
pub struct Iter<'r, 'a> {
    arena: &'r SelArgArena<'a>,
    cur: u32,
}

impl<'r, 'a> Iterator for Iter<'r, 'a> {
    type Item = &'r SelArg<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur == NIL {
            return None;
        }
        let nodes = &self.arena.nodes;
        let item = &nodes[self.cur as usize];

        let mut next = item.right;
        if next != NIL {
            while nodes[next as usize].left != NIL {
                next = nodes[next as usize].left;
            }
        } else {
            let mut child = self.cur;
            next = item.parent;
            while next != NIL && nodes[next as usize].right == child {
                child = next;
                next = nodes[next as usize].parent;
            }
        }
        self.cur = next;
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lt(k: &[u8]) -> Span<'_> {
        Span::new(&[], k, NO_MIN_RANGE | NEAR_MAX)
    }

    fn gt(k: &[u8]) -> Span<'_> {
        Span::new(k, &[], NEAR_MIN | NO_MAX_RANGE)
    }

    fn between<'k>(lo: &'k [u8], hi: &'k [u8]) -> Span<'k> {
        Span::new(lo, hi, 0)
    }

    fn single(arena: &mut SelArgArena<'static>, span: Span<'static>) -> Option<KeyArg> {
        arena.build(0, &[span])
    }

    fn bounds(arena: &SelArgArena, key: Option<KeyArg>) -> Vec<(Vec<u8>, Vec<u8>, u8)> {
        match key {
            Some(KeyArg::Range(root)) => arena
                .iter(root)
                .map(|a| (a.min_key().to_vec(), a.max_key().to_vec(), a.flags()))
                .collect(),
            _ => Vec::new(),
        }
    }

    #[test]
    fn build_keeps_order_and_red_black_shape() {
        let keys: Vec<[u8; 1]> = (0..64u8).map(|k| [k * 2]).collect();
        let keys: &'static [[u8; 1]] = Box::leak(keys.into_boxed_slice());
        let spans: Vec<Span> = keys.iter().map(|k| Span::point(k)).collect();
        let mut arena = SelArgArena::new();
        let Some(KeyArg::Range(root)) = arena.build(0, &spans) else {
            panic!("expected a range");
        };
        let order: Vec<u8> = arena.iter(root).map(|a| a.min_key()[0]).collect();
        assert_eq!(order, (0..64u8).map(|k| k * 2).collect::<Vec<_>>());
        assert!(arena.black_height(root).is_some());
        assert!(arena.find(root, &[10]).is_some());
        assert!(arena.find(root, &[11]).is_none());
    }

    #[test]
    fn and_of_disjoint_points_is_impossible() {
        let mut arena = SelArgArena::new();
        let a = single(&mut arena, Span::point(&[5]));
        let b = single(&mut arena, Span::point(&[6]));
        assert_eq!(arena.key_and(a, b), Some(KeyArg::Impossible));
    }

    #[test]
    fn and_narrows_open_ranges() {
        let mut arena = SelArgArena::new();
        let a = single(&mut arena, gt(&[5]));
        let b = single(&mut arena, lt(&[9]));
        let key = arena.key_and(a, b);
        assert_eq!(bounds(&arena, key), vec![(vec![5], vec![9], NEAR_MIN | NEAR_MAX)]);

        let c = single(&mut arena, lt(&[5]));
        assert_eq!(arena.key_and(a, c), Some(KeyArg::Impossible));
    }

    #[test]
    fn and_with_touching_closed_bounds_keeps_the_point() {
        let mut arena = SelArgArena::new();
        let a = single(&mut arena, between(&[1], &[5]));
        let b = single(&mut arena, between(&[5], &[9]));
        let key = arena.key_and(a, b);
        assert_eq!(bounds(&arena, key), vec![(vec![5], vec![5], 0)]);
    }

    #[test]
    fn or_keeps_disjoint_ranges_apart() {
        let mut arena = SelArgArena::new();
        let a = single(&mut arena, lt(&[5]));
        let b = single(&mut arena, gt(&[10]));
        let key = arena.key_or(a, b);
        assert_eq!(
            bounds(&arena, key),
            vec![
                (vec![], vec![5], NO_MIN_RANGE | NEAR_MAX),
                (vec![10], vec![], NEAR_MIN | NO_MAX_RANGE),
            ]
        );
    }

    #[test]
    fn or_coalesces_overlapping_and_adjacent_ranges() {
        let mut arena = SelArgArena::new();
        let a = single(&mut arena, between(&[1], &[5]));
        let b = single(&mut arena, Span::new(&[5], &[9], NEAR_MIN));
        let key = arena.key_or(a, b);
        assert_eq!(bounds(&arena, key), vec![(vec![1], vec![9], 0)]);

        let c = single(&mut arena, between(&[3], &[12]));
        let key = arena.key_or(key, c);
        assert_eq!(bounds(&arena, key), vec![(vec![1], vec![12], 0)]);
    }

    #[test]
    fn or_covering_everything_is_unrestricted() {
        let mut arena = SelArgArena::new();
        let a = single(&mut arena, Span::new(&[], &[5], NO_MIN_RANGE));
        let b = single(&mut arena, gt(&[4]));
        assert_eq!(arena.key_or(a, b), None);
    }

    #[test]
    fn or_splits_overlap_with_different_next_parts() {
        let mut arena = SelArgArena::new();
        let n1 = arena.build(1, &[Span::point(&[1])]);
        let n2 = arena.build(1, &[Span::point(&[2])]);
        let a = arena.build(0, &[Span { next: n1, ..between(&[0], &[10]) }]);
        let b = arena.build(0, &[Span { next: n2, ..between(&[5], &[20]) }]);
        let key = arena.key_or(a, b);
        assert_eq!(
            bounds(&arena, key),
            vec![
                (vec![0], vec![5], NEAR_MAX),
                (vec![5], vec![10], 0),
                (vec![10], vec![20], NEAR_MIN),
            ]
        );
        assert!(arena.contains(key, &[&[7], &[1]]));
        assert!(arena.contains(key, &[&[7], &[2]]));
        assert!(!arena.contains(key, &[&[3], &[2]]));
        assert!(!arena.contains(key, &[&[15], &[1]]));
    }

    #[test]
    fn and_across_parts_pushes_into_next_key_part() {
        let mut arena = SelArgArena::new();
        let first = arena.build(0, &[Span::point(&[1]), Span::point(&[3])]);
        let second = arena.build(1, &[gt(&[7])]);
        let key = arena.key_and(second, first);
        let Some(KeyArg::Range(root)) = key else {
            panic!("expected a range");
        };
        assert_eq!(arena.get(root).part(), 0);
        assert!(arena.iter(root).all(|a| a.next_key_part().is_some()));
        assert!(arena.contains(key, &[&[3], &[8]]));
        assert!(!arena.contains(key, &[&[3], &[7]]));
        assert!(!arena.contains(key, &[&[2], &[8]]));
    }

    #[test]
    fn maybe_key_yields_to_ranges_on_and_and_wins_on_or() {
        let mut arena = SelArgArena::new();
        let maybe = Some(KeyArg::Maybe { part: 0 });
        let range = single(&mut arena, lt(&[5]));
        assert_eq!(arena.key_and(maybe, range), range);
        assert_eq!(arena.key_or(maybe, range), maybe);
        assert_eq!(arena.key_or(range, None), None);
        assert_eq!(arena.key_or(range, Some(KeyArg::Impossible)), range);
    }

    #[test]
    fn full_arena_degrades_without_losing_rows() {
        let mut arena = SelArgArena::with_limit(2);
        let a = single(&mut arena, between(&[1], &[9]));
        let b = single(&mut arena, between(&[3], &[5]));
        assert_eq!(arena.key_and(a, b), a);
        assert_eq!(arena.key_or(a, b), None);
    }

    #[test]
    fn eq_tree_compares_structure() {
        let mut arena = SelArgArena::new();
        let a = single(&mut arena, between(&[1], &[2]));
        let b = single(&mut arena, between(&[1], &[2]));
        let c = single(&mut arena, between(&[1], &[3]));
        assert!(arena.eq_tree(a, b));
        assert!(!arena.eq_tree(a, c));
        assert!(arena.eq_tree(None, None));
        assert!(!arena.eq_tree(a, None));
    }
}
