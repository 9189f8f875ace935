//! # Range Trees and Index Merges
//!
//! A [`SelTree`] holds one optional restriction per index (`keys[i]` for
//! index `i`) plus a list of [`SelImerge`]s. Its meaning is the conjunction
//! of all of them:
//!
//! ```text
//! SelTree  = key[0] AND key[1] AND ... AND merge[0] AND merge[1] ...
//! SelImerge = tree[0] OR tree[1] OR ...
//! ```
//!
//! ## Classification
//!
//! | Kind       | Meaning                                           |
//! |------------|---------------------------------------------------|
//! | Impossible | no row can match                                  |
//! | Always     | no usable restriction, every row may match        |
//! | Maybe      | some row may match, no key restriction is known   |
//! | Key        | restrictions in `keys` and/or `merges`            |
//!
//! ## OR Strategy
//!
//! Two trees that restrict the same index starting at the same key part are
//! OR-ed key by key. Otherwise the disjunction becomes an index merge. When an
//! index merge already exists the new tree is folded into the first entry it
//! can be OR-ed with, else appended.

use super::sel_arg::{KeyArg, SelArgArena};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeKind {
    Impossible,
    Always,
    Maybe,
    Key,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelTree {
    pub kind: TreeKind,
    pub keys: Vec<Option<KeyArg>>,
    pub merges: Vec<SelImerge>,
}

/// Disjunction of range trees executed as an index-merge union.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelImerge {
    pub trees: Vec<SelTree>,
}

impl Default for SelTree {
    fn default() -> Self {
        Self::always(0)
    }
}

impl SelTree {
    fn with_kind(kind: TreeKind, key_count: usize) -> Self {
        Self {
            kind,
            keys: vec![None; key_count],
            merges: Vec::new(),
        }
    }

    pub fn impossible(key_count: usize) -> Self {
        Self::with_kind(TreeKind::Impossible, key_count)
    }

    pub fn always(key_count: usize) -> Self {
        Self::with_kind(TreeKind::Always, key_count)
    }

    pub fn maybe(key_count: usize) -> Self {
        Self::with_kind(TreeKind::Maybe, key_count)
    }

    /// An empty key tree; fill `keys` before use.
    pub fn keys(key_count: usize) -> Self {
        Self::with_kind(TreeKind::Key, key_count)
    }

    pub fn is_impossible(&self) -> bool {
        self.kind == TreeKind::Impossible
    }

    pub fn is_always(&self) -> bool {
        self.kind == TreeKind::Always
    }

    /// Indexes with a usable interval restriction.
    pub fn range_keys(&self) -> impl Iterator<Item = usize> + '_ {
        self.keys
            .iter()
            .enumerate()
            .filter(|(_, k)| matches!(k, Some(KeyArg::Range(_))))
            .map(|(i, _)| i)
    }

    /// Whether a row, given as one key tuple per index, may satisfy the
    /// tree.
    pub fn matches(&self, arena: &SelArgArena, tuples: &[Vec<&[u8]>]) -> bool {
        match self.kind {
            TreeKind::Impossible => false,
            TreeKind::Always | TreeKind::Maybe => true,
            TreeKind::Key => {
                self.keys
                    .iter()
                    .zip(tuples)
                    .all(|(key, tuple)| arena.contains(*key, tuple))
                    && self.merges.iter().all(|m| m.matches(arena, tuples))
            }
        }
    }
}

impl SelImerge {
    pub fn new(first: SelTree, second: SelTree) -> Self {
        Self {
            trees: vec![first, second],
        }
    }

    pub fn matches(&self, arena: &SelArgArena, tuples: &[Vec<&[u8]>]) -> bool {
        self.trees.iter().any(|t| t.matches(arena, tuples))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Drops restrictions that cannot drive a range scan. Returns true when
/// nothing usable remains.
pub fn remove_nonrange_trees(tree: &mut SelTree) -> bool {
    let mut any = false;
    for key in tree.keys.iter_mut() {
        match key {
            Some(KeyArg::Range(_)) => any = true,
            _ => *key = None,
        }
    }
    !any
}

/// True when both trees restrict some index starting at the same key part.
pub fn sel_trees_can_be_ored(arena: &SelArgArena, t1: &SelTree, t2: &SelTree) -> bool {
    t1.keys.iter().zip(&t2.keys).any(|(a, b)| match (a, b) {
        (Some(a), Some(b)) => {
            let pa = arena.part_of(*a);
            pa.is_some() && pa == arena.part_of(*b)
        }
        _ => false,
    })
}

/// ORs `new_tree` into the first compatible tree of `imerge`, or appends
/// it. Returns true when the merge no longer restricts anything.
pub fn or_sel_tree_with_checks(
    arena: &mut SelArgArena,
    imerge: &mut SelImerge,
    new_tree: SelTree,
) -> bool {
    for tree in imerge.trees.iter_mut() {
        if sel_trees_can_be_ored(arena, tree, &new_tree) {
            let existing = std::mem::take(tree);
            let result = tree_or(arena, existing, new_tree);
            if matches!(result.kind, TreeKind::Always | TreeKind::Maybe) {
                return true;
            }
            *tree = result;
            return false;
        }
    }
    imerge.trees.push(new_tree);
    false
}

/// Folds every tree of `other` into `imerge`.
pub fn or_sel_imerge_with_checks(
    arena: &mut SelArgArena,
    imerge: &mut SelImerge,
    other: SelImerge,
) -> bool {
    for tree in other.trees {
        if or_sel_tree_with_checks(arena, imerge, tree) {
            return true;
        }
    }
    false
}

/// ORs `tree` into every merge of `list`, dropping merges that become
/// unrestricted. Returns true when the list ends up empty.
fn imerge_list_or_tree(
    arena: &mut SelArgArena,
    list: &mut Vec<SelImerge>,
    tree: &SelTree,
) -> bool {
    let merges = std::mem::take(list);
    for mut imerge in merges {
        if !or_sel_tree_with_checks(arena, &mut imerge, tree.clone()) {
            list.push(imerge);
        }
    }
    list.is_empty()
}

// ============================================================================
// AND / OR
// ============================================================================

pub fn tree_and(arena: &mut SelArgArena, mut t1: SelTree, t2: SelTree) -> SelTree {
    match (t1.kind, t2.kind) {
        (TreeKind::Impossible, _) => return t1,
        (_, TreeKind::Impossible) => return t2,
        (TreeKind::Maybe | TreeKind::Always, _) => return t2,
        (_, TreeKind::Maybe | TreeKind::Always) => return t1,
        _ => {}
    }

    let key_count = t1.keys.len();
    let mut any_key = false;
    for (k1, k2) in t1.keys.iter_mut().zip(t2.keys) {
        let key = arena.key_and(*k1, k2);
        if key == Some(KeyArg::Impossible) {
            return SelTree::impossible(key_count);
        }
        any_key |= key.is_some();
        *k1 = key;
    }

    if any_key {
        t1.merges.clear();
    } else {
        t1.merges.extend(t2.merges);
    }
    t1
}

pub fn tree_or(arena: &mut SelArgArena, mut t1: SelTree, mut t2: SelTree) -> SelTree {
    match (t1.kind, t2.kind) {
        (TreeKind::Impossible, _) | (_, TreeKind::Always) => return t2,
        (_, TreeKind::Impossible) | (TreeKind::Always, _) => return t1,
        (TreeKind::Maybe, _) => return t1,
        (_, TreeKind::Maybe) => return t2,
        _ => {}
    }
    let key_count = t1.keys.len();

    if sel_trees_can_be_ored(arena, &t1, &t2) {
        let mut any_key = false;
        for (k1, k2) in t1.keys.iter_mut().zip(t2.keys) {
            *k1 = arena.key_or(*k1, k2);
            any_key |= k1.is_some();
        }
        if !any_key {
            return SelTree::always(key_count);
        }
        t1.merges.clear();
        return t1;
    }

    match (t1.merges.is_empty(), t2.merges.is_empty()) {
        (true, true) => {
            if remove_nonrange_trees(&mut t1) || remove_nonrange_trees(&mut t2) {
                return SelTree::always(key_count);
            }
            let mut result = SelTree::keys(key_count);
            result.merges.push(SelImerge::new(t1, t2));
            result
        }
        (false, false) => {
            let mut first = t1.merges.swap_remove(0);
            let other = t2.merges.swap_remove(0);
            if or_sel_imerge_with_checks(arena, &mut first, other) {
                return SelTree::always(key_count);
            }
            let mut result = SelTree::keys(key_count);
            result.merges.push(first);
            result
        }
        (merges_empty_1, _) => {
            let (mut with_merges, mut range_tree) = if merges_empty_1 { (t2, t1) } else { (t1, t2) };
            if remove_nonrange_trees(&mut range_tree) {
                return SelTree::always(key_count);
            }
            let mut list = std::mem::take(&mut with_merges.merges);
            if imerge_list_or_tree(arena, &mut list, &range_tree) {
                return SelTree::always(key_count);
            }
            let mut result = SelTree::keys(key_count);
            result.merges = list;
            result
        }
    }
}
