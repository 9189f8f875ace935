//! # Range Optimizer
//!
//! Turns a table condition into per-index key ranges so a range or
//! index-merge scan can replace a full table scan.
//!
//! ## Architecture
//!
//! ```text
//! Cond ──> RangeAnalyzer ──> SelTree ──┬──> ranges(keys[i])  -> Vec<KeyRange>
//!               │                      └──> merges           -> index-merge union
//!               ├── key images in bumpalo::Bump
//!               └── intervals in SelArgArena (red-black, index addressed)
//! ```
//!
//! ## Module Organization
//!
//! | Module     | Contents                                             |
//! |------------|------------------------------------------------------|
//! | `sel_arg`  | interval trees, `key_and`, `key_or`                  |
//! | `sel_tree` | `SelTree`, `SelImerge`, `tree_and`, `tree_or`        |
//! | `range`    | `Cond`, `IndexDef`, `RangeAnalyzer`, `KeyRange`      |
//! | `cost`     | `CostVector` and scan cost estimates                 |
//!
//! ## Soundness
//!
//! Every transformation may widen the set of rows a tree admits but never
//! narrows it: a row satisfying the condition always satisfies the tree.
//! Unsupported shapes, constants that do not fit a column and arena
//! exhaustion all widen.
//!
//! ## Usage
//!
//! ```ignore
//! let bump = Bump::new();
//! let mut analyzer = RangeAnalyzer::new(&layout, &indexes, &bump)?;
//! let tree = analyzer.analyze(&Cond::or(vec![Cond::lt(0, 5i64), Cond::gt(0, 10i64)]));
//! for range in analyzer.ranges(tree.keys[0]) { ... }
//! ```

pub mod cost;
pub mod range;
pub mod sel_arg;
pub mod sel_tree;

pub use cost::{full_scan_cost, range_scan_cost, CostVector};
pub use range::{CmpOp, Cond, IndexDef, KeyRange, RangeAnalyzer};
pub use sel_arg::{flags, ArgId, KeyArg, SelArg, SelArgArena, Span};
pub use sel_tree::{
    or_sel_imerge_with_checks, or_sel_tree_with_checks, remove_nonrange_trees,
    sel_trees_can_be_ored, tree_and, tree_or, SelImerge, SelTree, TreeKind,
};
