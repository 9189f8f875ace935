//! # Configuration
//!
//! Numeric limits live in [`constants`], grouped by the engine that owns
//! them and cross-checked with compile-time assertions. Per-statement knobs
//! (buffer sizes, strict mode, temp directory, cancellation) live in
//! [`session`].
//!
//! ## Module Organization
//!
//! - [`constants`]: limits and defaults with dependency documentation
//! - [`session`]: `SessionOptions` builder and the `KillSwitch`

pub mod constants;
pub mod session;

pub use constants::*;
pub use session::{KillSwitch, SessionOptions, SessionOptionsBuilder};
