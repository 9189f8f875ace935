//! # Session Options
//!
//! Per-session execution settings consumed by the sort, join and decimal
//! engines. Options are assembled with [`SessionOptionsBuilder`] and validated
//! once in `build()`, so the engines can trust every value they read.
//!
//! | Option                   | Default          | Used by                  |
//! |--------------------------|------------------|--------------------------|
//! | sort_buffer_size         | 2 MB             | FileSort, Unique         |
//! | join_buffer_size         | 128 KB           | JoinCache                |
//! | max_length_for_sort_data | 1024             | FileSort addon decision  |
//! | max_sort_length          | 1024             | string sort keys         |
//! | div_precision_increment  | 4                | decimal division         |
//! | strict_mode              | false            | Diagnostics              |
//! | tmp_dir                  | system temp dir  | spill files              |
//!
//! ```ignore
//! let options = SessionOptions::builder()
//!     .sort_buffer_size(256 * 1024)
//!     .tmp_dir(dir.path())
//!     .strict_mode(true)
//!     .build()?;
//! ```
//!
//! The [`KillSwitch`] is shared with whoever may cancel the statement. Engines
//! poll it at phase boundaries only.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eyre::{ensure, Result};

use crate::config::{
    DEFAULT_DIV_PRECISION_INCREMENT, DEFAULT_JOIN_BUFFER_SIZE, DEFAULT_MAX_LENGTH_FOR_SORT_DATA,
    DEFAULT_MAX_SORT_LENGTH, MAX_DIV_PRECISION_INCREMENT, MAX_SORT_MEMORY, MIN_JOIN_BUFFER_SIZE,
    MIN_SORT_MEMORY,
};
use crate::error::SqlError;
use crate::memory::MemoryBudget;

/// Cancellation flag shared between a running statement and its killer.
#[derive(Debug, Clone, Default)]
pub struct KillSwitch(Arc<AtomicBool>);

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kill(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_killed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clears the flag before the next statement.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn check(&self) -> std::result::Result<(), SqlError> {
        if self.is_killed() {
            return Err(SqlError::Cancelled);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    sort_buffer_size: usize,
    join_buffer_size: usize,
    max_length_for_sort_data: usize,
    max_sort_length: usize,
    div_precision_increment: u8,
    strict_mode: bool,
    tmp_dir: PathBuf,
    budget: Arc<MemoryBudget>,
    kill: KillSwitch,
}

impl SessionOptions {
    pub fn builder() -> SessionOptionsBuilder {
        SessionOptionsBuilder::new()
    }

    pub fn sort_buffer_size(&self) -> usize {
        self.sort_buffer_size
    }

    pub fn join_buffer_size(&self) -> usize {
        self.join_buffer_size
    }

    pub fn max_length_for_sort_data(&self) -> usize {
        self.max_length_for_sort_data
    }

    pub fn max_sort_length(&self) -> usize {
        self.max_sort_length
    }

    pub fn div_precision_increment(&self) -> u8 {
        self.div_precision_increment
    }

    pub fn strict_mode(&self) -> bool {
        self.strict_mode
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    pub fn budget(&self) -> &Arc<MemoryBudget> {
        &self.budget
    }

    pub fn kill_switch(&self) -> &KillSwitch {
        &self.kill
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            sort_buffer_size: MAX_SORT_MEMORY,
            join_buffer_size: DEFAULT_JOIN_BUFFER_SIZE,
            max_length_for_sort_data: DEFAULT_MAX_LENGTH_FOR_SORT_DATA,
            max_sort_length: DEFAULT_MAX_SORT_LENGTH,
            div_precision_increment: DEFAULT_DIV_PRECISION_INCREMENT,
            strict_mode: false,
            tmp_dir: std::env::temp_dir(),
            budget: Arc::new(MemoryBudget::auto_detect()),
            kill: KillSwitch::new(),
        }
    }
}

/// Builder for [`SessionOptions`]. Unset options keep their defaults.
#[derive(Debug, Default)]
pub struct SessionOptionsBuilder {
    sort_buffer_size: Option<usize>,
    join_buffer_size: Option<usize>,
    max_length_for_sort_data: Option<usize>,
    max_sort_length: Option<usize>,
    div_precision_increment: Option<u8>,
    strict_mode: Option<bool>,
    tmp_dir: Option<PathBuf>,
    budget: Option<Arc<MemoryBudget>>,
    kill: Option<KillSwitch>,
}

impl SessionOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort_buffer_size(mut self, bytes: usize) -> Self {
        self.sort_buffer_size = Some(bytes);
        self
    }

    pub fn join_buffer_size(mut self, bytes: usize) -> Self {
        self.join_buffer_size = Some(bytes);
        self
    }

    pub fn max_length_for_sort_data(mut self, bytes: usize) -> Self {
        self.max_length_for_sort_data = Some(bytes);
        self
    }

    pub fn max_sort_length(mut self, bytes: usize) -> Self {
        self.max_sort_length = Some(bytes);
        self
    }

    pub fn div_precision_increment(mut self, digits: u8) -> Self {
        self.div_precision_increment = Some(digits);
        self
    }

    pub fn strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = Some(strict);
        self
    }

    pub fn tmp_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.tmp_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn memory_budget(mut self, budget: Arc<MemoryBudget>) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn kill_switch(mut self, kill: KillSwitch) -> Self {
        self.kill = Some(kill);
        self
    }

    pub fn build(self) -> Result<SessionOptions> {
        let sort_buffer_size = self.sort_buffer_size.unwrap_or(MAX_SORT_MEMORY);
        let join_buffer_size = self.join_buffer_size.unwrap_or(DEFAULT_JOIN_BUFFER_SIZE);
        let div_precision_increment = self
            .div_precision_increment
            .unwrap_or(DEFAULT_DIV_PRECISION_INCREMENT);
        let max_sort_length = self.max_sort_length.unwrap_or(DEFAULT_MAX_SORT_LENGTH);
        let tmp_dir = self.tmp_dir.unwrap_or_else(std::env::temp_dir);

        ensure!(
            sort_buffer_size >= MIN_SORT_MEMORY,
            "sort_buffer_size {} is below the minimum of {} bytes",
            sort_buffer_size,
            MIN_SORT_MEMORY
        );
        ensure!(
            join_buffer_size >= MIN_JOIN_BUFFER_SIZE,
            "join_buffer_size {} is below the minimum of {} bytes",
            join_buffer_size,
            MIN_JOIN_BUFFER_SIZE
        );
        ensure!(
            div_precision_increment <= MAX_DIV_PRECISION_INCREMENT,
            "div_precision_increment {} exceeds maximum {}",
            div_precision_increment,
            MAX_DIV_PRECISION_INCREMENT
        );
        ensure!(max_sort_length > 0, "max_sort_length must be positive");
        ensure!(
            tmp_dir.is_dir(),
            "temporary directory {:?} does not exist",
            tmp_dir
        );

        let budget = self
            .budget
            .unwrap_or_else(|| Arc::new(MemoryBudget::auto_detect()));

        Ok(SessionOptions {
            sort_buffer_size,
            join_buffer_size,
            max_length_for_sort_data: self
                .max_length_for_sort_data
                .unwrap_or(DEFAULT_MAX_LENGTH_FOR_SORT_DATA),
            max_sort_length,
            div_precision_increment,
            strict_mode: self.strict_mode.unwrap_or(false),
            tmp_dir,
            budget,
            kill: self.kill.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_match_constants() {
        let options = SessionOptions::builder().build().unwrap();
        assert_eq!(options.sort_buffer_size(), MAX_SORT_MEMORY);
        assert_eq!(options.join_buffer_size(), DEFAULT_JOIN_BUFFER_SIZE);
        assert_eq!(
            options.div_precision_increment(),
            DEFAULT_DIV_PRECISION_INCREMENT
        );
        assert!(!options.strict_mode());
    }

    #[test]
    fn builder_rejects_tiny_sort_buffer() {
        let result = SessionOptions::builder().sort_buffer_size(1024).build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_rejects_excessive_div_increment() {
        let result = SessionOptions::builder()
            .div_precision_increment(MAX_DIV_PRECISION_INCREMENT + 1)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_rejects_missing_tmp_dir() {
        let result = SessionOptions::builder()
            .tmp_dir("/definitely/not/a/real/dir")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn kill_switch_is_shared_between_clones() {
        let kill = KillSwitch::new();
        let options = SessionOptions::builder()
            .kill_switch(kill.clone())
            .build()
            .unwrap();

        assert!(options.kill_switch().check().is_ok());
        kill.kill();
        assert_eq!(options.kill_switch().check(), Err(SqlError::Cancelled));

        kill.reset();
        assert!(!options.kill_switch().is_killed());
    }
}
