//! # SQL Conditions and Diagnostics
//!
//! [`SqlError`] is the typed taxonomy of conditions raised by the execution
//! core. Field stores, decimal arithmetic and the sort engine return it
//! directly or wrapped in an `eyre::Report`, from which callers recover it
//! with `downcast_ref::<SqlError>()`.
//!
//! [`Diagnostics`] is the per-statement warning queue. It decides whether a
//! recoverable condition becomes a warning (the substituted value stays in
//! the row) or aborts the statement:
//!
//! | Condition          | non-strict       | strict |
//! |--------------------|------------------|--------|
//! | InvalidValueForType| warning          | error  |
//! | Truncated          | warning          | error  |
//! | OutOfRange         | warning          | error  |
//! | DivideByZero       | warning (NULL)   | error  |
//! | ResourceExhausted  | error            | error  |
//! | Cancelled          | error            | error  |

use thiserror::Error;

/// Convenience alias for operations that only raise SQL conditions.
pub type SqlResult<T> = std::result::Result<T, SqlError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SqlError {
    #[error("incorrect {type_name} value: '{value}' for column '{field}'")]
    InvalidValueForType {
        type_name: &'static str,
        field: String,
        value: String,
    },

    #[error("division by zero")]
    DivideByZero,

    #[error("data truncated for column '{field}'")]
    Truncated { field: String },

    #[error("out of range value for column '{field}'")]
    OutOfRange { field: String },

    #[error("resource exhausted: {resource}: {detail}")]
    ResourceExhausted {
        resource: &'static str,
        detail: String,
    },

    #[error("query execution was interrupted")]
    Cancelled,
}

impl SqlError {
    pub fn invalid_value(type_name: &'static str, field: &str, value: impl Into<String>) -> Self {
        SqlError::InvalidValueForType {
            type_name,
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn truncated(field: &str) -> Self {
        SqlError::Truncated {
            field: field.to_string(),
        }
    }

    pub fn out_of_range(field: &str) -> Self {
        SqlError::OutOfRange {
            field: field.to_string(),
        }
    }

    pub fn resource_exhausted(resource: &'static str, detail: impl ToString) -> Self {
        SqlError::ResourceExhausted {
            resource,
            detail: detail.to_string(),
        }
    }

    /// True for conditions that may be downgraded to a warning.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SqlError::InvalidValueForType { .. }
                | SqlError::Truncated { .. }
                | SqlError::OutOfRange { .. }
                | SqlError::DivideByZero
        )
    }

    /// MySQL-compatible error number, for result-set serializers.
    pub fn code(&self) -> u16 {
        match self {
            SqlError::InvalidValueForType { .. } => 1366,
            SqlError::DivideByZero => 1365,
            SqlError::Truncated { .. } => 1265,
            SqlError::OutOfRange { .. } => 1264,
            SqlError::ResourceExhausted { .. } => 1038,
            SqlError::Cancelled => 1317,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WarnLevel {
    Note,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub level: WarnLevel,
    pub condition: SqlError,
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} {}: {}",
            self.level,
            self.condition.code(),
            self.condition
        )
    }
}

/// Warning queue and strict-mode policy for one statement.
#[derive(Debug, Default)]
pub struct Diagnostics {
    strict: bool,
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            warnings: Vec::new(),
        }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Applies the propagation policy to the outcome of a store or an
    /// arithmetic step. Recoverable conditions are queued unless strict.
    pub fn check(&mut self, outcome: SqlResult<()>) -> SqlResult<()> {
        match outcome {
            Ok(()) => Ok(()),
            Err(err) => self.raise(err),
        }
    }

    pub fn raise(&mut self, err: SqlError) -> SqlResult<()> {
        if self.strict || !err.is_recoverable() {
            self.warnings.push(Warning {
                level: WarnLevel::Error,
                condition: err.clone(),
            });
            return Err(err);
        }
        self.warnings.push(Warning {
            level: WarnLevel::Warning,
            condition: err,
        });
        Ok(())
    }

    pub fn note(&mut self, condition: SqlError) {
        self.warnings.push(Warning {
            level: WarnLevel::Note,
            condition,
        });
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn warning_count(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| w.level >= WarnLevel::Warning)
            .count()
    }

    /// Drops queued warnings at the start of a new statement.
    pub fn clear(&mut self) {
        self.warnings.clear();
    }
}
