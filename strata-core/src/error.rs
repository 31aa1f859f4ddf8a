//! Error types for the strata core library.
//!
//! Defines the error enum exposed by the public API, a stable machine-readable
//! code per variant, and a convenient result alias.

use std::{fmt, io, path::PathBuf};

use thiserror::Error;

/// Stable codes describing [`StrataError`] variants.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum StrataErrorCode {
    /// An option value was invalid or two options were incompatible.
    Config,
    /// A payload or header line of an input file could not be decoded.
    InputFormat,
    /// A link referred to a nonexistent node, or an id was reused where
    /// uniqueness is required.
    Reference,
    /// A structural invariant of the graph or hierarchy was violated.
    Invariant,
    /// An accumulator or id space exceeded its bit budget.
    Overflow,
    /// A file could not be opened, read, or written.
    Io,
}

impl StrataErrorCode {
    /// Return the stable machine-readable representation of this error code.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Config => "STRATA_CONFIG",
            Self::InputFormat => "STRATA_INPUT_FORMAT",
            Self::Reference => "STRATA_REFERENCE",
            Self::Invariant => "STRATA_INVARIANT",
            Self::Overflow => "STRATA_OVERFLOW",
            Self::Io => "STRATA_IO",
        }
    }
}

impl fmt::Display for StrataErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type produced by graph ingestion, clustering, and output selection.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StrataError {
    /// An option value was invalid or two options were incompatible.
    #[error("invalid configuration: {reason}")]
    Config {
        /// Human-readable description of the offending option.
        reason: String,
    },
    /// A payload or header line of an input file could not be decoded.
    #[error("malformed input in `{path}` at line {line}: {reason}")]
    InputFormat {
        /// File that contained the malformed line.
        path: PathBuf,
        /// 1-based line number of the failure.
        line: u64,
        /// What was expected at this position.
        reason: String,
    },
    /// A link referred to a nonexistent node.
    #[error("link refers to nonexistent node #{id}")]
    Reference {
        /// The id that could not be resolved.
        id: u32,
    },
    /// A structural invariant of the graph or hierarchy was violated.
    #[error("invariant violated: {reason}")]
    Invariant {
        /// Which invariant failed.
        reason: String,
    },
    /// An accumulator or id space exceeded its bit budget.
    #[error("overflow: {reason}")]
    Overflow {
        /// Which budget was exceeded.
        reason: String,
    },
    /// A file could not be opened, read, or written.
    #[error("i/o failure on `{path}`: {source}")]
    Io {
        /// Path that triggered the failure.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
}

impl StrataError {
    /// Retrieve the stable [`StrataErrorCode`] for this error.
    pub const fn code(&self) -> StrataErrorCode {
        match self {
            Self::Config { .. } => StrataErrorCode::Config,
            Self::InputFormat { .. } => StrataErrorCode::InputFormat,
            Self::Reference { .. } => StrataErrorCode::Reference,
            Self::Invariant { .. } => StrataErrorCode::Invariant,
            Self::Overflow { .. } => StrataErrorCode::Overflow,
            Self::Io { .. } => StrataErrorCode::Io,
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub(crate) fn invariant(reason: impl Into<String>) -> Self {
        Self::Invariant {
            reason: reason.into(),
        }
    }

    pub(crate) fn overflow(reason: impl Into<String>) -> Self {
        Self::Overflow {
            reason: reason.into(),
        }
    }
}

/// Convenient alias for results returned by the core API.
pub type Result<T> = core::result::Result<T, StrataError>;
