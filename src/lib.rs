//! Positional crossmatching library.
//!
//! Skymatch pairs up rows of two tables (or of one table with itself) whose
//! positions coincide within a tolerance, and gathers rows of several tables
//! into groups of mutual matches. Positions may be on the sky, with a fixed
//! or per-row angular error or an error ellipse, or in a generic
//! N-dimensional space.
//! Rows are binned through a spherical pixellation or a Cartesian grid,
//! pruned by per-table coverage, sorted by bin with a parallel merge sort
//! and scored pair by pair.

pub mod coverage;
pub mod engine;
pub mod geom;
pub mod healpix;
pub mod htm;
pub mod pairing;
pub mod pixellator;
pub mod sort;
pub mod table;
pub mod tuple;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MatchError>;

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("invalid value {value} for parameter {name}")]
    InvalidParameter { name: String, value: String },

    #[error("incompatible coverages: {0}")]
    CoverageMismatch(String),

    #[error("engine cannot bound matches")]
    BoundsUnsupported,

    #[error("expected {expected} dimensions, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("group matching needs at least two tables, got {0}")]
    TooFewTables(usize),

    #[error("{tables} tables but {join_types} join types")]
    JoinTypeCount { tables: usize, join_types: usize },

    #[error("too many row references to sort: {0}")]
    TooManyRows(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
}

impl MatchError {
    pub(crate) fn invalid_parameter(name: &str, value: impl ToString) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}
