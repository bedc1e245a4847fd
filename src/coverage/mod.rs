//! Conservative per-table coverage used to prune rows before pairing.
//!
//! A [`Coverage`] is built by streaming one table's tuples through
//! [`Coverage::extend`], optionally combined with another table's coverage,
//! and then frozen. The [`FrozenCoverage`] is shared read-only between
//! threads; each thread takes its own [`CoverageTest`].

pub mod bitset;
pub mod cuboid;
pub mod sky;

pub use bitset::BitsetMask;
pub use cuboid::{
    CoordsDecoder, CuboidCoverage, CuboidCoverageTest, FrozenCuboidCoverage, MarginDecoder,
};
pub use sky::{
    ConeDecoder, FrozenSkyCoverage, MAX_COVERAGE_DEPTH, PositionDecoder, SkyCone, SkyCoverage,
    SkyCoverageTest,
};

use std::sync::Arc;

use crate::tuple::Tuple;
use crate::{MatchError, Result};

/// Rewrites a tuple before a coverage decodes it, e.g. to change units.
pub type TupleAdapter = Arc<dyn Fn(&Tuple) -> Tuple + Send + Sync>;

/// Builder phase of a coverage.
#[derive(Debug, Clone)]
pub enum Coverage {
    /// Accepts everything; no pruning is possible.
    Full,
    Sky(SkyCoverage),
    Cuboid(CuboidCoverage),
}

impl Coverage {
    pub fn is_empty(&self) -> bool {
        match self {
            Coverage::Full => false,
            Coverage::Sky(c) => c.is_empty(),
            Coverage::Cuboid(c) => c.is_empty(),
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Coverage::Full)
    }

    pub fn extend(&mut self, tuple: &Tuple) {
        match self {
            Coverage::Full => {}
            Coverage::Sky(c) => c.extend(tuple),
            Coverage::Cuboid(c) => c.extend(tuple),
        }
    }

    /// In-place union. `Full` absorbs.
    pub fn union(&mut self, other: &Coverage) -> Result<()> {
        if other.is_full() {
            *self = Coverage::Full;
            return Ok(());
        }
        match (self, other) {
            (Coverage::Full, _) => Ok(()),
            (Coverage::Sky(a), Coverage::Sky(b)) => a.union(b),
            (Coverage::Cuboid(a), Coverage::Cuboid(b)) => a.union(b),
            (a, b) => Err(mismatch(a, b)),
        }
    }

    /// In-place intersection. `Full` is the identity.
    pub fn intersection(&mut self, other: &Coverage) -> Result<()> {
        if self.is_full() {
            *self = other.clone();
            return Ok(());
        }
        match (self, other) {
            (_, Coverage::Full) => Ok(()),
            (Coverage::Sky(a), Coverage::Sky(b)) => a.intersection(b),
            (Coverage::Cuboid(a), Coverage::Cuboid(b)) => a.intersection(b),
            (a, b) => Err(mismatch(a, b)),
        }
    }

    pub fn coverage_text(&self) -> String {
        match self {
            Coverage::Full => "full".to_string(),
            Coverage::Sky(c) => c.coverage_text(),
            Coverage::Cuboid(c) => c.coverage_text(),
        }
    }

    /// Pass every tuple through `adapter` before decoding it.
    pub fn with_tuple_adapter(self, adapter: TupleAdapter) -> Coverage {
        match self {
            Coverage::Full => Coverage::Full,
            Coverage::Sky(c) => Coverage::Sky(c.with_tuple_adapter(adapter)),
            Coverage::Cuboid(c) => Coverage::Cuboid(c.with_tuple_adapter(adapter)),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Coverage::Full => "full",
            Coverage::Sky(_) => "sky",
            Coverage::Cuboid(_) => "cuboid",
        }
    }

    pub fn freeze(self) -> FrozenCoverage {
        match self {
            Coverage::Full => FrozenCoverage::Full,
            Coverage::Sky(c) => FrozenCoverage::Sky(c.freeze()),
            Coverage::Cuboid(c) => FrozenCoverage::Cuboid(c.freeze()),
        }
    }
}

fn mismatch(a: &Coverage, b: &Coverage) -> MatchError {
    MatchError::CoverageMismatch(format!("{} and {}", a.kind(), b.kind()))
}

/// Read-only coverage snapshot.
#[derive(Debug, Clone)]
pub enum FrozenCoverage {
    Full,
    Sky(FrozenSkyCoverage),
    Cuboid(FrozenCuboidCoverage),
}

impl FrozenCoverage {
    /// A new inclusion test for use on the calling thread.
    pub fn create_test(&self) -> CoverageTest<'_> {
        match self {
            FrozenCoverage::Full => CoverageTest::Full,
            FrozenCoverage::Sky(c) => CoverageTest::Sky(c.create_test()),
            FrozenCoverage::Cuboid(c) => CoverageTest::Cuboid(c.create_test()),
        }
    }
}

/// Thread-confined predicate rejecting tuples outside a coverage.
#[derive(Debug)]
pub enum CoverageTest<'a> {
    Full,
    Sky(SkyCoverageTest<'a>),
    Cuboid(CuboidCoverageTest<'a>),
}

impl CoverageTest<'_> {
    pub fn test(&mut self, tuple: &Tuple) -> bool {
        match self {
            CoverageTest::Full => true,
            CoverageTest::Sky(t) => t.test(tuple),
            CoverageTest::Cuboid(t) => t.test(tuple),
        }
    }
}
