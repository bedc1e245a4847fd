//! Axis-aligned box coverage for N-dimensional coordinates.

use std::fmt;
use std::sync::Arc;

use super::TupleAdapter;
use crate::tuple::Tuple;
use crate::{MatchError, Result};

/// Writes a tuple's coordinates into the slice; false if they cannot be read.
pub type CoordsDecoder = Arc<dyn Fn(&Tuple, &mut [f64]) -> bool + Send + Sync>;

/// Per-row margin used on every axis in place of the fixed margins.
pub type MarginDecoder = Arc<dyn Fn(&Tuple) -> f64 + Send + Sync>;

/// Builder phase of a box coverage.
///
/// Each extended position contributes the box `[x - m, x + m]` where `m` is
/// the per-axis margin, or the row's own margin for a variable coverage.
#[derive(Clone)]
pub struct CuboidCoverage {
    margins: Box<[f64]>,
    row_margin: Option<MarginDecoder>,
    mins: Box<[f64]>,
    maxs: Box<[f64]>,
    decoder: CoordsDecoder,
    scratch: Box<[f64]>,
}

impl CuboidCoverage {
    pub fn isotropic(ndim: usize, margin: f64, decoder: CoordsDecoder) -> Self {
        Self::anisotropic(vec![margin; ndim], decoder)
    }

    pub fn anisotropic(margins: Vec<f64>, decoder: CoordsDecoder) -> Self {
        let ndim = margins.len();
        Self {
            margins: margins.into_boxed_slice(),
            row_margin: None,
            mins: vec![f64::INFINITY; ndim].into_boxed_slice(),
            maxs: vec![f64::NEG_INFINITY; ndim].into_boxed_slice(),
            decoder,
            scratch: vec![0.0; ndim].into_boxed_slice(),
        }
    }

    /// Coverage whose boxes are sized per row by `margin`.
    pub fn variable_error(ndim: usize, decoder: CoordsDecoder, margin: MarginDecoder) -> Self {
        let mut cov = Self::isotropic(ndim, 0.0, decoder);
        cov.row_margin = Some(margin);
        cov
    }

    pub fn ndim(&self) -> usize {
        self.margins.len()
    }

    /// Decode tuples only after passing them through `adapter`.
    pub fn with_tuple_adapter(mut self, adapter: TupleAdapter) -> Self {
        let decoder = self.decoder;
        if let Some(margin) = self.row_margin.take() {
            let adapter = adapter.clone();
            self.row_margin = Some(Arc::new(move |t: &Tuple| margin(&adapter(t))));
        }
        self.decoder = Arc::new(move |t: &Tuple, out: &mut [f64]| decoder(&adapter(t), out));
        self
    }

    pub fn mins(&self) -> &[f64] {
        &self.mins
    }

    pub fn maxs(&self) -> &[f64] {
        &self.maxs
    }

    pub fn is_empty(&self) -> bool {
        is_inverted(&self.mins, &self.maxs)
    }

    pub fn extend(&mut self, tuple: &Tuple) {
        if !(self.decoder)(tuple, &mut self.scratch) || !self.scratch.iter().all(|x| x.is_finite())
        {
            return;
        }
        // NaN margins count as zero.
        let row = self.row_margin.as_ref().map(|m| m(tuple).max(0.0));
        for i in 0..self.margins.len() {
            let x = self.scratch[i];
            let m = row.unwrap_or(self.margins[i]);
            self.mins[i] = self.mins[i].min(x - m);
            self.maxs[i] = self.maxs[i].max(x + m);
        }
    }

    pub fn union(&mut self, other: &CuboidCoverage) -> Result<()> {
        self.check_ndim(other)?;
        for i in 0..self.mins.len() {
            self.mins[i] = self.mins[i].min(other.mins[i]);
            self.maxs[i] = self.maxs[i].max(other.maxs[i]);
        }
        Ok(())
    }

    pub fn intersection(&mut self, other: &CuboidCoverage) -> Result<()> {
        self.check_ndim(other)?;
        for i in 0..self.mins.len() {
            self.mins[i] = self.mins[i].max(other.mins[i]);
            self.maxs[i] = self.maxs[i].min(other.maxs[i]);
        }
        if self.is_empty() {
            self.mins.fill(f64::INFINITY);
            self.maxs.fill(f64::NEG_INFINITY);
        }
        Ok(())
    }

    fn check_ndim(&self, other: &CuboidCoverage) -> Result<()> {
        if self.ndim() == other.ndim() {
            Ok(())
        } else {
            Err(MatchError::CoverageMismatch(format!(
                "{}-d and {}-d boxes",
                self.ndim(),
                other.ndim()
            )))
        }
    }

    pub fn coverage_text(&self) -> String {
        if self.is_empty() {
            return "empty box".to_string();
        }
        let axes: Vec<String> = self
            .mins
            .iter()
            .zip(self.maxs.iter())
            .map(|(lo, hi)| format!("[{lo}, {hi}]"))
            .collect();
        axes.join(" x ")
    }

    pub fn freeze(self) -> FrozenCuboidCoverage {
        FrozenCuboidCoverage {
            empty: self.is_empty(),
            margins: self.margins,
            row_margin: self.row_margin,
            mins: self.mins,
            maxs: self.maxs,
            decoder: self.decoder,
        }
    }
}

fn is_inverted(mins: &[f64], maxs: &[f64]) -> bool {
    mins.iter().zip(maxs).any(|(lo, hi)| !(lo <= hi))
}

impl fmt::Debug for CuboidCoverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CuboidCoverage")
            .field("margins", &self.margins)
            .field("mins", &self.mins)
            .field("maxs", &self.maxs)
            .finish_non_exhaustive()
    }
}

/// Read-only box coverage, shareable across threads.
#[derive(Clone)]
pub struct FrozenCuboidCoverage {
    empty: bool,
    margins: Box<[f64]>,
    row_margin: Option<MarginDecoder>,
    mins: Box<[f64]>,
    maxs: Box<[f64]>,
    decoder: CoordsDecoder,
}

impl FrozenCuboidCoverage {
    pub fn create_test(&self) -> CuboidCoverageTest<'_> {
        CuboidCoverageTest {
            coverage: self,
            scratch: vec![0.0; self.margins.len()],
        }
    }
}

impl fmt::Debug for FrozenCuboidCoverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrozenCuboidCoverage")
            .field("mins", &self.mins)
            .field("maxs", &self.maxs)
            .finish_non_exhaustive()
    }
}

/// Thread-confined inclusion test against a frozen box.
#[derive(Debug)]
pub struct CuboidCoverageTest<'a> {
    coverage: &'a FrozenCuboidCoverage,
    scratch: Vec<f64>,
}

impl CuboidCoverageTest<'_> {
    /// Whether the tuple's margin box overlaps the covered box.
    pub fn test(&mut self, tuple: &Tuple) -> bool {
        let cov = self.coverage;
        if cov.empty || !(cov.decoder)(tuple, &mut self.scratch) {
            return false;
        }
        let row = cov.row_margin.as_ref().map(|m| m(tuple).max(0.0));
        self.scratch.iter().enumerate().all(|(i, &x)| {
            let m = row.unwrap_or(cov.margins[i]);
            x - m <= cov.maxs[i] && x + m >= cov.mins[i]
        })
    }
}
