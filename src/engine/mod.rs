//! Match engines: how tuples are binned, scored and bounded.
//!
//! An engine is configured once and then shared read-only between threads.
//! Anything that needs scratch space (pixel traversal stacks, decoded
//! coordinates) lives in a [`MatchKit`] made per thread.

pub mod cartesian;
pub mod ellipse_cartesian;
pub mod ellipse_sky;
pub mod equals;
pub mod error_sky;
pub mod human;
pub mod sky;

pub use cartesian::CartesianMatchEngine;
pub use ellipse_cartesian::EllipseCartesianMatchEngine;
pub use ellipse_sky::EllipseSkyMatchEngine;
pub use equals::EqualsMatchEngine;
pub use error_sky::ErrorSkyMatchEngine;
pub use human::HumanMatchEngine;
pub use sky::SkyMatchEngine;

use crate::coverage::Coverage;
use crate::tuple::{BinKey, DescribedValue, Tuple, ValueInfo};
use crate::{MatchError, Result};

/// Per-thread binning and scoring state of an engine.
pub trait MatchKit {
    /// Keys of every bin the tuple may share with a matching tuple.
    fn bins(&mut self, tuple: &Tuple) -> Vec<BinKey>;

    /// Match score; negative means no match, smaller is better.
    fn match_score(&mut self, a: &Tuple, b: &Tuple) -> f64;
}

pub trait MatchEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Layout of the tuples this engine expects.
    fn tuple_infos(&self) -> Vec<ValueInfo>;

    fn score_info(&self) -> ValueInfo;

    /// Parameters that change which pairs match.
    fn match_parameters(&self) -> Vec<DescribedValue>;

    /// Parameters that only affect performance.
    fn tuning_parameters(&self) -> Vec<DescribedValue> {
        Vec::new()
    }

    /// Change a match or tuning parameter by name.
    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()>;

    fn create_match_kit(&self) -> Box<dyn MatchKit + '_>;

    fn create_coverage(&self) -> Coverage {
        Coverage::Full
    }

    fn can_bound_match(&self) -> bool {
        false
    }

    /// Region of table `index` that could hold matches, given the ranges
    /// of all tables.
    fn match_bounds(&self, _ranges: &[NdRange], _index: usize) -> Result<NdRange> {
        Err(MatchError::BoundsUnsupported)
    }

    fn bins(&self, tuple: &Tuple) -> Vec<BinKey> {
        self.create_match_kit().bins(tuple)
    }

    fn match_score(&self, a: &Tuple, b: &Tuple) -> f64 {
        self.create_match_kit().match_score(a, b)
    }
}

/// Axis-aligned bounds in N dimensions. Starts inverted (empty).
#[derive(Debug, Clone, PartialEq)]
pub struct NdRange {
    mins: Vec<f64>,
    maxs: Vec<f64>,
}

impl NdRange {
    pub fn empty(ndim: usize) -> Self {
        Self {
            mins: vec![f64::INFINITY; ndim],
            maxs: vec![f64::NEG_INFINITY; ndim],
        }
    }

    pub fn new(mins: Vec<f64>, maxs: Vec<f64>) -> Result<Self> {
        if mins.len() != maxs.len() {
            return Err(MatchError::DimensionMismatch {
                expected: mins.len(),
                actual: maxs.len(),
            });
        }
        Ok(Self { mins, maxs })
    }

    pub fn ndim(&self) -> usize {
        self.mins.len()
    }

    pub fn mins(&self) -> &[f64] {
        &self.mins
    }

    pub fn maxs(&self) -> &[f64] {
        &self.maxs
    }

    pub fn is_empty(&self) -> bool {
        self.mins.iter().zip(&self.maxs).any(|(lo, hi)| !(lo <= hi))
    }

    /// Grow to include `point`. Non-finite coordinates are ignored.
    pub fn extend(&mut self, point: &[f64]) {
        for ((lo, hi), &x) in self.mins.iter_mut().zip(self.maxs.iter_mut()).zip(point) {
            if x.is_finite() {
                *lo = lo.min(x);
                *hi = hi.max(x);
            }
        }
    }

    pub fn contains(&self, point: &[f64]) -> bool {
        point.len() == self.ndim()
            && point
                .iter()
                .zip(self.mins.iter().zip(&self.maxs))
                .all(|(x, (lo, hi))| lo <= x && x <= hi)
    }

    pub fn intersection(&self, other: &NdRange) -> Result<NdRange> {
        self.check_ndim(other.ndim())?;
        Ok(NdRange {
            mins: self.mins.iter().zip(&other.mins).map(|(a, b)| a.max(*b)).collect(),
            maxs: self.maxs.iter().zip(&other.maxs).map(|(a, b)| a.min(*b)).collect(),
        })
    }

    /// Smallest range holding both.
    pub fn union(&self, other: &NdRange) -> Result<NdRange> {
        self.check_ndim(other.ndim())?;
        Ok(NdRange {
            mins: self.mins.iter().zip(&other.mins).map(|(a, b)| a.min(*b)).collect(),
            maxs: self.maxs.iter().zip(&other.maxs).map(|(a, b)| a.max(*b)).collect(),
        })
    }

    /// Range grown by `margins` on every side.
    pub fn widen(&self, margins: &[f64]) -> Result<NdRange> {
        self.check_ndim(margins.len())?;
        Ok(NdRange {
            mins: self.mins.iter().zip(margins).map(|(x, m)| x - m).collect(),
            maxs: self.maxs.iter().zip(margins).map(|(x, m)| x + m).collect(),
        })
    }

    fn check_ndim(&self, ndim: usize) -> Result<()> {
        if ndim == self.ndim() {
            Ok(())
        } else {
            Err(MatchError::DimensionMismatch {
                expected: self.ndim(),
                actual: ndim,
            })
        }
    }
}

/// The built-in engines.
#[derive(Debug, Clone)]
pub enum Engine {
    Equals(EqualsMatchEngine),
    Sky(SkyMatchEngine),
    ErrorSky(ErrorSkyMatchEngine),
    Cartesian(CartesianMatchEngine),
    EllipseSky(EllipseSkyMatchEngine),
    EllipseCartesian(EllipseCartesianMatchEngine),
}

impl Engine {
    fn inner(&self) -> &dyn MatchEngine {
        match self {
            Engine::Equals(e) => e,
            Engine::Sky(e) => e,
            Engine::ErrorSky(e) => e,
            Engine::Cartesian(e) => e,
            Engine::EllipseSky(e) => e,
            Engine::EllipseCartesian(e) => e,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn MatchEngine {
        match self {
            Engine::Equals(e) => e,
            Engine::Sky(e) => e,
            Engine::ErrorSky(e) => e,
            Engine::Cartesian(e) => e,
            Engine::EllipseSky(e) => e,
            Engine::EllipseCartesian(e) => e,
        }
    }
}

impl MatchEngine for Engine {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn tuple_infos(&self) -> Vec<ValueInfo> {
        self.inner().tuple_infos()
    }

    fn score_info(&self) -> ValueInfo {
        self.inner().score_info()
    }

    fn match_parameters(&self) -> Vec<DescribedValue> {
        self.inner().match_parameters()
    }

    fn tuning_parameters(&self) -> Vec<DescribedValue> {
        self.inner().tuning_parameters()
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        self.inner_mut().set_parameter(name, value)
    }

    fn create_match_kit(&self) -> Box<dyn MatchKit + '_> {
        self.inner().create_match_kit()
    }

    fn create_coverage(&self) -> Coverage {
        self.inner().create_coverage()
    }

    fn can_bound_match(&self) -> bool {
        self.inner().can_bound_match()
    }

    fn match_bounds(&self, ranges: &[NdRange], index: usize) -> Result<NdRange> {
        self.inner().match_bounds(ranges, index)
    }
}

impl From<EqualsMatchEngine> for Engine {
    fn from(e: EqualsMatchEngine) -> Self {
        Engine::Equals(e)
    }
}

impl From<SkyMatchEngine> for Engine {
    fn from(e: SkyMatchEngine) -> Self {
        Engine::Sky(e)
    }
}

impl From<ErrorSkyMatchEngine> for Engine {
    fn from(e: ErrorSkyMatchEngine) -> Self {
        Engine::ErrorSky(e)
    }
}

impl From<CartesianMatchEngine> for Engine {
    fn from(e: CartesianMatchEngine) -> Self {
        Engine::Cartesian(e)
    }
}

impl From<EllipseSkyMatchEngine> for Engine {
    fn from(e: EllipseSkyMatchEngine) -> Self {
        Engine::EllipseSky(e)
    }
}

impl From<EllipseCartesianMatchEngine> for Engine {
    fn from(e: EllipseCartesianMatchEngine) -> Self {
        Engine::EllipseCartesian(e)
    }
}

/// Parse a parameter value that must be finite and non-negative.
pub(crate) fn non_negative(name: &str, value: f64) -> Result<f64> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(MatchError::invalid_parameter(name, value))
    }
}

/// Parse a parameter value that must be finite and positive.
pub(crate) fn positive(name: &str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(MatchError::invalid_parameter(name, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixellator::SkyPixellator;

    #[test]
    fn nd_range_basics() {
        let mut r = NdRange::empty(2);
        assert!(r.is_empty());
        r.extend(&[1.0, 2.0]);
        r.extend(&[3.0, f64::NAN]);
        assert_eq!(r.mins(), &[1.0, 2.0]);
        assert_eq!(r.maxs(), &[3.0, 2.0]);
        assert!(r.contains(&[2.0, 2.0]));
        assert!(!r.contains(&[2.0, 2.1]));
        let w = r.widen(&[0.5, 0.5]).unwrap();
        assert!(w.contains(&[3.5, 1.5]));
        assert!(r.widen(&[1.0]).is_err());
    }

    #[test]
    fn nd_range_disjoint_intersection() {
        let a = NdRange::new(vec![0.0], vec![1.0]).unwrap();
        let b = NdRange::new(vec![2.0], vec![3.0]).unwrap();
        assert!(a.intersection(&b).unwrap().is_empty());
        assert!(NdRange::new(vec![0.0], vec![]).is_err());
    }

    #[test]
    fn nd_range_union() {
        let a = NdRange::new(vec![0.0, 5.0], vec![1.0, 6.0]).unwrap();
        let b = NdRange::new(vec![2.0, -1.0], vec![3.0, 0.0]).unwrap();
        let u = a.union(&b).unwrap();
        assert_eq!(u.mins(), &[0.0, -1.0]);
        assert_eq!(u.maxs(), &[3.0, 6.0]);
        assert_eq!(NdRange::empty(2).union(&a).unwrap(), a);
        assert!(a.union(&NdRange::empty(3)).is_err());
    }

    #[test]
    fn enum_dispatch() {
        let mut engine = Engine::from(SkyMatchEngine::new(SkyPixellator::healpix(), 1e-4));
        assert_eq!(engine.name(), "Sky");
        assert_eq!(engine.tuple_infos().len(), 2);
        assert!(!engine.can_bound_match());
        assert!(matches!(
            engine.match_bounds(&[], 0),
            Err(MatchError::BoundsUnsupported)
        ));
        engine.set_parameter("Max Error", 2e-4).unwrap();
        assert!(matches!(
            engine.set_parameter("Nope", 1.0),
            Err(MatchError::UnknownParameter(_))
        ));
        let a = Tuple::from_f64s(&[1.0, 0.5]);
        assert_eq!(engine.match_score(&a, &a), 0.0);

        let ellipses = Engine::from(EllipseCartesianMatchEngine::new(1.0).unwrap());
        assert_eq!(ellipses.tuple_infos().len(), 5);
        let e = Tuple::from_f64s(&[0.0, 0.0, 1.0, 0.5, 0.0]);
        assert_eq!(ellipses.match_score(&e, &e), 0.0);
        let sky = Engine::from(EllipseSkyMatchEngine::new(SkyPixellator::htm(), 1e-4));
        assert_eq!(sky.tuple_infos().len(), 5);
    }

    #[test]
    fn parameter_checks() {
        assert!(non_negative("x", 0.0).is_ok());
        assert!(non_negative("x", -1.0).is_err());
        assert!(positive("x", 0.0).is_err());
        assert!(positive("x", f64::NAN).is_err());
    }
}
