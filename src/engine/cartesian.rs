//! Fixed-tolerance matching of points in N-dimensional Cartesian space.

use std::sync::Arc;

use super::{MatchEngine, MatchKit, NdRange, non_negative};
use crate::coverage::{CoordsDecoder, Coverage, CuboidCoverage};
use crate::tuple::{BinKey, DescribedValue, Tuple, ValueInfo, ValueKind};
use crate::{MatchError, Result};

const ERROR: &str = "Error";
const BIN_FACTOR: &str = "Bin Factor";
/// Smallest bin factor; caps the cells per axis at eleven.
const MIN_BIN_FACTOR: f64 = 0.1;

/// Matches points in N-dimensional space within an ellipsoidal tolerance.
///
/// Two points match when `sum((dx_i / e_i)^2) <= 1`, and the score is the
/// square root of that sum. Points are binned on a grid whose cells are
/// `e_i * bin_factor` wide; each point lands in every cell touched by its
/// half-error box.
///
/// An axis with zero error only matches exactly equal coordinates. It
/// contributes nothing to the score and is binned on the coordinate's bits.
#[derive(Debug, Clone)]
pub struct CartesianMatchEngine {
    errors: Vec<f64>,
    isotropic: bool,
    bin_factor: f64,
}

impl CartesianMatchEngine {
    /// One error shared by all `ndim` axes. The error must be finite and
    /// not negative.
    pub fn isotropic(ndim: usize, error: f64) -> Result<Self> {
        let error = non_negative(ERROR, error)?;
        Ok(Self {
            errors: vec![error; ndim],
            isotropic: true,
            bin_factor: 1.0,
        })
    }

    /// One error per axis.
    pub fn anisotropic(errors: Vec<f64>) -> Result<Self> {
        for (i, &e) in errors.iter().enumerate() {
            non_negative(&format!("{ERROR} {}", i + 1), e)?;
        }
        Ok(Self {
            errors,
            isotropic: false,
            bin_factor: 1.0,
        })
    }

    pub fn ndim(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[f64] {
        &self.errors
    }

    pub fn bin_factor(&self) -> f64 {
        self.bin_factor
    }

    fn error_name(&self, i: usize) -> String {
        if self.isotropic {
            ERROR.to_string()
        } else {
            format!("{ERROR} {}", i + 1)
        }
    }

    fn error_info(&self, name: String) -> ValueInfo {
        ValueInfo::new(name, ValueKind::Number).with_description("Maximum separation along an axis")
    }
}

impl MatchEngine for CartesianMatchEngine {
    fn name(&self) -> &str {
        if self.isotropic {
            "N-dimensional Cartesian"
        } else {
            "N-dimensional Anisotropic Cartesian"
        }
    }

    fn tuple_infos(&self) -> Vec<ValueInfo> {
        (1..=self.ndim())
            .map(|i| {
                ValueInfo::new(format!("Coord {i}"), ValueKind::Number)
                    .with_description(format!("Cartesian coordinate {i}"))
            })
            .collect()
    }

    fn score_info(&self) -> ValueInfo {
        ValueInfo::new("Separation", ValueKind::Number)
            .with_description("Distance in units of the error, 0 to 1")
    }

    fn match_parameters(&self) -> Vec<DescribedValue> {
        if self.isotropic {
            let e = self.errors.first().copied().unwrap_or(0.0);
            vec![DescribedValue::new(self.error_info(ERROR.to_string()), e)]
        } else {
            self.errors
                .iter()
                .enumerate()
                .map(|(i, &e)| DescribedValue::new(self.error_info(self.error_name(i)), e))
                .collect()
        }
    }

    fn tuning_parameters(&self) -> Vec<DescribedValue> {
        let info = ValueInfo::new(BIN_FACTOR, ValueKind::Number)
            .with_description("Grid cell width as a multiple of the error");
        vec![DescribedValue::new(info, self.bin_factor)]
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        if name == BIN_FACTOR {
            if !(value >= MIN_BIN_FACTOR) || !value.is_finite() {
                return Err(MatchError::invalid_parameter(name, value));
            }
            self.bin_factor = value;
            return Ok(());
        }
        if self.isotropic && name == ERROR {
            let v = non_negative(name, value)?;
            self.errors.fill(v);
            return Ok(());
        }
        if !self.isotropic {
            for i in 0..self.errors.len() {
                if self.error_name(i) == name {
                    self.errors[i] = non_negative(name, value)?;
                    return Ok(());
                }
            }
        }
        Err(MatchError::UnknownParameter(name.to_string()))
    }

    fn create_match_kit(&self) -> Box<dyn MatchKit + '_> {
        Box::new(CartesianKit {
            engine: self,
            a: vec![0.0; self.ndim()],
            b: vec![0.0; self.ndim()],
        })
    }

    fn create_coverage(&self) -> Coverage {
        let decoder: CoordsDecoder = Arc::new(|t: &Tuple, out: &mut [f64]| t.finite_f64s_into(out));
        let margins = self.errors.iter().map(|e| 0.5 * e).collect();
        Coverage::Cuboid(CuboidCoverage::anisotropic(margins, decoder))
    }

    fn can_bound_match(&self) -> bool {
        true
    }

    fn match_bounds(&self, ranges: &[NdRange], index: usize) -> Result<NdRange> {
        let own = ranges
            .get(index)
            .ok_or_else(|| MatchError::invalid_parameter("table index", index))?;
        if own.ndim() != self.ndim() {
            return Err(MatchError::DimensionMismatch {
                expected: self.ndim(),
                actual: own.ndim(),
            });
        }
        let mut bounds = own.clone();
        for (j, other) in ranges.iter().enumerate() {
            if j != index {
                bounds = bounds.intersection(&other.widen(&self.errors)?)?;
            }
        }
        Ok(bounds)
    }
}

struct CartesianKit<'a> {
    engine: &'a CartesianMatchEngine,
    a: Vec<f64>,
    b: Vec<f64>,
}

impl MatchKit for CartesianKit<'_> {
    fn bins(&mut self, tuple: &Tuple) -> Vec<BinKey> {
        if !tuple.finite_f64s_into(&mut self.a) {
            return Vec::new();
        }
        let factor = self.engine.bin_factor;
        let mut cells: Vec<Vec<i64>> = vec![Vec::with_capacity(self.a.len())];
        for (&x, &e) in self.a.iter().zip(&self.engine.errors) {
            let (lo, hi) = if e > 0.0 {
                let width = e * factor;
                (
                    ((x - 0.5 * e) / width).floor() as i64,
                    ((x + 0.5 * e) / width).floor() as i64,
                )
            } else {
                // -0.0 and 0.0 compare equal, so they must share a cell.
                let bits = (x + 0.0).to_bits() as i64;
                (bits, bits)
            };
            let mut next = Vec::with_capacity(cells.len() * (hi - lo + 1) as usize);
            for cell in &cells {
                for c in lo..=hi {
                    let mut extended = cell.clone();
                    extended.push(c);
                    next.push(extended);
                }
            }
            cells = next;
        }
        cells
            .into_iter()
            .map(|c| BinKey::Cell(c.into_boxed_slice()))
            .collect()
    }

    fn match_score(&mut self, a: &Tuple, b: &Tuple) -> f64 {
        if !a.finite_f64s_into(&mut self.a) || !b.finite_f64s_into(&mut self.b) {
            return -1.0;
        }
        let mut sum = 0.0;
        for ((x, y), &e) in self.a.iter().zip(&self.b).zip(&self.engine.errors) {
            if e == 0.0 {
                if x != y {
                    return -1.0;
                }
                continue;
            }
            let d = (x - y) / e;
            sum += d * d;
            if sum > 1.0 {
                return -1.0;
            }
        }
        sum.sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xorshift(state: &mut u64) -> f64 {
        *state ^= *state << 13;
        *state ^= *state >> 7;
        *state ^= *state << 17;
        (*state as f64) / (u64::MAX as f64)
    }

    #[test]
    fn isotropic_score() {
        let engine = CartesianMatchEngine::isotropic(2, 1.0).unwrap();
        let a = Tuple::from_f64s(&[0.0, 0.0]);
        assert_eq!(engine.match_score(&a, &Tuple::from_f64s(&[0.0, 1.0])), 1.0);
        assert!((engine.match_score(&a, &Tuple::from_f64s(&[0.3, 0.4])) - 0.5).abs() < 1e-12);
        assert!(engine.match_score(&a, &Tuple::from_f64s(&[0.8, 0.8])) < 0.0);
    }

    #[test]
    fn anisotropic_axes_scale_independently() {
        let engine = CartesianMatchEngine::anisotropic(vec![1.0, 10.0]).unwrap();
        let a = Tuple::from_f64s(&[0.0, 0.0]);
        assert!(engine.match_score(&a, &Tuple::from_f64s(&[0.0, 9.0])) >= 0.0);
        assert!(engine.match_score(&a, &Tuple::from_f64s(&[2.0, 0.0])) < 0.0);
    }

    #[test]
    fn matching_points_share_a_cell() {
        let mut state = 17_u64;
        for factor in [0.5, 1.0, 3.0] {
            let mut engine = CartesianMatchEngine::anisotropic(vec![0.5, 2.0, 1.0]).unwrap();
            engine.set_parameter("Bin Factor", factor).unwrap();
            let mut kit = engine.create_match_kit();
            for _ in 0..500 {
                let p: Vec<f64> = (0..3).map(|_| 20.0 * xorshift(&mut state) - 10.0).collect();
                let q: Vec<f64> = p
                    .iter()
                    .zip(engine.errors())
                    .map(|(x, e)| x + e * (xorshift(&mut state) - 0.5) * 1.2)
                    .collect();
                let (a, b) = (Tuple::from_f64s(&p), Tuple::from_f64s(&q));
                if kit.match_score(&a, &b) >= 0.0 {
                    let ka = kit.bins(&a);
                    let kb = kit.bins(&b);
                    assert!(ka.iter().any(|k| kb.contains(k)), "{p:?} {q:?}");
                }
            }
        }
    }

    #[test]
    fn bad_coords_give_no_bins() {
        let engine = CartesianMatchEngine::isotropic(2, 1.0).unwrap();
        assert!(engine.bins(&Tuple::from_f64s(&[f64::NAN, 0.0])).is_empty());
        assert!(engine.bins(&Tuple::from_f64s(&[1.0])).is_empty());
        let a = Tuple::from_f64s(&[0.2, 0.2]);
        // A half-error box as wide as a cell always straddles a boundary.
        assert_eq!(engine.bins(&a).len(), 4);
    }

    #[test]
    fn bounds_shrink_to_reachable_region() {
        let engine = CartesianMatchEngine::isotropic(1, 1.0).unwrap();
        let a = NdRange::new(vec![0.0], vec![10.0]).unwrap();
        let b = NdRange::new(vec![8.0], vec![20.0]).unwrap();
        let ranges = [a, b];
        let ba = engine.match_bounds(&ranges, 0).unwrap();
        assert_eq!(ba.mins(), &[7.0]);
        assert_eq!(ba.maxs(), &[10.0]);
        let bb = engine.match_bounds(&ranges, 1).unwrap();
        assert_eq!(bb.mins(), &[8.0]);
        assert_eq!(bb.maxs(), &[11.0]);
        assert!(engine.match_bounds(&ranges, 2).is_err());
    }

    #[test]
    fn parameters() {
        let mut iso = CartesianMatchEngine::isotropic(3, 1.0).unwrap();
        assert_eq!(iso.match_parameters().len(), 1);
        iso.set_parameter("Error", 2.0).unwrap();
        assert_eq!(iso.errors(), &[2.0, 2.0, 2.0]);
        assert!(iso.set_parameter("Error 1", 2.0).is_err());
        let mut aniso = CartesianMatchEngine::anisotropic(vec![1.0, 1.0]).unwrap();
        aniso.set_parameter("Error 2", 3.0).unwrap();
        assert_eq!(aniso.errors(), &[1.0, 3.0]);
        assert!(aniso.set_parameter("Error 2", -1.0).is_err());
        assert!(aniso.set_parameter("Error 2", f64::NAN).is_err());
        aniso.set_parameter("Error 2", 0.0).unwrap();
        assert!(aniso.set_parameter("Bin Factor", -1.0).is_err());
        assert!(aniso.set_parameter("Bin Factor", 0.01).is_err());
    }

    #[test]
    fn constructors_reject_bad_errors() {
        assert!(CartesianMatchEngine::isotropic(2, -1.0).is_err());
        assert!(CartesianMatchEngine::isotropic(2, f64::NAN).is_err());
        assert!(CartesianMatchEngine::anisotropic(vec![1.0, f64::INFINITY]).is_err());
        assert!(CartesianMatchEngine::anisotropic(vec![1.0, -0.5]).is_err());
    }

    #[test]
    fn zero_error_means_exact_equality() {
        let engine = CartesianMatchEngine::isotropic(2, 0.0).unwrap();
        let a = Tuple::from_f64s(&[1.5, -2.0]);
        assert_eq!(engine.match_score(&a, &a), 0.0);
        assert!(engine.match_score(&a, &Tuple::from_f64s(&[1.5, -2.000001])) < 0.0);
        let bins = engine.bins(&a);
        assert_eq!(bins.len(), 1);
        assert_eq!(bins, engine.bins(&Tuple::from_f64s(&[1.5, -2.0])));
        assert_ne!(bins, engine.bins(&Tuple::from_f64s(&[1.5, 2.0])));
        assert_eq!(
            engine.bins(&Tuple::from_f64s(&[0.0, 0.0])),
            engine.bins(&Tuple::from_f64s(&[-0.0, 0.0]))
        );
    }

    #[test]
    fn zero_error_axis_mixes_with_tolerant_axes() {
        let engine = CartesianMatchEngine::anisotropic(vec![1.0, 0.0]).unwrap();
        let a = Tuple::from_f64s(&[0.0, 7.0]);
        let b = Tuple::from_f64s(&[0.6, 7.0]);
        assert!((engine.match_score(&a, &b) - 0.6).abs() < 1e-12);
        assert!(engine.match_score(&a, &Tuple::from_f64s(&[0.0, 7.5])) < 0.0);
        let (ka, kb) = (engine.bins(&a), engine.bins(&b));
        assert!(ka.iter().any(|k| kb.contains(k)));
    }

    #[test]
    fn coverage_uses_half_errors() {
        let engine = CartesianMatchEngine::isotropic(1, 2.0).unwrap();
        let Coverage::Cuboid(mut cov) = engine.create_coverage() else {
            panic!("expected a box coverage");
        };
        cov.extend(&Tuple::from_f64s(&[5.0]));
        assert_eq!(cov.mins(), &[4.0]);
        assert_eq!(cov.maxs(), &[6.0]);
    }
}
