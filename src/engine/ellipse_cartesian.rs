//! Matching of 2-d Cartesian ellipses by overlap.

use std::sync::Arc;

use super::{MatchEngine, MatchKit, positive};
use crate::coverage::{CoordsDecoder, Coverage, CuboidCoverage, MarginDecoder};
use crate::geom::ellipse::{Ellipse, overlap_score};
use crate::tuple::{BinKey, DescribedValue, Tuple, ValueInfo, ValueKind};
use crate::{MatchError, Result};

const SCALE: &str = "Scale";
const BIN_FACTOR: &str = "Bin Factor";
const MIN_BIN_FACTOR: f64 = 0.1;

/// Reads `[x, y, a, b, theta]`.
///
/// A row with a usable centre but missing or invalid axes is read as a
/// point at its centre.
fn decode_ellipse(tuple: &Tuple) -> Option<Ellipse> {
    let x = tuple.f64_at(0)?;
    let y = tuple.f64_at(1)?;
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    let shape = (tuple.f64_at(2), tuple.f64_at(3), tuple.f64_at(4));
    match shape {
        (Some(a), Some(b), Some(theta))
            if a >= 0.0 && b >= 0.0 && a.is_finite() && b.is_finite() && theta.is_finite() =>
        {
            Some(Ellipse::new(x, y, a, b, theta))
        }
        _ => Some(Ellipse::point(x, y)),
    }
}

fn decode_centre(tuple: &Tuple, out: &mut [f64]) -> bool {
    match decode_ellipse(tuple) {
        Some(e) => {
            out[0] = e.x;
            out[1] = e.y;
            true
        }
        None => false,
    }
}

/// Matches ellipses in the plane when they overlap.
///
/// Tuples are `[x, y, a, b, theta]`: centre, semi-major and semi-minor
/// axes, and the angle of the major axis from X towards Y in radians. The
/// score runs from 0 (concentric) through 1 (one centre on the other's
/// edge) to 2 (edges touching).
///
/// Rows are binned on a square grid of cells `scale * bin_factor` wide.
/// Each ellipse lands in every cell touched by the box of its larger
/// radius.
#[derive(Debug, Clone)]
pub struct EllipseCartesianMatchEngine {
    scale: f64,
    bin_factor: f64,
    recognise_circles: bool,
}

impl EllipseCartesianMatchEngine {
    /// `scale` is a typical major radius, used only to size the grid.
    pub fn new(scale: f64) -> Result<Self> {
        Ok(Self {
            scale: positive(SCALE, scale)?,
            bin_factor: 1.0,
            recognise_circles: true,
        })
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Score circle pairs in closed form. On by default.
    pub fn set_recognise_circles(&mut self, recognise: bool) {
        self.recognise_circles = recognise;
    }

    fn cell_width(&self) -> f64 {
        self.scale * self.bin_factor
    }
}

impl MatchEngine for EllipseCartesianMatchEngine {
    fn name(&self) -> &str {
        "2-d Cartesian Ellipses"
    }

    fn tuple_infos(&self) -> Vec<ValueInfo> {
        vec![
            ValueInfo::new("X", ValueKind::Number).with_description("X coordinate of centre"),
            ValueInfo::new("Y", ValueKind::Number).with_description("Y coordinate of centre"),
            ValueInfo::new("Primary Radius", ValueKind::Number)
                .with_ucd("phys.size.smajAxis")
                .with_description("Length of semi-major axis"),
            ValueInfo::new("Secondary Radius", ValueKind::Number)
                .with_ucd("phys.size.sminAxis")
                .with_description("Length of semi-minor axis"),
            ValueInfo::new("Orientation Angle", ValueKind::Number)
                .with_unit("radians")
                .with_ucd("pos.posAng")
                .with_description("Angle from X axis towards Y axis of semi-major axis"),
        ]
    }

    fn score_info(&self) -> ValueInfo {
        ValueInfo::new("Separation", ValueKind::Number).with_description(
            "Normalised distance between ellipses, 0 concentric, 1 centre on edge, 2 touching",
        )
    }

    fn match_parameters(&self) -> Vec<DescribedValue> {
        let info = ValueInfo::new(SCALE, ValueKind::Number)
            .with_description("Rough average of the major radius; sets the grid size");
        vec![DescribedValue::new(info, self.scale)]
    }

    fn tuning_parameters(&self) -> Vec<DescribedValue> {
        let info = ValueInfo::new(BIN_FACTOR, ValueKind::Number)
            .with_description("Grid cell width as a multiple of the scale");
        vec![DescribedValue::new(info, self.bin_factor)]
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        match name {
            SCALE => {
                self.scale = positive(name, value)?;
                Ok(())
            }
            BIN_FACTOR => {
                if !(value >= MIN_BIN_FACTOR) || !value.is_finite() {
                    return Err(MatchError::invalid_parameter(name, value));
                }
                self.bin_factor = value;
                Ok(())
            }
            _ => Err(MatchError::UnknownParameter(name.to_string())),
        }
    }

    fn create_match_kit(&self) -> Box<dyn MatchKit + '_> {
        Box::new(EllipseCartesianKit { engine: self })
    }

    fn create_coverage(&self) -> Coverage {
        let decoder: CoordsDecoder = Arc::new(decode_centre);
        let margin: MarginDecoder =
            Arc::new(|t: &Tuple| decode_ellipse(t).map_or(0.0, |e| e.max_radius()));
        Coverage::Cuboid(CuboidCoverage::variable_error(2, decoder, margin))
    }
}

struct EllipseCartesianKit<'a> {
    engine: &'a EllipseCartesianMatchEngine,
}

impl MatchKit for EllipseCartesianKit<'_> {
    fn bins(&mut self, tuple: &Tuple) -> Vec<BinKey> {
        let Some(e) = decode_ellipse(tuple) else {
            return Vec::new();
        };
        let width = self.engine.cell_width();
        let r = e.max_radius();
        let span = |c: f64| {
            (
                ((c - r) / width).floor() as i64,
                ((c + r) / width).floor() as i64,
            )
        };
        let (x0, x1) = span(e.x);
        let (y0, y1) = span(e.y);
        let mut keys = Vec::with_capacity(((x1 - x0 + 1) * (y1 - y0 + 1)) as usize);
        for i in x0..=x1 {
            for j in y0..=y1 {
                keys.push(BinKey::Cell(vec![i, j].into_boxed_slice()));
            }
        }
        keys
    }

    fn match_score(&mut self, a: &Tuple, b: &Tuple) -> f64 {
        let (Some(ea), Some(eb)) = (decode_ellipse(a), decode_ellipse(b)) else {
            return -1.0;
        };
        overlap_score(&ea, &eb, self.engine.recognise_circles).unwrap_or(-1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ellipse(x: f64, y: f64, a: f64, b: f64, theta: f64) -> Tuple {
        Tuple::from_f64s(&[x, y, a, b, theta])
    }

    #[test]
    fn scores_span_zero_to_two() {
        let engine = EllipseCartesianMatchEngine::new(1.0).unwrap();
        let e = ellipse(0.0, 0.0, 2.0, 1.0, 0.0);
        assert_eq!(engine.match_score(&e, &ellipse(0.0, 0.0, 1.0, 0.5, 1.0)), 0.0);
        let on_edge = engine.match_score(&e, &ellipse(0.0, 1.0, 3.0, 0.2, 0.0));
        assert!((on_edge - 1.0).abs() < 1e-9, "{on_edge}");
        let c1 = ellipse(0.0, 0.0, 1.0, 1.0, 0.0);
        let touching = engine.match_score(&c1, &ellipse(0.0, 3.0, 2.0, 2.0, 0.0));
        assert!((touching - 2.0).abs() < 1e-9, "{touching}");
        assert!(engine.match_score(&c1, &ellipse(0.0, 3.1, 2.0, 2.0, 0.0)) < 0.0);
    }

    #[test]
    fn missing_axes_read_as_points() {
        let engine = EllipseCartesianMatchEngine::new(1.0).unwrap();
        let point = Tuple::from_f64s(&[0.5, 0.0, f64::NAN, f64::NAN, f64::NAN]);
        let e = ellipse(0.0, 0.0, 1.0, 1.0, 0.0);
        assert!((engine.match_score(&point, &e) - 0.5).abs() < 1e-12);
        assert_eq!(engine.match_score(&point, &point), 0.0);
        assert!(engine.bins(&Tuple::from_f64s(&[f64::NAN, 0.0, 1.0, 1.0, 0.0])).is_empty());
    }

    #[test]
    fn overlapping_ellipses_share_a_cell() {
        let mut state = 99_u64;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state as f64) / (u64::MAX as f64)
        };
        for factor in [0.5, 1.0, 4.0] {
            let mut engine = EllipseCartesianMatchEngine::new(0.5).unwrap();
            engine.set_parameter("Bin Factor", factor).unwrap();
            let mut kit = engine.create_match_kit();
            let mut matched = 0;
            for _ in 0..400 {
                let a = ellipse(
                    4.0 * next(),
                    4.0 * next(),
                    next(),
                    0.5 * next(),
                    6.0 * next(),
                );
                let b = ellipse(
                    4.0 * next(),
                    4.0 * next(),
                    next(),
                    0.5 * next(),
                    6.0 * next(),
                );
                if kit.match_score(&a, &b) >= 0.0 {
                    matched += 1;
                    let (ka, kb) = (kit.bins(&a), kit.bins(&b));
                    assert!(ka.iter().any(|k| kb.contains(k)));
                }
            }
            assert!(matched > 0);
        }
    }

    #[test]
    fn coverage_boxes_use_major_radius() {
        let engine = EllipseCartesianMatchEngine::new(1.0).unwrap();
        let Coverage::Cuboid(mut cov) = engine.create_coverage() else {
            panic!("expected a box coverage");
        };
        cov.extend(&ellipse(0.0, 0.0, 2.0, 1.0, 0.7));
        assert_eq!(cov.mins(), &[-2.0, -2.0]);
        assert_eq!(cov.maxs(), &[2.0, 2.0]);
    }

    #[test]
    fn parameters() {
        assert!(EllipseCartesianMatchEngine::new(0.0).is_err());
        let mut engine = EllipseCartesianMatchEngine::new(1.0).unwrap();
        engine.set_parameter("Scale", 3.0).unwrap();
        assert_eq!(engine.scale(), 3.0);
        assert!(engine.set_parameter("Bin Factor", 0.0).is_err());
        assert!(engine.set_parameter("Error", 1.0).is_err());
        assert_eq!(engine.tuple_infos().len(), 5);
    }
}
