//! Display-unit adapter for engines that work in radians.

use std::sync::Arc;

use super::{MatchEngine, MatchKit, NdRange};
use crate::coverage::{Coverage, TupleAdapter};
use crate::tuple::{BinKey, DescribedValue, Tuple, Value, ValueInfo};
use crate::Result;

const DEGREES_PER_RADIAN: f64 = 180.0 / std::f64::consts::PI;
const ARCSEC_PER_RADIAN: f64 = DEGREES_PER_RADIAN * 3600.0;

/// Multiplier from native to display units, and the display unit.
fn display_unit(info: &ValueInfo) -> Option<(f64, &'static str)> {
    if info.unit.as_deref() != Some("radians") {
        return None;
    }
    let ucd = info.ucd.as_deref()?;
    if ucd.starts_with("pos.eq") || ucd.starts_with("pos.posAng") {
        Some((DEGREES_PER_RADIAN, "degrees"))
    } else if ucd.starts_with("pos.angDistance") || ucd.starts_with("stat.error") {
        Some((ARCSEC_PER_RADIAN, "arcsec"))
    } else {
        None
    }
}

fn factor(info: &ValueInfo) -> f64 {
    display_unit(info).map_or(1.0, |(f, _)| f)
}

fn humanize_info(info: ValueInfo) -> ValueInfo {
    match display_unit(&info) {
        Some((_, unit)) => info.with_unit(unit),
        None => info,
    }
}

fn humanize_param(param: DescribedValue) -> DescribedValue {
    let f = factor(&param.info);
    let value = match param.value.as_f64() {
        Some(v) if f != 1.0 => Value::Double(v * f),
        _ => param.value,
    };
    DescribedValue {
        info: humanize_info(param.info),
        value,
    }
}

fn to_native(tuple: &Tuple, factors: &[f64]) -> Tuple {
    let values = tuple
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let f = factors.get(i).copied().unwrap_or(1.0);
            match value.as_f64() {
                Some(v) if f != 1.0 => Value::Double(v / f),
                _ => value.clone(),
            }
        })
        .collect();
    Tuple::new(values)
}

/// Wraps an engine so tuples, parameters and scores use degrees and
/// arcseconds where the engine uses radians.
///
/// Conversion is keyed on each value's UCD. When nothing needs converting
/// the wrapper passes everything straight through.
#[derive(Debug, Clone)]
pub struct HumanMatchEngine<E> {
    base: E,
}

impl<E: MatchEngine> HumanMatchEngine<E> {
    pub fn new(base: E) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &E {
        &self.base
    }

    pub fn into_inner(self) -> E {
        self.base
    }

    fn tuple_factors(&self) -> Vec<f64> {
        self.base.tuple_infos().iter().map(factor).collect()
    }

    fn score_factor(&self) -> f64 {
        factor(&self.base.score_info())
    }

    fn param_factor(&self, name: &str) -> f64 {
        self.base
            .match_parameters()
            .into_iter()
            .chain(self.base.tuning_parameters())
            .find(|p| p.name() == name)
            .map_or(1.0, |p| factor(&p.info))
    }

    /// True when no value changes units.
    pub fn is_identity(&self) -> bool {
        self.tuple_factors().iter().all(|&f| f == 1.0)
            && self.score_factor() == 1.0
            && self
                .base
                .match_parameters()
                .iter()
                .chain(self.base.tuning_parameters().iter())
                .all(|p| factor(&p.info) == 1.0)
    }
}

impl<E: MatchEngine> MatchEngine for HumanMatchEngine<E> {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn tuple_infos(&self) -> Vec<ValueInfo> {
        self.base.tuple_infos().into_iter().map(humanize_info).collect()
    }

    fn score_info(&self) -> ValueInfo {
        humanize_info(self.base.score_info())
    }

    fn match_parameters(&self) -> Vec<DescribedValue> {
        self.base
            .match_parameters()
            .into_iter()
            .map(humanize_param)
            .collect()
    }

    fn tuning_parameters(&self) -> Vec<DescribedValue> {
        self.base
            .tuning_parameters()
            .into_iter()
            .map(humanize_param)
            .collect()
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        let f = self.param_factor(name);
        self.base.set_parameter(name, value / f)
    }

    fn create_match_kit(&self) -> Box<dyn MatchKit + '_> {
        let factors = self.tuple_factors();
        let score_factor = self.score_factor();
        if factors.iter().all(|&f| f == 1.0) && score_factor == 1.0 {
            return self.base.create_match_kit();
        }
        Box::new(HumanKit {
            base: self.base.create_match_kit(),
            factors,
            score_factor,
        })
    }

    fn create_coverage(&self) -> Coverage {
        let factors = self.tuple_factors();
        let coverage = self.base.create_coverage();
        if factors.iter().all(|&f| f == 1.0) {
            return coverage;
        }
        let adapter: TupleAdapter = Arc::new(move |t: &Tuple| to_native(t, &factors));
        coverage.with_tuple_adapter(adapter)
    }

    fn can_bound_match(&self) -> bool {
        self.base.can_bound_match()
    }

    fn match_bounds(&self, ranges: &[NdRange], index: usize) -> Result<NdRange> {
        let factors = self.tuple_factors();
        let scale = |r: &NdRange, by: &dyn Fn(f64, f64) -> f64| {
            let f = |i: usize| factors.get(i).copied().unwrap_or(1.0);
            NdRange::new(
                r.mins().iter().enumerate().map(|(i, &x)| by(x, f(i))).collect(),
                r.maxs().iter().enumerate().map(|(i, &x)| by(x, f(i))).collect(),
            )
        };
        let native = ranges
            .iter()
            .map(|r| scale(r, &|x, f| x / f))
            .collect::<Result<Vec<_>>>()?;
        let bounds = self.base.match_bounds(&native, index)?;
        scale(&bounds, &|x, f| x * f)
    }
}

struct HumanKit<'a> {
    base: Box<dyn MatchKit + 'a>,
    factors: Vec<f64>,
    score_factor: f64,
}

impl MatchKit for HumanKit<'_> {
    fn bins(&mut self, tuple: &Tuple) -> Vec<BinKey> {
        let native = to_native(tuple, &self.factors);
        self.base.bins(&native)
    }

    fn match_score(&mut self, a: &Tuple, b: &Tuple) -> f64 {
        let na = to_native(a, &self.factors);
        let nb = to_native(b, &self.factors);
        let score = self.base.match_score(&na, &nb);
        if score >= 0.0 {
            score * self.score_factor
        } else {
            score
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{
        CartesianMatchEngine, EllipseCartesianMatchEngine, EqualsMatchEngine,
        ErrorSkyMatchEngine, SkyMatchEngine,
    };
    use crate::pixellator::SkyPixellator;

    fn arcsec(x: f64) -> f64 {
        x / ARCSEC_PER_RADIAN
    }

    #[test]
    fn identity_for_unitless_engines() {
        assert!(HumanMatchEngine::new(EqualsMatchEngine::new(2)).is_identity());
        let cartesian = CartesianMatchEngine::isotropic(2, 1.0).unwrap();
        assert!(HumanMatchEngine::new(cartesian).is_identity());
        assert!(!HumanMatchEngine::new(SkyMatchEngine::new(SkyPixellator::healpix(), 1e-5))
            .is_identity());
    }

    #[test]
    fn sky_in_degrees_and_arcsec() {
        let mut engine =
            HumanMatchEngine::new(SkyMatchEngine::new(SkyPixellator::healpix(), arcsec(1.0)));
        engine.set_parameter("Max Error", 5.0).unwrap();
        assert!((engine.base().max_error() - arcsec(5.0)).abs() < 1e-18);
        let shown = engine.match_parameters()[0].value.as_f64().unwrap();
        assert!((shown - 5.0).abs() < 1e-9);
        assert_eq!(engine.match_parameters()[0].info.unit.as_deref(), Some("arcsec"));
        assert_eq!(engine.tuple_infos()[0].unit.as_deref(), Some("degrees"));

        let a = Tuple::from_f64s(&[10.0, 20.0]);
        let b = Tuple::from_f64s(&[10.0001, 20.0001]);
        let score = engine.match_score(&a, &b);
        assert!(score > 0.45 && score < 0.5, "{score} arcsec");
        assert!(engine.match_score(&a, &Tuple::from_f64s(&[50.0, -30.0])) < 0.0);
        let ka = engine.bins(&a);
        let kb = engine.bins(&b);
        assert!(ka.iter().any(|k| kb.contains(k)));
    }

    #[test]
    fn error_column_in_arcsec() {
        let engine =
            HumanMatchEngine::new(ErrorSkyMatchEngine::new(SkyPixellator::htm(), arcsec(1.0)));
        let a = Tuple::from_f64s(&[10.0, 20.0, 0.3]);
        let b = Tuple::from_f64s(&[10.0001, 20.0001, 0.3]);
        let score = engine.match_score(&a, &b);
        // The ratio score has no unit and is left alone.
        assert!(score > 0.8 && score < 0.85, "{score}");
    }

    #[test]
    fn coverage_reads_display_units() {
        let engine =
            HumanMatchEngine::new(SkyMatchEngine::new(SkyPixellator::healpix(), arcsec(5.0)));
        let mut cov = engine.create_coverage();
        cov.extend(&Tuple::from_f64s(&[10.0, 20.0]));
        let frozen = cov.freeze();
        let mut test = frozen.create_test();
        assert!(test.test(&Tuple::from_f64s(&[10.0001, 20.0001])));
        assert!(!test.test(&Tuple::from_f64s(&[50.0, -30.0])));
    }

    #[test]
    fn orientation_angles_in_degrees() {
        let engine = HumanMatchEngine::new(EllipseCartesianMatchEngine::new(1.0).unwrap());
        assert!(!engine.is_identity());
        let infos = engine.tuple_infos();
        assert_eq!(infos[4].unit.as_deref(), Some("degrees"));
        assert_eq!(infos[2].unit, None);
        // 2x1 ellipse turned to lie along Y reaches (0, 1.9).
        let e = Tuple::from_f64s(&[0.0, 0.0, 2.0, 1.0, 90.0]);
        let p = Tuple::from_f64s(&[0.0, 1.9, 0.0, 0.0, 0.0]);
        assert!((engine.match_score(&e, &p) - 0.95).abs() < 1e-9);
    }

    #[test]
    fn bounds_pass_through() {
        let engine = HumanMatchEngine::new(CartesianMatchEngine::isotropic(1, 1.0).unwrap());
        let ranges = [
            NdRange::new(vec![0.0], vec![10.0]).unwrap(),
            NdRange::new(vec![8.0], vec![20.0]).unwrap(),
        ];
        let bounds = engine.match_bounds(&ranges, 0).unwrap();
        assert_eq!(bounds.mins(), &[7.0]);
    }
}
