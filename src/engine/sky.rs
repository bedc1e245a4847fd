//! Sky matching with one fixed angular tolerance.

use std::sync::Arc;

use super::{MatchEngine, MatchKit, non_negative};
use crate::coverage::{Coverage, PositionDecoder, SkyCoverage};
use crate::geom::sphere::{is_sky_position, separation};
use crate::pixellator::{FixedRadiusConePixer, SkyPixellator};
use crate::tuple::{BinKey, DescribedValue, Tuple, Value, ValueInfo, ValueKind};
use crate::{MatchError, Result};

pub(crate) const DEPTH: &str = "Depth";
const MAX_ERROR: &str = "Max Error";

pub(crate) fn ra_info() -> ValueInfo {
    ValueInfo::new("RA", ValueKind::Number)
        .with_unit("radians")
        .with_ucd("pos.eq.ra")
        .with_description("Right Ascension")
}

pub(crate) fn dec_info() -> ValueInfo {
    ValueInfo::new("Dec", ValueKind::Number)
        .with_unit("radians")
        .with_ucd("pos.eq.dec")
        .with_description("Declination")
}

pub(crate) fn separation_info() -> ValueInfo {
    ValueInfo::new("Separation", ValueKind::Number)
        .with_unit("radians")
        .with_ucd("pos.angDistance")
        .with_description("Distance between matched points")
}

pub(crate) fn depth_parameter(pixellator: &SkyPixellator) -> DescribedValue {
    let info = ValueInfo::new(DEPTH, ValueKind::Integer).with_description(format!(
        "{} resolution order; negative selects it from the match scale",
        pixellator.tessellation().name()
    ));
    DescribedValue::new(info, Value::Int(i32::from(pixellator.order())))
}

/// Fixed or automatic pixellation order from a "Depth" parameter value.
pub(crate) fn set_depth(pixellator: &mut SkyPixellator, value: f64) -> Result<()> {
    if value < 0.0 {
        pixellator.set_order(None);
        return Ok(());
    }
    let max = pixellator.tessellation().max_order();
    if value.fract() != 0.0 || value > f64::from(max) {
        return Err(MatchError::invalid_parameter(DEPTH, value));
    }
    pixellator.set_order(Some(value as u8));
    Ok(())
}

pub(crate) fn decode_radec(tuple: &Tuple) -> Option<(f64, f64)> {
    let ra = tuple.f64_at(0)?;
    let dec = tuple.f64_at(1)?;
    is_sky_position(ra, dec).then_some((ra, dec))
}

/// Matches sky positions separated by at most a fixed angle.
///
/// Tuples are `[ra, dec]` in radians. The score is the separation in
/// radians.
#[derive(Debug, Clone)]
pub struct SkyMatchEngine {
    pixellator: SkyPixellator,
    max_error: f64,
}

impl SkyMatchEngine {
    pub fn new(pixellator: SkyPixellator, max_error: f64) -> Self {
        let mut engine = Self {
            pixellator,
            max_error: 0.0,
        };
        engine.set_max_error(max_error);
        engine
    }

    pub fn max_error(&self) -> f64 {
        self.max_error
    }

    pub fn pixellator(&self) -> &SkyPixellator {
        &self.pixellator
    }

    fn set_max_error(&mut self, max_error: f64) {
        self.max_error = max_error;
        self.pixellator.set_scale(0.5 * max_error);
    }
}

impl MatchEngine for SkyMatchEngine {
    fn name(&self) -> &str {
        "Sky"
    }

    fn tuple_infos(&self) -> Vec<ValueInfo> {
        vec![ra_info(), dec_info()]
    }

    fn score_info(&self) -> ValueInfo {
        separation_info()
    }

    fn match_parameters(&self) -> Vec<DescribedValue> {
        let info = ValueInfo::new(MAX_ERROR, ValueKind::Number)
            .with_unit("radians")
            .with_ucd("pos.angDistance")
            .with_description("Maximum separation along a great circle");
        vec![DescribedValue::new(info, self.max_error)]
    }

    fn tuning_parameters(&self) -> Vec<DescribedValue> {
        vec![depth_parameter(&self.pixellator)]
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        match name {
            MAX_ERROR => {
                let v = non_negative(name, value)?;
                self.set_max_error(v);
                Ok(())
            }
            DEPTH => set_depth(&mut self.pixellator, value),
            _ => Err(MatchError::UnknownParameter(name.to_string())),
        }
    }

    fn create_match_kit(&self) -> Box<dyn MatchKit + '_> {
        let pixer = self
            .pixellator
            .create_fixed_radius_pixer_factory(0.5 * self.max_error)();
        Box::new(SkyKit {
            pixer,
            max_error: self.max_error,
        })
    }

    fn create_coverage(&self) -> Coverage {
        let decoder: PositionDecoder = Arc::new(decode_radec);
        Coverage::Sky(SkyCoverage::fixed_error(0.5 * self.max_error, decoder))
    }
}

struct SkyKit {
    pixer: FixedRadiusConePixer,
    max_error: f64,
}

impl MatchKit for SkyKit {
    fn bins(&mut self, tuple: &Tuple) -> Vec<BinKey> {
        match decode_radec(tuple) {
            Some((ra, dec)) => self
                .pixer
                .pixels(ra, dec)
                .into_iter()
                .map(BinKey::Pixel)
                .collect(),
            None => Vec::new(),
        }
    }

    fn match_score(&mut self, a: &Tuple, b: &Tuple) -> f64 {
        let (Some((ra1, dec1)), Some((ra2, dec2))) = (decode_radec(a), decode_radec(b)) else {
            return -1.0;
        };
        let sep = separation(ra1, dec1, ra2, dec2);
        if sep <= self.max_error { sep } else { -1.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    fn arcsec(x: f64) -> f64 {
        (x / 3600.0).to_radians()
    }

    fn radec_deg(ra: f64, dec: f64) -> Tuple {
        Tuple::from_f64s(&[ra.to_radians(), dec.to_radians()])
    }

    fn xorshift(state: &mut u64) -> f64 {
        *state ^= *state << 13;
        *state ^= *state >> 7;
        *state ^= *state << 17;
        (*state as f64) / (u64::MAX as f64)
    }

    #[test]
    fn close_pair_matches() {
        for pixellator in [SkyPixellator::healpix(), SkyPixellator::htm()] {
            let engine = SkyMatchEngine::new(pixellator, arcsec(5.0));
            let a = radec_deg(10.0, 20.0);
            let b = radec_deg(10.0001, 20.0001);
            let score = engine.match_score(&a, &b);
            assert!(score >= 0.0 && score < arcsec(0.5));
            assert_eq!(engine.match_score(&b, &a), score);
            let ba = engine.bins(&a);
            let bb = engine.bins(&b);
            assert!(ba.iter().any(|k| bb.contains(k)));
            let far = radec_deg(50.0, -30.0);
            assert!(engine.match_score(&a, &far) < 0.0);
            let bf = engine.bins(&far);
            assert!(!ba.iter().any(|k| bf.contains(k)));
        }
    }

    #[test]
    fn matching_pairs_share_bins() {
        let mut state = 31_u64;
        let engine = SkyMatchEngine::new(SkyPixellator::healpix(), arcsec(10.0));
        let mut kit = engine.create_match_kit();
        for _ in 0..300 {
            let ra = xorshift(&mut state) * TAU;
            let dec = (2.0 * xorshift(&mut state) - 1.0).asin();
            let d = arcsec(7.0) * (xorshift(&mut state) - 0.5);
            let a = Tuple::from_f64s(&[ra, dec]);
            let b = Tuple::from_f64s(&[ra + d / dec.cos().max(0.1), dec + d]);
            if kit.match_score(&a, &b) >= 0.0 {
                let ka = kit.bins(&a);
                let kb = kit.bins(&b);
                assert!(ka.iter().any(|k| kb.contains(k)));
            }
        }
    }

    #[test]
    fn bad_positions_are_skipped() {
        let engine = SkyMatchEngine::new(SkyPixellator::healpix(), arcsec(1.0));
        let bad = Tuple::from_f64s(&[f64::NAN, 0.0]);
        assert!(engine.bins(&bad).is_empty());
        assert!(engine.match_score(&bad, &bad) < 0.0);
        assert!(engine.bins(&Tuple::from_f64s(&[0.0, 2.0])).is_empty());
    }

    #[test]
    fn parameters_round_trip() {
        let mut engine = SkyMatchEngine::new(SkyPixellator::healpix(), arcsec(1.0));
        engine.set_parameter("Max Error", 0.01).unwrap();
        assert_eq!(engine.max_error(), 0.01);
        let auto = engine.pixellator().order();
        engine.set_parameter("Depth", 3.0).unwrap();
        assert_eq!(engine.pixellator().order(), 3);
        match engine.tuning_parameters()[0].value {
            Value::Int(d) => assert_eq!(d, 3),
            ref other => panic!("unexpected depth {other:?}"),
        }
        engine.set_parameter("Depth", -1.0).unwrap();
        assert_eq!(engine.pixellator().order(), auto);
        assert!(engine.set_parameter("Depth", 2.5).is_err());
        assert!(engine.set_parameter("Max Error", -1.0).is_err());
    }

    #[test]
    fn coverage_accepts_own_rows() {
        let engine = SkyMatchEngine::new(SkyPixellator::healpix(), arcsec(5.0));
        let mut cov = engine.create_coverage();
        let a = radec_deg(10.0, 20.0);
        cov.extend(&a);
        let frozen = cov.freeze();
        let mut test = frozen.create_test();
        assert!(test.test(&a));
        assert!(test.test(&radec_deg(10.0001, 20.0001)));
        assert!(!test.test(&radec_deg(50.0, -30.0)));
    }
}
