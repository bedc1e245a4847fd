//! Sky matching where every row carries its own error radius.

use std::sync::Arc;

use super::sky::{DEPTH, dec_info, depth_parameter, ra_info, set_depth};
use super::{MatchEngine, MatchKit, positive};
use crate::coverage::{ConeDecoder, Coverage, SkyCone, SkyCoverage};
use crate::geom::sphere::{is_sky_position, separation};
use crate::pixellator::{SkyPixellator, VariableRadiusConePixer};
use crate::tuple::{BinKey, DescribedValue, Tuple, ValueInfo, ValueKind};
use crate::{MatchError, Result};

const SCALE: &str = "Scale";

fn decode_cone(tuple: &Tuple) -> Option<SkyCone> {
    let ra = tuple.f64_at(0)?;
    let dec = tuple.f64_at(1)?;
    let err = tuple.f64_at(2)?;
    if !is_sky_position(ra, dec) || !err.is_finite() {
        return None;
    }
    Some(SkyCone {
        ra,
        dec,
        radius: err.max(0.0),
    })
}

/// Matches sky positions that each carry their own error radius.
///
/// Tuples are `[ra, dec, err]` in radians. Two rows match when their
/// separation is at most the sum of their errors. The score is that
/// separation as a fraction of the error sum.
#[derive(Debug, Clone)]
pub struct ErrorSkyMatchEngine {
    pixellator: SkyPixellator,
    scale: f64,
}

impl ErrorSkyMatchEngine {
    /// `scale` is a typical error radius, used to size the pixels.
    pub fn new(pixellator: SkyPixellator, scale: f64) -> Self {
        let mut engine = Self {
            pixellator,
            scale: 0.0,
        };
        engine.set_scale(scale);
        engine
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn pixellator(&self) -> &SkyPixellator {
        &self.pixellator
    }

    fn set_scale(&mut self, scale: f64) {
        self.scale = scale;
        self.pixellator.set_scale(scale);
    }
}

impl MatchEngine for ErrorSkyMatchEngine {
    fn name(&self) -> &str {
        "Sky with Errors"
    }

    fn tuple_infos(&self) -> Vec<ValueInfo> {
        let err = ValueInfo::new("Error", ValueKind::Number)
            .with_unit("radians")
            .with_ucd("stat.error")
            .with_description("Per-row error radius");
        vec![ra_info(), dec_info(), err]
    }

    fn score_info(&self) -> ValueInfo {
        ValueInfo::new("Separation Ratio", ValueKind::Number)
            .with_description("Separation as a fraction of the summed errors, 0 to 1")
    }

    fn match_parameters(&self) -> Vec<DescribedValue> {
        let info = ValueInfo::new(SCALE, ValueKind::Number)
            .with_unit("radians")
            .with_ucd("pos.angDistance")
            .with_description("Typical error radius, sets the pixel size");
        vec![DescribedValue::new(info, self.scale)]
    }

    fn tuning_parameters(&self) -> Vec<DescribedValue> {
        vec![depth_parameter(&self.pixellator)]
    }

    fn set_parameter(&mut self, name: &str, value: f64) -> Result<()> {
        match name {
            SCALE => {
                let v = positive(name, value)?;
                self.set_scale(v);
                Ok(())
            }
            DEPTH => set_depth(&mut self.pixellator, value),
            _ => Err(MatchError::UnknownParameter(name.to_string())),
        }
    }

    fn create_match_kit(&self) -> Box<dyn MatchKit + '_> {
        Box::new(ErrorSkyKit {
            pixer: self.pixellator.create_variable_radius_pixer_factory()(),
        })
    }

    fn create_coverage(&self) -> Coverage {
        let decoder: ConeDecoder = Arc::new(decode_cone);
        Coverage::Sky(SkyCoverage::variable_error(self.scale, decoder))
    }
}

struct ErrorSkyKit {
    pixer: VariableRadiusConePixer,
}

impl MatchKit for ErrorSkyKit {
    fn bins(&mut self, tuple: &Tuple) -> Vec<BinKey> {
        match decode_cone(tuple) {
            Some(c) => self
                .pixer
                .pixels(c.ra, c.dec, c.radius)
                .into_iter()
                .map(BinKey::Pixel)
                .collect(),
            None => Vec::new(),
        }
    }

    fn match_score(&mut self, a: &Tuple, b: &Tuple) -> f64 {
        let (Some(p), Some(q)) = (decode_cone(a), decode_cone(b)) else {
            return -1.0;
        };
        let sep = separation(p.ra, p.dec, q.ra, q.dec);
        let limit = p.radius + q.radius;
        if sep > limit {
            -1.0
        } else if limit > 0.0 {
            sep / limit
        } else {
            0.0
        }
    }
}
