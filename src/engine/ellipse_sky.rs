//! Matching of ellipses on the sky by overlap.

use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::sync::Arc;

use super::sky::{DEPTH, dec_info, depth_parameter, ra_info, set_depth};
use super::{MatchEngine, MatchKit, positive};
use crate::coverage::{ConeDecoder, Coverage, SkyCone, SkyCoverage};
use crate::geom::ellipse::{Ellipse, overlap_score};
use crate::geom::sphere::{TangentPlane, dot, is_sky_position, radec_to_xyz, separation};
use crate::pixellator::{SkyPixellator, VariableRadiusConePixer};
use crate::tuple::{BinKey, DescribedValue, Tuple, ValueInfo, ValueKind};
use crate::{MatchError, Result};

const SCALE: &str = "Scale";

/// Ellipse on the sky. `mu` and `nu` are the semi-major and semi-minor
/// axes as angles, `zeta` the position angle of the major axis from north
/// towards increasing RA. All radians.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SkyEllipse {
    ra: f64,
    dec: f64,
    mu: f64,
    nu: f64,
    zeta: f64,
}

impl SkyEllipse {
    fn decode(tuple: &Tuple) -> Option<Self> {
        let ra = tuple.f64_at(0)?;
        let dec = tuple.f64_at(1)?;
        if !is_sky_position(ra, dec) {
            return None;
        }
        let mu = tuple.f64_at(2)?;
        let nu = tuple.f64_at(3)?;
        let zeta = tuple.f64_at(4)?;
        let valid = mu >= 0.0 && nu >= 0.0 && mu.is_finite() && nu.is_finite() && zeta.is_finite();
        valid.then_some(Self {
            ra,
            dec,
            mu,
            nu,
            zeta,
        })
    }

    fn is_point(&self) -> bool {
        self.mu == 0.0 && self.nu == 0.0
    }

    fn is_circle(&self) -> bool {
        self.mu == self.nu
    }

    fn max_radius(&self) -> f64 {
        self.mu.max(self.nu)
    }

    /// Angular distance of a position from the centre, in units of the
    /// ellipse radius in that direction.
    fn scaled_distance(&self, ra: f64, dec: f64, recognise_circles: bool) -> f64 {
        if self.is_point() {
            return if ra.rem_euclid(TAU) == self.ra.rem_euclid(TAU) && dec == self.dec {
                0.0
            } else {
                f64::INFINITY
            };
        }
        if recognise_circles && self.is_circle() {
            return separation(self.ra, self.dec, ra, dec) / self.mu;
        }

        // Frame with the centre on +z and the major axis along +x.
        let (sa, ca) = self.ra.sin_cos();
        let (sd, cd) = self.dec.sin_cos();
        let (sz, cz) = self.zeta.sin_cos();
        let east = [-sa, ca, 0.0];
        let north = [-sd * ca, -sd * sa, cd];
        let major = [
            sz * east[0] + cz * north[0],
            sz * east[1] + cz * north[1],
            sz * east[2] + cz * north[2],
        ];
        let minor = [
            cz * east[0] - sz * north[0],
            cz * east[1] - sz * north[1],
            cz * east[2] - sz * north[2],
        ];
        let p = radec_to_xyz(ra, dec);
        let mut dm = dot(p, major).abs().min(1.0).asin();
        let mut dn = dot(p, minor).abs().min(1.0).asin();
        if dot(p, radec_to_xyz(self.ra, self.dec)) < 0.0 {
            dm = PI - dm;
            dn = PI - dn;
        }
        let (x, y) = (dm / self.mu, dn / self.nu);
        (x * x + y * y).sqrt()
    }

    fn project(&self, plane: &TangentPlane) -> Option<Ellipse> {
        let (x, y) = plane.project(self.ra, self.dec)?;
        Some(Ellipse::new(x, y, self.mu, self.nu, FRAC_PI_2 - self.zeta))
    }
}

/// Normalised distance between two sky ellipses, 0 to 2, or `None` when
/// they do not overlap.
fn sky_overlap_score(e1: &SkyEllipse, e2: &SkyEllipse, recognise_circles: bool) -> Option<f64> {
    let reach = e1.max_radius() + e2.max_radius();
    if (e2.dec - e1.dec).abs() > reach {
        return None;
    }
    let sep = separation(e1.ra, e1.dec, e2.ra, e2.dec);
    if !(sep <= reach) {
        return None;
    }

    let within = |s: f64| (s <= 1.0).then_some(s);
    match (e1.is_point(), e2.is_point()) {
        (true, true) => return within(e1.scaled_distance(e2.ra, e2.dec, recognise_circles)),
        (true, false) => return within(e2.scaled_distance(e1.ra, e1.dec, recognise_circles)),
        (false, true) => return within(e1.scaled_distance(e2.ra, e2.dec, recognise_circles)),
        (false, false) => {}
    }

    let sc1 = e1.scaled_distance(e2.ra, e2.dec, recognise_circles);
    let sc2 = e2.scaled_distance(e1.ra, e1.dec, recognise_circles);
    if sc1 <= 1.0 || sc2 <= 1.0 {
        return Some(sc1.min(sc2));
    }

    if recognise_circles && e1.is_circle() && e2.is_circle() {
        let (r1, r2) = (e1.mu, e2.mu);
        return Some(1.0 + 0.5 * ((sep - r2) / r1 + (sep - r1) / r2));
    }

    let plane = TangentPlane::between(e1.ra, e1.dec, e2.ra, e2.dec);
    let p1 = e1.project(&plane)?;
    let p2 = e2.project(&plane)?;
    overlap_score(&p1, &p2, false)
}

fn decode_cone(tuple: &Tuple) -> Option<SkyCone> {
    SkyEllipse::decode(tuple).map(|e| SkyCone {
        ra: e.ra,
        dec: e.dec,
        radius: e.max_radius(),
    })
}

/// Matches elliptical sky regions when they overlap.
///
/// Tuples are `[ra, dec, mu, nu, zeta]` in radians: centre, semi-major
/// and semi-minor axes, and the position angle of the major axis from north
/// towards increasing RA. The score runs from 0 (concentric) through 1
/// (one centre on the other's edge) to 2 (edges touching).
///
/// Small ellipses are compared on the plane tangent half way between their
/// centres.
#[derive(Debug, Clone)]
pub struct EllipseSkyMatchEngine {
    pixellator: SkyPixellator,
    scale: f64,
    recognise_circles: bool,
}

impl EllipseSkyMatchEngine {
    /// `scale` is a typical major radius, used to size the pixels.
    pub fn new(pixellator: SkyPixellator, scale: f64) -> Self {
        let mut engine = Self {
            pixellator,
            scale: 0.0,
            recognise_circles: true,
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

    /// Score circle pairs in closed form. On by default.
    pub fn set_recognise_circles(&mut self, recognise: bool) {
        self.recognise_circles = recognise;
    }

    fn set_scale(&mut self, scale: f64) {
        self.scale = scale;
        self.pixellator.set_scale(scale);
    }
}

impl MatchEngine for EllipseSkyMatchEngine {
    fn name(&self) -> &str {
        "Sky Ellipses"
    }

    fn tuple_infos(&self) -> Vec<ValueInfo> {
        let radius = |name: &str, what: &str| {
            ValueInfo::new(name, ValueKind::Number)
                .with_unit("radians")
                .with_ucd("pos.angDistance")
                .with_description(format!("Length of ellipse {what} axis"))
        };
        vec![
            ra_info(),
            dec_info(),
            radius("Primary Radius", "semi-major"),
            radius("Secondary Radius", "semi-minor"),
            ValueInfo::new("Position Angle", ValueKind::Number)
                .with_unit("radians")
                .with_ucd("pos.posAng")
                .with_description("From north to the primary axis, towards increasing RA"),
        ]
    }

    fn score_info(&self) -> ValueInfo {
        ValueInfo::new("Separation", ValueKind::Number)
            .with_description("Normalised distance between ellipses, 0 concentric to 2 tangent")
    }

    fn match_parameters(&self) -> Vec<DescribedValue> {
        let info = ValueInfo::new(SCALE, ValueKind::Number)
            .with_unit("radians")
            .with_ucd("pos.angDistance")
            .with_description("Rough average of the major radius, sets the pixel size");
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
        Box::new(EllipseSkyKit {
            pixer: self.pixellator.create_variable_radius_pixer_factory()(),
            recognise_circles: self.recognise_circles,
        })
    }

    fn create_coverage(&self) -> Coverage {
        let decoder: ConeDecoder = Arc::new(decode_cone);
        Coverage::Sky(SkyCoverage::variable_error(self.scale, decoder))
    }
}

struct EllipseSkyKit {
    pixer: VariableRadiusConePixer,
    recognise_circles: bool,
}

impl MatchKit for EllipseSkyKit {
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
        let (Some(ea), Some(eb)) = (SkyEllipse::decode(a), SkyEllipse::decode(b)) else {
            return -1.0;
        };
        sky_overlap_score(&ea, &eb, self.recognise_circles).unwrap_or(-1.0)
    }
}
