//! Sky coverage as a HEALPix bitmask of the discs around each position.

use std::fmt;
use std::sync::Arc;

use super::TupleAdapter;
use super::bitset::BitsetMask;
use crate::geom::sphere::is_sky_position;
use crate::healpix;
use crate::pixellator::{SkyPixellator, VariableRadiusConePixer};
use crate::tuple::Tuple;
use crate::Result;

/// Finest mask order used for sky coverage.
pub const MAX_COVERAGE_DEPTH: u8 = 9;

/// A position and its error radius, radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyCone {
    pub ra: f64,
    pub dec: f64,
    pub radius: f64,
}

/// Reads a position (ra, dec) in radians from a tuple.
pub type PositionDecoder = Arc<dyn Fn(&Tuple) -> Option<(f64, f64)> + Send + Sync>;

/// Reads a position and error radius from a tuple.
pub type ConeDecoder = Arc<dyn Fn(&Tuple) -> Option<SkyCone> + Send + Sync>;

#[derive(Clone)]
enum Extent {
    Fixed { radius: f64, decoder: PositionDecoder },
    Variable(ConeDecoder),
}

impl Extent {
    fn cone(&self, tuple: &Tuple) -> Option<SkyCone> {
        let cone = match self {
            Extent::Fixed { radius, decoder } => {
                let (ra, dec) = decoder(tuple)?;
                SkyCone {
                    ra,
                    dec,
                    radius: *radius,
                }
            }
            Extent::Variable(decoder) => decoder(tuple)?,
        };
        let usable = is_sky_position(cone.ra, cone.dec) && cone.radius.is_finite();
        usable.then_some(cone)
    }

    fn adapted(self, adapter: TupleAdapter) -> Extent {
        match self {
            Extent::Fixed { radius, decoder } => Extent::Fixed {
                radius,
                decoder: Arc::new(move |t: &Tuple| decoder(&adapter(t))),
            },
            Extent::Variable(decoder) => {
                Extent::Variable(Arc::new(move |t: &Tuple| decoder(&adapter(t))))
            }
        }
    }
}

impl fmt::Debug for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extent::Fixed { radius, .. } => f.debug_struct("Fixed").field("radius", radius).finish(),
            Extent::Variable(_) => f.write_str("Variable"),
        }
    }
}

fn mask_pixellator(scale: f64) -> SkyPixellator {
    let mut pixellator = SkyPixellator::healpix();
    pixellator.set_scale(scale);
    pixellator.set_order(Some(
        healpix::depth_for_radius(scale).min(MAX_COVERAGE_DEPTH),
    ));
    pixellator
}

/// Builder phase of a sky coverage.
#[derive(Debug, Clone)]
pub struct SkyCoverage {
    mask: BitsetMask,
    extent: Extent,
    pixellator: SkyPixellator,
    pixer: VariableRadiusConePixer,
}

impl SkyCoverage {
    /// Coverage of discs of one fixed `radius` around decoded positions.
    pub fn fixed_error(radius: f64, decoder: PositionDecoder) -> Self {
        Self::build(radius, Extent::Fixed { radius, decoder })
    }

    /// Coverage of discs with per-tuple radii; `scale` is a typical radius.
    pub fn variable_error(scale: f64, decoder: ConeDecoder) -> Self {
        Self::build(scale, Extent::Variable(decoder))
    }

    fn build(scale: f64, extent: Extent) -> Self {
        let pixellator = mask_pixellator(scale);
        let pixer = pixellator.create_variable_radius_pixer_factory()();
        Self {
            mask: BitsetMask::new(pixellator.order()),
            extent,
            pixellator,
            pixer,
        }
    }

    pub fn mask(&self) -> &BitsetMask {
        &self.mask
    }

    /// Decode tuples only after passing them through `adapter`.
    pub fn with_tuple_adapter(mut self, adapter: TupleAdapter) -> Self {
        self.extent = self.extent.adapted(adapter);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.mask.is_empty()
    }

    pub fn sky_fraction(&self) -> f64 {
        self.mask.sky_fraction()
    }

    /// Mark the disc around the tuple's position. Undecodable tuples are
    /// ignored.
    pub fn extend(&mut self, tuple: &Tuple) {
        if let Some(cone) = self.extent.cone(tuple) {
            let order = self.mask.order();
            for pixel in self.pixer.pixels(cone.ra, cone.dec, cone.radius) {
                self.mask.add_pixel(order, pixel);
            }
        }
    }

    pub fn union(&mut self, other: &SkyCoverage) -> Result<()> {
        self.mask.union(&other.mask)
    }

    pub fn intersection(&mut self, other: &SkyCoverage) -> Result<()> {
        self.mask.intersection(&other.mask)
    }

    pub fn coverage_text(&self) -> String {
        format!(
            "{:.4}% of sky, {} pixels at order {}",
            100.0 * self.sky_fraction(),
            self.mask.cardinality(),
            self.mask.order()
        )
    }

    pub fn freeze(self) -> FrozenSkyCoverage {
        FrozenSkyCoverage {
            mask: self.mask,
            extent: self.extent,
            pixellator: self.pixellator,
        }
    }
}

/// Read-only sky coverage, shareable across threads.
#[derive(Debug, Clone)]
pub struct FrozenSkyCoverage {
    mask: BitsetMask,
    extent: Extent,
    pixellator: SkyPixellator,
}

impl FrozenSkyCoverage {
    pub fn mask(&self) -> &BitsetMask {
        &self.mask
    }

    pub fn create_test(&self) -> SkyCoverageTest<'_> {
        SkyCoverageTest {
            coverage: self,
            pixer: self.pixellator.create_variable_radius_pixer_factory()(),
        }
    }
}

/// Thread-confined inclusion test against a frozen sky coverage.
#[derive(Debug)]
pub struct SkyCoverageTest<'a> {
    coverage: &'a FrozenSkyCoverage,
    pixer: VariableRadiusConePixer,
}

impl SkyCoverageTest<'_> {
    /// Whether any pixel of the tuple's own disc is covered.
    pub fn test(&mut self, tuple: &Tuple) -> bool {
        let Some(cone) = self.coverage.extent.cone(tuple) else {
            return false;
        };
        let mask = &self.coverage.mask;
        if mask.is_empty() {
            return false;
        }
        self.pixer
            .pixels(cone.ra, cone.dec, cone.radius)
            .into_iter()
            .any(|p| mask.contains(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    fn radec_decoder() -> PositionDecoder {
        Arc::new(|t: &Tuple| Some((t.f64_at(0)?, t.f64_at(1)?)))
    }

    fn xorshift(state: &mut u64) -> f64 {
        *state ^= *state << 13;
        *state ^= *state >> 7;
        *state ^= *state << 17;
        (*state as f64) / (u64::MAX as f64)
    }

    fn random_coverage(state: &mut u64, n: usize, ra_range: (f64, f64)) -> SkyCoverage {
        let mut cov = SkyCoverage::fixed_error(0.01, radec_decoder());
        for _ in 0..n {
            let ra = ra_range.0 + xorshift(state) * (ra_range.1 - ra_range.0);
            let dec = (2.0 * xorshift(state) - 1.0).asin() * 0.5;
            cov.extend(&Tuple::from_f64s(&[ra, dec]));
        }
        cov
    }

    #[test]
    fn empty_rejects_everything() {
        let cov = SkyCoverage::fixed_error(0.01, radec_decoder());
        assert!(cov.is_empty());
        let frozen = cov.freeze();
        let mut test = frozen.create_test();
        assert!(!test.test(&Tuple::from_f64s(&[1.0, 0.2])));
    }

    #[test]
    fn mask_order_is_capped() {
        let cov = SkyCoverage::fixed_error(1e-6, radec_decoder());
        assert_eq!(cov.mask().order(), MAX_COVERAGE_DEPTH);
        let cov = SkyCoverage::fixed_error(0.5, radec_decoder());
        assert_eq!(cov.mask().order(), 1);
    }

    #[test]
    fn extended_positions_pass_test() {
        let mut state = 99_u64;
        let mut cov = SkyCoverage::fixed_error(0.002, radec_decoder());
        let mut points = Vec::new();
        for _ in 0..200 {
            let ra = xorshift(&mut state) * TAU;
            let dec = (2.0 * xorshift(&mut state) - 1.0).asin();
            let t = Tuple::from_f64s(&[ra, dec]);
            cov.extend(&t);
            points.push(t);
        }
        // Undecodable tuples are skipped.
        cov.extend(&Tuple::from_f64s(&[f64::NAN, 0.0]));
        cov.extend(&Tuple::from_f64s(&[0.0]));
        assert!(!cov.is_empty());
        assert!(cov.sky_fraction() < 0.5);
        let frozen = cov.freeze();
        let mut test = frozen.create_test();
        assert!(points.iter().all(|t| test.test(t)));
        assert!(!test.test(&Tuple::from_f64s(&[f64::NAN, 0.0])));
    }

    #[test]
    fn union_fraction_bounds() {
        let mut state = 5_u64;
        let a = random_coverage(&mut state, 300, (0.0, 2.0));
        let b = random_coverage(&mut state, 300, (1.5, 3.5));
        let mut overlap = a.clone();
        overlap.intersection(&b).unwrap();
        let f = overlap.sky_fraction();
        assert!(f > 0.0);
        let mut u = a.clone();
        u.union(&b).unwrap();
        let fu = u.sky_fraction();
        assert!(fu >= a.sky_fraction().max(b.sky_fraction()));
        assert!(fu <= a.sky_fraction() + b.sky_fraction() - f + 1e-12);
    }

    #[test]
    fn disjoint_intersection_is_empty() {
        let mut state = 8_u64;
        let mut a = random_coverage(&mut state, 50, (0.0, 1.0));
        let b = random_coverage(&mut state, 50, (3.0, 4.0));
        a.intersection(&b).unwrap();
        assert!(a.is_empty());
    }

    #[test]
    fn variable_error_marks_each_radius() {
        let decoder: ConeDecoder = Arc::new(|t: &Tuple| {
            Some(SkyCone {
                ra: t.f64_at(0)?,
                dec: t.f64_at(1)?,
                radius: t.f64_at(2)?,
            })
        });
        let mut small = SkyCoverage::variable_error(0.01, decoder.clone());
        let mut large = SkyCoverage::variable_error(0.01, decoder);
        small.extend(&Tuple::from_f64s(&[1.0, 0.0, 0.001]));
        large.extend(&Tuple::from_f64s(&[1.0, 0.0, 0.2]));
        assert!(large.sky_fraction() > 10.0 * small.sky_fraction());
    }
}
