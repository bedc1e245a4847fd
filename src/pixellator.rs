//! Sky pixellation used for binning positions with an angular error.
//!
//! A [`SkyPixellator`] pairs a tessellation (HEALPix or HTM) with a
//! resolution. The resolution follows the match scale unless fixed
//! explicitly. Cone pixers turn a disc into the set of pixel indices it may
//! overlap. They carry traversal scratch, so each thread makes its own from
//! the factory.

use crate::geom::sphere::{normalize, xyz_to_radec};
use crate::{healpix, htm};

/// Which tessellation a pixellator uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tessellation {
    Healpix,
    Htm,
}

impl Tessellation {
    /// Finest order whose pixels are at least `radius` across.
    pub fn order_for_radius(self, radius: f64) -> u8 {
        match self {
            Tessellation::Healpix => healpix::depth_for_radius(radius),
            Tessellation::Htm => htm::level_for_radius(radius),
        }
    }

    pub fn max_order(self) -> u8 {
        match self {
            Tessellation::Healpix => healpix::MAX_DEPTH,
            Tessellation::Htm => htm::MAX_LEVEL,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Tessellation::Healpix => "HEALPix",
            Tessellation::Htm => "HTM",
        }
    }

    /// Index of the pixel at `order` containing (ra, dec), radians.
    pub fn pixel_at(self, ra: f64, dec: f64, order: u8) -> u64 {
        match self {
            Tessellation::Healpix => healpix::lon_lat_to_nested(ra, dec, order),
            Tessellation::Htm => htm::lon_lat_to_trixel(ra, dec, order),
        }
    }

    /// Centre (ra, dec) of a pixel, radians. HTM centres are the
    /// normalised vertex mean. `None` for an invalid index.
    pub fn pixel_center(self, pixel: u64, order: u8) -> Option<(f64, f64)> {
        match self {
            Tessellation::Healpix => {
                (pixel < healpix::npix(order)).then(|| healpix::nested_to_center(pixel, order))
            }
            Tessellation::Htm => {
                let [a, b, c] = htm::trixel_vertices(pixel)?;
                let sum = [a[0] + b[0] + c[0], a[1] + b[1] + c[1], a[2] + b[2] + c[2]];
                Some(xyz_to_radec(normalize(sum)))
            }
        }
    }
}

/// Sky pixellator with a scale-driven or fixed resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct SkyPixellator {
    tessellation: Tessellation,
    scale: f64,
    fixed_order: Option<u8>,
}

impl SkyPixellator {
    pub fn new(tessellation: Tessellation) -> Self {
        Self {
            tessellation,
            scale: f64::NAN,
            fixed_order: None,
        }
    }

    pub fn healpix() -> Self {
        Self::new(Tessellation::Healpix)
    }

    pub fn htm() -> Self {
        Self::new(Tessellation::Htm)
    }

    pub fn tessellation(&self) -> Tessellation {
        self.tessellation
    }

    /// Record the typical match radius (radians) the pixellation should suit.
    pub fn set_scale(&mut self, radius: f64) {
        self.scale = radius;
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Pin the order, or return to scale-driven selection with `None`.
    pub fn set_order(&mut self, order: Option<u8>) {
        self.fixed_order = order.map(|o| o.min(self.tessellation.max_order()));
    }

    /// Resolution order currently in effect.
    pub fn order(&self) -> u8 {
        self.fixed_order
            .unwrap_or_else(|| self.tessellation.order_for_radius(self.scale))
    }

    /// Factory for pixers that all use one fixed cone radius.
    pub fn create_fixed_radius_pixer_factory(
        &self,
        radius: f64,
    ) -> impl Fn() -> FixedRadiusConePixer + Send + Sync + 'static {
        let tessellation = self.tessellation;
        let order = self.order();
        move || FixedRadiusConePixer {
            query: DiscQuery::new(tessellation, order),
            radius,
        }
    }

    /// Factory for pixers that take the cone radius per call.
    pub fn create_variable_radius_pixer_factory(
        &self,
    ) -> impl Fn() -> VariableRadiusConePixer + Send + Sync + 'static {
        let tessellation = self.tessellation;
        let order = self.order();
        move || VariableRadiusConePixer {
            query: DiscQuery::new(tessellation, order),
        }
    }
}

#[derive(Debug, Clone)]
enum DiscQuery {
    Healpix(healpix::DiscQuery),
    Htm(htm::DiscQuery),
}

impl DiscQuery {
    fn new(tessellation: Tessellation, order: u8) -> Self {
        match tessellation {
            Tessellation::Healpix => DiscQuery::Healpix(healpix::DiscQuery::new(order)),
            Tessellation::Htm => DiscQuery::Htm(htm::DiscQuery::new(order)),
        }
    }

    fn pixels(&mut self, ra: f64, dec: f64, radius: f64) -> Vec<u64> {
        match self {
            DiscQuery::Healpix(q) => q.pixels(ra, dec, radius),
            DiscQuery::Htm(q) => q.pixels(ra, dec, radius),
        }
    }

    fn order(&self) -> u8 {
        match self {
            DiscQuery::Healpix(q) => q.depth(),
            DiscQuery::Htm(q) => q.level(),
        }
    }
}

/// Maps a position to the pixels overlapped by a cone of fixed radius.
#[derive(Debug, Clone)]
pub struct FixedRadiusConePixer {
    query: DiscQuery,
    radius: f64,
}

impl FixedRadiusConePixer {
    /// Pixels overlapped by the cone at (ra, dec), radians, sorted ascending.
    pub fn pixels(&mut self, ra: f64, dec: f64) -> Vec<u64> {
        self.query.pixels(ra, dec, self.radius)
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn order(&self) -> u8 {
        self.query.order()
    }
}

/// Maps a position and radius to the pixels overlapped by that cone.
#[derive(Debug, Clone)]
pub struct VariableRadiusConePixer {
    query: DiscQuery,
}

impl VariableRadiusConePixer {
    /// Pixels overlapped by the cone at (ra, dec) of `radius`, all radians.
    pub fn pixels(&mut self, ra: f64, dec: f64, radius: f64) -> Vec<u64> {
        self.query.pixels(ra, dec, radius)
    }

    pub fn order(&self) -> u8 {
        self.query.order()
    }
}
