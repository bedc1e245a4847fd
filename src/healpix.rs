//! HEALPix (Hierarchical Equal Area isoLatitude Pixelisation) in the nested scheme.
//!
//! The 12 base healpixes are laid out as:
//! - 0–3: north polar cap
//! - 4–7: equatorial belt
//! - 8–11: south polar cap
//!
//! Within each base healpix, `x` increases northeast and `y` increases northwest.
//! The children of nested pixel `h` at depth `d` are `4h..4h+4` at depth `d + 1`.
//!
//! Disc queries are inclusive: every pixel that may touch the disc is returned,
//! together with a few that only come close.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI, TAU};

use crate::geom::sphere::{angular_distance, normalize_radec, radec_to_xyz};

/// Deepest supported depth; nested indices at this depth still fit a `u64`
/// with room to spare and a bitmask would be far too large anyway.
pub const MAX_DEPTH: u8 = 20;

/// Slack applied to the analytic maximum pixel radius.
const PIXRAD_SLACK: f64 = 1.1;

/// Nside for a given depth: 2^depth.
pub fn nside(depth: u8) -> u64 {
    1u64 << depth
}

/// Total number of pixels at a given depth: 12 * nside^2.
pub fn npix(depth: u8) -> u64 {
    12 * nside(depth) * nside(depth)
}

/// Solid angle (steradians) of a single pixel at the given depth.
pub fn pixel_area(depth: u8) -> f64 {
    4.0 * PI / npix(depth) as f64
}

/// Characteristic pixel size in radians: sqrt(4π / npix) = sqrt(π/3) / nside.
pub fn pixel_size(depth: u8) -> f64 {
    (PI / 3.0).sqrt() / nside(depth) as f64
}

/// The finest depth whose pixel size is still at least `radius`.
///
/// Discs of that radius overlap a small bounded number of pixels.
/// Non-positive or non-finite radii give [`MAX_DEPTH`].
pub fn depth_for_radius(radius: f64) -> u8 {
    if !(radius > 0.0) || !radius.is_finite() {
        return MAX_DEPTH;
    }
    let depth = ((PI / 3.0).sqrt() / radius).log2().floor();
    if depth <= 0.0 {
        0
    } else {
        (depth as u64).min(MAX_DEPTH as u64) as u8
    }
}

/// Largest angular distance (radians) between any pixel centre and one of
/// its corners at the given depth.
pub fn max_pixel_radius(depth: u8) -> f64 {
    let ns = nside(depth) as f64;
    let va = z_phi_to_xyz(2.0 / 3.0, PI / (4.0 * ns));
    let t1 = 1.0 - 1.0 / ns;
    let vb = z_phi_to_xyz(1.0 - t1 * t1 / 3.0, 0.0);
    angular_distance(va, vb)
}

fn z_phi_to_xyz(z: f64, phi: f64) -> [f64; 3] {
    let st = (1.0 - z * z).max(0.0).sqrt();
    [st * phi.cos(), st * phi.sin(), z]
}

/// Convert (lon, lat) in radians to a nested HEALPix pixel index.
///
/// `lon` is right ascension (or longitude) in [0, 2π).
/// `lat` is declination (or latitude) in [-π/2, π/2].
pub fn lon_lat_to_nested(lon: f64, lat: f64, depth: u8) -> u64 {
    let (base, x, y) = lon_lat_to_base_xy(lon, lat, nside(depth) as f64);
    compose_nested(base, x, y, depth)
}

/// Convert a nested HEALPix pixel index to the (lon, lat) of its center.
///
/// Returns (lon, lat) in radians.
pub fn nested_to_center(hash: u64, depth: u8) -> (f64, f64) {
    let (base, x, y) = decompose_nested(hash, depth);
    base_xy_to_lon_lat(base, x as f64 + 0.5, y as f64 + 0.5, nside(depth) as f64)
}

/// Reusable inclusive disc query at a fixed depth.
///
/// Holds the per-depth bounding radii and the traversal stack, so it is
/// cheap to call repeatedly but must not be shared between threads.
#[derive(Debug, Clone)]
pub struct DiscQuery {
    depth: u8,
    bounds: Vec<f64>,
    stack: Vec<(u8, u64)>,
}

impl DiscQuery {
    pub fn new(depth: u8) -> Self {
        let depth = depth.min(MAX_DEPTH);
        let bounds = (0..=depth)
            .map(|d| max_pixel_radius(d) * PIXRAD_SLACK + 1e-12)
            .collect();
        Self {
            depth,
            bounds,
            stack: Vec::with_capacity(64),
        }
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Nested indices of all pixels that may overlap the disc of `radius`
    /// radians around (lon, lat), sorted ascending.
    ///
    /// Negative or NaN radii are treated as zero.
    pub fn pixels(&mut self, lon: f64, lat: f64, radius: f64) -> Vec<u64> {
        let mut out = Vec::new();
        self.pixels_into(lon, lat, radius, &mut out);
        out
    }

    /// As [`DiscQuery::pixels`], appending to `out`.
    pub fn pixels_into(&mut self, lon: f64, lat: f64, radius: f64, out: &mut Vec<u64>) {
        let radius = if radius > 0.0 { radius } else { 0.0 };
        let (lon, lat) = normalize_radec(lon, lat);
        let centre = radec_to_xyz(lon, lat);

        // Depth-first with children pushed in reverse, so output is ascending.
        self.stack.clear();
        self.stack.extend((0..12u64).rev().map(|base| (0u8, base)));
        while let Some((d, hash)) = self.stack.pop() {
            let (clon, clat) = nested_to_center(hash, d);
            let dist = angular_distance(centre, radec_to_xyz(clon, clat));
            if dist > radius + self.bounds[d as usize] {
                continue;
            }
            if d == self.depth {
                out.push(hash);
            } else {
                let first = hash << 2;
                self.stack.extend((0..4u64).rev().map(|k| (d + 1, first + k)));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Internal: base healpix classification
// ---------------------------------------------------------------------------

fn is_north(base: u64) -> bool {
    base <= 3
}

fn is_south(base: u64) -> bool {
    base >= 8
}

// ---------------------------------------------------------------------------
// Internal: coordinate ↔ (base, x, y)
// ---------------------------------------------------------------------------

/// Convert (lon, lat) to (base_hp, x, y) in the XY scheme with continuous coords.
fn lon_lat_to_base_xy(lon: f64, lat: f64, ns: f64) -> (u64, u64, u64) {
    let z = lat.sin();
    let mut phi = lon;
    if phi < 0.0 {
        phi += TAU;
    }
    if phi >= TAU {
        phi -= TAU;
    }

    let phi_t = phi % FRAC_PI_2;

    // Determine quadrant column
    let column = ((phi / FRAC_PI_2).floor() as i64).rem_euclid(4) as u64;

    if z.abs() >= 2.0 / 3.0 {
        // Polar cap
        let north = z >= 0.0;
        let zfactor = if north { 1.0 } else { -1.0 };

        // Solve eqns 19/20 from the HEALPix paper for kx = Ns - xx, ky = Ns - yy
        let root_x = (1.0 - z * zfactor) * 3.0 * (ns * (2.0 * phi_t - PI) / PI).powi(2);
        let kx = if root_x <= 0.0 { 0.0 } else { root_x.sqrt() };

        let root_y = (1.0 - z * zfactor) * 3.0 * (ns * 2.0 * phi_t / PI).powi(2);
        let ky = if root_y <= 0.0 { 0.0 } else { root_y.sqrt() };

        let (xx, yy) = if north { (ns - kx, ns - ky) } else { (ky, kx) };

        let x = (xx.floor() as u64).min(ns as u64 - 1);
        let y = (yy.floor() as u64).min(ns as u64 - 1);

        let base = if north { column } else { 8 + column };
        (base, x, y)
    } else {
        // Equatorial region
        let zunits = (z + 2.0 / 3.0) / (4.0 / 3.0);
        let phiunits = phi_t / FRAC_PI_2;

        let u1 = zunits + phiunits;
        let u2 = zunits - phiunits + 1.0;

        let mut xx = u1 * ns;
        let mut yy = u2 * ns;

        let base = if xx >= ns {
            xx -= ns;
            if yy >= ns {
                yy -= ns;
                column // north polar
            } else {
                ((column + 1) % 4) + 4 // right equatorial
            }
        } else if yy >= ns {
            yy -= ns;
            column + 4 // left equatorial
        } else {
            8 + column // south polar
        };

        let x = (xx.floor() as u64).min(ns as u64 - 1);
        let y = (yy.floor() as u64).min(ns as u64 - 1);

        (base, x, y)
    }
}

/// Convert (base_hp, x, y) continuous coords back to (lon, lat).
fn base_xy_to_lon_lat(base: u64, x: f64, y: f64, ns: f64) -> (f64, f64) {
    let x_norm = x / ns;
    let y_norm = y / ns;

    // Check if this pixel is in the polar or equatorial regime
    let is_polar_region = if is_north(base) {
        (x_norm + y_norm) > 1.0
    } else if is_south(base) {
        (x_norm + y_norm) < 1.0
    } else {
        false
    };

    if !is_polar_region {
        // Equatorial computation
        let (phi_off, z_off, chp) = if base <= 3 {
            (1.0, 0.0, base)
        } else if base <= 7 {
            (0.0, -1.0, base - 4)
        } else {
            (1.0, -2.0, base - 8)
        };

        let z = (2.0 / 3.0) * (x_norm + y_norm + z_off);
        let phi = FRAC_PI_4 * (x_norm - y_norm + phi_off + 2.0 * chp as f64);

        let lat = z.clamp(-1.0, 1.0).asin();
        let mut lon = phi;
        if lon < 0.0 {
            lon += TAU;
        }
        if lon >= TAU {
            lon -= TAU;
        }
        (lon, lat)
    } else {
        // Polar cap: inverse of eqns 19/20 from HEALPix paper
        let north = is_north(base);
        let zfactor = if north { 1.0 } else { -1.0 };

        // For south polar, swap and flip to work in north-polar convention
        let (px, py) = if north { (x, y) } else { (ns - y, ns - x) };

        let kx = ns - px;
        let ky = ns - py;

        // phi_t = pi * (Ns - y) / (2 * ((Ns - x) + (Ns - y)))
        let phi_t = if kx + ky == 0.0 {
            0.0
        } else {
            PI * ky / (2.0 * (kx + ky))
        };

        // Recover z, using two branches to avoid division-by-zero
        let z = if phi_t < FRAC_PI_4 {
            let denom = (2.0 * phi_t - PI) * ns;
            if denom.abs() < 1e-15 {
                zfactor
            } else {
                let val = PI * kx / denom;
                (1.0 - val * val / 3.0) * zfactor
            }
        } else {
            let denom = 2.0 * phi_t * ns;
            if denom.abs() < 1e-15 {
                zfactor
            } else {
                let val = PI * ky / denom;
                (1.0 - val * val / 3.0) * zfactor
            }
        };

        let base_col = if is_south(base) { base - 8 } else { base };
        let phi = FRAC_PI_2 * base_col as f64 + phi_t;

        let lat = z.clamp(-1.0, 1.0).asin();
        let mut lon = phi;
        if lon < 0.0 {
            lon += TAU;
        }
        if lon >= TAU {
            lon -= TAU;
        }
        (lon, lat)
    }
}

// ---------------------------------------------------------------------------
// Internal: XY ↔ nested bit-interleaving
// ---------------------------------------------------------------------------

/// Compose a nested index from (base, x, y).
fn compose_nested(base: u64, x: u64, y: u64, depth: u8) -> u64 {
    let ns2 = nside(depth) * nside(depth);
    let sub = xy_to_nested_sub(x, y);
    base * ns2 + sub
}

/// Decompose a nested index into (base, x, y).
fn decompose_nested(hash: u64, depth: u8) -> (u64, u64, u64) {
    let ns2 = nside(depth) * nside(depth);
    let base = hash / ns2;
    let sub = hash % ns2;
    let (x, y) = nested_sub_to_xy(sub);
    (base, x, y)
}

/// Bit-interleave (x, y) → sub-index. x provides even bits, y provides odd bits.
fn xy_to_nested_sub(x: u64, y: u64) -> u64 {
    let mut result = 0u64;
    let mut xx = x;
    let mut yy = y;
    let mut bit = 0;
    while xx > 0 || yy > 0 {
        result |= (xx & 1) << bit;
        bit += 1;
        result |= (yy & 1) << bit;
        bit += 1;
        xx >>= 1;
        yy >>= 1;
    }
    result
}

/// De-interleave sub-index → (x, y).
fn nested_sub_to_xy(sub: u64) -> (u64, u64) {
    let mut x = 0u64;
    let mut y = 0u64;
    let mut s = sub;
    let mut bit = 0;
    while s > 0 {
        x |= (s & 1) << bit;
        s >>= 1;
        y |= (s & 1) << bit;
        s >>= 1;
        bit += 1;
    }
    (x, y)
}
