use std::f64::consts::{FRAC_PI_2, TAU};

/// Convert (RA, Dec) in radians to a unit vector `[x, y, z]`.
pub fn radec_to_xyz(ra: f64, dec: f64) -> [f64; 3] {
    let cos_dec = dec.cos();
    [cos_dec * ra.cos(), cos_dec * ra.sin(), dec.sin()]
}

/// Convert a unit vector to (RA, Dec) in radians.
/// RA is in `[0, 2*pi)`, Dec is in `[-pi/2, pi/2]`.
pub fn xyz_to_radec(xyz: [f64; 3]) -> (f64, f64) {
    let mut ra = f64::atan2(xyz[1], xyz[0]);
    if ra < 0.0 {
        ra += TAU;
    }
    let dec = xyz[2].clamp(-1.0, 1.0).asin();
    (ra, dec)
}

/// Great-circle angular distance between two unit vectors, in radians.
///
/// Loses precision below about a milliarcsecond; use [`separation`] for
/// scoring close pairs.
pub fn angular_distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    dot(a, b).clamp(-1.0, 1.0).acos()
}

/// Great-circle separation between two (RA, Dec) positions in radians,
/// using the haversine formula so that small separations stay accurate.
pub fn separation(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let sin_ddec = ((dec2 - dec1) * 0.5).sin();
    let sin_dra = ((ra2 - ra1) * 0.5).sin();
    let h = sin_ddec * sin_ddec + dec1.cos() * dec2.cos() * sin_dra * sin_dra;
    2.0 * h.clamp(0.0, 1.0).sqrt().asin()
}

/// Whether (RA, Dec) is a usable sky position: finite, with |Dec| <= pi/2.
pub fn is_sky_position(ra: f64, dec: f64) -> bool {
    ra.is_finite() && dec.is_finite() && dec.abs() <= FRAC_PI_2 * (1.0 + 1e-12)
}

/// Wrap RA into `[0, 2*pi)` and clamp Dec into `[-pi/2, pi/2]`.
pub fn normalize_radec(ra: f64, dec: f64) -> (f64, f64) {
    let mut ra = ra.rem_euclid(TAU);
    if ra >= TAU {
        ra = 0.0;
    }
    (ra, dec.clamp(-FRAC_PI_2, FRAC_PI_2))
}

/// Midpoint of two points on the unit sphere (normalized).
pub fn midpoint(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    normalize([a[0] + b[0], a[1] + b[1], a[2] + b[2]])
}

/// Scale a vector to unit length.
pub fn normalize(v: [f64; 3]) -> [f64; 3] {
    let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    let inv = 1.0 / norm;
    [v[0] * inv, v[1] * inv, v[2] * inv]
}

#[inline]
pub fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Gnomonic projection onto the plane tangent at a reference position.
///
/// `xi` grows towards increasing RA and `eta` towards north, both in
/// radians at the tangent point.
#[derive(Debug, Clone, Copy)]
pub struct TangentPlane {
    ra0: f64,
    sin_dec0: f64,
    cos_dec0: f64,
}

impl TangentPlane {
    pub fn new(ra0: f64, dec0: f64) -> Self {
        let (sin_dec0, cos_dec0) = dec0.sin_cos();
        Self {
            ra0,
            sin_dec0,
            cos_dec0,
        }
    }

    /// Tangent point half way between two positions.
    pub fn between(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> Self {
        let (ra, dec) = xyz_to_radec(midpoint(radec_to_xyz(ra1, dec1), radec_to_xyz(ra2, dec2)));
        Self::new(ra, dec)
    }

    /// `(xi, eta)` of a position, or `None` if it is 90 degrees or more
    /// from the tangent point.
    pub fn project(&self, ra: f64, dec: f64) -> Option<(f64, f64)> {
        let (sin_dec, cos_dec) = dec.sin_cos();
        let (sin_dra, cos_dra) = (ra - self.ra0).sin_cos();
        let denom = sin_dec * self.sin_dec0 + cos_dec * self.cos_dec0 * cos_dra;
        if !(denom > 1e-12) {
            return None;
        }
        let xi = cos_dec * sin_dra / denom;
        let eta = (sin_dec * self.cos_dec0 - cos_dec * self.sin_dec0 * cos_dra) / denom;
        Some((xi, eta))
    }
}
