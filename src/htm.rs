//! Hierarchical Triangular Mesh (HTM) tessellation.
//!
//! The sphere starts as the eight faces of an octahedron (trixels `S0..S3`
//! with ids 8–11 and `N0..N3` with ids 12–15). Each trixel is split into four
//! by joining its edge midpoints. Child `k` of trixel `t` has id `4t + k`, so
//! ids at level `L` lie in `[8 * 4^L, 16 * 4^L)`.
//!
//! Edges are great-circle arcs. Every trixel is therefore geodesically convex
//! and lies inside the smallest cap around its vertices.

use std::f64::consts::FRAC_PI_2;

use crate::geom::sphere::{
    angular_distance, cross, dot, midpoint, normalize, normalize_radec, radec_to_xyz,
};

/// Deepest supported level.
pub const MAX_LEVEL: u8 = 20;

const V0: [f64; 3] = [0.0, 0.0, 1.0];
const V1: [f64; 3] = [1.0, 0.0, 0.0];
const V2: [f64; 3] = [0.0, 1.0, 0.0];
const V3: [f64; 3] = [-1.0, 0.0, 0.0];
const V4: [f64; 3] = [0.0, -1.0, 0.0];
const V5: [f64; 3] = [0.0, 0.0, -1.0];

/// Base trixels in id order 8..16, vertices counter-clockwise seen from outside.
const BASE: [[[f64; 3]; 3]; 8] = [
    [V1, V5, V2], // S0
    [V2, V5, V3], // S1
    [V3, V5, V4], // S2
    [V4, V5, V1], // S3
    [V1, V0, V4], // N0
    [V4, V0, V3], // N1
    [V3, V0, V2], // N2
    [V2, V0, V1], // N3
];

type Trixel = [[f64; 3]; 3];

/// Number of trixels at a level: 8 * 4^level.
pub fn ntrixel(level: u8) -> u64 {
    8u64 << (2 * level as u32)
}

/// Characteristic trixel size in radians: the base edge of π/2 halved per level.
pub fn trixel_size(level: u8) -> f64 {
    FRAC_PI_2 / (1u64 << level) as f64
}

/// The finest level whose trixel size is still at least `radius`.
///
/// Non-positive or non-finite radii give [`MAX_LEVEL`].
pub fn level_for_radius(radius: f64) -> u8 {
    if !(radius > 0.0) || !radius.is_finite() {
        return MAX_LEVEL;
    }
    let level = (FRAC_PI_2 / radius).log2().floor();
    if level <= 0.0 {
        0
    } else {
        (level as u64).min(MAX_LEVEL as u64) as u8
    }
}

fn children(t: &Trixel) -> [Trixel; 4] {
    let [v0, v1, v2] = *t;
    let w0 = midpoint(v1, v2);
    let w1 = midpoint(v0, v2);
    let w2 = midpoint(v0, v1);
    [[v0, w2, w1], [v1, w0, w2], [v2, w1, w0], [w0, w1, w2]]
}

/// Smallest of the three edge-plane tests; non-negative means inside.
fn inside_margin(t: &Trixel, p: [f64; 3]) -> f64 {
    let a = dot(cross(t[0], t[1]), p);
    let b = dot(cross(t[1], t[2]), p);
    let c = dot(cross(t[2], t[0]), p);
    a.min(b).min(c)
}

/// Id of the trixel at `level` containing (lon, lat) in radians.
///
/// Points on an edge go to whichever neighbour contains them with the
/// largest margin, so every position gets exactly one id.
pub fn lon_lat_to_trixel(lon: f64, lat: f64, level: u8) -> u64 {
    let (lon, lat) = normalize_radec(lon, lat);
    let p = radec_to_xyz(lon, lat);
    let (mut id, mut tri) = best_of(&BASE, p);
    id += 8;
    for _ in 0..level.min(MAX_LEVEL) {
        let kids = children(&tri);
        let (k, t) = best_of(&kids, p);
        id = (id << 2) + k;
        tri = t;
    }
    id
}

fn best_of(candidates: &[Trixel], p: [f64; 3]) -> (u64, Trixel) {
    let mut best = 0;
    let mut best_margin = f64::NEG_INFINITY;
    for (i, t) in candidates.iter().enumerate() {
        let m = inside_margin(t, p);
        if m > best_margin {
            best_margin = m;
            best = i;
        }
    }
    (best as u64, candidates[best])
}

/// Vertices of a trixel given its id.
pub fn trixel_vertices(id: u64) -> Option<[[f64; 3]; 3]> {
    if id < 8 {
        return None;
    }
    let bits = 63 - id.leading_zeros();
    // Base ids occupy 4 bits (0b1xxx); every level adds two.
    if bits < 3 || (bits - 3) % 2 != 0 {
        return None;
    }
    let level = (bits - 3) / 2;
    let base = (id >> (2 * level)) - 8;
    let mut tri = BASE[base as usize];
    for l in (0..level).rev() {
        let k = (id >> (2 * l)) & 3;
        tri = children(&tri)[k as usize];
    }
    Some(tri)
}

/// Reusable inclusive disc query at a fixed level.
#[derive(Debug, Clone)]
pub struct DiscQuery {
    level: u8,
    stack: Vec<(u8, u64, Trixel)>,
}

impl DiscQuery {
    pub fn new(level: u8) -> Self {
        Self {
            level: level.min(MAX_LEVEL),
            stack: Vec::with_capacity(64),
        }
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    /// Ids of all trixels that may overlap the disc of `radius` radians
    /// around (lon, lat), sorted ascending.
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

        self.stack.clear();
        self.stack
            .extend((0..8u64).rev().map(|i| (0u8, i + 8, BASE[i as usize])));
        while let Some((level, id, tri)) = self.stack.pop() {
            if !cap_may_touch(&tri, centre, radius) {
                continue;
            }
            if level == self.level {
                out.push(id);
            } else {
                let kids = children(&tri);
                for k in (0..4u64).rev() {
                    self.stack.push((level + 1, (id << 2) + k, kids[k as usize]));
                }
            }
        }
    }
}

fn cap_may_touch(tri: &Trixel, centre: [f64; 3], radius: f64) -> bool {
    let c = normalize([
        tri[0][0] + tri[1][0] + tri[2][0],
        tri[0][1] + tri[1][1] + tri[2][1],
        tri[0][2] + tri[1][2] + tri[2][2],
    ]);
    let bound = tri
        .iter()
        .map(|&v| angular_distance(c, v))
        .fold(0.0, f64::max);
    angular_distance(centre, c) <= radius + bound * (1.0 + 1e-9) + 1e-12
}
