//! Planar ellipses and the normalised distance between two of them.
//!
//! The overlap score runs from 0 to 2. It is the scaled distance of one
//! centre from the other ellipse when either centre lies inside the other
//! ellipse: 0 for concentric, 1 for a centre on the other's edge. Otherwise
//! it is 1 plus the mean scaled distance of the closest edge points, which
//! reaches 2 when the ellipses just touch. Disjoint ellipses have no score.

use std::f64::consts::TAU;

/// Angle samples used to bracket the closest edge point.
const EDGE_SAMPLES: usize = 64;
const GOLDEN_STEPS: usize = 80;

/// Ellipse centred on `(x, y)` with semi-axes `a` and `b`.
///
/// `theta` is the angle of the `a` axis from the X axis towards the Y
/// axis, in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipse {
    pub x: f64,
    pub y: f64,
    pub a: f64,
    pub b: f64,
    pub theta: f64,
}

impl Ellipse {
    pub fn new(x: f64, y: f64, a: f64, b: f64, theta: f64) -> Self {
        Self { x, y, a, b, theta }
    }

    pub fn point(x: f64, y: f64) -> Self {
        Self::new(x, y, 0.0, 0.0, 0.0)
    }

    pub fn is_point(&self) -> bool {
        !((self.a > 0.0 || self.b > 0.0) && !self.theta.is_nan())
    }

    pub fn is_circle(&self) -> bool {
        self.a == self.b
    }

    pub fn max_radius(&self) -> f64 {
        self.a.max(self.b)
    }

    /// Distance of `(x, y)` from the centre, in units of the ellipse's
    /// radius in that direction. 1 on the edge.
    pub fn scaled_distance(&self, x: f64, y: f64) -> f64 {
        let (rx, ry) = (x - self.x, y - self.y);
        let (s, c) = self.theta.sin_cos();
        let u = (rx * c + ry * s) / self.a;
        let v = (ry * c - rx * s) / self.b;
        (u * u + v * v).sqrt()
    }

    /// Point on the edge at parametric angle `phi`.
    pub fn edge_point(&self, phi: f64) -> (f64, f64) {
        let (sp, cp) = phi.sin_cos();
        let (st, ct) = self.theta.sin_cos();
        (
            self.x + self.a * cp * ct - self.b * sp * st,
            self.y + self.a * cp * st + self.b * sp * ct,
        )
    }
}

/// Normalised distance between two ellipses, or `None` if they do not
/// overlap.
///
/// With `recognise_circles`, two circles are scored in closed form instead
/// of by searching for the closest edge points.
pub fn overlap_score(e1: &Ellipse, e2: &Ellipse, recognise_circles: bool) -> Option<f64> {
    let (dx, dy) = (e2.x - e1.x, e2.y - e1.y);
    let reach = e1.max_radius() + e2.max_radius();
    if !(dx * dx + dy * dy <= reach * reach) {
        return None;
    }

    match (e1.is_point(), e2.is_point()) {
        (true, true) => return (dx == 0.0 && dy == 0.0).then_some(0.0),
        (true, false) => return within(e2.scaled_distance(e1.x, e1.y)),
        (false, true) => return within(e1.scaled_distance(e2.x, e2.y)),
        (false, false) => {}
    }

    let sc1 = e1.scaled_distance(e2.x, e2.y);
    let sc2 = e2.scaled_distance(e1.x, e1.y);
    if sc1 <= 1.0 || sc2 <= 1.0 {
        return Some(sc1.min(sc2));
    }

    if recognise_circles && e1.is_circle() && e2.is_circle() {
        let (r1, r2) = (e1.a, e2.a);
        let s = dx.hypot(dy);
        return (s <= r1 + r2).then(|| 1.0 + 0.5 * ((s - r2) / r1 + (s - r1) / r2));
    }

    let (px, py) = closest_edge_point(e1, e2);
    let sp1 = e1.scaled_distance(px, py);
    if !(sp1 <= 1.0) {
        return None;
    }
    let (qx, qy) = closest_edge_point(e2, e1);
    let sp2 = e2.scaled_distance(qx, qy).min(1.0);
    Some(1.0 + 0.5 * (sp1 + sp2))
}

fn within(s: f64) -> Option<f64> {
    (s <= 1.0).then_some(s)
}

/// Point on the edge of `e2` with the smallest scaled distance from `e1`.
///
/// Samples the edge, then refines the best sample by golden-section search
/// between its neighbours.
pub fn closest_edge_point(e1: &Ellipse, e2: &Ellipse) -> (f64, f64) {
    let cost = |phi: f64| {
        let (x, y) = e2.edge_point(phi);
        e1.scaled_distance(x, y)
    };
    let step = TAU / EDGE_SAMPLES as f64;
    let mut best = 0.0;
    let mut best_cost = f64::INFINITY;
    for i in 0..EDGE_SAMPLES {
        let phi = i as f64 * step;
        let c = cost(phi);
        if c < best_cost {
            best_cost = c;
            best = phi;
        }
    }

    let inv_golden = (5.0_f64.sqrt() - 1.0) * 0.5;
    let (mut lo, mut hi) = (best - step, best + step);
    let mut m1 = hi - inv_golden * (hi - lo);
    let mut m2 = lo + inv_golden * (hi - lo);
    let (mut c1, mut c2) = (cost(m1), cost(m2));
    for _ in 0..GOLDEN_STEPS {
        if c1 < c2 {
            hi = m2;
            m2 = m1;
            c2 = c1;
            m1 = hi - inv_golden * (hi - lo);
            c1 = cost(m1);
        } else {
            lo = m1;
            m1 = m2;
            c1 = c2;
            m2 = lo + inv_golden * (hi - lo);
            c2 = cost(m2);
        }
    }
    let phi = 0.5 * (lo + hi);
    if cost(phi) <= best_cost {
        e2.edge_point(phi)
    } else {
        e2.edge_point(best)
    }
}
