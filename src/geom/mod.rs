//! Spherical and planar geometry primitives.

pub mod ellipse;
pub mod sphere;
