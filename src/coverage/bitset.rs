//! Bitmask over the nested HEALPix pixels of one order.

use crate::healpix;
use crate::{MatchError, Result};

/// Set of HEALPix nested pixels at a fixed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitsetMask {
    order: u8,
    words: Vec<u64>,
}

impl BitsetMask {
    pub fn new(order: u8) -> Self {
        let order = order.min(healpix::MAX_DEPTH);
        let nbits = healpix::npix(order);
        Self {
            order,
            words: vec![0; nbits.div_ceil(64) as usize],
        }
    }

    pub fn order(&self) -> u8 {
        self.order
    }

    /// Mark pixel `index` given at `order`.
    ///
    /// A coarser pixel marks all of its descendants at the mask's order; a
    /// finer pixel marks its ancestor.
    pub fn add_pixel(&mut self, order: u8, index: u64) {
        if order <= self.order {
            let shift = 2 * u32::from(self.order - order);
            let lo = index << shift;
            let hi = (index + 1) << shift;
            self.set_range(lo, hi.min(healpix::npix(self.order)));
        } else {
            let shift = 2 * u32::from(order - self.order);
            self.set_range(index >> shift, (index >> shift) + 1);
        }
    }

    fn set_range(&mut self, lo: u64, hi: u64) {
        let mut i = lo;
        while i < hi {
            let word = (i / 64) as usize;
            let bit = i % 64;
            let span = (64 - bit).min(hi - i);
            let mask = if span == 64 {
                u64::MAX
            } else {
                ((1u64 << span) - 1) << bit
            };
            self.words[word] |= mask;
            i += span;
        }
    }

    pub fn contains(&self, index: u64) -> bool {
        match self.words.get((index / 64) as usize) {
            Some(w) => w & (1 << (index % 64)) != 0,
            None => false,
        }
    }

    pub fn cardinality(&self) -> u64 {
        self.words.iter().map(|w| u64::from(w.count_ones())).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Marked area as a fraction of the sphere.
    pub fn sky_fraction(&self) -> f64 {
        self.cardinality() as f64 / healpix::npix(self.order) as f64
    }

    pub fn union(&mut self, other: &BitsetMask) -> Result<()> {
        self.check_order(other)?;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a |= b;
        }
        Ok(())
    }

    pub fn intersection(&mut self, other: &BitsetMask) -> Result<()> {
        self.check_order(other)?;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a &= b;
        }
        Ok(())
    }

    fn check_order(&self, other: &BitsetMask) -> Result<()> {
        if self.order == other.order {
            Ok(())
        } else {
            Err(MatchError::CoverageMismatch(format!(
                "mask orders {} and {}",
                self.order, other.order
            )))
        }
    }

    /// Marked pixel indices in ascending order.
    pub fn iter_pixels(&self) -> impl Iterator<Item = u64> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &w)| {
            let base = i as u64 * 64;
            let mut rest = w;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros() as u64;
                rest &= rest - 1;
                Some(base + bit)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coarse_pixel_marks_descendants() {
        let mut mask = BitsetMask::new(4);
        mask.add_pixel(1, 5);
        let expected = 4u64.pow(3);
        assert_eq!(mask.cardinality(), expected);
        let fraction = expected as f64 / healpix::npix(4) as f64;
        assert!((mask.sky_fraction() - fraction).abs() < 1e-15);
        mask.add_pixel(1, 5);
        assert!((mask.sky_fraction() - fraction).abs() < 1e-15);
        let pixels: Vec<u64> = mask.iter_pixels().collect();
        assert_eq!(pixels.first(), Some(&(5 << 6)));
        assert_eq!(pixels.last(), Some(&((6 << 6) - 1)));
    }

    #[test]
    fn fine_pixel_marks_ancestor() {
        let mut mask = BitsetMask::new(2);
        mask.add_pixel(5, 1000);
        assert_eq!(mask.cardinality(), 1);
        assert!(mask.contains(1000 >> 6));
    }

    #[test]
    fn whole_base_pixel_at_order_zero() {
        let mut mask = BitsetMask::new(0);
        mask.add_pixel(0, 11);
        assert!(mask.contains(11));
        assert!(!mask.contains(10));
        assert!(!mask.contains(12));
        mask.add_pixel(0, 0);
        assert_eq!(mask.iter_pixels().collect::<Vec<_>>(), vec![0, 11]);
    }

    #[test]
    fn set_ops() {
        let mut a = BitsetMask::new(3);
        let mut b = BitsetMask::new(3);
        a.add_pixel(3, 10);
        a.add_pixel(3, 11);
        b.add_pixel(3, 11);
        b.add_pixel(3, 700);
        let mut u = a.clone();
        u.union(&b).unwrap();
        assert_eq!(u.cardinality(), 3);
        a.intersection(&b).unwrap();
        assert_eq!(a.iter_pixels().collect::<Vec<_>>(), vec![11]);
        assert!(a.union(&BitsetMask::new(4)).is_err());
    }
}
