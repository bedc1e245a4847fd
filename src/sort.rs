//! Stable sorting of integer row references with caller comparators.
//!
//! The parallel sorts are recursive merge sorts on `rayon::join`: both
//! halves are sorted concurrently, then merged back into the main array by a
//! parallel merge that splits the larger run at its midpoint and finds the
//! partner split in the smaller run by binary search. Small pieces fall back
//! to [`int_sort`]. All variants are stable and give identical output for
//! the same input and comparator.

use std::cmp::Ordering;
use std::sync::Mutex;

/// Below this many elements a piece is sorted or merged sequentially.
pub const SORT_GRANULARITY: usize = 4096;

const RUN: usize = 32;

/// Stable sequential sort.
///
/// Runs of 32 are insertion sorted, then merged bottom-up through one
/// scratch buffer.
pub fn int_sort<F>(a: &mut [i32], mut cmp: F)
where
    F: FnMut(i32, i32) -> Ordering,
{
    if a.len() < 2 {
        return;
    }
    let mut buf = vec![0; a.len()];
    sort_with_buf(a, &mut buf, &mut cmp);
}

fn sort_with_buf(a: &mut [i32], buf: &mut [i32], cmp: &mut dyn FnMut(i32, i32) -> Ordering) {
    let n = a.len();
    for chunk in a.chunks_mut(RUN) {
        insertion_sort(chunk, cmp);
    }
    let mut width = RUN;
    let mut in_buf = false;
    while width < n {
        if in_buf {
            merge_pass(buf, a, width, cmp);
        } else {
            merge_pass(a, buf, width, cmp);
        }
        in_buf = !in_buf;
        width *= 2;
    }
    if in_buf {
        a.copy_from_slice(buf);
    }
}

fn insertion_sort(a: &mut [i32], cmp: &mut dyn FnMut(i32, i32) -> Ordering) {
    for i in 1..a.len() {
        let x = a[i];
        let mut j = i;
        while j > 0 && cmp(x, a[j - 1]) == Ordering::Less {
            a[j] = a[j - 1];
            j -= 1;
        }
        a[j] = x;
    }
}

fn merge_pass(
    src: &[i32],
    dst: &mut [i32],
    width: usize,
    cmp: &mut dyn FnMut(i32, i32) -> Ordering,
) {
    let n = src.len();
    let mut lo = 0;
    while lo < n {
        let mid = (lo + width).min(n);
        let hi = (lo + 2 * width).min(n);
        merge(&src[lo..mid], &src[mid..hi], &mut dst[lo..hi], cmp);
        lo = hi;
    }
}

/// Merge two sorted runs into `out`; on ties the left run goes first.
fn merge(
    left: &[i32],
    right: &[i32],
    out: &mut [i32],
    cmp: &mut dyn FnMut(i32, i32) -> Ordering,
) {
    let (mut i, mut j) = (0, 0);
    for slot in out.iter_mut() {
        let take_left = j >= right.len()
            || (i < left.len() && cmp(right[j], left[i]) != Ordering::Less);
        if take_left {
            *slot = left[i];
            i += 1;
        } else {
            *slot = right[j];
            j += 1;
        }
    }
}

/// Stable parallel sort with one comparator shared by all threads.
pub fn parallel_int_sort<F>(a: &mut [i32], cmp: F)
where
    F: Fn(i32, i32) -> Ordering + Sync,
{
    run_parallel(a, &Shared(&cmp));
}

/// Stable parallel sort with a comparator made per worker thread.
///
/// `factory` is called at most once per thread that takes part. Comparator
/// instances are never used by two tasks at once, so they may hold
/// unsynchronised scratch state.
pub fn parallel_int_sort_with<G, C>(a: &mut [i32], factory: G)
where
    G: Fn() -> C + Sync,
    C: FnMut(i32, i32) -> Ordering + Send,
{
    // The extra slot serves callers outside the pool.
    let slots = (0..=rayon::current_num_threads())
        .map(|_| Mutex::new(None))
        .collect();
    run_parallel(a, &PerThread { factory, slots });
}

/// Source of a comparator for the calling thread.
trait Comparators: Sync {
    fn with<R>(&self, f: impl FnOnce(&mut dyn FnMut(i32, i32) -> Ordering) -> R) -> R;
}

struct Shared<'a, F>(&'a F);

impl<F> Comparators for Shared<'_, F>
where
    F: Fn(i32, i32) -> Ordering + Sync,
{
    fn with<R>(&self, f: impl FnOnce(&mut dyn FnMut(i32, i32) -> Ordering) -> R) -> R {
        let mut cmp = |a, b| (self.0)(a, b);
        f(&mut cmp)
    }
}

struct PerThread<G, C> {
    factory: G,
    slots: Vec<Mutex<Option<C>>>,
}

impl<G, C> Comparators for PerThread<G, C>
where
    G: Fn() -> C + Sync,
    C: FnMut(i32, i32) -> Ordering + Send,
{
    fn with<R>(&self, f: impl FnOnce(&mut dyn FnMut(i32, i32) -> Ordering) -> R) -> R {
        let last = self.slots.len() - 1;
        let index = rayon::current_thread_index().map_or(last, |i| i.min(last));
        // Callers never join while holding the lock, so a slot is only ever
        // held by the thread it belongs to.
        let mut slot = self.slots[index]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let cmp = slot.get_or_insert_with(&self.factory);
        f(cmp)
    }
}

fn run_parallel<C: Comparators>(a: &mut [i32], cmps: &C) {
    if a.len() < 2 {
        return;
    }
    let mut buf = vec![0; a.len()];
    if a.len() <= SORT_GRANULARITY || rayon::current_num_threads() == 1 {
        cmps.with(|cmp| sort_with_buf(a, &mut buf, cmp));
    } else {
        sort_rec(a, &mut buf, cmps);
    }
}

fn sort_rec<C: Comparators>(a: &mut [i32], buf: &mut [i32], cmps: &C) {
    if a.len() <= SORT_GRANULARITY {
        cmps.with(|cmp| sort_with_buf(a, buf, cmp));
        return;
    }
    let mid = a.len() / 2;
    {
        let (al, ar) = a.split_at_mut(mid);
        let (bl, br) = buf.split_at_mut(mid);
        rayon::join(|| sort_rec(al, bl, cmps), || sort_rec(ar, br, cmps));
    }
    buf.copy_from_slice(a);
    let (left, right) = buf.split_at(mid);
    par_merge(left, right, a, cmps);
}

fn par_merge<C: Comparators>(left: &[i32], right: &[i32], out: &mut [i32], cmps: &C) {
    if left.len() + right.len() <= SORT_GRANULARITY {
        cmps.with(|cmp| merge(left, right, out, cmp));
        return;
    }
    let (lm, rm) = if left.len() >= right.len() {
        let lm = left.len() / 2;
        let pivot = left[lm];
        // Right elements equal to the pivot stay behind it.
        let rm = cmps.with(|cmp| right.partition_point(|&x| cmp(x, pivot) == Ordering::Less));
        (lm, rm)
    } else {
        let rm = right.len() / 2;
        let pivot = right[rm];
        // Left elements equal to the pivot go ahead of it.
        let lm = cmps.with(|cmp| left.partition_point(|&x| cmp(x, pivot) != Ordering::Greater));
        (lm, rm)
    };
    let (out_lo, out_hi) = out.split_at_mut(lm + rm);
    rayon::join(
        || par_merge(&left[..lm], &right[..rm], out_lo, cmps),
        || par_merge(&left[lm..], &right[rm..], out_hi, cmps),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn xorshift(state: &mut u64) -> u64 {
        *state ^= *state << 13;
        *state ^= *state >> 7;
        *state ^= *state << 17;
        *state
    }

    /// Indices 0..n whose keys collide often, so stability matters.
    fn keyed(n: usize, distinct: u64, seed: u64) -> (Vec<i32>, Vec<u64>) {
        let mut state = seed;
        let keys = (0..n).map(|_| xorshift(&mut state) % distinct).collect();
        ((0..n as i32).collect(), keys)
    }

    fn reference(idx: &[i32], keys: &[u64]) -> Vec<i32> {
        let mut v = idx.to_vec();
        v.sort_by_key(|&i| keys[i as usize]);
        v
    }

    #[test]
    fn sequential_is_stable() {
        for n in [0, 1, 2, 31, 32, 33, 100, 1000, 5000] {
            let (mut idx, keys) = keyed(n, 17, 3 + n as u64);
            let expected = reference(&idx, &keys);
            int_sort(&mut idx, |a, b| keys[a as usize].cmp(&keys[b as usize]));
            assert_eq!(idx, expected, "n = {n}");
        }
    }

    #[test]
    fn parallel_matches_sequential() {
        for n in [0, 1, 100, SORT_GRANULARITY - 1, SORT_GRANULARITY + 1, 50_000] {
            let (idx, keys) = keyed(n, 97, 11 + n as u64);
            let cmp = |a: i32, b: i32| keys[a as usize].cmp(&keys[b as usize]);
            let mut seq = idx.clone();
            int_sort(&mut seq, cmp);
            let mut par = idx.clone();
            parallel_int_sort(&mut par, cmp);
            let mut per_thread = idx.clone();
            parallel_int_sort_with(&mut per_thread, || cmp);
            assert_eq!(par, seq, "n = {n}");
            assert_eq!(per_thread, seq, "n = {n}");
            assert_eq!(seq, reference(&idx, &keys));
        }
    }

    #[test]
    fn factory_called_at_most_once_per_thread() {
        let (mut idx, keys) = keyed(40_000, 1000, 5);
        let made = AtomicUsize::new(0);
        parallel_int_sort_with(&mut idx, || {
            made.fetch_add(1, AtomicOrdering::Relaxed);
            // Unsynchronised state is fine: each instance stays on one thread.
            let calls = Cell::new(0u64);
            let keys = &keys;
            move |a: i32, b: i32| {
                calls.set(calls.get() + 1);
                keys[a as usize].cmp(&keys[b as usize])
            }
        });
        assert!(made.load(AtomicOrdering::Relaxed) <= rayon::current_num_threads() + 1);
        assert_eq!(idx, reference(&(0..40_000).collect::<Vec<_>>(), &keys));
    }

    #[test]
    fn sorts_plain_values() {
        let mut state = 1234_u64;
        let mut values: Vec<i32> = (0..10_000).map(|_| xorshift(&mut state) as i32).collect();
        let mut expected = values.clone();
        expected.sort();
        parallel_int_sort(&mut values, |a, b| a.cmp(&b));
        assert_eq!(values, expected);
    }

    #[test]
    fn reverse_comparator() {
        let mut values: Vec<i32> = (0..20_000).collect();
        parallel_int_sort(&mut values, |a, b| b.cmp(&a));
        assert!(values.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    #[should_panic(expected = "comparator failure")]
    fn comparator_panic_propagates() {
        let mut values: Vec<i32> = (0..20_000).rev().collect();
        parallel_int_sort(&mut values, |a, b| {
            if a == 777 {
                panic!("comparator failure");
            }
            a.cmp(&b)
        });
    }
}
