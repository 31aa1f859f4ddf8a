//! Tolerant floating-point comparison used by the gain and share arithmetic.
//!
//! Candidate gains that differ only by accumulated rounding must compare
//! equal, otherwise tie retention (and with it the merge groups) would depend
//! on summation order. The tolerance scales with the number of aggregated
//! items, mirroring how the accumulation error itself grows.

/// Relative epsilon for a single `f64` operation.
const EPS: f64 = f64::EPSILON;

/// Whether `a` and `b` are equal within the tolerance of `n` accumulations.
#[must_use]
pub(crate) fn equal_n(a: f64, b: f64, n: usize) -> bool {
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= scale * EPS * (n.max(1) as f64)
}

/// Whether `a` and `b` are equal within a single-operation tolerance.
#[must_use]
pub(crate) fn equal(a: f64, b: f64) -> bool {
    equal_n(a, b, 1)
}

/// Whether `a` is less than `b` beyond the single-operation tolerance.
#[must_use]
pub(crate) fn less(a: f64, b: f64) -> bool {
    a < b && !equal(a, b)
}
