//! Scalar math helpers

use std::f32::consts::PI;

/// Converts degrees to radians
#[inline]
pub fn deg_to_rad(deg: f32) -> f32 {
    deg * PI / 180.0
}

/// Next index in a ring of `n` elements
#[inline]
pub fn next_index(i: usize, n: usize) -> usize {
    if i + 1 < n { i + 1 } else { 0 }
}

/// Previous index in a ring of `n` elements
#[inline]
pub fn prev_index(i: usize, n: usize) -> usize {
    if i >= 1 { i - 1 } else { n - 1 }
}
