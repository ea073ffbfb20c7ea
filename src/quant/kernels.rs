//! Integer dot products shared by every integer inference path.

/// Layer-1 MAC: signed weights against raw unsigned pixels.
#[inline]
pub fn dot_i8_u8(w_row: &[i8], x: &[u8]) -> i32 {
    debug_assert_eq!(w_row.len(), x.len());
    let mut acc: i32 = 0;
    for i in 0..w_row.len() { acc += (w_row[i] as i32) * (x[i] as i32); }
    acc
}

/// Layer-2 MAC: signed weights against requantized hidden activations.
#[inline]
pub fn dot_i8_i8(w_row: &[i8], x: &[i8]) -> i32 {
    debug_assert_eq!(w_row.len(), x.len());
    let mut acc: i32 = 0;
    for i in 0..w_row.len() { acc += (w_row[i] as i32) * (x[i] as i32); }
    acc
}

/// Index of the largest value; ties go to the lowest index.
#[inline]
pub fn argmax_i32(v: &[i32]) -> usize {
    let mut best = 0usize;
    for i in 1..v.len() {
        if v[i] > v[best] { best = i; }
    }
    best
}
