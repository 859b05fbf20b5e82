//! Shift-and-add 64-bit arithmetic.
//!
//! The power model runs in an execution mode without native wide multiply
//! or divide, so products and quotients are computed one bit at a time.

/// Multiply `a` by `b`, returning the 128-bit product as `(low, high)`.
#[must_use]
pub fn mul_u64(a: u64, b: u64) -> (u64, u64) {
    let mut low = 0u64;
    let mut high = 0u64;
    let mut addend_low = b;
    let mut addend_high = 0u64;
    let mut multiplier = a;

    while multiplier != 0 {
        if multiplier & 1 != 0 {
            let (sum, carry) = low.overflowing_add(addend_low);
            low = sum;
            high = high.wrapping_add(addend_high).wrapping_add(u64::from(carry));
        }
        addend_high = (addend_high << 1) | (addend_low >> 63);
        addend_low <<= 1;
        multiplier >>= 1;
    }

    (low, high)
}

/// Divide `n` by `d`, returning `(quotient, remainder)`.
///
/// Returns `None` when `d` is zero.
#[must_use]
pub fn div_u64(n: u64, d: u64) -> Option<(u64, u64)> {
    if d == 0 {
        return None;
    }

    let mut quotient = n;
    let mut remainder = 0u64;

    for _ in 0..64 {
        // The bit shifted out of `remainder` still counts towards the compare.
        let overflow = remainder >> 63;
        remainder = (remainder << 1) | (quotient >> 63);
        quotient <<= 1;
        if overflow != 0 || remainder >= d {
            remainder = remainder.wrapping_sub(d);
            quotient |= 1;
        }
    }

    Some((quotient, remainder))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: [u64; 9] = [
        0,
        1,
        3,
        0x7FFF,
        1_000_000_007,
        0xFFFF_FFFF,
        0x1_0000_0001,
        0x8000_0000_0000_0000,
        u64::MAX,
    ];

    #[test]
    fn multiply_matches_wide_product() {
        for &a in &SAMPLES {
            for &b in &SAMPLES {
                let wide = u128::from(a) * u128::from(b);
                assert_eq!(mul_u64(a, b), (wide as u64, (wide >> 64) as u64), "{a} * {b}");
            }
        }
    }

    #[test]
    fn divide_matches_native() {
        for &n in &SAMPLES {
            for &d in SAMPLES.iter().filter(|&&d| d != 0) {
                assert_eq!(div_u64(n, d), Some((n / d, n % d)), "{n} / {d}");
            }
        }
        assert_eq!(div_u64(42, 0), None);
    }

    #[test]
    fn division_undoes_multiplication() {
        let pairs = [(12_345u64, 678u64), (0xFFFF_FFFF, 0xFFFF_FFFF), (1, u64::MAX), (u64::MAX, 1)];
        for (a, b) in pairs {
            let (low, high) = mul_u64(a, b);
            assert_eq!(high, 0);
            assert_eq!(div_u64(low, b).map(|(q, _)| q), Some(a));
        }
    }
}
