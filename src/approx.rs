//! Utilities to approximate equality of floating point values.
//!
//! Rounding differs between code paths (fused and unfused kernels, different
//! thread partitions, a round trip through a model stream), so tensor and
//! network comparisons never use bitwise equality.

/// The default delta accepted between two `f32`s.
pub const F32_DEFAULT_DELTA: f32 = 1e-6;

/// The relative error accepted once values are far from zero.
pub const F32_RELATIVE_ERROR: f32 = 1e-5;

/// The approximated equality enumerated.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApproxEquality {
    /// Within the absolute delta.
    Precise = 0,

    /// Within the relative error of the larger magnitude.
    Relative = 1,

    /// No relative equality.
    Scarce = 2,
}

/// Checks the distance between two values given an absolute delta.
pub trait RelativeEq<Rhs: ?Sized = Self> {
    /// Enumerates the equality of `self` and `rhs`.
    fn approx_eq_with(&self, rhs: &Rhs, delta: f32) -> ApproxEquality;
}

impl RelativeEq for f32 {
    fn approx_eq_with(&self, rhs: &Self, delta: f32) -> ApproxEquality {
        if self == rhs {
            return ApproxEquality::Precise;
        }
        let dif = (self - rhs).abs();
        if dif <= delta {
            ApproxEquality::Precise
        } else if dif <= F32_RELATIVE_ERROR * self.abs().max(rhs.abs()) {
            ApproxEquality::Relative
        } else {
            ApproxEquality::Scarce
        }
    }
}

impl RelativeEq for [f32] {
    fn approx_eq_with(&self, rhs: &Self, delta: f32) -> ApproxEquality {
        if self.len() != rhs.len() {
            return ApproxEquality::Scarce;
        }
        let mut eq = ApproxEquality::Precise;
        for (a, b) in self.iter().zip(rhs) {
            let rating = a.approx_eq_with(b, delta);
            if rating == ApproxEquality::Scarce {
                return rating; // can't improve from here
            }
            eq = eq.max(rating);
        }
        eq
    }
}

/// Approximates the equality of two values with [`F32_DEFAULT_DELTA`].
pub fn approx_eq<T: RelativeEq<T> + ?Sized>(a: &T, b: &T) -> bool {
    approx_eq_delta(a, b, F32_DEFAULT_DELTA)
}

/// Approximates the equality of two values with a custom absolute delta.
pub fn approx_eq_delta<T: RelativeEq<T> + ?Sized>(a: &T, b: &T, delta: f32) -> bool {
    a.approx_eq_with(b, delta) != ApproxEquality::Scarce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_near_zero_use_the_absolute_delta() {
        assert!(approx_eq(&0.0f32, &5e-7));
        assert!(!approx_eq(&0.0f32, &5e-6));
    }

    #[test]
    fn large_scalars_use_the_relative_error() {
        assert_eq!(1000.0f32.approx_eq_with(&1000.001, 1e-6), ApproxEquality::Relative);
        assert!(!approx_eq(&1000.0f32, &1001.0));
    }

    #[test]
    fn slices_of_different_length_are_never_equal() {
        assert!(!approx_eq(&[1.0f32, 2.0][..], &[1.0f32][..]));
        assert!(approx_eq(&[1.0f32, 2.0][..], &[1.0f32, 2.000_000_1][..]));
    }
}
