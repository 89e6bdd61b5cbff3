use crate::error::{NetworkError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scale of [`ActivationType::LeCunTanh`].
const LECUN_A: f32 = 1.7159;
/// Inner slope of [`ActivationType::LeCunTanh`].
const LECUN_B: f32 = 2.0 / 3.0;
/// Negative slope of [`ActivationType::LeakyReLU`].
const LEAKY_SLOPE: f32 = 0.01;

/// The nonlinearity applied by a layer, selected by tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ActivationType {
    /// `1 / (1 + e^-x)`
    Sigmoid = 0,
    /// `tanh(x)`
    Tanh = 1,
    /// `1.7159 · tanh(2x/3)`
    LeCunTanh = 2,
    /// `max(0, x)`
    #[serde(rename = "relu")]
    ReLU = 3,
    /// `x` if positive, `0.01x` otherwise.
    #[serde(rename = "leaky_relu")]
    LeakyReLU = 4,
    /// `|x|`
    #[serde(rename = "absolute_relu")]
    AbsoluteReLU = 5,
    /// Row-wise normalized exponential.
    Softmax = 6,
    /// `ln(1 + e^x)`
    Softplus = 7,
    /// `x` if non-negative, `e^x - 1` otherwise.
    #[serde(rename = "elu")]
    ELU = 8,
    /// `x`
    Identity = 9,
}

impl ActivationType {
    /// Whether the function is applied independently to every value.
    ///
    /// Only softmax needs a whole row.
    pub const fn is_elementwise(self) -> bool {
        !matches!(self, Self::Softmax)
    }

    /// Applies the function to a single activity.
    ///
    /// For [`ActivationType::Softmax`] this returns `e^x`; the row
    /// normalization is done by [`softmax_row`].
    #[inline]
    pub fn activate(self, x: f32) -> f32 {
        match self {
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::Tanh => x.tanh(),
            Self::LeCunTanh => LECUN_A * (LECUN_B * x).tanh(),
            Self::ReLU => {
                if x > 0.0 {
                    x
                } else {
                    0.0
                }
            }
            Self::LeakyReLU => {
                if x > 0.0 {
                    x
                } else {
                    LEAKY_SLOPE * x
                }
            }
            Self::AbsoluteReLU => x.abs(),
            Self::Softmax => x.exp(),
            Self::Softplus => x.max(0.0) + (-x.abs()).exp().ln_1p(),
            Self::ELU => {
                if x >= 0.0 {
                    x
                } else {
                    x.exp_m1()
                }
            }
            Self::Identity => x,
        }
    }

    /// Derivative of the function, evaluated on the activity `z`.
    ///
    /// # Errors
    /// Softmax has no elementwise derivative and returns
    /// [`NetworkError::InvalidArgument`].
    #[inline]
    pub fn derivative(self, z: f32) -> Result<f32> {
        Ok(match self {
            Self::Sigmoid => {
                let s = 1.0 / (1.0 + (-z).exp());
                s * (1.0 - s)
            }
            Self::Tanh => {
                let t = z.tanh();
                1.0 - t * t
            }
            Self::LeCunTanh => {
                let t = (LECUN_B * z).tanh();
                LECUN_A * LECUN_B * (1.0 - t * t)
            }
            Self::ReLU => {
                if z > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::LeakyReLU => {
                if z > 0.0 {
                    1.0
                } else {
                    LEAKY_SLOPE
                }
            }
            Self::AbsoluteReLU => {
                if z > 0.0 {
                    1.0
                } else {
                    -1.0
                }
            }
            Self::Softmax => return Err(Self::softmax_derivative_error()),
            Self::Softplus => 1.0 / (1.0 + (-z).exp()),
            Self::ELU => {
                if z >= 0.0 {
                    1.0
                } else {
                    z.exp()
                }
            }
            Self::Identity => 1.0,
        })
    }

    pub(crate) fn softmax_derivative_error() -> NetworkError {
        NetworkError::InvalidArgument(
            "softmax has no elementwise derivative and can only be used by output layers".into(),
        )
    }
}

impl fmt::Display for ActivationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sigmoid => "sigmoid",
            Self::Tanh => "tanh",
            Self::LeCunTanh => "lecun_tanh",
            Self::ReLU => "relu",
            Self::LeakyReLU => "leaky_relu",
            Self::AbsoluteReLU => "absolute_relu",
            Self::Softmax => "softmax",
            Self::Softplus => "softplus",
            Self::ELU => "elu",
            Self::Identity => "identity",
        };
        f.write_str(name)
    }
}

impl TryFrom<u8> for ActivationType {
    type Error = NetworkError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Sigmoid,
            1 => Self::Tanh,
            2 => Self::LeCunTanh,
            3 => Self::ReLU,
            4 => Self::LeakyReLU,
            5 => Self::AbsoluteReLU,
            6 => Self::Softmax,
            7 => Self::Softplus,
            8 => Self::ELU,
            9 => Self::Identity,
            _ => {
                return Err(NetworkError::deserialization(format!(
                    "unknown activation tag {value}"
                )));
            }
        })
    }
}

/// Writes the softmax of `row` into `out`.
///
/// Uses the max-subtraction trick so large activities don't overflow.
pub fn softmax_row(row: &[f32], out: &mut [f32]) {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for (o, &x) in out.iter_mut().zip(row) {
        *o = (x - max).exp();
        sum += *o;
    }
    if sum > 0.0 {
        let inv = 1.0 / sum;
        out.iter_mut().for_each(|o| *o *= inv);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const ALL: [ActivationType; 10] = [
        ActivationType::Sigmoid,
        ActivationType::Tanh,
        ActivationType::LeCunTanh,
        ActivationType::ReLU,
        ActivationType::LeakyReLU,
        ActivationType::AbsoluteReLU,
        ActivationType::Softmax,
        ActivationType::Softplus,
        ActivationType::ELU,
        ActivationType::Identity,
    ];

    #[test]
    fn tags_round_trip() {
        for f in ALL {
            assert_eq!(ActivationType::try_from(f as u8).unwrap(), f);
        }
        assert!(ActivationType::try_from(42).is_err());
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let h = 1e-3f32;
        for f in ALL.into_iter().filter(|f| f.is_elementwise()) {
            for &z in &[-1.3f32, -0.4, 0.7, 2.1] {
                let numeric = (f.activate(z + h) - f.activate(z - h)) / (2.0 * h);
                assert_relative_eq!(f.derivative(z).unwrap(), numeric, epsilon = 1e-2);
            }
        }
    }

    #[test]
    fn softmax_rejects_elementwise_derivative() {
        assert!(ActivationType::Softmax.derivative(0.0).is_err());
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let row = [1.0, 2.0, 3.0, 1000.0];
        let mut out = [0.0; 4];
        softmax_row(&row, &mut out);
        assert_relative_eq!(out.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
        assert!(out[3] > 0.99);
    }

    #[test]
    fn softplus_is_stable_for_large_values() {
        assert_relative_eq!(ActivationType::Softplus.activate(100.0), 100.0);
        assert!(ActivationType::Softplus.activate(-100.0) >= 0.0);
    }
}
