#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Squashing function of a unit, evaluated on the pre-activation state.
///
/// The interpreter and the compiled program both call [`Transfer::eval`], so
/// the two paths agree bit for bit whatever the variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Transfer {
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "LOGISTIC"))]
    Logistic,
    #[cfg_attr(feature = "serde", serde(rename = "TANH"))]
    Tanh,
    #[cfg_attr(feature = "serde", serde(rename = "IDENTITY"))]
    Identity,
    #[cfg_attr(feature = "serde", serde(rename = "HLIM"))]
    HardLimit,
    #[cfg_attr(feature = "serde", serde(rename = "RELU"))]
    Relu,
}

impl Transfer {
    pub const ALL: [Transfer; 5] = [
        Transfer::Logistic,
        Transfer::Tanh,
        Transfer::Identity,
        Transfer::HardLimit,
        Transfer::Relu,
    ];

    /// Returns `(activation, derivative)` for state `x`.
    #[inline]
    pub fn eval(self, x: f64) -> (f64, f64) {
        match self {
            Transfer::Logistic => {
                let fx = 1.0 / (1.0 + (-x).exp());
                (fx, fx * (1.0 - fx))
            }
            Transfer::Tanh => {
                let t = x.tanh();
                (t, 1.0 - t * t)
            }
            Transfer::Identity => (x, 1.0),
            // Derivative of the step is taken as 1 so error still flows.
            Transfer::HardLimit => (if x > 0.0 { 1.0 } else { 0.0 }, 1.0),
            Transfer::Relu => {
                if x > 0.0 {
                    (x, 1.0)
                } else {
                    (0.0, 0.0)
                }
            }
        }
    }

    #[inline]
    pub fn activation(self, x: f64) -> f64 {
        self.eval(x).0
    }

    #[inline]
    pub fn derivative(self, x: f64) -> f64 {
        self.eval(x).1
    }

    pub fn name(self) -> &'static str {
        match self {
            Transfer::Logistic => "LOGISTIC",
            Transfer::Tanh => "TANH",
            Transfer::Identity => "IDENTITY",
            Transfer::HardLimit => "HLIM",
            Transfer::Relu => "RELU",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Transfer::ALL.into_iter().find(|t| t.name() == name)
    }
}
