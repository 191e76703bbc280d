use serde::{Deserialize, Serialize};

use crate::backend::{Backend, Elm};
use crate::error::Result;

/// Which fan a [`Initializer::VarianceScaling`] divides its scale by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FanMode {
    FanIn,
    FanOut,
    FanAvg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distribution {
    TruncatedNormal,
    UntruncatedNormal,
    Uniform,
}

/// Produces the initial value of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Initializer {
    Zeros,
    Ones,
    Constant(Elm),
    RandomNormal {
        mean: Elm,
        stddev: Elm,
        seed: Option<u64>,
    },
    RandomUniform {
        min: Elm,
        max: Elm,
        seed: Option<u64>,
    },
    /// Normal samples redrawn when further than two standard deviations
    /// from the mean.
    TruncatedNormal {
        mean: Elm,
        stddev: Elm,
        seed: Option<u64>,
    },
    VarianceScaling {
        scale: Elm,
        mode: FanMode,
        distribution: Distribution,
        seed: Option<u64>,
    },
}

// stddev of a unit normal truncated to [-2, 2]
const TRUNCATED_NORMAL_STDDEV: Elm = 0.879_625_66;

impl Initializer {
    pub fn glorot_normal(seed: Option<u64>) -> Self {
        Self::variance_scaling(1.0, FanMode::FanAvg, Distribution::TruncatedNormal, seed)
    }

    pub fn glorot_uniform(seed: Option<u64>) -> Self {
        Self::variance_scaling(1.0, FanMode::FanAvg, Distribution::Uniform, seed)
    }

    pub fn he_normal(seed: Option<u64>) -> Self {
        Self::variance_scaling(2.0, FanMode::FanIn, Distribution::TruncatedNormal, seed)
    }

    pub fn he_uniform(seed: Option<u64>) -> Self {
        Self::variance_scaling(2.0, FanMode::FanIn, Distribution::Uniform, seed)
    }

    pub fn lecun_normal(seed: Option<u64>) -> Self {
        Self::variance_scaling(1.0, FanMode::FanIn, Distribution::TruncatedNormal, seed)
    }

    pub fn lecun_uniform(seed: Option<u64>) -> Self {
        Self::variance_scaling(1.0, FanMode::FanIn, Distribution::Uniform, seed)
    }

    fn variance_scaling(
        scale: Elm,
        mode: FanMode,
        distribution: Distribution,
        seed: Option<u64>,
    ) -> Self {
        Initializer::VarianceScaling {
            scale,
            mode,
            distribution,
            seed,
        }
    }

    /// Samples a tensor of `shape`. `fan_in` and `fan_out` are only read by
    /// the variance-scaling family.
    pub fn initialize<B: Backend>(
        &self,
        shape: &[usize],
        fan_in: usize,
        fan_out: usize,
    ) -> Result<B::Tensor> {
        match *self {
            Initializer::Zeros => Ok(B::zeros(shape)),
            Initializer::Ones => Ok(B::ones(shape)),
            Initializer::Constant(value) => Ok(B::full(shape, value)),
            Initializer::RandomNormal { mean, stddev, seed } => {
                B::random_normal(shape, mean, stddev, seed)
            }
            Initializer::RandomUniform { min, max, seed } => {
                B::random_uniform(shape, min, max, seed)
            }
            Initializer::TruncatedNormal { mean, stddev, seed } => {
                B::truncated_normal(shape, mean, stddev, seed)
            }
            Initializer::VarianceScaling {
                scale,
                mode,
                distribution,
                seed,
            } => {
                let fan = match mode {
                    FanMode::FanIn => fan_in as Elm,
                    FanMode::FanOut => fan_out as Elm,
                    FanMode::FanAvg => (fan_in + fan_out) as Elm / 2.0,
                };
                let scale = scale / fan.max(1.0);
                match distribution {
                    Distribution::TruncatedNormal => B::truncated_normal(
                        shape,
                        0.0,
                        scale.sqrt() / TRUNCATED_NORMAL_STDDEV,
                        seed,
                    ),
                    Distribution::UntruncatedNormal => {
                        B::random_normal(shape, 0.0, scale.sqrt(), seed)
                    }
                    Distribution::Uniform => {
                        let limit = (3.0 * scale).sqrt();
                        B::random_uniform(shape, -limit, limit, seed)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ndarray::NdArray;

    #[test]
    fn constant_fills_value() {
        let t = Initializer::Constant(0.5)
            .initialize::<NdArray>(&[2, 2], 1, 1)
            .unwrap();
        assert_eq!(NdArray::to_vec(&t), vec![0.5; 4]);
    }

    #[test]
    fn he_uniform_respects_limit() {
        let fan_in = 24;
        let t = Initializer::he_uniform(Some(3))
            .initialize::<NdArray>(&[1000], fan_in, 8)
            .unwrap();
        let limit = (6.0 / fan_in as f32).sqrt();
        assert!(NdArray::to_vec(&t).iter().all(|v| v.abs() <= limit));
    }

    #[test]
    fn he_normal_is_truncated() {
        let fan_in = 50;
        let t = Initializer::he_normal(Some(11))
            .initialize::<NdArray>(&[2000], fan_in, 10)
            .unwrap();
        let stddev = (2.0 / fan_in as f32).sqrt() / TRUNCATED_NORMAL_STDDEV;
        assert!(NdArray::to_vec(&t).iter().all(|v| v.abs() <= 2.0 * stddev + 1e-6));
    }

    #[test]
    fn initializers_round_trip_through_json() {
        let init = Initializer::glorot_uniform(Some(1));
        let json = serde_json::to_string(&init).unwrap();
        let back: Initializer = serde_json::from_str(&json).unwrap();
        assert_eq!(init, back);
    }
}
