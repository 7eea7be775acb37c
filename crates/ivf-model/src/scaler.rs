//! 特征标准化

use ivf_core::{IvfError, Result, FEATURE_COUNT};
use serde::Deserialize;

use crate::check_params;

/// 特征变换，输入输出均按训练时的特征顺序排列
pub trait Scaler: Send + Sync {
    fn transform(&self, features: &[f64; FEATURE_COUNT]) -> Result<[f64; FEATURE_COUNT]>;
}

/// 标准化器参数文件
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScalerSpec {
    /// `(x - mean) / scale`
    Standard { mean: Vec<f64>, scale: Vec<f64> },
    /// `x * scale + min`
    MinMax { min: Vec<f64>, scale: Vec<f64> },
}

impl ScalerSpec {
    /// 校验参数并构造标准化器
    pub fn build(self) -> Result<Box<dyn Scaler>> {
        match self {
            ScalerSpec::Standard { mean, scale } => {
                check_params("scaler.mean", &mean)?;
                check_params("scaler.scale", &scale)?;
                if scale.iter().any(|s| *s == 0.0) {
                    return Err(IvfError::Inference(
                        "scaler.scale contains zero entries".to_string(),
                    ));
                }
                Ok(Box::new(StandardScaler {
                    mean: to_array(&mean),
                    scale: to_array(&scale),
                }))
            }
            ScalerSpec::MinMax { min, scale } => {
                check_params("scaler.min", &min)?;
                check_params("scaler.scale", &scale)?;
                Ok(Box::new(MinMaxScaler {
                    min: to_array(&min),
                    scale: to_array(&scale),
                }))
            }
        }
    }
}

fn to_array(values: &[f64]) -> [f64; FEATURE_COUNT] {
    let mut out = [0.0; FEATURE_COUNT];
    out.copy_from_slice(&values[..FEATURE_COUNT]);
    out
}

fn finite(values: [f64; FEATURE_COUNT]) -> Result<[f64; FEATURE_COUNT]> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(values)
    } else {
        Err(IvfError::Inference(
            "Scaler produced a non-finite value".to_string(),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct StandardScaler {
    mean: [f64; FEATURE_COUNT],
    scale: [f64; FEATURE_COUNT],
}

impl Scaler for StandardScaler {
    fn transform(&self, features: &[f64; FEATURE_COUNT]) -> Result<[f64; FEATURE_COUNT]> {
        let mut out = [0.0; FEATURE_COUNT];
        for (i, value) in features.iter().enumerate() {
            out[i] = (value - self.mean[i]) / self.scale[i];
        }
        finite(out)
    }
}

#[derive(Debug, Clone)]
pub struct MinMaxScaler {
    min: [f64; FEATURE_COUNT],
    scale: [f64; FEATURE_COUNT],
}

impl Scaler for MinMaxScaler {
    fn transform(&self, features: &[f64; FEATURE_COUNT]) -> Result<[f64; FEATURE_COUNT]> {
        let mut out = [0.0; FEATURE_COUNT];
        for (i, value) in features.iter().enumerate() {
            out[i] = value * self.scale[i] + self.min[i];
        }
        finite(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_scaler() {
        let scaler = ScalerSpec::Standard {
            mean: vec![1.0; FEATURE_COUNT],
            scale: vec![2.0; FEATURE_COUNT],
        }
        .build()
        .unwrap();

        let out = scaler.transform(&[5.0; FEATURE_COUNT]).unwrap();
        assert_eq!(out, [2.0; FEATURE_COUNT]);
    }

    #[test]
    fn test_min_max_scaler() {
        let scaler = ScalerSpec::MinMax {
            min: vec![-1.0; FEATURE_COUNT],
            scale: vec![0.5; FEATURE_COUNT],
        }
        .build()
        .unwrap();

        let out = scaler.transform(&[4.0; FEATURE_COUNT]).unwrap();
        assert_eq!(out, [1.0; FEATURE_COUNT]);
    }

    #[test]
    fn test_rejects_wrong_length_and_zero_scale() {
        let short = ScalerSpec::Standard {
            mean: vec![0.0; 3],
            scale: vec![1.0; FEATURE_COUNT],
        };
        assert!(matches!(short.build(), Err(IvfError::Inference(_))));

        let zero = ScalerSpec::Standard {
            mean: vec![0.0; FEATURE_COUNT],
            scale: vec![0.0; FEATURE_COUNT],
        };
        assert!(matches!(zero.build(), Err(IvfError::Inference(_))));
    }

    #[test]
    fn test_spec_from_json() {
        let json = format!(
            r#"{{"kind": "min_max", "min": {:?}, "scale": {:?}}}"#,
            vec![0.0; FEATURE_COUNT],
            vec![1.0; FEATURE_COUNT]
        );
        let spec: ScalerSpec = serde_json::from_str(&json).unwrap();
        assert!(matches!(spec, ScalerSpec::MinMax { .. }));
    }
}
