//! 分类器

use ivf_core::{IvfError, Result, FEATURE_COUNT};
use serde::Deserialize;

use crate::check_params;

/// 二分类器，输入为标准化后的特征向量
pub trait Classifier: Send + Sync {
    /// 预测标签（0 或 1）
    fn predict(&self, x: &[f64; FEATURE_COUNT]) -> Result<i32>;

    /// 各类别概率 `[p0, p1]`；不支持概率输出的分类器返回 `None`
    fn predict_proba(&self, _x: &[f64; FEATURE_COUNT]) -> Option<Result<[f64; 2]>> {
        None
    }
}

/// 分类器参数文件
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifierSpec {
    /// 逻辑回归，支持概率输出
    Logistic {
        coefficients: Vec<f64>,
        intercept: f64,
        #[serde(default)]
        threshold: Option<f64>,
    },
    /// 线性决策函数，只输出标签
    Linear {
        coefficients: Vec<f64>,
        intercept: f64,
    },
}

impl ClassifierSpec {
    pub fn build(self) -> Result<Box<dyn Classifier>> {
        match self {
            ClassifierSpec::Logistic {
                coefficients,
                intercept,
                threshold,
            } => {
                let linear = Linear::new(&coefficients, intercept)?;
                let threshold = threshold.unwrap_or(0.5);
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(IvfError::Inference(format!(
                        "classifier.threshold {} is outside [0, 1]",
                        threshold
                    )));
                }
                Ok(Box::new(LogisticClassifier { linear, threshold }))
            }
            ClassifierSpec::Linear {
                coefficients,
                intercept,
            } => Ok(Box::new(Linear::new(&coefficients, intercept)?)),
        }
    }
}

/// 线性决策函数 `w·x + b`
#[derive(Debug, Clone)]
pub struct Linear {
    coefficients: [f64; FEATURE_COUNT],
    intercept: f64,
}

impl Linear {
    fn new(coefficients: &[f64], intercept: f64) -> Result<Self> {
        check_params("classifier.coefficients", coefficients)?;
        if !intercept.is_finite() {
            return Err(IvfError::Inference(
                "classifier.intercept is not finite".to_string(),
            ));
        }
        let mut weights = [0.0; FEATURE_COUNT];
        weights.copy_from_slice(coefficients);
        Ok(Self {
            coefficients: weights,
            intercept,
        })
    }

    fn decision(&self, x: &[f64; FEATURE_COUNT]) -> Result<f64> {
        let z = self
            .coefficients
            .iter()
            .zip(x.iter())
            .map(|(w, v)| w * v)
            .sum::<f64>()
            + self.intercept;
        if z.is_finite() {
            Ok(z)
        } else {
            Err(IvfError::Inference(
                "Decision function is not finite".to_string(),
            ))
        }
    }
}

impl Classifier for Linear {
    fn predict(&self, x: &[f64; FEATURE_COUNT]) -> Result<i32> {
        Ok(i32::from(self.decision(x)? > 0.0))
    }
}

#[derive(Debug, Clone)]
pub struct LogisticClassifier {
    linear: Linear,
    threshold: f64,
}

impl LogisticClassifier {
    fn positive_probability(&self, x: &[f64; FEATURE_COUNT]) -> Result<f64> {
        let z = self.linear.decision(x)?;
        Ok(1.0 / (1.0 + (-z).exp()))
    }
}

impl Classifier for LogisticClassifier {
    fn predict(&self, x: &[f64; FEATURE_COUNT]) -> Result<i32> {
        Ok(i32::from(self.positive_probability(x)? >= self.threshold))
    }

    fn predict_proba(&self, x: &[f64; FEATURE_COUNT]) -> Option<Result<[f64; 2]>> {
        Some(self.positive_probability(x).map(|p| [1.0 - p, p]))
    }
}
