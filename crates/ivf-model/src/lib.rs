//! # IVF模型模块
//!
//! 加载训练好的标准化器与分类器，并以只读句柄的形式提供给预测流程。
//! 训练过程不在本系统内；这里只消费版本化的参数文件。

pub mod artifact;
pub mod classifier;
pub mod provider;
pub mod scaler;

pub use artifact::ModelArtifact;
pub use classifier::{Classifier, ClassifierSpec};
pub use provider::{ModelPaths, ModelProvider};
pub use scaler::{Scaler, ScalerSpec};

/// 参数向量的长度与特征顺序校验
pub(crate) fn check_params(name: &str, values: &[f64]) -> ivf_core::Result<()> {
    if values.len() != ivf_core::FEATURE_COUNT {
        return Err(ivf_core::IvfError::Inference(format!(
            "{} has {} entries, expected {}",
            name,
            values.len(),
            ivf_core::FEATURE_COUNT
        )));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ivf_core::IvfError::Inference(format!(
            "{} contains non-finite values",
            name
        )));
    }
    Ok(())
}
