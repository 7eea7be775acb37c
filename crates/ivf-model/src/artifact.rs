//! 模型制品：一对版本一致的标准化器与分类器

use ivf_core::{IvfError, Result, FEATURE_ORDER};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use tracing::info;

use crate::classifier::{Classifier, ClassifierSpec};
use crate::scaler::{Scaler, ScalerSpec};

#[derive(Debug, Deserialize)]
struct ScalerDocument {
    version: String,
    #[serde(default)]
    features: Option<Vec<String>>,
    #[serde(flatten)]
    spec: ScalerSpec,
}

#[derive(Debug, Deserialize)]
struct ClassifierDocument {
    version: String,
    #[serde(default)]
    features: Option<Vec<String>>,
    #[serde(flatten)]
    spec: ClassifierSpec,
}

/// 参数文件中声明的特征顺序必须与训练顺序一致
fn check_feature_order(document: &str, features: Option<&[String]>) -> Result<()> {
    let Some(features) = features else {
        return Ok(());
    };
    if features.len() != FEATURE_ORDER.len()
        || features.iter().zip(FEATURE_ORDER.iter()).any(|(a, b)| a != b)
    {
        return Err(IvfError::Inference(format!(
            "{} declares feature order {:?}, expected {:?}",
            document, features, FEATURE_ORDER
        )));
    }
    Ok(())
}

/// 已加载的模型，加载后不可变
pub struct ModelArtifact {
    version: String,
    scaler: Box<dyn Scaler>,
    classifier: Box<dyn Classifier>,
}

impl fmt::Debug for ModelArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelArtifact")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl ModelArtifact {
    pub fn new(
        version: impl Into<String>,
        scaler: Box<dyn Scaler>,
        classifier: Box<dyn Classifier>,
    ) -> Self {
        Self {
            version: version.into(),
            scaler,
            classifier,
        }
    }

    /// 从两份 JSON 文档构造
    pub fn from_json(scaler_json: &str, classifier_json: &str) -> Result<Self> {
        let scaler: ScalerDocument = serde_json::from_str(scaler_json)
            .map_err(|e| IvfError::Inference(format!("Invalid scaler artifact: {}", e)))?;
        let classifier: ClassifierDocument = serde_json::from_str(classifier_json)
            .map_err(|e| IvfError::Inference(format!("Invalid classifier artifact: {}", e)))?;

        if scaler.version != classifier.version {
            return Err(IvfError::Inference(format!(
                "Scaler version {} does not match classifier version {}",
                scaler.version, classifier.version
            )));
        }
        check_feature_order("scaler", scaler.features.as_deref())?;
        check_feature_order("classifier", classifier.features.as_deref())?;

        Ok(Self {
            version: scaler.version,
            scaler: scaler.spec.build()?,
            classifier: classifier.spec.build()?,
        })
    }

    /// 从目录加载
    pub async fn load(dir: &Path, scaler_file: &str, classifier_file: &str) -> Result<Self> {
        let scaler_path = dir.join(scaler_file);
        let classifier_path = dir.join(classifier_file);

        let scaler_json = tokio::fs::read_to_string(&scaler_path).await.map_err(|e| {
            IvfError::Inference(format!("Failed to read {}: {}", scaler_path.display(), e))
        })?;
        let classifier_json = tokio::fs::read_to_string(&classifier_path)
            .await
            .map_err(|e| {
                IvfError::Inference(format!(
                    "Failed to read {}: {}",
                    classifier_path.display(),
                    e
                ))
            })?;

        let artifact = Self::from_json(&scaler_json, &classifier_json)?;
        info!(
            "Loaded model artifact {} from {}",
            artifact.version,
            dir.display()
        );
        Ok(artifact)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn scaler(&self) -> &dyn Scaler {
        self.scaler.as_ref()
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }
}
