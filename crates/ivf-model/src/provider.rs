//! 模型制品提供者
//!
//! 首次使用时加载一次，之后所有请求共享同一份只读制品。
//! 加载失败只让当前请求失败，下一次请求会重新尝试。

use ivf_core::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::warn;

use crate::artifact::ModelArtifact;

/// 制品位置
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub artifact_dir: PathBuf,
    pub scaler_file: String,
    pub classifier_file: String,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("models"),
            scaler_file: "scaler.json".to_string(),
            classifier_file: "classifier.json".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ModelProvider {
    paths: Option<ModelPaths>,
    artifact: OnceCell<Arc<ModelArtifact>>,
}

impl ModelProvider {
    /// 从目录懒加载
    pub fn new(paths: ModelPaths) -> Self {
        Self {
            paths: Some(paths),
            artifact: OnceCell::new(),
        }
    }

    /// 使用已构造好的制品
    pub fn preloaded(artifact: ModelArtifact) -> Self {
        Self {
            paths: None,
            artifact: OnceCell::new_with(Some(Arc::new(artifact))),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.artifact.initialized()
    }

    /// 获取制品，必要时加载
    pub async fn get(&self) -> Result<Arc<ModelArtifact>> {
        self.artifact
            .get_or_try_init(|| async {
                let Some(paths) = &self.paths else {
                    return Err(ivf_core::IvfError::Inference(
                        "No model artifact configured".to_string(),
                    ));
                };
                ModelArtifact::load(
                    &paths.artifact_dir,
                    &paths.scaler_file,
                    &paths.classifier_file,
                )
                .await
                .map(Arc::new)
                .map_err(|e| {
                    warn!("Model artifact load failed: {}", e);
                    e
                })
            })
            .await
            .cloned()
    }
}
