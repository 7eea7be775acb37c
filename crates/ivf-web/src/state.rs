//! 应用状态

use ivf_core::DEFAULT_PAGE_SIZE;
use ivf_database::Store;
use ivf_model::ModelProvider;
use ivf_services::Services;
use std::sync::Arc;

/// Web 层参数
#[derive(Debug, Clone)]
pub struct WebSettings {
    /// 生成绝对链接时使用的外部地址，例如 `https://ivf.example.org`
    pub public_base_url: String,
    pub page_size: u32,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            public_base_url: "http://localhost:8080".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub store: Arc<dyn Store>,
    pub model: Arc<ModelProvider>,
    pub settings: Arc<WebSettings>,
}

impl AppState {
    pub fn new(
        services: Services,
        store: Arc<dyn Store>,
        model: Arc<ModelProvider>,
        settings: WebSettings,
    ) -> Self {
        Self {
            services,
            store,
            model,
            settings: Arc::new(settings),
        }
    }

    /// 绝对链接，`path` 以 `/` 开头
    pub fn absolute_url(&self, path: &str) -> String {
        format!("{}{}", self.settings.public_base_url.trim_end_matches('/'), path)
    }
}
