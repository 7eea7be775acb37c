//! 配置管理
//!
//! 可选的配置文件（TOML/YAML/JSON，按扩展名识别）叠加 `IVF_` 前缀的环境变量，
//! 例如 `IVF_DATABASE__URL`、`IVF_SERVER__PORT`。

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use ivf_core::DEFAULT_PAGE_SIZE;
use ivf_model::ModelPaths;
use ivf_services::AuthSettings;
use ivf_web::WebSettings;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

const MIN_PASSWORD_ITERATIONS: u32 = 1000;

/// 系统完整配置
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub model: ModelConfig,
    pub auth: AuthConfig,
    pub web: WebConfig,
    pub logging: LoggingConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Postgres,
    /// 进程内存储，重启后数据丢失
    #[default]
    Memory,
}

/// 数据库配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::default(),
            url: None,
            max_connections: 10,
        }
    }
}

/// 模型文件配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub artifact_dir: PathBuf,
    pub scaler_file: String,
    pub classifier_file: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let paths = ModelPaths::default();
        Self {
            artifact_dir: paths.artifact_dir,
            scaler_file: paths.scaler_file,
            classifier_file: paths.classifier_file,
        }
    }
}

/// 认证配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub token_expiry_hours: i64,
    pub password_iterations: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        let settings = AuthSettings::default();
        Self {
            token_expiry_hours: settings.token_expiry_hours,
            password_iterations: settings.password_iterations,
        }
    }
}

/// Web 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub public_base_url: String,
    pub page_size: u32,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            public_base_url: "http://localhost:8080".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// 加载并校验配置
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env = Environment::with_prefix("IVF")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true);
        Self::build(path, env)
    }

    fn build(path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings = builder
            .add_source(env)
            .build()
            .context("Failed to read configuration")?;
        let config: AppConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be greater than 0");
        }
        if self.database.max_connections == 0 {
            bail!("database.max_connections must be greater than 0");
        }
        if self.database.backend == DatabaseBackend::Postgres
            && self.database.url.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            bail!("database.url is required for the postgres backend");
        }
        if self.web.page_size == 0 {
            bail!("web.page_size must be greater than 0");
        }
        if self.auth.token_expiry_hours <= 0 {
            bail!("auth.token_expiry_hours must be greater than 0");
        }
        if self.auth.password_iterations < MIN_PASSWORD_ITERATIONS {
            bail!(
                "auth.password_iterations must be at least {}",
                MIN_PASSWORD_ITERATIONS
            );
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .with_context(|| {
                format!(
                    "Invalid listen address {}:{}",
                    self.server.host, self.server.port
                )
            })
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths {
            artifact_dir: self.model.artifact_dir.clone(),
            scaler_file: self.model.scaler_file.clone(),
            classifier_file: self.model.classifier_file.clone(),
        }
    }

    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            token_expiry_hours: self.auth.token_expiry_hours,
            password_iterations: self.auth.password_iterations,
        }
    }

    pub fn web_settings(&self) -> WebSettings {
        WebSettings {
            public_base_url: self.web.public_base_url.clone(),
            page_size: self.web.page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix("IVF")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(Some(map))
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::build(None, env(&[])).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.backend, DatabaseBackend::Memory);
        assert_eq!(config.web.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.model.scaler_file, "scaler.json");
        assert!(config.listen_addr().is_ok());
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[server]\nport = 9000\n\n[web]\npage_size = 25\n\n[database]\nbackend = \"postgres\"\nurl = \"postgres://localhost/ivf\""
        )
        .unwrap();

        let config = AppConfig::build(Some(file.path()), env(&[("IVF_SERVER__PORT", "9100")])).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.web.page_size, 25);
        assert_eq!(config.database.backend, DatabaseBackend::Postgres);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(AppConfig::build(None, env(&[("IVF_SERVER__PORT", "0")])).is_err());
        assert!(AppConfig::build(None, env(&[("IVF_WEB__PAGE_SIZE", "0")])).is_err());
        assert!(AppConfig::build(None, env(&[("IVF_AUTH__PASSWORD_ITERATIONS", "10")])).is_err());
        assert!(AppConfig::build(None, env(&[("IVF_DATABASE__BACKEND", "postgres")])).is_err());
        assert!(AppConfig::build(None, env(&[("IVF_DATABASE__MAX_CONNECTIONS", "0")])).is_err());
    }
}
