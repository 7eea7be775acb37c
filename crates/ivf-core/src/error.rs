//! 错误定义模块

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// 字段级校验错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// 系统统一错误类型
#[derive(Error, Debug)]
pub enum IvfError {
    #[error("校验错误: {}", join_field_errors(.0))]
    Validation(Vec<FieldError>),

    #[error("权限错误: {0}")]
    PermissionDenied(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("推理错误: {0}")]
    Inference(String),

    #[error("未认证: {0}")]
    Unauthenticated(String),

    /// 唯一约束冲突，携带冲突的约束名
    #[error("唯一约束冲突: {0}")]
    Conflict(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("系统内部错误: {0}")]
    Internal(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IvfError {
    /// 单字段校验错误
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        IvfError::Validation(vec![FieldError::new(field, message)])
    }

    /// 与具体字段无关的校验错误
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::validation("details", message)
    }

    /// 稳定的机器可读错误类别
    pub fn kind(&self) -> &'static str {
        match self {
            IvfError::Validation(_) => "validation_error",
            IvfError::PermissionDenied(_) => "permission_denied",
            IvfError::NotFound(_) => "not_found",
            IvfError::Inference(_) => "inference_error",
            IvfError::Unauthenticated(_) => "not_authenticated",
            IvfError::Conflict(_) => "conflict",
            IvfError::Database(_) => "database_error",
            IvfError::Config(_) => "configuration_error",
            IvfError::Internal(_) | IvfError::Serialization(_) => "internal_error",
        }
    }

    /// 服务端故障（不是调用方的输入问题）
    pub fn is_server_fault(&self) -> bool {
        matches!(
            self,
            IvfError::Inference(_)
                | IvfError::Database(_)
                | IvfError::Config(_)
                | IvfError::Internal(_)
                | IvfError::Serialization(_)
        )
    }

    /// 面向调用方的错误明细列表
    pub fn details(&self) -> Vec<FieldError> {
        match self {
            IvfError::Validation(errors) => errors.clone(),
            IvfError::PermissionDenied(msg)
            | IvfError::NotFound(msg)
            | IvfError::Inference(msg)
            | IvfError::Unauthenticated(msg)
            | IvfError::Conflict(msg)
            | IvfError::Database(msg)
            | IvfError::Config(msg)
            | IvfError::Internal(msg) => vec![FieldError::new("details", msg.clone())],
            IvfError::Serialization(e) => vec![FieldError::new("details", e.to_string())],
        }
    }
}

/// 系统统一结果类型
pub type Result<T> = std::result::Result<T, IvfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_lists_every_field() {
        let err = IvfError::Validation(vec![
            FieldError::new("female_age", "This field is required."),
            FieldError::new("AMH", "A valid number is required."),
        ]);

        assert_eq!(err.kind(), "validation_error");
        assert_eq!(err.details().len(), 2);
        assert!(err.to_string().contains("female_age"));
        assert!(err.to_string().contains("AMH"));
        assert!(!err.is_server_fault());
    }

    #[test]
    fn test_inference_is_server_fault() {
        let err = IvfError::Inference("scaler.json missing".to_string());
        assert_eq!(err.kind(), "inference_error");
        assert!(err.is_server_fault());
    }
}
