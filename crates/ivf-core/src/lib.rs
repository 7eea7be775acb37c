//! # IVF Core
//!
//! 预测系统的核心模块，提供领域数据结构、错误定义、临床特征校验、
//! 访问范围解析以及通用工具。

pub mod error;
pub mod features;
pub mod models;
pub mod pagination;
pub mod scope;
pub mod utils;

pub use error::{FieldError, IvfError, Result};
pub use features::{ClinicalFeatures, FEATURE_COUNT, FEATURE_ORDER};
pub use models::*;
pub use pagination::{Page, PageRequest, DEFAULT_PAGE_SIZE};
pub use scope::{Caller, Capabilities, RecordScope, ScopeResolver};
