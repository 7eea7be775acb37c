//! # IVF Web模块
//!
//! 基于 axum 的 HTTP 接口：认证中间件、错误映射、分页包装与各资源的处理器。

pub mod auth;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod pagination;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use server::{create_app, WebServer};
pub use state::{AppState, WebSettings};
