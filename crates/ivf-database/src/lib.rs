//! # IVF数据库模块
//!
//! 负责账户、档案、推荐令牌、推荐关系、患者与预测记录的持久化。
//! 业务层只依赖 [`Store`] trait；生产环境使用 PostgreSQL 实现，
//! 测试与本地开发使用内存实现。

pub mod connection;
pub mod memory;
pub mod models;
pub mod queries;
pub mod store;

// 重新导出主要类型
pub use connection::DatabasePool;
pub use memory::MemoryStore;
pub use models::*;
pub use queries::DatabaseQueries;
pub use store::*;
