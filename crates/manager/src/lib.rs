//! # shiken-manager
//!
//! 应用服务层门面。编译期只依赖 `shiken-core` 的端口与 `shiken-optimizer`，
//! 具体实现由 `shiken-app` 注入。

pub mod study;

pub use study::{ManagerError, ReportSnapshot, StudyManager};
