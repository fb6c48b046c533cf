//! # shiken-core
//!
//! 领域实体、端口 (Port) 与错误定义。
//! 其余 crate 只依赖这里的 Trait，具体实现由 `shiken-app` 在启动时注入。

pub mod artifact;
pub mod common;
pub mod config;
pub mod notify;
pub mod optimize;
pub mod process;
pub mod run;

#[cfg(feature = "test-utils")]
pub mod testing;
