//! # shiken-artifact
//!
//! 产物存储的文件系统实现：唯一路径分配、终端配置写出、报告稳定性观测，
//! 以及 HTML 回测报告解析。

pub mod ini;
pub mod report;
pub mod store;

pub use report::HtmlReportParser;
pub use store::FsArtifactStore;
