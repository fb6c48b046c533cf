use crate::artifact::entity::{ArtifactPaths, Observation};
use crate::artifact::error::ArtifactError;
use crate::run::entity::{Metrics, RunSpec};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// # Summary
/// 产物存储端口：分配路径、写配置、观测报告。
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// 为一次回测分配唯一的产物路径，不触碰文件系统
    fn allocate(&self, spec: &RunSpec) -> ArtifactPaths;

    /// 写出终端可读取的配置产物
    async fn write_config(&self, spec: &RunSpec, paths: &ArtifactPaths)
    -> Result<(), ArtifactError>;

    /// 观测文件；不存在时返回 `Ok(None)`
    async fn observe(&self, path: &Path) -> Result<Option<Observation>, ArtifactError>;

    /// 删除产物；不存在不视为错误
    async fn discard(&self, path: &Path) -> Result<(), ArtifactError>;

    /// 某个策略最近一次写出的报告；没有时返回 `Ok(None)`
    async fn latest_report(&self, strategy: &str) -> Result<Option<PathBuf>, ArtifactError>;
}

/// # Summary
/// 报告解析端口。
#[async_trait]
pub trait ReportParser: Send + Sync {
    async fn parse_report(&self, path: &Path) -> Result<Metrics, ArtifactError>;
}
