use crate::ini::render_tester_ini;
use async_trait::async_trait;
use shiken_core::artifact::entity::{ArtifactPaths, Observation};
use shiken_core::artifact::error::ArtifactError;
use shiken_core::artifact::port::ArtifactStore;
use shiken_core::common::time::Clock;
use shiken_core::run::entity::RunSpec;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// # Summary
/// 基于终端数据目录的产物存储。
///
/// # Invariants
/// - 配置产物位于数据目录根部，报告位于 `MQL5/Reports/` 下。
/// - 产物名为 `{策略}_{yyyymmdd_HHMMSS}_{随机串}`，同一秒内的多次分配依靠随机串区分。
pub struct FsArtifactStore {
    data_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FsArtifactStore {
    pub fn new(data_dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            data_dir: data_dir.into(),
            clock,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// 终端写出报告的目录
    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("MQL5").join("Reports")
    }

    /// 报告在配置中的写法：相对数据目录，使用终端的反斜杠分隔
    fn report_reference(&self, report: &Path) -> String {
        match report.strip_prefix(&self.data_dir) {
            Ok(relative) => relative
                .components()
                .filter_map(|c| match c {
                    Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\\"),
            Err(_) => report.display().to_string(),
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    fn allocate(&self, spec: &RunSpec) -> ArtifactPaths {
        let timestamp = self.clock.now().format("%Y%m%d_%H%M%S");
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let run_id = format!(
            "{}_{}_{}",
            sanitize(spec.strategy_stem()),
            timestamp,
            &nonce[..8]
        );
        ArtifactPaths {
            config: self.data_dir.join(format!("bt_{}.ini", run_id)),
            report: self.reports_dir().join(format!("{}.htm", run_id)),
            run_id,
        }
    }

    async fn write_config(
        &self,
        spec: &RunSpec,
        paths: &ArtifactPaths,
    ) -> Result<(), ArtifactError> {
        if let Some(parent) = paths.config.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Some(parent) = paths.report.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = render_tester_ini(spec, &self.report_reference(&paths.report));
        tokio::fs::write(&paths.config, &content).await?;

        info!(run_id = %paths.run_id, config = %paths.config.display(), "Config artifact written");
        debug!("Config content:\n{}", content);
        Ok(())
    }

    async fn observe(&self, path: &Path) -> Result<Option<Observation>, ArtifactError> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(Some(Observation {
                size: meta.len(),
                modified: meta.modified().ok(),
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// # Summary
    /// 查找某个策略最近一次写出的报告。
    ///
    /// # Returns
    /// 按修改时间取最新的 `{策略}_*.htm`；目录不存在或没有报告时返回 `Ok(None)`。
    async fn latest_report(&self, strategy: &str) -> Result<Option<PathBuf>, ArtifactError> {
        let prefix = format!("{}_", sanitize(strategy_stem(strategy)));
        let mut entries = match tokio::fs::read_dir(self.reports_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut latest: Option<(std::time::SystemTime, PathBuf)> = None;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&prefix) || !name.ends_with(".htm") {
                continue;
            }
            let modified = entry.metadata().await?.modified()?;
            if latest.as_ref().is_none_or(|(t, _)| modified > *t) {
                latest = Some((modified, entry.path()));
            }
        }
        Ok(latest.map(|(_, path)| path))
    }

    async fn discard(&self, path: &Path) -> Result<(), ArtifactError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn strategy_stem(strategy: &str) -> &str {
    let name = strategy.rsplit(['\\', '/']).next().unwrap_or(strategy);
    name.strip_suffix(".ex5").unwrap_or(name)
}

/// 只保留文件名安全字符
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("Grid v2.1"), "Grid_v2_1");
        assert_eq!(strategy_stem("Experts\\Pack/Grid.ex5"), "Grid");
    }
}
