use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;

/// # Summary
/// 一次回测分配到的产物路径。
///
/// # Invariants
/// - 同一存储内任意两次分配的 `run_id` 与路径互不相同。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    pub run_id: String,
    // 终端读取的配置产物
    pub config: PathBuf,
    // 终端写出的报告
    pub report: PathBuf,
}

/// # Summary
/// 报告文件的一次观测。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl Observation {
    /// # Summary
    /// 判断报告是否已写完。
    ///
    /// # Logic
    /// 非空，且与上一次观测的大小、修改时间完全一致。
    pub fn is_stable_after(&self, previous: Option<&Observation>) -> bool {
        self.size > 0 && previous == Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stability_requires_two_identical_non_empty_observations() {
        let t = SystemTime::UNIX_EPOCH;
        let first = Observation { size: 10, modified: Some(t) };
        let grown = Observation { size: 20, modified: Some(t) };
        let empty = Observation { size: 0, modified: Some(t) };

        assert!(!first.is_stable_after(None));
        assert!(!grown.is_stable_after(Some(&first)));
        assert!(grown.is_stable_after(Some(&grown)));
        assert!(!empty.is_stable_after(Some(&empty)));
    }
}
