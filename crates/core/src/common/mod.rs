pub mod failure;
pub mod time;

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// # Summary
/// 终端策略测试器支持的 K 线周期。
///
/// # Invariants
/// - `minutes()` 即终端配置文件中 `Period` 字段的取值。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TimeFrame {
    // 1分钟
    M1,
    // 5分钟
    M5,
    // 15分钟
    M15,
    // 30分钟
    M30,
    // 1小时
    H1,
    // 4小时
    H4,
    // 1日
    D1,
}

impl TimeFrame {
    /// # Summary
    /// 周期对应的分钟数。
    pub fn minutes(&self) -> u32 {
        match self {
            TimeFrame::M1 => 1,
            TimeFrame::M5 => 5,
            TimeFrame::M15 => 15,
            TimeFrame::M30 => 30,
            TimeFrame::H1 => 60,
            TimeFrame::H4 => 240,
            TimeFrame::D1 => 1440,
        }
    }

    /// # Summary
    /// 由分钟数反查周期。
    ///
    /// # Returns
    /// 不在支持列表中的分钟数返回 `None`。
    pub fn from_minutes(minutes: u32) -> Option<Self> {
        match minutes {
            1 => Some(TimeFrame::M1),
            5 => Some(TimeFrame::M5),
            15 => Some(TimeFrame::M15),
            30 => Some(TimeFrame::M30),
            60 => Some(TimeFrame::H1),
            240 => Some(TimeFrame::H4),
            1440 => Some(TimeFrame::D1),
            _ => None,
        }
    }
}

impl FromStr for TimeFrame {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "m1" | "1m" => Ok(TimeFrame::M1),
            "m5" | "5m" => Ok(TimeFrame::M5),
            "m15" | "15m" => Ok(TimeFrame::M15),
            "m30" | "30m" => Ok(TimeFrame::M30),
            "h1" | "1h" => Ok(TimeFrame::H1),
            "h4" | "4h" => Ok(TimeFrame::H4),
            "d1" | "1d" => Ok(TimeFrame::D1),
            other => other
                .parse::<u32>()
                .ok()
                .and_then(TimeFrame::from_minutes)
                .ok_or_else(|| format!("Unknown TimeFrame: {}", s)),
        }
    }
}

impl std::fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeFrame::M1 => write!(f, "M1"),
            TimeFrame::M5 => write!(f, "M5"),
            TimeFrame::M15 => write!(f, "M15"),
            TimeFrame::M30 => write!(f, "M30"),
            TimeFrame::H1 => write!(f, "H1"),
            TimeFrame::H4 => write!(f, "H4"),
            TimeFrame::D1 => write!(f, "D1"),
        }
    }
}
