use crate::common::failure::Failure;
use crate::run::entity::{Metrics, ParamSet, RunResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// # Summary
/// 单个参数的扫描区间。
///
/// # Invariants
/// - 有效区间满足 `step > 0`、`min <= max` 且三者均为有限值，由扫描器在展开前校验。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl ParamRange {
    pub fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }
}

impl FromStr for ParamRange {
    type Err = String;

    /// 解析 `MIN:MAX:STEP`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').map(str::trim).collect();
        let [min, max, step] = parts.as_slice() else {
            return Err(format!("expected MIN:MAX:STEP, got '{}'", s));
        };
        let parse = |v: &str| {
            v.parse::<f64>()
                .map_err(|e| format!("invalid number '{}': {}", v, e))
        };
        Ok(Self::new(parse(min)?, parse(max)?, parse(step)?))
    }
}

/// 参数名 → 扫描区间
pub type ParamRanges = BTreeMap<String, ParamRange>;

/// # Summary
/// 排序依据。所有得分越大越好。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    ProfitFactor,
    // 回撤越小越好，得分取 1 / (1 + drawdown)
    InverseDrawdown,
    NetProfit,
    Sharpe,
}

impl Criterion {
    /// 由指标计算得分
    pub fn score(&self, metrics: &Metrics) -> f64 {
        match self {
            Criterion::ProfitFactor => metrics.profit_factor,
            Criterion::InverseDrawdown => 1.0 / (1.0 + metrics.drawdown.max(0.0)),
            Criterion::NetProfit => metrics.net_profit,
            Criterion::Sharpe => metrics.sharpe_ratio,
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Criterion::ProfitFactor => "profit_factor",
            Criterion::InverseDrawdown => "inverse_drawdown",
            Criterion::NetProfit => "net_profit",
            Criterion::Sharpe => "sharpe",
        };
        f.write_str(s)
    }
}

impl FromStr for Criterion {
    type Err = String;

    /// 同时接受名称与终端的数值编码 (0 余额 / 1 回撤 / 2 盈利因子 / 3 夏普)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "profit_factor" | "pf" | "2" => Ok(Criterion::ProfitFactor),
            "inverse_drawdown" | "drawdown" | "dd" | "1" => Ok(Criterion::InverseDrawdown),
            "net_profit" | "balance" | "0" => Ok(Criterion::NetProfit),
            "sharpe" | "3" => Ok(Criterion::Sharpe),
            other => Err(format!("unknown criterion: {}", other)),
        }
    }
}

/// # Summary
/// 候选参数的执行情况。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "run", rename_all = "snake_case")]
pub enum CandidateRun {
    // 执行器受理并返回了结果 (可能失败)
    Finished(RunResult),
    // 执行器拒绝了任务 (如终端被占用)
    Rejected(Failure),
}

impl CandidateRun {
    pub fn metrics(&self) -> Option<&Metrics> {
        match self {
            CandidateRun::Finished(result) => result.metrics(),
            CandidateRun::Rejected(_) => None,
        }
    }
}

/// # Summary
/// 扫描中的一个候选。
///
/// # Invariants
/// - `score` 为 `Some` 当且仅当回测完成。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    // 展开顺序中的序号
    pub index: usize,
    pub params: ParamSet,
    pub run: CandidateRun,
    pub score: Option<f64>,
}

impl Candidate {
    pub fn metrics(&self) -> Option<&Metrics> {
        self.run.metrics()
    }
}

/// # Summary
/// 参数扫描报告。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub criterion: Criterion,
    pub total_candidates: usize,
    pub completed: usize,
    // 按得分排序的前 N 个完成候选
    pub ranked: Vec<Candidate>,
    // 失败候选，按展开顺序
    pub unscored: Vec<Candidate>,
}

impl SweepReport {
    pub fn best(&self) -> Option<&Candidate> {
        self.ranked.first()
    }
}

/// 左闭右开日期区间 `[from, to)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateSpan {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateSpan {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    pub fn is_empty(&self) -> bool {
        self.from >= self.to
    }
}

impl fmt::Display for DateSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.from, self.to)
    }
}

/// # Summary
/// 前推验证中的一个窗口划分。
///
/// # Invariants
/// - `in_sample.to == out_of_sample.from`，两段均非空。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpan {
    pub index: usize,
    pub in_sample: DateSpan,
    pub out_of_sample: DateSpan,
}

/// # Summary
/// 一个已评估的窗口。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub span: WindowSpan,
    // 样本内扫描的候选数
    pub sweep_size: usize,
    // 样本内最优候选
    pub best: Option<Candidate>,
    pub in_sample_score: Option<f64>,
    // 最优参数在样本外的回放
    pub out_of_sample: Option<CandidateRun>,
    pub out_of_sample_score: Option<f64>,
}

impl Window {
    /// 是否同时具备样本内与样本外得分
    pub fn is_usable(&self) -> bool {
        self.in_sample_score.is_some() && self.out_of_sample_score.is_some()
    }
}

/// 前推验证结论
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum WalkForwardVerdict {
    Robust,
    NotRobust,
    Inconclusive { reason: String },
}

/// # Summary
/// 前推验证报告。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardReport {
    pub criterion: Criterion,
    pub efficiency_threshold: f64,
    pub windows: Vec<Window>,
    pub usable_windows: usize,
    pub avg_in_sample: Option<f64>,
    pub avg_out_of_sample: Option<f64>,
    pub wf_efficiency: Option<f64>,
    pub verdict: WalkForwardVerdict,
    // 样本外得分最高的窗口所用参数
    pub best_params: Option<ParamSet>,
}

impl WalkForwardReport {
    pub fn is_robust(&self) -> bool {
        self.verdict == WalkForwardVerdict::Robust
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_range_from_str() {
        let range: ParamRange = "20:40:10".parse().unwrap();
        assert_eq!(range, ParamRange::new(20.0, 40.0, 10.0));
        assert!("20:40".parse::<ParamRange>().is_err());
        assert!("a:40:1".parse::<ParamRange>().is_err());
    }

    #[test]
    fn test_criterion_scores() {
        let metrics = Metrics {
            profit_factor: 1.8,
            drawdown: 4.0,
            net_profit: 120.0,
            sharpe_ratio: 0.9,
            ..Metrics::default()
        };
        assert_eq!(Criterion::ProfitFactor.score(&metrics), 1.8);
        assert_eq!(Criterion::InverseDrawdown.score(&metrics), 0.2);
        assert_eq!(Criterion::NetProfit.score(&metrics), 120.0);
        assert_eq!("2".parse::<Criterion>().unwrap(), Criterion::ProfitFactor);
        assert_eq!("sharpe".parse::<Criterion>().unwrap(), Criterion::Sharpe);
    }
}
