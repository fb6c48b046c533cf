use crate::sweep::{SweepOptimizer, expand};
use chrono::{Datelike, NaiveDate, TimeDelta};
use shiken_core::common::failure::Failure;
use shiken_core::optimize::entity::{
    CandidateRun, Criterion, DateSpan, ParamRanges, WalkForwardReport, WalkForwardVerdict,
    Window, WindowSpan,
};
use shiken_core::optimize::error::OptimizeError;
use shiken_core::run::entity::RunSpec;
use shiken_core::run::port::BacktestRunner;
use std::sync::Arc;
use tracing::{info, warn};

// 月坐标换算回日期时吸收浮点误差
const EPSILON: f64 = 1e-9;

/// # Summary
/// 前推验证的时间划分参数。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WalkForwardPlan {
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub n_windows: u32,
    // 每个窗口中样本外所占比例
    pub test_ratio: f64,
    // 判定稳健的效率阈值
    pub efficiency_threshold: f64,
}

fn first_of_month(year: i32, month0: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month0 + 1, 1)
}

fn days_in_month(year: i32, month0: u32) -> Option<f64> {
    let first = first_of_month(year, month0)?;
    let next = if month0 == 11 {
        first_of_month(year + 1, 0)?
    } else {
        first_of_month(year, month0 + 1)?
    };
    let days = i32::try_from((next - first).num_days()).ok()?;
    Some(f64::from(days))
}

/// 以月为单位的连续坐标：整数部分为月序号，小数部分为月内进度
fn month_coord(date: NaiveDate) -> Option<f64> {
    let days = days_in_month(date.year(), date.month0())?;
    Some(
        f64::from(date.year()) * 12.0
            + f64::from(date.month0())
            + f64::from(date.day0()) / days,
    )
}

/// 月坐标换算回日期，月内小数部分向下取整到整天
fn from_month_coord(coord: f64) -> Option<NaiveDate> {
    let whole = (coord + EPSILON).floor();
    if !whole.is_finite() || whole.abs() > f64::from(i32::MAX) {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    let index = whole as i32;
    let year = index.div_euclid(12);
    let month0 = u32::try_from(index.rem_euclid(12)).ok()?;
    let days = days_in_month(year, month0)?;
    let offset = ((coord - whole).max(0.0) * days + EPSILON).floor();
    #[allow(clippy::cast_possible_truncation)]
    let offset = offset as i64;
    first_of_month(year, month0)?.checked_add_signed(TimeDelta::days(offset))
}

/// # Summary
/// 将日期区间划分为前推窗口。
///
/// # Logic
/// 1. 以日历月度量长度，把 `[from, to)` 等分为 `n_windows` 段，首尾边界固定为 `from` 与 `to`。
/// 2. 每段前 `1 - test_ratio` 为样本内，其余为样本外，小数月落到整天。
/// 3. 任一窗口的样本内或样本外为空即拒绝。
///
/// # Returns
/// 按时间顺序排列、首尾相接且互不重叠的窗口。
pub fn partition(plan: &WalkForwardPlan) -> Result<Vec<WindowSpan>, OptimizeError> {
    let invalid = |reason: String| OptimizeError::InvalidWindows(reason);
    if plan.n_windows == 0 {
        return Err(invalid("n_windows must be at least 1".to_string()));
    }
    if !(plan.test_ratio > 0.0 && plan.test_ratio < 1.0) {
        return Err(invalid(format!(
            "test_ratio must be in (0, 1), got {}",
            plan.test_ratio
        )));
    }
    if plan.date_from >= plan.date_to {
        return Err(invalid(format!(
            "empty date range [{}, {})",
            plan.date_from, plan.date_to
        )));
    }

    let out_of_range = || invalid("date out of supported range".to_string());
    let start = month_coord(plan.date_from).ok_or_else(out_of_range)?;
    let end = month_coord(plan.date_to).ok_or_else(out_of_range)?;
    let n = f64::from(plan.n_windows);
    let window_len = (end - start) / n;

    let boundary = |i: u32| -> Result<NaiveDate, OptimizeError> {
        if i == 0 {
            Ok(plan.date_from)
        } else if i == plan.n_windows {
            Ok(plan.date_to)
        } else {
            from_month_coord(start + window_len * f64::from(i)).ok_or_else(out_of_range)
        }
    };

    let mut spans = Vec::new();
    for i in 0..plan.n_windows {
        let from = boundary(i)?;
        let to = boundary(i + 1)?;
        let split_coord = start + window_len * (f64::from(i) + 1.0 - plan.test_ratio);
        let split = from_month_coord(split_coord)
            .ok_or_else(out_of_range)?
            .clamp(from, to);

        let in_sample = DateSpan::new(from, split);
        let out_of_sample = DateSpan::new(split, to);
        if in_sample.is_empty() || out_of_sample.is_empty() {
            return Err(invalid(format!(
                "window {} is too short to split: in-sample {}, out-of-sample {}",
                i + 1,
                in_sample,
                out_of_sample
            )));
        }
        spans.push(WindowSpan {
            index: usize::try_from(i).unwrap_or(usize::MAX),
            in_sample,
            out_of_sample,
        });
    }
    Ok(spans)
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// # Summary
/// 前推验证器。
///
/// # Invariants
/// - 窗口按时间顺序逐个处理，后一窗口的样本内数据不会早于前一窗口。
/// - 单个窗口失败只会使其不参与平均，验证继续。
pub struct WalkForwardValidator {
    optimizer: Arc<SweepOptimizer>,
    runner: Arc<dyn BacktestRunner>,
    max_candidates: usize,
}

impl WalkForwardValidator {
    pub fn new(
        optimizer: Arc<SweepOptimizer>,
        runner: Arc<dyn BacktestRunner>,
        max_candidates: usize,
    ) -> Self {
        Self {
            optimizer,
            runner,
            max_candidates,
        }
    }

    /// # Summary
    /// 执行前推验证。
    ///
    /// # Logic
    /// 1. 先校验划分与参数区间，非法时不执行任何回测。
    /// 2. 逐窗口：样本内扫描取最优候选，再以其参数回放样本外区间。
    /// 3. 只对同时具备样本内与样本外得分的窗口求平均，计算效率 `avg(oos) / avg(is)`。
    ///
    /// # Returns
    /// 没有可用窗口或样本内平均得分不为正时，结论为 `Inconclusive`。
    pub async fn validate(
        &self,
        template: &RunSpec,
        ranges: &ParamRanges,
        criterion: Criterion,
        plan: &WalkForwardPlan,
    ) -> Result<WalkForwardReport, OptimizeError> {
        if !plan.efficiency_threshold.is_finite() {
            return Err(OptimizeError::InvalidWindows(
                "efficiency threshold must be finite".to_string(),
            ));
        }
        let spans = partition(plan)?;
        expand(ranges, self.max_candidates)?;
        info!(
            strategy = template.strategy(),
            windows = spans.len(),
            %criterion,
            "Walk-forward started"
        );

        let mut windows = Vec::with_capacity(spans.len());
        for span in spans {
            windows.push(self.evaluate_window(template, ranges, criterion, span).await?);
        }
        Ok(aggregate(criterion, plan.efficiency_threshold, windows))
    }

    async fn evaluate_window(
        &self,
        template: &RunSpec,
        ranges: &ParamRanges,
        criterion: Criterion,
        span: WindowSpan,
    ) -> Result<Window, OptimizeError> {
        let window_no = span.index + 1;
        info!(
            window = window_no,
            in_sample = %span.in_sample,
            out_of_sample = %span.out_of_sample,
            "Window started"
        );

        let in_sample_template = template
            .with_range(span.in_sample.from, span.in_sample.to)
            .map_err(|e| OptimizeError::InvalidWindows(e.to_string()))?;
        let sweep = self
            .optimizer
            .optimize(&in_sample_template, ranges, criterion, 1)
            .await?;
        let best = sweep.best().cloned();

        let Some(best) = best else {
            warn!(window = window_no, "No completed in-sample candidate");
            return Ok(Window {
                span,
                sweep_size: sweep.total_candidates,
                best: None,
                in_sample_score: None,
                out_of_sample: None,
                out_of_sample_score: None,
            });
        };

        let oos_spec = template
            .with_range(span.out_of_sample.from, span.out_of_sample.to)
            .map_err(|e| OptimizeError::InvalidWindows(e.to_string()))?
            .with_params(best.params.clone());
        let (out_of_sample, out_of_sample_score) = match self.runner.run(oos_spec).await {
            Ok(result) => {
                let score = result.metrics().map(|m| criterion.score(m));
                (CandidateRun::Finished(result), score)
            }
            Err(e) => {
                warn!(window = window_no, error = %e, "Out-of-sample run rejected");
                (CandidateRun::Rejected(Failure::from(&e)), None)
            }
        };
        info!(
            window = window_no,
            in_sample_score = ?best.score,
            out_of_sample_score = ?out_of_sample_score,
            "Window finished"
        );

        Ok(Window {
            span,
            sweep_size: sweep.total_candidates,
            in_sample_score: best.score,
            best: Some(best),
            out_of_sample: Some(out_of_sample),
            out_of_sample_score,
        })
    }
}

/// # Summary
/// 汇总窗口得分并给出结论。
fn aggregate(criterion: Criterion, threshold: f64, windows: Vec<Window>) -> WalkForwardReport {
    let usable: Vec<&Window> = windows.iter().filter(|w| w.is_usable()).collect();
    let in_sample: Vec<f64> = usable.iter().filter_map(|w| w.in_sample_score).collect();
    let out_of_sample: Vec<f64> = usable.iter().filter_map(|w| w.out_of_sample_score).collect();
    let avg_in_sample = mean(&in_sample);
    let avg_out_of_sample = mean(&out_of_sample);

    let best_params = usable
        .iter()
        .filter_map(|w| w.out_of_sample_score.map(|score| (score, *w)))
        // 得分相同时取较早的窗口
        .reduce(|best, next| if next.0 > best.0 { next } else { best })
        .and_then(|(_, w)| w.best.as_ref().map(|c| c.params.clone()));

    let (wf_efficiency, verdict) = match (avg_in_sample, avg_out_of_sample) {
        (Some(avg_is), Some(avg_oos)) if avg_is > 0.0 => {
            let efficiency = avg_oos / avg_is;
            let verdict = if efficiency >= threshold {
                WalkForwardVerdict::Robust
            } else {
                WalkForwardVerdict::NotRobust
            };
            (Some(efficiency), verdict)
        }
        (Some(avg_is), Some(_)) => (
            None,
            WalkForwardVerdict::Inconclusive {
                reason: format!("average in-sample score {} is not positive", avg_is),
            },
        ),
        _ => (
            None,
            WalkForwardVerdict::Inconclusive {
                reason: "no window produced both in-sample and out-of-sample scores".to_string(),
            },
        ),
    };

    let usable_windows = usable.len();
    info!(
        windows = windows.len(),
        usable = usable_windows,
        efficiency = ?wf_efficiency,
        ?verdict,
        "Walk-forward finished"
    );
    WalkForwardReport {
        criterion,
        efficiency_threshold: threshold,
        windows,
        usable_windows,
        avg_in_sample,
        avg_out_of_sample,
        wf_efficiency,
        verdict,
        best_params,
    }
}
