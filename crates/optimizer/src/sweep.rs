use shiken_core::common::failure::Failure;
use shiken_core::optimize::entity::{
    Candidate, CandidateRun, Criterion, ParamRange, ParamRanges, SweepReport,
};
use shiken_core::optimize::error::OptimizeError;
use shiken_core::run::entity::{ParamSet, ParamValue, RunSpec};
use shiken_core::run::port::BacktestRunner;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

// 吸收 (max - min) / step 的浮点误差，使落在步长边界上的 max 被包含
const EPSILON: f64 = 1e-9;

/// 非整数取值保留的小数位
const DECIMALS: f64 = 1e10;

/// 校验后的单个参数轴，取值按需计算
struct Axis<'a> {
    name: &'a str,
    min: f64,
    step: f64,
    steps: u32,
    integral: bool,
}

impl<'a> Axis<'a> {
    fn new(name: &'a str, range: &ParamRange) -> Result<Self, OptimizeError> {
        let invalid = |reason: &str| OptimizeError::InvalidRange {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        if !(range.min.is_finite() && range.max.is_finite() && range.step.is_finite()) {
            return Err(invalid("bounds must be finite"));
        }
        if range.step <= 0.0 {
            return Err(invalid("step must be positive"));
        }
        if range.min > range.max {
            return Err(invalid("min exceeds max"));
        }

        let steps = ((range.max - range.min) / range.step + EPSILON).floor();
        if steps >= f64::from(u32::MAX) {
            return Err(invalid("too many steps"));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let steps = steps as u32;

        Ok(Self {
            name,
            min: range.min,
            step: range.step,
            steps,
            integral: range.min.fract() == 0.0 && range.step.fract() == 0.0,
        })
    }

    /// 取值个数，平台放不下时饱和
    fn len(&self) -> usize {
        usize::try_from(self.steps).map_or(usize::MAX, |steps| steps.saturating_add(1))
    }

    fn value(&self, i: usize) -> ParamValue {
        let i = u32::try_from(i).unwrap_or(self.steps).min(self.steps);
        let value = self.min + f64::from(i) * self.step;
        if self.integral {
            #[allow(clippy::cast_possible_truncation)]
            let whole = value.round() as i64;
            ParamValue::Int(whole)
        } else {
            ParamValue::Float((value * DECIMALS).round() / DECIMALS)
        }
    }
}

/// # Summary
/// 将参数区间展开为候选参数赋值的笛卡尔积。
///
/// # Logic
/// 1. 校验每个区间，离散为 `min + i·step`，`i = 0..=floor((max-min)/step + ε)`。
/// 2. `min` 与 `step` 均为整数时取整数值。
/// 3. 只凭各轴长度计算组合数，超过 `max_candidates` 时在分配任何取值前拒绝。
/// 4. 按参数名顺序组合，第一个参数变化最慢。
///
/// # Returns
/// 按展开顺序排列的参数赋值。
pub fn expand(ranges: &ParamRanges, max_candidates: usize) -> Result<Vec<ParamSet>, OptimizeError> {
    if ranges.is_empty() {
        return Err(OptimizeError::InvalidSweep("no parameter ranges".to_string()));
    }
    let axes = ranges
        .iter()
        .map(|(name, range)| Axis::new(name, range))
        .collect::<Result<Vec<_>, _>>()?;

    let total = axes
        .iter()
        .try_fold(1usize, |acc, axis| acc.checked_mul(axis.len()))
        .unwrap_or(usize::MAX);
    if total > max_candidates {
        return Err(OptimizeError::TooManyCandidates {
            count: total,
            limit: max_candidates,
        });
    }

    let mut sets = Vec::with_capacity(total);
    let mut cursor = vec![0usize; axes.len()];
    loop {
        sets.push(
            axes.iter()
                .zip(&cursor)
                .map(|(axis, &i)| (axis.name.to_string(), axis.value(i)))
                .collect::<ParamSet>(),
        );
        // 里程表式进位，最后一个参数变化最快
        let mut k = axes.len();
        loop {
            if k == 0 {
                return Ok(sets);
            }
            k -= 1;
            cursor[k] += 1;
            if cursor[k] < axes[k].len() {
                break;
            }
            cursor[k] = 0;
        }
    }
}

fn drawdown(candidate: &Candidate) -> f64 {
    candidate.metrics().map_or(f64::INFINITY, |m| m.drawdown)
}

fn by_rank(a: &Candidate, b: &Candidate) -> Ordering {
    let score_a = a.score.unwrap_or(f64::NEG_INFINITY);
    let score_b = b.score.unwrap_or(f64::NEG_INFINITY);
    score_b
        .total_cmp(&score_a)
        .then_with(|| drawdown(a).total_cmp(&drawdown(b)))
        .then_with(|| a.index.cmp(&b.index))
}

/// # Summary
/// 对候选排序，结果只取决于候选本身，与执行时序无关。
///
/// # Logic
/// 得分降序，回撤升序，展开序号升序。
///
/// # Returns
/// `(前 top_n 个有得分的候选, 无得分的候选按展开顺序)`。
pub fn rank(candidates: Vec<Candidate>, top_n: usize) -> (Vec<Candidate>, Vec<Candidate>) {
    let (mut scored, mut unscored): (Vec<_>, Vec<_>) =
        candidates.into_iter().partition(|c| c.score.is_some());
    scored.sort_by(by_rank);
    scored.truncate(top_n);
    unscored.sort_by_key(|c| c.index);
    (scored, unscored)
}

/// # Summary
/// 参数扫描优化器：逐个执行候选并排序。
///
/// # Invariants
/// - 同一时刻只执行一个回测。
/// - 单个候选失败只会使其无得分，扫描继续。
pub struct SweepOptimizer {
    runner: Arc<dyn BacktestRunner>,
    max_candidates: usize,
}

impl SweepOptimizer {
    pub fn new(runner: Arc<dyn BacktestRunner>, max_candidates: usize) -> Self {
        Self {
            runner,
            max_candidates,
        }
    }

    /// # Summary
    /// 在模板上扫描参数区间。
    ///
    /// # Arguments
    /// * `template`: 回测模板，候选参数覆盖其同名参数。
    /// * `ranges`: 参数名到扫描区间。
    /// * `criterion`: 排序依据。
    /// * `top_n`: 报告保留的最优候选数。
    ///
    /// # Returns
    /// 区间非法、规模超限或 `top_n == 0` 时返回 `OptimizeError`，此时不会执行任何回测。
    pub async fn optimize(
        &self,
        template: &RunSpec,
        ranges: &ParamRanges,
        criterion: Criterion,
        top_n: usize,
    ) -> Result<SweepReport, OptimizeError> {
        if top_n == 0 {
            return Err(OptimizeError::InvalidSweep("top_n must be positive".to_string()));
        }
        let sets = expand(ranges, self.max_candidates)?;
        let total = sets.len();
        info!(
            strategy = template.strategy(),
            symbol = template.symbol(),
            total,
            %criterion,
            "Sweep started"
        );

        let mut candidates = Vec::with_capacity(total);
        for (index, overrides) in sets.into_iter().enumerate() {
            let mut params = template.params().clone();
            params.extend(overrides);
            let spec = template.with_params(params);
            candidates.push(self.evaluate(index, total, spec, criterion).await);
        }
        Ok(report(criterion, candidates, top_n))
    }

    /// # Summary
    /// 顺序执行一组显式给定的回测并排序。
    pub async fn run_batch(
        &self,
        specs: Vec<RunSpec>,
        criterion: Criterion,
        top_n: usize,
    ) -> Result<SweepReport, OptimizeError> {
        if specs.is_empty() {
            return Err(OptimizeError::InvalidSweep("empty batch".to_string()));
        }
        if top_n == 0 {
            return Err(OptimizeError::InvalidSweep("top_n must be positive".to_string()));
        }
        if specs.len() > self.max_candidates {
            return Err(OptimizeError::TooManyCandidates {
                count: specs.len(),
                limit: self.max_candidates,
            });
        }

        let total = specs.len();
        info!(total, %criterion, "Batch started");
        let mut candidates = Vec::with_capacity(total);
        for (index, spec) in specs.into_iter().enumerate() {
            candidates.push(self.evaluate(index, total, spec, criterion).await);
        }
        Ok(report(criterion, candidates, top_n))
    }

    async fn evaluate(
        &self,
        index: usize,
        total: usize,
        spec: RunSpec,
        criterion: Criterion,
    ) -> Candidate {
        let params = spec.params().clone();
        match self.runner.run(spec).await {
            Ok(result) => {
                let score = result.metrics().map(|m| criterion.score(m));
                info!(
                    candidate = index + 1,
                    total,
                    status = %result.status(),
                    ?score,
                    "Candidate finished"
                );
                Candidate {
                    index,
                    params,
                    run: CandidateRun::Finished(result),
                    score,
                }
            }
            Err(e) => {
                warn!(candidate = index + 1, total, error = %e, "Candidate rejected");
                Candidate {
                    index,
                    params,
                    run: CandidateRun::Rejected(Failure::from(&e)),
                    score: None,
                }
            }
        }
    }
}

fn report(criterion: Criterion, candidates: Vec<Candidate>, top_n: usize) -> SweepReport {
    let total_candidates = candidates.len();
    let completed = candidates.iter().filter(|c| c.score.is_some()).count();
    let (ranked, unscored) = rank(candidates, top_n);
    info!(
        total = total_candidates,
        completed,
        best = ?ranked.first().and_then(|c| c.score),
        "Sweep finished"
    );
    SweepReport {
        criterion,
        total_candidates,
        completed,
        ranked,
        unscored,
    }
}
