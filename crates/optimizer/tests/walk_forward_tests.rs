use chrono::NaiveDate;
use shiken_core::common::failure::{Failure, FailureKind};
use shiken_core::optimize::entity::{
    Criterion, DateSpan, ParamRange, ParamRanges, WalkForwardVerdict,
};
use shiken_core::optimize::error::OptimizeError;
use shiken_core::run::entity::{Metrics, ParamValue, RunOutcome, RunSpec};
use shiken_core::testing::ScriptedRunner;
use shiken_optimizer::{SweepOptimizer, WalkForwardPlan, WalkForwardValidator};
use std::sync::Arc;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn template() -> anyhow::Result<RunSpec> {
    Ok(RunSpec::builder("S", "EURUSD")
        .range(date(2024, 1, 1), date(2024, 5, 1))
        .build()?)
}

fn ranges() -> ParamRanges {
    ParamRanges::from([("TP".to_string(), ParamRange::new(20.0, 40.0, 10.0))])
}

fn plan(threshold: f64) -> WalkForwardPlan {
    WalkForwardPlan {
        date_from: date(2024, 1, 1),
        date_to: date(2024, 5, 1),
        n_windows: 2,
        test_ratio: 0.5,
        efficiency_threshold: threshold,
    }
}

fn tp(spec: &RunSpec) -> i64 {
    match spec.params().get("TP") {
        Some(ParamValue::Int(v)) => *v,
        other => panic!("unexpected TP: {:?}", other),
    }
}

fn pf(profit_factor: f64) -> RunOutcome {
    RunOutcome::Completed(Metrics {
        profit_factor,
        trade_count: 5,
        ..Metrics::default()
    })
}

fn validator(runner: Arc<ScriptedRunner>) -> WalkForwardValidator {
    let optimizer = Arc::new(SweepOptimizer::new(runner.clone(), 100));
    WalkForwardValidator::new(optimizer, runner, 100)
}

/// 样本内 TP=30 最优 (2.0)，样本外按月份给出不同得分
fn seasonal_runner(oos_pf: fn(u32) -> f64) -> Arc<ScriptedRunner> {
    use chrono::Datelike;
    Arc::new(ScriptedRunner::new(move |spec| {
        let in_sample = matches!(spec.from().month(), 1 | 3);
        if in_sample {
            Ok(pf(if tp(spec) == 30 { 2.0 } else { 1.0 }))
        } else {
            Ok(pf(oos_pf(spec.from().month())))
        }
    }))
}

#[tokio::test]
async fn test_windows_run_in_chronological_order() -> anyhow::Result<()> {
    let runner = seasonal_runner(|_| 1.6);
    let report = validator(runner.clone())
        .validate(&template()?, &ranges(), Criterion::ProfitFactor, &plan(0.7))
        .await?;

    assert_eq!(report.windows.len(), 2);
    let first = &report.windows[0].span;
    let second = &report.windows[1].span;
    assert_eq!(first.in_sample, DateSpan::new(date(2024, 1, 1), date(2024, 2, 1)));
    assert_eq!(first.out_of_sample, DateSpan::new(date(2024, 2, 1), date(2024, 3, 1)));
    assert_eq!(second.in_sample.from, first.out_of_sample.to);
    assert_eq!(second.out_of_sample, DateSpan::new(date(2024, 4, 1), date(2024, 5, 1)));

    // 每个窗口 3 次样本内 + 1 次样本外
    let calls = runner.calls();
    assert_eq!(calls.len(), 8);
    let starts: Vec<NaiveDate> = calls.iter().map(|s| s.from()).collect();
    let mut sorted = starts.clone();
    sorted.sort();
    assert_eq!(starts, sorted);
    assert_eq!(tp(&calls[3]), 30);
    assert_eq!(calls[3].from(), date(2024, 2, 1));
    assert_eq!(calls[3].to(), date(2024, 3, 1));
    Ok(())
}

#[tokio::test]
async fn test_robust_when_efficiency_meets_threshold() -> anyhow::Result<()> {
    let runner = seasonal_runner(|_| 1.6);
    let report = validator(runner)
        .validate(&template()?, &ranges(), Criterion::ProfitFactor, &plan(0.7))
        .await?;

    assert_eq!(report.usable_windows, 2);
    assert_eq!(report.avg_in_sample, Some(2.0));
    assert_eq!(report.avg_out_of_sample, Some(1.6));
    assert_eq!(report.wf_efficiency, Some(0.8));
    assert_eq!(report.verdict, WalkForwardVerdict::Robust);
    assert!(report.is_robust());
    assert_eq!(report.best_params.unwrap()["TP"], ParamValue::Int(30));
    Ok(())
}

#[tokio::test]
async fn test_not_robust_below_threshold() -> anyhow::Result<()> {
    let runner = seasonal_runner(|month| if month == 2 { 1.0 } else { 0.5 });
    let report = validator(runner)
        .validate(&template()?, &ranges(), Criterion::ProfitFactor, &plan(0.7))
        .await?;

    assert_eq!(report.avg_out_of_sample, Some(0.75));
    assert_eq!(report.wf_efficiency, Some(0.375));
    assert_eq!(report.verdict, WalkForwardVerdict::NotRobust);
    Ok(())
}

#[tokio::test]
async fn test_failed_window_is_excluded_from_averages() -> anyhow::Result<()> {
    use chrono::Datelike;
    // 第二个窗口的样本内全部崩溃
    let runner = Arc::new(ScriptedRunner::new(|spec| match spec.from().month() {
        1 => Ok(pf(if tp(spec) == 30 { 2.0 } else { 1.0 })),
        2 => Ok(pf(1.5)),
        _ => Ok(RunOutcome::Crashed(Failure::new(
            FailureKind::CrashFailure,
            "terminal vanished",
        ))),
    }));
    let report = validator(runner.clone())
        .validate(&template()?, &ranges(), Criterion::ProfitFactor, &plan(0.7))
        .await?;

    assert_eq!(report.windows.len(), 2);
    assert!(report.windows[0].is_usable());
    assert!(!report.windows[1].is_usable());
    assert!(report.windows[1].best.is_none());
    assert!(report.windows[1].out_of_sample.is_none());
    assert_eq!(report.usable_windows, 1);
    assert_eq!(report.avg_in_sample, Some(2.0));
    assert_eq!(report.wf_efficiency, Some(0.75));
    assert_eq!(report.verdict, WalkForwardVerdict::Robust);
    // 第二个窗口没有可回放的参数
    assert_eq!(runner.calls().len(), 7);
    Ok(())
}

#[tokio::test]
async fn test_inconclusive_without_usable_windows() -> anyhow::Result<()> {
    let runner = Arc::new(ScriptedRunner::new(|_| {
        Ok(RunOutcome::TimedOut(Failure::new(FailureKind::Timeout, "no report")))
    }));
    let report = validator(runner)
        .validate(&template()?, &ranges(), Criterion::ProfitFactor, &plan(0.7))
        .await?;

    assert_eq!(report.usable_windows, 0);
    assert_eq!(report.wf_efficiency, None);
    assert!(matches!(report.verdict, WalkForwardVerdict::Inconclusive { .. }));
    assert!(report.best_params.is_none());
    Ok(())
}

#[tokio::test]
async fn test_inconclusive_when_in_sample_average_not_positive() -> anyhow::Result<()> {
    let runner = Arc::new(ScriptedRunner::new(|_| Ok(pf(0.0))));
    let report = validator(runner)
        .validate(&template()?, &ranges(), Criterion::ProfitFactor, &plan(0.7))
        .await?;

    assert_eq!(report.usable_windows, 2);
    assert_eq!(report.avg_in_sample, Some(0.0));
    assert_eq!(report.wf_efficiency, None);
    assert!(matches!(report.verdict, WalkForwardVerdict::Inconclusive { .. }));
    Ok(())
}

#[tokio::test]
async fn test_invalid_plan_runs_nothing() -> anyhow::Result<()> {
    let runner = seasonal_runner(|_| 1.0);
    let validator = validator(runner.clone());

    let mut bad = plan(0.7);
    bad.n_windows = 0;
    let err = validator
        .validate(&template()?, &ranges(), Criterion::ProfitFactor, &bad)
        .await
        .unwrap_err();
    assert!(matches!(err, OptimizeError::InvalidWindows(_)));

    let bad_ranges = ParamRanges::from([("TP".to_string(), ParamRange::new(40.0, 20.0, 10.0))]);
    let err = validator
        .validate(&template()?, &bad_ranges, Criterion::ProfitFactor, &plan(0.7))
        .await
        .unwrap_err();
    assert!(matches!(err, OptimizeError::InvalidRange { .. }));

    assert!(runner.calls().is_empty());
    Ok(())
}
