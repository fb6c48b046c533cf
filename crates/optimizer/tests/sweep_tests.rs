use chrono::NaiveDate;
use shiken_core::common::failure::{Failure, FailureKind};
use shiken_core::optimize::entity::{CandidateRun, Criterion, ParamRange, ParamRanges};
use shiken_core::optimize::error::OptimizeError;
use shiken_core::run::entity::{Metrics, ParamValue, RunOutcome, RunSpec};
use shiken_core::run::error::RunError;
use shiken_core::testing::ScriptedRunner;
use shiken_optimizer::SweepOptimizer;
use std::sync::Arc;

fn template() -> anyhow::Result<RunSpec> {
    Ok(RunSpec::builder("S", "EURUSD")
        .range(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        )
        .param("Lots", ParamValue::Float(0.1))
        .build()?)
}

fn int_param(spec: &RunSpec, name: &str) -> i64 {
    match spec.params().get(name) {
        Some(ParamValue::Int(v)) => *v,
        other => panic!("unexpected {} value: {:?}", name, other),
    }
}

fn completed(profit_factor: f64, drawdown: f64) -> RunOutcome {
    RunOutcome::Completed(Metrics {
        profit_factor,
        drawdown,
        trade_count: 10,
        ..Metrics::default()
    })
}

fn tp_range(min: f64, max: f64, step: f64) -> ParamRanges {
    ParamRanges::from([("TP".to_string(), ParamRange::new(min, max, step))])
}

#[tokio::test]
async fn test_optimize_picks_best_profit_factor() -> anyhow::Result<()> {
    let runner = Arc::new(ScriptedRunner::new(|spec| {
        let pf = match int_param(spec, "TP") {
            20 => 1.1,
            30 => 1.8,
            _ => 1.3,
        };
        Ok(completed(pf, 5.0))
    }));
    let optimizer = SweepOptimizer::new(runner.clone(), 100);

    let report = optimizer
        .optimize(&template()?, &tp_range(20.0, 40.0, 10.0), Criterion::ProfitFactor, 1)
        .await?;

    assert_eq!(report.total_candidates, 3);
    assert_eq!(report.completed, 3);
    assert_eq!(report.ranked.len(), 1);
    let best = report.best().unwrap();
    assert_eq!(best.params["TP"], ParamValue::Int(30));
    assert_eq!(best.score, Some(1.8));
    // 模板参数保留
    assert_eq!(best.params["Lots"], ParamValue::Float(0.1));

    let calls = runner.calls();
    let tps: Vec<i64> = calls.iter().map(|s| int_param(s, "TP")).collect();
    assert_eq!(tps, vec![20, 30, 40]);
    Ok(())
}

#[tokio::test]
async fn test_ties_break_on_drawdown_then_order() -> anyhow::Result<()> {
    let runner = Arc::new(ScriptedRunner::new(|spec| {
        let dd = match int_param(spec, "TP") {
            10 => 8.0,
            20 => 3.0,
            _ => 3.0,
        };
        Ok(completed(1.5, dd))
    }));
    let optimizer = SweepOptimizer::new(runner, 100);

    let report = optimizer
        .optimize(&template()?, &tp_range(10.0, 30.0, 10.0), Criterion::ProfitFactor, 3)
        .await?;

    let order: Vec<ParamValue> = report.ranked.iter().map(|c| c.params["TP"]).collect();
    assert_eq!(
        order,
        vec![ParamValue::Int(20), ParamValue::Int(30), ParamValue::Int(10)]
    );
    Ok(())
}

#[tokio::test]
async fn test_failed_candidates_are_unscored_and_sweep_continues() -> anyhow::Result<()> {
    let runner = Arc::new(ScriptedRunner::new(|spec| match int_param(spec, "TP") {
        10 => Ok(RunOutcome::Crashed(Failure::new(
            FailureKind::CrashFailure,
            "terminal exited",
        ))),
        20 => Err(RunError::Busy),
        30 => Ok(RunOutcome::TimedOut(Failure::new(FailureKind::Timeout, "no report"))),
        _ => Ok(completed(1.2, 4.0)),
    }));
    let optimizer = SweepOptimizer::new(runner.clone(), 100);

    let report = optimizer
        .optimize(&template()?, &tp_range(10.0, 40.0, 10.0), Criterion::ProfitFactor, 5)
        .await?;

    assert_eq!(runner.calls().len(), 3);
    assert_eq!(report.total_candidates, 4);
    assert_eq!(report.completed, 1);
    assert_eq!(report.ranked.len(), 1);
    assert_eq!(report.ranked[0].params["TP"], ParamValue::Int(40));

    let unscored: Vec<usize> = report.unscored.iter().map(|c| c.index).collect();
    assert_eq!(unscored, vec![0, 1, 2]);
    assert!(report.unscored.iter().all(|c| c.score.is_none()));
    match &report.unscored[1].run {
        CandidateRun::Rejected(failure) => assert_eq!(failure.kind, FailureKind::Busy),
        other => panic!("expected rejection, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_oversized_sweep_runs_nothing() -> anyhow::Result<()> {
    let runner = Arc::new(ScriptedRunner::new(|_| Ok(completed(1.0, 1.0))));
    let optimizer = SweepOptimizer::new(runner.clone(), 5);

    let err = optimizer
        .optimize(&template()?, &tp_range(1.0, 10.0, 1.0), Criterion::ProfitFactor, 1)
        .await
        .unwrap_err();

    assert_eq!(err, OptimizeError::TooManyCandidates { count: 10, limit: 5 });
    assert!(runner.calls().is_empty());

    let err = optimizer
        .optimize(&template()?, &tp_range(1.0, 2.0, 1.0), Criterion::ProfitFactor, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, OptimizeError::InvalidSweep(_)));
    assert!(runner.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_inverse_drawdown_prefers_smaller_drawdown() -> anyhow::Result<()> {
    let runner = Arc::new(ScriptedRunner::new(|spec| {
        let dd = match int_param(spec, "TP") {
            1 => 12.0,
            2 => 2.0,
            _ => 6.0,
        };
        Ok(completed(1.0, dd))
    }));
    let optimizer = SweepOptimizer::new(runner, 100);

    let report = optimizer
        .optimize(&template()?, &tp_range(1.0, 3.0, 1.0), Criterion::InverseDrawdown, 1)
        .await?;

    assert_eq!(report.best().unwrap().params["TP"], ParamValue::Int(2));
    Ok(())
}

#[tokio::test]
async fn test_run_batch_ranks_explicit_specs() -> anyhow::Result<()> {
    let runner = Arc::new(ScriptedRunner::new(|spec| {
        Ok(completed(if spec.symbol() == "GBPUSD" { 2.0 } else { 1.0 }, 1.0))
    }));
    let optimizer = SweepOptimizer::new(runner, 100);
    let base = template()?;
    let other = RunSpec::builder("S", "GBPUSD")
        .range(base.from(), base.to())
        .build()?;

    let report = optimizer
        .run_batch(vec![base, other], Criterion::ProfitFactor, 2)
        .await?;

    assert_eq!(report.ranked.len(), 2);
    assert_eq!(report.ranked[0].index, 1);
    assert!(matches!(
        optimizer.run_batch(Vec::new(), Criterion::ProfitFactor, 1).await,
        Err(OptimizeError::InvalidSweep(_))
    ));
    Ok(())
}

#[test]
fn test_huge_axes_rejected_before_expansion() {
    let err = shiken_optimizer::expand(&tp_range(0.0, 1e9, 1.0), 100).unwrap_err();
    assert_eq!(
        err,
        OptimizeError::TooManyCandidates {
            count: 1_000_000_001,
            limit: 100
        }
    );

    // 组合数超出 usize 时饱和
    let wide = ParamRange::new(0.0, 4e9, 1.0);
    let ranges = ParamRanges::from([
        ("A".to_string(), wide),
        ("B".to_string(), wide),
        ("C".to_string(), wide),
    ]);
    let err = shiken_optimizer::expand(&ranges, 100).unwrap_err();
    assert_eq!(
        err,
        OptimizeError::TooManyCandidates {
            count: usize::MAX,
            limit: 100
        }
    );
}

#[tokio::test]
async fn test_repeated_sweep_ranks_identically() -> anyhow::Result<()> {
    // 全部候选得分与回撤相同，名次只能由展开顺序决定
    let runner = Arc::new(ScriptedRunner::new(|_| Ok(completed(1.4, 5.0))));
    let optimizer = SweepOptimizer::new(runner.clone(), 100);
    let ranges = ParamRanges::from([
        ("SL".to_string(), ParamRange::new(5.0, 15.0, 5.0)),
        ("TP".to_string(), ParamRange::new(10.0, 30.0, 10.0)),
    ]);

    let mut orders = Vec::new();
    for _ in 0..2 {
        let report = optimizer
            .optimize(&template()?, &ranges, Criterion::ProfitFactor, 9)
            .await?;
        let order: Vec<_> = report
            .ranked
            .iter()
            .map(|c| (c.index, c.params.clone()))
            .collect();
        orders.push(order);
    }

    assert_eq!(orders[0], orders[1]);
    let indices: Vec<usize> = orders[0].iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, (0..9).collect::<Vec<_>>());
    assert_eq!(runner.calls().len(), 18);
    Ok(())
}
