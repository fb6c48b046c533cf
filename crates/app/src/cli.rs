use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use shiken_core::common::TimeFrame;
use shiken_core::config::BacktestConfig;
use shiken_core::optimize::entity::{Criterion, ParamRange, ParamRanges};
use shiken_core::run::entity::{ParamValue, RunSpec};
use shiken_core::run::error::RunError;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "shiken",
    version,
    about = "Drive a trading terminal's strategy tester: backtests, parameter sweeps, walk-forward validation, and process supervision",
    propagate_version = true
)]
pub struct Cli {
    /// Config file (defaults to ./shiken.toml when present)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show terminal process status
    Status,
    /// Start the terminal in interactive mode
    Start {
        /// Account to log in with (defaults to terminal.account)
        #[arg(long)]
        account: Option<String>,
    },
    /// Stop the terminal
    Stop {
        /// Kill the process if it ignores the close request
        #[arg(long)]
        force: bool,
    },
    /// Stop, settle, and start the terminal again
    Restart {
        /// Settle delay between stop and start (defaults to terminal.settle_secs)
        #[arg(long)]
        wait_secs: Option<u64>,
    },
    /// Run a single backtest
    Backtest(SpecArgs),
    /// Sweep parameter ranges and rank the results
    Optimize(OptimizeArgs),
    /// Walk-forward validation over rolling in/out-of-sample windows
    WalkForward(WalkForwardArgs),
    /// Supervise the terminal until Ctrl-C
    Watch(WatchArgs),
    /// Parse the newest report written for a strategy
    Report {
        /// Strategy name or path, e.g. Experts\Grid.ex5
        strategy: String,
    },
}

#[derive(Args, Debug)]
pub struct SpecArgs {
    /// Strategy name or path relative to the terminal's MQL5 directory
    #[arg(long)]
    pub strategy: String,
    #[arg(long)]
    pub symbol: String,
    #[arg(long, default_value = "H1")]
    pub timeframe: TimeFrame,
    /// First day of the test range (inclusive), YYYY-MM-DD
    #[arg(long)]
    pub from: NaiveDate,
    /// End of the test range (exclusive), YYYY-MM-DD
    #[arg(long)]
    pub to: NaiveDate,
    #[arg(long)]
    pub deposit: Option<f64>,
    #[arg(long)]
    pub currency: Option<String>,
    #[arg(long)]
    pub leverage: Option<u32>,
    /// Strategy input, repeatable
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, ParamValue)>,
    /// Per-run timeout (defaults to backtest.timeout_secs)
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Parameter range to sweep, repeatable
    #[arg(long = "param", value_name = "NAME=MIN:MAX:STEP", value_parser = parse_range, required = true)]
    pub ranges: Vec<(String, ParamRange)>,
    /// profit_factor, inverse_drawdown, net_profit, sharpe (or terminal codes 0-3)
    #[arg(long)]
    pub criterion: Option<Criterion>,
}

#[derive(Args, Debug)]
pub struct OptimizeArgs {
    #[command(flatten)]
    pub spec: SpecArgs,
    #[command(flatten)]
    pub sweep: SweepArgs,
    /// Number of ranked candidates to keep
    #[arg(long)]
    pub top_n: Option<usize>,
}

#[derive(Args, Debug)]
pub struct WalkForwardArgs {
    #[command(flatten)]
    pub spec: SpecArgs,
    #[command(flatten)]
    pub sweep: SweepArgs,
    #[arg(long)]
    pub windows: Option<u32>,
    /// Out-of-sample share of each window, in (0, 1)
    #[arg(long)]
    pub test_ratio: Option<f64>,
    #[arg(long)]
    pub threshold: Option<f64>,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Polling interval (defaults to watchdog.interval_secs)
    #[arg(long)]
    pub interval_secs: Option<u64>,
    /// Report crashes without restarting
    #[arg(long)]
    pub no_restart: bool,
    /// Start the terminal before watching
    #[arg(long)]
    pub start: bool,
    #[arg(long)]
    pub account: Option<String>,
}

fn parse_value(raw: &str) -> Result<ParamValue, String> {
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<i64>() {
        return Ok(ParamValue::Int(v));
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(ParamValue::Float(v)),
        _ => Err(format!("'{}' is not a number", raw)),
    }
}

fn split_assignment(raw: &str) -> Result<(String, &str), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=..., got '{}'", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing parameter name in '{}'", raw));
    }
    Ok((name.to_string(), value))
}

/// 解析 `NAME=VALUE`
pub fn parse_param(raw: &str) -> Result<(String, ParamValue), String> {
    let (name, value) = split_assignment(raw)?;
    Ok((name, parse_value(value)?))
}

/// 解析 `NAME=MIN:MAX:STEP`
pub fn parse_range(raw: &str) -> Result<(String, ParamRange), String> {
    let (name, range) = split_assignment(raw)?;
    Ok((name, range.parse()?))
}

impl SpecArgs {
    /// 命令行参数覆盖 `[backtest]` 配置后构造回测规格
    pub fn to_spec(&self, defaults: &BacktestConfig) -> Result<RunSpec, RunError> {
        let timeout = self
            .timeout_secs
            .map_or_else(|| defaults.timeout(), Duration::from_secs);
        self.params
            .iter()
            .fold(
                RunSpec::builder(&self.strategy, &self.symbol)
                    .timeframe(self.timeframe)
                    .range(self.from, self.to)
                    .deposit(self.deposit.unwrap_or(defaults.deposit))
                    .currency(self.currency.clone().unwrap_or_else(|| defaults.currency.clone()))
                    .leverage(self.leverage.unwrap_or(defaults.leverage))
                    .model(defaults.model)
                    .timeout(timeout),
                |builder, (name, value)| builder.param(name, *value),
            )
            .build()
    }
}

impl SweepArgs {
    pub fn ranges(&self) -> ParamRanges {
        self.ranges.iter().cloned().collect()
    }
}
