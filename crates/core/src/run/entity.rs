use crate::artifact::entity::ArtifactPaths;
use crate::common::TimeFrame;
use crate::common::failure::Failure;
use crate::run::error::RunError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// # Summary
/// 策略参数值。
///
/// # Invariants
/// - 写入配置产物时不带多余的尾随零 (`20` 而不是 `20.0`)。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
}

impl ParamValue {
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> f64 {
        match self {
            ParamValue::Int(v) => *v as f64,
            ParamValue::Float(v) => *v,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            // f64 的 Display 已是最短表示，2.0 输出为 "2"
            ParamValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// 有序参数赋值，按参数名排序
pub type ParamSet = BTreeMap<String, ParamValue>;

/// # Summary
/// 行情回放模型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickModel {
    // 逐 tick
    EveryTick,
    // 1 分钟 OHLC
    OhlcM1,
    // 仅开盘价
    OpenPrices,
}

impl TickModel {
    /// 终端配置中的数值编码
    pub fn code(&self) -> u8 {
        match self {
            TickModel::EveryTick => 0,
            TickModel::OhlcM1 => 1,
            TickModel::OpenPrices => 2,
        }
    }
}

/// # Summary
/// 一次回测的不可变描述。
///
/// # Invariants
/// - 策略与品种非空，`from < to`，资金与杠杆为正。
/// - 创建后不可修改，`with_params` / `with_range` 返回新实例。
/// - 日期区间为左闭右开 `[from, to)`。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSpec {
    strategy: String,
    symbol: String,
    timeframe: TimeFrame,
    from: NaiveDate,
    to: NaiveDate,
    deposit: f64,
    currency: String,
    leverage: u32,
    model: TickModel,
    params: ParamSet,
    timeout: Duration,
}

impl RunSpec {
    /// 以策略与品种为起点构造
    pub fn builder(strategy: impl Into<String>, symbol: impl Into<String>) -> RunSpecBuilder {
        RunSpecBuilder::new(strategy, symbol)
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> TimeFrame {
        self.timeframe
    }

    pub fn from(&self) -> NaiveDate {
        self.from
    }

    pub fn to(&self) -> NaiveDate {
        self.to
    }

    pub fn deposit(&self) -> f64 {
        self.deposit
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn leverage(&self) -> u32 {
        self.leverage
    }

    pub fn model(&self) -> TickModel {
        self.model
    }

    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 策略标识的文件名部分 (去掉目录与扩展名)
    pub fn strategy_stem(&self) -> &str {
        let name = self
            .strategy
            .rsplit(['\\', '/'])
            .next()
            .unwrap_or(&self.strategy);
        name.strip_suffix(".ex5").unwrap_or(name)
    }

    /// 替换参数赋值，其余字段不变
    pub fn with_params(&self, params: ParamSet) -> RunSpec {
        RunSpec {
            params,
            ..self.clone()
        }
    }

    /// 替换日期区间
    pub fn with_range(&self, from: NaiveDate, to: NaiveDate) -> Result<RunSpec, RunError> {
        let spec = RunSpec {
            from,
            to,
            ..self.clone()
        };
        spec.validate()?;
        Ok(spec)
    }

    /// 替换超时
    pub fn with_timeout(&self, timeout: Duration) -> RunSpec {
        RunSpec {
            timeout,
            ..self.clone()
        }
    }

    fn validate(&self) -> Result<(), RunError> {
        if self.strategy.trim().is_empty() {
            return Err(RunError::InvalidSpec("strategy is empty".to_string()));
        }
        if self.symbol.trim().is_empty() {
            return Err(RunError::InvalidSpec("symbol is empty".to_string()));
        }
        if self.from >= self.to {
            return Err(RunError::InvalidSpec(format!(
                "date range is empty: [{}, {})",
                self.from, self.to
            )));
        }
        if !(self.deposit.is_finite() && self.deposit > 0.0) {
            return Err(RunError::InvalidSpec(format!(
                "deposit must be positive, got {}",
                self.deposit
            )));
        }
        if self.leverage == 0 {
            return Err(RunError::InvalidSpec("leverage must be positive".to_string()));
        }
        Ok(())
    }
}

/// # Summary
/// `RunSpec` 构造器。未设置的字段取终端默认值。
#[derive(Debug, Clone)]
pub struct RunSpecBuilder {
    spec: RunSpec,
}

impl RunSpecBuilder {
    fn new(strategy: impl Into<String>, symbol: impl Into<String>) -> Self {
        let epoch = NaiveDate::default();
        Self {
            spec: RunSpec {
                strategy: strategy.into(),
                symbol: symbol.into(),
                timeframe: TimeFrame::H1,
                from: epoch,
                to: epoch,
                deposit: 300.0,
                currency: "USD".to_string(),
                leverage: 200,
                model: TickModel::OhlcM1,
                params: ParamSet::new(),
                timeout: Duration::from_secs(300),
            },
        }
    }

    pub fn timeframe(mut self, timeframe: TimeFrame) -> Self {
        self.spec.timeframe = timeframe;
        self
    }

    pub fn range(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.spec.from = from;
        self.spec.to = to;
        self
    }

    pub fn deposit(mut self, deposit: f64) -> Self {
        self.spec.deposit = deposit;
        self
    }

    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.spec.currency = currency.into();
        self
    }

    pub fn leverage(mut self, leverage: u32) -> Self {
        self.spec.leverage = leverage;
        self
    }

    pub fn model(mut self, model: TickModel) -> Self {
        self.spec.model = model;
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.spec.params.insert(name.into(), value);
        self
    }

    pub fn params(mut self, params: ParamSet) -> Self {
        self.spec.params = params;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.spec.timeout = timeout;
        self
    }

    /// 校验并产出不可变的 `RunSpec`
    pub fn build(self) -> Result<RunSpec, RunError> {
        self.spec.validate()?;
        Ok(self.spec)
    }
}

/// # Summary
/// 从回测报告中提取的绩效指标。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub profit_factor: f64,
    // 最大回撤百分比
    pub drawdown: f64,
    pub net_profit: f64,
    pub trade_count: u32,
    // 胜率百分比
    pub win_rate: f64,
    pub recovery_factor: f64,
    pub sharpe_ratio: f64,
}

/// 回测状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    TimedOut,
    Crashed,
    ConfigError,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Completed => "completed",
            RunStatus::TimedOut => "timed_out",
            RunStatus::Crashed => "crashed",
            RunStatus::ConfigError => "config_error",
        };
        f.write_str(s)
    }
}

/// # Summary
/// 回测结果。只有完成的回测才携带指标。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed(Metrics),
    TimedOut(Failure),
    Crashed(Failure),
    ConfigError(Failure),
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        match self {
            RunOutcome::Completed(_) => RunStatus::Completed,
            RunOutcome::TimedOut(_) => RunStatus::TimedOut,
            RunOutcome::Crashed(_) => RunStatus::Crashed,
            RunOutcome::ConfigError(_) => RunStatus::ConfigError,
        }
    }

    pub fn metrics(&self) -> Option<&Metrics> {
        match self {
            RunOutcome::Completed(m) => Some(m),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            RunOutcome::Completed(_) => None,
            RunOutcome::TimedOut(f) | RunOutcome::Crashed(f) | RunOutcome::ConfigError(f) => {
                Some(f)
            }
        }
    }
}

/// # Summary
/// 一次回测的完整记录。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub outcome: RunOutcome,
    // 回测过程中使用的产物路径，配置阶段之前失败时为空
    pub artifacts: Option<ArtifactPaths>,
    pub elapsed: Duration,
}

impl RunResult {
    pub fn status(&self) -> RunStatus {
        self.outcome.status()
    }

    pub fn metrics(&self) -> Option<&Metrics> {
        self.outcome.metrics()
    }
}
