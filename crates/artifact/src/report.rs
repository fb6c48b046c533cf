use async_trait::async_trait;
use regex::Regex;
use shiken_core::artifact::error::ArtifactError;
use shiken_core::artifact::port::ReportParser;
use shiken_core::run::entity::Metrics;
use std::path::Path;
use tracing::info;

// 数值可能带空格千分位，如 "1 234.56"
const NUMBER: &str = r"(-?[0-9][0-9 ]*(?:\.[0-9]+)?)";

/// # Summary
/// 终端 HTML 回测报告解析器。
///
/// # Invariants
/// - `Total Net Profit` 与 `Total Trades` 为必需字段，缺失即视为报告损坏。
/// - 其余字段缺失时取 0。
pub struct HtmlReportParser {
    net_profit: Regex,
    total_trades: Regex,
    profit_factor: Regex,
    recovery_factor: Regex,
    sharpe_ratio: Regex,
    drawdown: Regex,
    win_rate: Regex,
}

impl HtmlReportParser {
    pub fn new() -> Result<Self, ArtifactError> {
        Ok(Self {
            net_profit: field("Total Net Profit")?,
            total_trades: field("Total Trades")?,
            profit_factor: field("Profit Factor")?,
            recovery_factor: field("Recovery Factor")?,
            sharpe_ratio: field("Sharpe Ratio")?,
            drawdown: compile(
                r"(?i)(?:Maximal\s+drawdown|Drawdown\s+Maximal)[^%\n]*?([0-9]+(?:\.[0-9]+)?)%",
            )?,
            win_rate: compile(r"(?i)Profit Trades.*?[0-9]+\s*\(([0-9.]+)%\)")?,
        })
    }

    /// # Summary
    /// 从报告文本中提取指标。
    ///
    /// # Returns
    /// 必需字段缺失时返回 `ArtifactError::Parse`。
    pub fn parse_html(&self, html: &str) -> Result<Metrics, ArtifactError> {
        let net_profit = capture_f64(&self.net_profit, html)
            .ok_or_else(|| ArtifactError::Parse("missing Total Net Profit".to_string()))?;
        let trade_count = capture(&self.total_trades, html)
            .and_then(|raw| raw.parse::<u32>().ok())
            .ok_or_else(|| ArtifactError::Parse("missing Total Trades".to_string()))?;

        Ok(Metrics {
            profit_factor: capture_f64(&self.profit_factor, html).unwrap_or(0.0),
            drawdown: capture_f64(&self.drawdown, html).unwrap_or(0.0),
            net_profit,
            trade_count,
            win_rate: capture_f64(&self.win_rate, html).unwrap_or(0.0),
            recovery_factor: capture_f64(&self.recovery_factor, html).unwrap_or(0.0),
            sharpe_ratio: capture_f64(&self.sharpe_ratio, html).unwrap_or(0.0),
        })
    }
}

#[async_trait]
impl ReportParser for HtmlReportParser {
    async fn parse_report(&self, path: &Path) -> Result<Metrics, ArtifactError> {
        let bytes = tokio::fs::read(path).await?;
        let metrics = self.parse_html(&decode(&bytes))?;
        info!(
            report = %path.display(),
            pf = metrics.profit_factor,
            dd = metrics.drawdown,
            trades = metrics.trade_count,
            "Report parsed"
        );
        Ok(metrics)
    }
}

fn compile(pattern: &str) -> Result<Regex, ArtifactError> {
    Regex::new(pattern).map_err(|e| ArtifactError::Parse(format!("bad pattern: {}", e)))
}

/// 标签后跟若干 HTML 标签再跟数值
fn field(label: &str) -> Result<Regex, ArtifactError> {
    compile(&format!(
        r"(?i){}\s*:?\s*(?:</?[^>]*>\s*)*{}",
        regex::escape(label),
        NUMBER
    ))
}

/// 取第一个捕获组并去掉千分位空格
fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().chars().filter(|c| !c.is_whitespace()).collect())
}

fn capture_f64(re: &Regex, text: &str) -> Option<f64> {
    capture(re, text).and_then(|raw| raw.parse::<f64>().ok())
}

/// 终端以 UTF-16LE (带 BOM) 写出报告，其余情况按 UTF-8 宽松解码
fn decode(bytes: &[u8]) -> String {
    match bytes {
        [0xFF, 0xFE, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest).into_owned(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}
