use shiken_artifact::HtmlReportParser;
use shiken_core::artifact::error::ArtifactError;
use shiken_core::artifact::port::ReportParser;

const REPORT: &str = r#"<html><body><table>
<tr><td>Total Net Profit:</td><td><b>1 523.40</b></td><td>Balance Drawdown Absolute:</td><td><b>12.00</b></td></tr>
<tr><td>Profit Factor:</td><td><b>1.85</b></td><td>Recovery Factor:</td><td><b>3.21</b></td></tr>
<tr><td>Sharpe Ratio:</td><td><b>1.42</b></td></tr>
<tr><td>Balance Drawdown Maximal:</td><td><b>474.60 (11.25%)</b></td></tr>
<tr><td>Total Trades:</td><td><b>128</b></td></tr>
<tr><td>Profit Trades (% of total):</td><td><b>74 (57.81%)</b></td></tr>
</table></body></html>"#;

#[tokio::test]
async fn test_parse_report_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("Grid.htm");
    tokio::fs::write(&path, REPORT).await?;

    let parser = HtmlReportParser::new()?;
    let metrics = parser.parse_report(&path).await?;

    assert_eq!(metrics.net_profit, 1523.4);
    assert_eq!(metrics.profit_factor, 1.85);
    assert_eq!(metrics.recovery_factor, 3.21);
    assert_eq!(metrics.sharpe_ratio, 1.42);
    assert_eq!(metrics.drawdown, 11.25);
    assert_eq!(metrics.trade_count, 128);
    assert_eq!(metrics.win_rate, 57.81);
    Ok(())
}

#[tokio::test]
async fn test_parse_utf16_report() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("Grid16.htm");
    let mut bytes = vec![0xFF, 0xFE];
    for unit in REPORT.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    tokio::fs::write(&path, bytes).await?;

    let metrics = HtmlReportParser::new()?.parse_report(&path).await?;
    assert_eq!(metrics.trade_count, 128);
    assert_eq!(metrics.profit_factor, 1.85);
    Ok(())
}

#[test]
fn test_optional_fields_default_to_zero() {
    let parser = HtmlReportParser::new().unwrap();
    let metrics = parser
        .parse_html("<td>Total Net Profit:</td><td>0.00</td><td>Total Trades:</td><td>0</td>")
        .unwrap();
    assert_eq!(metrics.trade_count, 0);
    assert_eq!(metrics.profit_factor, 0.0);
    assert_eq!(metrics.sharpe_ratio, 0.0);
}

#[test]
fn test_missing_required_field_is_parse_error() {
    let parser = HtmlReportParser::new().unwrap();
    let err = parser.parse_html("<html>Tester stopped</html>").unwrap_err();
    assert!(matches!(err, ArtifactError::Parse(_)));
}

#[tokio::test]
async fn test_missing_file_is_io_error() {
    let parser = HtmlReportParser::new().unwrap();
    let err = parser
        .parse_report(std::path::Path::new("/nonexistent/shiken/report.htm"))
        .await
        .unwrap_err();
    assert!(matches!(err, ArtifactError::Io(_)));
}
