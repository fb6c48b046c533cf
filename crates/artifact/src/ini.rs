use shiken_core::run::entity::RunSpec;

/// # Summary
/// 渲染终端的测试配置。
///
/// # Logic
/// 1. `[Tester]` 段：策略、品种、周期、日期、资金与报告目标。
/// 2. 终端的 `ToDate` 是闭区间，写入 `to` 的前一天。
/// 3. `[TesterInputs]` 段：按参数名顺序写出参数赋值。
///
/// # Arguments
/// * `spec` - 回测规格。
/// * `report` - 终端写出报告的路径 (相对数据目录)。
pub fn render_tester_ini(spec: &RunSpec, report: &str) -> String {
    let last_day = spec.to().pred_opt().unwrap_or(spec.to());
    let mut out = String::new();
    let lines = [
        "[Tester]".to_string(),
        format!("Expert={}", spec.strategy()),
        format!("Symbol={}", spec.symbol()),
        format!("Period={}", spec.timeframe()),
        format!("Model={}", spec.model().code()),
        "Optimization=0".to_string(),
        "ForwardMode=0".to_string(),
        format!("FromDate={}", spec.from().format("%Y.%m.%d")),
        format!("ToDate={}", last_day.format("%Y.%m.%d")),
        format!("Deposit={}", spec.deposit()),
        format!("Currency={}", spec.currency()),
        format!("Leverage={}", spec.leverage()),
        "ExecutionMode=0".to_string(),
        format!("Report={}", report),
        "ReplaceReport=0".to_string(),
        format!("SheetName={}", spec.strategy_stem()),
        // 测试结束后终端自行退出
        "ShutdownTerminal=1".to_string(),
    ];
    for line in lines {
        out.push_str(&line);
        out.push('\n');
    }

    if !spec.params().is_empty() {
        out.push_str("\n[TesterInputs]\n");
        for (name, value) in spec.params() {
            out.push_str(&format!("{}={}\n", name, value));
        }
    }
    out
}
