//! # shiken-runner
//!
//! 单次回测执行器：独占终端、写出配置、headless 启动并在时限内轮询报告。

pub mod runner;

pub use runner::{RunnerSettings, TerminalRunner};
