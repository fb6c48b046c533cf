//! # shiken-optimizer
//!
//! 参数扫描优化器与前推 (walk-forward) 验证器。两者都只依赖 `BacktestRunner` 端口，
//! 顺序执行回测，单个回测失败只会使该候选无得分，不会中断整个研究。

pub mod sweep;
pub mod walk_forward;

pub use sweep::{SweepOptimizer, expand, rank};
pub use walk_forward::{WalkForwardPlan, WalkForwardValidator, partition};
