//! # shiken-process
//!
//! 外部终端进程托管：生命周期状态机、独占闸门、看门狗循环，以及操作系统启动器。

pub mod launcher;
pub mod supervisor;

pub use launcher::SystemLauncher;
pub use supervisor::{SupervisorSettings, TerminalSupervisor};
