//! 命令定义和实现

pub mod config;
pub mod control;
pub mod monitor;
pub mod scan;
pub mod status;

pub use config::ConfigCommand;
pub use control::{BrakeCommand, CurrentCommand, DutyCommand, StopCommand};
pub use monitor::MonitorCommand;
pub use scan::ScanCommand;
pub use status::StatusCommand;
