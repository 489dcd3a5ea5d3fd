//! # VESC CLI
//!
//! Command-line interface for VESC motor controllers on a CAN bus.
//!
//! ```bash
//! # 配置默认接口
//! vesc-cli config set --channel can0
//!
//! # 扫描总线
//! vesc-cli scan
//!
//! # 以 20% 占空比运行 2 秒后停止
//! vesc-cli duty 0.2 --target 12 --hold-ms 2000
//!
//! # 不接硬件：在虚拟总线上挂 3 台模拟控制器
//! vesc-cli --virtual 3 monitor
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod safety;
mod session;
mod validation;

use commands::{
    BrakeCommand, ConfigCommand, CurrentCommand, DutyCommand, MonitorCommand, ScanCommand,
    StatusCommand, StopCommand,
};
use session::{ConnectArgs, Session};

/// VESC CLI - 电机控制器命令行工具
#[derive(Parser, Debug)]
#[command(name = "vesc-cli")]
#[command(about = "Command-line interface for VESC motor controllers over CAN", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    conn: ConnectArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 扫描总线上的控制器
    Scan {
        #[command(flatten)]
        args: ScanCommand,
    },

    /// 持续显示遥测数据
    Monitor {
        #[command(flatten)]
        args: MonitorCommand,
    },

    /// 显示单台控制器状态
    Status {
        #[command(flatten)]
        args: StatusCommand,
    },

    /// 设置占空比
    Duty {
        #[command(flatten)]
        args: DutyCommand,
    },

    /// 设置电机电流
    Current {
        #[command(flatten)]
        args: CurrentCommand,
    },

    /// 设置刹车电流
    Brake {
        #[command(flatten)]
        args: BrakeCommand,
    },

    /// 停止电机
    Stop {
        #[command(flatten)]
        args: StopCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vesc_cli=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Config(cmd) = cli.command {
        // 配置管理不需要连接总线
        return cmd.execute(cli.conn.config.as_deref()).await;
    }

    let session = Session::open(&cli.conn).await?;
    let result = match cli.command {
        Commands::Scan { args } => args.execute(&session).await,
        Commands::Monitor { args } => args.execute(&session).await,
        Commands::Status { args } => args.execute(&session).await,
        Commands::Duty { args } => args.execute(&session).await,
        Commands::Current { args } => args.execute(&session).await,
        Commands::Brake { args } => args.execute(&session).await,
        Commands::Stop { args } => args.execute(&session).await,
        Commands::Config(_) => Ok(()),
    };
    session.close();
    result
}
