//! 配置管理命令
//!
//! CLI 的默认服务配置保存在 `<config_dir>/vesc/config.toml`，格式即 `ServiceConfig`。

use anyhow::{Context, Result, anyhow, bail};
use clap::Subcommand;
use std::fs;
use std::path::{Path, PathBuf};
use vesc_sdk::driver::ServiceConfig;

/// 默认配置文件路径
fn default_config_file() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| anyhow!("无法确定配置目录"))?;
    path.push("vesc");
    path.push("config.toml");
    Ok(path)
}

fn config_file(custom: Option<&Path>) -> Result<PathBuf> {
    match custom {
        Some(path) => Ok(path.to_path_buf()),
        None => default_config_file(),
    }
}

/// 加载配置；文件不存在时返回默认值
pub fn load_config(custom: Option<&Path>) -> Result<ServiceConfig> {
    let path = config_file(custom)?;
    if !path.exists() {
        return Ok(ServiceConfig::default());
    }
    ServiceConfig::load_from_file(&path)
        .with_context(|| format!("读取配置文件失败: {}", path.display()))
}

fn save_config(config: &ServiceConfig, custom: Option<&Path>) -> Result<PathBuf> {
    let path = config_file(custom)?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).context("创建配置目录失败")?;
    }
    config
        .save_to_file(&path)
        .with_context(|| format!("写入配置文件失败: {}", path.display()))?;
    Ok(path)
}

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 设置配置项
    Set {
        /// CAN 接口名称（如 can0）
        #[arg(long)]
        channel: Option<String>,

        /// 本机节点 ID（0..=254）
        #[arg(long)]
        node_id: Option<u8>,

        /// 清除本机节点 ID，改为由 MAC 推导
        #[arg(long, conflicts_with = "node_id")]
        auto_node_id: bool,

        /// 广播发现周期（毫秒）
        #[arg(long)]
        discovery_interval_ms: Option<u64>,

        /// 是否发送主机心跳
        #[arg(long)]
        heartbeat: Option<bool>,

        /// 节点判定为 Stale 的超时（毫秒）
        #[arg(long)]
        node_ttl_ms: Option<u64>,
    },

    /// 获取配置项
    Get {
        /// 配置项名称
        #[arg(default_value = "all")]
        key: String,
    },

    /// 检查配置
    Check,
}

impl ConfigCommand {
    pub async fn execute(self, path: Option<&Path>) -> Result<()> {
        match self {
            ConfigCommand::Set {
                channel,
                node_id,
                auto_node_id,
                discovery_interval_ms,
                heartbeat,
                node_ttl_ms,
            } => {
                let mut config = load_config(path)?;

                if let Some(channel) = channel {
                    println!("✅ 设置默认接口: {}", channel);
                    config.channel = channel;
                }
                if let Some(id) = node_id {
                    config.node_id = Some(id);
                    println!("✅ 设置本机节点 ID: {}", id);
                }
                if auto_node_id {
                    config.node_id = None;
                    println!("✅ 本机节点 ID 改为自动推导");
                }
                if let Some(ms) = discovery_interval_ms {
                    config.discovery_interval_ms = ms;
                    println!("✅ 设置发现周期: {} ms", ms);
                }
                if let Some(enabled) = heartbeat {
                    config.heartbeat_enabled = enabled;
                    println!("✅ 主机心跳: {}", if enabled { "开启" } else { "关闭" });
                }
                if let Some(ms) = node_ttl_ms {
                    config.node_ttl_ms = ms;
                    println!("✅ 设置节点超时: {} ms", ms);
                }

                config.validate()?;
                let saved = save_config(&config, path)?;
                println!("已保存到 {}", saved.display());
                Ok(())
            },

            ConfigCommand::Get { key } => {
                let config = load_config(path)?;
                println!("{}", get_value(&config, &key)?);
                Ok(())
            },

            ConfigCommand::Check => {
                let file = config_file(path)?;
                println!("配置文件: {}", file.display());
                if !file.exists() {
                    println!("  (文件不存在，使用默认配置)");
                }

                let config = load_config(path)?;
                config.validate()?;
                println!("{}", get_value(&config, "all")?);
                check_interface(&config.channel);
                println!("✅ 配置有效");
                Ok(())
            },
        }
    }
}

/// 读取单个配置项的显示文本
fn get_value(config: &ServiceConfig, key: &str) -> Result<String> {
    let value = match key {
        "channel" => config.channel.clone(),
        "node_id" => match config.node_id {
            Some(id) => id.to_string(),
            None => "(自动)".to_string(),
        },
        "discovery_interval_ms" => config.discovery_interval_ms.to_string(),
        "heartbeat" => config.heartbeat_enabled.to_string(),
        "node_ttl_ms" => config.node_ttl_ms.to_string(),
        "all" => {
            let mut out = String::from("VESC CLI 配置:\n");
            out.push_str(&config.to_toml_string()?);
            out.trim_end().to_string()
        },
        other => bail!("未知配置项: {}", other),
    };
    Ok(value)
}

#[cfg(target_os = "linux")]
fn check_interface(channel: &str) {
    match vesc_sdk::can::socketcan::check_interface_status(channel) {
        Ok(true) => println!("  接口 {}: UP", channel),
        Ok(false) => println!("  ⚠️ 接口 {}: DOWN", channel),
        Err(e) => println!("  ⚠️ 接口 {}: {}", channel, e),
    }
}

#[cfg(not(target_os = "linux"))]
fn check_interface(channel: &str) {
    println!("  接口 {}: 当前平台不支持 SocketCAN", channel);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_value() {
        let config = ServiceConfig {
            node_id: Some(90),
            ..ServiceConfig::for_channel("vcan0")
        };
        assert_eq!(get_value(&config, "channel").unwrap(), "vcan0");
        assert_eq!(get_value(&config, "node_id").unwrap(), "90");
        assert_eq!(get_value(&ServiceConfig::default(), "node_id").unwrap(), "(自动)");
        assert!(get_value(&config, "all").unwrap().contains("channel = \"vcan0\""));
        assert!(get_value(&config, "bogus").is_err());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert_eq!(load_config(Some(&path)).unwrap(), ServiceConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = ServiceConfig {
            heartbeat_enabled: false,
            ..ServiceConfig::for_channel("can1")
        };
        save_config(&config, Some(&path)).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap(), config);
    }
}
