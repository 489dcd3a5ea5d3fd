//! 本机节点 ID 分配
//!
//! 未配置时由第一块非回环网卡的 MAC 推导：
//! `64 + u32_be(sha256(mac)[0..4]) % 64`，落在主机 ID 段 64..=127。
//! 同一台机器每次启动得到相同 ID；读不到 MAC 时随机取值。

use crate::DriverError;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};
use vesc_protocol::{BROADCAST_NODE_ID, NODE_ID_MAX, NODE_ID_MIN};

const SYS_CLASS_NET: &str = "/sys/class/net";

/// 主机 ID 段大小
const HOST_ID_SPAN: u32 = (NODE_ID_MAX - NODE_ID_MIN) as u32 + 1;

/// 确定本机节点 ID
///
/// 显式配置优先；255 为广播地址，拒绝。
pub fn resolve_local_id(configured: Option<u8>) -> Result<u8, DriverError> {
    match configured {
        Some(BROADCAST_NODE_ID) => Err(DriverError::InvalidArgument(format!(
            "node id {} is reserved for broadcast",
            BROADCAST_NODE_ID
        ))),
        Some(id) => Ok(id),
        None => match primary_mac_address(Path::new(SYS_CLASS_NET)) {
            Some(mac) => {
                let id = node_id_from_mac(&mac);
                debug!("local node id {} derived from MAC {}", id, mac);
                Ok(id)
            },
            None => {
                let id = random_node_id();
                warn!("no MAC address readable, using random local node id {}", id);
                Ok(id)
            },
        },
    }
}

/// MAC 字符串哈希到主机 ID 段
pub fn node_id_from_mac(mac: &str) -> u8 {
    let digest = Sha256::digest(mac.trim().to_ascii_lowercase().as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    NODE_ID_MIN + (head % HOST_ID_SPAN) as u8
}

pub fn random_node_id() -> u8 {
    rand::thread_rng().gen_range(NODE_ID_MIN..=NODE_ID_MAX)
}

/// 按接口名排序后第一块非回环、非全零 MAC
fn primary_mac_address(net_dir: &Path) -> Option<String> {
    let mut interfaces: Vec<_> = fs::read_dir(net_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    interfaces.sort();

    interfaces.into_iter().find_map(|path| {
        if path.file_name().is_some_and(|name| name == "lo") {
            return None;
        }
        let mac = fs::read_to_string(path.join("address")).ok()?;
        let mac = mac.trim();
        let is_ethernet = mac.len() == 17 && mac != "00:00:00:00:00:00";
        is_ethernet.then(|| mac.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_id_wins() {
        assert_eq!(resolve_local_id(Some(42)).unwrap(), 42);
        assert_eq!(resolve_local_id(Some(0)).unwrap(), 0);
    }

    #[test]
    fn test_broadcast_id_rejected() {
        assert!(matches!(
            resolve_local_id(Some(255)),
            Err(DriverError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_derived_id_in_host_range() {
        let id = resolve_local_id(None).unwrap();
        assert!((NODE_ID_MIN..=NODE_ID_MAX).contains(&id));
    }

    #[test]
    fn test_mac_hash_is_stable() {
        let a = node_id_from_mac("b8:27:eb:12:34:56");
        let b = node_id_from_mac("B8:27:EB:12:34:56\n");
        assert_eq!(a, b);
        assert!((NODE_ID_MIN..=NODE_ID_MAX).contains(&a));
    }

    #[test]
    fn test_random_id_in_range() {
        for _ in 0..100 {
            let id = random_node_id();
            assert!((NODE_ID_MIN..=NODE_ID_MAX).contains(&id));
        }
    }

    #[test]
    fn test_missing_net_dir() {
        assert_eq!(primary_mac_address(Path::new("/nonexistent/net")), None);
    }
}
