//! 节点注册表
//!
//! 所有读写都在同一把锁内完成，锁只在单次 map 操作期间持有，从不跨越总线 IO。
//! 对外只返回副本（`Node: Clone`、`Arc<Telemetry>`），调用者无法观察到之后的修改。
//!
//! 状态机：
//!
//! ```text
//! Discovered --(联系)--> Active --(ttl)--> Stale --(expiry)--> Expired（移除）
//!                          ^                 |
//!                          +----(再次联系)----+
//! ```

use crate::telemetry::Telemetry;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vesc_protocol::{NODE_ID_MAX, NODE_ID_MIN, StatusMessage};

/// 节点活跃状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// 已知 ID，但尚未收到其任何帧
    Discovered,
    Active,
    /// 超过 ttl 未联系
    Stale,
    /// 终态，节点随即从表中移除
    Expired,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Discovered => "discovered",
            NodeState::Active => "active",
            NodeState::Stale => "stale",
            NodeState::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// 节点类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NodeKind {
    #[default]
    Controller,
    /// 发送主机心跳（STATUS_5 reserved = 0x5250）的其他主机
    Host,
}

/// 主机节点 ID 段（由 MAC 推导的本机 ID 落在此范围）
fn is_host_range(node_id: u8) -> bool {
    (NODE_ID_MIN..=NODE_ID_MAX).contains(&node_id)
}

/// 一条状态帧历史记录
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusRecord {
    pub received_at: Instant,
    pub status: StatusMessage,
}

/// 节点快照
#[derive(Debug, Clone)]
pub struct Node {
    pub node_id: u8,
    pub state: NodeState,
    pub kind: NodeKind,
    pub first_seen: Instant,
    pub last_seen: Instant,
    pub telemetry: Option<Arc<Telemetry>>,
    /// 最近的状态帧，旧的在前
    pub history: VecDeque<StatusRecord>,
    /// 该节点累计联系次数
    pub messages: u64,
}

impl Node {
    fn new(node_id: u8, state: NodeState, now: Instant) -> Self {
        Self {
            node_id,
            state,
            kind: NodeKind::Controller,
            first_seen: now,
            last_seen: now,
            telemetry: None,
            history: VecDeque::new(),
            messages: 0,
        }
    }
}

/// `record_contact` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactOutcome {
    /// 新节点
    Inserted,
    /// 已在 Active / Discovered
    Refreshed,
    /// 从 Stale 恢复为 Active
    Revived,
    /// 源 ID 等于本机 ID，未记录
    LocalId,
}

/// 一次 sweep 的状态变化
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub went_stale: Vec<u8>,
    pub expired: Vec<u8>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.went_stale.is_empty() && self.expired.is_empty()
    }
}

/// 聚合统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub node_count: usize,
    pub active_count: usize,
    /// 累计记录的联系次数
    pub messages_seen: u64,
}

struct Inner {
    nodes: BTreeMap<u8, Node>,
    messages_seen: u64,
}

/// 节点注册表
pub struct NodeRegistry {
    local_id: u8,
    expiry_ttl: Duration,
    history_len: usize,
    inner: Mutex<Inner>,
}

impl NodeRegistry {
    /// - `local_id`: 本机 ID，永远不会进入表中
    /// - `expiry_ttl`: Stale 之后到过期的额外时长
    /// - `history_len`: 每个节点保留的状态帧条数
    pub fn new(local_id: u8, expiry_ttl: Duration, history_len: usize) -> Self {
        Self {
            local_id,
            expiry_ttl,
            history_len,
            inner: Mutex::new(Inner {
                nodes: BTreeMap::new(),
                messages_seen: 0,
            }),
        }
    }

    pub fn local_id(&self) -> u8 {
        self.local_id
    }

    /// 记录一次联系，节点置为 Active
    ///
    /// 携带状态帧时在旧快照基础上生成新快照并整体替换。
    pub fn record_contact(
        &self,
        node_id: u8,
        status: Option<&StatusMessage>,
        now: Instant,
    ) -> ContactOutcome {
        if node_id == self.local_id {
            return ContactOutcome::LocalId;
        }

        let mut inner = self.inner.lock();
        inner.messages_seen += 1;

        let mut outcome = ContactOutcome::Refreshed;
        let node = inner.nodes.entry(node_id).or_insert_with(|| {
            outcome = ContactOutcome::Inserted;
            let mut node = Node::new(node_id, NodeState::Active, now);
            // 主机 ID 段内只回了 PONG 的节点按主机处理，直到它发出控制器状态帧
            if status.is_none() && is_host_range(node_id) {
                node.kind = NodeKind::Host;
            }
            node
        });

        if node.state == NodeState::Stale {
            outcome = ContactOutcome::Revived;
        }
        node.state = NodeState::Active;
        node.last_seen = now;
        node.messages += 1;

        if let Some(status) = status {
            node.kind = match status {
                StatusMessage::Status5(s) if s.is_host_heartbeat() => NodeKind::Host,
                _ => NodeKind::Controller,
            };

            let next = match &node.telemetry {
                Some(prev) => prev.merged(status, now),
                None => Telemetry::empty(now).merged(status, now),
            };
            node.telemetry = Some(Arc::new(next));

            if self.history_len > 0 {
                if node.history.len() >= self.history_len {
                    node.history.pop_front();
                }
                node.history.push_back(StatusRecord {
                    received_at: now,
                    status: *status,
                });
            }
        }

        outcome
    }

    /// 登记一个尚未联系上的节点（Discovered）；已存在的节点不变
    ///
    /// 返回是否新插入。
    pub fn note_seen(&self, node_id: u8, now: Instant) -> bool {
        if node_id == self.local_id {
            return false;
        }
        let mut inner = self.inner.lock();
        if inner.nodes.contains_key(&node_id) {
            return false;
        }
        inner.nodes.insert(node_id, Node::new(node_id, NodeState::Discovered, now));
        true
    }

    /// 推进所有节点的状态机
    ///
    /// `now - last_seen > ttl` 的 Active / Discovered 节点转为 Stale；
    /// `now - last_seen > ttl + expiry_ttl` 的 Stale 节点过期并移除。
    /// 这是唯一移除节点的地方。
    pub fn sweep(&self, now: Instant, ttl: Duration) -> SweepReport {
        let mut report = SweepReport::default();
        let expire_after = ttl.saturating_add(self.expiry_ttl);

        let mut inner = self.inner.lock();
        for node in inner.nodes.values_mut() {
            let silent = now.saturating_duration_since(node.last_seen);
            if matches!(node.state, NodeState::Active | NodeState::Discovered) && silent > ttl {
                node.state = NodeState::Stale;
                report.went_stale.push(node.node_id);
            }
            if node.state == NodeState::Stale && silent > expire_after {
                node.state = NodeState::Expired;
                report.expired.push(node.node_id);
            }
        }
        inner.nodes.retain(|_, node| node.state != NodeState::Expired);

        report
    }

    /// Active 节点的副本
    pub fn active_nodes(&self) -> HashMap<u8, Node> {
        self.inner
            .lock()
            .nodes
            .values()
            .filter(|node| node.state == NodeState::Active)
            .map(|node| (node.node_id, node.clone()))
            .collect()
    }

    /// 所有节点的副本，按 ID 排序
    pub fn nodes(&self) -> Vec<Node> {
        self.inner.lock().nodes.values().cloned().collect()
    }

    pub fn node(&self, node_id: u8) -> Option<Node> {
        self.inner.lock().nodes.get(&node_id).cloned()
    }

    /// 各节点状态，按 ID 排序
    pub fn node_states(&self) -> BTreeMap<u8, NodeState> {
        self.inner
            .lock()
            .nodes
            .iter()
            .map(|(id, node)| (*id, node.state))
            .collect()
    }

    /// Active 且为控制器的节点 ID，升序
    pub fn controller_ids(&self) -> Vec<u8> {
        self.inner
            .lock()
            .nodes
            .values()
            .filter(|node| node.state == NodeState::Active && node.kind == NodeKind::Controller)
            .map(|node| node.node_id)
            .collect()
    }

    pub fn telemetry(&self, node_id: u8) -> Option<Arc<Telemetry>> {
        self.inner.lock().nodes.get(&node_id).and_then(|node| node.telemetry.clone())
    }

    /// 所有有遥测数据的节点
    pub fn all_telemetry(&self) -> HashMap<u8, Arc<Telemetry>> {
        self.inner
            .lock()
            .nodes
            .iter()
            .filter_map(|(id, node)| node.telemetry.clone().map(|t| (*id, t)))
            .collect()
    }

    /// 最近 `count` 条状态帧，旧的在前
    pub fn status_history(&self, node_id: u8, count: usize) -> Vec<StatusRecord> {
        let inner = self.inner.lock();
        let Some(node) = inner.nodes.get(&node_id) else {
            return Vec::new();
        };
        let skip = node.history.len().saturating_sub(count);
        node.history.iter().skip(skip).copied().collect()
    }

    /// 清空遥测缓存和历史，节点本身保留
    pub fn clear_telemetry(&self) {
        let mut inner = self.inner.lock();
        for node in inner.nodes.values_mut() {
            node.telemetry = None;
            node.history.clear();
        }
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.lock();
        RegistryStats {
            node_count: inner.nodes.len(),
            active_count: inner
                .nodes
                .values()
                .filter(|node| node.state == NodeState::Active)
                .count(),
            messages_seen: inner.messages_seen,
        }
    }
}
