//! 连接注册表
//!
//! 维护 用户 → 当前唯一在线连接 的映射，并把事件路由给该连接。
//! 每个连接对应一个有界的发送队列，真正的网络写入由连接自己的写任务完成，
//! 注册表只负责把事件放进队列。

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use domain::UserId;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::broadcaster::{ChatEvent, DeliveryOutcome, MessageBroadcaster};

/// 连接的发送端。写任务持有对应的接收端。
pub type OutboundSender = mpsc::Sender<ChatEvent>;

/// 一次注册的代次。注销时必须携带它，旧连接的注销不会误删新连接。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionGeneration(u64);

impl fmt::Display for ConnectionGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct HubSettings {
    /// 每个连接发送队列的容量
    pub outbound_buffer: usize,
    /// 发送队列已满时最多等待多久，超时即丢弃事件
    pub delivery_timeout: Duration,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            outbound_buffer: 64,
            delivery_timeout: Duration::from_millis(500),
        }
    }
}

struct Registration {
    generation: ConnectionGeneration,
    sender: OutboundSender,
}

/// 内存中的连接注册表
pub struct ConnectionHub {
    clients: RwLock<HashMap<UserId, Registration>>,
    next_generation: AtomicU64,
    settings: HubSettings,
}

impl ConnectionHub {
    pub fn new(settings: HubSettings) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            settings,
        }
    }

    /// 为新连接创建发送队列。
    pub fn outbound_channel(&self) -> (OutboundSender, mpsc::Receiver<ChatEvent>) {
        mpsc::channel(self.settings.outbound_buffer.max(1))
    }

    /// 注册用户的当前连接，替换之前的连接（后注册者生效）。
    ///
    /// 被替换的连接不会被注册表主动关闭，但注册表不再持有它的发送端，
    /// 它的写任务会在队列排空后收到 `None` 并自行退出。
    pub async fn register(&self, user_id: UserId, sender: OutboundSender) -> ConnectionGeneration {
        let generation =
            ConnectionGeneration(self.next_generation.fetch_add(1, Ordering::Relaxed));

        let previous = {
            let mut clients = self.clients.write().await;
            clients.insert(user_id, Registration { generation, sender })
        };

        match previous {
            Some(old) => info!(
                user_id = %user_id,
                generation = %generation,
                superseded = %old.generation,
                "connection superseded"
            ),
            None => info!(user_id = %user_id, generation = %generation, "connection registered"),
        }

        generation
    }

    /// 注销连接。只有当映射仍然指向同一代次时才会移除，否则什么都不做。
    pub async fn unregister(&self, user_id: UserId, generation: ConnectionGeneration) -> bool {
        let removed = {
            let mut clients = self.clients.write().await;
            match clients.get(&user_id) {
                Some(current) if current.generation == generation => {
                    clients.remove(&user_id);
                    true
                }
                _ => false,
            }
        };

        if removed {
            info!(user_id = %user_id, generation = %generation, "connection unregistered");
        } else {
            debug!(
                user_id = %user_id,
                generation = %generation,
                "stale unregister ignored"
            );
        }
        removed
    }

    /// 把事件推送给用户的当前连接。
    ///
    /// 查表时持有读锁，拿到发送端后立即释放，再写入队列；
    /// 慢消费者只会拖慢发给它自己的事件。
    pub async fn broadcast_to_user(&self, user_id: UserId, event: ChatEvent) -> DeliveryOutcome {
        let target = {
            let clients = self.clients.read().await;
            clients
                .get(&user_id)
                .map(|registration| (registration.generation, registration.sender.clone()))
        };

        let Some((generation, sender)) = target else {
            debug!(user_id = %user_id, "recipient offline, event dropped");
            return DeliveryOutcome::Offline;
        };

        match sender
            .send_timeout(event, self.settings.delivery_timeout)
            .await
        {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                warn!(
                    user_id = %user_id,
                    generation = %generation,
                    timeout_ms = self.settings.delivery_timeout.as_millis() as u64,
                    "outbound queue full, event dropped"
                );
                DeliveryOutcome::Dropped
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                debug!(
                    user_id = %user_id,
                    generation = %generation,
                    "connection already closed, event dropped"
                );
                DeliveryOutcome::Dropped
            }
        }
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.clients.read().await.contains_key(&user_id)
    }

    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new(HubSettings::default())
    }
}

#[async_trait]
impl MessageBroadcaster for ConnectionHub {
    async fn broadcast_to_user(&self, user_id: UserId, event: ChatEvent) -> DeliveryOutcome {
        ConnectionHub::broadcast_to_user(self, user_id, event).await
    }
}
