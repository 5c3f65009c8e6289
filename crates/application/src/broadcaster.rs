use async_trait::async_trait;
use domain::{ConversationId, Message, UserId};
use serde::{Deserialize, Serialize};

/// 通过长连接推送给客户端的事件。
///
/// 序列化格式：`{"type": "new_message", "conversation_id": 1, "message": {...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    NewMessage {
        conversation_id: ConversationId,
        message: Message,
    },
}

impl ChatEvent {
    pub fn new_message(conversation_id: ConversationId, message: Message) -> Self {
        Self::NewMessage {
            conversation_id,
            message,
        }
    }
}

/// 单次推送的结果。推送是尽力而为的，结果只用于日志和测试，从不作为错误返回。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 已写入接收方当前连接的发送队列
    Delivered,
    /// 接收方没有在线连接
    Offline,
    /// 连接已关闭或在写超时内未能写入，事件被丢弃
    Dropped,
}

#[async_trait]
pub trait MessageBroadcaster: Send + Sync {
    async fn broadcast_to_user(&self, user_id: UserId, event: ChatEvent) -> DeliveryOutcome;
}
