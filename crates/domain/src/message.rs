use serde::{Deserialize, Serialize};

use crate::conversation::ChatRole;
use crate::errors::DomainError;
use crate::value_objects::{ConversationId, MessageContent, MessageId, Timestamp, UserId};

/// 消息类型标签。目前只有文本消息。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "text" => Ok(MessageType::Text),
            other => Err(DomainError::invalid_argument(
                "message_type",
                format!("unknown message type `{other}`"),
            )),
        }
    }
}

/// 已持久化的聊天消息。创建之后不再修改或删除。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub message_type: MessageType,
    pub is_read: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: Timestamp,
}

/// 待追加的消息。
///
/// `unread_side` 是接收方所在的一侧，追加时该侧的未读计数加一。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub message_type: MessageType,
    pub unread_side: ChatRole,
    pub created_at: Timestamp,
}

impl NewMessage {
    pub fn text(
        conversation_id: ConversationId,
        sender_id: UserId,
        content: MessageContent,
        unread_side: ChatRole,
        created_at: Timestamp,
    ) -> Self {
        Self {
            conversation_id,
            sender_id,
            content,
            message_type: MessageType::Text,
            unread_side,
            created_at,
        }
    }

    /// 由存储层分配 id 后生成最终消息。
    pub fn into_message(self, id: MessageId) -> Message {
        Message {
            id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            content: self.content,
            message_type: self.message_type,
            is_read: false,
            created_at: self.created_at,
        }
    }
}
