//! 客户与经销商之间的会话。

use serde::{Deserialize, Serialize};

use crate::dealer::Car;
use crate::message::Message;
use crate::value_objects::{CarId, ConversationId, DealerId, MessageId, Timestamp, UserId};

/// 会话中的一方。
///
/// 未读计数按一方分别维护：`Customer` 对应客户侧计数，`Dealer` 对应经销商侧计数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    Customer,
    Dealer,
}

impl ChatRole {
    /// 按令牌中的角色声明解析。只有 `dealer` 进入经销商侧，其余角色都按客户处理。
    pub fn from_claim(role: &str) -> Self {
        if role.eq_ignore_ascii_case("dealer") {
            ChatRole::Dealer
        } else {
            ChatRole::Customer
        }
    }

    pub fn counterpart(self) -> Self {
        match self {
            ChatRole::Customer => ChatRole::Dealer,
            ChatRole::Dealer => ChatRole::Customer,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChatRole::Customer => "customer",
            ChatRole::Dealer => "dealer",
        }
    }
}

/// 每个 (customer_id, dealer_id) 组合只存在一条会话。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub customer_id: UserId,
    pub dealer_id: DealerId,
    pub car_id: Option<CarId>,
    pub unread_for_customer: i32,
    pub unread_for_dealer: i32,
    pub last_message_id: Option<MessageId>,
    pub last_message: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: Timestamp,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: Timestamp,
}

impl Conversation {
    pub fn unread_for(&self, side: ChatRole) -> i32 {
        match side {
            ChatRole::Customer => self.unread_for_customer,
            ChatRole::Dealer => self.unread_for_dealer,
        }
    }

    pub fn belongs_to_customer(&self, customer_id: UserId) -> bool {
        self.customer_id == customer_id
    }

    pub fn belongs_to_dealer(&self, dealer_id: DealerId) -> bool {
        self.dealer_id == dealer_id
    }

    /// 追加消息后更新会话：接收方未读加一，预览只在消息不早于当前最新消息时前移。
    ///
    /// 追加的提交顺序不一定与 `created_at` 一致，预览和 `updated_at` 必须始终对应
    /// 按 (created_at, id) 排序的最后一条消息。
    pub fn record_message(&mut self, message: &Message, unread_side: ChatRole) {
        match unread_side {
            ChatRole::Customer => self.unread_for_customer += 1,
            ChatRole::Dealer => self.unread_for_dealer += 1,
        }

        if self.last_message_id.is_none() || message.created_at >= self.updated_at {
            self.last_message_id = Some(message.id);
            self.last_message = Some(message.content.as_str().to_owned());
        }
        if message.created_at > self.updated_at {
            self.updated_at = message.created_at;
        }
    }

    pub fn reset_unread(&mut self, side: ChatRole) {
        match side {
            ChatRole::Customer => self.unread_for_customer = 0,
            ChatRole::Dealer => self.unread_for_dealer = 0,
        }
    }
}

/// 会话列表中附带的车辆信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarSummary {
    pub id: CarId,
    pub brand: String,
    pub model_name: String,
}

impl From<Car> for CarSummary {
    fn from(car: Car) -> Self {
        Self {
            id: car.id,
            brand: car.brand,
            model_name: car.model_name,
        }
    }
}

/// 会话列表项：会话本身加上对方的显示名和车辆上下文。
///
/// 客户看到经销商店名，经销商看到客户用户名；关联数据缺失时对应字段为空。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub dealer_shop_name: Option<String>,
    pub customer_username: Option<String>,
    pub car: Option<CarSummary>,
}

/// 首次发消息时惰性创建的会话。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversation {
    pub customer_id: UserId,
    pub dealer_id: DealerId,
    pub car_id: Option<CarId>,
    pub created_at: Timestamp,
}

impl NewConversation {
    pub fn into_conversation(self, id: ConversationId) -> Conversation {
        Conversation {
            id,
            customer_id: self.customer_id,
            dealer_id: self.dealer_id,
            car_id: self.car_id,
            unread_for_customer: 0,
            unread_for_dealer: 0,
            last_message_id: None,
            last_message: None,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}
