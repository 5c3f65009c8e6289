//! 聊天核心需要读取的用户、经销商和车辆数据。

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{CarId, DealerId, UserId};

/// 登录账号的公开资料，会话列表里作为客户的显示名。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
}

/// 经销商资料。`user_id` 是其登录账号，推送消息时使用它而不是 `id`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dealer {
    pub id: DealerId,
    pub user_id: UserId,
    pub shop_name: String,
    pub is_approved: bool,
}

impl Dealer {
    /// 只有审核通过的经销商可以收发消息
    pub fn ensure_approved(&self) -> Result<(), DomainError> {
        if self.is_approved {
            Ok(())
        } else {
            Err(DomainError::DealerNotApproved)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Car {
    pub id: CarId,
    pub dealer_id: DealerId,
    pub brand: String,
    pub model_name: String,
}
