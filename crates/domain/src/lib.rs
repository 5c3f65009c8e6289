//! 二手车交易平台聊天子系统的领域模型
//!
//! 包含会话、消息、经销商等核心实体，以及标识符和错误类型。

pub mod conversation;
pub mod dealer;
pub mod errors;
pub mod message;
pub mod value_objects;

// 重新导出常用类型
pub use conversation::*;
pub use dealer::*;
pub use errors::*;
pub use message::*;
pub use value_objects::*;
