//! 应用层实现。
//!
//! 聊天用例服务、实时连接注册表，以及对存储、时钟和推送的抽象。

pub mod broadcaster;
pub mod clock;
pub mod error;
pub mod hub;
pub mod memory;
pub mod repository;
pub mod services;

pub use broadcaster::{ChatEvent, DeliveryOutcome, MessageBroadcaster};
pub use clock::{Clock, SteppingClock, SystemClock};
pub use error::ApplicationError;
pub use hub::{ConnectionGeneration, ConnectionHub, HubSettings, OutboundSender};
pub use memory::InMemoryChatStore;
pub use repository::{CarRepository, ConversationRepository, DealerRepository, MessageRepository};
pub use services::{
    ChatService, ChatServiceDependencies, ReplyMessageRequest, SendMessageRequest, SentMessage,
};
