use std::sync::Arc;

use domain::{
    CarId, ChatRole, Conversation, ConversationId, ConversationSummary, Dealer, DealerId,
    DomainError, Message, MessageContent, NewConversation, NewMessage, RepositoryError, UserId,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    broadcaster::{ChatEvent, MessageBroadcaster},
    clock::Clock,
    error::ApplicationError,
    repository::{CarRepository, ConversationRepository, DealerRepository, MessageRepository},
};

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub customer_id: Uuid, // 从JWT获取
    pub dealer_id: Uuid,   // 经销商资料 id，不是经销商的用户 id
    pub car_id: Option<Uuid>,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ReplyMessageRequest {
    pub dealer_user_id: Uuid, // 从JWT获取
    pub conversation_id: i64,
    pub content: String,
}

/// 发送成功后返回的消息及其所属会话
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SentMessage {
    pub conversation_id: ConversationId,
    pub message: Message,
}

pub struct ChatServiceDependencies {
    pub conversation_repository: Arc<dyn ConversationRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub dealer_repository: Arc<dyn DealerRepository>,
    pub car_repository: Arc<dyn CarRepository>,
    pub clock: Arc<dyn Clock>,
    pub broadcaster: Arc<dyn MessageBroadcaster>,
}

/// 聊天用例：会话解析、消息持久化、未读计数维护和实时推送。
pub struct ChatService {
    deps: ChatServiceDependencies,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        Self { deps }
    }

    /// 客户给经销商发消息。首条消息会创建会话。
    pub async fn send_from_customer(
        &self,
        request: SendMessageRequest,
    ) -> Result<SentMessage, ApplicationError> {
        let customer_id = UserId::from(request.customer_id);
        let content = MessageContent::new(request.content)?;

        let dealer = self
            .deps
            .dealer_repository
            .find_by_id(DealerId::from(request.dealer_id))
            .await?
            .ok_or(DomainError::DealerNotFound)?;
        dealer.ensure_approved()?;

        let car_id = request.car_id.map(CarId::from);
        if let Some(car_id) = car_id {
            self.deps
                .car_repository
                .find_by_id(car_id)
                .await?
                .ok_or(DomainError::CarNotFound)?;
        }

        let conversation = self
            .resolve_conversation(customer_id, dealer.id, car_id)
            .await?;

        let message = self
            .deps
            .message_repository
            .append_and_update_conversation(NewMessage::text(
                conversation.id,
                customer_id,
                content,
                ChatRole::Customer.counterpart(),
                self.deps.clock.now(),
            ))
            .await?;

        // 推送目标是经销商的用户 id
        self.deliver(dealer.user_id, conversation.id, &message).await;

        Ok(SentMessage {
            conversation_id: conversation.id,
            message,
        })
    }

    /// 经销商在已有会话中回复客户。
    pub async fn reply_from_dealer(
        &self,
        request: ReplyMessageRequest,
    ) -> Result<SentMessage, ApplicationError> {
        let dealer_user_id = UserId::from(request.dealer_user_id);
        let conversation_id = ConversationId::from(request.conversation_id);
        let content = MessageContent::new(request.content)?;

        let conversation = self
            .deps
            .conversation_repository
            .find_by_id(conversation_id)
            .await?
            .ok_or(DomainError::ConversationNotFound)?;

        let dealer = self.dealer_profile(dealer_user_id).await?;
        dealer.ensure_approved()?;
        if !conversation.belongs_to_dealer(dealer.id) {
            warn!(
                conversation_id = %conversation_id,
                dealer_id = %dealer.id,
                "dealer attempted to reply to a conversation it does not own"
            );
            return Err(DomainError::NotConversationParticipant.into());
        }

        let message = self
            .deps
            .message_repository
            .append_and_update_conversation(NewMessage::text(
                conversation.id,
                dealer_user_id,
                content,
                ChatRole::Dealer.counterpart(),
                self.deps.clock.now(),
            ))
            .await
            .map_err(|err| match err {
                // 只有在会话被并发删除时才会出现
                RepositoryError::NotFound => {
                    ApplicationError::from(DomainError::ConversationNotFound)
                }
                other => other.into(),
            })?;

        self.deliver(conversation.customer_id, conversation.id, &message)
            .await;

        Ok(SentMessage {
            conversation_id: conversation.id,
            message,
        })
    }

    /// 调用者的会话列表，最近更新的在前，附带对方显示名和车辆信息。
    pub async fn list_conversations(
        &self,
        user_id: Uuid,
        role: ChatRole,
    ) -> Result<Vec<ConversationSummary>, ApplicationError> {
        let user_id = UserId::from(user_id);
        let conversations = match role {
            ChatRole::Customer => {
                self.deps
                    .conversation_repository
                    .list_by_customer(user_id)
                    .await?
            }
            ChatRole::Dealer => {
                let dealer = self.dealer_profile(user_id).await?;
                self.deps
                    .conversation_repository
                    .list_by_dealer(dealer.id)
                    .await?
            }
        };
        Ok(conversations)
    }

    /// 返回会话全部消息（按创建顺序），并把调用者一侧的未读计数清零。
    ///
    /// 先清零再读取：清零之后到达的消息一定会出现在结果里或留在计数里，不会两头都丢。
    /// 读取消息失败时计数已经清零且不回填（回填会覆盖并发追加的增量），客户端重试读取即可。
    pub async fn list_messages(
        &self,
        conversation_id: i64,
        caller_id: Uuid,
        role: ChatRole,
    ) -> Result<Vec<Message>, ApplicationError> {
        let conversation_id = ConversationId::from(conversation_id);
        let caller_id = UserId::from(caller_id);

        let conversation = self
            .deps
            .conversation_repository
            .find_by_id(conversation_id)
            .await?
            .ok_or(DomainError::ConversationNotFound)?;
        self.ensure_participant(&conversation, caller_id, role)
            .await?;

        if let Err(err) = self
            .deps
            .conversation_repository
            .reset_unread(conversation_id, role)
            .await
        {
            // 已读标记失败不影响读取
            warn!(
                conversation_id = %conversation_id,
                side = role.as_str(),
                error = %err,
                "failed to reset unread counter"
            );
        }

        let messages = self
            .deps
            .message_repository
            .list_by_conversation(conversation_id)
            .await?;
        Ok(messages)
    }

    /// 调用者一侧所有会话的未读总数。
    pub async fn total_unread(
        &self,
        user_id: Uuid,
        role: ChatRole,
    ) -> Result<i64, ApplicationError> {
        let user_id = UserId::from(user_id);
        let total = match role {
            ChatRole::Customer => {
                self.deps
                    .conversation_repository
                    .total_unread_for_customer(user_id)
                    .await?
            }
            ChatRole::Dealer => {
                let dealer = self.dealer_profile(user_id).await?;
                self.deps
                    .conversation_repository
                    .total_unread_for_dealer(dealer.id)
                    .await?
            }
        };
        Ok(total)
    }

    /// 查找或创建会话。
    ///
    /// 两个并发的首条消息可能同时走到创建这一步，唯一约束让其中一个以 `Conflict` 失败，
    /// 失败方重新读取已经存在的会话。
    async fn resolve_conversation(
        &self,
        customer_id: UserId,
        dealer_id: DealerId,
        car_id: Option<CarId>,
    ) -> Result<Conversation, ApplicationError> {
        let repository = &self.deps.conversation_repository;

        if let Some(existing) = repository.find_by_pair(customer_id, dealer_id).await? {
            return Ok(existing);
        }

        let candidate = NewConversation {
            customer_id,
            dealer_id,
            car_id,
            created_at: self.deps.clock.now(),
        };

        match repository.create(candidate).await {
            Ok(created) => {
                debug!(
                    conversation_id = %created.id,
                    customer_id = %customer_id,
                    dealer_id = %dealer_id,
                    "conversation created"
                );
                Ok(created)
            }
            Err(RepositoryError::Conflict) => {
                debug!(
                    customer_id = %customer_id,
                    dealer_id = %dealer_id,
                    "lost conversation create race, re-reading"
                );
                repository
                    .find_by_pair(customer_id, dealer_id)
                    .await?
                    .ok_or_else(|| {
                        RepositoryError::storage("conversation missing after unique conflict")
                            .into()
                    })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn dealer_profile(&self, user_id: UserId) -> Result<Dealer, ApplicationError> {
        let dealer = self
            .deps
            .dealer_repository
            .find_by_user_id(user_id)
            .await?
            .ok_or(DomainError::DealerProfileNotFound)?;
        Ok(dealer)
    }

    async fn ensure_participant(
        &self,
        conversation: &Conversation,
        caller_id: UserId,
        role: ChatRole,
    ) -> Result<(), ApplicationError> {
        let allowed = match role {
            ChatRole::Customer => conversation.belongs_to_customer(caller_id),
            ChatRole::Dealer => {
                let dealer = self.dealer_profile(caller_id).await?;
                conversation.belongs_to_dealer(dealer.id)
            }
        };

        if allowed {
            Ok(())
        } else {
            Err(DomainError::NotConversationParticipant.into())
        }
    }

    // 推送失败不影响发送结果，消息已经持久化
    async fn deliver(&self, recipient: UserId, conversation_id: ConversationId, message: &Message) {
        let outcome = self
            .deps
            .broadcaster
            .broadcast_to_user(
                recipient,
                ChatEvent::new_message(conversation_id, message.clone()),
            )
            .await;
        debug!(
            recipient = %recipient,
            conversation_id = %conversation_id,
            message_id = %message.id,
            outcome = ?outcome,
            "new_message pushed"
        );
    }
}
