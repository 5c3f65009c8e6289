use async_trait::async_trait;
use domain::{
    Car, CarId, ChatRole, Conversation, ConversationId, ConversationSummary, Dealer, DealerId,
    Message, NewConversation, NewMessage, RepositoryError, UserId,
};

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_by_id(&self, id: ConversationId)
        -> Result<Option<Conversation>, RepositoryError>;

    async fn find_by_pair(
        &self,
        customer_id: UserId,
        dealer_id: DealerId,
    ) -> Result<Option<Conversation>, RepositoryError>;

    // 同一 (customer_id, dealer_id) 已存在时必须返回 RepositoryError::Conflict
    async fn create(&self, conversation: NewConversation)
        -> Result<Conversation, RepositoryError>;

    // 按 updated_at 倒序，附带经销商店名、客户用户名和车辆信息
    async fn list_by_customer(
        &self,
        customer_id: UserId,
    ) -> Result<Vec<ConversationSummary>, RepositoryError>;

    // 同上
    async fn list_by_dealer(
        &self,
        dealer_id: DealerId,
    ) -> Result<Vec<ConversationSummary>, RepositoryError>;

    async fn reset_unread(&self, id: ConversationId, side: ChatRole)
        -> Result<(), RepositoryError>;

    async fn total_unread_for_customer(&self, customer_id: UserId)
        -> Result<i64, RepositoryError>;

    async fn total_unread_for_dealer(&self, dealer_id: DealerId) -> Result<i64, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    // 插入消息并更新会话的未读计数、最后一条消息，二者在同一事务中完成。
    // 同一会话上的并发追加不能丢失计数；最后一条消息只会前移到更新的消息，
    // 规则见 Conversation::record_message。
    async fn append_and_update_conversation(
        &self,
        message: NewMessage,
    ) -> Result<Message, RepositoryError>;

    // 按创建顺序返回
    async fn list_by_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, RepositoryError>;
}

#[async_trait]
pub trait DealerRepository: Send + Sync {
    async fn find_by_id(&self, id: DealerId) -> Result<Option<Dealer>, RepositoryError>;
    async fn find_by_user_id(&self, user_id: UserId) -> Result<Option<Dealer>, RepositoryError>;
}

#[async_trait]
pub trait CarRepository: Send + Sync {
    async fn find_by_id(&self, id: CarId) -> Result<Option<Car>, RepositoryError>;
}
