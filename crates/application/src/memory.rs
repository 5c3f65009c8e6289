//! 内存版存储，实现全部聊天仓储接口。
//!
//! 用于单元测试和本地开发。一把互斥锁保护全部状态，因此每个方法本身是原子的；
//! (customer_id, dealer_id) 索引起到唯一约束的作用。

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use domain::{
    Car, CarId, CarSummary, ChatRole, Conversation, ConversationId, ConversationSummary, Dealer,
    DealerId, Message, MessageId, NewConversation, NewMessage, RepositoryError, UserId,
    UserProfile,
};
use tokio::sync::Mutex;

use crate::repository::{
    CarRepository, ConversationRepository, DealerRepository, MessageRepository,
};

#[derive(Default)]
struct State {
    conversations: BTreeMap<ConversationId, Conversation>,
    pairs: HashMap<(UserId, DealerId), ConversationId>,
    messages: Vec<Message>,
    users: HashMap<UserId, UserProfile>,
    dealers: HashMap<DealerId, Dealer>,
    cars: HashMap<CarId, Car>,
    next_conversation_id: i64,
    next_message_id: i64,
}

#[derive(Default)]
pub struct InMemoryChatStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: UserProfile) {
        self.state.lock().await.users.insert(user.id, user);
    }

    pub async fn insert_dealer(&self, dealer: Dealer) {
        self.state.lock().await.dealers.insert(dealer.id, dealer);
    }

    pub async fn insert_car(&self, car: Car) {
        self.state.lock().await.cars.insert(car.id, car);
    }

    /// 模拟存储故障：之后的所有调用都返回存储错误。
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn conversation_count(&self) -> usize {
        self.state.lock().await.conversations.len()
    }

    pub async fn message_count(&self) -> usize {
        self.state.lock().await.messages.len()
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::storage("store unavailable"));
        }
        Ok(())
    }
}

impl State {
    fn summarize(&self, conversation: &Conversation) -> ConversationSummary {
        ConversationSummary {
            conversation: conversation.clone(),
            dealer_shop_name: self
                .dealers
                .get(&conversation.dealer_id)
                .map(|dealer| dealer.shop_name.clone()),
            customer_username: self
                .users
                .get(&conversation.customer_id)
                .map(|user| user.username.clone()),
            car: conversation
                .car_id
                .and_then(|car_id| self.cars.get(&car_id))
                .cloned()
                .map(CarSummary::from),
        }
    }

    fn list_newest_first(
        &self,
        filter: impl Fn(&Conversation) -> bool,
    ) -> Vec<ConversationSummary> {
        let mut conversations: Vec<&Conversation> =
            self.conversations.values().filter(|&c| filter(c)).collect();
        conversations.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        conversations
            .into_iter()
            .map(|conversation| self.summarize(conversation))
            .collect()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryChatStore {
    async fn find_by_id(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        self.check_available()?;
        Ok(self.state.lock().await.conversations.get(&id).cloned())
    }

    async fn find_by_pair(
        &self,
        customer_id: UserId,
        dealer_id: DealerId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .pairs
            .get(&(customer_id, dealer_id))
            .and_then(|id| state.conversations.get(id))
            .cloned())
    }

    async fn create(
        &self,
        conversation: NewConversation,
    ) -> Result<Conversation, RepositoryError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let key = (conversation.customer_id, conversation.dealer_id);
        if state.pairs.contains_key(&key) {
            return Err(RepositoryError::Conflict);
        }

        state.next_conversation_id += 1;
        let id = ConversationId::from(state.next_conversation_id);
        let created = conversation.into_conversation(id);
        state.pairs.insert(key, id);
        state.conversations.insert(id, created.clone());
        Ok(created)
    }

    async fn list_by_customer(
        &self,
        customer_id: UserId,
    ) -> Result<Vec<ConversationSummary>, RepositoryError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.list_newest_first(|c| c.customer_id == customer_id))
    }

    async fn list_by_dealer(
        &self,
        dealer_id: DealerId,
    ) -> Result<Vec<ConversationSummary>, RepositoryError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.list_newest_first(|c| c.dealer_id == dealer_id))
    }

    async fn reset_unread(
        &self,
        id: ConversationId,
        side: ChatRole,
    ) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if let Some(conversation) = state.conversations.get_mut(&id) {
            conversation.reset_unread(side);
        }
        Ok(())
    }

    async fn total_unread_for_customer(
        &self,
        customer_id: UserId,
    ) -> Result<i64, RepositoryError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .conversations
            .values()
            .filter(|c| c.customer_id == customer_id)
            .map(|c| i64::from(c.unread_for(ChatRole::Customer)))
            .sum())
    }

    async fn total_unread_for_dealer(&self, dealer_id: DealerId) -> Result<i64, RepositoryError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .conversations
            .values()
            .filter(|c| c.dealer_id == dealer_id)
            .map(|c| i64::from(c.unread_for(ChatRole::Dealer)))
            .sum())
    }
}

#[async_trait]
impl MessageRepository for InMemoryChatStore {
    async fn append_and_update_conversation(
        &self,
        message: NewMessage,
    ) -> Result<Message, RepositoryError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if !state.conversations.contains_key(&message.conversation_id) {
            return Err(RepositoryError::NotFound);
        }

        state.next_message_id += 1;
        let unread_side = message.unread_side;
        let stored = message.into_message(MessageId::from(state.next_message_id));

        if let Some(conversation) = state.conversations.get_mut(&stored.conversation_id) {
            conversation.record_message(&stored, unread_side);
        }
        state.messages.push(stored.clone());
        Ok(stored)
    }

    async fn list_by_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, RepositoryError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut messages: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(messages)
    }
}

#[async_trait]
impl DealerRepository for InMemoryChatStore {
    async fn find_by_id(&self, id: DealerId) -> Result<Option<Dealer>, RepositoryError> {
        self.check_available()?;
        Ok(self.state.lock().await.dealers.get(&id).cloned())
    }

    async fn find_by_user_id(&self, user_id: UserId) -> Result<Option<Dealer>, RepositoryError> {
        self.check_available()?;
        Ok(self
            .state
            .lock()
            .await
            .dealers
            .values()
            .find(|dealer| dealer.user_id == user_id)
            .cloned())
    }
}

#[async_trait]
impl CarRepository for InMemoryChatStore {
    async fn find_by_id(&self, id: CarId) -> Result<Option<Car>, RepositoryError> {
        self.check_available()?;
        Ok(self.state.lock().await.cars.get(&id).cloned())
    }
}
