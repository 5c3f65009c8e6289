use std::sync::Arc;

use application::repository::{
    CarRepository, ConversationRepository, DealerRepository, MessageRepository,
};
use async_trait::async_trait;
use domain::{
    Car, CarId, CarSummary, ChatRole, Conversation, ConversationId, ConversationSummary, Dealer,
    DealerId, Message, MessageContent, MessageId, MessageType, NewConversation, NewMessage,
    RepositoryError, UserId,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// Postgres 唯一约束冲突
const UNIQUE_VIOLATION: &str = "23505";

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            RepositoryError::Conflict
        }
        _ => {
            let message = err.to_string();
            RepositoryError::storage_with_source(message, err)
        }
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

const CONVERSATION_COLUMNS: &str = "id, customer_id, dealer_id, car_id, unread_for_customer, \
     unread_for_dealer, last_message_id, last_message, created_at, updated_at";

/// 会话列表：LEFT JOIN 经销商店名、客户用户名和车辆，关联行缺失时为 NULL
const SUMMARY_SELECT: &str = "SELECT c.id, c.customer_id, c.dealer_id, c.car_id, \
     c.unread_for_customer, c.unread_for_dealer, c.last_message_id, c.last_message, \
     c.created_at, c.updated_at, \
     d.shop_name AS dealer_shop_name, u.username AS customer_username, \
     car.brand AS car_brand, car.model_name AS car_model_name \
     FROM conversations c \
     LEFT JOIN dealers d ON d.id = c.dealer_id \
     LEFT JOIN users u ON u.id = c.customer_id \
     LEFT JOIN cars car ON car.id = c.car_id";

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, content, message_type, is_read, created_at";

#[derive(Debug, FromRow)]
struct ConversationRecord {
    id: i64,
    customer_id: Uuid,
    dealer_id: Uuid,
    car_id: Option<Uuid>,
    unread_for_customer: i32,
    unread_for_dealer: i32,
    last_message_id: Option<i64>,
    last_message: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<ConversationRecord> for Conversation {
    fn from(value: ConversationRecord) -> Self {
        Conversation {
            id: ConversationId::from(value.id),
            customer_id: UserId::from(value.customer_id),
            dealer_id: DealerId::from(value.dealer_id),
            car_id: value.car_id.map(CarId::from),
            unread_for_customer: value.unread_for_customer,
            unread_for_dealer: value.unread_for_dealer,
            last_message_id: value.last_message_id.map(MessageId::from),
            last_message: value.last_message,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ConversationSummaryRecord {
    #[sqlx(flatten)]
    conversation: ConversationRecord,
    dealer_shop_name: Option<String>,
    customer_username: Option<String>,
    car_brand: Option<String>,
    car_model_name: Option<String>,
}

impl From<ConversationSummaryRecord> for ConversationSummary {
    fn from(value: ConversationSummaryRecord) -> Self {
        let conversation = Conversation::from(value.conversation);
        let car = match (conversation.car_id, value.car_brand, value.car_model_name) {
            (Some(id), Some(brand), Some(model_name)) => Some(CarSummary {
                id,
                brand,
                model_name,
            }),
            _ => None,
        };

        ConversationSummary {
            conversation,
            dealer_shop_name: value.dealer_shop_name,
            customer_username: value.customer_username,
            car,
        }
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: i64,
    conversation_id: i64,
    sender_id: Uuid,
    content: String,
    message_type: String,
    is_read: bool,
    created_at: OffsetDateTime,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let content =
            MessageContent::new(value.content).map_err(|err| invalid_data(err.to_string()))?;
        let message_type =
            MessageType::parse(&value.message_type).map_err(|err| invalid_data(err.to_string()))?;

        Ok(Message {
            id: MessageId::from(value.id),
            conversation_id: ConversationId::from(value.conversation_id),
            sender_id: UserId::from(value.sender_id),
            content,
            message_type,
            is_read: value.is_read,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct DealerRecord {
    id: Uuid,
    user_id: Uuid,
    shop_name: String,
    is_approved: bool,
}

impl From<DealerRecord> for Dealer {
    fn from(value: DealerRecord) -> Self {
        Dealer {
            id: DealerId::from(value.id),
            user_id: UserId::from(value.user_id),
            shop_name: value.shop_name,
            is_approved: value.is_approved,
        }
    }
}

#[derive(Debug, FromRow)]
struct CarRecord {
    id: Uuid,
    dealer_id: Uuid,
    brand: String,
    model_name: String,
}

impl From<CarRecord> for Car {
    fn from(value: CarRecord) -> Self {
        Car {
            id: CarId::from(value.id),
            dealer_id: DealerId::from(value.dealer_id),
            brand: value.brand,
            model_name: value.model_name,
        }
    }
}

#[derive(Clone)]
pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn find_by_id(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
        ))
        .bind(i64::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(Conversation::from))
    }

    async fn find_by_pair(
        &self,
        customer_id: UserId,
        dealer_id: DealerId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE customer_id = $1 AND dealer_id = $2"
        ))
        .bind(Uuid::from(customer_id))
        .bind(Uuid::from(dealer_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(Conversation::from))
    }

    async fn create(
        &self,
        conversation: NewConversation,
    ) -> Result<Conversation, RepositoryError> {
        // uq_conversations_customer_dealer 冲突时返回 Conflict
        let record = sqlx::query_as::<_, ConversationRecord>(&format!(
            "INSERT INTO conversations (customer_id, dealer_id, car_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $4) \
             RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(Uuid::from(conversation.customer_id))
        .bind(Uuid::from(conversation.dealer_id))
        .bind(conversation.car_id.map(Uuid::from))
        .bind(conversation.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(Conversation::from(record))
    }

    async fn list_by_customer(
        &self,
        customer_id: UserId,
    ) -> Result<Vec<ConversationSummary>, RepositoryError> {
        let records = sqlx::query_as::<_, ConversationSummaryRecord>(&format!(
            "{SUMMARY_SELECT} WHERE c.customer_id = $1 ORDER BY c.updated_at DESC, c.id DESC"
        ))
        .bind(Uuid::from(customer_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(ConversationSummary::from).collect())
    }

    async fn list_by_dealer(
        &self,
        dealer_id: DealerId,
    ) -> Result<Vec<ConversationSummary>, RepositoryError> {
        let records = sqlx::query_as::<_, ConversationSummaryRecord>(&format!(
            "{SUMMARY_SELECT} WHERE c.dealer_id = $1 ORDER BY c.updated_at DESC, c.id DESC"
        ))
        .bind(Uuid::from(dealer_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(ConversationSummary::from).collect())
    }

    async fn reset_unread(
        &self,
        id: ConversationId,
        side: ChatRole,
    ) -> Result<(), RepositoryError> {
        let sql = match side {
            ChatRole::Customer => "UPDATE conversations SET unread_for_customer = 0 WHERE id = $1",
            ChatRole::Dealer => "UPDATE conversations SET unread_for_dealer = 0 WHERE id = $1",
        };

        sqlx::query(sql)
            .bind(i64::from(id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn total_unread_for_customer(
        &self,
        customer_id: UserId,
    ) -> Result<i64, RepositoryError> {
        sqlx::query_scalar::<_, i64>(
            r#"SELECT COALESCE(SUM(unread_for_customer), 0)::BIGINT FROM conversations WHERE customer_id = $1"#,
        )
        .bind(Uuid::from(customer_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }

    async fn total_unread_for_dealer(&self, dealer_id: DealerId) -> Result<i64, RepositoryError> {
        sqlx::query_scalar::<_, i64>(
            r#"SELECT COALESCE(SUM(unread_for_dealer), 0)::BIGINT FROM conversations WHERE dealer_id = $1"#,
        )
        .bind(Uuid::from(dealer_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    /// 事务性地写入消息并更新会话
    async fn append_and_update_conversation(
        &self,
        message: NewMessage,
    ) -> Result<Message, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        // 1. 锁住会话行，同一会话上的追加串行执行
        let locked: Option<i64> =
            sqlx::query_scalar(r#"SELECT id FROM conversations WHERE id = $1 FOR UPDATE"#)
                .bind(i64::from(message.conversation_id))
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        if locked.is_none() {
            return Err(RepositoryError::NotFound);
        }

        // 2. 插入消息
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "INSERT INTO messages (conversation_id, sender_id, content, message_type, is_read, created_at) \
             VALUES ($1, $2, $3, $4, FALSE, $5) \
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(i64::from(message.conversation_id))
        .bind(Uuid::from(message.sender_id))
        .bind(message.content.as_str())
        .bind(message.message_type.as_str())
        .bind(message.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        // 3. 接收方未读加一；最后一条消息只前移到不早于当前 updated_at 的消息，
        //    与 Conversation::record_message 的规则一致
        let update = match message.unread_side {
            ChatRole::Customer => {
                r#"UPDATE conversations
                SET unread_for_customer = unread_for_customer + 1,
                    last_message_id = CASE WHEN last_message_id IS NULL OR $4 >= updated_at
                        THEN $2 ELSE last_message_id END,
                    last_message = CASE WHEN last_message_id IS NULL OR $4 >= updated_at
                        THEN $3 ELSE last_message END,
                    updated_at = GREATEST(updated_at, $4)
                WHERE id = $1"#
            }
            ChatRole::Dealer => {
                r#"UPDATE conversations
                SET unread_for_dealer = unread_for_dealer + 1,
                    last_message_id = CASE WHEN last_message_id IS NULL OR $4 >= updated_at
                        THEN $2 ELSE last_message_id END,
                    last_message = CASE WHEN last_message_id IS NULL OR $4 >= updated_at
                        THEN $3 ELSE last_message END,
                    updated_at = GREATEST(updated_at, $4)
                WHERE id = $1"#
            }
        };
        sqlx::query(update)
            .bind(record.conversation_id)
            .bind(record.id)
            .bind(&record.content)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        // 4. 提交事务
        tx.commit().await.map_err(map_sqlx_err)?;

        Message::try_from(record)
    }

    async fn list_by_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE conversation_id = $1 \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(i64::from(conversation_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Message::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgDealerRepository {
    pool: PgPool,
}

impl PgDealerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DealerRepository for PgDealerRepository {
    async fn find_by_id(&self, id: DealerId) -> Result<Option<Dealer>, RepositoryError> {
        let record = sqlx::query_as::<_, DealerRecord>(
            r#"SELECT id, user_id, shop_name, is_approved FROM dealers WHERE id = $1"#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(Dealer::from))
    }

    async fn find_by_user_id(&self, user_id: UserId) -> Result<Option<Dealer>, RepositoryError> {
        let record = sqlx::query_as::<_, DealerRecord>(
            r#"SELECT id, user_id, shop_name, is_approved FROM dealers WHERE user_id = $1"#,
        )
        .bind(Uuid::from(user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(Dealer::from))
    }
}

#[derive(Clone)]
pub struct PgCarRepository {
    pool: PgPool,
}

impl PgCarRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CarRepository for PgCarRepository {
    async fn find_by_id(&self, id: CarId) -> Result<Option<Car>, RepositoryError> {
        let record = sqlx::query_as::<_, CarRecord>(
            r#"SELECT id, dealer_id, brand, model_name FROM cars WHERE id = $1"#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(Car::from))
    }
}

#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub conversation_repository: Arc<PgConversationRepository>,
    pub message_repository: Arc<PgMessageRepository>,
    pub dealer_repository: Arc<PgDealerRepository>,
    pub car_repository: Arc<PgCarRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            conversation_repository: Arc::new(PgConversationRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            dealer_repository: Arc::new(PgDealerRepository::new(pool.clone())),
            car_repository: Arc::new(PgCarRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
