//! 聊天服务单元测试
//!
//! 覆盖会话创建、未读计数、参与者校验、推送目标以及存储故障时的行为。

#[cfg(test)]
mod chat_service_tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use domain::{
        Car, CarId, CarSummary, ChatRole, Conversation, ConversationId, ConversationSummary, Dealer,
        DealerId, DomainError, Message, NewConversation, NewMessage, RepositoryError, UserId,
        UserProfile,
    };
    use uuid::Uuid;

    use crate::broadcaster::{ChatEvent, DeliveryOutcome, MessageBroadcaster};
    use crate::clock::SteppingClock;
    use crate::error::ApplicationError;
    use crate::memory::InMemoryChatStore;
    use crate::repository::{ConversationRepository, MessageRepository};
    use crate::services::chat_service::*;

    /// 记录每次推送的目标和事件
    #[derive(Default)]
    struct RecordingBroadcaster {
        events: Mutex<Vec<(UserId, ChatEvent)>>,
    }

    impl RecordingBroadcaster {
        fn recipients(&self) -> Vec<UserId> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|(user_id, _)| *user_id)
                .collect()
        }

        fn len(&self) -> usize {
            self.events.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MessageBroadcaster for RecordingBroadcaster {
        async fn broadcast_to_user(&self, user_id: UserId, event: ChatEvent) -> DeliveryOutcome {
            self.events.lock().unwrap().push((user_id, event));
            DeliveryOutcome::Delivered
        }
    }

    struct TestContext {
        store: Arc<InMemoryChatStore>,
        broadcaster: Arc<RecordingBroadcaster>,
        service: ChatService,
        customer: Uuid,
        dealer: Dealer,
        car: Car,
    }

    fn clock() -> Arc<SteppingClock> {
        Arc::new(SteppingClock::new(
            time::OffsetDateTime::UNIX_EPOCH + time::Duration::days(20_000),
            time::Duration::seconds(1),
        ))
    }

    fn build_service(
        store: Arc<InMemoryChatStore>,
        conversations: Arc<dyn ConversationRepository>,
        broadcaster: Arc<RecordingBroadcaster>,
    ) -> ChatService {
        ChatService::new(ChatServiceDependencies {
            conversation_repository: conversations,
            message_repository: store.clone(),
            dealer_repository: store.clone(),
            car_repository: store,
            clock: clock(),
            broadcaster,
        })
    }

    async fn seed_dealer(store: &InMemoryChatStore, shop_name: &str) -> Dealer {
        let dealer = Dealer {
            id: DealerId::from(Uuid::new_v4()),
            user_id: UserId::from(Uuid::new_v4()),
            shop_name: shop_name.to_string(),
            is_approved: true,
        };
        store.insert_dealer(dealer.clone()).await;
        dealer
    }

    async fn setup() -> TestContext {
        let store = Arc::new(InMemoryChatStore::new());
        let dealer = seed_dealer(&store, "Northside Motors").await;
        let car = Car {
            id: CarId::from(Uuid::new_v4()),
            dealer_id: dealer.id,
            brand: "Toyota".to_string(),
            model_name: "Corolla".to_string(),
        };
        store.insert_car(car.clone()).await;

        let broadcaster = Arc::new(RecordingBroadcaster::default());
        let service = build_service(store.clone(), store.clone(), broadcaster.clone());

        TestContext {
            store,
            broadcaster,
            service,
            customer: Uuid::new_v4(),
            dealer,
            car,
        }
    }

    fn send(ctx: &TestContext, content: &str) -> SendMessageRequest {
        SendMessageRequest {
            customer_id: ctx.customer,
            dealer_id: ctx.dealer.id.0,
            car_id: Some(ctx.car.id.0),
            content: content.to_string(),
        }
    }

    fn reply(ctx: &TestContext, conversation_id: ConversationId, content: &str) -> ReplyMessageRequest {
        ReplyMessageRequest {
            dealer_user_id: ctx.dealer.user_id.0,
            conversation_id: conversation_id.0,
            content: content.to_string(),
        }
    }

    async fn conversation(ctx: &TestContext, id: ConversationId) -> Conversation {
        ConversationRepository::find_by_id(ctx.store.as_ref(), id)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_message_creates_conversation() {
        let ctx = setup().await;

        let sent = ctx.service.send_from_customer(send(&ctx, "Is it available?")).await.unwrap();

        let conv = conversation(&ctx, sent.conversation_id).await;
        assert_eq!(conv.customer_id, UserId::from(ctx.customer));
        assert_eq!(conv.dealer_id, ctx.dealer.id);
        assert_eq!(conv.car_id, Some(ctx.car.id));
        assert_eq!(conv.unread_for_dealer, 1);
        assert_eq!(conv.unread_for_customer, 0);
        assert_eq!(conv.last_message_id, Some(sent.message.id));
        assert_eq!(conv.last_message.as_deref(), Some("Is it available?"));
        assert_eq!(conv.updated_at, sent.message.created_at);
        assert!(!sent.message.is_read);
    }

    #[tokio::test]
    async fn test_push_goes_to_dealer_login_account() {
        let ctx = setup().await;

        ctx.service.send_from_customer(send(&ctx, "hello")).await.unwrap();

        // 推送目标是经销商的用户 id，而不是经销商资料 id
        assert_eq!(ctx.broadcaster.recipients(), vec![ctx.dealer.user_id]);
        assert_ne!(ctx.dealer.user_id.0, ctx.dealer.id.0);
    }

    #[tokio::test]
    async fn test_customer_dealer_exchange_keeps_counters_consistent() {
        let ctx = setup().await;

        let u1 = ctx.service.send_from_customer(send(&ctx, "U1")).await.unwrap();
        let d1 = ctx
            .service
            .reply_from_dealer(reply(&ctx, u1.conversation_id, "D1"))
            .await
            .unwrap();
        let u2 = ctx.service.send_from_customer(send(&ctx, "U2")).await.unwrap();

        assert_eq!(u1.conversation_id, d1.conversation_id);
        assert_eq!(u1.conversation_id, u2.conversation_id);
        assert_eq!(ctx.store.conversation_count().await, 1);

        let conv = conversation(&ctx, u1.conversation_id).await;
        assert_eq!(conv.unread_for_dealer, 2);
        assert_eq!(conv.unread_for_customer, 1);
        assert_eq!(conv.last_message.as_deref(), Some("U2"));
        assert_eq!(conv.last_message_id, Some(u2.message.id));

        assert_eq!(
            ctx.broadcaster.recipients(),
            vec![
                ctx.dealer.user_id,
                UserId::from(ctx.customer),
                ctx.dealer.user_id
            ]
        );

        let messages = ctx
            .service
            .list_messages(u1.conversation_id.0, ctx.customer, ChatRole::Customer)
            .await
            .unwrap();
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["U1", "D1", "U2"]);
    }

    #[tokio::test]
    async fn test_reading_resets_only_callers_side() {
        let ctx = setup().await;
        let u1 = ctx.service.send_from_customer(send(&ctx, "U1")).await.unwrap();
        ctx.service
            .reply_from_dealer(reply(&ctx, u1.conversation_id, "D1"))
            .await
            .unwrap();

        ctx.service
            .list_messages(u1.conversation_id.0, ctx.dealer.user_id.0, ChatRole::Dealer)
            .await
            .unwrap();

        let conv = conversation(&ctx, u1.conversation_id).await;
        assert_eq!(conv.unread_for_dealer, 0);
        assert_eq!(conv.unread_for_customer, 1);

        // 再读一次结果不变
        ctx.service
            .list_messages(u1.conversation_id.0, ctx.dealer.user_id.0, ChatRole::Dealer)
            .await
            .unwrap();
        let again = conversation(&ctx, u1.conversation_id).await;
        assert_eq!(again.unread_for_dealer, 0);
        assert_eq!(again.unread_for_customer, 1);
    }

    #[tokio::test]
    async fn test_total_unread_sums_across_conversations() {
        let ctx = setup().await;
        let other_dealer = seed_dealer(&ctx.store, "Harbor Auto").await;

        ctx.service.send_from_customer(send(&ctx, "one")).await.unwrap();
        ctx.service.send_from_customer(send(&ctx, "two")).await.unwrap();
        let other = ctx
            .service
            .send_from_customer(SendMessageRequest {
                customer_id: ctx.customer,
                dealer_id: other_dealer.id.0,
                car_id: None,
                content: "three".to_string(),
            })
            .await
            .unwrap();
        ctx.service
            .reply_from_dealer(ReplyMessageRequest {
                dealer_user_id: other_dealer.user_id.0,
                conversation_id: other.conversation_id.0,
                content: "reply".to_string(),
            })
            .await
            .unwrap();

        let dealer_total = ctx
            .service
            .total_unread(ctx.dealer.user_id.0, ChatRole::Dealer)
            .await
            .unwrap();
        let customer_total = ctx
            .service
            .total_unread(ctx.customer, ChatRole::Customer)
            .await
            .unwrap();
        assert_eq!(dealer_total, 2);
        assert_eq!(customer_total, 1);

        let stranger = ctx
            .service
            .total_unread(Uuid::new_v4(), ChatRole::Customer)
            .await
            .unwrap();
        assert_eq!(stranger, 0);
    }

    #[tokio::test]
    async fn test_conversations_are_listed_newest_first() {
        let ctx = setup().await;
        let other_dealer = seed_dealer(&ctx.store, "Harbor Auto").await;

        let first = ctx.service.send_from_customer(send(&ctx, "first")).await.unwrap();
        let second = ctx
            .service
            .send_from_customer(SendMessageRequest {
                customer_id: ctx.customer,
                dealer_id: other_dealer.id.0,
                car_id: None,
                content: "second".to_string(),
            })
            .await
            .unwrap();

        let listed = ctx
            .service
            .list_conversations(ctx.customer, ChatRole::Customer)
            .await
            .unwrap();
        let ids: Vec<_> = listed.iter().map(|c| c.conversation.id).collect();
        assert_eq!(ids, vec![second.conversation_id, first.conversation_id]);

        // 新消息把会话顶到最前
        ctx.service.send_from_customer(send(&ctx, "bump")).await.unwrap();
        let listed = ctx
            .service
            .list_conversations(ctx.customer, ChatRole::Customer)
            .await
            .unwrap();
        assert_eq!(listed[0].conversation.id, first.conversation_id);

        let dealer_view = ctx
            .service
            .list_conversations(ctx.dealer.user_id.0, ChatRole::Dealer)
            .await
            .unwrap();
        assert_eq!(dealer_view.len(), 1);
        assert_eq!(dealer_view[0].conversation.id, first.conversation_id);
    }

    #[tokio::test]
    async fn test_conversation_list_shows_counterpart_and_car() {
        let ctx = setup().await;
        ctx.store
            .insert_user(UserProfile {
                id: UserId::from(ctx.customer),
                username: "buyer01".to_string(),
            })
            .await;
        ctx.service.send_from_customer(send(&ctx, "price?")).await.unwrap();

        let customer_view = ctx
            .service
            .list_conversations(ctx.customer, ChatRole::Customer)
            .await
            .unwrap();
        assert_eq!(
            customer_view[0].dealer_shop_name.as_deref(),
            Some("Northside Motors")
        );
        assert_eq!(customer_view[0].car, Some(CarSummary::from(ctx.car.clone())));

        let dealer_view = ctx
            .service
            .list_conversations(ctx.dealer.user_id.0, ChatRole::Dealer)
            .await
            .unwrap();
        assert_eq!(dealer_view[0].customer_username.as_deref(), Some("buyer01"));
        assert_eq!(dealer_view[0].conversation.unread_for_dealer, 1);
    }

    #[tokio::test]
    async fn test_unapproved_dealer_cannot_chat() {
        let ctx = setup().await;
        let sent = ctx.service.send_from_customer(send(&ctx, "hi")).await.unwrap();

        let mut pending = seed_dealer(&ctx.store, "Pending Motors").await;
        pending.is_approved = false;
        ctx.store.insert_dealer(pending.clone()).await;
        let err = ctx
            .service
            .send_from_customer(SendMessageRequest {
                customer_id: ctx.customer,
                dealer_id: pending.id.0,
                car_id: None,
                content: "hello".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::DealerNotApproved)
        ));

        // 审核被撤销后也不能继续回复已有会话
        let mut suspended = ctx.dealer.clone();
        suspended.is_approved = false;
        ctx.store.insert_dealer(suspended).await;
        let err = ctx
            .service
            .reply_from_dealer(reply(&ctx, sent.conversation_id, "still here"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::DealerNotApproved)
        ));

        assert_eq!(ctx.store.conversation_count().await, 1);
        assert_eq!(ctx.store.message_count().await, 1);
        assert_eq!(ctx.broadcaster.len(), 1);
    }

    /// 读取消息列表第一次失败，之后正常
    struct FlakyMessages {
        inner: Arc<InMemoryChatStore>,
        failed: Mutex<bool>,
    }

    #[async_trait]
    impl MessageRepository for FlakyMessages {
        async fn append_and_update_conversation(
            &self,
            message: NewMessage,
        ) -> Result<Message, RepositoryError> {
            self.inner.append_and_update_conversation(message).await
        }

        async fn list_by_conversation(
            &self,
            conversation_id: ConversationId,
        ) -> Result<Vec<Message>, RepositoryError> {
            let first_call = !std::mem::replace(&mut *self.failed.lock().unwrap(), true);
            if first_call {
                return Err(RepositoryError::storage("read timed out"));
            }
            self.inner.list_by_conversation(conversation_id).await
        }
    }

    #[tokio::test]
    async fn test_failed_read_keeps_reset_and_retry_returns_messages() {
        let ctx = setup().await;
        let service = ChatService::new(ChatServiceDependencies {
            conversation_repository: ctx.store.clone(),
            message_repository: Arc::new(FlakyMessages {
                inner: ctx.store.clone(),
                failed: Mutex::new(false),
            }),
            dealer_repository: ctx.store.clone(),
            car_repository: ctx.store.clone(),
            clock: clock(),
            broadcaster: ctx.broadcaster.clone(),
        });
        let sent = service.send_from_customer(send(&ctx, "U1")).await.unwrap();

        let err = service
            .list_messages(sent.conversation_id.0, ctx.dealer.user_id.0, ChatRole::Dealer)
            .await
            .unwrap_err();
        assert!(err.is_store_unavailable());
        assert_eq!(conversation(&ctx, sent.conversation_id).await.unread_for_dealer, 0);

        let messages = service
            .list_messages(sent.conversation_id.0, ctx.dealer.user_id.0, ChatRole::Dealer)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, sent.message.id);
    }

    #[tokio::test]
    async fn test_dealer_cannot_reply_to_foreign_conversation() {
        let ctx = setup().await;
        let intruder = seed_dealer(&ctx.store, "Elsewhere Cars").await;
        let sent = ctx.service.send_from_customer(send(&ctx, "hi")).await.unwrap();

        let err = ctx
            .service
            .reply_from_dealer(ReplyMessageRequest {
                dealer_user_id: intruder.user_id.0,
                conversation_id: sent.conversation_id.0,
                content: "not mine".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::NotConversationParticipant)
        ));
        assert_eq!(ctx.store.message_count().await, 1);
        assert_eq!(conversation(&ctx, sent.conversation_id).await.unread_for_customer, 0);
    }

    #[tokio::test]
    async fn test_reply_errors() {
        let ctx = setup().await;
        let sent = ctx.service.send_from_customer(send(&ctx, "hi")).await.unwrap();

        let missing = ctx
            .service
            .reply_from_dealer(reply(&ctx, ConversationId::from(9_999), "hello"))
            .await
            .unwrap_err();
        assert!(matches!(
            missing,
            ApplicationError::Domain(DomainError::ConversationNotFound)
        ));

        let no_profile = ctx
            .service
            .reply_from_dealer(ReplyMessageRequest {
                dealer_user_id: Uuid::new_v4(),
                conversation_id: sent.conversation_id.0,
                content: "hello".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            no_profile,
            ApplicationError::Domain(DomainError::DealerProfileNotFound)
        ));

        let blank = ctx
            .service
            .reply_from_dealer(reply(&ctx, sent.conversation_id, "   "))
            .await
            .unwrap_err();
        assert!(matches!(
            blank,
            ApplicationError::Domain(DomainError::InvalidArgument { .. })
        ));
        assert_eq!(ctx.store.message_count().await, 1);
    }

    #[tokio::test]
    async fn test_send_rejects_unknown_references() {
        let ctx = setup().await;

        let mut unknown_dealer = send(&ctx, "hi");
        unknown_dealer.dealer_id = Uuid::new_v4();
        let err = ctx.service.send_from_customer(unknown_dealer).await.unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(DomainError::DealerNotFound)));

        let mut unknown_car = send(&ctx, "hi");
        unknown_car.car_id = Some(Uuid::new_v4());
        let err = ctx.service.send_from_customer(unknown_car).await.unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(DomainError::CarNotFound)));

        let too_long = send(&ctx, &"x".repeat(domain::MAX_MESSAGE_CHARS + 1));
        let err = ctx.service.send_from_customer(too_long).await.unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::InvalidArgument { .. })
        ));

        assert_eq!(ctx.store.conversation_count().await, 0);
        assert_eq!(ctx.store.message_count().await, 0);
        assert_eq!(ctx.broadcaster.len(), 0);
    }

    #[tokio::test]
    async fn test_send_without_car_is_allowed() {
        let ctx = setup().await;
        let mut request = send(&ctx, "general question");
        request.car_id = None;

        let sent = ctx.service.send_from_customer(request).await.unwrap();
        assert_eq!(conversation(&ctx, sent.conversation_id).await.car_id, None);
    }

    #[tokio::test]
    async fn test_outsider_cannot_read_conversation() {
        let ctx = setup().await;
        let sent = ctx.service.send_from_customer(send(&ctx, "private")).await.unwrap();

        let err = ctx
            .service
            .list_messages(sent.conversation_id.0, Uuid::new_v4(), ChatRole::Customer)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::NotConversationParticipant)
        ));

        let err = ctx
            .service
            .list_messages(9_999, ctx.customer, ChatRole::Customer)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::ConversationNotFound)
        ));

        // 读取失败不清零
        assert_eq!(conversation(&ctx, sent.conversation_id).await.unread_for_dealer, 1);
    }

    #[tokio::test]
    async fn test_store_outage_leaves_no_partial_state() {
        let ctx = setup().await;
        ctx.store.set_unavailable(true);

        let err = ctx.service.send_from_customer(send(&ctx, "hi")).await.unwrap_err();
        assert!(err.is_store_unavailable());
        assert_eq!(ctx.broadcaster.len(), 0);

        ctx.store.set_unavailable(false);
        assert_eq!(ctx.store.conversation_count().await, 0);
        assert_eq!(ctx.store.message_count().await, 0);

        // 恢复后重试成功
        let sent = ctx.service.send_from_customer(send(&ctx, "hi")).await.unwrap();
        assert_eq!(conversation(&ctx, sent.conversation_id).await.unread_for_dealer, 1);
    }

    /// 第一次按 (customer, dealer) 查询时先让"另一个请求"抢先创建会话，再返回未找到，
    /// 从而稳定地走到唯一约束冲突分支。
    struct RacingConversations {
        inner: Arc<InMemoryChatStore>,
        raced: Mutex<bool>,
    }

    #[async_trait]
    impl ConversationRepository for RacingConversations {
        async fn find_by_id(
            &self,
            id: ConversationId,
        ) -> Result<Option<Conversation>, RepositoryError> {
            ConversationRepository::find_by_id(self.inner.as_ref(), id).await
        }

        async fn find_by_pair(
            &self,
            customer_id: UserId,
            dealer_id: DealerId,
        ) -> Result<Option<Conversation>, RepositoryError> {
            let first_call = {
                let mut raced = self.raced.lock().unwrap();
                !std::mem::replace(&mut *raced, true)
            };
            if first_call {
                self.inner
                    .create(NewConversation {
                        customer_id,
                        dealer_id,
                        car_id: None,
                        created_at: time::OffsetDateTime::UNIX_EPOCH,
                    })
                    .await?;
                return Ok(None);
            }
            self.inner.find_by_pair(customer_id, dealer_id).await
        }

        async fn create(
            &self,
            conversation: NewConversation,
        ) -> Result<Conversation, RepositoryError> {
            self.inner.create(conversation).await
        }

        async fn list_by_customer(
            &self,
            customer_id: UserId,
        ) -> Result<Vec<ConversationSummary>, RepositoryError> {
            self.inner.list_by_customer(customer_id).await
        }

        async fn list_by_dealer(
            &self,
            dealer_id: DealerId,
        ) -> Result<Vec<ConversationSummary>, RepositoryError> {
            self.inner.list_by_dealer(dealer_id).await
        }

        async fn reset_unread(
            &self,
            id: ConversationId,
            side: ChatRole,
        ) -> Result<(), RepositoryError> {
            self.inner.reset_unread(id, side).await
        }

        async fn total_unread_for_customer(
            &self,
            customer_id: UserId,
        ) -> Result<i64, RepositoryError> {
            self.inner.total_unread_for_customer(customer_id).await
        }

        async fn total_unread_for_dealer(
            &self,
            dealer_id: DealerId,
        ) -> Result<i64, RepositoryError> {
            self.inner.total_unread_for_dealer(dealer_id).await
        }
    }

    #[tokio::test]
    async fn test_losing_create_race_reuses_existing_conversation() {
        let ctx = setup().await;
        let racing = Arc::new(RacingConversations {
            inner: ctx.store.clone(),
            raced: Mutex::new(false),
        });
        let service = build_service(ctx.store.clone(), racing, ctx.broadcaster.clone());

        let sent = service.send_from_customer(send(&ctx, "hi")).await.unwrap();

        assert_eq!(ctx.store.conversation_count().await, 1);
        let conv = conversation(&ctx, sent.conversation_id).await;
        assert_eq!(conv.unread_for_dealer, 1);
        assert_eq!(conv.last_message_id, Some(sent.message.id));
    }
}
