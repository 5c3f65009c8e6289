use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    services::{ChatService, ChatServiceDependencies},
    ConnectionHub, HubSettings, InMemoryChatStore, SystemClock,
};
use domain::{Car, CarId, Dealer, DealerId, UserId};
use tokio::{net::TcpListener, sync::oneshot};
use uuid::Uuid;
use web_api::{router, AppState, JwtConfig, JwtService};

pub const SECRET: &str = "integration-test-secret-with-32-plus-chars";

/// 已启动的测试服务器和预置数据
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub store: Arc<InMemoryChatStore>,
    pub dealer: Dealer,
    pub car: Car,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws(&self, token: &str) -> String {
        format!("ws://{}/ws/chat?token={}", self.addr, token)
    }

    pub fn token(&self, user_id: Uuid, role: &str) -> String {
        self.state
            .jwt_service
            .generate_token(user_id, role)
            .expect("token")
    }

    pub fn dealer_token(&self) -> String {
        self.token(self.dealer.user_id.0, "dealer")
    }

    /// 等待连接在注册表中生效
    pub async fn wait_online(&self, user_id: Uuid) {
        for _ in 0..100 {
            if self.state.hub.is_online(UserId::from(user_id)).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("user {user_id} never came online");
    }
}

pub async fn spawn_server() -> TestServer {
    let store = Arc::new(InMemoryChatStore::new());
    let dealer = Dealer {
        id: DealerId::from(Uuid::new_v4()),
        user_id: UserId::from(Uuid::new_v4()),
        shop_name: "Test Motors".to_string(),
        is_approved: true,
    };
    let car = Car {
        id: CarId::from(Uuid::new_v4()),
        dealer_id: dealer.id,
        brand: "Mazda".to_string(),
        model_name: "CX-5".to_string(),
    };
    store.insert_dealer(dealer.clone()).await;
    store.insert_car(car.clone()).await;

    let hub = Arc::new(ConnectionHub::new(HubSettings::default()));
    let chat_service = ChatService::new(ChatServiceDependencies {
        conversation_repository: store.clone(),
        message_repository: store.clone(),
        dealer_repository: store.clone(),
        car_repository: store.clone(),
        clock: Arc::new(SystemClock),
        broadcaster: hub.clone(),
    });
    let jwt_service = Arc::new(JwtService::new(JwtConfig {
        secret: SECRET.to_string(),
        expiration_hours: 1,
    }));
    let state = AppState::new(
        Arc::new(chat_service),
        hub,
        jwt_service,
        Duration::from_secs(5),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let app = router(state.clone());

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    TestServer {
        addr,
        state,
        store,
        dealer,
        car,
        _shutdown: shutdown_tx,
    }
}
