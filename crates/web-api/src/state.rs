use std::{sync::Arc, time::Duration};

use application::{ChatService, ConnectionHub};

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ChatService>,
    pub hub: Arc<ConnectionHub>,
    pub jwt_service: Arc<JwtService>,
    /// 单次 WebSocket 写入的超时
    pub write_timeout: Duration,
}

impl AppState {
    pub fn new(
        chat_service: Arc<ChatService>,
        hub: Arc<ConnectionHub>,
        jwt_service: Arc<JwtService>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            chat_service,
            hub,
            jwt_service,
            write_timeout,
        }
    }
}
