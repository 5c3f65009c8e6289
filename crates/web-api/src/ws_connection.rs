use std::time::Duration;

use application::ChatEvent;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::UserId;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tokio::{sync::mpsc, time::timeout};

use crate::state::AppState;

/// WebSocket 连接
///
/// 连接建立后向注册表登记为该用户的当前连接，之后：
/// - 写任务把注册表推来的事件序列化后写给客户端，同时负责回复 pong
/// - 读任务只处理关闭和心跳，客户端发来的文本帧忽略
///
/// 任一任务结束即视为连接断开，使用登记时拿到的代次注销，
/// 不会影响同一用户之后建立的新连接。
pub struct WebSocketConnection {
    state: AppState,
    user_id: UserId,
}

impl WebSocketConnection {
    pub fn new(state: AppState, user_id: UserId) -> Self {
        Self { state, user_id }
    }

    pub async fn run(self, socket: WebSocket) {
        let hub = self.state.hub.clone();
        let user_id = self.user_id;
        let write_timeout = self.state.write_timeout;

        let (outbound_tx, mut outbound_rx) = hub.outbound_channel();
        let generation = hub.register(user_id, outbound_tx).await;
        tracing::info!(user_id = %user_id, generation = %generation, "WebSocket 连接已建立");

        let (mut sender, mut incoming) = socket.split();

        // 读任务通过 channel 请求写操作，所有写入都在写任务里完成
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        let mut send_task = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    Some(cmd) = cmd_rx.recv() => match cmd {
                        WsCommand::SendPong(data) => WsMessage::Pong(data.into()),
                    },
                    event = outbound_rx.recv() => match event {
                        Some(event) => match encode_event(&event) {
                            Some(frame) => frame,
                            None => continue,
                        },
                        None => {
                            // 注册表不再持有发送端：被新连接取代
                            tracing::info!(user_id = %user_id, "connection superseded, closing");
                            let _ = write_frame(&mut sender, WsMessage::Close(None), write_timeout).await;
                            break;
                        }
                    },
                };

                if let Err(reason) = write_frame(&mut sender, frame, write_timeout).await {
                    tracing::warn!(user_id = %user_id, reason, "WebSocket 写入失败，关闭连接");
                    break;
                }
            }
        });

        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(message)) = incoming.next().await {
                if Self::handle_incoming(message, &cmd_tx).await.is_err() {
                    break;
                }
            }
        });

        // 等待任意一个任务完成（连接断开）
        tokio::select! {
            _ = &mut send_task => {
                tracing::debug!(user_id = %user_id, "WebSocket发送任务完成");
                recv_task.abort();
            }
            _ = &mut recv_task => {
                tracing::debug!(user_id = %user_id, "WebSocket接收任务完成");
                send_task.abort();
            }
        }

        hub.unregister(user_id, generation).await;
        tracing::info!(user_id = %user_id, generation = %generation, "WebSocket连接已断开");
    }

    /// 处理来自客户端的消息
    async fn handle_incoming(
        message: WsMessage,
        cmd_tx: &mpsc::Sender<WsCommand>,
    ) -> Result<(), ()> {
        match message {
            WsMessage::Close(_) => {
                tracing::debug!("WebSocket收到关闭消息");
                return Err(());
            }
            WsMessage::Ping(data) => {
                if cmd_tx
                    .send(WsCommand::SendPong(data.to_vec()))
                    .await
                    .is_err()
                {
                    return Err(());
                }
            }
            WsMessage::Pong(_) => {}
            WsMessage::Text(_) | WsMessage::Binary(_) => {
                // 推送是单向的
                tracing::debug!("忽略客户端消息");
            }
        }
        Ok(())
    }
}

fn encode_event(event: &ChatEvent) -> Option<WsMessage> {
    match serde_json::to_string(event) {
        Ok(json) => Some(WsMessage::Text(json.into())),
        Err(err) => {
            tracing::warn!(error = %err, "failed to serialize websocket payload");
            None
        }
    }
}

async fn write_frame(
    sender: &mut SplitSink<WebSocket, WsMessage>,
    frame: WsMessage,
    write_timeout: Duration,
) -> Result<(), &'static str> {
    match timeout(write_timeout, sender.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err("send failed"),
        Err(_) => Err("write timed out"),
    }
}

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    SendPong(Vec<u8>),
}
