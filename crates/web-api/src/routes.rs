use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use application::services::{ReplyMessageRequest, SendMessageRequest, SentMessage};
use domain::{ChatRole, ConversationId, ConversationSummary, Message, UserId};

use crate::{auth::AuthUser, error::ApiError, state::AppState, ws_connection::WebSocketConnection};

#[derive(Debug, Deserialize)]
struct SendMessagePayload {
    dealer_id: Uuid,
    car_id: Option<Uuid>,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ReplyPayload {
    content: String,
}

#[derive(Debug, Serialize)]
struct SendResponse {
    message: &'static str,
    conversation_id: ConversationId,
    data: Message,
}

impl SendResponse {
    fn new(message: &'static str, sent: SentMessage) -> Self {
        Self {
            message,
            conversation_id: sent.conversation_id,
            data: sent.message,
        }
    }
}

#[derive(Debug, Serialize)]
struct UnreadCountResponse {
    unread_count: i64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws/chat", get(websocket_upgrade))
        .nest("/api/chat", chat_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn chat_routes() -> Router<AppState> {
    Router::new()
        .route("/send", post(send_message))
        .route("/reply/{conversation_id}", post(reply_message))
        .route("/conversations", get(list_conversations))
        .route(
            "/conversations/{conversation_id}/messages",
            get(list_messages),
        )
        .route("/unread-count", get(unread_count))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn send_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<SendMessagePayload>,
) -> Result<Json<SendResponse>, ApiError> {
    let sent = state
        .chat_service
        .send_from_customer(SendMessageRequest {
            customer_id: auth.user_id,
            dealer_id: payload.dealer_id,
            car_id: payload.car_id,
            content: payload.content,
        })
        .await?;

    Ok(Json(SendResponse::new("sent", sent)))
}

async fn reply_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(conversation_id): Path<i64>,
    Json(payload): Json<ReplyPayload>,
) -> Result<Json<SendResponse>, ApiError> {
    if auth.role != ChatRole::Dealer {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "USE_SEND_ENDPOINT",
            "Use /api/chat/send for customers",
        ));
    }

    let sent = state
        .chat_service
        .reply_from_dealer(ReplyMessageRequest {
            dealer_user_id: auth.user_id,
            conversation_id,
            content: payload.content,
        })
        .await?;

    Ok(Json(SendResponse::new("replied", sent)))
}

async fn list_conversations(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let conversations = state
        .chat_service
        .list_conversations(auth.user_id, auth.role)
        .await?;
    Ok(Json(conversations))
}

async fn list_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(conversation_id): Path<i64>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let messages = state
        .chat_service
        .list_messages(conversation_id, auth.user_id, auth.role)
        .await?;
    Ok(Json(messages))
}

async fn unread_count(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let unread_count = state
        .chat_service
        .total_unread(auth.user_id, auth.role)
        .await?;
    Ok(Json(UnreadCountResponse { unread_count }))
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: String,
}

/// 升级前先校验 token，失败直接返回 401，不建立连接
async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let claims = state.jwt_service.verify_token(&query.token)?;
    let user_id = UserId::from(claims.user_id);

    Ok(ws.on_upgrade(move |socket| WebSocketConnection::new(state, user_id).run(socket)))
}
