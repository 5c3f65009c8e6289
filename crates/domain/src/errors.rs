//! 领域模型错误定义
//!
//! 定义了聊天子系统中所有可能的错误类型，提供清晰的错误上下文。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 参数校验失败
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// 经销商不存在
    #[error("dealer not found")]
    DealerNotFound,

    /// 当前用户没有经销商资料
    #[error("dealer profile not found")]
    DealerProfileNotFound,

    /// 经销商尚未通过审核，不能收发聊天消息
    #[error("dealer is not approved")]
    DealerNotApproved,

    /// 车辆不存在
    #[error("car not found")]
    CarNotFound,

    /// 会话不存在
    #[error("conversation not found")]
    ConversationNotFound,

    /// 调用者不是该会话的参与方
    #[error("caller is not a participant of the conversation")]
    NotConversationParticipant,
}

impl DomainError {
    /// 创建参数校验错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 存储层错误
///
/// `Conflict` 专门表示唯一约束冲突，调用方据此区分"并发创建失败"和其他写入失败。
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,

    #[error("unique constraint violated")]
    Conflict,

    #[error("storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}
