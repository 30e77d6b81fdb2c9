//! 统一错误类型模块
//!
//! - `TransportError`：会话读写链路上的传输错误
//! - `PushError`：推送后端初始化、注册与投递错误

use thiserror::Error;

/// 会话传输错误
#[derive(Debug, Error)]
pub enum TransportError {
    /// 对端或本端已关闭流
    #[error("transport closed")]
    Closed,

    /// gRPC 状态错误
    #[error("grpc status: {0}")]
    Status(#[from] tonic::Status),

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for tonic::Status {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => tonic::Status::cancelled(err.to_string()),
            TransportError::Status(status) => status,
            TransportError::Io(e) => tonic::Status::unavailable(format!("io error: {}", e)),
        }
    }
}

/// 推送子系统错误
#[derive(Debug, Error)]
pub enum PushError {
    /// 重复初始化
    #[error("already initialized")]
    AlreadyInitialized,

    /// 配置无效
    #[error("failed to parse config: {0}")]
    InvalidConfig(String),

    /// 同名适配器重复注册
    #[error("push adapter already registered: {0}")]
    DuplicateAdapter(String),

    /// 未注册的适配器
    #[error("unknown push adapter: {0}")]
    UnknownAdapter(String),

    /// 当前线程不在 tokio 运行时内
    #[error("push worker requires a running tokio runtime")]
    NoRuntime,

    /// 用户目录查询失败
    #[error("user directory error: {0}")]
    Directory(String),

    /// 投递失败
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// 序列化失败
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// 推送子系统结果类型
pub type PushResult<T> = Result<T, PushError>;

/// 传输结果类型
pub type TransportResult<T> = Result<T, TransportError>;
