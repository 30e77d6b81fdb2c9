//! Flare IM 传输层核心库
//!
//! 提供连接会话的读写任务协调、gRPC 双向流接入，以及可插拔的推送通知分发

pub mod config;
pub mod directory;
pub mod drafty;
pub mod error;
pub mod grpc;
pub mod push;
pub mod session;
pub mod tracing;
pub mod utils;

pub use config::{
    ConfigManager, GrpcListenerConfig, LoggingConfig, PushAdapterConfig, SessionConfig,
    TransportAppConfig, load_config, load_config_from_file,
};
pub use directory::{InMemoryUserDirectory, Uid, User, UserDirectory};
pub use drafty::{DraftyPlainText, PlainTextRenderer};
pub use error::*;
pub use grpc::{GrpcNode, MessageStream};
pub use push::{
    DeviceDelivery, HttpPush, Payload, PushHandler, PushRegistry, Receipt, ReceiptSender,
    StdoutPush,
};
pub use session::{
    InboundStream, OutboundSink, Protocol, Session, SessionHandle, SessionHandler, SessionInfo,
    SessionStore, SessionTasks,
};
