//! 连接会话模块
//!
//! 每个连接对应一个会话，会话运行两个任务：
//! - 读任务：阻塞读取入站消息，同步交给 `SessionHandler::dispatch`
//! - 写任务：在出站队列、停止信号、退订信号三者之间 `select!`
//!
//! 两个任务之间唯一共享的可变状态是加锁的传输句柄，其 `Some → None` 转换只发生一次

mod store;
mod task;
mod transport;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

pub use store::SessionStore;
pub use task::{PendingSession, ReadExit, Session, SessionTasks, WriteExit};
pub use transport::{GrpcSink, InboundStream, OutboundSink};

/// 连接协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Grpc,
    Websocket,
    LongPoll,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Grpc => "grpc",
            Protocol::Websocket => "ws",
            Protocol::LongPoll => "lp",
        };
        f.write_str(name)
    }
}

/// 会话标识信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub sid: String,
    pub proto: Protocol,
    pub remote_addr: Option<SocketAddr>,
}

impl SessionInfo {
    pub fn new<S: Into<String>>(sid: S, proto: Protocol) -> Self {
        Self {
            sid: sid.into(),
            proto,
            remote_addr: None,
        }
    }

    pub fn with_remote_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.remote_addr = addr;
        self
    }
}

/// 会话的外部协作方：命令分发、订阅管理与清理
#[async_trait]
pub trait SessionHandler: Send + Sync + 'static {
    type Inbound: fmt::Debug + Send + 'static;
    type Outbound: Send + 'static;

    /// 处理一条入站消息，返回前读任务不会读取下一条
    async fn dispatch(&self, session: &SessionHandle<Self::Outbound>, msg: Self::Inbound);

    /// 退订主题
    async fn del_sub(&self, session: &SessionInfo, topic: String);

    /// 会话结束，`abnormal` 表示读端因传输错误退出
    async fn clean_up(&self, session: &SessionInfo, abnormal: bool);
}

/// 会话的生产端句柄
///
/// 可任意克隆，所有克隆都释放后出站队列关闭，写任务随之退出
pub struct SessionHandle<O> {
    info: Arc<SessionInfo>,
    send: mpsc::Sender<O>,
    stop: mpsc::Sender<Option<O>>,
    detach: mpsc::Sender<String>,
}

impl<O> Clone for SessionHandle<O> {
    fn clone(&self) -> Self {
        Self {
            info: Arc::clone(&self.info),
            send: self.send.clone(),
            stop: self.stop.clone(),
            detach: self.detach.clone(),
        }
    }
}

impl<O> fmt::Debug for SessionHandle<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("sid", &self.info.sid)
            .field("proto", &self.info.proto)
            .finish()
    }
}

impl<O: Send + 'static> SessionHandle<O> {
    pub(crate) fn new(
        info: Arc<SessionInfo>,
        send: mpsc::Sender<O>,
        stop: mpsc::Sender<Option<O>>,
        detach: mpsc::Sender<String>,
    ) -> Self {
        Self {
            info,
            send,
            stop,
            detach,
        }
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn sid(&self) -> &str {
        &self.info.sid
    }

    /// 出站消息入队，队列满或写任务已退出时丢弃
    pub fn queue_out(&self, msg: O) -> bool {
        match self.send.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(sid = %self.info.sid, "session send queue full, message dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(sid = %self.info.sid, "session closed, message dropped");
                false
            }
        }
    }

    /// 请求写任务退出，可附带一条尽力发送的最终消息
    ///
    /// 已有停止请求在途时返回 `false`
    pub fn stop(&self, final_msg: Option<O>) -> bool {
        self.stop.try_send(final_msg).is_ok()
    }

    /// 请求写任务退订主题
    pub fn detach<T: Into<String>>(&self, topic: T) -> bool {
        match self.detach.try_send(topic.into()) {
            Ok(()) => true,
            Err(err) => {
                warn!(sid = %self.info.sid, error = %err, "failed to queue detach");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.send.is_closed()
    }
}
