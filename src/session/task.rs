use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use super::transport::{InboundStream, OutboundSink};
use super::{SessionHandle, SessionHandler, SessionInfo};
use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::utils::{MAX_LOG_MESSAGE_LEN, truncate_for_log};

/// 读任务退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadExit {
    /// 对端正常结束
    EndOfStream,
    /// 传输句柄已被写任务释放
    TransportClosed,
    /// 读取出错
    TransportError,
}

impl ReadExit {
    pub fn is_abnormal(self) -> bool {
        matches!(self, ReadExit::TransportError)
    }
}

/// 写任务退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteExit {
    /// 出站队列的生产端全部释放
    QueueClosed,
    /// 收到停止信号
    Stopped,
    /// 发送出错
    TransportError,
}

/// 单个连接的会话状态
pub struct Session<W> {
    info: Arc<SessionInfo>,
    transport: Mutex<Option<W>>,
}

impl<W: OutboundSink> Session<W> {
    /// 创建会话及其生产端句柄，任务在 `PendingSession::start` 时才启动
    pub fn open(
        info: SessionInfo,
        sink: W,
        config: &SessionConfig,
    ) -> (Arc<Self>, SessionHandle<W::Message>, PendingSession<W>) {
        let info = Arc::new(info);
        let (send_tx, send_rx) = mpsc::channel(config.send_capacity());
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (detach_tx, detach_rx) = mpsc::channel(config.detach_capacity());

        let session = Arc::new(Self {
            info: Arc::clone(&info),
            transport: Mutex::new(Some(sink)),
        });
        let handle = SessionHandle::new(info, send_tx, stop_tx, detach_tx);
        let pending = PendingSession {
            session: Arc::clone(&session),
            handle: handle.clone(),
            send_rx,
            stop_rx,
            detach_rx,
        };
        (session, handle, pending)
    }

    /// `open` 之后立即启动两个任务
    pub fn spawn<R, H>(
        info: SessionInfo,
        inbound: R,
        sink: W,
        handler: Arc<H>,
        config: &SessionConfig,
    ) -> (Arc<Self>, SessionHandle<W::Message>, SessionTasks)
    where
        H: SessionHandler<Outbound = W::Message>,
        R: InboundStream<Message = H::Inbound>,
    {
        let (session, handle, pending) = Self::open(info, sink, config);
        let tasks = pending.start(inbound, handler);
        (session, handle, tasks)
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn sid(&self) -> &str {
        &self.info.sid
    }

    pub async fn is_connected(&self) -> bool {
        self.transport.lock().await.is_some()
    }

    /// 释放传输句柄，只有真正完成 `Some → None` 转换的调用返回 `true`
    pub async fn close_transport(&self) -> bool {
        let released = self.transport.lock().await.take().is_some();
        if released {
            debug!(sid = %self.info.sid, proto = %self.info.proto, "transport released");
        }
        released
    }

    /// 通过传输句柄发送，句柄已释放时静默跳过
    async fn write(&self, msg: W::Message) -> Result<(), TransportError> {
        let sink = self.transport.lock().await.clone();
        match sink {
            Some(sink) => sink.send(msg).await,
            None => Ok(()),
        }
    }
}

/// 已创建但尚未启动任务的会话
pub struct PendingSession<W: OutboundSink> {
    session: Arc<Session<W>>,
    handle: SessionHandle<W::Message>,
    send_rx: mpsc::Receiver<W::Message>,
    stop_rx: mpsc::Receiver<Option<W::Message>>,
    detach_rx: mpsc::Receiver<String>,
}

impl<W: OutboundSink> PendingSession<W> {
    pub fn start<R, H>(self, inbound: R, handler: Arc<H>) -> SessionTasks
    where
        H: SessionHandler<Outbound = W::Message>,
        R: InboundStream<Message = H::Inbound>,
    {
        let Self {
            session,
            handle,
            send_rx,
            stop_rx,
            detach_rx,
        } = self;

        info!(sid = %session.sid(), proto = %session.info.proto, "session started");

        let write = tokio::spawn(write_loop(
            Arc::clone(&session),
            send_rx,
            stop_rx,
            detach_rx,
            Arc::clone(&handler),
        ));
        let read = tokio::spawn(async move {
            let exit = read_loop(&session, inbound, &handle, handler.as_ref()).await;

            session.close_transport().await;
            handle.stop(None);
            drop(handle);
            handler.clean_up(&session.info, exit.is_abnormal()).await;

            info!(sid = %session.sid(), exit = ?exit, "session closed");
            exit
        });

        SessionTasks { read, write }
    }
}

/// 会话的两个任务
pub struct SessionTasks {
    read: JoinHandle<ReadExit>,
    write: JoinHandle<WriteExit>,
}

impl SessionTasks {
    /// 等待两个任务都退出
    pub async fn join(self) -> Result<(ReadExit, WriteExit), JoinError> {
        tokio::try_join!(self.read, self.write)
    }

    /// 带超时等待，超时后任务继续在后台运行
    pub async fn join_timeout(
        self,
        timeout: Duration,
    ) -> Option<Result<(ReadExit, WriteExit), JoinError>> {
        tokio::time::timeout(timeout, self.join()).await.ok()
    }

    pub fn is_finished(&self) -> bool {
        self.read.is_finished() && self.write.is_finished()
    }
}

async fn read_loop<W, R, H>(
    session: &Session<W>,
    mut inbound: R,
    handle: &SessionHandle<W::Message>,
    handler: &H,
) -> ReadExit
where
    W: OutboundSink,
    H: SessionHandler<Outbound = W::Message>,
    R: InboundStream<Message = H::Inbound>,
{
    loop {
        let msg = match inbound.recv().await {
            Ok(Some(msg)) => msg,
            Ok(None) => return ReadExit::EndOfStream,
            Err(err) => {
                warn!(sid = %session.sid(), error = %err, "transport recv failed");
                return ReadExit::TransportError;
            }
        };

        debug!(
            sid = %session.sid(),
            msg = %truncate_for_log(&format!("{msg:?}"), MAX_LOG_MESSAGE_LEN),
            "inbound"
        );
        handler.dispatch(handle, msg).await;

        if !session.is_connected().await {
            return ReadExit::TransportClosed;
        }
    }
}

async fn write_loop<W, H>(
    session: Arc<Session<W>>,
    mut send_rx: mpsc::Receiver<W::Message>,
    mut stop_rx: mpsc::Receiver<Option<W::Message>>,
    mut detach_rx: mpsc::Receiver<String>,
    handler: Arc<H>,
) -> WriteExit
where
    W: OutboundSink,
    H: SessionHandler<Outbound = W::Message>,
{
    let exit = loop {
        tokio::select! {
            msg = send_rx.recv() => match msg {
                Some(msg) => {
                    if let Err(err) = session.write(msg).await {
                        warn!(sid = %session.sid(), error = %err, "transport send failed");
                        break WriteExit::TransportError;
                    }
                }
                None => break WriteExit::QueueClosed,
            },
            Some(final_msg) = stop_rx.recv() => {
                if let Some(msg) = final_msg {
                    // 停止时不关心最终消息是否送达
                    let _ = session.write(msg).await;
                }
                break WriteExit::Stopped;
            }
            Some(topic) = detach_rx.recv() => {
                handler.del_sub(&session.info, topic).await;
            }
        }
    };

    session.close_transport().await;
    debug!(sid = %session.sid(), exit = ?exit, "write task exited");
    exit
}
