//! gRPC 双向流接入
//!
//! `GrpcNode` 把每个 `MessageLoop` 调用绑定为一个会话：请求流作为读端，
//! 响应流由会话写任务驱动。生成的服务 trait 实现只需转发到 `message_loop`。

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::debug;

use crate::config::SessionConfig;
use crate::session::{
    GrpcSink, InboundStream, Protocol, Session, SessionHandle, SessionHandler, SessionInfo,
    SessionStore,
};

/// 响应流类型
pub type MessageStream<S> = ReceiverStream<Result<S, Status>>;

/// 会话结束时从会话表移除，再交给外部清理
struct StoreCleanup<H: SessionHandler> {
    inner: Arc<H>,
    store: Arc<SessionStore<H::Outbound>>,
}

#[async_trait]
impl<H: SessionHandler> SessionHandler for StoreCleanup<H> {
    type Inbound = H::Inbound;
    type Outbound = H::Outbound;

    async fn dispatch(&self, session: &SessionHandle<Self::Outbound>, msg: Self::Inbound) {
        self.inner.dispatch(session, msg).await;
    }

    async fn del_sub(&self, session: &SessionInfo, topic: String) {
        self.inner.del_sub(session, topic).await;
    }

    async fn clean_up(&self, session: &SessionInfo, abnormal: bool) {
        self.store.remove(&session.sid).await;
        self.inner.clean_up(session, abnormal).await;
    }
}

/// gRPC 节点服务
pub struct GrpcNode<H: SessionHandler> {
    store: Arc<SessionStore<H::Outbound>>,
    handler: Arc<H>,
    config: SessionConfig,
}

impl<H: SessionHandler> GrpcNode<H> {
    pub fn new(
        store: Arc<SessionStore<H::Outbound>>,
        handler: Arc<H>,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            handler,
            config,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore<H::Outbound>> {
        &self.store
    }

    /// 处理一次 `MessageLoop` 调用
    pub async fn message_loop(
        &self,
        request: Request<Streaming<H::Inbound>>,
    ) -> Result<Response<MessageStream<H::Outbound>>, Status> {
        let remote_addr = request.remote_addr();
        let stream = self.attach(request.into_inner(), remote_addr).await;
        Ok(Response::new(stream))
    }

    /// 以任意入站流建立会话，返回驱动响应的出站流
    ///
    /// 会话先登记到会话表再启动任务，清理时从会话表移除
    pub async fn attach<R>(
        &self,
        inbound: R,
        remote_addr: Option<SocketAddr>,
    ) -> MessageStream<H::Outbound>
    where
        R: InboundStream<Message = H::Inbound>,
    {
        let (tx, rx) = mpsc::channel(self.config.send_capacity());
        let info = SessionInfo::new(self.store.next_sid(""), Protocol::Grpc)
            .with_remote_addr(remote_addr);
        debug!(sid = %info.sid, remote = ?remote_addr, "grpc session accepted");

        let (_session, handle, pending) = Session::open(info, GrpcSink::new(tx), &self.config);
        self.store.insert(handle).await;

        let _tasks = pending.start(
            inbound,
            Arc::new(StoreCleanup {
                inner: Arc::clone(&self.handler),
                store: Arc::clone(&self.store),
            }),
        );

        ReceiverStream::new(rx)
    }
}
