//! 会话传输抽象
//!
//! 读端是阻塞式的入站流，写端是可克隆的出站句柄；两者都只关心单一的消息类型

use async_trait::async_trait;
use tokio::sync::mpsc;
use tonic::{Status, Streaming};

use crate::error::{TransportError, TransportResult};

/// 入站流
///
/// `Ok(None)` 表示对端正常结束
#[async_trait]
pub trait InboundStream: Send + 'static {
    type Message: Send + 'static;

    async fn recv(&mut self) -> TransportResult<Option<Self::Message>>;
}

#[async_trait]
impl<T: Send + 'static> InboundStream for Streaming<T> {
    type Message = T;

    async fn recv(&mut self) -> TransportResult<Option<T>> {
        Ok(self.message().await?)
    }
}

#[async_trait]
impl<T: Send + 'static> InboundStream for mpsc::Receiver<Result<T, TransportError>> {
    type Message = T;

    async fn recv(&mut self) -> TransportResult<Option<T>> {
        mpsc::Receiver::recv(self).await.transpose()
    }
}

/// 出站句柄
///
/// 发送操作只接受 `Message` 一种类型
#[async_trait]
pub trait OutboundSink: Clone + Send + Sync + 'static {
    type Message: Send + 'static;

    async fn send(&self, msg: Self::Message) -> TransportResult<()>;
}

#[async_trait]
impl<T: Send + 'static> OutboundSink for mpsc::Sender<T> {
    type Message = T;

    async fn send(&self, msg: T) -> TransportResult<()> {
        mpsc::Sender::send(self, msg)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// gRPC 双向流的响应端
///
/// 所有克隆都释放后，响应流随之结束
pub struct GrpcSink<T> {
    tx: mpsc::Sender<Result<T, Status>>,
}

impl<T> GrpcSink<T> {
    pub fn new(tx: mpsc::Sender<Result<T, Status>>) -> Self {
        Self { tx }
    }
}

impl<T> Clone for GrpcSink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> OutboundSink for GrpcSink<T> {
    type Message = T;

    async fn send(&self, msg: T) -> TransportResult<()> {
        self.tx
            .send(Ok(msg))
            .await
            .map_err(|_| TransportError::Closed)
    }
}
