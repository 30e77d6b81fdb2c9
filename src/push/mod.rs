//! 推送通知分发模块
//!
//! - `Receipt` / `Payload`：待推送的消息及其收件人集合
//! - `PushHandler`：按名称注册的推送后端能力集合
//! - `PushRegistry`：启动期构建、运行期只读的后端注册表
//! - 每个启用的后端拥有一个分发 worker，按回执逐条派生独立的投递任务

mod http;
mod registry;
mod stdout;
mod worker;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::directory::Uid;
use crate::error::PushResult;

pub use http::{
    DeliveryClient, DeliveryRequest, HTTP_ADAPTER, HttpPush, NotificationDocument, NotificationPayload,
    RecipientEntry, ReqwestDeliveryClient, build_notification,
};
pub use registry::{PushRegistry, PushRegistryBuilder};
pub use stdout::{STDOUT_ADAPTER, StdoutPush};
pub use worker::{DEFAULT_BUFFER, QueueConfig};

/// 单个收件人的设备投递描述
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDelivery {
    /// 已在线送达的会话数
    #[serde(default)]
    pub delivered: u32,
    /// 需要推送的设备 ID
    #[serde(default)]
    pub devices: Vec<String>,
}

/// 推送内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub topic: String,
    pub from: String,
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "seq")]
    pub seq_id: i64,
    #[serde(rename = "mime", default)]
    pub content_type: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub head: HashMap<String, Value>,
}

impl Payload {
    pub fn new<T: Into<String>, F: Into<String>>(
        topic: T,
        from: F,
        seq_id: i64,
        content: Value,
    ) -> Self {
        Self {
            topic: topic.into(),
            from: from.into(),
            timestamp: Utc::now(),
            seq_id,
            content_type: String::new(),
            content,
            head: HashMap::new(),
        }
    }

    pub fn with_content_type<T: Into<String>>(mut self, mime: T) -> Self {
        self.content_type = mime.into();
        self
    }

    pub fn with_head(mut self, head: HashMap<String, Value>) -> Self {
        self.head = head;
        self
    }
}

/// 推送回执：消息及其已解析的收件人集合
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub to: HashMap<Uid, DeviceDelivery>,
    pub payload: Payload,
}

impl Receipt {
    pub fn new(payload: Payload) -> Self {
        Self {
            to: HashMap::new(),
            payload,
        }
    }

    pub fn with_recipient(mut self, uid: Uid, device: DeviceDelivery) -> Self {
        self.to.insert(uid, device);
        self
    }
}

/// 推送队列的生产端
///
/// 非阻塞、尽力而为：队列已满或已关闭时丢弃回执并返回 `false`
#[derive(Clone, Debug)]
pub struct ReceiptSender {
    adapter: Arc<str>,
    tx: mpsc::Sender<Arc<Receipt>>,
}

impl ReceiptSender {
    pub(crate) fn new(adapter: Arc<str>, tx: mpsc::Sender<Arc<Receipt>>) -> Self {
        Self { adapter, tx }
    }

    pub fn push(&self, receipt: Arc<Receipt>) -> bool {
        match self.tx.try_send(receipt) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(adapter = %self.adapter, "push queue full, receipt dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(adapter = %self.adapter, "push queue closed, receipt dropped");
                false
            }
        }
    }

    pub fn adapter(&self) -> &str {
        &self.adapter
    }
}

/// 推送后端
pub trait PushHandler: Send + Sync {
    /// 按配置初始化，重复调用返回 `PushError::AlreadyInitialized`
    fn init(&self, config: &Value) -> PushResult<()>;

    /// 已启用且队列已分配
    fn is_ready(&self) -> bool;

    /// 生产端句柄，未就绪时为 `None`
    fn push(&self) -> Option<ReceiptSender>;

    /// 通知 worker 退出，不等待进行中的投递
    fn stop(&self);
}

/// 单条回执的投递实现
#[async_trait]
pub trait ReceiptDelivery: Send + Sync + 'static {
    async fn deliver(&self, receipt: Arc<Receipt>) -> PushResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn receipt_serializes_with_wire_names() {
        let uid = Uid::new(7);
        let receipt = Receipt::new(
            Payload::new("p2pAAAAAAAAAAA", uid.user_id(), 12, json!("hi"))
                .with_content_type("text/plain"),
        )
        .with_recipient(
            uid,
            DeviceDelivery {
                delivered: 1,
                devices: vec!["dev-1".into()],
            },
        );

        let value = serde_json::to_value(&receipt).unwrap();
        assert_eq!(value["payload"]["seq"], 12);
        assert_eq!(value["payload"]["mime"], "text/plain");
        assert_eq!(value["to"][uid.to_string()]["devices"][0], "dev-1");
        assert!(value["payload"].get("head").is_none());
    }

    #[tokio::test]
    async fn receipt_sender_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let sender = ReceiptSender::new(Arc::from("test"), tx);
        let receipt = Arc::new(Receipt::new(Payload::new("t", "f", 1, json!(null))));

        assert!(sender.push(receipt.clone()));
        assert!(!sender.push(receipt.clone()));

        rx.recv().await.unwrap();
        drop(rx);
        assert!(!sender.push(receipt));
    }
}
