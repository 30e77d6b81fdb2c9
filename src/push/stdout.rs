//! 标准输出推送后端，每条回执输出一行 JSON，用于调试与本地联调

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use super::worker::PushQueue;
use super::{PushHandler, Receipt, ReceiptDelivery, ReceiptSender};
use crate::error::{PushError, PushResult};

/// 注册名
pub const STDOUT_ADAPTER: &str = "stdout";

type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

struct LineDelivery {
    writer: SharedWriter,
}

#[async_trait]
impl ReceiptDelivery for LineDelivery {
    async fn deliver(&self, receipt: Arc<Receipt>) -> PushResult<()> {
        let mut line = serde_json::to_vec(receipt.as_ref())?;
        line.push(b'\n');

        // 整行持锁写出，避免并发投递交错
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|err| PushError::Delivery(err.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|err| PushError::Delivery(err.to_string()))
    }
}

pub struct StdoutPush {
    queue: PushQueue,
    writer: SharedWriter,
}

impl StdoutPush {
    pub fn new() -> Self {
        Self::with_writer(tokio::io::stdout())
    }

    pub fn with_writer<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            queue: PushQueue::new(STDOUT_ADAPTER),
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }
}

impl Default for StdoutPush {
    fn default() -> Self {
        Self::new()
    }
}

impl PushHandler for StdoutPush {
    fn init(&self, config: &Value) -> PushResult<()> {
        let writer = Arc::clone(&self.writer);
        self.queue.init(config, move |_| {
            Ok(Arc::new(LineDelivery { writer }) as Arc<dyn ReceiptDelivery>)
        })
    }

    fn is_ready(&self) -> bool {
        self.queue.is_ready()
    }

    fn push(&self) -> Option<ReceiptSender> {
        self.queue.sender()
    }

    fn stop(&self) {
        self.queue.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Uid;
    use crate::push::{DeviceDelivery, Payload};
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn writes_one_json_line_per_receipt() {
        let (client, server) = tokio::io::duplex(4096);
        let push = StdoutPush::with_writer(client);
        push.init(&json!({"enabled": true, "buffer": 4})).unwrap();

        let uid = Uid::new(5);
        let receipt = Receipt::new(Payload::new("topic", uid.user_id(), 3, json!("hey")))
            .with_recipient(uid, DeviceDelivery::default());
        assert!(push.push().unwrap().push(Arc::new(receipt)));

        let mut lines = BufReader::new(server).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["payload"]["seq"], 3);
        assert_eq!(value["payload"]["content"], "hey");

        push.stop();
    }

    #[tokio::test]
    async fn disabled_adapter_has_no_producer() {
        let push = StdoutPush::default();
        push.init(&json!({"enabled": false, "buffer": 4})).unwrap();
        assert!(!push.is_ready());
        assert!(push.push().is_none());
    }
}
