//! 推送分发 worker
//!
//! 状态机：Uninitialized → (Disabled | Ready) → Stopped
//!
//! worker 从有界回执队列取消息，每条回执派生一个独立投递任务；
//! 收到停止信号后退出循环，默认不等待进行中的投递。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::{Receipt, ReceiptDelivery, ReceiptSender};
use crate::error::{PushError, PushResult};

/// 输入队列默认容量
pub const DEFAULT_BUFFER: usize = 32;

/// 输入队列容量上限
pub const MAX_BUFFER: usize = 1 << 20;

/// 所有队列型后端共享的配置项
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub buffer: i64,
    /// 停止时等待进行中投递的最长时间，未设置则不等待
    #[serde(default)]
    pub drain_timeout_ms: Option<u64>,
}

impl QueueConfig {
    /// 队列容量，未设置或非正数时使用默认值，超过 `MAX_BUFFER` 视为配置错误
    pub fn capacity(&self) -> PushResult<usize> {
        if self.buffer <= 0 {
            return Ok(DEFAULT_BUFFER);
        }
        usize::try_from(self.buffer)
            .ok()
            .filter(|n| *n <= MAX_BUFFER)
            .ok_or_else(|| {
                PushError::InvalidConfig(format!(
                    "buffer {} exceeds maximum {MAX_BUFFER}",
                    self.buffer
                ))
            })
    }

    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_ms.map(Duration::from_millis)
    }
}

enum QueueState {
    Uninitialized,
    Disabled,
    Ready {
        input: mpsc::Sender<Arc<Receipt>>,
        stop: oneshot::Sender<()>,
    },
    Stopped,
}

/// 队列型后端的公共部分：状态机与 worker 生命周期
pub(crate) struct PushQueue {
    adapter: Arc<str>,
    state: Mutex<QueueState>,
}

impl PushQueue {
    pub(crate) fn new(adapter: &str) -> Self {
        Self {
            adapter: Arc::from(adapter),
            state: Mutex::new(QueueState::Uninitialized),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 初始化队列
    ///
    /// `build` 只在启用时调用，用于解析后端特有配置并构造投递实现；
    /// 任何错误都保持 Uninitialized 状态不变
    pub(crate) fn init<F>(&self, raw: &Value, build: F) -> PushResult<()>
    where
        F: FnOnce(&Value) -> PushResult<Arc<dyn ReceiptDelivery>>,
    {
        let mut state = self.lock_state();
        if !matches!(*state, QueueState::Uninitialized) {
            return Err(PushError::AlreadyInitialized);
        }

        let config: QueueConfig = serde_json::from_value(raw.clone())
            .map_err(|err| PushError::InvalidConfig(err.to_string()))?;

        if !config.enabled {
            info!(adapter = %self.adapter, "push adapter disabled");
            *state = QueueState::Disabled;
            return Ok(());
        }

        let capacity = config.capacity()?;
        let delivery = build(raw)?;
        let runtime = Handle::try_current().map_err(|_| PushError::NoRuntime)?;

        let (input_tx, input_rx) = mpsc::channel(capacity);
        let (stop_tx, stop_rx) = oneshot::channel();

        runtime.spawn(dispatch_loop(
            Arc::clone(&self.adapter),
            input_rx,
            stop_rx,
            delivery,
            config.drain_timeout(),
        ));

        *state = QueueState::Ready {
            input: input_tx,
            stop: stop_tx,
        };
        info!(
            adapter = %self.adapter,
            buffer = capacity,
            "push adapter initialized"
        );
        Ok(())
    }

    pub(crate) fn is_ready(&self) -> bool {
        matches!(*self.lock_state(), QueueState::Ready { .. })
    }

    pub(crate) fn sender(&self) -> Option<ReceiptSender> {
        match &*self.lock_state() {
            QueueState::Ready { input, .. } => {
                Some(ReceiptSender::new(Arc::clone(&self.adapter), input.clone()))
            }
            _ => None,
        }
    }

    pub(crate) fn stop(&self) {
        let mut state = self.lock_state();
        if !matches!(*state, QueueState::Ready { .. }) {
            return;
        }
        if let QueueState::Ready { stop, .. } = std::mem::replace(&mut *state, QueueState::Stopped)
        {
            // worker 已退出时发送失败，无需处理
            let _ = stop.send(());
        }
    }
}

async fn dispatch_loop(
    adapter: Arc<str>,
    mut input: mpsc::Receiver<Arc<Receipt>>,
    mut stop: oneshot::Receiver<()>,
    delivery: Arc<dyn ReceiptDelivery>,
    drain_timeout: Option<Duration>,
) {
    let mut inflight = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut stop => break,
            received = input.recv() => match received {
                Some(receipt) => {
                    let delivery = Arc::clone(&delivery);
                    let adapter = Arc::clone(&adapter);
                    inflight.spawn(async move {
                        if let Err(err) = delivery.deliver(receipt).await {
                            warn!(adapter = %adapter, error = %err, "push delivery failed");
                        }
                    });
                }
                None => break,
            },
            Some(joined) = inflight.join_next() => {
                if let Err(err) = joined {
                    error!(adapter = %adapter, error = %err, "push delivery task aborted");
                }
            }
        }
    }

    if let Some(timeout) = drain_timeout {
        let drained = tokio::time::timeout(timeout, async {
            while inflight.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                adapter = %adapter,
                remaining = inflight.len(),
                "push drain timed out, detaching in-flight deliveries"
            );
        }
    }
    inflight.detach_all();

    info!(adapter = %adapter, "push worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::Payload;
    use async_trait::async_trait;
    use serde_json::json;

    struct Recorder {
        seen: mpsc::UnboundedSender<i64>,
    }

    #[async_trait]
    impl ReceiptDelivery for Recorder {
        async fn deliver(&self, receipt: Arc<Receipt>) -> PushResult<()> {
            let _ = self.seen.send(receipt.payload.seq_id);
            Ok(())
        }
    }

    fn receipt(seq: i64) -> Arc<Receipt> {
        Arc::new(Receipt::new(Payload::new("topic", "from", seq, json!(null))))
    }

    #[test]
    fn capacity_falls_back_to_default() {
        let cfg: QueueConfig = serde_json::from_value(json!({"enabled": true})).unwrap();
        assert_eq!(cfg.capacity().unwrap(), DEFAULT_BUFFER);
        let cfg: QueueConfig =
            serde_json::from_value(json!({"enabled": true, "buffer": -3})).unwrap();
        assert_eq!(cfg.capacity().unwrap(), DEFAULT_BUFFER);
        let cfg: QueueConfig =
            serde_json::from_value(json!({"enabled": true, "buffer": 2})).unwrap();
        assert_eq!(cfg.capacity().unwrap(), 2);
    }

    #[tokio::test]
    async fn oversized_buffer_is_rejected() {
        let queue = PushQueue::new("test");
        let err = queue
            .init(&json!({"enabled": true, "buffer": i64::MAX}), |_| unreachable!())
            .unwrap_err();
        assert!(matches!(err, PushError::InvalidConfig(_)));
        assert!(!queue.is_ready());

        // 配置错误后仍处于未初始化状态
        let (tx, _rx) = mpsc::unbounded_channel();
        queue
            .init(&json!({"enabled": true, "buffer": MAX_BUFFER}), |_| {
                Ok(Arc::new(Recorder { seen: tx }) as Arc<dyn ReceiptDelivery>)
            })
            .unwrap();
        assert!(queue.is_ready());
        queue.stop();
    }

    #[tokio::test]
    async fn init_outside_of_uninitialized_is_rejected() {
        let queue = PushQueue::new("test");
        let (tx, _rx) = mpsc::unbounded_channel();
        queue
            .init(&json!({"enabled": true, "buffer": 4}), |_| {
                Ok(Arc::new(Recorder { seen: tx }) as Arc<dyn ReceiptDelivery>)
            })
            .unwrap();

        let err = queue
            .init(&json!({"enabled": false}), |_| unreachable!())
            .unwrap_err();
        assert!(matches!(err, PushError::AlreadyInitialized));
        assert!(queue.is_ready());
    }

    #[tokio::test]
    async fn malformed_config_keeps_queue_uninitialized() {
        let queue = PushQueue::new("test");
        let err = queue
            .init(&json!({"enabled": "yes"}), |_| unreachable!())
            .unwrap_err();
        assert!(matches!(err, PushError::InvalidConfig(_)));

        // 失败后仍可重新初始化
        queue.init(&json!({"enabled": false}), |_| unreachable!()).unwrap();
        assert!(!queue.is_ready());
        assert!(queue.sender().is_none());
    }

    #[test]
    fn init_without_runtime_fails() {
        let queue = PushQueue::new("test");
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = queue
            .init(&json!({"enabled": true}), |_| {
                Ok(Arc::new(Recorder { seen: tx }) as Arc<dyn ReceiptDelivery>)
            })
            .unwrap_err();
        assert!(matches!(err, PushError::NoRuntime));
        assert!(!queue.is_ready());
    }

    #[tokio::test]
    async fn worker_fans_out_and_stops() {
        let queue = PushQueue::new("test");
        let (tx, mut rx) = mpsc::unbounded_channel();
        queue
            .init(&json!({"enabled": true, "buffer": 8}), |_| {
                Ok(Arc::new(Recorder { seen: tx }) as Arc<dyn ReceiptDelivery>)
            })
            .unwrap();

        let sender = queue.sender().unwrap();
        assert!(sender.push(receipt(1)));
        assert!(sender.push(receipt(2)));

        let mut seen = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        seen.sort();
        assert_eq!(seen, vec![1, 2]);

        queue.stop();
        assert!(!queue.is_ready());
        assert!(queue.sender().is_none());

        // 停止后生产端不会阻塞，最终丢弃回执
        tokio::time::timeout(Duration::from_secs(1), async {
            while sender.push(receipt(3)) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    /// 每次投递耗时 `delay`，完成后上报序号
    struct Slow {
        delay: Duration,
        seen: mpsc::UnboundedSender<i64>,
    }

    #[async_trait]
    impl ReceiptDelivery for Slow {
        async fn deliver(&self, receipt: Arc<Receipt>) -> PushResult<()> {
            tokio::time::sleep(self.delay).await;
            let _ = self.seen.send(receipt.payload.seq_id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn stop_waits_for_inflight_within_drain_timeout() {
        let queue = PushQueue::new("test");
        let (tx, mut rx) = mpsc::unbounded_channel();
        queue
            .init(
                &json!({"enabled": true, "buffer": 4, "drain_timeout_ms": 500}),
                |_| {
                    Ok(Arc::new(Slow {
                        delay: Duration::from_millis(50),
                        seen: tx,
                    }) as Arc<dyn ReceiptDelivery>)
                },
            )
            .unwrap();

        assert!(queue.sender().unwrap().push(receipt(1)));
        // 让 worker 先取走回执
        tokio::task::yield_now().await;
        queue.stop();

        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert_eq!(got.unwrap(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn drain_timeout_detaches_slow_deliveries() {
        let queue = PushQueue::new("test");
        let (tx, mut rx) = mpsc::unbounded_channel();
        queue
            .init(
                &json!({"enabled": true, "buffer": 4, "drain_timeout_ms": 20}),
                |_| {
                    Ok(Arc::new(Slow {
                        delay: Duration::from_secs(60),
                        seen: tx,
                    }) as Arc<dyn ReceiptDelivery>)
                },
            )
            .unwrap();

        let sender = queue.sender().unwrap();
        assert!(sender.push(receipt(7)));
        tokio::task::yield_now().await;
        queue.stop();

        // 超过 drain 超时后 worker 退出并释放输入队列，分离的投递仍在后台完成
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!sender.push(receipt(8)));
        assert!(rx.try_recv().is_err());

        let got = tokio::time::timeout(Duration::from_secs(120), rx.recv()).await;
        assert_eq!(got.unwrap(), Some(7));
    }
}
