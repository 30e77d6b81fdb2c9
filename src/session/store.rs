use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::SessionHandle;

/// 活跃会话表
pub struct SessionStore<O> {
    inner: RwLock<HashMap<String, SessionHandle<O>>>,
}

impl<O> Default for SessionStore<O> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<O: Send + 'static> SessionStore<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 分配会话 ID，`preset` 非空时直接使用
    pub fn next_sid(&self, preset: &str) -> String {
        if preset.is_empty() {
            Uuid::new_v4().simple().to_string()
        } else {
            preset.to_string()
        }
    }

    pub async fn insert(&self, handle: SessionHandle<O>) {
        let mut guard = self.inner.write().await;
        guard.insert(handle.sid().to_string(), handle);
    }

    pub async fn get(&self, sid: &str) -> Option<SessionHandle<O>> {
        let guard = self.inner.read().await;
        guard.get(sid).cloned()
    }

    pub async fn remove(&self, sid: &str) -> Option<SessionHandle<O>> {
        let mut guard = self.inner.write().await;
        guard.remove(sid)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

impl<O: Clone + Send + 'static> SessionStore<O> {
    /// 向所有会话发送停止请求并清空会话表，返回会话数
    pub async fn shutdown(&self, final_msg: Option<O>) -> usize {
        let sessions: Vec<SessionHandle<O>> = {
            let mut guard = self.inner.write().await;
            guard.drain().map(|(_, handle)| handle).collect()
        };

        for handle in &sessions {
            handle.stop(final_msg.clone());
        }

        info!(sessions = sessions.len(), "session store shut down");
        sessions.len()
    }
}
