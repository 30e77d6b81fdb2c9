use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{PushHandler, Receipt};
use crate::config::PushAdapterConfig;
use crate::error::{PushError, PushResult};

/// 推送后端注册表
///
/// 启动期通过 `PushRegistryBuilder` 构建，之后只读，按引用传给需要查找后端的组件
pub struct PushRegistry {
    handlers: HashMap<String, Arc<dyn PushHandler>>,
}

#[derive(Default)]
pub struct PushRegistryBuilder {
    handlers: HashMap<String, Arc<dyn PushHandler>>,
}

impl PushRegistryBuilder {
    /// 注册后端，同名重复注册直接失败
    pub fn register<N: Into<String>>(
        mut self,
        name: N,
        handler: Arc<dyn PushHandler>,
    ) -> PushResult<Self> {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(PushError::DuplicateAdapter(name));
        }
        debug!(adapter = %name, "push adapter registered");
        self.handlers.insert(name, handler);
        Ok(self)
    }

    pub fn build(self) -> Arc<PushRegistry> {
        Arc::new(PushRegistry {
            handlers: self.handlers,
        })
    }
}

impl PushRegistry {
    pub fn builder() -> PushRegistryBuilder {
        PushRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PushHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// 按配置初始化后端
    ///
    /// 遇到第一个错误即停止全部后端并返回该错误，已启动的 worker 不会残留
    pub fn init_all(&self, configs: &[PushAdapterConfig]) -> PushResult<()> {
        if let Err(err) = self.init_each(configs) {
            warn!(error = %err, "push adapter init failed, stopping all adapters");
            self.stop_all();
            return Err(err);
        }
        info!(
            ready = self.handlers.values().filter(|h| h.is_ready()).count(),
            "push adapters initialized"
        );
        Ok(())
    }

    fn init_each(&self, configs: &[PushAdapterConfig]) -> PushResult<()> {
        for entry in configs {
            let handler = self
                .handlers
                .get(&entry.name)
                .ok_or_else(|| PushError::UnknownAdapter(entry.name.clone()))?;
            handler.init(&entry.config)?;
        }
        Ok(())
    }

    /// 投递给所有就绪后端，返回成功入队的后端数
    pub fn push<R: Into<Arc<Receipt>>>(&self, receipt: R) -> usize {
        let receipt = receipt.into();
        self.handlers
            .values()
            .filter_map(|handler| handler.push())
            .filter(|sender| sender.push(Arc::clone(&receipt)))
            .count()
    }

    pub fn stop_all(&self) {
        for (name, handler) in &self.handlers {
            debug!(adapter = %name, "stopping push adapter");
            handler.stop();
        }
    }
}
