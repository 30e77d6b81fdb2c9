//! 用户目录模块
//!
//! - `Uid`：64 位用户 ID 及其展示形式
//! - `UserDirectory`：外部用户资料查询接口
//! - `InMemoryUserDirectory`：内存实现，用于嵌入场景与测试

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::PushResult;

const USER_ID_PREFIX: &str = "usr";

/// 用户 ID
///
/// 展示形式为小端 8 字节的无填充 URL-safe base64，零值展示为空字符串
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Uid(u64);

impl Uid {
    pub const ZERO: Uid = Uid(0);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// 解析展示形式（不带前缀），失败返回零值
    pub fn parse(s: &str) -> Uid {
        let Ok(bytes) = URL_SAFE_NO_PAD.decode(s) else {
            return Uid::ZERO;
        };
        match <[u8; 8]>::try_from(bytes.as_slice()) {
            Ok(buf) => Uid(u64::from_le_bytes(buf)),
            Err(_) => Uid::ZERO,
        }
    }

    /// 解析 `usr` 前缀形式，失败返回零值
    pub fn parse_user_id(s: &str) -> Uid {
        match s.strip_prefix(USER_ID_PREFIX) {
            Some(rest) => Uid::parse(rest),
            None => Uid::ZERO,
        }
    }

    /// 带 `usr` 前缀的形式
    pub fn user_id(&self) -> String {
        if self.is_zero() {
            return String::new();
        }
        format!("{USER_ID_PREFIX}{self}")
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return Ok(());
        }
        f.write_str(&URL_SAFE_NO_PAD.encode(self.0.to_le_bytes()))
    }
}

impl Serialize for Uid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Uid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Uid::parse(&s))
    }
}

/// 用户资料
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl User {
    pub fn new(uid: Uid) -> Self {
        Self {
            id: uid.to_string(),
            created_at: Utc::now(),
            public: None,
            tags: Vec::new(),
        }
    }

    pub fn with_public(mut self, public: serde_json::Value) -> Self {
        self.public = Some(public);
        self
    }
}

/// 用户目录
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// 查询单个用户，不存在返回 `None`
    async fn get(&self, uid: Uid) -> PushResult<Option<User>>;

    /// 批量查询，只返回存在的用户
    async fn get_all(&self, uids: &[Uid]) -> PushResult<Vec<User>>;
}

#[derive(Default)]
pub struct InMemoryUserDirectory {
    inner: RwLock<HashMap<Uid, User>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, uid: Uid, user: User) {
        self.inner.write().await.insert(uid, user);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get(&self, uid: Uid) -> PushResult<Option<User>> {
        Ok(self.inner.read().await.get(&uid).cloned())
    }

    async fn get_all(&self, uids: &[Uid]) -> PushResult<Vec<User>> {
        let guard = self.inner.read().await;
        Ok(uids.iter().filter_map(|uid| guard.get(uid).cloned()).collect())
    }
}
