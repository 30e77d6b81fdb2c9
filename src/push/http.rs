use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::worker::PushQueue;
use super::{DeviceDelivery, PushHandler, Receipt, ReceiptDelivery, ReceiptSender};
use crate::directory::{Uid, User, UserDirectory};
use crate::drafty::{DraftyPlainText, PlainTextRenderer};
use crate::error::{PushError, PushResult};
use crate::utils::format_rfc3339;

/// 注册名
pub const HTTP_ADAPTER: &str = "http";

#[derive(Deserialize)]
struct HttpPushConfig {
    #[serde(default, alias = "url")]
    endpoint: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
}

/// 推送文档中的单个收件人
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientEntry {
    pub user: Option<User>,
    pub device: DeviceDelivery,
}

/// 推送文档中的消息摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub topic: String,
    pub from: String,
    pub ts: String,
    pub seq: String,
    pub mime: String,
    pub content: String,
}

/// HTTP 推送请求体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationDocument {
    pub recipients: HashMap<String, RecipientEntry>,
    pub sender: Option<User>,
    pub payload: NotificationPayload,
    pub head: HashMap<String, Value>,
}

/// 单次投递请求
pub struct DeliveryRequest<'a> {
    pub endpoint: &'a Url,
    pub headers: &'a HeaderMap,
    pub document: &'a NotificationDocument,
}

/// 出站投递客户端
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    async fn deliver(&self, request: DeliveryRequest<'_>) -> PushResult<()>;
}

/// 基于 reqwest 的投递客户端
#[derive(Clone)]
pub struct ReqwestDeliveryClient {
    client: Client,
}

impl ReqwestDeliveryClient {
    pub fn new() -> PushResult<Self> {
        let client = Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|err| PushError::InvalidConfig(format!("failed to build http client: {err}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DeliveryClient for ReqwestDeliveryClient {
    async fn deliver(&self, request: DeliveryRequest<'_>) -> PushResult<()> {
        let builder = self
            .client
            .post(request.endpoint.clone())
            .headers(request.headers.clone());

        match builder.json(request.document).send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(PushError::Delivery(format!(
                "endpoint responded with {}",
                resp.status()
            ))),
            Err(err) => Err(PushError::Delivery(err.to_string())),
        }
    }
}

/// 配置中的附加请求头，名称或取值非法时返回 `InvalidConfig`
fn build_headers(raw: &HashMap<String, String>) -> PushResult<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(raw.len());
    for (key, value) in raw {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|err| PushError::InvalidConfig(format!("invalid header name {key:?}: {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| PushError::InvalidConfig(format!("invalid value for header {key}: {err}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// 展示形式：能解析为用户 ID 的转换为展示形式，否则原样保留
fn display_id(id: &str) -> String {
    let uid = Uid::parse_user_id(id);
    if uid.is_zero() {
        id.to_string()
    } else {
        uid.to_string()
    }
}

/// 构造推送文档
///
/// 用户目录查询失败只记录日志，对应资料以 `null` 输出
pub async fn build_notification(
    receipt: &Receipt,
    directory: &dyn UserDirectory,
    renderer: &dyn PlainTextRenderer,
) -> NotificationDocument {
    let payload = &receipt.payload;

    let sender_uid = Uid::parse_user_id(&payload.from);
    let sender = if sender_uid.is_zero() {
        None
    } else {
        match directory.get(sender_uid).await {
            Ok(user) => user,
            Err(err) => {
                warn!(from = %payload.from, error = %err, "failed to resolve push sender");
                None
            }
        }
    };

    let recipient_ids: Vec<Uid> = receipt.to.keys().copied().collect();
    let mut profiles: HashMap<String, User> = match directory.get_all(&recipient_ids).await {
        Ok(users) => users.into_iter().map(|u| (u.id.clone(), u)).collect(),
        Err(err) => {
            warn!(error = %err, "failed to resolve push recipients");
            HashMap::new()
        }
    };

    let recipients = receipt
        .to
        .iter()
        .map(|(uid, device)| {
            let key = uid.to_string();
            let entry = RecipientEntry {
                user: profiles.remove(&key),
                device: device.clone(),
            };
            (key, entry)
        })
        .collect();

    NotificationDocument {
        recipients,
        sender,
        payload: NotificationPayload {
            topic: display_id(&payload.topic),
            from: display_id(&payload.from),
            ts: format_rfc3339(&payload.timestamp),
            seq: payload.seq_id.to_string(),
            mime: payload.content_type.clone(),
            content: renderer.to_plain_text(&payload.content),
        },
        head: payload.head.clone(),
    }
}

struct HttpDelivery {
    endpoint: Url,
    headers: HeaderMap,
    directory: Arc<dyn UserDirectory>,
    renderer: Arc<dyn PlainTextRenderer>,
    client: Arc<dyn DeliveryClient>,
}

#[async_trait]
impl ReceiptDelivery for HttpDelivery {
    async fn deliver(&self, receipt: Arc<Receipt>) -> PushResult<()> {
        debug!(from = %receipt.payload.from, "preparing http push");

        let document =
            build_notification(&receipt, self.directory.as_ref(), self.renderer.as_ref()).await;

        self.client
            .deliver(DeliveryRequest {
                endpoint: &self.endpoint,
                headers: &self.headers,
                document: &document,
            })
            .await?;

        debug!(
            from = %document.payload.from,
            recipients = document.recipients.len(),
            "http push sent"
        );
        Ok(())
    }
}

/// HTTP 推送后端
///
/// 每条回执构造一个 JSON 文档，POST 到配置的 `endpoint`
pub struct HttpPush {
    queue: PushQueue,
    directory: Arc<dyn UserDirectory>,
    renderer: Arc<dyn PlainTextRenderer>,
    client: Arc<dyn DeliveryClient>,
}

impl HttpPush {
    pub fn new(directory: Arc<dyn UserDirectory>) -> PushResult<Self> {
        Ok(Self::with_client(
            directory,
            Arc::new(ReqwestDeliveryClient::new()?),
        ))
    }

    pub fn with_client(directory: Arc<dyn UserDirectory>, client: Arc<dyn DeliveryClient>) -> Self {
        Self {
            queue: PushQueue::new(HTTP_ADAPTER),
            directory,
            renderer: Arc::new(DraftyPlainText),
            client,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn PlainTextRenderer>) -> Self {
        self.renderer = renderer;
        self
    }
}

impl PushHandler for HttpPush {
    fn init(&self, config: &Value) -> PushResult<()> {
        info!("Init HTTP push");

        self.queue.init(config, |raw| {
            let cfg: HttpPushConfig = serde_json::from_value(raw.clone())
                .map_err(|err| PushError::InvalidConfig(err.to_string()))?;
            let endpoint = cfg
                .endpoint
                .ok_or_else(|| PushError::InvalidConfig("missing endpoint".to_string()))?;
            let endpoint = Url::parse(&endpoint)
                .map_err(|err| PushError::InvalidConfig(format!("invalid endpoint: {err}")))?;
            let headers = build_headers(&cfg.headers)?;

            Ok(Arc::new(HttpDelivery {
                endpoint,
                headers,
                directory: Arc::clone(&self.directory),
                renderer: Arc::clone(&self.renderer),
                client: Arc::clone(&self.client),
            }) as Arc<dyn ReceiptDelivery>)
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
