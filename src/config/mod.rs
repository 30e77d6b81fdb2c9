//! Flare IM Transport 配置模块
//!
//! 该模块提供传输层与推送子系统的配置定义及加载功能，包括：
//! - 配置文件加载和解析
//! - 环境特定配置覆盖
//! - 会话、gRPC 监听、推送适配器、日志配置

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::warn;

mod manager;
pub use manager::ConfigManager;

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 优先）
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub with_target: bool,
    #[serde(default)]
    pub with_thread_ids: bool,
    #[serde(default)]
    pub with_file: bool,
    #[serde(default)]
    pub with_line_number: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
        }
    }
}

/// 会话配置
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// 出站消息队列容量
    #[serde(default = "default_send_queue_limit")]
    pub send_queue_limit: usize,
    /// 退订队列容量
    #[serde(default = "default_detach_queue_limit")]
    pub detach_queue_limit: usize,
}

fn default_send_queue_limit() -> usize {
    128
}

fn default_detach_queue_limit() -> usize {
    64
}

/// 会话队列容量上限
pub const MAX_QUEUE_LIMIT: usize = 1 << 20;

impl SessionConfig {
    /// 出站队列容量，限制在 `1..=MAX_QUEUE_LIMIT`
    pub fn send_capacity(&self) -> usize {
        self.send_queue_limit.clamp(1, MAX_QUEUE_LIMIT)
    }

    /// 退订队列容量，限制在 `1..=MAX_QUEUE_LIMIT`
    pub fn detach_capacity(&self) -> usize {
        self.detach_queue_limit.clamp(1, MAX_QUEUE_LIMIT)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("send_queue_limit", self.send_queue_limit),
            ("detach_queue_limit", self.detach_queue_limit),
        ] {
            if value == 0 || value > MAX_QUEUE_LIMIT {
                return Err(anyhow!(
                    "session.{name} must be within 1..={MAX_QUEUE_LIMIT}, got {value}"
                ));
            }
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            send_queue_limit: default_send_queue_limit(),
            detach_queue_limit: default_detach_queue_limit(),
        }
    }
}

/// gRPC 监听配置
#[derive(Debug, Clone, Deserialize)]
pub struct GrpcListenerConfig {
    /// 监听地址
    pub listen: String,
    /// 服务端空闲探活间隔（秒）
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,
    /// 探活响应超时（秒）
    #[serde(default = "default_keepalive_timeout")]
    pub keepalive_timeout_secs: u64,
    /// TCP keepalive（秒）
    #[serde(default)]
    pub tcp_keepalive_secs: Option<u64>,
}

fn default_keepalive_interval() -> u64 {
    60
}

fn default_keepalive_timeout() -> u64 {
    20
}

impl GrpcListenerConfig {
    /// 按配置构造 tonic 服务端 builder
    pub fn server_builder(&self) -> tonic::transport::Server {
        tonic::transport::Server::builder()
            .http2_keepalive_interval(Some(Duration::from_secs(self.keepalive_interval_secs)))
            .http2_keepalive_timeout(Some(Duration::from_secs(self.keepalive_timeout_secs)))
            .tcp_keepalive(self.tcp_keepalive_secs.map(Duration::from_secs))
    }
}

/// 推送适配器配置
///
/// `config` 原样交给同名后端的 `init`
#[derive(Debug, Clone, Deserialize)]
pub struct PushAdapterConfig {
    pub name: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TransportAppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub grpc: Option<GrpcListenerConfig>,
    #[serde(default)]
    pub push: Vec<PushAdapterConfig>,
}

impl TransportAppConfig {
    /// 从 TOML 字符串解析
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("invalid config format")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.session.validate()
    }
}

/// 加载配置
///
/// 未指定路径时依次尝试 `config.toml`、`config/base.toml`，全部失败则使用默认配置
pub fn load_config(path: Option<&str>) -> TransportAppConfig {
    let candidates: Vec<PathBuf> = match path {
        Some(p) => vec![PathBuf::from(p)],
        None => vec![PathBuf::from("config.toml"), PathBuf::from("config/base.toml")],
    };

    for candidate in &candidates {
        match load_config_from_file(candidate) {
            Ok(cfg) => return cfg,
            Err(err) => warn!("failed to load config from {}: {err:#}", candidate.display()),
        }
    }

    warn!("no configuration source succeeded, falling back to defaults");
    TransportAppConfig::default()
}

/// 从文件加载配置，并合并环境特定覆盖
pub fn load_config_from_file(path: &Path) -> Result<TransportAppConfig> {
    if !path.exists() {
        return Err(anyhow!(
            "configuration path {} does not exist",
            path.display()
        ));
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config file: {}", path.display()))?;
    let mut merged: toml::Value = toml::from_str(&content)
        .with_context(|| format!("invalid TOML content in {}", path.display()))?;

    if let Err(e) = ConfigManager::load_environment_config(&mut merged) {
        warn!("failed to load environment config: {e:#}");
    }

    let config: TransportAppConfig = merged
        .try_into()
        .with_context(|| format!("invalid configuration after merging {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let cfg = TransportAppConfig::from_toml_str(
            r#"
            [logging]
            level = "debug"

            [session]
            send_queue_limit = 16

            [grpc]
            listen = "0.0.0.0:16060"
            tcp_keepalive_secs = 30

            [[push]]
            name = "http"
            config = { enabled = true, buffer = 8, endpoint = "http://localhost:9000/push" }

            [[push]]
            name = "stdout"
            config = { enabled = false }
            "#,
        )
        .unwrap();

        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.session.send_queue_limit, 16);
        assert_eq!(cfg.session.detach_queue_limit, 64);

        let grpc = cfg.grpc.unwrap();
        assert_eq!(grpc.listen, "0.0.0.0:16060");
        assert_eq!(grpc.keepalive_interval_secs, 60);
        assert_eq!(grpc.keepalive_timeout_secs, 20);
        assert_eq!(grpc.tcp_keepalive_secs, Some(30));

        assert_eq!(cfg.push.len(), 2);
        assert_eq!(cfg.push[0].name, "http");
        assert_eq!(cfg.push[0].config["buffer"], 8);
        assert_eq!(cfg.push[1].config["enabled"], false);
    }

    #[test]
    fn out_of_range_queue_limits_are_rejected() {
        let err = TransportAppConfig::from_toml_str("[session]\nsend_queue_limit = 0").unwrap_err();
        assert!(err.to_string().contains("send_queue_limit"));

        let err = TransportAppConfig::from_toml_str(
            "[session]\ndetach_queue_limit = 9223372036854775807",
        )
        .unwrap_err();
        assert!(err.to_string().contains("detach_queue_limit"));

        // 直接构造的配置在建队列时被限制
        let cfg = SessionConfig {
            send_queue_limit: usize::MAX,
            detach_queue_limit: 0,
        };
        assert_eq!(cfg.send_capacity(), MAX_QUEUE_LIMIT);
        assert_eq!(cfg.detach_capacity(), 1);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = TransportAppConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.session.send_queue_limit, 128);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.grpc.is_none());
        assert!(cfg.push.is_empty());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = load_config(Some("/definitely/not/here.toml"));
        assert!(cfg.push.is_empty());
    }
}
