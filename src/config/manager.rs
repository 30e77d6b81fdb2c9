//! 配置管理器 - 负责处理不同环境下的配置覆盖
//!
//! 根据 `FLARE_ENV` 加载 `config/environments/{env}.toml` 并按表合并到基础配置

use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use toml::Value;

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取当前环境名称
    ///
    /// 从环境变量 FLARE_ENV 获取，未设置时默认为 "development"
    pub fn get_environment() -> String {
        env::var("FLARE_ENV").unwrap_or_else(|_| "development".to_string())
    }

    /// 根据环境加载特定配置并合并到 `base`
    pub fn load_environment_config(base: &mut Value) -> Result<()> {
        let env_config_path = format!("config/environments/{}.toml", Self::get_environment());
        Self::load_overlay(base, Path::new(&env_config_path))
    }

    /// 加载覆盖文件，不存在时忽略
    pub fn load_overlay(base: &mut Value, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("无法读取环境配置文件: {}", path.display()))?;
        let overlay: Value = toml::from_str(&content)
            .with_context(|| format!("无效的环境配置格式: {}", path.display()))?;

        Self::merge_value(base, overlay);
        Ok(())
    }

    /// 合并值：表按键递归合并，其余类型直接覆盖
    pub fn merge_value(base: &mut Value, overlay: Value) {
        match overlay {
            Value::Table(overlay_table) => {
                if let Value::Table(base_table) = base {
                    for (key, overlay_value) in overlay_table {
                        match base_table.get_mut(&key) {
                            Some(base_value) => Self::merge_value(base_value, overlay_value),
                            None => {
                                base_table.insert(key, overlay_value);
                            }
                        }
                    }
                } else {
                    *base = Value::Table(overlay_table);
                }
            }
            other => *base = other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overrides_nested_keys_only() {
        let mut base: Value = toml::from_str(
            r#"
            [session]
            send_queue_limit = 128
            detach_queue_limit = 64
            "#,
        )
        .unwrap();
        let overlay: Value = toml::from_str(
            r#"
            [session]
            send_queue_limit = 8
            [logging]
            level = "warn"
            "#,
        )
        .unwrap();

        ConfigManager::merge_value(&mut base, overlay);

        assert_eq!(base["session"]["send_queue_limit"].as_integer(), Some(8));
        assert_eq!(base["session"]["detach_queue_limit"].as_integer(), Some(64));
        assert_eq!(base["logging"]["level"].as_str(), Some("warn"));
    }

    #[test]
    fn missing_overlay_is_ignored() {
        let mut base: Value = toml::from_str("a = 1").unwrap();
        ConfigManager::load_overlay(&mut base, Path::new("/no/such/overlay.toml")).unwrap();
        assert_eq!(base["a"].as_integer(), Some(1));
    }
}
