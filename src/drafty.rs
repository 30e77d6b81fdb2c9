//! 富文本转纯文本
//!
//! 推送通知只携带纯文本内容，富文本渲染由外部实现，这里提供默认实现

use serde_json::Value;

/// 富文本内容渲染器
pub trait PlainTextRenderer: Send + Sync {
    fn to_plain_text(&self, content: &Value) -> String;
}

/// 默认渲染器
///
/// - 字符串原样返回
/// - Drafty 对象取 `txt` 字段
/// - 其余内容返回空字符串
#[derive(Debug, Default, Clone, Copy)]
pub struct DraftyPlainText;

impl PlainTextRenderer for DraftyPlainText {
    fn to_plain_text(&self, content: &Value) -> String {
        match content {
            Value::String(s) => s.clone(),
            Value::Object(map) => map
                .get("txt")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_plain_and_drafty_content() {
        let renderer = DraftyPlainText;
        assert_eq!(renderer.to_plain_text(&json!("hello")), "hello");
        assert_eq!(
            renderer.to_plain_text(&json!({
                "txt": "this is bold",
                "fmt": [{"at": 8, "len": 4, "tp": "ST"}]
            })),
            "this is bold"
        );
        assert_eq!(renderer.to_plain_text(&json!({"ent": []})), "");
        assert_eq!(renderer.to_plain_text(&json!(42)), "");
    }
}
