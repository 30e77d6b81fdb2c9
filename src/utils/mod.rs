//! 工具函数模块
//!
//! 提供日志截断、时间格式化等通用工具函数

use chrono::{DateTime, SecondsFormat, Utc};

/// 日志中单条消息的最大长度
pub const MAX_LOG_MESSAGE_LEN: usize = 256;

/// 截断过长的日志内容，按字符边界截断并追加省略号
pub fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }

    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// RFC3339 格式化（秒精度，UTC 使用 `Z` 后缀）
pub fn format_rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
