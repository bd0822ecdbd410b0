// Zipshelf - 工具函数模块
// 提供文件名过滤、格式化等辅助功能

use glob::{MatchOptions, Pattern};
use tracing::warn;

/// 通配过滤器，匹配时忽略大小写
const FILTER_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// 编译文件名过滤模式
///
/// 无效的模式会被记录警告并丢弃，不会中断扫描。
/// 如果列表中包含通配符 `*`，返回 `None` 表示匹配所有文件。
///
/// # 参数
/// * `filters` - Glob 风格的文件名模式（如 `*.pdf`）
///
/// # 返回
/// * `None` - 匹配所有文件（列表为空或包含 `*`）
/// * `Some(Vec<Pattern>)` - 编译后的模式列表
pub fn compile_filters(filters: &[String]) -> Option<Vec<Pattern>> {
    if filters.is_empty() || filters.iter().any(|f| f.trim() == "*") {
        return None;
    }

    let patterns = filters
        .iter()
        .filter_map(|s| match Pattern::new(s.trim()) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(pattern = %s, "invalid filter pattern: {}", e);
                None
            }
        })
        .collect();

    Some(patterns)
}

/// 检查文件名是否匹配任一过滤模式（忽略大小写）
///
/// # 参数
/// * `file_name` - 文件名（不含目录）
/// * `patterns` - 由 [`compile_filters`] 得到的模式；`None` 表示全部匹配
pub fn matches_filters(file_name: &str, patterns: Option<&[Pattern]>) -> bool {
    match patterns {
        None => true,
        Some(patterns) => patterns
            .iter()
            .any(|p| p.matches_with(file_name, FILTER_OPTIONS)),
    }
}

const BYTE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// 字节数转为 B / KB / MB / GB / TB
///
/// # 示例
/// ```
/// use zipshelf::utils::format_bytes;
/// assert_eq!(format_bytes(1024), "1.00 KB");
/// assert_eq!(format_bytes(500), "500 B");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < BYTE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, BYTE_UNITS[unit])
    }
}

/// 有符号的字节差值（节省的空间可能为负）
pub fn format_signed_bytes(bytes: i64) -> String {
    let sign = if bytes < 0 { "-" } else { "" };
    format!("{}{}", sign, format_bytes(bytes.unsigned_abs()))
}

/// 秒数转为 `1h 2m 3s` / `2m 5s` / `45s`
pub fn format_duration(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, secs % 3600 / 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{}s", s),
        (0, _) => format!("{}m {}s", m, s),
        _ => format!("{}h {}m {}s", h, m, s),
    }
}
