// Zipshelf - 命名冲突处理模块
// 当目标路径已存在时，根据策略决定最终路径或取消操作

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// 顺序编号的最大尝试次数，超过后改用时间戳后缀
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// 冲突处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// 自动生成不冲突的新名称
    #[default]
    Rename,

    /// 覆盖已存在的文件
    Overwrite,

    /// 跳过该文件
    Skip,

    /// 询问用户；核心层没有交互通道，按 `Rename` 处理
    Ask,
}

impl ConflictPolicy {
    pub const ALL: [ConflictPolicy; 4] = [
        ConflictPolicy::Rename,
        ConflictPolicy::Overwrite,
        ConflictPolicy::Skip,
        ConflictPolicy::Ask,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::Rename => "rename",
            ConflictPolicy::Overwrite => "overwrite",
            ConflictPolicy::Skip => "skip",
            ConflictPolicy::Ask => "ask",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rename" => Ok(ConflictPolicy::Rename),
            "overwrite" => Ok(ConflictPolicy::Overwrite),
            "skip" => Ok(ConflictPolicy::Skip),
            "ask" => Ok(ConflictPolicy::Ask),
            other => Err(format!("unknown conflict policy: {}", other)),
        }
    }
}

/// 解决路径冲突
///
/// 只做存在性检查，不写入任何文件。
///
/// # 参数
/// * `candidate` - 期望使用的路径
/// * `policy` - 冲突处理策略
///
/// # 返回
/// * `Some(PathBuf)` - 最终使用的路径（路径不存在时即为 `candidate`）
/// * `None` - 操作被取消（`Skip` 策略）
pub fn resolve(candidate: &Path, policy: ConflictPolicy) -> Option<PathBuf> {
    if !candidate.exists() {
        return Some(candidate.to_path_buf());
    }

    match policy {
        ConflictPolicy::Overwrite => Some(candidate.to_path_buf()),
        ConflictPolicy::Skip => None,
        ConflictPolicy::Rename | ConflictPolicy::Ask => Some(unique_name(candidate)),
    }
}

/// 生成不冲突的文件名
///
/// 依次尝试 `{stem}_1{ext}`、`{stem}_2{ext}` ……，
/// 超过 9999 次后使用时间戳后缀以保证结束。
pub fn unique_name(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    for n in 1..=MAX_RENAME_ATTEMPTS {
        let next = parent.join(format!("{}_{}{}", stem, n, ext));
        if !next.exists() {
            return next;
        }
    }

    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    debug!(path = %path.display(), "rename attempts exhausted, using timestamp suffix");
    parent.join(format!("{}_{}{}", stem, stamp, ext))
}

/// 目标路径相对于源文件的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    /// 目标路径不存在
    Free,

    /// 目标路径就是源文件本身（名称没有变化）
    Unchanged,

    /// 目标路径被其他文件占用
    Conflict,
}

/// 判断 `candidate` 是否与其他文件冲突
///
/// 目标与源文件是同一路径时报告 [`TargetStatus::Unchanged`] 而不是冲突。
pub fn classify(source: &Path, candidate: &Path) -> TargetStatus {
    if candidate == source {
        return TargetStatus::Unchanged;
    }
    if !candidate.exists() {
        return TargetStatus::Free;
    }
    match (source.canonicalize(), candidate.canonicalize()) {
        (Ok(a), Ok(b)) if a == b => TargetStatus::Unchanged,
        _ => TargetStatus::Conflict,
    }
}
