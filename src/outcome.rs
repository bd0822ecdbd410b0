// Zipshelf - 单文件处理结果定义

use std::fmt;
use std::path::PathBuf;

/// 跳过文件的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// 目标压缩包已存在且冲突策略为跳过
    ArchiveExists,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ArchiveExists => f.write_str("archive already exists"),
        }
    }
}

/// 单个文件的处理结果
///
/// 每个文件产生一次，交给会话统计和界面回调后即丢弃。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Success {
        file_name: String,
        archive_path: PathBuf,
        original_size: u64,
        compressed_size: u64,

        /// 原文件移入备份目录后的路径；未能备份时为 `None`
        backup_path: Option<PathBuf>,
    },
    Error {
        file_name: String,
        cause: String,
    },
    Skipped {
        file_name: String,
        reason: SkipReason,
    },
}

impl FileOutcome {
    pub fn file_name(&self) -> &str {
        match self {
            FileOutcome::Success { file_name, .. }
            | FileOutcome::Error { file_name, .. }
            | FileOutcome::Skipped { file_name, .. } => file_name,
        }
    }

    /// 文件状态回调使用的状态字符串
    pub fn status(&self) -> &'static str {
        match self {
            FileOutcome::Success { .. } => "success",
            FileOutcome::Error { .. } => "error",
            FileOutcome::Skipped { .. } => "skip",
        }
    }

    /// 节省的空间（压缩包可能比原文件大，此时为负）
    pub fn size_saved(&self) -> i64 {
        match self {
            FileOutcome::Success {
                original_size,
                compressed_size,
                ..
            } => *original_size as i64 - *compressed_size as i64,
            _ => 0,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FileOutcome::Success { .. })
    }
}
