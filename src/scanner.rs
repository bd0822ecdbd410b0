// Zipshelf - 源文件扫描模块
// 负责遍历源目录，按过滤条件收集待压缩的文件

use crate::activity::ActivityLog;
use crate::utils::{compile_filters, matches_filters};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

/// 扫描发现的单个源文件
///
/// 在扫描时创建，之后不再修改。下游阶段需要新路径时自行计算，不会写回记录。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// 文件的绝对路径
    pub path: PathBuf,

    /// 文件名（含扩展名）
    pub name: String,

    /// 文件大小（字节）
    pub size: u64,

    /// 最后修改时间
    pub modified: SystemTime,

    /// 小写扩展名，带前导点（如 `.pdf`）；没有扩展名时为空字符串
    pub extension: String,

    pub readable: bool,
    pub writable: bool,
}

impl FileRecord {
    /// 从文件路径读取元数据并创建记录
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let meta = fs::metadata(path)?;
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();

        Ok(Self {
            readable: File::open(&path).is_ok(),
            writable: !meta.permissions().readonly(),
            name,
            size: meta.len(),
            modified: meta.modified().unwrap_or_else(|_| SystemTime::now()),
            extension,
            path,
        })
    }

    /// 文件名去掉最后一个扩展名后的部分
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }
}

/// 扫描根目录无效
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("source directory does not exist: {0:?}")]
    Missing(PathBuf),

    #[error("source path is not a directory: {0:?}")]
    NotADirectory(PathBuf),
}

/// 扫描目录并返回符合过滤条件的可读文件
///
/// 根目录不存在或不是目录时记录错误并返回空列表，不会向上抛出。
///
/// # 参数
/// * `root` - 扫描根目录
/// * `recursive` - 是否进入子目录
/// * `filters` - Glob 风格的文件名过滤（忽略大小写，`*` 匹配全部）
/// * `log` - 活动日志
pub fn scan_directory(
    root: &Path,
    recursive: bool,
    filters: &[String],
    log: &ActivityLog,
) -> Vec<FileRecord> {
    match try_scan(root, recursive, filters, log) {
        Ok(files) => files,
        Err(e) => {
            log.error(e.to_string(), Some(root));
            Vec::new()
        }
    }
}

/// 扫描目录，根目录无效时返回 [`ScanError`]
///
/// # 流程
/// 1. 校验根目录
/// 2. 深度优先遍历（非递归时只访问直接子项）
/// 3. 无法读取的子目录记录警告并跳过
/// 4. 按过滤条件筛选文件，不可读的文件记录警告后排除
pub fn try_scan(
    root: &Path,
    recursive: bool,
    filters: &[String],
    log: &ActivityLog,
) -> Result<Vec<FileRecord>, ScanError> {
    if !root.exists() {
        return Err(ScanError::Missing(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }

    let patterns = compile_filters(filters);

    // 不进入链接的目录；按文件名排序使遍历顺序可复现
    let mut walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                let at = err.path().map(Path::to_path_buf);
                log.warning(
                    format!("cannot access {:?}, skipping: {}", at.as_deref().unwrap_or(root), err),
                    at.as_deref(),
                );
                continue;
            }
        };

        if !is_regular_file(&entry) {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if !matches_filters(&name, patterns.as_deref()) {
            continue;
        }

        match FileRecord::from_path(entry.path()) {
            Ok(record) if record.readable => files.push(record),
            Ok(record) => {
                log.warning(format!("file is not readable: {}", record.name), Some(&record.path));
            }
            Err(e) => {
                log.warning(format!("cannot stat {}: {}", name, e), Some(entry.path()));
            }
        }
    }

    log.info(format!("found {} file(s) in {}", files.len(), root.display()));
    Ok(files)
}

/// 扫描结果统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub total_files: usize,
    pub total_size: u64,
    pub average_size: u64,

    /// 各扩展名的文件数量（无扩展名记为 `(none)`）
    pub extensions: BTreeMap<String, usize>,

    pub largest: Option<(String, u64)>,
    pub smallest: Option<(String, u64)>,
}

/// 统计扫描得到的文件列表
pub fn summarize(files: &[FileRecord]) -> ScanSummary {
    let mut summary = ScanSummary {
        total_files: files.len(),
        ..Default::default()
    };

    for f in files {
        summary.total_size += f.size;
        let ext = if f.extension.is_empty() {
            "(none)".to_string()
        } else {
            f.extension.clone()
        };
        *summary.extensions.entry(ext).or_insert(0) += 1;
    }

    if !files.is_empty() {
        summary.average_size = summary.total_size / files.len() as u64;
    }
    summary.largest = files
        .iter()
        .max_by_key(|f| f.size)
        .map(|f| (f.name.clone(), f.size));
    summary.smallest = files
        .iter()
        .min_by_key(|f| f.size)
        .map(|f| (f.name.clone(), f.size));

    summary
}

/// 普通文件，或指向普通文件的符号链接
fn is_regular_file(entry: &DirEntry) -> bool {
    if entry.file_type().is_file() {
        return true;
    }
    entry.path_is_symlink() && fs::metadata(entry.path()).is_ok_and(|m| m.is_file())
}
