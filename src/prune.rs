// Zipshelf - 日志清理模块
// 按保留数量删除最旧的滚动日志文件

use crate::logging::LOG_FILE_PREFIX;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// 查找日志目录中的所有日志文件
///
/// # 返回
/// * `Ok(Vec<PathBuf>)` - 按时间顺序排列的日志文件（最旧的在前）
/// * `Err(anyhow::Error)` - 读取目录失败
pub fn find_log_files(log_dir: &Path) -> Result<Vec<PathBuf>> {
    if !log_dir.exists() {
        return Ok(Vec::new());
    }

    let mut logs: Vec<PathBuf> = fs::read_dir(log_dir)
        .context("Cannot read log directory")?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX))
        })
        .collect();

    // 文件名后缀是日期，按名称排序即按时间排序
    logs.sort();

    Ok(logs)
}

/// 删除最旧的日志文件，保留最新的 `keep` 个
///
/// # 返回
/// * `Ok(Vec<PathBuf>)` - 已删除（`dry_run` 时为将要删除）的文件
/// * `Err(anyhow::Error)` - 读取或删除失败
pub fn prune_logs(log_dir: &Path, keep: usize, dry_run: bool) -> Result<Vec<PathBuf>> {
    let logs = find_log_files(log_dir)?;
    if logs.len() <= keep {
        return Ok(Vec::new());
    }

    let to_delete = logs[..logs.len() - keep].to_vec();
    if !dry_run {
        for path in &to_delete {
            fs::remove_file(path)
                .with_context(|| format!("Failed to delete log file {:?}", path))?;
        }
    }

    Ok(to_delete)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_logs(dir: &Path, days: &[&str]) {
        for day in days {
            fs::write(dir.join(format!("{}.{}", LOG_FILE_PREFIX, day)), day).unwrap();
        }
        fs::write(dir.join("notes.txt"), "not a log").unwrap();
    }

    #[test]
    fn keeps_newest() {
        let dir = TempDir::new().unwrap();
        write_logs(dir.path(), &["2024-01-03", "2024-01-01", "2024-01-02"]);

        let deleted = prune_logs(dir.path(), 2, false).unwrap();
        assert_eq!(deleted, vec![dir.path().join("zipshelf.log.2024-01-01")]);

        let left = find_log_files(dir.path()).unwrap();
        assert_eq!(left.len(), 2);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn dry_run_deletes_nothing() {
        let dir = TempDir::new().unwrap();
        write_logs(dir.path(), &["2024-01-01", "2024-01-02"]);

        assert_eq!(prune_logs(dir.path(), 0, true).unwrap().len(), 2);
        assert_eq!(find_log_files(dir.path()).unwrap().len(), 2);
    }

    #[test]
    fn missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(prune_logs(&dir.path().join("none"), 1, false).unwrap().is_empty());
    }
}
