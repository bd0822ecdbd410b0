// Zipshelf - 备份移动模块
// 负责将已压缩的原文件移入备份目录，并记录移动操作以便回滚

use crate::activity::ActivityLog;
use crate::conflict::{self, ConflictPolicy};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 一次成功的移动记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOperation {
    /// 原文件位置
    pub original: PathBuf,

    /// 移动后在备份目录中的位置
    pub backup: PathBuf,
}

#[derive(Debug, Error)]
pub enum RelocateError {
    #[error("source file does not exist: {0:?}")]
    Missing(PathBuf),

    #[error("backup folder {path:?} is not usable: {source}")]
    BackupRoot { path: PathBuf, source: io::Error },

    #[error("failed to move {from:?} to {to:?}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
}

/// 回滚结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub restored: usize,
    pub failed: usize,
}

/// 备份移动器
///
/// 移动记录只由持有者（批处理执行器的顺序循环）修改。
#[derive(Debug, Default)]
pub struct BackupRelocator {
    operations: Vec<BackupOperation>,
    log: ActivityLog,
}

impl BackupRelocator {
    pub fn new(log: ActivityLog) -> Self {
        Self {
            operations: Vec::new(),
            log,
        }
    }

    /// 已记录的移动操作（按发生顺序）
    pub fn operations(&self) -> &[BackupOperation] {
        &self.operations
    }

    /// 清空移动记录，不改动任何文件
    pub fn reset(&mut self) {
        self.operations.clear();
    }

    /// 将文件移入备份目录
    ///
    /// # 参数
    /// * `source` - 要移动的文件
    /// * `backup_root` - 备份目录（不存在时自动创建）
    /// * `policy` - 备份目录中同名文件的处理策略
    ///
    /// # 返回
    /// * `Ok(Some(PathBuf))` - 文件最终所在路径
    /// * `Ok(None)` - 同名文件已存在且策略为跳过，文件未移动
    /// * `Err(RelocateError)` - 备份目录不可用或移动失败
    pub fn relocate(
        &mut self,
        source: &Path,
        backup_root: &Path,
        policy: ConflictPolicy,
    ) -> Result<Option<PathBuf>, RelocateError> {
        if !source.exists() {
            return Err(RelocateError::Missing(source.to_path_buf()));
        }

        ensure_backup_root(backup_root)?;

        let Some(file_name) = source.file_name() else {
            return Err(RelocateError::Missing(source.to_path_buf()));
        };
        let candidate = backup_root.join(file_name);

        let Some(destination) = conflict::resolve(&candidate, policy) else {
            self.log.warning(
                format!(
                    "backup skipped, {} already exists in backup folder",
                    file_name.to_string_lossy()
                ),
                Some(source),
            );
            return Ok(None);
        };

        move_file(source, &destination).map_err(|e| RelocateError::Move {
            from: source.to_path_buf(),
            to: destination.clone(),
            source: e,
        })?;

        self.operations.push(BackupOperation {
            original: source.to_path_buf(),
            backup: destination.clone(),
        });
        self.log.success(
            format!("moved to backup: {}", file_name.to_string_lossy()),
            Some(&destination),
        );

        Ok(Some(destination))
    }

    /// 按相反顺序把所有已备份的文件移回原位置
    ///
    /// 单个文件失败只记录错误，继续处理其余记录；结束后清空记录。
    pub fn rollback_all(&mut self) -> RollbackReport {
        let mut report = RollbackReport::default();

        for op in self.operations.drain(..).rev() {
            let name = op
                .original
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let result = if !op.backup.exists() {
                Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    "backup copy no longer exists",
                ))
            } else if op.original.exists() {
                Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "original location is occupied",
                ))
            } else {
                op.original
                    .parent()
                    .map(fs::create_dir_all)
                    .unwrap_or(Ok(()))
                    .and_then(|_| move_file(&op.backup, &op.original))
            };

            match result {
                Ok(()) => {
                    report.restored += 1;
                    self.log.info(format!("rolled back: {}", name));
                }
                Err(e) => {
                    report.failed += 1;
                    self.log.error(
                        format!("rollback failed for {}: {}", name, e),
                        Some(&op.backup),
                    );
                }
            }
        }

        report
    }
}

/// 确保备份目录存在且可写
///
/// 重复调用是安全的。可写性通过创建并删除一个探测文件确认。
pub fn ensure_backup_root(path: &Path) -> Result<(), RelocateError> {
    let wrap = |source: io::Error| RelocateError::BackupRoot {
        path: path.to_path_buf(),
        source,
    };

    fs::create_dir_all(path).map_err(wrap)?;

    let probe = path.join(format!(".zipshelf-probe-{}", std::process::id()));
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&probe)
        .map_err(wrap)?;
    fs::remove_file(&probe).map_err(wrap)?;

    Ok(())
}

/// 移动文件
///
/// 优先使用重命名（同一文件系统内是原子的）；跨文件系统时退化为复制后删除。
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    let rename_err = match fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    // 先复制到同目录下的临时文件，完整后再改名，失败时不会在目标处留下半个文件
    let staging = staging_path(to);
    if fs::copy(from, &staging).is_err() {
        let _ = fs::remove_file(&staging);
        return Err(rename_err);
    }
    if let Err(e) = fs::rename(&staging, to) {
        let _ = fs::remove_file(&staging);
        return Err(e);
    }
    if let Err(e) = fs::remove_file(from) {
        // 原文件删不掉时撤销复制，避免留下两份
        let _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}

fn staging_path(to: &Path) -> PathBuf {
    let name = to
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    to.with_file_name(format!(".{}.zipshelf-part", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let backup = dir.path().join("backup").join("nested");
        fs::create_dir_all(&src).unwrap();
        (dir, src, backup)
    }

    #[test]
    fn moves_and_records() {
        let (_dir, src, backup) = setup();
        let file = src.join("a.pdf");
        fs::write(&file, b"aaa").unwrap();

        let mut r = BackupRelocator::default();
        let dest = r.relocate(&file, &backup, ConflictPolicy::Rename).unwrap();
        assert_eq!(dest, Some(backup.join("a.pdf")));
        assert!(!file.exists());
        assert_eq!(fs::read(backup.join("a.pdf")).unwrap(), b"aaa");
        assert_eq!(r.operations().len(), 1);
    }

    #[test]
    fn conflicts_follow_policy() {
        let (_dir, src, backup) = setup();
        fs::create_dir_all(&backup).unwrap();
        fs::write(backup.join("a.pdf"), b"old").unwrap();
        let mut r = BackupRelocator::default();

        let file = src.join("a.pdf");
        fs::write(&file, b"new").unwrap();
        assert_eq!(r.relocate(&file, &backup, ConflictPolicy::Skip).unwrap(), None);
        assert!(file.exists());

        let dest = r.relocate(&file, &backup, ConflictPolicy::Rename).unwrap();
        assert_eq!(dest, Some(backup.join("a_1.pdf")));

        fs::write(&file, b"newest").unwrap();
        let dest = r.relocate(&file, &backup, ConflictPolicy::Overwrite).unwrap();
        assert_eq!(dest, Some(backup.join("a.pdf")));
        assert_eq!(fs::read(backup.join("a.pdf")).unwrap(), b"newest");
    }

    #[test]
    fn missing_source_is_an_error() {
        let (_dir, src, backup) = setup();
        let mut r = BackupRelocator::default();
        assert!(matches!(
            r.relocate(&src.join("ghost.txt"), &backup, ConflictPolicy::Rename),
            Err(RelocateError::Missing(_))
        ));
        assert!(r.operations().is_empty());
    }

    #[test]
    fn unusable_backup_root_is_an_error() {
        let (dir, src, _) = setup();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"i am a file").unwrap();
        let file = src.join("a.txt");
        fs::write(&file, b"a").unwrap();

        let mut r = BackupRelocator::default();
        assert!(matches!(
            r.relocate(&file, &blocker.join("sub"), ConflictPolicy::Rename),
            Err(RelocateError::BackupRoot { .. })
        ));
        assert!(file.exists());
    }

    #[test]
    fn rollback_restores_in_reverse_and_clears() {
        let (_dir, src, backup) = setup();
        let mut r = BackupRelocator::default();
        for name in ["a.txt", "b.txt"] {
            let f = src.join(name);
            fs::write(&f, name).unwrap();
            r.relocate(&f, &backup, ConflictPolicy::Rename).unwrap();
        }
        // 其中一个备份文件被外部删除
        fs::remove_file(backup.join("a.txt")).unwrap();

        let report = r.rollback_all();
        assert_eq!(report, RollbackReport { restored: 1, failed: 1 });
        assert!(src.join("b.txt").exists());
        assert!(!src.join("a.txt").exists());
        assert!(r.operations().is_empty());
    }

    #[test]
    fn failed_move_leaves_no_partial_copy() {
        let (_dir, src, backup) = setup();
        fs::create_dir_all(&backup).unwrap();
        let to = backup.join("a.pdf");

        assert!(move_file(&src.join("a.pdf"), &to).is_err());
        assert!(!to.exists());
        assert!(!staging_path(&to).exists());
        assert_eq!(fs::read_dir(&backup).unwrap().count(), 0);
    }

    #[test]
    fn ensure_backup_root_is_idempotent() {
        let (_dir, _, backup) = setup();
        ensure_backup_root(&backup).unwrap();
        ensure_backup_root(&backup).unwrap();
        assert!(backup.is_dir());
        assert_eq!(fs::read_dir(&backup).unwrap().count(), 0);
    }
}
