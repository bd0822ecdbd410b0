// Zipshelf - 压缩包写入模块
// 将单个文件压缩为只含一个条目的 zip 压缩包，并可选地校验其完整性

use crate::hasher::{calculate_hash, hash_reader};
use crate::outcome::FileOutcome;
use crate::scanner::FileRecord;
use chrono::{DateTime, Datelike, Local, Timelike};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// 完整性校验失败时的错误原因
pub const VERIFICATION_FAILED: &str = "integrity verification failed";

/// 最高压缩级别
pub const MAX_LEVEL: u32 = 9;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] ZipError),

    #[error("compression level must be between 0 and 9, got {0}")]
    InvalidLevel(u32),

    #[error("integrity verification failed: {0}")]
    Verification(String),
}

/// 单次写入的选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// 压缩级别，0 为仅存储，9 为最高压缩
    pub level: u32,

    /// 写入后重新打开压缩包校验
    pub verify: bool,

    /// 校验时额外比较内容哈希
    pub deep_verify: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            level: 6,
            verify: true,
            deep_verify: false,
        }
    }
}

/// 压缩并校验单个文件
///
/// 调用方负责事先通过冲突处理得到 `dest`；若 `dest` 已存在则被覆盖。
/// 写入或校验失败时删除已写出的压缩包，源文件保持不动。
///
/// # 返回
/// * `FileOutcome::Success` - `backup_path` 为 `None`，由调用方在移动原文件后填写
/// * `FileOutcome::Error` - 写入失败，或校验失败（原因为 `integrity verification failed`）
pub fn write_and_verify(file: &FileRecord, dest: &Path, options: WriteOptions) -> FileOutcome {
    let error = |cause: String| FileOutcome::Error {
        file_name: file.name.clone(),
        cause,
    };

    let compressed_size = match write_archive(file, dest, options.level) {
        Ok(size) => size,
        Err(e) => return error(e.to_string()),
    };

    if options.verify {
        if let Err(e) = verify_archive(dest, file, options.deep_verify) {
            warn!(archive = %dest.display(), "archive failed verification: {}", e);
            remove_partial(dest);
            return error(VERIFICATION_FAILED.to_string());
        }
    }

    FileOutcome::Success {
        file_name: file.name.clone(),
        archive_path: dest.to_path_buf(),
        original_size: file.size,
        compressed_size,
        backup_path: None,
    }
}

/// 写入压缩包
///
/// 条目名为源文件名，并带上源文件的修改时间。
/// 级别无效或源文件打不开时不会创建 `dest`；创建之后的失败会删除写了一半的压缩包。
///
/// # 返回
/// * `Ok(u64)` - 压缩包大小（字节）
pub fn write_archive(file: &FileRecord, dest: &Path, level: u32) -> Result<u64, ArchiveError> {
    if level > MAX_LEVEL {
        return Err(ArchiveError::InvalidLevel(level));
    }

    let options = if level == 0 {
        SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
    } else {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(level as i64))
    };
    let options = options
        .last_modified_time(zip_time(file))
        .large_file(file.size >= u32::MAX as u64);

    let src = BufReader::new(File::open(&file.path)?);
    let out = File::create(dest)?;

    match write_entry(out, src, file.name.as_str(), options) {
        Ok(()) => {
            let size = fs::metadata(dest)?.len();
            debug!(archive = %dest.display(), level, size, "archive written");
            Ok(size)
        }
        Err(e) => {
            remove_partial(dest);
            Err(e)
        }
    }
}

fn write_entry(
    out: File,
    mut src: BufReader<File>,
    entry_name: &str,
    options: SimpleFileOptions,
) -> Result<(), ArchiveError> {
    let mut writer = ZipWriter::new(out);
    writer.start_file(entry_name, options)?;
    io::copy(&mut src, &mut writer)?;
    writer.finish()?.sync_all()?;
    Ok(())
}

/// 校验压缩包
///
/// 检查：压缩包可以打开；恰好只有一个条目；条目名与源文件名一致；
/// 解压后的大小等于源文件大小；条目读到末尾时 CRC-32 正确。
/// `deep` 为 `true` 时还比较内容哈希。
pub fn verify_archive(archive: &Path, file: &FileRecord, deep: bool) -> Result<(), ArchiveError> {
    let mut zip = ZipArchive::new(BufReader::new(File::open(archive)?))?;

    if zip.len() != 1 {
        return Err(ArchiveError::Verification(format!(
            "expected exactly one entry, found {}",
            zip.len()
        )));
    }

    let mut entry = zip.by_index(0)?;
    if entry.name() != file.name {
        return Err(ArchiveError::Verification(format!(
            "entry name {:?} does not match {:?}",
            entry.name(),
            file.name
        )));
    }
    if entry.size() != file.size {
        return Err(ArchiveError::Verification(format!(
            "entry size {} does not match source size {}",
            entry.size(),
            file.size
        )));
    }

    // 读到末尾时 zip 库会校验 CRC-32
    let (hash, read) = hash_reader(&mut entry)
        .map_err(|e| ArchiveError::Verification(format!("entry is corrupt: {}", e)))?;
    if read != file.size {
        return Err(ArchiveError::Verification(format!(
            "read {} bytes, expected {}",
            read, file.size
        )));
    }

    if deep && calculate_hash(&file.path)? != hash {
        return Err(ArchiveError::Verification(
            "content hash differs from source".to_string(),
        ));
    }

    Ok(())
}

fn remove_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!(archive = %path.display(), "could not remove partial archive: {}", e);
        }
    }
}

/// zip 时间只能表示 1980 年之后的时间，超出范围时使用默认值
fn zip_time(file: &FileRecord) -> zip::DateTime {
    let t: DateTime<Local> = file.modified.into();
    zip::DateTime::from_date_and_time(
        t.year().clamp(1980, 2107) as u16,
        t.month() as u8,
        t.day() as u8,
        t.hour() as u8,
        t.minute() as u8,
        t.second() as u8,
    )
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn source(dir: &Path, name: &str, content: &[u8]) -> FileRecord {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        FileRecord::from_path(&path).unwrap()
    }

    fn compressible() -> Vec<u8> {
        b"the quick brown fox jumps over the lazy dog\n".repeat(200)
    }

    #[test]
    fn writes_single_entry_archive() {
        let dir = TempDir::new().unwrap();
        let file = source(dir.path(), "notes.txt", &compressible());
        let dest = dir.path().join("notes.zip");

        let outcome = write_and_verify(&file, &dest, WriteOptions::default());
        let FileOutcome::Success {
            original_size,
            compressed_size,
            ..
        } = outcome
        else {
            panic!("expected success, got {:?}", outcome);
        };
        assert_eq!(original_size, file.size);
        assert!(compressed_size < original_size);

        let mut zip = ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        assert_eq!(zip.len(), 1);
        let mut entry = zip.by_index(0).unwrap();
        assert_eq!(entry.name(), "notes.txt");
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        assert_eq!(content, compressible());
    }

    #[test]
    fn level_zero_stores() {
        let dir = TempDir::new().unwrap();
        let file = source(dir.path(), "raw.txt", &compressible());
        let dest = dir.path().join("raw.zip");

        write_archive(&file, &dest, 0).unwrap();
        let mut zip = ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let entry = zip.by_index(0).unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Stored);
        assert_eq!(entry.compressed_size(), file.size);
    }

    #[test]
    fn invalid_level_is_rejected() {
        let dir = TempDir::new().unwrap();
        let file = source(dir.path(), "a.txt", b"abc");
        let dest = dir.path().join("a.zip");

        assert!(matches!(
            write_archive(&file, &dest, 10),
            Err(ArchiveError::InvalidLevel(10))
        ));
        let options = WriteOptions {
            level: 12,
            ..Default::default()
        };
        let outcome = write_and_verify(&file, &dest, options);
        assert_eq!(outcome.status(), "error");
        assert!(!dest.exists());
    }

    #[test]
    fn rejected_write_leaves_existing_archive_alone() {
        let dir = TempDir::new().unwrap();
        let file = source(dir.path(), "a.txt", b"abc");
        let dest = dir.path().join("a.zip");
        fs::write(&dest, b"keep me").unwrap();

        let options = WriteOptions {
            level: 10,
            ..Default::default()
        };
        assert_eq!(write_and_verify(&file, &dest, options).status(), "error");
        assert_eq!(fs::read(&dest).unwrap(), b"keep me");

        fs::remove_file(&file.path).unwrap();
        let outcome = write_and_verify(&file, &dest, WriteOptions::default());
        assert_eq!(outcome.status(), "error");
        assert_eq!(fs::read(&dest).unwrap(), b"keep me");
    }

    #[test]
    fn incompressible_file_may_grow() {
        let dir = TempDir::new().unwrap();
        let file = source(dir.path(), "tiny.bin", b"z");
        let dest = dir.path().join("tiny.zip");

        let outcome = write_and_verify(&file, &dest, WriteOptions::default());
        assert!(outcome.is_success());
        assert!(outcome.size_saved() < 0);
    }

    #[test]
    fn stale_record_fails_verification_and_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let file = source(dir.path(), "changing.txt", b"short");
        // 扫描之后文件被修改
        fs::write(&file.path, b"a much longer body than before").unwrap();
        let dest = dir.path().join("changing.zip");

        let outcome = write_and_verify(&file, &dest, WriteOptions::default());
        assert_eq!(
            outcome,
            FileOutcome::Error {
                file_name: "changing.txt".into(),
                cause: VERIFICATION_FAILED.into(),
            }
        );
        assert!(!dest.exists());
        assert!(file.path.exists());
    }

    #[test]
    fn corrupt_entry_is_detected() {
        let dir = TempDir::new().unwrap();
        let body = vec![b'A'; 4096];
        let file = source(dir.path(), "plain.txt", &body);
        let dest = dir.path().join("plain.zip");
        write_archive(&file, &dest, 0).unwrap();
        verify_archive(&dest, &file, true).unwrap();

        let mut bytes = fs::read(&dest).unwrap();
        let start = bytes.windows(64).position(|w| w.iter().all(|b| *b == b'A')).unwrap();
        bytes[start + 100] = b'B';
        fs::write(&dest, &bytes).unwrap();

        assert!(matches!(
            verify_archive(&dest, &file, false),
            Err(ArchiveError::Verification(_))
        ));
    }

    #[test]
    fn overwrite_replaces_existing_archive() {
        let dir = TempDir::new().unwrap();
        let file = source(dir.path(), "doc.txt", &compressible());
        let dest = dir.path().join("doc.zip");
        fs::write(&dest, b"not a zip").unwrap();

        assert!(write_and_verify(&file, &dest, WriteOptions::default()).is_success());
        verify_archive(&dest, &file, true).unwrap();
    }
}
