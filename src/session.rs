// Zipshelf - 会话统计模块
// 汇总单次运行中每个文件的处理结果，运行结束时冻结为不可变的报告

use crate::activity::ActivityLog;
use crate::outcome::FileOutcome;
use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeDelta};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// 单次会话的统计信息
///
/// 派生指标（成功率、压缩率、耗时）在读取时计算，不单独存储。
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStats {
    pub session_id: String,
    pub start_time: DateTime<Local>,

    /// 会话仍在进行时为 `None`
    pub end_time: Option<DateTime<Local>>,

    /// 本次扫描得到的文件总数
    pub total_files: usize,
    pub processed_files: usize,
    pub failed_files: usize,
    pub skipped_files: usize,

    /// 成功压缩的文件的原始大小之和
    pub total_original_size: u64,

    /// 成功压缩的文件的压缩包大小之和
    pub total_compressed_size: u64,

    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl SessionStats {
    pub(crate) fn new(session_id: String) -> Self {
        Self {
            session_id,
            start_time: Local::now(),
            end_time: None,
            total_files: 0,
            processed_files: 0,
            failed_files: 0,
            skipped_files: 0,
            total_original_size: 0,
            total_compressed_size: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// 已经得出结果的文件数
    pub fn completed_files(&self) -> usize {
        self.processed_files + self.failed_files + self.skipped_files
    }

    /// 成功率（百分比），总数为 0 时为 0
    pub fn success_rate(&self) -> f64 {
        if self.total_files == 0 {
            return 0.0;
        }
        self.processed_files as f64 / self.total_files as f64 * 100.0
    }

    /// 压缩率（百分比），原始大小为 0 时为 0
    pub fn compression_ratio(&self) -> f64 {
        if self.total_original_size == 0 {
            return 0.0;
        }
        (1.0 - self.total_compressed_size as f64 / self.total_original_size as f64) * 100.0
    }

    /// 节省的空间，可能为负
    pub fn space_saved(&self) -> i64 {
        self.total_original_size as i64 - self.total_compressed_size as i64
    }

    /// 会话耗时；仍在进行时计算到当前时间
    pub fn duration(&self) -> TimeDelta {
        self.end_time.unwrap_or_else(Local::now) - self.start_time
    }

    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    /// 导出 JSON 格式的会话报告
    ///
    /// # 参数
    /// * `path` - 报告文件路径（父目录不存在时自动创建）
    pub fn export_json(&self, path: &Path) -> Result<()> {
        let report = SessionReport::from(self);
        let content = serde_json::to_string_pretty(&report)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)
            .with_context(|| format!("Failed to write session report {:?}", path))
    }
}

#[derive(Serialize)]
struct SessionReport<'a> {
    session_info: SessionInfo<'a>,
    statistics: Statistics,
    errors: &'a [String],
    warnings: &'a [String],
    export_date: String,
}

#[derive(Serialize)]
struct SessionInfo<'a> {
    session_id: &'a str,
    start_time: String,
    end_time: Option<String>,
    duration_secs: f64,
}

#[derive(Serialize)]
struct Statistics {
    total_files: usize,
    processed_files: usize,
    failed_files: usize,
    skipped_files: usize,
    success_rate: f64,
    compression_ratio: f64,
    total_original_size: u64,
    total_compressed_size: u64,
    space_saved: i64,
}

impl<'a> From<&'a SessionStats> for SessionReport<'a> {
    fn from(s: &'a SessionStats) -> Self {
        Self {
            session_info: SessionInfo {
                session_id: &s.session_id,
                start_time: s.start_time.to_rfc3339(),
                end_time: s.end_time.map(|t| t.to_rfc3339()),
                duration_secs: s.duration().num_milliseconds() as f64 / 1000.0,
            },
            statistics: Statistics {
                total_files: s.total_files,
                processed_files: s.processed_files,
                failed_files: s.failed_files,
                skipped_files: s.skipped_files,
                success_rate: s.success_rate(),
                compression_ratio: s.compression_ratio(),
                total_original_size: s.total_original_size,
                total_compressed_size: s.total_compressed_size,
                space_saved: s.space_saved(),
            },
            errors: &s.errors,
            warnings: &s.warnings,
            export_date: Local::now().to_rfc3339(),
        }
    }
}

/// 会话统计跟踪器
///
/// 同一时间只有一个活动会话；在会话进行中再次 `start` 会先结束前一个会话。
#[derive(Debug, Default)]
pub struct SessionTracker {
    current: Option<SessionStats>,
    history: Vec<SessionStats>,
    // 上一个会话 ID 的时间部分
    last_id: String,
    sequence: u32,
    log: ActivityLog,
}

impl SessionTracker {
    pub fn new(log: ActivityLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    /// 开始新会话并返回会话 ID
    pub fn start(&mut self) -> String {
        if self.current.is_some() {
            self.end();
        }

        // 同一秒内开始的会话追加序号
        let base = format!("session_{}", Local::now().format("%Y%m%d_%H%M%S"));
        let id = if base == self.last_id {
            self.sequence += 1;
            format!("{}_{}", base, self.sequence)
        } else {
            self.sequence = 0;
            self.last_id = base.clone();
            base
        };

        self.log.info(format!("session started: {}", id));
        self.current = Some(SessionStats::new(id.clone()));
        id
    }

    /// 记录扫描得到的文件总数
    pub fn record_scan(&mut self, total_files: usize) {
        if let Some(s) = self.current.as_mut() {
            s.total_files = total_files;
        }
    }

    /// 记录单个文件的处理结果
    pub fn record_outcome(&mut self, outcome: &FileOutcome) {
        let Some(s) = self.current.as_mut() else {
            return;
        };

        match outcome {
            FileOutcome::Success {
                original_size,
                compressed_size,
                ..
            } => {
                s.processed_files += 1;
                s.total_original_size += original_size;
                s.total_compressed_size += compressed_size;
            }
            FileOutcome::Error { file_name, cause } => {
                s.failed_files += 1;
                s.errors.push(format!("{}: {}", file_name, cause));
            }
            FileOutcome::Skipped { file_name, reason } => {
                s.skipped_files += 1;
                s.warnings.push(format!("{}: {}", file_name, reason));
            }
        }
    }

    /// 记录一条不影响计数的警告（如原文件未能备份）
    pub fn record_warning(&mut self, message: impl Into<String>) {
        if let Some(s) = self.current.as_mut() {
            s.warnings.push(message.into());
        }
    }

    /// 记录一条不对应单个文件的错误（如运行无法开始）
    pub fn record_error(&mut self, message: impl Into<String>) {
        if let Some(s) = self.current.as_mut() {
            s.errors.push(message.into());
        }
    }

    /// 结束当前会话，返回冻结的统计信息
    pub fn end(&mut self) -> Option<SessionStats> {
        let mut stats = self.current.take()?;
        stats.end_time = Some(Local::now());

        self.log.info(format!(
            "session completed: {} processed, {} failed, {} skipped",
            stats.processed_files, stats.failed_files, stats.skipped_files
        ));

        self.history.push(stats.clone());
        Some(stats)
    }

    /// 当前活动会话的快照
    pub fn current(&self) -> Option<&SessionStats> {
        self.current.as_ref()
    }

    /// 已结束的会话（最早的在前）
    pub fn history(&self) -> &[SessionStats] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::SkipReason;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn success(orig: u64, comp: u64) -> FileOutcome {
        FileOutcome::Success {
            file_name: "a.pdf".into(),
            archive_path: PathBuf::from("a.zip"),
            original_size: orig,
            compressed_size: comp,
            backup_path: None,
        }
    }

    #[test]
    fn counts_and_sizes_accumulate() {
        let mut t = SessionTracker::default();
        t.start();
        t.record_scan(3);
        t.record_outcome(&success(1000, 400));
        t.record_outcome(&FileOutcome::Error {
            file_name: "b.pdf".into(),
            cause: "disk full".into(),
        });
        t.record_outcome(&FileOutcome::Skipped {
            file_name: "c.pdf".into(),
            reason: SkipReason::ArchiveExists,
        });

        let s = t.current().unwrap();
        assert_eq!(s.completed_files(), s.total_files);
        assert_eq!(s.errors, vec!["b.pdf: disk full"]);
        assert_eq!(s.warnings, vec!["c.pdf: archive already exists"]);
        assert!((s.success_rate() - 100.0 / 3.0).abs() < 1e-9);
        assert!((s.compression_ratio() - 60.0).abs() < 1e-9);
        assert_eq!(s.space_saved(), 600);
    }

    #[test]
    fn derived_metrics_guard_zero() {
        let mut t = SessionTracker::default();
        t.start();
        let s = t.end().unwrap();
        assert_eq!(s.success_rate(), 0.0);
        assert_eq!(s.compression_ratio(), 0.0);
        assert!(!s.is_active());
        assert!(s.duration() >= TimeDelta::zero());
    }

    #[test]
    fn start_while_active_ends_previous() {
        let mut t = SessionTracker::default();
        let first = t.start();
        t.record_outcome(&success(10, 5));
        let second = t.start();

        assert_ne!(first, second);
        assert_eq!(t.history().len(), 1);
        assert_eq!(t.history()[0].session_id, first);
        assert_eq!(t.history()[0].processed_files, 1);
        assert_eq!(t.current().unwrap().processed_files, 0);
    }

    #[test]
    fn end_without_session_is_none() {
        let mut t = SessionTracker::default();
        assert!(t.end().is_none());
        t.record_outcome(&success(1, 1));
        assert!(t.history().is_empty());
    }

    #[test]
    fn export_writes_report() {
        let dir = TempDir::new().unwrap();
        let mut t = SessionTracker::default();
        t.start();
        t.record_scan(1);
        t.record_outcome(&success(200, 50));
        t.record_warning("a.pdf: could not be moved to backup");
        let stats = t.end().unwrap();

        let path = dir.path().join("reports").join("run.json");
        stats.export_json(&path).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["session_info"]["session_id"], stats.session_id.as_str());
        assert_eq!(json["statistics"]["processed_files"], 1);
        assert_eq!(json["statistics"]["space_saved"], 150);
        assert_eq!(json["warnings"].as_array().unwrap().len(), 1);
    }
}
