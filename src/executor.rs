// Zipshelf - 批处理执行器模块
// 负责一次运行的完整生命周期：校验、扫描、逐个文件压缩并移入备份目录

use crate::activity::ActivityLog;
use crate::archive::{self, WriteOptions};
use crate::config::{NamingPatterns, RunConfig};
use crate::conflict::{self, ConflictPolicy, TargetStatus};
use crate::naming;
use crate::outcome::{FileOutcome, SkipReason};
use crate::relocator::{self, BackupRelocator, RollbackReport};
use crate::scanner::{self, FileRecord};
use crate::session::{SessionStats, SessionTracker};
use chrono::Local;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info_span};

/// 运行状态
///
/// `Paused` 只能从 `Running` 进入；`Completed`、`Stopped`、`Failed` 为终止状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Stopped,
    Failed,
}

impl RunState {
    /// 运行是否正在进行（包括暂停）
    pub fn is_active(self) -> bool {
        matches!(self, RunState::Running | RunState::Paused)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Completed => "completed",
            RunState::Stopped => "stopped",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("a run is already in progress")]
    AlreadyRunning,
}

/// 进度回调：（当前序号，总数，当前文件名），每个文件开始处理前调用一次
pub type ProgressCallback = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;

/// 文件状态回调：（操作，文件名，状态），每个文件处理结束后调用一次
pub type FileStatusCallback = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

#[derive(Debug, Default)]
struct Flags {
    state: RunState,
    stop: bool,
}

/// 运行控制：状态与停止标志共用一把锁，暂停等待使用条件变量
#[derive(Debug, Default)]
struct Control {
    flags: Mutex<Flags>,
    wake: Condvar,
}

impl Control {
    fn flags(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Idle 或终止状态 → Running；运行中返回 `false`
    fn begin(&self) -> bool {
        let mut f = self.flags();
        if f.state.is_active() {
            return false;
        }
        f.state = RunState::Running;
        f.stop = false;
        true
    }

    fn finish(&self, state: RunState) {
        let mut f = self.flags();
        f.state = state;
        f.stop = false;
        self.wake.notify_all();
    }

    fn stop_requested(&self) -> bool {
        self.flags().stop
    }

    /// 暂停时阻塞，直到恢复或收到停止请求
    fn wait_while_paused(&self) {
        let mut f = self.flags();
        while f.state == RunState::Paused && !f.stop {
            f = self.wake.wait(f).unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// 运行控制句柄
///
/// 可以在其他线程中暂停、恢复或停止正在进行的运行。
/// 所有控制都在文件之间生效，不会中断正在写入的压缩包。
#[derive(Debug, Clone)]
pub struct RunHandle {
    control: Arc<Control>,
}

impl RunHandle {
    pub fn state(&self) -> RunState {
        self.control.flags().state
    }

    /// 暂停；仅在 Running 时有效
    pub fn pause(&self) -> bool {
        let mut f = self.control.flags();
        if f.state != RunState::Running || f.stop {
            return false;
        }
        f.state = RunState::Paused;
        true
    }

    /// 恢复；仅在 Paused 时有效
    pub fn resume(&self) -> bool {
        let mut f = self.control.flags();
        if f.state != RunState::Paused {
            return false;
        }
        f.state = RunState::Running;
        self.control.wake.notify_all();
        true
    }

    /// 请求停止；暂停中的运行也会被唤醒
    pub fn stop(&self) -> bool {
        let mut f = self.control.flags();
        if !f.state.is_active() {
            return false;
        }
        f.stop = true;
        self.control.wake.notify_all();
        true
    }
}

/// 一次运行的结果
#[derive(Debug, Clone)]
pub struct RunResult {
    pub state: RunState,

    /// 运行未失败且没有文件出错（跳过不算失败）
    pub success: bool,

    pub total_files: usize,
    pub processed_files: usize,
    pub failed_files: usize,
    pub skipped_files: usize,

    /// 节省的空间（字节），可能为负
    pub total_size_saved: i64,

    pub execution_time: Duration,
    pub errors: Vec<String>,
    pub session_id: String,

    /// 会话结束时冻结的统计信息
    pub stats: SessionStats,
}

impl RunResult {
    fn new(state: RunState, stats: SessionStats, execution_time: Duration) -> Self {
        Self {
            state,
            success: state != RunState::Failed && stats.failed_files == 0,
            total_files: stats.total_files,
            processed_files: stats.processed_files,
            failed_files: stats.failed_files,
            skipped_files: stats.skipped_files,
            total_size_saved: stats.space_saved(),
            execution_time,
            errors: stats.errors.clone(),
            session_id: stats.session_id.clone(),
            stats,
        }
    }
}

/// 批处理执行器
///
/// 文件严格按扫描顺序逐个处理。同一实例同时只允许一次运行；
/// 调用方通常在后台线程中调用 [`BatchExecutor::start`]，并通过 [`RunHandle`] 控制。
pub struct BatchExecutor {
    patterns: NamingPatterns,
    log: ActivityLog,
    control: Arc<Control>,
    tracker: Mutex<SessionTracker>,
    relocator: Mutex<BackupRelocator>,
    progress: ProgressCallback,
    file_status: FileStatusCallback,
}

impl BatchExecutor {
    /// 创建执行器
    ///
    /// # 参数
    /// * `patterns` - 可用的命名模式
    /// * `log` - 活动日志
    pub fn new(patterns: NamingPatterns, log: ActivityLog) -> Self {
        Self {
            patterns,
            control: Arc::default(),
            tracker: Mutex::new(SessionTracker::new(log.clone())),
            relocator: Mutex::new(BackupRelocator::new(log.clone())),
            log,
            progress: Arc::new(|_, _, _| {}),
            file_status: Arc::new(|_, _, _| {}),
        }
    }

    pub fn with_progress(
        mut self,
        callback: impl Fn(usize, usize, &str) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Arc::new(callback);
        self
    }

    pub fn with_file_status(
        mut self,
        callback: impl Fn(&str, &str, &str) + Send + Sync + 'static,
    ) -> Self {
        self.file_status = Arc::new(callback);
        self
    }

    pub fn handle(&self) -> RunHandle {
        RunHandle {
            control: Arc::clone(&self.control),
        }
    }

    pub fn state(&self) -> RunState {
        self.control.flags().state
    }

    pub fn log(&self) -> &ActivityLog {
        &self.log
    }

    /// 执行一次运行
    ///
    /// 配置无效、备份目录无法准备或源目录无法扫描时运行以 `Failed` 结束，
    /// 单个文件的错误只计入结果，不会中止运行。
    ///
    /// # 返回
    /// * `Ok(RunResult)` - 运行结果（包括失败的运行）
    /// * `Err(ExecutorError::AlreadyRunning)` - 已有运行在进行
    pub fn start(&self, cfg: &RunConfig) -> Result<RunResult, ExecutorError> {
        if !self.control.begin() {
            return Err(ExecutorError::AlreadyRunning);
        }

        let started = Instant::now();
        let session_id = self.tracker().start();
        let _span = info_span!("run", session = %session_id).entered();

        let state = match panic::catch_unwind(AssertUnwindSafe(|| self.run(cfg))) {
            Ok(state) => state,
            Err(payload) => {
                let message = format!("run aborted unexpectedly: {}", panic_message(&*payload));
                error!("{}", message);
                self.log.error(&message, None);
                self.tracker().record_error(message);
                RunState::Failed
            }
        };

        // 会话在这里结束，且只结束一次
        let stats = self
            .tracker()
            .end()
            .unwrap_or_else(|| SessionStats::new(session_id));
        self.control.finish(state);

        let result = RunResult::new(state, stats, started.elapsed());
        self.log.info(format!(
            "run {}: {} processed, {} failed, {} skipped of {}",
            result.state,
            result.processed_files,
            result.failed_files,
            result.skipped_files,
            result.total_files
        ));
        Ok(result)
    }

    /// 把本执行器移入备份目录的所有文件移回原位置
    ///
    /// 运行进行中时拒绝执行。
    pub fn rollback_all(&self) -> Result<RollbackReport, ExecutorError> {
        if self.state().is_active() {
            return Err(ExecutorError::AlreadyRunning);
        }
        Ok(self.relocator().rollback_all())
    }

    /// 清空备份移动记录，之后的 `rollback_all` 不再移回这些文件
    ///
    /// 不改动任何文件。运行进行中时拒绝执行。
    pub fn reset_backups(&self) -> Result<(), ExecutorError> {
        if self.state().is_active() {
            return Err(ExecutorError::AlreadyRunning);
        }
        self.relocator().reset();
        Ok(())
    }

    /// 最近一次结束的会话
    pub fn last_session(&self) -> Option<SessionStats> {
        self.tracker().history().last().cloned()
    }

    /// 估算处理一组文件所需的时间
    ///
    /// 按压缩级别的大致吞吐量计算，另加每个文件的固定开销。
    pub fn estimate_duration(files: &[FileRecord], level: u32) -> Duration {
        const MB: f64 = 1024.0 * 1024.0;
        const PER_FILE_SECS: f64 = 0.1;

        let speed_mb = match level {
            0 => 50.0,
            1 => 30.0,
            9 => 5.0,
            _ => 10.0,
        };
        let total_bytes: u64 = files.iter().map(|f| f.size).sum();
        let secs = total_bytes as f64 / MB / speed_mb + files.len() as f64 * PER_FILE_SECS;
        Duration::from_secs_f64(secs)
    }

    fn tracker(&self) -> MutexGuard<'_, SessionTracker> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn relocator(&self) -> MutexGuard<'_, BackupRelocator> {
        self.relocator.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 运行主体，返回终止状态
    fn run(&self, cfg: &RunConfig) -> RunState {
        // 1. 校验配置，失败时不触碰任何文件
        if let Err(errors) = cfg.validate(&self.patterns) {
            for e in errors {
                self.fail(e.to_string(), None);
            }
            return RunState::Failed;
        }
        let template = match cfg.template(&self.patterns) {
            Ok(t) => t,
            Err(e) => {
                self.fail(e.to_string(), None);
                return RunState::Failed;
            }
        };

        // 2. 准备备份目录
        if let Err(e) = relocator::ensure_backup_root(&cfg.backup) {
            self.fail(e.to_string(), Some(&cfg.backup));
            return RunState::Failed;
        }

        // 3. 扫描
        let files = match scanner::try_scan(&cfg.source, cfg.recursive, &cfg.filters, &self.log) {
            Ok(files) => files,
            Err(e) => {
                self.fail(e.to_string(), Some(&cfg.source));
                return RunState::Failed;
            }
        };
        self.tracker().record_scan(files.len());

        // 4. 逐个处理
        let total = files.len();
        let mut counter = cfg.counter_start;

        for (index, file) in files.iter().enumerate() {
            if self.control.stop_requested() {
                return self.stopped(index, total);
            }
            self.control.wait_while_paused();
            if self.control.stop_requested() {
                return self.stopped(index, total);
            }

            (self.progress)(index + 1, total, &file.name);

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                self.process_file(file, cfg, &template, &mut counter)
            }))
            .unwrap_or_else(|payload| FileOutcome::Error {
                file_name: file.name.clone(),
                cause: format!("unexpected failure: {}", panic_message(&*payload)),
            });

            self.report(file, &outcome);
            self.tracker().record_outcome(&outcome);
            (self.file_status)("compress", outcome.file_name(), outcome.status());
        }

        RunState::Completed
    }

    /// 单个文件：命名 → 冲突处理 → 压缩校验 → 移入备份目录
    fn process_file(
        &self,
        file: &FileRecord,
        cfg: &RunConfig,
        template: &str,
        counter: &mut u64,
    ) -> FileOutcome {
        let name = naming::generate_name(file, template, counter, Local::now(), &self.log);
        let folder = file.path.parent().unwrap_or(&cfg.source);
        let candidate = folder.join(&name);

        // 压缩包不能覆盖源文件本身
        let policy = match conflict::classify(&file.path, &candidate) {
            TargetStatus::Unchanged => ConflictPolicy::Rename,
            TargetStatus::Free | TargetStatus::Conflict => cfg.conflict,
        };

        let Some(dest) = conflict::resolve(&candidate, policy) else {
            return FileOutcome::Skipped {
                file_name: file.name.clone(),
                reason: SkipReason::ArchiveExists,
            };
        };

        let options = WriteOptions {
            level: cfg.level,
            verify: cfg.verify,
            deep_verify: cfg.deep_verify,
        };
        let outcome = archive::write_and_verify(file, &dest, options);

        let FileOutcome::Success {
            file_name,
            archive_path,
            original_size,
            compressed_size,
            ..
        } = outcome
        else {
            return outcome;
        };

        // 移动失败只记录警告，压缩包已经生成，文件仍计为成功
        let relocated = self.relocator().relocate(&file.path, &cfg.backup, cfg.conflict);
        let backup_path = match relocated {
            Ok(Some(path)) => Some(path),
            Ok(None) => {
                self.tracker().record_warning(format!(
                    "{}: original not moved, backup folder already has a file with this name",
                    file_name
                ));
                None
            }
            Err(e) => {
                let message = format!("{}: original could not be backed up: {}", file_name, e);
                self.log.warning(&message, Some(&file.path));
                self.tracker().record_warning(message);
                None
            }
        };

        FileOutcome::Success {
            file_name,
            archive_path,
            original_size,
            compressed_size,
            backup_path,
        }
    }

    fn report(&self, file: &FileRecord, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Success { archive_path, .. } => self.log.success(
                format!("compressed {} ({} bytes saved)", file.name, outcome.size_saved()),
                Some(archive_path),
            ),
            FileOutcome::Error { cause, .. } => self
                .log
                .error(format!("failed to compress {}: {}", file.name, cause), Some(&file.path)),
            FileOutcome::Skipped { reason, .. } => self
                .log
                .warning(format!("skipped {}: {}", file.name, reason), Some(&file.path)),
        }
    }

    fn fail(&self, message: String, path: Option<&Path>) {
        self.log.error(&message, path);
        self.tracker().record_error(message);
    }

    fn stopped(&self, index: usize, total: usize) -> RunState {
        self.log
            .warning(format!("run stopped by user after {} of {} file(s)", index, total), None);
        RunState::Stopped
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn setup(files: &[(&str, usize)]) -> (TempDir, RunConfig) {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("in");
        fs::create_dir_all(&src).unwrap();
        for (name, size) in files {
            fs::write(src.join(name), "x".repeat(*size)).unwrap();
        }
        let cfg = RunConfig::new(&src, dir.path().join("backup"));
        (dir, cfg)
    }

    fn executor() -> BatchExecutor {
        BatchExecutor::new(NamingPatterns::default(), ActivityLog::new())
    }

    #[test]
    fn run_completes_and_counts_add_up() {
        let (_dir, cfg) = setup(&[("a.txt", 500), ("b.txt", 800), ("c.txt", 10)]);
        let exec = executor();
        let result = exec.start(&cfg).unwrap();

        assert_eq!(result.state, RunState::Completed);
        assert!(result.success);
        assert_eq!(result.total_files, 3);
        assert_eq!(
            result.processed_files + result.failed_files + result.skipped_files,
            result.total_files
        );
        assert_eq!(exec.state(), RunState::Completed);
        assert_eq!(exec.last_session().unwrap().session_id, result.session_id);
        assert_eq!(fs::read_dir(&cfg.backup).unwrap().count(), 3);
    }

    #[test]
    fn invalid_config_fails_without_touching_files() {
        let (_dir, mut cfg) = setup(&[("a.txt", 100)]);
        cfg.level = 42;
        let exec = executor();
        let result = exec.start(&cfg).unwrap();

        assert_eq!(result.state, RunState::Failed);
        assert!(!result.success);
        assert_eq!(result.total_files, 0);
        assert_eq!(result.errors.len(), 1);
        assert!(!cfg.backup.exists());
        assert_eq!(fs::read_dir(&cfg.source).unwrap().count(), 1);
    }

    #[test]
    fn counter_is_sequential_in_scan_order() {
        let (_dir, mut cfg) = setup(&[("x.txt", 1), ("y.txt", 1), ("z.txt", 1)]);
        cfg.pattern = "contador_archivo".into();
        cfg.counter_start = 7;
        executor().start(&cfg).unwrap();

        let mut names: Vec<String> = fs::read_dir(&cfg.source)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["007_x.zip", "008_y.zip", "009_z.zip"]);
    }

    #[test]
    fn skip_policy_skips_existing_archive() {
        let (_dir, mut cfg) = setup(&[("keep.txt", 50)]);
        cfg.pattern = "nombre_original".into();
        cfg.conflict = ConflictPolicy::Skip;
        fs::write(cfg.source.join("keep.zip"), b"existing").unwrap();

        let result = executor().start(&cfg).unwrap();
        assert_eq!(result.skipped_files, 1);
        assert!(result.success);
        assert_eq!(fs::read(cfg.source.join("keep.zip")).unwrap(), b"existing");
        assert!(cfg.source.join("keep.txt").exists());
    }

    #[test]
    fn zip_source_is_never_overwritten() {
        let (_dir, mut cfg) = setup(&[]);
        cfg.pattern = "nombre_original".into();
        cfg.conflict = ConflictPolicy::Overwrite;
        fs::write(cfg.source.join("bundle.zip"), b"payload").unwrap();

        let result = executor().start(&cfg).unwrap();
        assert_eq!(result.processed_files, 1);
        assert!(cfg.source.join("bundle_1.zip").exists());
        assert_eq!(fs::read(cfg.backup.join("bundle.zip")).unwrap(), b"payload");
    }

    #[test]
    fn callbacks_fire_once_per_file_in_order() {
        let (_dir, cfg) = setup(&[("a.txt", 1), ("b.txt", 1)]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let statuses = Arc::new(AtomicUsize::new(0));

        let s = Arc::clone(&seen);
        let c = Arc::clone(&statuses);
        let exec = executor()
            .with_progress(move |i, n, name| s.lock().unwrap().push((i, n, name.to_string())))
            .with_file_status(move |op, _, status| {
                assert_eq!(op, "compress");
                assert_eq!(status, "success");
                c.fetch_add(1, Ordering::SeqCst);
            });
        exec.start(&cfg).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(1, 2, "a.txt".to_string()), (2, 2, "b.txt".to_string())]
        );
        assert_eq!(statuses.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stop_before_next_file() {
        let (_dir, cfg) = setup(&[("a.txt", 1), ("b.txt", 1), ("c.txt", 1)]);
        let exec = executor();
        let handle = exec.handle();
        let exec = exec.with_progress(move |i, _, _| {
            if i == 2 {
                handle.stop();
            }
        });

        let result = exec.start(&cfg).unwrap();
        assert_eq!(result.state, RunState::Stopped);
        assert_eq!(result.processed_files, 2);
        assert_eq!(result.total_files, 3);
        assert!(cfg.source.join("c.txt").exists());
        assert!(!cfg.source.join("a.txt").exists());
    }

    #[test]
    fn handle_ignores_controls_when_idle() {
        let exec = executor();
        let handle = exec.handle();
        assert_eq!(handle.state(), RunState::Idle);
        assert!(!handle.pause());
        assert!(!handle.resume());
        assert!(!handle.stop());
    }

    #[test]
    fn rollback_restores_originals() {
        let (_dir, cfg) = setup(&[("a.txt", 20), ("b.txt", 20)]);
        let exec = executor();
        exec.start(&cfg).unwrap();
        assert!(!cfg.source.join("a.txt").exists());

        let report = exec.rollback_all().unwrap();
        assert_eq!(report.restored, 2);
        assert!(cfg.source.join("a.txt").exists());
        assert!(cfg.source.join("b.txt").exists());
    }

    #[test]
    fn reset_forgets_backups_without_moving_them() {
        let (_dir, cfg) = setup(&[("a.txt", 10)]);
        let exec = executor();
        exec.start(&cfg).unwrap();

        exec.reset_backups().unwrap();
        let report = exec.rollback_all().unwrap();
        assert_eq!(report.restored, 0);
        assert!(cfg.backup.join("a.txt").exists());
        assert!(!cfg.source.join("a.txt").exists());
    }

    #[test]
    fn estimate_grows_with_level() {
        let record = |size| FileRecord {
            path: PathBuf::from("/tmp/f"),
            name: "f".into(),
            size,
            modified: std::time::SystemTime::now(),
            extension: String::new(),
            readable: true,
            writable: true,
        };
        let files = vec![record(10 * 1024 * 1024), record(0)];
        let fast = BatchExecutor::estimate_duration(&files, 0);
        let slow = BatchExecutor::estimate_duration(&files, 9);
        assert!(fast < slow);
        assert!((fast.as_secs_f64() - 0.4).abs() < 1e-6);
        assert_eq!(BatchExecutor::estimate_duration(&[], 6), Duration::ZERO);
    }
}
