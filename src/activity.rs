// Zipshelf - 活动日志模块
// 接收分级的操作消息，写入 tracing 并转发给已注册的监听器（如界面）

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{error, info, warn};

/// 活动消息级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Info,
    Warning,
    Error,
    /// 操作成功完成（映射为 tracing 的 INFO 级别）
    Success,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Success => "SUCCESS",
        };
        f.write_str(s)
    }
}

/// 监听器回调：`(级别, 消息, 关联文件路径)`
pub type Listener = Arc<dyn Fn(Level, &str, Option<&Path>) + Send + Sync>;

/// 活动日志
///
/// 克隆开销很小，所有克隆共享同一组监听器。
#[derive(Clone, Default)]
pub struct ActivityLog {
    listeners: Arc<RwLock<Vec<Listener>>>,
}

impl fmt::Debug for ActivityLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityLog")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册监听器
    pub fn subscribe(&self, listener: impl Fn(Level, &str, Option<&Path>) + Send + Sync + 'static) {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners.push(Arc::new(listener));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .map(|l| l.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    /// 记录一条消息
    ///
    /// 消息先写入 tracing，再依次通知监听器。
    /// 监听器内部的 panic 会被捕获并记录，不会影响调用方。
    pub fn record(&self, level: Level, message: &str, path: Option<&Path>) {
        let shown = path.map(|p| p.display().to_string()).unwrap_or_default();
        match level {
            Level::Info => info!(path = %shown, "{}", message),
            Level::Success => info!(path = %shown, outcome = "success", "{}", message),
            Level::Warning => warn!(path = %shown, "{}", message),
            Level::Error => error!(path = %shown, "{}", message),
        }

        // 复制一份监听器列表，避免回调期间持有锁
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .map(|l| l.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone());

        for listener in listeners {
            let res = panic::catch_unwind(AssertUnwindSafe(|| listener(level, message, path)));
            if res.is_err() {
                error!("activity listener panicked while handling: {}", message);
            }
        }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.record(Level::Info, message.as_ref(), None);
    }

    pub fn warning(&self, message: impl AsRef<str>, path: Option<&Path>) {
        self.record(Level::Warning, message.as_ref(), path);
    }

    pub fn error(&self, message: impl AsRef<str>, path: Option<&Path>) {
        self.record(Level::Error, message.as_ref(), path);
    }

    pub fn success(&self, message: impl AsRef<str>, path: Option<&Path>) {
        self.record(Level::Success, message.as_ref(), path);
    }
}
