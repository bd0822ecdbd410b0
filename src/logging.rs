// Zipshelf - 日志初始化模块
// 安装 tracing 订阅者：终端输出与按天滚动的日志文件

use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::Path;
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// 覆盖日志级别的环境变量
pub const LOG_ENV: &str = "ZIPSHELF_LOG";

/// 日志文件名前缀，滚动后的文件名为 `zipshelf.log.YYYY-MM-DD`
pub const LOG_FILE_PREFIX: &str = "zipshelf.log";

/// 初始化日志
///
/// # 参数
/// * `log_dir` - 日志目录（不存在时自动创建）
/// * `default_level` - 未设置 `ZIPSHELF_LOG` 时使用的过滤规则
///
/// # 返回
/// * `Ok(WorkerGuard)` - 文件写入线程的守卫，需在进程结束前一直持有
/// * `Err(anyhow::Error)` - 日志目录无法创建或订阅者已安装
pub fn init_logger(log_dir: &Path, default_level: &str) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;

    let filter = env::var(LOG_ENV).unwrap_or_else(|_| default_level.to_string());
    let filter_layer = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .without_time()
                .with_target(false),
        )
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(filter_layer)
        .try_init()
        .context("Failed to install log subscriber")?;

    debug!(dir = %log_dir.display(), "logging to file");
    Ok(guard)
}
