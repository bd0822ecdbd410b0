// Zipshelf - 批量压缩与备份工具
//
// 主程序入口，负责命令行参数解析和运行流程协调
//
// 功能特性：
// - 逐个文件压缩：每个文件生成一个单条目 zip 压缩包
// - 可配置命名：基于模板的压缩包命名，支持日期、计数器和发票号
// - 备份：压缩成功后原文件移入备份目录
// - 后台运行：处理在工作线程中进行，主线程显示进度
// - 交互式配置管理：保存和管理运行配置

use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use clap::{Args as ClapArgs, Parser, Subcommand};
use console::style;
use crossbeam_channel::unbounded;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::warn;
use zipshelf::activity::ActivityLog;
use zipshelf::cli::{resolve_ask_policy, run_interactive_mode};
use zipshelf::config::{RunConfig, CUSTOM_PATTERN};
use zipshelf::conflict::ConflictPolicy;
use zipshelf::executor::{BatchExecutor, RunResult, RunState};
use zipshelf::logging::init_logger;
use zipshelf::naming::preview_names;
use zipshelf::prune::prune_logs;
use zipshelf::scanner::{scan_directory, summarize};
use zipshelf::store::AppConfig;
use zipshelf::utils::{format_bytes, format_duration, format_signed_bytes};

/// 子命令枚举
#[derive(Subcommand, Debug)]
enum Commands {
    /// 压缩源目录中的文件，并把原文件移入备份目录
    Run(RunArgs),

    /// 列出可用的命名模式
    Patterns,

    /// 交互式选择、创建或删除保存的配置
    Profiles {
        /// 只预览将生成的名称
        #[arg(long)]
        dry_run: bool,

        /// 运行结束后导出 JSON 报告
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },

    /// 清理旧日志文件
    PruneLogs {
        /// 要保留的日志文件数量（默认使用配置中的 max_log_files）
        #[arg(long)]
        keep: Option<usize>,

        /// 只列出将删除的文件
        #[arg(long)]
        dry_run: bool,
    },
}

/// `run` 子命令的参数
#[derive(ClapArgs, Debug)]
struct RunArgs {
    /// 源目录
    #[arg(value_name = "SOURCE")]
    source: PathBuf,

    /// 备份目录
    #[arg(value_name = "BACKUP")]
    backup: PathBuf,

    /// 命名模式 ID（见 `zipshelf patterns`）
    #[arg(long, default_value = "fecha_archivo")]
    pattern: String,

    /// 自定义命名模板（使用时 pattern 自动设为 personalizado）
    #[arg(long, value_name = "TEMPLATE")]
    custom_pattern: Option<String>,

    /// 包含子目录
    #[arg(long)]
    recursive: bool,

    /// 文件名过滤（Glob 风格，可重复）
    #[arg(long = "filter", value_name = "GLOB")]
    filters: Vec<String>,

    /// 过滤预设名称（如 documentos、imagenes）
    #[arg(long, conflicts_with = "filters")]
    preset: Option<String>,

    /// 压缩级别 0-9
    #[arg(long, default_value_t = 6)]
    level: u32,

    /// 冲突处理策略：rename、overwrite、skip、ask
    #[arg(long, default_value = "rename")]
    conflict: ConflictPolicy,

    /// 不校验压缩包
    #[arg(long)]
    no_verify: bool,

    /// 校验时比较内容哈希
    #[arg(long)]
    deep_verify: bool,

    /// 计数器起始值
    #[arg(long, default_value_t = 1)]
    counter_start: u64,

    /// 运行结束后导出 JSON 报告
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// 只预览将生成的名称，不修改任何文件
    #[arg(long)]
    dry_run: bool,
}

/// 命令行参数结构体
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

/// 工作线程发往主线程的事件
enum Event {
    Progress { current: usize, total: usize, name: String },
    FileDone { name: String, status: String },
}

/// 程序入口
fn main() -> Result<()> {
    let args = Args::parse();
    let mut app_config = AppConfig::load()?;

    // 日志初始化失败不影响运行
    let log_dir = AppConfig::log_dir()?;
    let _guard = match init_logger(&log_dir, &app_config.settings.log_level) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("{} {:#}", style("Warning:").yellow(), e);
            None
        }
    };

    match args.command {
        Commands::Run(run) => {
            let report = run.report.clone();
            let dry_run = run.dry_run;
            let cfg = build_config(run, &app_config)?;
            execute(cfg, &app_config, report, dry_run)?;
        }
        Commands::Patterns => list_patterns(&app_config),
        Commands::Profiles { dry_run, report } => {
            if let Some(cfg) = run_interactive_mode(&mut app_config)? {
                execute(cfg, &app_config, report, dry_run)?;
            }
        }
        Commands::PruneLogs { keep, dry_run } => {
            let keep = keep.unwrap_or(app_config.settings.max_log_files);
            let deleted = prune_logs(&log_dir, keep, dry_run)?;
            if deleted.is_empty() {
                println!("Nothing to prune (keeping {}).", keep);
            }
            for path in &deleted {
                let name = path.file_name().unwrap_or_default().to_string_lossy();
                if dry_run {
                    println!("{} Would delete: {}", style("Dry run:").yellow(), name);
                } else {
                    println!("Deleted: {}", style(name).red());
                }
            }
        }
    }

    // 自动清理超出保留数量的日志
    if let Err(e) = prune_logs(&log_dir, app_config.settings.max_log_files, false) {
        warn!("could not prune old logs: {:#}", e);
    }

    Ok(())
}

/// 由命令行参数构建运行配置
fn build_config(args: RunArgs, app: &AppConfig) -> Result<RunConfig> {
    let mut cfg = RunConfig::new(&args.source, &args.backup);

    cfg.pattern = if args.custom_pattern.is_some() {
        CUSTOM_PATTERN.to_string()
    } else {
        args.pattern
    };
    cfg.custom_pattern = args.custom_pattern;
    cfg.recursive = args.recursive;
    cfg.filters = match args.preset {
        Some(name) => app
            .filter_preset(&name)
            .with_context(|| format!("Unknown filter preset '{}'", name))?
            .to_vec(),
        None if args.filters.is_empty() => vec!["*".to_string()],
        None => args.filters,
    };
    cfg.level = args.level;
    cfg.conflict = args.conflict;
    cfg.verify = app.settings.verify_integrity && !args.no_verify;
    cfg.deep_verify = args.deep_verify;
    cfg.counter_start = args.counter_start;

    Ok(cfg)
}

/// 列出命名模式
fn list_patterns(app: &AppConfig) {
    println!("{}", style("Naming patterns").cyan().bold());
    for (id, template) in app.naming_patterns().iter() {
        println!("  {:<20} {}", style(id).green(), template);
    }
    println!(
        "  {:<20} {}",
        style(CUSTOM_PATTERN).green(),
        style("use --custom-pattern TEMPLATE").dim()
    );

    println!("{}", style("Conflict policies").cyan().bold());
    for policy in ConflictPolicy::ALL {
        let about = app.policy_description(policy).unwrap_or_default();
        println!("  {:<20} {}", style(policy).green(), about);
    }
}

/// 执行一次运行（或预览）
fn execute(
    mut cfg: RunConfig,
    app: &AppConfig,
    report: Option<PathBuf>,
    dry_run: bool,
) -> Result<()> {
    cfg.conflict = resolve_ask_policy(cfg.conflict)?;

    println!(
        "{}",
        style(format!("Zipshelf v{}", env!("CARGO_PKG_VERSION")))
            .cyan()
            .bold()
    );
    println!("Source:  {:?}", style(&cfg.source).blue());
    println!("Backup:  {:?}", style(&cfg.backup).blue());
    println!("Pattern: {}", style(&cfg.pattern).yellow());
    println!("{}", style("----------------------------------------").dim());

    if dry_run {
        return preview(&cfg, app);
    }

    let (tx, rx) = unbounded();
    let progress_tx = tx.clone();
    let executor = BatchExecutor::new(app.naming_patterns(), ActivityLog::new())
        .with_progress(move |current, total, name| {
            let _ = progress_tx.send(Event::Progress {
                current,
                total,
                name: name.to_string(),
            });
        })
        .with_file_status(move |_, name, status| {
            let _ = tx.send(Event::FileDone {
                name: name.to_string(),
                status: status.to_string(),
            });
        });

    // 在后台线程运行，主线程负责显示进度
    let worker = thread::spawn(move || executor.start(&cfg));

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
            "{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} {msg}",
        )?
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    for event in rx {
        match event {
            Event::Progress {
                current,
                total,
                name,
            } => {
                pb.set_length(total as u64);
                pb.set_position(current.saturating_sub(1) as u64);
                pb.set_message(name);
            }
            Event::FileDone { name, status } => {
                pb.inc(1);
                match status.as_str() {
                    "error" => pb.println(format!("{} {}", style("Failed:").red(), name)),
                    "skip" => pb.println(format!("{} {}", style("Skipped:").yellow(), name)),
                    _ => {}
                }
            }
        }
    }
    pb.finish_and_clear();

    let result = worker
        .join()
        .map_err(|_| anyhow!("Worker thread panicked"))??;

    print_summary(&result);

    if let Some(path) = report {
        result.stats.export_json(&path)?;
        println!("Report written to {:?}", style(&path).blue());
    }

    if result.state == RunState::Failed {
        bail!("Run failed");
    }
    Ok(())
}

/// 试运行：扫描并显示将生成的名称
fn preview(cfg: &RunConfig, app: &AppConfig) -> Result<()> {
    let log = ActivityLog::new();
    let template = cfg.template(&app.naming_patterns())?;
    let files = scan_directory(&cfg.source, cfg.recursive, &cfg.filters, &log);

    let names = preview_names(&files, &template, cfg.counter_start, Local::now(), &log);
    for (original, archive) in names {
        println!("{} {} → {}", style("Dry run:").yellow(), original, style(archive).green());
    }

    let summary = summarize(&files);
    println!("{}", style("----------------------------------------").dim());
    println!("Files:          {}", summary.total_files);
    println!("Total Size:     {}", style(format_bytes(summary.total_size)).cyan());
    for (ext, count) in &summary.extensions {
        println!("  {:<12} {}", ext, count);
    }
    println!(
        "Estimated Time: {}",
        format_duration(BatchExecutor::estimate_duration(&files, cfg.level).as_secs())
    );
    Ok(())
}

/// 打印运行统计信息
fn print_summary(result: &RunResult) {
    println!("{}", style("----------------------------------------").dim());
    let headline = match result.state {
        RunState::Completed if result.success => {
            style("Run Completed Successfully!").green().bold()
        }
        RunState::Completed => style("Run Completed With Errors").yellow().bold(),
        RunState::Stopped => style("Run Stopped").yellow().bold(),
        _ => style("Run Failed").red().bold(),
    };
    println!("{}", headline);
    println!("Session:          {}", result.session_id);
    println!("Total Files:      {}", result.total_files);
    println!("Processed:        {}", style(result.processed_files).green());
    println!("Skipped:          {}", style(result.skipped_files).yellow());
    println!("Failed:           {}", style(result.failed_files).red().bold());
    println!("Success Rate:     {:.1}%", result.stats.success_rate());
    println!("Compression:      {:.1}%", result.stats.compression_ratio());
    println!(
        "Space Saved:      {}",
        style(format_signed_bytes(result.total_size_saved)).cyan()
    );
    println!(
        "Total Duration:   {}",
        style(format_duration(result.execution_time.as_secs())).bold()
    );

    for e in &result.errors {
        println!("  {} {}", style("Error:").red(), e);
    }
    for w in &result.stats.warnings {
        println!("  {} {}", style("Warning:").yellow(), w);
    }
}
