// Zipshelf - 批量压缩与备份工具
// 模块声明文件

/// 活动日志模块（带监听器的分级事件）
pub mod activity;

/// 压缩包写入与校验模块
pub mod archive;

/// 命令行交互界面模块
pub mod cli;

/// 运行配置模块
pub mod config;

/// 命名冲突处理模块
pub mod conflict;

/// 批处理执行器模块
pub mod executor;

/// 内容哈希模块
pub mod hasher;

/// 日志初始化模块
pub mod logging;

/// 压缩包命名模块
pub mod naming;

/// 单个文件处理结果
pub mod outcome;

/// 日志清理模块
pub mod prune;

/// 备份移动模块
pub mod relocator;

/// 源目录扫描模块
pub mod scanner;

/// 会话统计模块
pub mod session;

/// 配置文件存储模块
pub mod store;

/// 工具函数模块
pub mod utils;
