// Zipshelf - 配置文件存储模块
// 负责管理用户配置文件的加载和保存

use crate::archive::MAX_LEVEL;
use crate::config::{ConfigError, NamingPatterns, DEFAULT_PATTERN, DEFAULT_PATTERNS};
use crate::conflict::ConflictPolicy;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// 保存的运行配置（Profile）
///
/// 缺省字段使用与命令行相同的默认值。
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Profile {
    /// 源目录
    pub source: PathBuf,

    /// 备份目录
    pub backup: PathBuf,

    /// 命名模式 ID
    pub pattern: String,

    /// 自定义命名模板（模式为 `personalizado` 时使用）
    pub custom_pattern: Option<String>,

    pub recursive: bool,
    pub filters: Vec<String>,
    pub level: u32,

    /// 冲突处理策略（rename / overwrite / skip / ask）
    pub conflict: String,

    pub verify: bool,
    pub deep_verify: bool,
    pub counter_start: u64,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            source: PathBuf::new(),
            backup: PathBuf::new(),
            pattern: DEFAULT_PATTERN.to_string(),
            custom_pattern: None,
            recursive: false,
            filters: vec!["*".to_string()],
            level: 6,
            conflict: ConflictPolicy::default().to_string(),
            verify: true,
            deep_verify: false,
            counter_start: 1,
        }
    }
}

impl Profile {
    /// 检查保存的值是否可用
    ///
    /// 路径与命名模式在运行开始时校验，这里只检查不依赖文件系统的字段。
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();
        if self.level > MAX_LEVEL {
            errors.push(ConfigError::LevelOutOfRange(self.level));
        }
        if self.conflict.parse::<ConflictPolicy>().is_err() {
            errors.push(ConfigError::UnknownPolicy(self.conflict.clone()));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// 全局设置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// 默认日志级别（可被环境变量 `ZIPSHELF_LOG` 覆盖）
    pub log_level: String,

    /// 保留的日志文件数量
    pub max_log_files: usize,

    /// 默认是否校验压缩包
    pub verify_integrity: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            max_log_files: 30,
            verify_integrity: true,
        }
    }
}

/// 应用程序全局配置
///
/// 配置文件存储在系统标准配置目录中。文件中缺少的键使用内置默认值。
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// 命名模式，键为模式 ID
    pub naming_patterns: BTreeMap<String, String>,

    /// 冲突策略说明，键为策略名称
    pub conflict_policies: BTreeMap<String, String>,

    /// 文件过滤预设
    pub filter_presets: BTreeMap<String, Vec<String>>,

    /// 配置文件集合，键为配置文件名称
    pub profiles: HashMap<String, Profile>,

    pub settings: Settings,
}

impl Default for AppConfig {
    fn default() -> Self {
        let naming_patterns = DEFAULT_PATTERNS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let conflict_policies = [
            ("rename", "add a numeric suffix to the new name"),
            ("overwrite", "replace the existing file"),
            ("skip", "leave the existing file and skip"),
            ("ask", "ask before each run (falls back to rename)"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let filter_presets = BTreeMap::from([
            ("todos".to_string(), strings(&["*"])),
            (
                "documentos".to_string(),
                strings(&["*.pdf", "*.doc", "*.docx", "*.txt", "*.xls", "*.xlsx"]),
            ),
            (
                "imagenes".to_string(),
                strings(&["*.jpg", "*.jpeg", "*.png", "*.gif", "*.bmp", "*.tiff"]),
            ),
        ]);

        Self {
            naming_patterns,
            conflict_policies,
            filter_presets,
            profiles: HashMap::new(),
            settings: Settings::default(),
        }
    }
}

impl AppConfig {
    /// 从标准配置目录加载应用配置
    ///
    /// # 返回
    /// * `Ok(AppConfig)` - 加载的配置，如果文件不存在则返回默认配置
    /// * `Err(anyhow::Error)` - 如果配置文件存在但解析失败
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    /// 从指定文件加载配置
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file {:?}", path))
    }

    /// 保存配置到标准配置目录
    ///
    /// 如果配置目录不存在，会自动创建。
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    /// 保存配置到指定文件
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).context("Failed to write config file")
    }

    /// 核心只通过这张只读表读取命名模式
    pub fn naming_patterns(&self) -> NamingPatterns {
        NamingPatterns::new(self.naming_patterns.clone())
    }

    /// 过滤预设；名称未知时返回 `None`
    pub fn filter_preset(&self, name: &str) -> Option<&[String]> {
        self.filter_presets.get(name).map(Vec::as_slice)
    }

    /// 冲突策略的说明文字；配置中没有时返回 `None`
    pub fn policy_description(&self, policy: ConflictPolicy) -> Option<&str> {
        self.conflict_policies
            .get(policy.as_str())
            .map(String::as_str)
    }

    /// 日志目录（与配置文件位于同一项目目录下）
    pub fn log_dir() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.data_local_dir().join("logs"))
    }

    /// 获取配置文件的路径
    ///
    /// 使用 `directories` crate 获取平台标准的配置目录：
    /// - Windows: `C:\Users\<用户>\AppData\Roaming\zipshelf\config.toml`
    /// - macOS: `~/Library/Application Support/zipshelf/config.toml`
    /// - Linux: `~/.config/zipshelf/config.toml`
    pub fn get_config_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("", "", "zipshelf").context("Could not determine config directory")
    }
}
