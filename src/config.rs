// Zipshelf - 运行配置模块
// 负责创建和校验单次批处理运行的配置

use crate::archive::MAX_LEVEL;
use crate::conflict::ConflictPolicy;
use crate::naming::DEFAULT_TEMPLATE;
use crate::store::Profile;
use path_clean::PathClean;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 自定义命名模板的模式 ID
pub const CUSTOM_PATTERN: &str = "personalizado";

/// [`CUSTOM_PATTERN`] 的英文别名
pub const CUSTOM_PATTERN_ALIAS: &str = "custom";

/// 默认命名模式 ID
pub const DEFAULT_PATTERN: &str = "fecha_archivo";

/// 内置命名模式
pub const DEFAULT_PATTERNS: &[(&str, &str)] = &[
    ("fecha_archivo", DEFAULT_TEMPLATE),
    ("archivo_fecha", "{nombre_original}_{fecha}"),
    ("contador_archivo", "{contador:03d}_{nombre_original}"),
    ("timestamp_archivo", "{timestamp}_{nombre_original}"),
    ("nombre_original", "{nombre_original}"),
    ("factura", "{numero_factura}_{fecha}"),
];

/// 配置校验错误，每条规则对应一个变体
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("source folder does not exist: {0:?}")]
    SourceMissing(PathBuf),

    #[error("source path is not a directory: {0:?}")]
    SourceNotDirectory(PathBuf),

    #[error("source folder is not readable: {0:?}")]
    SourceUnreadable(PathBuf),

    #[error("backup folder cannot be created: {0:?}")]
    BackupNotCreatable(PathBuf),

    #[error("compression level must be between 0 and 9, got {0}")]
    LevelOutOfRange(u32),

    #[error("unknown naming pattern: {0}")]
    UnknownPattern(String),

    #[error("custom naming pattern is empty")]
    EmptyCustomPattern,

    #[error("unknown conflict policy: {0}")]
    UnknownPolicy(String),
}

/// 命名模式表（只读）
///
/// 由配置存储提供，键为模式 ID，值为模板字符串。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingPatterns {
    patterns: BTreeMap<String, String>,
}

impl NamingPatterns {
    pub fn new(patterns: BTreeMap<String, String>) -> Self {
        Self { patterns }
    }

    /// 模式 ID 对应的模板
    pub fn get(&self, id: &str) -> Option<&str> {
        self.patterns.get(id).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.patterns.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Default for NamingPatterns {
    fn default() -> Self {
        Self::new(
            DEFAULT_PATTERNS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// 是否为自定义模板的模式 ID
pub fn is_custom_pattern(id: &str) -> bool {
    id == CUSTOM_PATTERN || id == CUSTOM_PATTERN_ALIAS
}

/// 单次运行的配置
///
/// 运行开始前构建，运行期间不再修改。计数器的起始值 `counter_start`
/// 在运行开始时复制到执行器持有的计数器中。
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// 源目录
    pub source: PathBuf,

    /// 备份目录（原文件移入此处）
    pub backup: PathBuf,

    /// 命名模式 ID，`personalizado` 表示使用 `custom_pattern`
    pub pattern: String,

    /// 自定义命名模板
    pub custom_pattern: Option<String>,

    /// 是否进入子目录
    pub recursive: bool,

    /// 文件名过滤（Glob 风格，忽略大小写）
    pub filters: Vec<String>,

    /// 压缩级别 0-9
    pub level: u32,

    /// 冲突处理策略
    pub conflict: ConflictPolicy,

    /// 写入后校验压缩包
    pub verify: bool,

    /// 校验时比较内容哈希
    pub deep_verify: bool,

    /// 计数器起始值
    pub counter_start: u64,
}

impl RunConfig {
    /// 使用默认选项创建运行配置
    ///
    /// 路径会被规范化（相对路径基于当前目录，并清理 `.` 与 `..`）。
    pub fn new(source: impl AsRef<Path>, backup: impl AsRef<Path>) -> Self {
        Self {
            source: normalize(source.as_ref()),
            backup: normalize(backup.as_ref()),
            pattern: DEFAULT_PATTERN.to_string(),
            custom_pattern: None,
            recursive: false,
            filters: vec!["*".to_string()],
            level: 6,
            conflict: ConflictPolicy::Rename,
            verify: true,
            deep_verify: false,
            counter_start: 1,
        }
    }

    /// 从保存的配置文件（Profile）创建运行配置
    ///
    /// # 返回
    /// * `Ok(RunConfig)` - 创建的运行配置
    /// * `Err(ConfigError)` - Profile 中的冲突策略无法识别
    pub fn from_profile(profile: &Profile) -> Result<Self, ConfigError> {
        let conflict = profile
            .conflict
            .parse()
            .map_err(|_| ConfigError::UnknownPolicy(profile.conflict.clone()))?;

        Ok(Self {
            pattern: profile.pattern.clone(),
            custom_pattern: profile.custom_pattern.clone(),
            recursive: profile.recursive,
            filters: profile.filters.clone(),
            level: profile.level,
            conflict,
            verify: profile.verify,
            deep_verify: profile.deep_verify,
            counter_start: profile.counter_start,
            ..Self::new(&profile.source, &profile.backup)
        })
    }

    /// 本次运行使用的命名模板
    ///
    /// # 返回
    /// * `Ok(String)` - 模板字符串
    /// * `Err(ConfigError)` - 模式未知，或自定义模板为空
    pub fn template(&self, patterns: &NamingPatterns) -> Result<String, ConfigError> {
        if is_custom_pattern(&self.pattern) {
            return match self.custom_pattern.as_deref().map(str::trim) {
                Some(t) if !t.is_empty() => Ok(t.to_string()),
                _ => Err(ConfigError::EmptyCustomPattern),
            };
        }
        patterns
            .get(&self.pattern)
            .map(str::to_string)
            .ok_or_else(|| ConfigError::UnknownPattern(self.pattern.clone()))
    }

    /// 校验配置
    ///
    /// 不修改文件系统：备份目录只检查能否被创建（最近的已存在祖先是可写目录）。
    ///
    /// # 返回
    /// * `Ok(())` - 配置有效
    /// * `Err(Vec<ConfigError>)` - 所有未通过的规则
    pub fn validate(&self, patterns: &NamingPatterns) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        if !self.source.exists() {
            errors.push(ConfigError::SourceMissing(self.source.clone()));
        } else if !self.source.is_dir() {
            errors.push(ConfigError::SourceNotDirectory(self.source.clone()));
        } else if fs::read_dir(&self.source).is_err() {
            errors.push(ConfigError::SourceUnreadable(self.source.clone()));
        }

        if !backup_creatable(&self.backup) {
            errors.push(ConfigError::BackupNotCreatable(self.backup.clone()));
        }

        if self.level > MAX_LEVEL {
            errors.push(ConfigError::LevelOutOfRange(self.level));
        }

        if let Err(e) = self.template(patterns) {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.clean();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path).clean(),
        Err(_) => path.clean(),
    }
}

/// 找到最近的已存在祖先，要求它是目录且不是只读的
fn backup_creatable(path: &Path) -> bool {
    let mut current = Some(path);
    while let Some(p) = current {
        if let Ok(meta) = fs::metadata(p) {
            return meta.is_dir() && !meta.permissions().readonly();
        }
        current = p.parent();
    }
    false
}
