// Zipshelf - 命令行交互界面模块
// 提供交互式命令行界面，用于管理保存的运行配置，并在运行前确定冲突策略

use anyhow::{Context, Result};
use console::style;
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Select};
use std::path::PathBuf;

use crate::config::{is_custom_pattern, RunConfig, CUSTOM_PATTERN};
use crate::conflict::ConflictPolicy;
use crate::store::{AppConfig, Profile};

/// 运行交互式模式
///
/// 允许用户选择、创建或删除保存的配置文件（Profile）。
///
/// # 返回
/// * `Ok(Some(RunConfig))` - 用户选择的配置
/// * `Ok(None)` - 用户选择退出
/// * `Err(anyhow::Error)` - 操作失败
pub fn run_interactive_mode(app_config: &mut AppConfig) -> Result<Option<RunConfig>> {
    let theme = ColorfulTheme::default();

    println!(
        "{}",
        style(format!("Zipshelf v{}", env!("CARGO_PKG_VERSION")))
            .cyan()
            .bold()
    );
    println!("{}", style("=".repeat(40)).dim());

    loop {
        let mut names: Vec<String> = app_config.profiles.keys().cloned().collect();
        names.sort();

        let mut entries: Vec<(MenuEntry, String)> = names
            .iter()
            .filter_map(|name| {
                let p = app_config.profiles.get(name)?;
                let label = format!(
                    "{} ({} → {}) [{}, level {}]",
                    name,
                    p.source.display(),
                    p.backup.display(),
                    p.pattern,
                    p.level
                );
                Some((MenuEntry::Use(name.clone()), label))
            })
            .collect();
        entries.push((MenuEntry::Create, "+ New profile".to_string()));
        if !names.is_empty() {
            entries.push((MenuEntry::Delete, "- Remove profile".to_string()));
        }
        entries.push((MenuEntry::Quit, "Quit".to_string()));

        let labels: Vec<&str> = entries.iter().map(|(_, label)| label.as_str()).collect();
        let picked = Select::with_theme(&theme)
            .with_prompt("Choose a profile to run")
            .default(0)
            .items(&labels)
            .interact()?;

        match &entries[picked].0 {
            MenuEntry::Quit => return Ok(None),
            MenuEntry::Create => create_new_profile(app_config)?,
            MenuEntry::Delete => delete_profile(app_config)?,
            MenuEntry::Use(name) => {
                let profile = app_config
                    .profiles
                    .get(name)
                    .with_context(|| format!("Profile '{}' not found", name))?;

                if let Err(errors) = profile.validate() {
                    for e in errors {
                        println!("{} {}", style("Invalid profile:").red(), e);
                    }
                    continue;
                }
                return Ok(Some(RunConfig::from_profile(profile)?));
            }
        }
    }
}

/// 主菜单条目
enum MenuEntry {
    Use(String),
    Create,
    Delete,
    Quit,
}

/// 创建新的配置文件（Profile）
fn create_new_profile(config: &mut AppConfig) -> Result<()> {
    let theme = ColorfulTheme::default();

    let name: String = Input::with_theme(&theme)
        .with_prompt("Name for the new profile")
        .interact_text()?;

    let source: String = Input::with_theme(&theme)
        .with_prompt("Source Folder")
        .interact_text()?;

    let backup: String = Input::with_theme(&theme)
        .with_prompt("Backup Folder")
        .interact_text()?;

    // 命名模式
    let mut patterns: Vec<(String, String)> = config
        .naming_patterns()
        .iter()
        .map(|(id, t)| (id.to_string(), t.to_string()))
        .collect();
    patterns.push((CUSTOM_PATTERN.to_string(), "(custom template)".to_string()));
    let labels: Vec<String> = patterns
        .iter()
        .map(|(id, t)| format!("{:<20} {}", id, t))
        .collect();
    let selected = Select::with_theme(&theme)
        .with_prompt("Naming Pattern")
        .default(0)
        .items(&labels)
        .interact()?;
    let pattern = patterns[selected].0.clone();

    let custom_pattern = if is_custom_pattern(&pattern) {
        Some(
            Input::<String>::with_theme(&theme)
                .with_prompt("Custom Template")
                .default("{fecha}_{nombre_original}".to_string())
                .interact_text()?,
        )
    } else {
        None
    };

    // 文件过滤预设
    let presets: Vec<&String> = config.filter_presets.keys().collect();
    let preset = Select::with_theme(&theme)
        .with_prompt("File Filter")
        .default(0)
        .items(&presets)
        .interact()?;
    let filters = config
        .filter_preset(presets[preset])
        .map(<[String]>::to_vec)
        .unwrap_or_else(|| vec!["*".to_string()]);

    let level: u32 = Input::with_theme(&theme)
        .with_prompt("Compression Level (0-9)")
        .default(6)
        .validate_with(|v: &u32| -> Result<(), &str> {
            if *v <= 9 {
                Ok(())
            } else {
                Err("level must be between 0 and 9")
            }
        })
        .interact_text()?;

    let policy_labels: Vec<String> = ConflictPolicy::ALL
        .iter()
        .map(|p| match config.policy_description(*p) {
            Some(about) => format!("{:<10} {}", p.as_str(), style(about).dim()),
            None => p.as_str().to_string(),
        })
        .collect();
    let policy = Select::with_theme(&theme)
        .with_prompt("When an archive already exists")
        .default(0)
        .items(&policy_labels)
        .interact()?;

    let recursive = Confirm::with_theme(&theme)
        .with_prompt("Include subfolders?")
        .default(false)
        .interact()?;

    let profile = Profile {
        source: PathBuf::from(source),
        backup: PathBuf::from(backup),
        pattern,
        custom_pattern,
        recursive,
        filters,
        level,
        conflict: ConflictPolicy::ALL[policy].as_str().to_string(),
        verify: config.settings.verify_integrity,
        ..Default::default()
    };

    config.profiles.insert(name.clone(), profile);
    config.save()?;
    println!("{} profile '{}' saved.", style("Done:").green(), name);
    Ok(())
}

/// 删除配置文件（Profile），删除前需要确认
fn delete_profile(config: &mut AppConfig) -> Result<()> {
    let theme = ColorfulTheme::default();
    let mut names: Vec<&String> = config.profiles.keys().collect();
    names.sort();

    let Some(index) = Select::with_theme(&theme)
        .with_prompt("Profile to remove (Esc to cancel)")
        .items(&names)
        .interact_opt()?
    else {
        return Ok(());
    };
    let name = names[index].clone();

    let confirmed = Confirm::with_theme(&theme)
        .with_prompt(format!("Remove profile '{}'?", style(&name).red().bold()))
        .default(false)
        .interact()?;
    if !confirmed {
        println!("Kept '{}'.", name);
        return Ok(());
    }

    config.profiles.remove(&name);
    config.save()?;
    println!("{} profile '{}' removed.", style("Done:").green(), name);
    Ok(())
}

/// 运行前把 `ask` 策略换成具体策略
///
/// 核心层没有交互通道。有终端时询问用户，否则使用 `rename`。
pub fn resolve_ask_policy(policy: ConflictPolicy) -> Result<ConflictPolicy> {
    if policy != ConflictPolicy::Ask {
        return Ok(policy);
    }
    if !console::user_attended() {
        return Ok(ConflictPolicy::Rename);
    }

    let choices = [
        ConflictPolicy::Rename,
        ConflictPolicy::Overwrite,
        ConflictPolicy::Skip,
    ];
    let labels: Vec<&str> = choices.iter().map(|p| p.as_str()).collect();
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("When a file already exists")
        .default(0)
        .items(&labels)
        .interact()?;
    Ok(choices[selection])
}
