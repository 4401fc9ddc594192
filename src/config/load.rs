use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use regex::RegexBuilder;

use crate::backup::space::MIN_FREE_SPACE_MARGIN;
use crate::config::model::{Config, FilterConfig, QuickActionConfig, RuntimeConfig};
use crate::dispatch::actions::QuickActionRecord;
use crate::error::{ConfigError, Result, VaultError};
use crate::filter::FilterRules;
use crate::types::{ConflictPolicy, PermissionStrategy};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub fn load_config(path: &str) -> Result<RuntimeConfig> {
    let mut contents = String::new();
    File::open(path)
        .map_err(|e| VaultError::message(format!("open config {}: {}", path, e)))?
        .read_to_string(&mut contents)
        .map_err(VaultError::Io)?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> Result<RuntimeConfig> {
    if contents.trim().is_empty() {
        return parse_runtime(Config::default());
    }
    let cfg: Config =
        serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
    parse_runtime(cfg)
}

fn parse_runtime(cfg: Config) -> Result<RuntimeConfig> {
    let defaults = RuntimeConfig::default();

    let permission_strategy = match cfg.permission_strategy.as_deref() {
        Some(raw) => PermissionStrategy::parse(raw).map_err(ConfigError::Invalid)?,
        None => defaults.permission_strategy,
    };
    let conflict_policy = match cfg.conflict_policy.as_deref() {
        Some(raw) => ConflictPolicy::parse(raw).map_err(ConfigError::Invalid)?,
        None => defaults.conflict_policy,
    };
    let free_space_margin = cfg.free_space_margin.unwrap_or(defaults.free_space_margin);
    if free_space_margin.is_nan() || free_space_margin < MIN_FREE_SPACE_MARGIN {
        return Err(ConfigError::Invalid(format!(
            "freeSpaceMargin {} must be at least {}",
            free_space_margin, MIN_FREE_SPACE_MARGIN
        ))
        .into());
    }
    if let Some(level) = cfg.log_level.as_deref() {
        if !LOG_LEVELS.contains(&level.trim().to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logLevel {} must be one of {}",
                level,
                LOG_LEVELS.join(", ")
            ))
            .into());
        }
    }
    let destination = match cfg.destination {
        Some(raw) if raw.trim().is_empty() => {
            return Err(ConfigError::Invalid("destination is empty".to_string()).into())
        }
        Some(raw) => Some(PathBuf::from(raw)),
        None => None,
    };
    let users_root = match cfg.users_root {
        Some(raw) if raw.trim().is_empty() => {
            return Err(ConfigError::Invalid("usersRoot is empty".to_string()).into())
        }
        Some(raw) => PathBuf::from(raw),
        None => defaults.users_root,
    };

    Ok(RuntimeConfig {
        destination,
        users_root,
        permission_strategy,
        conflict_policy,
        free_space_margin,
        log_level: cfg.log_level.map(|l| l.trim().to_ascii_lowercase()),
        filter_rules: filter_rules(cfg.filter.unwrap_or_default())?,
        quick_actions: quick_actions(cfg.quick_actions)?,
    })
}

fn filter_rules(overrides: FilterConfig) -> Result<FilterRules> {
    let mut rules = FilterRules::default();
    if let Some(value) = overrides.enable_file_size_limit {
        rules.enable_file_size_limit = value;
    }
    if let Some(value) = overrides.enable_folder_size_limit {
        rules.enable_folder_size_limit = value;
    }
    if let Some(value) = overrides.max_single_file_size {
        rules.max_single_file_size = value;
    }
    if let Some(value) = overrides.max_folder_size {
        rules.max_folder_size = value;
    }
    if let Some(patterns) = overrides.exclude_patterns {
        for pattern in &patterns {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| ConfigError::Invalid(format!("filter pattern {}: {}", pattern, e)))?;
        }
        rules.exclude_patterns = patterns;
    }
    if let Some(folders) = overrides.exclude_folders {
        rules.exclude_folders = folders;
    }
    for name in overrides.dangerous_files {
        if !rules
            .dangerous_files
            .iter()
            .any(|d| d.eq_ignore_ascii_case(&name))
        {
            rules.dangerous_files.push(name);
        }
    }
    Ok(rules)
}

fn quick_actions(raw: Vec<QuickActionConfig>) -> Result<Vec<QuickActionRecord>> {
    let mut names = HashSet::new();
    let mut records = Vec::new();
    for action in raw {
        if !names.insert(action.name.to_lowercase()) {
            return Err(ConfigError::Invalid(format!("duplicate quick action {}", action.name)).into());
        }
        let record = QuickActionRecord {
            name: action.name,
            sources: action.sources,
            destination: action.destination,
            files: if action.files.is_empty() {
                vec!["*".to_string()]
            } else {
                action.files
            },
            requires_admin: action.requires_admin,
        };
        record
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        records.push(record);
    }
    Ok(records)
}
