//! Project configuration.
//!
//! This module defines the structure of the `cmdrack.toml` project file and
//! turns it into the command specs and environment the runner consumes.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::process::{CommandSpec, RunEnv};

/// Default project file name looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "cmdrack.toml";

/// Top-level structure of `cmdrack.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    /// Directory commands run in; relative values are resolved against the file's directory.
    pub base_dir: Option<PathBuf>,
    /// Entries prepended to `PATH` for every command.
    #[serde(default)]
    pub extra_paths: Vec<PathBuf>,
    /// Environment variables set for every command.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, rename = "command")]
    pub commands: Vec<CommandConfig>,
    #[serde(default, rename = "group")]
    pub groups: Vec<GroupConfig>,
}

/// A single `[[command]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    pub id: String,
    /// Display name (defaults to the id).
    pub name: Option<String>,
    /// Command line handed to the shell.
    pub cmd: String,
    /// Working directory override.
    pub cwd: Option<String>,
    /// Output substrings that signal a failure.
    #[serde(default)]
    pub failure_patterns: Vec<String>,
}

/// An ordered set of commands started and stopped together.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    pub commands: Vec<String>,
}

/// A validated project ready to hand to the runner.
#[derive(Debug, Clone)]
pub struct Project {
    pub base_dir: PathBuf,
    pub env: RunEnv,
    pub commands: Vec<CommandSpec>,
    pub groups: Vec<GroupConfig>,
}

impl Project {
    pub fn command(&self, id: &str) -> Option<&CommandSpec> {
        self.commands.iter().find(|c| c.id == id)
    }

    /// Commands of the named group, in group order.
    pub fn group(&self, name: &str) -> Option<Vec<CommandSpec>> {
        let group = self.groups.iter().find(|g| g.name == name)?;
        Some(
            group
                .commands
                .iter()
                .filter_map(|id| self.command(id).cloned())
                .collect(),
        )
    }
}

/// Loads, parses and validates a project file.
pub fn load_project(path: &Path) -> Result<Project> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: ProjectConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    let config_dir = path.parent().unwrap_or_else(|| Path::new(""));
    into_project(config, config_dir)
        .with_context(|| format!("invalid config file {}", path.display()))
}

/// Validates `config` and resolves its base directory against `config_dir`.
pub fn into_project(config: ProjectConfig, config_dir: &Path) -> Result<Project> {
    let mut seen = HashSet::new();
    for command in &config.commands {
        if command.id.trim().is_empty() {
            bail!("command with empty id");
        }
        if !seen.insert(command.id.as_str()) {
            bail!("duplicate command id: {}", command.id);
        }
        if command.cmd.trim().is_empty() {
            bail!("empty cmd for {}", command.id);
        }
    }
    for group in &config.groups {
        if let Some(unknown) = group.commands.iter().find(|id| !seen.contains(id.as_str())) {
            bail!("group {} references unknown command {}", group.name, unknown);
        }
    }

    let base_dir = match config.base_dir {
        Some(dir) if dir.is_absolute() => dir,
        Some(dir) => config_dir.join(dir),
        None => config_dir.to_path_buf(),
    };
    let commands = config
        .commands
        .into_iter()
        .map(|c| CommandSpec {
            name: c.name.unwrap_or_else(|| c.id.clone()),
            id: c.id,
            command_line: c.cmd,
            working_dir: c.cwd,
            failure_patterns: c.failure_patterns,
        })
        .collect();

    Ok(Project {
        base_dir,
        env: RunEnv {
            extra_paths: config.extra_paths,
            vars: config.env,
        },
        commands,
        groups: config.groups,
    })
}
