//! Data handed to the engine for each run.
//!
//! `CommandSpec` is the user-configured command; the engine reads it but never
//! changes it. `RunEnv` carries the per-project environment additions.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// A user-defined shell command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Unique identifier. At most one process runs per id.
    pub id: String,
    /// Friendly name for logs.
    pub name: String,
    /// Command line, passed to the platform shell as-is.
    pub command_line: String,
    /// Working directory override; relative values are joined onto the base directory.
    pub working_dir: Option<String>,
    /// Substrings that mark an output line as a failure.
    pub failure_patterns: Vec<String>,
}

impl CommandSpec {
    pub fn new(id: impl Into<String>, command_line: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            command_line: command_line.into(),
            working_dir: None,
            failure_patterns: Vec::new(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_failure_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failure_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }
}

/// Environment additions applied on top of the inherited environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunEnv {
    /// Entries prepended to `PATH`, in order.
    pub extra_paths: Vec<PathBuf>,
    /// Extra variables set for every command.
    pub vars: BTreeMap<String, String>,
}

impl RunEnv {
    pub fn with_extra_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            extra_paths: paths.into_iter().map(Into::into).collect(),
            vars: BTreeMap::new(),
        }
    }
}
