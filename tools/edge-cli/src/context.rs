//! CLI execution context.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use edge_core::CacheConfig;

use crate::output::Output;

/// Config file names searched for, nearest directory first.
pub const CONFIG_FILE_NAMES: [&str; 3] = ["edge-cache.toml", ".edge-cache.toml", "edge-cache.json"];

/// Execution context for CLI commands.
pub struct Context {
    /// Cache configuration.
    pub config: CacheConfig,
    /// Where `config` was loaded from, if anywhere.
    pub config_path: Option<PathBuf>,
    /// Output handler.
    pub output: Output,
    /// Working directory.
    pub cwd: PathBuf,
}

impl Context {
    /// Load context from config file.
    pub fn load(config_path: Option<&str>, output: Output) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;

        let (config, config_path) = if let Some(path) = config_path {
            let path = PathBuf::from(path);
            let config = CacheConfig::load(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            (config, Some(path))
        } else {
            match find_config_file(&cwd) {
                Some(path) => {
                    let config = CacheConfig::load(&path)
                        .with_context(|| format!("Failed to load {}", path.display()))?;
                    (config, Some(path))
                }
                None => (CacheConfig::default(), None),
            }
        };

        if let Some(path) = &config_path {
            output.debug(&format!("Using config {}", path.display()));
        }

        Ok(Self {
            config,
            config_path,
            output,
            cwd,
        })
    }
}

/// Find a config file in `start` or any parent directory.
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        for name in &CONFIG_FILE_NAMES {
            let candidate = current.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        if !current.pop() {
            return None;
        }
    }
}
