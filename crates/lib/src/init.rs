//! Initialize the configuration directory: create ~/.sage, a default config, and a sample
//! project descriptor to edit.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config;

static SAMPLE_PROJECT: &str = include_str!("../config/project.json");

/// Ensure the project descriptor exists before trying to talk to saged.
pub fn require_project(project_path: &Path) -> Result<()> {
    if !project_path.exists() {
        anyhow::bail!(
            "no project descriptor; run `sage init` or pass --project (file not found: {})",
            project_path.display()
        );
    }
    Ok(())
}

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with `{}` if missing.
/// - Seeds the project descriptor (default `project.json`) from the bundled sample if missing.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, b"{}")
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let (config, _) = config::load_config(Some(config_path.to_path_buf()))?;
    let project_path = config::resolve_project_path(&config, config_path);
    if !project_path.exists() {
        if let Some(parent) = project_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
        std::fs::write(&project_path, SAMPLE_PROJECT)
            .with_context(|| format!("writing sample project to {}", project_path.display()))?;
        log::info!("wrote sample project to {}", project_path.display());
    } else {
        log::debug!("project already exists at {}, skipping", project_path.display());
    }

    Ok(config_dir.to_path_buf())
}
