// ABOUTME: Persisted CLI state - the default target database URL
// ABOUTME: Stored as JSON in ~/.refdata-reconciler/state.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct AppState {
    pub target_url: Option<String>,
}

fn get_state_path() -> Result<PathBuf> {
    let home_dir =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
    Ok(home_dir.join(".refdata-reconciler").join("state.json"))
}

pub fn load() -> Result<AppState> {
    load_from(&get_state_path()?)
}

pub fn save(state: &AppState) -> Result<()> {
    save_to(&get_state_path()?, state)
}

pub fn load_from(path: &Path) -> Result<AppState> {
    if !path.exists() {
        return Ok(AppState::default());
    }
    let state_file =
        fs::File::open(path).with_context(|| format!("Failed to open state file {:?}", path))?;
    let state = serde_json::from_reader(state_file)
        .with_context(|| format!("State file {:?} is corrupt", path))?;
    Ok(state)
}

pub fn save_to(path: &Path, state: &AppState) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create state directory {:?}", dir))?;
    }
    let state_file =
        fs::File::create(path).with_context(|| format!("Failed to write state file {:?}", path))?;
    serde_json::to_writer_pretty(state_file, state)?;
    Ok(())
}
