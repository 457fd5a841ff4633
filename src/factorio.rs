use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const GAME_NAME: &str = "Factorio";
pub const EXE_FILE_NAME: &str = "factorio.exe";
pub const PLAYER_DATA_FILE_NAME: &str = "player-data.json";
pub const MODS_DIR_NAME: &str = "mods";
pub const MOD_LIST_FILE_NAME: &str = "mod-list.json";
pub const MANIFEST_FILE_NAME: &str = "info.json";
pub const ARCHIVE_EXTENSION: &str = "zip";
pub const BASE_MOD_NAME: &str = "base";
pub const PORTAL_URL: &str = "https://mods.factorio.com";
pub const PORTAL_MOD_PAGE_PREFIX: &str = "https://mods.factorio.com/mod/";

/// Login stored by the game client. Both fields empty means the player never logged in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceCredentials {
    pub username: String,
    pub token: String,
}

impl ServiceCredentials {
    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.token.is_empty()
    }
}

#[derive(Debug, Default, Deserialize)]
struct PlayerData {
    #[serde(rename = "service-username", default)]
    service_username: Option<String>,
    #[serde(rename = "service-token", default)]
    service_token: Option<String>,
}

pub fn load_credentials(player_data_path: &Path) -> Result<ServiceCredentials> {
    let raw = fs::read_to_string(player_data_path).context("read player-data.json")?;
    parse_credentials(&raw)
}

pub fn parse_credentials(raw: &str) -> Result<ServiceCredentials> {
    let data: PlayerData = serde_json::from_str(raw).context("parse player-data.json")?;
    Ok(ServiceCredentials {
        username: data.service_username.unwrap_or_default(),
        token: data.service_token.unwrap_or_default(),
    })
}

pub fn looks_like_executable(path: &Path) -> bool {
    path.is_file() && has_file_name(path, EXE_FILE_NAME)
}

pub fn looks_like_player_data(path: &Path) -> bool {
    path.is_file() && has_file_name(path, PLAYER_DATA_FILE_NAME)
}

fn has_file_name(path: &Path, expected: &str) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy() == expected)
        .unwrap_or(false)
}

/// Best guess for the read/write data directory, used as a hint by setup.
pub fn default_read_write_dir() -> Option<PathBuf> {
    let base = BaseDirs::new()?;
    let candidates = if cfg!(target_os = "windows") {
        vec![base.data_dir().join(GAME_NAME)]
    } else if cfg!(target_os = "macos") {
        vec![base.data_dir().join("factorio")]
    } else {
        vec![base.home_dir().join(".factorio")]
    };
    candidates
        .into_iter()
        .find(|candidate| candidate.join(PLAYER_DATA_FILE_NAME).exists())
}
