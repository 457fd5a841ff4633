use crate::error::{ErrorKind, ModError};
use crate::factorio;
use anyhow::{Context, Result};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

pub const SETTINGS_FILE_NAME: &str = "factoriomodtool.settings";
pub const SETTINGS_PATH_ENV: &str = "FACTORIOMODTOOL_SETTINGS";

const EXE_PATH_LABEL: &str = "exePath";
const READ_WRITE_PATH_LABEL: &str = "readWritePath";

/// Paths collected by `--setup`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub exe_path: Option<PathBuf>,
    pub read_write_path: Option<PathBuf>,
}

impl Settings {
    pub fn new(exe_path: impl Into<PathBuf>, read_write_path: impl Into<PathBuf>) -> Self {
        Self {
            exe_path: Some(exe_path.into()),
            read_write_path: Some(read_write_path.into()),
        }
    }

    /// Reads the settings file. A missing file is the fatal `MissingSettings` condition.
    pub fn load(path: &Path) -> std::result::Result<Self, ModError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ModError::new(
                    ErrorKind::MissingSettings,
                    path.display().to_string(),
                ));
            }
            Err(err) => {
                return Err(ModError::new(
                    ErrorKind::MissingSettings,
                    path.display().to_string(),
                )
                .with_detail(err));
            }
        };
        Ok(Self::parse(&raw))
    }

    pub fn parse(raw: &str) -> Self {
        let mut settings = Settings::default();
        let mut lines = raw.lines();
        while let Some(label) = lines.next() {
            match label.trim() {
                EXE_PATH_LABEL => settings.exe_path = lines.next().and_then(non_empty_path),
                READ_WRITE_PATH_LABEL => {
                    settings.read_write_path = lines.next().and_then(non_empty_path)
                }
                _ => {}
            }
        }
        settings
    }

    pub fn render(&self) -> String {
        format!(
            "{EXE_PATH_LABEL}\n{}\n{READ_WRITE_PATH_LABEL}\n{}",
            display_or_empty(self.exe_path.as_deref()),
            display_or_empty(self.read_write_path.as_deref()),
        )
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render()).context("write settings")?;
        Ok(())
    }

    pub fn player_data_path(&self) -> std::result::Result<&Path, ModError> {
        self.read_write_path
            .as_deref()
            .ok_or_else(|| ModError::new(ErrorKind::MissingRequiredPath, READ_WRITE_PATH_LABEL))
    }

    /// Mods directory next to `player-data.json`.
    pub fn mods_dir(&self) -> std::result::Result<PathBuf, ModError> {
        let player_data = self.player_data_path()?;
        let root = if player_data
            .file_name()
            .map(|name| name.to_string_lossy() == factorio::PLAYER_DATA_FILE_NAME)
            .unwrap_or(false)
        {
            player_data.parent().unwrap_or_else(|| Path::new(""))
        } else {
            player_data
        };
        Ok(root.join(factorio::MODS_DIR_NAME))
    }
}

pub fn settings_path() -> PathBuf {
    env::var_os(SETTINGS_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".").join(SETTINGS_FILE_NAME))
}

fn non_empty_path(line: &str) -> Option<PathBuf> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

fn display_or_empty(path: Option<&Path>) -> String {
    path.map(|path| path.display().to_string())
        .unwrap_or_default()
}
