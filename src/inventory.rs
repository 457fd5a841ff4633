use crate::factorio::{BASE_MOD_NAME, MOD_LIST_FILE_NAME};
use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

/// `major.minor.patch` as declared in a mod's `info.json`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ModVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Unparsable input yields `0.0.0`.
    pub fn parse(raw: &str) -> Self {
        parse_triplet(raw)
            .map(|(major, minor, patch)| Self::new(major, minor, patch))
            .unwrap_or_default()
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

fn parse_triplet(raw: &str) -> Option<(u32, u32, u32)> {
    let mut parts = raw.trim().split('.').map(|part| part.parse::<u32>().ok());
    let major = parts.next().flatten()?;
    let minor = parts.next().flatten()?;
    let patch = parts.next().flatten()?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

impl fmt::Display for ModVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone)]
pub struct Mod {
    pub name: String,
    pub enabled: bool,
    pub archive_path: Option<PathBuf>,
    pub version: ModVersion,
}

impl Mod {
    pub fn base() -> Self {
        Self {
            name: BASE_MOD_NAME.to_string(),
            enabled: true,
            archive_path: None,
            version: ModVersion::default(),
        }
    }

    pub fn from_archive(name: impl Into<String>, archive_path: PathBuf, version: ModVersion) -> Self {
        Self {
            name: name.into(),
            enabled: false,
            archive_path: Some(archive_path),
            version,
        }
    }

    pub fn is_base(&self) -> bool {
        self.name == BASE_MOD_NAME
    }
}

// Identity is the name alone.
impl PartialEq for Mod {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Mod {}

/// Name-keyed, insertion-ordered set of mods. Owns every record; mutation goes through
/// `get_mut` so no copy can drift from the stored value.
#[derive(Debug, Clone)]
pub struct Inventory {
    mods: IndexMap<String, Mod>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}

impl Inventory {
    /// An inventory holding only the base entry.
    pub fn new() -> Self {
        let mut mods = IndexMap::new();
        let base = Mod::base();
        mods.insert(base.name.clone(), base);
        Self { mods }
    }

    /// Adds a mod unless its name is already present. Returns whether it was added.
    pub fn insert(&mut self, mod_entry: Mod) -> bool {
        if self.mods.contains_key(&mod_entry.name) {
            return false;
        }
        self.mods.insert(mod_entry.name.clone(), mod_entry);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.mods.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Mod> {
        self.mods.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Mod> {
        self.mods.get_mut(name)
    }

    /// Removes a mod from the inventory. The base entry is never removed.
    pub fn remove(&mut self, name: &str) -> Option<Mod> {
        if name == BASE_MOD_NAME {
            return None;
        }
        self.mods.shift_remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mod> {
        self.mods.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Mod> {
        self.mods.values_mut()
    }

    pub fn len(&self) -> usize {
        self.mods.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.mods.keys().map(|name| name.as_str()).collect()
    }

    pub fn enabled_names(&self) -> Vec<&str> {
        self.mods
            .values()
            .filter(|mod_entry| mod_entry.enabled)
            .map(|mod_entry| mod_entry.name.as_str())
            .collect()
    }

    pub fn to_mod_list(&self) -> ModList {
        ModList {
            mods: self
                .mods
                .values()
                .map(|mod_entry| ModListEntry {
                    name: mod_entry.name.clone(),
                    enabled: mod_entry.enabled,
                })
                .collect(),
        }
    }
}

/// The on-disk `mod-list.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModList {
    pub mods: Vec<ModListEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModListEntry {
    pub name: String,
    pub enabled: bool,
}

impl ModList {
    pub fn path(mods_dir: &Path) -> PathBuf {
        mods_dir.join(MOD_LIST_FILE_NAME)
    }

    /// `Ok(None)` when the file does not exist.
    pub fn load(mods_dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(mods_dir);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).context("read mod-list.json"),
        };
        let list = serde_json::from_str(&raw).context("parse mod-list.json")?;
        Ok(Some(list))
    }

    /// Overwrites the file in place.
    pub fn save(&self, mods_dir: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self).context("serialize mod-list.json")?;
        fs::write(Self::path(mods_dir), raw).context("write mod-list.json")?;
        Ok(())
    }

    /// First recorded state for `name`.
    pub fn enabled(&self, name: &str) -> Option<bool> {
        self.mods
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.enabled)
    }
}
