//! Discovers installed mod archives and reads their identity from `info.json`.

use crate::{
    error::{ErrorKind, ModError},
    factorio::{ARCHIVE_EXTENSION, MANIFEST_FILE_NAME},
    inventory::{Inventory, Mod, ModVersion},
};
use serde::Deserialize;
use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Deserialize)]
struct Manifest {
    name: String,
    #[serde(default)]
    version: Option<String>,
}

/// Result of scanning a mods directory.
#[derive(Debug)]
pub struct ScanOutcome {
    pub inventory: Inventory,
    /// Archives that could not be read, in scan order.
    pub skipped: Vec<ModError>,
}

/// Builds the raw inventory for `mods_dir`: `base` first, then one entry per readable
/// archive in file-name order. Unreadable archives never stop the scan.
pub fn scan(mods_dir: &Path) -> Result<ScanOutcome, ModError> {
    if !mods_dir.is_dir() {
        return Err(ModError::new(
            ErrorKind::MissingRequiredPath,
            mods_dir.display().to_string(),
        ));
    }

    let mut inventory = Inventory::new();
    let mut skipped = Vec::new();
    for path in archive_paths(mods_dir) {
        match read_archive(&path) {
            Ok(mod_entry) => {
                debug!(mod_name = %mod_entry.name, version = %mod_entry.version, archive = %path.display(), "found mod");
                let name = mod_entry.name.clone();
                if !inventory.insert(mod_entry) {
                    warn!(mod_name = %name, archive = %path.display(), "duplicate mod name; keeping the first archive");
                }
            }
            Err(err) => skipped.push(err),
        }
    }
    Ok(ScanOutcome { inventory, skipped })
}

fn archive_paths(mods_dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(mods_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(ARCHIVE_EXTENSION))
                .unwrap_or(false)
        })
        .collect()
}

/// Reads one archive into a `Mod` with `enabled = false`.
pub fn read_archive(path: &Path) -> Result<Mod, ModError> {
    let corrupt = |detail: String| {
        ModError::new(ErrorKind::CorruptArchive, path.display().to_string()).with_detail(detail)
    };

    let file = fs::File::open(path).map_err(|err| corrupt(err.to_string()))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|err| corrupt(err.to_string()))?;

    let index = manifest_index(&mut archive).ok_or_else(|| corrupt(format!("no {MANIFEST_FILE_NAME}")))?;
    let mut entry = archive
        .by_index(index)
        .map_err(|err| corrupt(err.to_string()))?;
    let mut raw = String::new();
    entry
        .read_to_string(&mut raw)
        .map_err(|err| corrupt(err.to_string()))?;

    let manifest: Manifest =
        serde_json::from_str(&raw).map_err(|err| corrupt(format!("{MANIFEST_FILE_NAME}: {err}")))?;
    let version = manifest
        .version
        .as_deref()
        .map(ModVersion::parse)
        .unwrap_or_default();
    Ok(Mod::from_archive(manifest.name, path.to_path_buf(), version))
}

/// Shallowest entry whose file name is exactly `info.json`.
fn manifest_index<R: Read + std::io::Seek>(archive: &mut zip::ZipArchive<R>) -> Option<usize> {
    let mut candidates: Vec<(usize, usize)> = Vec::new();
    for index in 0..archive.len() {
        let Ok(entry) = archive.by_index_raw(index) else {
            continue;
        };
        if entry.is_dir() {
            continue;
        }
        let entry_name = entry.name().replace('\\', "/");
        let file_name = entry_name.rsplit('/').next().unwrap_or_default();
        if file_name != MANIFEST_FILE_NAME {
            continue;
        }
        let depth = entry_name.matches('/').count();
        candidates.push((depth, index));
    }
    candidates.sort();
    candidates.first().map(|(_, index)| *index)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    pub(crate) fn write_mod_archive(dir: &Path, name: &str, version: &str) -> PathBuf {
        let path = dir.join(format!("{name}_{version}.zip"));
        let entry = format!("{name}_{version}/{MANIFEST_FILE_NAME}");
        let manifest = format!(r#"{{"name": "{name}", "version": "{version}", "title": "{name}"}}"#);
        write_zip(&path, &[(entry.as_str(), manifest.as_str())]);
        path
    }

    pub(crate) fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, contents) in entries {
            writer
                .start_file(name.to_string(), SimpleFileOptions::default())
                .unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn base_is_prepended_and_archives_follow_in_name_order() {
        let dir = TempDir::new().unwrap();
        write_mod_archive(dir.path(), "zeta", "1.0.0");
        write_mod_archive(dir.path(), "alpha", "0.2.1");
        fs::write(dir.path().join("mod-list.json"), "{}").unwrap();

        let outcome = scan(dir.path()).unwrap();
        let inventory = outcome.inventory;
        assert_eq!(inventory.names(), vec!["base", "alpha", "zeta"]);
        let alpha = inventory.get("alpha").unwrap();
        assert_eq!(alpha.version, ModVersion::new(0, 2, 1));
        assert!(!alpha.enabled);
        assert!(alpha.archive_path.as_ref().unwrap().ends_with("alpha_0.2.1.zip"));
        assert!(outcome.skipped.is_empty());
    }

    #[test]
    fn corrupt_and_manifestless_archives_are_skipped() {
        let dir = TempDir::new().unwrap();
        write_mod_archive(dir.path(), "good", "1.0.0");
        fs::write(dir.path().join("broken.zip"), b"not a zip").unwrap();
        write_zip(&dir.path().join("empty.zip"), &[("readme.txt", "hi")]);
        write_zip(&dir.path().join("badjson.zip"), &[("x/info.json", r#"{"title": 1}"#)]);

        let outcome = scan(dir.path()).unwrap();
        assert_eq!(outcome.inventory.names(), vec!["base", "good"]);
        assert_eq!(outcome.skipped.len(), 3);
        assert!(outcome
            .skipped
            .iter()
            .all(|err| err.kind == ErrorKind::CorruptArchive));
    }

    #[test]
    fn duplicate_names_keep_first_archive() {
        let dir = TempDir::new().unwrap();
        write_mod_archive(dir.path(), "foo", "1.0.0");
        write_mod_archive(dir.path(), "foo", "1.1.0");
        let inventory = scan(dir.path()).unwrap().inventory;
        assert_eq!(inventory.len(), 2);
        assert_eq!(
            inventory.get("foo").unwrap().version,
            ModVersion::new(1, 0, 0)
        );
    }

    #[test]
    fn top_level_manifest_wins_over_nested_one() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pack.zip");
        write_zip(
            &path,
            &[
                ("pack/sub/info.json", r#"{"name": "nested"}"#),
                ("pack/info.json", r#"{"name": "pack", "version": "weird"}"#),
            ],
        );
        let mod_entry = read_archive(&path).unwrap();
        assert_eq!(mod_entry.name, "pack");
        assert!(mod_entry.version.is_zero());
    }

    #[test]
    fn missing_mods_dir_is_missing_required_path() {
        let dir = TempDir::new().unwrap();
        let err = scan(&dir.path().join("mods")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MissingRequiredPath);
    }
}
