//! Mod portal access: release lookup and package download.

use crate::{
    error::{ErrorKind, ModError},
    factorio::{ServiceCredentials, PORTAL_MOD_PAGE_PREFIX, PORTAL_URL},
};
use anyhow::{Context, Result};
use serde::Deserialize;
use sha1::{Digest, Sha1};
use std::{
    env,
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

pub const PORTAL_URL_ENV: &str = "FACTORIOMODTOOL_PORTAL";
const USER_AGENT: &str = "factoriomodtool";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Release {
    pub download_url: String,
    pub file_name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub sha1: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub releases: Vec<Release>,
}

/// Remote registry seen by the mutation engine. Calls block until complete.
pub trait ModPortal {
    fn lookup(&self, name: &str) -> Result<ModDetails>;

    /// Streams the release package into `out`, returning the byte count.
    fn download(
        &self,
        release: &Release,
        credentials: &ServiceCredentials,
        out: &mut dyn Write,
    ) -> Result<u64>;
}

pub struct PortalClient {
    base_url: String,
    agent: ureq::Agent,
}

impl PortalClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        // No timeouts: a stalled transfer stalls the run.
        let agent = ureq::AgentBuilder::new().build();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            agent,
        }
    }

    pub fn from_env() -> Self {
        let base = env::var(PORTAL_URL_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| PORTAL_URL.to_string());
        Self::new(base)
    }

    pub fn lookup_url(&self, name: &str) -> String {
        format!("{}/api/mods/{name}/full", self.base_url)
    }

    pub fn download_url(&self, release: &Release) -> String {
        format!(
            "{}/{}",
            self.base_url,
            release.download_url.trim_start_matches('/')
        )
    }
}

impl ModPortal for PortalClient {
    fn lookup(&self, name: &str) -> Result<ModDetails> {
        let response = self
            .agent
            .get(&self.lookup_url(name))
            .set("User-Agent", USER_AGENT)
            .call()
            .with_context(|| format!("look up {name}"))?;
        let details: ModDetails = response.into_json().context("decode mod details")?;
        Ok(details)
    }

    fn download(
        &self,
        release: &Release,
        credentials: &ServiceCredentials,
        out: &mut dyn Write,
    ) -> Result<u64> {
        let response = self
            .agent
            .get(&self.download_url(release))
            .query("username", &credentials.username)
            .query("token", &credentials.token)
            .set("User-Agent", USER_AGENT)
            .call()
            .with_context(|| format!("download {}", release.file_name))?;
        let mut reader = response.into_reader();
        let written = io::copy(&mut reader, out).context("write package")?;
        Ok(written)
    }
}

/// Strips the mod page prefix from a portal URL, leaving the bare mod name.
pub fn normalize_identifier(identifier: &str) -> String {
    let trimmed = identifier.trim();
    let http_prefix = PORTAL_MOD_PAGE_PREFIX.replacen("https://", "http://", 1);
    let rest = trimmed
        .strip_prefix(PORTAL_MOD_PAGE_PREFIX)
        .or_else(|| trimmed.strip_prefix(http_prefix.as_str()));
    match rest {
        Some(rest) => {
            let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
            rest[..end].replace("%20", " ")
        }
        None => trimmed.to_string(),
    }
}

/// The release to install is the last one listed.
///
/// The portal is trusted to list releases oldest first; versions are not compared.
pub fn select_release(releases: &[Release]) -> Option<&Release> {
    releases.last()
}

/// Looks `name` up and writes its selected release into `mods_dir`.
///
/// Returns the path of the written archive. Nothing is left on disk on failure.
pub fn fetch(
    portal: &dyn ModPortal,
    name: &str,
    credentials: &ServiceCredentials,
    mods_dir: &Path,
) -> std::result::Result<PathBuf, ModError> {
    let lookup_failed = |detail: String| {
        ModError::new(ErrorKind::RegistryLookupFailed, name).with_detail(detail)
    };

    let details = portal
        .lookup(name)
        .map_err(|err| lookup_failed(format!("{err:#}")))?;
    let release = select_release(&details.releases)
        .ok_or_else(|| lookup_failed("no releases".to_string()))?;
    if !is_plain_file_name(&release.file_name) {
        return Err(lookup_failed(format!(
            "unexpected file name {}",
            release.file_name
        )));
    }
    debug!(
        mod_name = details.name.as_deref().unwrap_or(name),
        version = release.version.as_deref().unwrap_or("?"),
        file = %release.file_name,
        "selected release"
    );

    let path = mods_dir.join(&release.file_name);
    let mut guard = PartialDownload::new(path.clone());
    let download_failed = |detail: String| {
        ModError::new(ErrorKind::DownloadFailed, name).with_detail(detail)
    };

    let mut file = File::create(&path).map_err(|err| download_failed(err.to_string()))?;
    let written = portal
        .download(release, credentials, &mut file)
        .map_err(|err| download_failed(format!("{err:#}")))?;
    file.flush().map_err(|err| download_failed(err.to_string()))?;
    drop(file);

    if let Some(expected) = &release.sha1 {
        verify_sha1(&path, expected).map_err(|err| download_failed(format!("{err:#}")))?;
    }

    guard.disarm();
    info!(mod_name = name, file = %release.file_name, bytes = written, "downloaded");
    Ok(path)
}

fn is_plain_file_name(file_name: &str) -> bool {
    !file_name.is_empty()
        && Path::new(file_name).file_name().map(|name| name.to_string_lossy() == file_name)
            == Some(true)
}

fn verify_sha1(path: &Path, expected: &str) -> Result<()> {
    let mut file = File::open(path).context("open package for checksum")?;
    let mut hasher = Sha1::new();
    io::copy(&mut file, &mut hasher).context("hash package")?;
    let actual = format!("{:x}", hasher.finalize());
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        anyhow::bail!("sha1 {actual} does not match published {expected}");
    }
    Ok(())
}

/// Removes a half-written package unless the download completed.
struct PartialDownload {
    path: PathBuf,
    armed: bool,
}

impl PartialDownload {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartialDownload {
    fn drop(&mut self) {
        if self.armed && self.path.exists() {
            if let Err(err) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), "could not remove partial download: {err}");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::{cell::RefCell, collections::HashMap};
    use tempfile::TempDir;

    /// In-memory portal. `payloads` is keyed by release file name.
    #[derive(Default)]
    pub(crate) struct FakePortal {
        pub details: HashMap<String, ModDetails>,
        pub payloads: HashMap<String, Vec<u8>>,
        pub downloads: RefCell<Vec<String>>,
    }

    impl FakePortal {
        pub(crate) fn with_mod(mut self, name: &str, releases: &[(&str, &str)]) -> Self {
            let releases = releases
                .iter()
                .map(|(file_name, payload)| {
                    self.payloads
                        .insert(file_name.to_string(), payload.as_bytes().to_vec());
                    Release {
                        download_url: format!("/download/{name}/{file_name}"),
                        file_name: file_name.to_string(),
                        version: None,
                        sha1: None,
                    }
                })
                .collect();
            self.details.insert(
                name.to_string(),
                ModDetails {
                    name: Some(name.to_string()),
                    releases,
                },
            );
            self
        }
    }

    impl ModPortal for FakePortal {
        fn lookup(&self, name: &str) -> Result<ModDetails> {
            self.details
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("status code 404"))
        }

        fn download(
            &self,
            release: &Release,
            _credentials: &ServiceCredentials,
            out: &mut dyn Write,
        ) -> Result<u64> {
            self.downloads.borrow_mut().push(release.file_name.clone());
            let payload = self
                .payloads
                .get(&release.file_name)
                .ok_or_else(|| anyhow::anyhow!("connection reset"))?;
            out.write_all(payload)?;
            Ok(payload.len() as u64)
        }
    }

    fn credentials() -> ServiceCredentials {
        ServiceCredentials {
            username: "engineer".to_string(),
            token: "secret".to_string(),
        }
    }

    #[test]
    fn portal_urls_are_normalized_to_names() {
        assert_eq!(normalize_identifier("Krastorio2"), "Krastorio2");
        assert_eq!(
            normalize_identifier("https://mods.factorio.com/mod/Krastorio2"),
            "Krastorio2"
        );
        assert_eq!(
            normalize_identifier("http://mods.factorio.com/mod/Krastorio2/changelog?from=search"),
            "Krastorio2"
        );
        assert_eq!(
            normalize_identifier("https://mods.factorio.com/mod/Squeak%20Through"),
            "Squeak Through"
        );
    }

    #[test]
    fn last_release_is_selected_not_highest_version() {
        let portal = FakePortal::default().with_mod(
            "bar",
            &[("bar_0.1.0.zip", "old"), ("bar_0.2.0.zip", "new")],
        );
        let details = portal.lookup("bar").unwrap();
        assert_eq!(
            select_release(&details.releases).unwrap().file_name,
            "bar_0.2.0.zip"
        );

        let reversed = FakePortal::default().with_mod(
            "bar",
            &[("bar_0.2.0.zip", "new"), ("bar_0.1.0.zip", "old")],
        );
        let details = reversed.lookup("bar").unwrap();
        assert_eq!(
            select_release(&details.releases).unwrap().file_name,
            "bar_0.1.0.zip"
        );
    }

    #[test]
    fn fetch_writes_selected_release_into_mods_dir() {
        let dir = TempDir::new().unwrap();
        let portal = FakePortal::default().with_mod(
            "bar",
            &[("bar_0.1.0.zip", "old"), ("bar_0.2.0.zip", "new")],
        );
        let path = fetch(&portal, "bar", &credentials(), dir.path()).unwrap();
        assert_eq!(path, dir.path().join("bar_0.2.0.zip"));
        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert!(!dir.path().join("bar_0.1.0.zip").exists());
    }

    #[test]
    fn unknown_mod_is_lookup_failure_without_side_effects() {
        let dir = TempDir::new().unwrap();
        let portal = FakePortal::default();
        let err = fetch(&portal, "nope", &credentials(), dir.path()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::RegistryLookupFailed);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn mod_without_releases_is_lookup_failure() {
        let dir = TempDir::new().unwrap();
        let portal = FakePortal::default().with_mod("empty", &[]);
        let err = fetch(&portal, "empty", &credentials(), dir.path()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::RegistryLookupFailed);
    }

    #[test]
    fn failed_transfer_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let mut portal = FakePortal::default().with_mod("bar", &[("bar_0.2.0.zip", "new")]);
        portal.payloads.clear();
        let err = fetch(&portal, "bar", &credentials(), dir.path()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DownloadFailed);
        assert!(!dir.path().join("bar_0.2.0.zip").exists());
    }

    #[test]
    fn checksum_mismatch_is_download_failure() {
        let dir = TempDir::new().unwrap();
        let mut portal = FakePortal::default().with_mod("bar", &[("bar_0.2.0.zip", "new")]);
        if let Some(details) = portal.details.get_mut("bar") {
            details.releases[0].sha1 = Some("0000".to_string());
        }
        let err = fetch(&portal, "bar", &credentials(), dir.path()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DownloadFailed);
        assert!(!dir.path().join("bar_0.2.0.zip").exists());
    }

    #[test]
    fn matching_checksum_is_accepted() {
        let dir = TempDir::new().unwrap();
        let mut portal = FakePortal::default().with_mod("bar", &[("bar_0.2.0.zip", "new")]);
        let digest = format!("{:x}", Sha1::digest(b"new"));
        if let Some(details) = portal.details.get_mut("bar") {
            details.releases[0].sha1 = Some(digest.to_uppercase());
        }
        assert!(fetch(&portal, "bar", &credentials(), dir.path()).is_ok());
    }

    #[test]
    fn sha1_is_compared_case_insensitively() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bar_0.2.0.zip");
        fs::write(&path, b"abc").unwrap();
        assert!(verify_sha1(&path, "a9993e364706816aba3e25717850c26c9cd0d89d").is_ok());
        assert!(verify_sha1(&path, "A9993E364706816ABA3E25717850C26C9CD0D89D").is_ok());
        assert!(verify_sha1(&path, "da39a3ee5e6b4b0d3255bfef95601890afd80709").is_err());
    }

    #[test]
    fn release_file_name_must_not_escape_mods_dir() {
        let dir = TempDir::new().unwrap();
        let mut portal = FakePortal::default().with_mod("bar", &[("bar_0.2.0.zip", "new")]);
        if let Some(details) = portal.details.get_mut("bar") {
            details.releases[0].file_name = "../evil.zip".to_string();
        }
        let err = fetch(&portal, "bar", &credentials(), dir.path()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::RegistryLookupFailed);
    }

    #[test]
    fn client_builds_portal_urls() {
        let client = PortalClient::new("https://mods.factorio.com/");
        assert_eq!(
            client.lookup_url("bar"),
            "https://mods.factorio.com/api/mods/bar/full"
        );
        let release = Release {
            download_url: "/download/bar/abc".to_string(),
            file_name: "bar_0.2.0.zip".to_string(),
            version: Some("0.2.0".to_string()),
            sha1: None,
        };
        assert_eq!(
            client.download_url(&release),
            "https://mods.factorio.com/download/bar/abc"
        );
    }

    #[test]
    fn details_parse_portal_json() {
        let details: ModDetails = serde_json::from_str(
            r#"{"name": "bar", "title": "Bar", "releases": [
                {"download_url": "/download/bar/1", "file_name": "bar_0.1.0.zip", "version": "0.1.0", "sha1": "aa", "info_json": {}},
                {"download_url": "/download/bar/2", "file_name": "bar_0.2.0.zip", "version": "0.2.0"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(details.releases.len(), 2);
        assert_eq!(details.releases[1].sha1, None);
    }
}
