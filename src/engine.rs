//! Lifecycle mutations over the working inventory and the phase order of a run.
//!
//! A run goes scan, merge, remove, install, rescan when archives changed, disable,
//! enable, persist. Each phase finishes before the next one starts. Item failures go
//! through the [`RunContext`]; a fatal one returns before anything is persisted.

use crate::{
    error::{ErrorKind, Fatal, ModError, RunContext},
    factorio::{ServiceCredentials, MOD_LIST_FILE_NAME},
    inventory::{Inventory, ModList, ModListEntry},
    merger, portal,
    portal::ModPortal,
    scanner,
};
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

/// Mutations requested for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunPlan {
    pub enable: Vec<String>,
    pub disable: Vec<String>,
    pub install: Vec<String>,
    pub remove: Vec<String>,
    pub disable_all: bool,
}

impl RunPlan {
    pub fn changes_archives(&self) -> bool {
        !self.install.is_empty() || !self.remove.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub errors_recorded: usize,
    pub installed: Vec<String>,
    pub removed: Vec<String>,
    pub inventory: Inventory,
}

/// The working inventory of one run plus what the run has done to the mods directory.
pub struct Session<'a> {
    mods_dir: PathBuf,
    inventory: Inventory,
    credentials: ServiceCredentials,
    portal: &'a dyn ModPortal,
    /// `mod-list.json` as read at open time.
    persisted: ModList,
    archives_changed: bool,
    installed: Vec<String>,
    removed: Vec<String>,
    /// Names whose archive was deleted this run, with their flag at deletion time.
    pending_removals: Vec<ModListEntry>,
    reported_archives: HashSet<String>,
}

impl<'a> Session<'a> {
    /// Scans `mods_dir` and merges it with `mod-list.json`.
    pub fn open(
        mods_dir: &Path,
        credentials: ServiceCredentials,
        portal: &'a dyn ModPortal,
        ctx: &mut RunContext,
    ) -> Result<Self, Fatal> {
        let mut session = Self {
            mods_dir: mods_dir.to_path_buf(),
            inventory: Inventory::new(),
            credentials,
            portal,
            persisted: ModList::default(),
            archives_changed: false,
            installed: Vec::new(),
            removed: Vec::new(),
            pending_removals: Vec::new(),
            reported_archives: HashSet::new(),
        };

        let raw = session.scan(ctx)?;
        let persisted = ModList::load(mods_dir).map_err(|err| {
            ctx.fatal(
                ModError::new(ErrorKind::MissingPersistedState, MOD_LIST_FILE_NAME)
                    .with_detail(format!("{err:#}")),
            )
        })?;
        session.inventory = match merger::merge(raw, persisted.as_ref()) {
            Ok(inventory) => inventory,
            Err(err) => return Err(ctx.fatal(err)),
        };
        session.persisted = persisted.unwrap_or_default();
        info!(mods = session.inventory.len(), "mod list loaded");
        Ok(session)
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Whether an archive was added or deleted since the last scan.
    pub fn archives_changed(&self) -> bool {
        self.archives_changed
    }

    pub fn enable(&mut self, names: &[String], ctx: &mut RunContext) -> Result<(), Fatal> {
        self.set_enabled(names, true, ctx)
    }

    pub fn disable(&mut self, names: &[String], ctx: &mut RunContext) -> Result<(), Fatal> {
        self.set_enabled(names, false, ctx)
    }

    fn set_enabled(
        &mut self,
        names: &[String],
        enabled: bool,
        ctx: &mut RunContext,
    ) -> Result<(), Fatal> {
        for name in names {
            match self.inventory.get_mut(name) {
                Some(mod_entry) => {
                    mod_entry.enabled = enabled;
                    info!(
                        "{} {name}",
                        if enabled { "Enabled" } else { "Disabled" }
                    );
                }
                None => ctx.report(ModError::new(ErrorKind::UnknownMod, name.as_str()))?,
            }
        }
        Ok(())
    }

    /// Disables every entry, `base` included.
    pub fn disable_all(&mut self) {
        for mod_entry in self.inventory.iter_mut() {
            mod_entry.enabled = false;
        }
        info!("Disabled all mods");
    }

    /// Downloads each requested mod. Identifiers may be names or mod page URLs.
    ///
    /// Installed mods join the inventory on the next [`Session::refresh`].
    pub fn install(&mut self, identifiers: &[String], ctx: &mut RunContext) -> Result<(), Fatal> {
        for identifier in identifiers {
            let name = portal::normalize_identifier(identifier);
            if self.inventory.contains(&name) || self.installed.contains(&name) {
                ctx.report(ModError::new(ErrorKind::LocalModExists, name))?;
                continue;
            }
            if self.credentials.is_empty() {
                ctx.report(ModError::new(ErrorKind::MissingCredentials, name))?;
                continue;
            }

            info!("Installing {name}...");
            match portal::fetch(self.portal, &name, &self.credentials, &self.mods_dir) {
                Ok(path) => {
                    debug!(path = %path.display(), "installed");
                    self.installed.push(name);
                    self.archives_changed = true;
                }
                Err(err) => ctx.report(err)?,
            }
        }
        Ok(())
    }

    /// Deletes the archive of each named mod.
    pub fn remove(&mut self, names: &[String], ctx: &mut RunContext) -> Result<(), Fatal> {
        for name in names {
            let Some(mod_entry) = self.inventory.get(name) else {
                ctx.report(ModError::new(ErrorKind::UnknownMod, name.as_str()))?;
                continue;
            };
            let Some(archive_path) = mod_entry.archive_path.clone() else {
                ctx.report(
                    ModError::new(ErrorKind::RemoveFailed, name.as_str())
                        .with_detail("no archive to remove"),
                )?;
                continue;
            };

            let enabled = mod_entry.enabled;

            if let Err(err) = fs::remove_file(&archive_path) {
                ctx.report(ModError::new(ErrorKind::RemoveFailed, name.as_str()).with_detail(err))?;
                continue;
            }
            self.inventory.remove(name);
            self.pending_removals.push(ModListEntry {
                name: name.clone(),
                enabled,
            });
            self.archives_changed = true;
            debug!(archive = %archive_path.display(), "deleted archive of {name}");
        }
        Ok(())
    }

    /// Rescans and re-merges when the archive set changed.
    ///
    /// Flags come from the working inventory first, then from mods deleted this run, then
    /// from `mod-list.json`. A removal is only confirmed once the rescan no longer finds
    /// the mod.
    pub fn refresh(&mut self, ctx: &mut RunContext) -> Result<(), Fatal> {
        if !self.archives_changed {
            return Ok(());
        }
        debug!("archive set changed; rescanning");
        let raw = self.scan(ctx)?;
        let flags = self.recorded_flags();
        self.inventory = merger::merge(raw, Some(&flags)).map_err(|err| ctx.fatal(err))?;
        self.archives_changed = false;

        for entry in std::mem::take(&mut self.pending_removals) {
            if self.inventory.contains(&entry.name) && !self.installed.contains(&entry.name) {
                ctx.report(
                    ModError::new(ErrorKind::RemoveFailed, entry.name.as_str())
                        .with_detail("another archive still provides this mod"),
                )?;
                continue;
            }
            info!("Removed {}", entry.name);
            self.removed.push(entry.name);
        }
        Ok(())
    }

    fn recorded_flags(&self) -> ModList {
        let mut flags = self.inventory.to_mod_list();
        flags.mods.extend(self.pending_removals.iter().cloned());
        flags.mods.extend(self.persisted.mods.iter().cloned());
        flags
    }

    /// Writes the working inventory to `mod-list.json`.
    pub fn persist(&self, ctx: &mut RunContext) -> Result<(), Fatal> {
        info!("Writing {MOD_LIST_FILE_NAME}...");
        self.inventory
            .to_mod_list()
            .save(&self.mods_dir)
            .map_err(|err| {
                ctx.fatal(
                    ModError::new(
                        ErrorKind::WriteFailed,
                        ModList::path(&self.mods_dir).display().to_string(),
                    )
                    .with_detail(format!("{err:#}")),
                )
            })?;
        info!("Done writing.");
        Ok(())
    }

    pub fn finish(self, ctx: &RunContext) -> RunSummary {
        RunSummary {
            errors_recorded: ctx.errors_recorded,
            installed: self.installed,
            removed: self.removed,
            inventory: self.inventory,
        }
    }

    fn scan(&mut self, ctx: &mut RunContext) -> Result<Inventory, Fatal> {
        let outcome = scanner::scan(&self.mods_dir).map_err(|err| ctx.fatal(err))?;
        for err in outcome.skipped {
            // An archive that stays broken is reported once per run.
            if self.reported_archives.insert(err.subject.clone()) {
                ctx.report(err)?;
            }
        }
        Ok(outcome.inventory)
    }
}

/// Runs every phase of `plan` against `mods_dir` and persists the result.
pub fn run(
    plan: &RunPlan,
    mods_dir: &Path,
    credentials: ServiceCredentials,
    portal: &dyn ModPortal,
    ctx: &mut RunContext,
) -> Result<RunSummary, Fatal> {
    let mut session = Session::open(mods_dir, credentials, portal, ctx)?;

    session.remove(&plan.remove, ctx)?;
    session.install(&plan.install, ctx)?;
    session.refresh(ctx)?;

    if plan.disable_all {
        session.disable_all();
    }
    session.disable(&plan.disable, ctx)?;
    session.enable(&plan.enable, ctx)?;

    session.persist(ctx)?;
    let summary = session.finish(ctx);
    info!("{} errors recorded.", summary.errors_recorded);
    Ok(summary)
}
