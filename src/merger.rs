use crate::{
    error::{ErrorKind, ModError},
    factorio::MOD_LIST_FILE_NAME,
    inventory::{Inventory, ModList},
};
use tracing::debug;

/// Applies recorded enablement to a raw scan.
///
/// Matched entries take the recorded flag, unmatched ones start disabled, and names that are
/// recorded but no longer installed fall away. `base` is always enabled afterwards.
pub fn merge(mut raw: Inventory, persisted: Option<&ModList>) -> Result<Inventory, ModError> {
    let persisted =
        persisted.ok_or_else(|| ModError::new(ErrorKind::MissingPersistedState, MOD_LIST_FILE_NAME))?;

    for mod_entry in raw.iter_mut() {
        mod_entry.enabled = if mod_entry.is_base() {
            true
        } else {
            persisted.enabled(&mod_entry.name).unwrap_or(false)
        };
    }

    let dropped = persisted
        .mods
        .iter()
        .filter(|entry| !raw.contains(&entry.name))
        .count();
    if dropped > 0 {
        debug!(dropped, "recorded mods no longer installed");
    }
    Ok(raw)
}
