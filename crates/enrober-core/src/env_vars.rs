//! Name-keyed environment variable merge.

use enrober_state::EnvVar;

/// Merge `overrides` into `existing`.
///
/// An override whose name is already present replaces that entry's value in
/// place; anything else is appended in the order it appears in `overrides`.
/// Names that repeat inside `overrides` resolve to the last value.
pub fn merge(existing: &[EnvVar], overrides: &[EnvVar]) -> Vec<EnvVar> {
    let mut merged = existing.to_vec();
    for var in overrides {
        match merged.iter_mut().find(|e| e.name == var.name) {
            Some(slot) => slot.value.clone_from(&var.value),
            None => merged.push(var.clone()),
        }
    }
    merged
}
