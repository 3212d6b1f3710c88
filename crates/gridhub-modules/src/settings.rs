//! Adapter settings: a flat string map, immutable after activation.

use std::collections::HashMap;

use gridhub_core::errors::FieldErrors;

/// Key→value settings for one module instance.
///
/// Fixed at activation; adapters read what they need in `build` and never
/// see mutations afterwards.
pub type SettingsMap = HashMap<String, String>;

/// Look up a required setting, producing a field error on absence.
///
/// Convenience for factories: collect the `Err` sides into the
/// [`FieldErrors`] map returned by `validate_settings`.
pub fn require<'a>(settings: &'a SettingsMap, key: &str) -> Result<&'a str, (String, String)> {
    match settings.get(key).map(String::as_str) {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err((key.to_owned(), "required".to_owned())),
    }
}

/// Collect field errors from a list of checks; `None` when everything passed.
#[must_use]
pub fn collect_field_errors(checks: Vec<Result<(), (String, String)>>) -> Option<FieldErrors> {
    let errors: FieldErrors = checks.into_iter().filter_map(Result::err).collect();
    if errors.is_empty() {
        None
    } else {
        Some(errors)
    }
}
