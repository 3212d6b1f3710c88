//! Display sizes and the composite refresh/subscription key.
//!
//! A module instance can render as several display-size variants (`"1x1"`,
//! `"3x2"`, `"kiosk"`, ...), each with its own refresh cadence. The cache,
//! the subscription index, and the scheduler are all keyed by
//! [`ModuleKey`] — one module instance at one size.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::ModuleId;

/// A display-size variant a module can render as.
///
/// Sizes are opaque strings declared by each adapter (grid cells like
/// `"2x1"`, or named variants like [`Size::KIOSK`]).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Size(String);

impl Size {
    /// Full-screen single-module display.
    pub const KIOSK: &'static str = "kiosk";

    /// Create a size from a string value.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Size {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for Size {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Key addressing one module instance at one display size.
///
/// Cache entries, subscriptions, and refresh tasks are all scoped to a
/// `ModuleKey`; work for unrelated keys never contends.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleKey {
    /// The module instance.
    pub module_id: ModuleId,
    /// The display size.
    pub size: Size,
}

impl ModuleKey {
    /// Create a key from a module ID and size.
    #[must_use]
    pub fn new(module_id: impl Into<ModuleId>, size: impl Into<Size>) -> Self {
        Self {
            module_id: module_id.into(),
            size: size.into(),
        }
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.module_id, self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_from_str() {
        let size = Size::from("1x1");
        assert_eq!(size.as_str(), "1x1");
    }

    #[test]
    fn size_display() {
        let size = Size::new("3x2");
        assert_eq!(format!("{size}"), "3x2");
    }

    #[test]
    fn kiosk_constant() {
        let size = Size::new(Size::KIOSK);
        assert_eq!(size.as_str(), "kiosk");
    }

    #[test]
    fn size_serde_is_transparent() {
        let size = Size::new("2x1");
        let json = serde_json::to_string(&size).unwrap();
        assert_eq!(json, "\"2x1\"");
        let back: Size = serde_json::from_str(&json).unwrap();
        assert_eq!(back, size);
    }

    #[test]
    fn key_equality() {
        let a = ModuleKey::new("plex-1", "1x1");
        let b = ModuleKey::new("plex-1", "1x1");
        let c = ModuleKey::new("plex-1", "2x1");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn key_display() {
        let key = ModuleKey::new("plex-1", "3x3");
        assert_eq!(format!("{key}"), "plex-1/3x3");
    }

    #[test]
    fn key_hashes_by_both_parts() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        let _ = set.insert(ModuleKey::new("m1", "1x1"));
        let _ = set.insert(ModuleKey::new("m1", "2x1"));
        let _ = set.insert(ModuleKey::new("m2", "1x1"));
        let _ = set.insert(ModuleKey::new("m1", "1x1"));
        assert_eq!(set.len(), 3);
    }
}
