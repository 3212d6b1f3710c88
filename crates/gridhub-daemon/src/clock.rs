//! Built-in clock module — the simplest real adapter, and the one a fresh
//! install can show without any remote service configured.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::format::{Item, StrftimeItems};
use chrono::Utc;
use serde_json::{json, Value};

use gridhub_core::errors::{FieldErrors, ModuleError};
use gridhub_core::size::Size;
use gridhub_modules::{Module, ModuleFactory, RefreshContext, SettingsMap};

const DEFAULT_FORMAT: &str = "%H:%M:%S";

/// Wall-clock time source.
pub struct ClockModule {
    format: String,
}

#[async_trait]
impl Module for ClockModule {
    fn kind(&self) -> &'static str {
        "clock"
    }

    fn sizes(&self) -> Vec<Size> {
        vec![Size::new("1x1"), Size::new("2x1"), Size::new(Size::KIOSK)]
    }

    fn refresh_interval(&self, _size: &Size) -> Duration {
        Duration::from_secs(1)
    }

    async fn refresh(&self, _size: &Size, _ctx: &RefreshContext) -> Result<Value, ModuleError> {
        let now = Utc::now();
        Ok(json!({
            "iso": now.to_rfc3339(),
            "display": now.format(&self.format).to_string(),
        }))
    }
}

/// Builds [`ClockModule`] instances.
pub struct ClockFactory;

impl ModuleFactory for ClockFactory {
    fn kind(&self) -> &'static str {
        "clock"
    }

    fn validate_settings(&self, settings: &SettingsMap) -> Option<FieldErrors> {
        if let Some(format) = settings.get("format") {
            let invalid = StrftimeItems::new(format).any(|item| item == Item::Error);
            if invalid {
                return Some(FieldErrors::from([(
                    "format".to_owned(),
                    "not a valid strftime format".to_owned(),
                )]));
            }
        }
        None
    }

    fn build(&self, settings: SettingsMap) -> Result<Arc<dyn Module>, ModuleError> {
        let format = settings
            .get("format")
            .cloned()
            .unwrap_or_else(|| DEFAULT_FORMAT.to_owned());
        Ok(Arc::new(ClockModule { format }))
    }
}
