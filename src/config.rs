// Copyright (C) 2025  Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Run configuration
//!
//! Loaded from a TOML file, then overridden from the command line.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::ConfigError;
use crate::fault::FaultPolicy;
use crate::keycode::{self, KeyPresence};
use crate::source::random::Category;
use crate::types::{ComponentName, Pacing};

/// Screen geometry of the target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub density: f32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            density: 2.625,
        }
    }
}

/// Where events come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Random,
    Script(PathBuf),
    Network(u16),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonkeyConfig {
    /// Events (or cycles) to run
    pub count: u64,

    /// Count injected events rather than source cycles
    pub count_events: bool,

    pub seed: Option<u64>,

    /// Pause after each throttlable event, in milliseconds
    pub throttle_ms: u64,

    pub randomize_throttle: bool,

    pub verbosity: u8,

    /// Pull events but never inject them
    pub dbg_no_events: bool,

    /// Category percentage overrides keyed by category name
    pub pct: BTreeMap<String, f32>,

    pub display: DisplayConfig,

    /// Launchable activities for app switching
    pub apps: Vec<ComponentName>,

    /// Runtime permissions that may be toggled, per package
    pub permissions: BTreeMap<String, Vec<String>>,

    /// Keys the device does not have, by name or code
    pub missing_keys: Vec<String>,

    pub script: Option<PathBuf>,

    pub port: Option<u16>,

    pub profile_wait_ms: u64,

    pub device_sleep_ms: u64,

    /// Request a bug report every `bugreport_frequency` source cycles
    pub periodic_bugreport: bool,

    pub bugreport_frequency: u64,

    pub faults: FaultPolicy,

    /// Device build properties reported over the protocol
    pub build: BTreeMap<String, String>,
}

impl Default for MonkeyConfig {
    fn default() -> Self {
        let build = [
            ("board", "generic"),
            ("brand", "generic"),
            ("device", "generic"),
            ("fingerprint", "generic/sdk/generic:14/UP1A/1:userdebug/test-keys"),
            ("host", "localhost"),
            ("id", "UP1A"),
            ("manufacturer", "unknown"),
            ("model", "sdk"),
            ("product", "sdk"),
            ("tags", "test-keys"),
            ("type", "userdebug"),
            ("user", "builder"),
            ("version.codename", "REL"),
            ("version.incremental", "1"),
            ("version.release", "14"),
            ("version.sdk", "34"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            count: 1000,
            count_events: true,
            seed: None,
            throttle_ms: 0,
            randomize_throttle: false,
            verbosity: 0,
            dbg_no_events: false,
            pct: BTreeMap::new(),
            display: DisplayConfig::default(),
            apps: Vec::new(),
            permissions: BTreeMap::new(),
            missing_keys: Vec::new(),
            script: None,
            port: None,
            profile_wait_ms: 5000,
            device_sleep_ms: 30000,
            periodic_bugreport: false,
            bugreport_frequency: 10,
            faults: FaultPolicy::default(),
            build,
        }
    }
}

impl MonkeyConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.script.is_some() && self.port.is_some() {
            return Err(ConfigError::InvalidValue(
                "script and port cannot both be set".into(),
            ));
        }
        if self.display.width == 0 || self.display.height == 0 {
            return Err(ConfigError::InvalidValue(
                "display dimensions must be positive".into(),
            ));
        }
        if self.bugreport_frequency == 0 {
            return Err(ConfigError::InvalidValue(
                "bugreport_frequency cannot be 0".into(),
            ));
        }
        self.factor_overrides()?;
        self.key_presence()?;
        Ok(())
    }

    pub fn pacing(&self) -> Pacing {
        Pacing {
            throttle_ms: self.throttle_ms,
            randomize: self.randomize_throttle,
        }
    }

    pub fn source_kind(&self) -> SourceKind {
        match (&self.script, self.port) {
            (Some(path), _) => SourceKind::Script(path.clone()),
            (None, Some(port)) => SourceKind::Network(port),
            (None, None) => SourceKind::Random,
        }
    }

    /// Resolves the percentage overrides to categories
    pub fn factor_overrides(&self) -> Result<Vec<(Category, f32)>, ConfigError> {
        self.pct
            .iter()
            .map(|(name, percent)| {
                let category = Category::from_name(name)
                    .ok_or_else(|| ConfigError::UnknownCategory(name.clone()))?;
                if !percent.is_finite() || *percent < 0.0 {
                    return Err(ConfigError::InvalidValue(format!(
                        "percentage for {} must be non-negative",
                        name
                    )));
                }
                Ok((category, *percent))
            })
            .collect()
    }

    pub fn key_presence(&self) -> Result<KeyPresence, ConfigError> {
        let mut presence = KeyPresence::default();
        for name in &self.missing_keys {
            let code = keycode::resolve_key(name)
                .ok_or_else(|| ConfigError::InvalidValue(format!("unknown key {}", name)))?;
            presence.set(code, false);
        }
        Ok(presence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keycode::KEYCODE_HOME;

    #[test]
    fn test_defaults_validate() {
        let config = MonkeyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.source_kind(), SourceKind::Random);
    }

    #[test]
    fn test_load_and_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monkey.toml");
        std::fs::write(
            &path,
            r#"
count = 50
throttle_ms = 300
missing_keys = ["KEYCODE_HOME"]

[pct]
touch = 40.0
syskeys = 0.0

[[apps]]
package = "com.example"
class = "com.example.MainActivity"

[faults]
ignore_crashes = true
"#,
        )
        .unwrap();

        let config = MonkeyConfig::load_from_file(&path).unwrap();
        assert_eq!(config.count, 50);
        assert_eq!(config.pacing().throttle_ms, 300);
        assert!(config.faults.ignore_crashes);
        assert_eq!(config.apps[0].package, "com.example");
        assert!(!config.key_presence().unwrap().exists(KEYCODE_HOME));
        assert_eq!(config.factor_overrides().unwrap().len(), 2);

        let copy = dir.path().join("copy.toml");
        config.save_to_file(&copy).unwrap();
        let reloaded = MonkeyConfig::load_from_file(&copy).unwrap();
        assert_eq!(reloaded.count, 50);
        assert_eq!(reloaded.pct, config.pct);
    }

    #[test]
    fn test_unknown_category_rejected() {
        let mut config = MonkeyConfig::default();
        config.pct.insert("teleport".into(), 5.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownCategory(name)) if name == "teleport"
        ));
    }

    #[test]
    fn test_script_and_port_conflict() {
        let config = MonkeyConfig {
            script: Some(PathBuf::from("a.script")),
            port: Some(1080),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
