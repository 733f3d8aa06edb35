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

//! Variables readable over the protocol with `listvar` and `getvar`

use std::collections::BTreeMap;

use super::commands::{CommandContext, CommandReturn};
use crate::clock::{uptime_millis, wall_millis};
use crate::config::DisplayConfig;
use crate::context::RunContext;

pub const PROTOCOL_VERSION: &str = "2";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaunchField {
    Package,
    Action,
    CompClass,
    CompPackage,
    Data,
    Categories,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum VarValue {
    Fixed(String),
    Launch(LaunchField),
    Uptime,
    WallClock,
}

/// Name-ordered table of protocol variables
#[derive(Debug, Clone)]
pub struct VarTable {
    vars: BTreeMap<String, VarValue>,
    context: RunContext,
}

impl VarTable {
    pub fn new(
        build: &BTreeMap<String, String>,
        display: &DisplayConfig,
        context: RunContext,
    ) -> Self {
        let mut vars: BTreeMap<String, VarValue> = build
            .iter()
            .map(|(key, value)| (format!("build.{}", key), VarValue::Fixed(value.clone())))
            .collect();

        vars.insert(
            "display.width".into(),
            VarValue::Fixed(display.width.to_string()),
        );
        vars.insert(
            "display.height".into(),
            VarValue::Fixed(display.height.to_string()),
        );
        vars.insert(
            "display.density".into(),
            VarValue::Fixed(format!("{:?}", display.density)),
        );

        for (name, field) in [
            ("am.current.package", LaunchField::Package),
            ("am.current.action", LaunchField::Action),
            ("am.current.comp.class", LaunchField::CompClass),
            ("am.current.comp.package", LaunchField::CompPackage),
            ("am.current.data", LaunchField::Data),
            ("am.current.categories", LaunchField::Categories),
        ] {
            vars.insert(name.into(), VarValue::Launch(field));
        }

        // No deep sleep here, so realtime and uptime agree
        vars.insert("clock.realtime".into(), VarValue::Uptime);
        vars.insert("clock.uptime".into(), VarValue::Uptime);
        vars.insert("clock.millis".into(), VarValue::WallClock);
        vars.insert(
            "monkey.version".into(),
            VarValue::Fixed(PROTOCOL_VERSION.into()),
        );

        Self { vars, context }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    /// `None` for an unknown name, `Some(None)` for a known name with no
    /// current value
    pub fn get(&self, name: &str) -> Option<Option<String>> {
        let value = match self.vars.get(name)? {
            VarValue::Fixed(value) => Some(value.clone()),
            VarValue::Launch(field) => self.launch_value(*field),
            VarValue::Uptime => Some(uptime_millis().to_string()),
            VarValue::WallClock => Some(wall_millis().to_string()),
        };
        Some(value)
    }

    fn launch_value(&self, field: LaunchField) -> Option<String> {
        let record = self.context.snapshot();
        match field {
            LaunchField::Package | LaunchField::CompPackage => {
                record.component.map(|c| c.package)
            }
            LaunchField::CompClass => record.component.map(|c| c.class),
            LaunchField::Action => record.action,
            LaunchField::Data => record.data,
            LaunchField::Categories => {
                record.action.as_ref()?;
                Some(record.categories.iter().map(|c| format!("{} ", c)).collect())
            }
        }
    }
}

/// `listvar`
pub fn list_vars(_command: &[String], ctx: &mut CommandContext<'_>) -> CommandReturn {
    let names: String = ctx.vars.names().map(|name| format!("{} ", name)).collect();
    CommandReturn::ok_with(names)
}

/// `getvar <name>`
pub fn get_var(command: &[String], ctx: &mut CommandContext<'_>) -> CommandReturn {
    if command.len() != 2 {
        return CommandReturn::invalid_argument();
    }
    match ctx.vars.get(&command[1]) {
        Some(Some(value)) => CommandReturn::ok_with(value),
        Some(None) => CommandReturn::ok(),
        None => CommandReturn::error_with("unknown var"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ComponentName;

    fn table(context: RunContext) -> VarTable {
        let build = BTreeMap::from([
            ("model".to_string(), "sdk".to_string()),
            ("version.sdk".to_string(), "34".to_string()),
        ]);
        VarTable::new(&build, &DisplayConfig::default(), context)
    }

    #[test]
    fn test_names_are_sorted() {
        let vars = table(RunContext::new());
        let names: Vec<&str> = vars.names().collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(names.contains(&"build.version.sdk"));
        assert!(names.contains(&"monkey.version"));
    }

    #[test]
    fn test_fixed_values() {
        let vars = table(RunContext::new());
        assert_eq!(vars.get("build.model"), Some(Some("sdk".into())));
        assert_eq!(vars.get("display.width"), Some(Some("1080".into())));
        assert_eq!(vars.get("display.density"), Some(Some("2.625".into())));
        assert_eq!(vars.get("monkey.version"), Some(Some("2".into())));
        assert_eq!(vars.get("build.nothing"), None);
    }

    #[test]
    fn test_launch_values_follow_context() {
        let context = RunContext::new();
        let vars = table(context.clone());
        assert_eq!(vars.get("am.current.package"), Some(None));
        assert_eq!(vars.get("am.current.categories"), Some(None));

        context.record_launch(&ComponentName::new("com.example", "com.example.Main"));
        assert_eq!(vars.get("am.current.package"), Some(Some("com.example".into())));
        assert_eq!(
            vars.get("am.current.comp.class"),
            Some(Some("com.example.Main".into()))
        );
        assert_eq!(
            vars.get("am.current.categories"),
            Some(Some("android.intent.category.LAUNCHER ".into()))
        );
        assert_eq!(vars.get("am.current.data"), Some(None));
    }

    #[test]
    fn test_clock_values_are_numbers() {
        let vars = table(RunContext::new());
        for name in ["clock.realtime", "clock.uptime", "clock.millis"] {
            let value = vars.get(name).flatten().unwrap();
            assert!(value.parse::<i64>().unwrap() > 0, "{}", name);
        }
    }
}
