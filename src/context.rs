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

//! Shared run context
//!
//! Records what the driver last launched so components that report on the
//! foreground app (such as the protocol variable table) can read it.

use std::sync::{Arc, Mutex, PoisonError};

use crate::types::ComponentName;

/// Details of the most recent successful app launch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchRecord {
    pub component: Option<ComponentName>,
    pub action: Option<String>,
    pub data: Option<String>,
    pub categories: Vec<String>,
}

/// Cloneable handle to the run context
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    inner: Arc<Mutex<LaunchRecord>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_launch(&self, component: &ComponentName) {
        let mut record = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        record.component = Some(component.clone());
        record.action = Some("android.intent.action.MAIN".to_string());
        record.data = None;
        record.categories = vec!["android.intent.category.LAUNCHER".to_string()];
    }

    pub fn snapshot(&self) -> LaunchRecord {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn current_package(&self) -> Option<String> {
        self.snapshot().component.map(|c| c.package)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_launch_is_visible_to_clones() {
        let context = RunContext::new();
        let reader = context.clone();
        assert_eq!(reader.current_package(), None);

        context.record_launch(&ComponentName::new("com.example", "com.example.Main"));
        assert_eq!(reader.current_package().as_deref(), Some("com.example"));
        assert_eq!(reader.snapshot().categories.len(), 1);
    }
}
