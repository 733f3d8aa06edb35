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

//! stressmonkey
//!
//! Generates input event streams for stress testing an interactive target:
//! weighted random synthesis, recorded script replay, or commands from a
//! remote client over a line protocol.

pub mod clock;
pub mod config;
pub mod context;
pub mod driver;
pub mod errors;
pub mod fault;
pub mod inject;
pub mod keycode;
pub mod parser;
pub mod queue;
pub mod source;
pub mod types;

pub use config::{MonkeyConfig, SourceKind};
pub use driver::{Driver, DriverOptions, RunSummary};
pub use source::EventSource;
pub use types::{Event, InjectOutcome};
