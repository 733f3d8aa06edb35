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

//! Error types for stressmonkey

use thiserror::Error;

/// Configuration errors, detected once before the run starts
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Unknown event category: {0}")]
    UnknownCategory(String),
}

/// Script file errors
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Script I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed header line '{line}': {reason}")]
    MalformedHeader { line: String, reason: String },

    #[error("Script has no 'start data >>' marker")]
    MissingStartMarker,
}

/// Violations of the event construction invariants
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventError {
    #[error("Motion event has no pointers")]
    NoPointers,

    #[error("Down time {down} is after event time {event}")]
    DownAfterEvent { down: i64, event: i64 },

    #[error("Pointer id {0} appears twice")]
    DuplicatePointer(u32),
}

/// Network source errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Failed to bind to {address}: {reason}")]
    BindFailed { address: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
