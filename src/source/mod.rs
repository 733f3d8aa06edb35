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

//! Event sources
//!
//! Random synthesis, script replay and the network protocol all feed the
//! driver through the same contract.

pub mod network;
pub mod random;
pub mod script;

use crate::types::Event;

pub use network::NetworkSource;
pub use random::RandomSource;
pub use script::ScriptSource;

#[allow(async_fn_in_trait)]
pub trait EventSource {
    /// Next event to inject, or `None` at end of stream
    async fn next_event(&mut self) -> Option<Event>;

    /// Checks configuration; must pass before the first `next_event`
    fn validate(&mut self) -> bool;

    fn set_verbosity(&mut self, verbosity: u8);
}
