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

//! Monotonic millisecond clock used for event down/event times

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Milliseconds on the uptime clock
pub type Millis = i64;

fn origin() -> Instant {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    *ORIGIN.get_or_init(Instant::now)
}

/// Milliseconds elapsed since the clock was first read in this process.
///
/// Starts at 1 rather than 0 so a first reading is never mistaken for an
/// unset timestamp.
pub fn uptime_millis() -> Millis {
    origin().elapsed().as_millis() as Millis + 1
}

/// Wall-clock milliseconds since the Unix epoch
pub fn wall_millis() -> Millis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Millis)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uptime_is_monotonic_and_positive() {
        let a = uptime_millis();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = uptime_millis();
        assert!(a >= 1);
        assert!(b >= a + 5);
    }
}
