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

//! FIFO event queue that paces itself
//!
//! Every throttlable event pushed is immediately followed by a Throttle
//! event, so callers never schedule pauses themselves.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

use crate::types::{Event, Pacing};

#[derive(Debug)]
pub struct EventQueue {
    events: VecDeque<Event>,
    rng: StdRng,
    pacing: Pacing,
}

impl EventQueue {
    pub fn new(pacing: Pacing, rng: StdRng) -> Self {
        Self {
            events: VecDeque::new(),
            rng,
            pacing,
        }
    }

    pub fn with_seed(pacing: Pacing, seed: u64) -> Self {
        Self::new(pacing, StdRng::seed_from_u64(seed))
    }

    pub fn push_back(&mut self, event: Event) {
        let throttlable = event.is_throttlable();
        self.events.push_back(event);
        if throttlable {
            let pause = self.next_pause();
            self.events.push_back(Event::Throttle(pause));
        }
    }

    pub fn pop_front(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// The random stream shared by the queue and whoever fills it
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    fn next_pause(&mut self) -> u64 {
        let throttle = self.pacing.throttle_ms;
        if self.pacing.randomize && throttle > 0 {
            let draw: i64 = self.rng.random();
            draw.unsigned_abs() % throttle + 1
        } else {
            throttle
        }
    }
}
