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

//! Injection boundary
//!
//! The transport that delivers events to the target lives behind
//! [`Injector`]. Pauses are handled here, interruptibly, so that a Ctrl-C
//! during a throttle fails that event instead of stalling the run.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::types::{Event, InjectOutcome};

/// Hands one event to the target
#[allow(async_fn_in_trait)]
pub trait Injector {
    async fn inject(&mut self, event: &Event) -> InjectOutcome;
}

/// Device side effects that are not events
pub trait DeviceControl: Send {
    /// Wakes the screen; returns false if the device refused
    fn wake(&mut self) -> bool;
}

/// Device control that only logs
#[derive(Debug, Default)]
pub struct LogDevice;

impl DeviceControl for LogDevice {
    fn wake(&mut self) -> bool {
        info!("Waking device");
        true
    }
}

/// Cancellation for the driver's sleeps, triggered from the signal handler
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    triggered: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration`; returns false if interrupted first
    pub async fn sleep(&self, duration: Duration) -> bool {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_triggered() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = notified => false,
        }
    }
}

/// Performs a Throttle or Wait pause
pub async fn pause(millis: u64, interrupt: &Interrupt) -> InjectOutcome {
    if interrupt.sleep(Duration::from_millis(millis)).await {
        InjectOutcome::Success
    } else {
        InjectOutcome::Fail
    }
}

/// Injector that accepts everything and narrates what it would send
#[derive(Debug, Default)]
pub struct DryRunInjector {
    verbosity: u8,
    injected: Vec<Event>,
    keep_history: bool,
}

impl DryRunInjector {
    pub fn new(verbosity: u8) -> Self {
        Self {
            verbosity,
            injected: Vec::new(),
            keep_history: false,
        }
    }

    /// Keeps a copy of every event for later inspection
    pub fn recording(mut self) -> Self {
        self.keep_history = true;
        self
    }

    pub fn injected(&self) -> &[Event] {
        &self.injected
    }
}

impl Injector for DryRunInjector {
    async fn inject(&mut self, event: &Event) -> InjectOutcome {
        if self.verbosity > 1 || (self.verbosity > 0 && !event.is_intermediate()) {
            info!("{}", event);
        } else {
            debug!("{}", event);
        }
        if self.keep_history {
            self.injected.push(event.clone());
        }
        InjectOutcome::Success
    }
}
