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

//! Crash and hang coordination
//!
//! The target reports crashes, hangs and watchdog timeouts from its own
//! thread. Those callbacks only set flags under one mutex; the driver drains
//! the flags once per cycle and performs the requested diagnostics after
//! releasing the lock. A condition variable lets the watchdog callback block
//! until the driver has seen its report.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tracing::{error, info};

/// How the run reacts to faults reported by the target
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FaultPolicy {
    pub ignore_crashes: bool,
    pub ignore_timeouts: bool,
    pub ignore_security_errors: bool,
    pub kill_process_after_error: bool,
    pub request_bugreport: bool,
    /// Only faults whose text contains this string are acted upon
    pub match_description: Option<String>,
}

impl FaultPolicy {
    fn matches(&self, texts: &[&str]) -> bool {
        match &self.match_description {
            None => true,
            Some(needle) => texts.iter().any(|text| text.contains(needle.as_str())),
        }
    }
}

/// Answer to a hang report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HangVerdict {
    KeepWaiting,
    Kill,
}

#[derive(Debug, Default)]
struct FaultFlags {
    abort: bool,
    anr_traces: bool,
    meminfo: bool,
    procrank: bool,
    anr_bugreport: bool,
    app_crash_bugreport: bool,
    watchdog_bugreport: bool,
    periodic_bugreport: bool,
    watchdog_waiting: bool,
    process_name: Option<String>,
}

/// Work collected from the flags in one drain, performed without the lock
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PendingReports {
    pub abort: bool,
    pub anr_traces: bool,
    pub meminfo: bool,
    pub procrank: bool,
    /// Bug report file prefixes, in request order
    pub bugreports: Vec<String>,
    /// A watchdog callback is blocked until `acknowledge_watchdog`
    pub watchdog: bool,
}

impl PendingReports {
    pub fn is_empty(&self) -> bool {
        !self.anr_traces && !self.meminfo && !self.procrank && self.bugreports.is_empty()
    }
}

/// Handle shared between the driver and the fault-reporting thread
#[derive(Debug, Clone)]
pub struct FaultMonitor {
    shared: Arc<(Mutex<FaultFlags>, Condvar)>,
    policy: Arc<FaultPolicy>,
}

impl FaultMonitor {
    pub fn new(policy: FaultPolicy) -> Self {
        Self {
            shared: Arc::new((Mutex::new(FaultFlags::default()), Condvar::new())),
            policy: Arc::new(policy),
        }
    }

    pub fn policy(&self) -> &FaultPolicy {
        &self.policy
    }

    fn flags(&self) -> MutexGuard<'_, FaultFlags> {
        self.shared.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A process crashed. Returns whether the target may restart it.
    pub fn app_crashed(
        &self,
        process: &str,
        pid: i32,
        short_msg: &str,
        long_msg: &str,
        stack_trace: &str,
    ) -> bool {
        error!("// CRASH: {} (pid {})", process, pid);
        error!("// Short Msg: {}", short_msg);
        error!("// Long Msg: {}", long_msg);
        error!("// {}", stack_trace.replace('\n', "\n// "));

        if !self.policy.matches(&[short_msg, long_msg, stack_trace]) {
            return false;
        }
        if self.policy.ignore_crashes && !self.policy.request_bugreport {
            return false;
        }

        let mut flags = self.flags();
        if !self.policy.ignore_crashes {
            flags.abort = true;
        }
        if self.policy.request_bugreport {
            flags.app_crash_bugreport = true;
            flags.process_name = Some(process.to_string());
        }
        !self.policy.kill_process_after_error
    }

    /// A process stopped responding
    pub fn app_not_responding(&self, process: &str, pid: i32, stats: &str) -> HangVerdict {
        error!("// NOT RESPONDING: {} (pid {})", process, pid);
        error!("{}", stats);

        if self.policy.matches(&[stats]) {
            let mut flags = self.flags();
            flags.anr_traces = true;
            flags.meminfo = true;
            flags.procrank = true;
            if self.policy.request_bugreport {
                flags.anr_bugreport = true;
                flags.process_name = Some(process.to_string());
            }
            if !self.policy.ignore_timeouts {
                flags.abort = true;
            }
        }
        self.hang_verdict()
    }

    /// The system watchdog fired. Blocks until the driver acknowledges.
    pub fn system_not_responding(&self, message: &str) -> HangVerdict {
        error!("// WATCHDOG: {}", message);

        let mut flags = self.flags();
        if self.policy.matches(&[message]) {
            if !self.policy.ignore_crashes {
                flags.abort = true;
            }
            if self.policy.request_bugreport {
                flags.watchdog_bugreport = true;
            }
        }
        flags.watchdog_waiting = true;
        while flags.watchdog_waiting {
            flags = self
                .shared
                .1
                .wait(flags)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(flags);

        self.hang_verdict()
    }

    fn hang_verdict(&self) -> HangVerdict {
        if self.policy.kill_process_after_error {
            HangVerdict::Kill
        } else {
            HangVerdict::KeepWaiting
        }
    }

    pub fn request_abort(&self) {
        self.flags().abort = true;
    }

    pub fn request_periodic_bugreport(&self) {
        self.flags().periodic_bugreport = true;
    }

    /// Takes every pending request. A waiting watchdog stays blocked until
    /// the driver has captured its report and calls `acknowledge_watchdog`.
    pub fn drain(&self) -> PendingReports {
        let mut flags = self.flags();
        let mut pending = PendingReports::default();
        let process = flags.process_name.clone().unwrap_or_default();

        if std::mem::take(&mut flags.procrank) {
            pending.procrank = true;
        }
        if std::mem::take(&mut flags.anr_traces) {
            pending.anr_traces = true;
        }
        if std::mem::take(&mut flags.anr_bugreport) {
            pending.bugreports.push(format!("anr_{}_", process));
        }
        if std::mem::take(&mut flags.watchdog_bugreport) {
            info!("Print the watchdog report");
            pending.bugreports.push("anr_watchdog_".to_string());
        }
        if std::mem::take(&mut flags.app_crash_bugreport) {
            pending.bugreports.push(format!("app_crash{}_", process));
        }
        if std::mem::take(&mut flags.periodic_bugreport) {
            pending.bugreports.push("Bugreport_".to_string());
        }
        if std::mem::take(&mut flags.meminfo) {
            pending.meminfo = true;
        }
        pending.abort = flags.abort;
        pending.watchdog = flags.watchdog_waiting;
        pending
    }

    /// Wakes a blocked watchdog callback, after its report or at teardown
    pub fn acknowledge_watchdog(&self) {
        let mut flags = self.flags();
        if std::mem::take(&mut flags.watchdog_waiting) {
            self.shared.1.notify_all();
        }
    }
}

/// Captures diagnostics on request. Report persistence belongs to the
/// collaborator; the driver only decides when to ask.
pub trait DiagnosticReporter {
    fn anr_traces(&mut self);
    fn meminfo(&mut self);
    fn procrank(&mut self);
    fn bugreport(&mut self, prefix: &str);
}

/// Reporter that records requests in the log only
#[derive(Debug, Default)]
pub struct LogReporter;

impl DiagnosticReporter for LogReporter {
    fn anr_traces(&mut self) {
        info!("ANR traces requested");
    }

    fn meminfo(&mut self) {
        info!("meminfo dump requested");
    }

    fn procrank(&mut self) {
        info!("procrank report requested");
    }

    fn bugreport(&mut self, prefix: &str) {
        info!("bugreport requested: {}", prefix);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_crash_sets_abort_and_bugreport() {
        let monitor = FaultMonitor::new(FaultPolicy {
            request_bugreport: true,
            ..Default::default()
        });
        assert!(monitor.app_crashed("com.example", 42, "boom", "long boom", "at main"));

        let pending = monitor.drain();
        assert!(pending.abort);
        assert_eq!(pending.bugreports, vec!["app_crashcom.example_".to_string()]);

        // Requests are consumed, abort stays latched
        let again = monitor.drain();
        assert!(again.abort);
        assert!(again.bugreports.is_empty());
    }

    #[test]
    fn test_ignored_crash_does_not_abort() {
        let monitor = FaultMonitor::new(FaultPolicy {
            ignore_crashes: true,
            ..Default::default()
        });
        assert!(!monitor.app_crashed("p", 1, "s", "l", "t"));
        assert!(!monitor.drain().abort);
    }

    #[test]
    fn test_match_description_filters_crashes() {
        let monitor = FaultMonitor::new(FaultPolicy {
            match_description: Some("OutOfMemory".to_string()),
            kill_process_after_error: true,
            ..Default::default()
        });
        assert!(!monitor.app_crashed("p", 1, "NullPointer", "", ""));
        assert!(!monitor.drain().abort);
        assert!(!monitor.app_crashed("p", 1, "", "", "java.lang.OutOfMemoryError"));
        assert!(monitor.drain().abort);
    }

    #[test]
    fn test_anr_requests_diagnostics() {
        let monitor = FaultMonitor::new(FaultPolicy {
            ignore_timeouts: true,
            ..Default::default()
        });
        assert_eq!(
            monitor.app_not_responding("p", 7, "cpu stats"),
            HangVerdict::KeepWaiting
        );
        let pending = monitor.drain();
        assert!(pending.anr_traces && pending.meminfo && pending.procrank);
        assert!(!pending.abort);
    }

    #[test]
    fn test_watchdog_blocks_until_acknowledged() {
        let monitor = FaultMonitor::new(FaultPolicy {
            kill_process_after_error: true,
            ..Default::default()
        });
        let reporter = monitor.clone();
        let handle = thread::spawn(move || reporter.system_not_responding("system_server hung"));

        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        // Draining alone never releases the callback
        let mut pending = monitor.drain();
        while !pending.watchdog {
            thread::sleep(Duration::from_millis(5));
            pending = monitor.drain();
        }
        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        assert!(pending.abort);

        monitor.acknowledge_watchdog();
        assert_eq!(handle.join().unwrap(), HangVerdict::Kill);
        assert!(!monitor.drain().watchdog);
    }
}
