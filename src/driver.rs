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

//! Run driver
//!
//! Pulls one event at a time from the source, hands it to the injector and
//! classifies the outcome. Fault flags are drained once per cycle and the
//! requested diagnostics run outside the monitor lock.

use tracing::{debug, error, info, warn};

use crate::clock::wall_millis;
use crate::config::MonkeyConfig;
use crate::context::RunContext;
use crate::fault::{DiagnosticReporter, FaultMonitor, PendingReports};
use crate::inject::{self, Injector, Interrupt};
use crate::source::EventSource;
use crate::types::{Event, EventKind, InjectOutcome};

const PROGRESS_INTERVAL: u64 = 100;

/// Loop limits and switches taken from the run configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverOptions {
    pub count: u64,
    /// Count injected events toward `count` rather than source cycles
    pub count_events: bool,
    pub dbg_no_events: bool,
    pub verbosity: u8,
    /// Cycles between periodic bug reports, if enabled
    pub periodic_bugreport: Option<u64>,
    pub ignore_security_errors: bool,
}

impl DriverOptions {
    pub fn from_config(config: &MonkeyConfig) -> Self {
        Self {
            count: config.count,
            count_events: config.count_events,
            dbg_no_events: config.dbg_no_events,
            verbosity: config.verbosity,
            periodic_bugreport: config
                .periodic_bugreport
                .then_some(config.bugreport_frequency),
            ignore_security_errors: config.faults.ignore_security_errors,
        }
    }
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self::from_config(&MonkeyConfig::default())
    }
}

/// Events the target rejected, by kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DroppedCounts {
    pub keys: u64,
    pub pointers: u64,
    pub trackballs: u64,
    pub flips: u64,
    pub rotations: u64,
}

impl DroppedCounts {
    fn record(&mut self, kind: EventKind) {
        match kind {
            EventKind::Key => self.keys += 1,
            EventKind::Touch => self.pointers += 1,
            EventKind::Trackball => self.trackballs += 1,
            EventKind::KeyboardFlip => self.flips += 1,
            EventKind::Rotation => self.rotations += 1,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Events handed to the target, throttles and waits excluded
    pub events_injected: u64,
    pub cycles: u64,
    pub dropped: DroppedCounts,
    pub aborted: bool,
    pub system_crashed: bool,
}

impl RunSummary {
    pub fn log(&self) {
        info!("Events injected: {}", self.events_injected);
        info!(
            ":Dropped: keys={} pointers={} trackballs={} flips={} rotations={}",
            self.dropped.keys,
            self.dropped.pointers,
            self.dropped.trackballs,
            self.dropped.flips,
            self.dropped.rotations
        );
    }
}

pub struct Driver<S, I, R> {
    source: S,
    injector: I,
    reporter: R,
    monitor: FaultMonitor,
    context: RunContext,
    interrupt: Interrupt,
    options: DriverOptions,
}

impl<S, I, R> Driver<S, I, R>
where
    S: EventSource,
    I: Injector,
    R: DiagnosticReporter,
{
    pub fn new(source: S, injector: I, reporter: R, monitor: FaultMonitor, options: DriverOptions) -> Self {
        Self {
            source,
            injector,
            reporter,
            monitor,
            context: RunContext::new(),
            interrupt: Interrupt::new(),
            options,
        }
    }

    /// Shares the launch record with other readers, such as `getvar`
    pub fn with_context(mut self, context: RunContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn injector(&self) -> &I {
        &self.injector
    }

    fn run_diagnostics(&mut self, pending: &PendingReports) {
        if pending.procrank {
            self.reporter.procrank();
        }
        for prefix in &pending.bugreports {
            self.reporter.bugreport(prefix);
        }
        if pending.anr_traces {
            self.reporter.anr_traces();
        }
        if pending.meminfo {
            self.reporter.meminfo();
        }
    }

    async fn deliver(&mut self, event: &Event) -> InjectOutcome {
        match event {
            Event::Throttle(millis) | Event::Wait(millis) => {
                if self.options.verbosity > 1 {
                    debug!("{}", event);
                }
                inject::pause(*millis, &self.interrupt).await
            }
            _ => self.injector.inject(event).await,
        }
    }

    /// Runs until the count is reached, the source ends, a fault aborts the
    /// run or the transport fails
    pub async fn run(&mut self) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut cycle: u64 = 0;

        while !summary.system_crashed && cycle < self.options.count {
            let pending = self.monitor.drain();
            self.run_diagnostics(&pending);
            if pending.watchdog {
                self.monitor.acknowledge_watchdog();
            }

            if pending.abort {
                error!("** Monkey aborted due to error.");
                summary.aborted = true;
                break;
            }

            if self.options.dbg_no_events {
                summary.events_injected += 1;
                cycle += 1;
                continue;
            }

            if self.options.verbosity > 0
                && summary.events_injected % PROGRESS_INTERVAL == 0
                && summary.events_injected != 0
            {
                info!("    //[calendar_time:{}]", wall_millis());
                info!("    // Sending event #{}", summary.events_injected);
            }

            let Some(event) = self.source.next_event().await else {
                if self.options.count_events {
                    break;
                }
                cycle += 1;
                if let Some(frequency) = self.options.periodic_bugreport {
                    if frequency > 0 && cycle % frequency == 0 {
                        self.monitor.request_periodic_bugreport();
                    }
                }
                continue;
            };

            match self.deliver(&event).await {
                InjectOutcome::Success => {
                    if let Event::AppLaunch { component, .. } = &event {
                        self.context.record_launch(component);
                    }
                }
                InjectOutcome::Fail => {
                    warn!("    // Injection Failed");
                    summary.dropped.record(event.kind());
                }
                InjectOutcome::FatalTransport => {
                    error!("** Error: transport failure while injecting event.");
                    summary.system_crashed = true;
                }
                InjectOutcome::FatalPermission => {
                    if !self.options.ignore_security_errors {
                        error!("** Error: permission failure while injecting event.");
                        summary.system_crashed = true;
                    }
                }
            }

            if !matches!(event.kind(), EventKind::Throttle | EventKind::Wait) {
                summary.events_injected += 1;
                if self.options.count_events {
                    cycle += 1;
                }
            }
        }

        self.monitor.acknowledge_watchdog();
        summary.cycles = cycle;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{FaultPolicy, HangVerdict};
    use crate::inject::DryRunInjector;
    use crate::keycode::KEYCODE_HOME;
    use crate::types::{ComponentName, KeyAction};
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    /// Replays a fixed list, then ends. A repeating source ends each pass
    /// with one `None` and starts over, like a script.
    struct ListSource {
        template: Vec<Event>,
        events: VecDeque<Event>,
        repeat: bool,
    }

    impl ListSource {
        fn new(events: Vec<Event>) -> Self {
            Self {
                events: events.clone().into(),
                template: events,
                repeat: false,
            }
        }

        fn repeating(mut self) -> Self {
            self.repeat = true;
            self
        }
    }

    impl EventSource for ListSource {
        async fn next_event(&mut self) -> Option<Event> {
            let event = self.events.pop_front();
            if event.is_none() && self.repeat {
                self.events = self.template.clone().into();
            }
            event
        }

        fn validate(&mut self) -> bool {
            true
        }

        fn set_verbosity(&mut self, _verbosity: u8) {}
    }

    /// Answers each event with a scripted outcome, success once exhausted
    struct ScriptedInjector {
        outcomes: VecDeque<InjectOutcome>,
        seen: Vec<Event>,
    }

    impl ScriptedInjector {
        fn new(outcomes: Vec<InjectOutcome>) -> Self {
            Self {
                outcomes: outcomes.into(),
                seen: Vec::new(),
            }
        }
    }

    impl Injector for ScriptedInjector {
        async fn inject(&mut self, event: &Event) -> InjectOutcome {
            self.seen.push(event.clone());
            self.outcomes.pop_front().unwrap_or(InjectOutcome::Success)
        }
    }

    #[derive(Default)]
    struct RecordingReporter {
        calls: Vec<String>,
        /// Set once a watchdog callback has returned
        watchdog_returned: Option<Arc<AtomicBool>>,
    }

    impl DiagnosticReporter for RecordingReporter {
        fn anr_traces(&mut self) {
            self.calls.push("traces".into());
        }

        fn meminfo(&mut self) {
            self.calls.push("meminfo".into());
        }

        fn procrank(&mut self) {
            self.calls.push("procrank".into());
        }

        fn bugreport(&mut self, prefix: &str) {
            if let Some(returned) = &self.watchdog_returned {
                thread::sleep(Duration::from_millis(100));
                let returned = returned.load(Ordering::SeqCst);
                self.calls.push(format!("watchdog returned: {}", returned));
            }
            self.calls.push(format!("bugreport:{}", prefix));
        }
    }

    fn press() -> Vec<Event> {
        vec![
            Event::key(KeyAction::Down, KEYCODE_HOME),
            Event::key(KeyAction::Up, KEYCODE_HOME),
            Event::Throttle(0),
        ]
    }

    fn options(count: u64) -> DriverOptions {
        DriverOptions {
            count,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_throttles_are_not_counted() {
        let mut driver = Driver::new(
            ListSource::new(press()),
            DryRunInjector::new(0).recording(),
            RecordingReporter::default(),
            FaultMonitor::new(FaultPolicy::default()),
            options(100),
        );
        let summary = driver.run().await;
        assert_eq!(summary.events_injected, 2);
        assert_eq!(driver.injector().injected().len(), 2);
    }

    #[tokio::test]
    async fn test_count_limits_injected_events() {
        let events = press().into_iter().cycle().take(9).collect();
        let mut driver = Driver::new(
            ListSource::new(events),
            DryRunInjector::new(0),
            RecordingReporter::default(),
            FaultMonitor::new(FaultPolicy::default()),
            options(5),
        );
        let summary = driver.run().await;
        assert_eq!(summary.events_injected, 5);
        assert_eq!(summary.cycles, 5);
    }

    #[tokio::test]
    async fn test_failures_are_dropped_by_kind() {
        let events = vec![
            Event::key(KeyAction::Down, KEYCODE_HOME),
            Event::KeyboardFlip { open: true },
            Event::Noop,
        ];
        let mut driver = Driver::new(
            ListSource::new(events),
            ScriptedInjector::new(vec![InjectOutcome::Fail, InjectOutcome::Fail]),
            RecordingReporter::default(),
            FaultMonitor::new(FaultPolicy::default()),
            options(10),
        );
        let summary = driver.run().await;
        assert_eq!(summary.dropped.keys, 1);
        assert_eq!(summary.dropped.flips, 1);
        assert_eq!(summary.events_injected, 3);
        assert!(!summary.system_crashed);
    }

    #[tokio::test]
    async fn test_fatal_transport_stops_run() {
        let mut driver = Driver::new(
            ListSource::new(press()).repeating(),
            ScriptedInjector::new(vec![InjectOutcome::Success, InjectOutcome::FatalTransport]),
            RecordingReporter::default(),
            FaultMonitor::new(FaultPolicy::default()),
            options(100),
        );
        let summary = driver.run().await;
        assert!(summary.system_crashed);
        assert_eq!(driver.injector().seen.len(), 2);
    }

    #[tokio::test]
    async fn test_permission_errors_can_be_tolerated() {
        let run = |ignore: bool| async move {
            let mut driver = Driver::new(
                ListSource::new(press()),
                ScriptedInjector::new(vec![InjectOutcome::FatalPermission]),
                RecordingReporter::default(),
                FaultMonitor::new(FaultPolicy::default()),
                DriverOptions {
                    ignore_security_errors: ignore,
                    ..options(100)
                },
            );
            driver.run().await
        };
        assert!(run(false).await.system_crashed);
        let tolerated = run(true).await;
        assert!(!tolerated.system_crashed);
        assert_eq!(tolerated.events_injected, 2);
    }

    #[tokio::test]
    async fn test_abort_before_first_event() {
        let monitor = FaultMonitor::new(FaultPolicy {
            request_bugreport: true,
            ..Default::default()
        });
        monitor.app_crashed("com.example", 7, "boom", "boom", "trace");

        let mut driver = Driver::new(
            ListSource::new(press()),
            DryRunInjector::new(0).recording(),
            RecordingReporter::default(),
            monitor,
            options(100),
        );
        let summary = driver.run().await;
        assert!(summary.aborted);
        assert_eq!(summary.events_injected, 0);
        assert!(driver.injector().injected().is_empty());
        assert_eq!(
            driver.reporter.calls,
            vec!["bugreport:app_crashcom.example_".to_string()]
        );
    }

    #[tokio::test]
    async fn test_successful_launch_updates_context() {
        let component = ComponentName::new("com.example", "com.example.Main");
        let context = RunContext::new();
        let mut driver = Driver::new(
            ListSource::new(vec![Event::AppLaunch {
                component: component.clone(),
                alarm: None,
            }]),
            DryRunInjector::new(0),
            RecordingReporter::default(),
            FaultMonitor::new(FaultPolicy::default()),
            options(10),
        )
        .with_context(context.clone());
        driver.run().await;
        assert_eq!(context.current_package().as_deref(), Some("com.example"));
    }

    #[tokio::test]
    async fn test_cycles_mode_requests_periodic_bugreports() {
        let mut driver = Driver::new(
            ListSource::new(vec![Event::Noop]).repeating(),
            DryRunInjector::new(0),
            RecordingReporter::default(),
            FaultMonitor::new(FaultPolicy::default()),
            DriverOptions {
                count: 4,
                count_events: false,
                periodic_bugreport: Some(2),
                ..Default::default()
            },
        );
        let summary = driver.run().await;
        assert_eq!(summary.cycles, 4);
        assert_eq!(summary.events_injected, 4);
        // The request from cycle 4 is never drained; cycle 2's is
        assert_eq!(
            driver.reporter.calls,
            vec!["bugreport:Bugreport_".to_string()]
        );
    }

    #[tokio::test]
    async fn test_dbg_no_events_counts_without_injecting() {
        let mut driver = Driver::new(
            ListSource::new(press()),
            DryRunInjector::new(0).recording(),
            RecordingReporter::default(),
            FaultMonitor::new(FaultPolicy::default()),
            DriverOptions {
                dbg_no_events: true,
                ..options(7)
            },
        );
        let summary = driver.run().await;
        assert_eq!(summary.events_injected, 7);
        assert!(driver.injector().injected().is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_wait_is_dropped() {
        let interrupt = Interrupt::new();
        interrupt.trigger();
        let mut driver = Driver::new(
            ListSource::new(vec![Event::Wait(10_000)]),
            DryRunInjector::new(0),
            RecordingReporter::default(),
            FaultMonitor::new(FaultPolicy::default()),
            options(10),
        )
        .with_interrupt(interrupt);
        let summary = driver.run().await;
        assert_eq!(summary.events_injected, 0);
        assert_eq!(summary.dropped, DroppedCounts::default());
    }

    #[tokio::test]
    async fn test_watchdog_held_until_report_captured() {
        let monitor = FaultMonitor::new(FaultPolicy {
            request_bugreport: true,
            ..Default::default()
        });
        let returned = Arc::new(AtomicBool::new(false));
        let reporter_side = monitor.clone();
        let watchdog_returned = returned.clone();
        let watchdog = thread::spawn(move || {
            let verdict = reporter_side.system_not_responding("stuck");
            watchdog_returned.store(true, Ordering::SeqCst);
            verdict
        });

        // Let the watchdog callback reach its wait
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut driver = Driver::new(
            ListSource::new(press()),
            DryRunInjector::new(0),
            RecordingReporter {
                watchdog_returned: Some(returned.clone()),
                ..Default::default()
            },
            monitor,
            options(10),
        );
        let summary = driver.run().await;
        assert!(summary.aborted);
        assert_eq!(
            driver.reporter.calls,
            vec![
                "watchdog returned: false".to_string(),
                "bugreport:anr_watchdog_".to_string(),
            ]
        );
        assert_eq!(watchdog.join().unwrap(), HangVerdict::KeepWaiting);
        assert!(returned.load(Ordering::SeqCst));
    }
}
