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

//! Script replay engine
//!
//! Replays recorded directives with the recorded cadence. The file is read
//! in batches as the queue drains; at end of file one `None` is returned and
//! the next call starts the replay again from the header.

use rand::rngs::StdRng;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, error, info};

use crate::clock::{Millis, uptime_millis};
use crate::errors::ScriptError;
use crate::inject::Interrupt;
use crate::keycode::{self, KEYCODE_0, KEYCODE_BACK, KEYCODE_DPAD_CENTER, KEYCODE_MENU};
use crate::parser::{self, Directive, HeaderLine};
use crate::queue::EventQueue;
use crate::source::EventSource;
use crate::types::{
    ComponentName, Event, FrameRateMarker, KeyAction, KeyEvent, MotionAction, MotionEvent,
    MotionEventBuilder, Pacing, ScreenRotation,
};

const MAX_ONE_TIME_READS: usize = 100;
const SLEEP_COMPENSATE_MS: Millis = 16;
const LONGPRESS_WAIT_MS: u64 = 2000;
const TAP_PRESSURE: f32 = 1.0;
const TAP_SIZE: f32 = 5.0;

/// Header values seen before the start marker
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptHeader {
    pub count: u64,
    pub speed: f64,
    pub line_by_line: bool,
}

impl Default for ScriptHeader {
    fn default() -> Self {
        Self {
            count: 0,
            speed: 1.0,
            line_by_line: false,
        }
    }
}

impl ScriptHeader {
    /// Applies one header line; returns true once the start marker is seen
    fn apply(&mut self, line: &str) -> Result<bool, ScriptError> {
        match parser::parse_header_line(line)? {
            HeaderLine::Count(count) => self.count = count,
            HeaderLine::Speed(speed) => self.speed = speed,
            HeaderLine::LineByLine => self.line_by_line = true,
            HeaderLine::StartData => return Ok(true),
            HeaderLine::Other => {}
        }
        Ok(false)
    }
}

/// Last recorded and exported times, used to rebuild the cadence
#[derive(Debug, Clone)]
struct ReplayClock {
    last_recorded_down_key: Millis,
    last_recorded_down_motion: Millis,
    last_export_down_key: Millis,
    last_export_down_motion: Millis,
    last_export_event: Millis,
    last_recorded_event: Millis,
}

impl Default for ReplayClock {
    fn default() -> Self {
        Self {
            last_recorded_down_key: 0,
            last_recorded_down_motion: 0,
            last_export_down_key: 0,
            last_export_down_motion: 0,
            last_export_event: -1,
            last_recorded_event: -1,
        }
    }
}

#[derive(Debug)]
pub struct ScriptSource {
    path: PathBuf,
    queue: EventQueue,
    reader: Option<Lines<BufReader<File>>>,
    header: ScriptHeader,
    clock: ReplayClock,
    last_position: [(f32, f32); 2],
    script_start: Option<Millis>,
    replay_start: Millis,
    profile_wait_ms: u64,
    device_sleep_ms: u64,
    interrupt: Interrupt,
    verbosity: u8,
}

impl ScriptSource {
    pub fn new(path: impl Into<PathBuf>, pacing: Pacing, rng: StdRng) -> Self {
        Self {
            path: path.into(),
            queue: EventQueue::new(pacing, rng),
            reader: None,
            header: ScriptHeader::default(),
            clock: ReplayClock::default(),
            last_position: [(0.0, 0.0); 2],
            script_start: None,
            replay_start: -1,
            profile_wait_ms: 5000,
            device_sleep_ms: 30000,
            interrupt: Interrupt::new(),
            verbosity: 0,
        }
    }

    pub fn with_waits(mut self, profile_wait_ms: u64, device_sleep_ms: u64) -> Self {
        self.profile_wait_ms = profile_wait_ms;
        self.device_sleep_ms = device_sleep_ms;
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &ScriptHeader {
        &self.header
    }

    /// Reads the header with blocking I/O; used once before the run
    fn read_header_sync(&mut self) -> Result<(), ScriptError> {
        let file = std::fs::File::open(&self.path)?;
        let mut header = ScriptHeader::default();
        for line in std::io::BufReader::new(file).lines() {
            if header.apply(&line?)? {
                self.header = header;
                return Ok(());
            }
        }
        Err(ScriptError::MissingStartMarker)
    }

    async fn open(&mut self) -> Result<(), ScriptError> {
        self.clock = ReplayClock::default();

        let mut lines = BufReader::new(File::open(&self.path).await?).lines();
        let mut header = ScriptHeader::default();
        while let Some(line) = lines.next_line().await? {
            if header.apply(&line)? {
                break;
            }
        }
        self.header = header;
        self.reader = Some(lines);
        Ok(())
    }

    /// Reads the next batch of lines into the queue; returns lines read
    async fn read_next_batch(&mut self) -> Result<usize, ScriptError> {
        if self.reader.is_none() {
            self.open().await?;
        }

        let limit = if self.header.line_by_line {
            1
        } else {
            MAX_ONE_TIME_READS
        };

        let mut read = 0;
        while read < limit {
            let Some(reader) = self.reader.as_mut() else {
                break;
            };
            let Some(line) = reader.next_line().await? else {
                break;
            };
            read += 1;
            self.process_line(&line);
        }

        if read == 0 {
            self.reader = None;
        }
        Ok(read)
    }

    fn process_line(&mut self, line: &str) {
        let Some(directive) = parser::parse_directive(line) else {
            return;
        };
        match self.handle_directive(&directive) {
            Some(events) => {
                for event in events {
                    self.queue.push_back(event);
                }
            }
            None => debug!("Skipping script line: {}", line.trim()),
        }
    }

    fn handle_directive(&mut self, directive: &Directive<'_>) -> Option<Vec<Event>> {
        let args = directive.args.as_slice();

        if directive.is("DispatchKey") && args.len() == 8 {
            return recorded_key(args).map(|key| vec![Event::Key(key)]);
        }
        if directive.is("DispatchPointer") || directive.is("DispatchTrackball") {
            let touch = directive.is("DispatchPointer");
            return match args.len() {
                12 => recorded_motion(touch, args).map(|event| vec![event]),
                13 => self.recorded_multi_pointer(touch, args),
                _ => None,
            };
        }
        if directive.is("RotateScreen") && args.len() == 2 {
            let rotation = ScreenRotation::from_raw(args[0].parse().ok()?)?;
            let persist = args[1].parse::<i32>().ok()? != 0;
            return Some(vec![Event::Rotation { rotation, persist }]);
        }
        if directive.is("PressAndHold") && args.len() == 3 {
            let (x, y) = (args[0].parse().ok()?, args[1].parse().ok()?);
            let duration: u64 = args[2].parse().ok()?;
            let hold = Millis::try_from(duration).ok()?;
            let down_at = uptime_millis();
            return Some(vec![
                tap_event(MotionAction::Down, down_at, down_at, x, y)?,
                Event::Wait(duration),
                tap_event(MotionAction::Up, down_at, down_at.saturating_add(hold), x, y)?,
            ]);
        }
        if directive.is("Tap") && args.len() >= 2 {
            let (x, y) = (args[0].parse().ok()?, args[1].parse().ok()?);
            let duration: u64 = if args.len() == 3 {
                args[2].parse().ok()?
            } else {
                0
            };
            let down_at = uptime_millis();
            let mut events = vec![tap_event(MotionAction::Down, down_at, down_at, x, y)?];
            if duration > 0 {
                events.push(Event::Wait(duration));
            }
            events.push(tap_event(MotionAction::Up, down_at, down_at, x, y)?);
            return Some(events);
        }
        if directive.is("Drag") && args.len() == 5 {
            return drag(args);
        }
        if directive.is("PinchZoom") && args.len() == 9 {
            return pinch_zoom(args);
        }
        if directive.is("DispatchFlip") && args.len() == 1 {
            let open = args[0].eq_ignore_ascii_case("true");
            return Some(vec![Event::KeyboardFlip { open }]);
        }
        if directive.is("LaunchActivity") && args.len() >= 2 {
            let component = ComponentName::new(args[0], args[1]);
            let alarm = if args.len() > 2 {
                Some(args[2].parse().ok()?)
            } else {
                None
            };
            return Some(vec![Event::AppLaunch { component, alarm }]);
        }
        if directive.is("DeviceWakeUp") {
            return Some(self.device_wake_up());
        }
        if directive.is("LaunchInstrumentation") && args.len() == 2 {
            return Some(vec![Event::Instrumentation {
                test: args[0].to_string(),
                runner: args[1].to_string(),
            }]);
        }
        if directive.is("UserWait") && args.len() == 1 {
            return Some(vec![Event::Wait(args[0].parse().ok()?)]);
        }
        if directive.is("ProfileWait") {
            return Some(vec![Event::Wait(self.profile_wait_ms)]);
        }
        if directive.is("DispatchPress") && args.len() == 1 {
            let code = keycode::resolve_key(args[0]).filter(|code| *code != 0)?;
            return Some(key_press(code));
        }
        if directive.is("LongPress") {
            return Some(vec![
                Event::key(KeyAction::Down, KEYCODE_DPAD_CENTER),
                Event::Wait(LONGPRESS_WAIT_MS),
                Event::key(KeyAction::Up, KEYCODE_DPAD_CENTER),
            ]);
        }
        if directive.is("RunCmd") && args.len() == 1 {
            return Some(vec![Event::Command(args[0].to_string())]);
        }
        if directive.is("DispatchString") && args.len() == 1 {
            return Some(vec![Event::Command(format!("input text {}", args[0]))]);
        }
        if directive.is("StartCaptureFramerate") {
            return Some(vec![Event::FrameRate(FrameRateMarker::Start)]);
        }
        if directive.is("EndCaptureFramerate") && args.len() == 1 {
            return Some(vec![Event::FrameRate(FrameRateMarker::End {
                label: args[0].to_string(),
            })]);
        }
        if directive.is("StartCaptureAppFramerate") && args.len() == 1 {
            return Some(vec![Event::FrameRate(FrameRateMarker::AppStart {
                app: args[0].to_string(),
            })]);
        }
        if directive.is("EndCaptureAppFramerate") && args.len() == 2 {
            return Some(vec![Event::FrameRate(FrameRateMarker::AppEnd {
                app: args[0].to_string(),
                label: args[1].to_string(),
            })]);
        }
        None
    }

    fn device_wake_up(&self) -> Vec<Event> {
        let mut events = vec![Event::AppLaunch {
            component: ComponentName::new(
                "com.google.android.powerutil",
                "com.google.android.powerutil.WakeUpScreen",
            ),
            alarm: Some(self.device_sleep_ms as Millis),
        }];
        events.extend(key_press(KEYCODE_0));
        events.push(Event::Wait(self.device_sleep_ms + 3000));
        events.extend(key_press(KEYCODE_MENU));
        events.extend(key_press(KEYCODE_BACK));
        events
    }

    /// Pointer ids 0 and 1 recorded on separate lines, merged into one
    /// two-finger event using the other finger's last position
    fn recorded_multi_pointer(&mut self, touch: bool, args: &[&str]) -> Option<Vec<Event>> {
        let fields = MotionFields::parse(&args[..12])?;
        let pointer_id: u32 = args[12].parse().ok()?;
        let mut action = MotionAction::from_raw(fields.action)?;
        let mut intermediate = false;

        if touch {
            if let MotionAction::PointerDown(_) = action {
                action = MotionAction::PointerDown(pointer_id);
                intermediate = true;
            }
            if self.script_start.is_none() {
                self.replay_start = uptime_millis();
                self.script_start = Some(fields.event_time);
            }
        }

        let builder = fields.builder(action).intermediate(intermediate);
        let (pressure, size) = (fields.pressure, fields.size);
        let builder = match pointer_id {
            1 => {
                let (x0, y0) = self.last_position[0];
                self.last_position[1] = (fields.x, fields.y);
                builder
                    .pointer_with(0, x0, y0, pressure, size)
                    .pointer_with(1, fields.x, fields.y, pressure, size)
            }
            0 => {
                let mut builder = builder.pointer_with(0, fields.x, fields.y, pressure, size);
                if let MotionAction::PointerUp(_) = action {
                    let (x1, y1) = self.last_position[1];
                    builder = builder.pointer(1, x1, y1);
                }
                self.last_position[0] = (fields.x, fields.y);
                builder
            }
            _ => return None,
        };
        let motion = builder.build().ok()?;

        let mut events = Vec::new();
        if self.header.line_by_line {
            if let Some(script_start) = self.script_start {
                let real_elapsed = uptime_millis() - self.replay_start;
                let script_elapsed = fields.event_time - script_start;
                if real_elapsed < script_elapsed {
                    events.push(Event::Wait((script_elapsed - real_elapsed) as u64));
                }
            }
        }
        events.push(if touch {
            Event::Touch(motion)
        } else {
            Event::Trackball(motion)
        });
        Some(events)
    }

    async fn need_sleep(&self, millis: Millis) {
        if millis < 1 {
            return;
        }
        self.interrupt.sleep(Duration::from_millis(millis as u64)).await;
    }

    async fn adjust_key_time(&mut self, key: &mut KeyEvent) {
        let Some(recorded_event) = key.event_time else {
            return;
        };
        let recorded_down = key.down_time.unwrap_or(0);

        let (down, event) = if self.clock.last_recorded_event <= 0 {
            let now = uptime_millis();
            (now, now)
        } else {
            let delay = (recorded_event.saturating_sub(self.clock.last_recorded_event) as f64
                * self.header.speed) as Millis;
            let event = self.clock.last_export_event.saturating_add(delay);
            self.need_sleep(delay.saturating_sub(SLEEP_COMPENSATE_MS)).await;
            let down = if recorded_down != self.clock.last_recorded_down_key {
                uptime_millis()
            } else {
                self.clock.last_export_down_key
            };
            (down.min(event), event)
        };

        self.clock.last_recorded_down_key = recorded_down;
        self.clock.last_recorded_event = recorded_event;
        self.clock.last_export_down_key = down;
        self.clock.last_export_event = event;
        key.down_time = Some(down);
        key.event_time = Some(event);
    }

    fn adjust_motion_time(&mut self, motion: &mut MotionEvent) {
        let now = uptime_millis();
        let recorded_down = motion.down_time().unwrap_or(0);
        let down = if recorded_down == self.clock.last_recorded_down_motion {
            self.clock.last_export_down_motion
        } else {
            self.clock.last_recorded_down_motion = recorded_down;
            self.clock.last_export_down_motion = now;
            now
        };
        motion.set_times(down, now);
    }
}

impl EventSource for ScriptSource {
    async fn next_event(&mut self) -> Option<Event> {
        while self.queue.is_empty() {
            match self.read_next_batch().await {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    error!("Failed to read script {}: {}", self.path.display(), e);
                    self.reader = None;
                    return None;
                }
            }
        }

        let mut event = self.queue.pop_front()?;
        match &mut event {
            Event::Key(key) => self.adjust_key_time(key).await,
            Event::Touch(motion) | Event::Trackball(motion) => self.adjust_motion_time(motion),
            _ => {}
        }
        Some(event)
    }

    fn validate(&mut self) -> bool {
        if let Err(e) = self.read_header_sync() {
            error!("Invalid script {}: {}", self.path.display(), e);
            return false;
        }
        if self.verbosity > 0 {
            info!(
                "Replaying {} events with speed {}",
                self.header.count, self.header.speed
            );
        }
        true
    }

    fn set_verbosity(&mut self, verbosity: u8) {
        self.verbosity = verbosity;
    }
}

/// The twelve fixed fields of a recorded pointer or trackball line
struct MotionFields {
    down_time: Millis,
    event_time: Millis,
    action: i32,
    x: f32,
    y: f32,
    pressure: f32,
    size: f32,
    meta_state: u32,
    x_precision: f32,
    y_precision: f32,
    device_id: i32,
    edge_flags: u32,
}

impl MotionFields {
    fn parse(args: &[&str]) -> Option<Self> {
        Some(Self {
            down_time: args[0].parse().ok()?,
            event_time: args[1].parse().ok()?,
            action: args[2].parse().ok()?,
            x: args[3].parse().ok()?,
            y: args[4].parse().ok()?,
            pressure: args[5].parse().ok()?,
            size: args[6].parse().ok()?,
            meta_state: args[7].parse().ok()?,
            x_precision: args[8].parse().ok()?,
            y_precision: args[9].parse().ok()?,
            device_id: args[10].parse().ok()?,
            edge_flags: args[11].parse().ok()?,
        })
    }

    fn builder(&self, action: MotionAction) -> MotionEventBuilder {
        MotionEvent::builder(action)
            .down_time(self.down_time)
            .event_time(self.event_time)
            .meta_state(self.meta_state)
            .precision(self.x_precision, self.y_precision)
            .device_id(self.device_id)
            .edge_flags(self.edge_flags)
    }
}

fn recorded_key(args: &[&str]) -> Option<KeyEvent> {
    Some(KeyEvent {
        down_time: Some(args[0].parse().ok()?),
        event_time: Some(args[1].parse().ok()?),
        action: KeyAction::from_raw(args[2].parse().ok()?)?,
        code: args[3].parse().ok()?,
        repeat: args[4].parse().ok()?,
        meta_state: args[5].parse().ok()?,
        device_id: args[6].parse().ok()?,
        scan_code: args[7].parse().ok()?,
    })
}

fn recorded_motion(touch: bool, args: &[&str]) -> Option<Event> {
    let fields = MotionFields::parse(args)?;
    let action = MotionAction::from_raw(fields.action)?;
    let motion = fields
        .builder(action)
        .pointer_with(0, fields.x, fields.y, fields.pressure, fields.size)
        .build()
        .ok()?;
    Some(if touch {
        Event::Touch(motion)
    } else {
        Event::Trackball(motion)
    })
}

fn tap_event(action: MotionAction, down_at: Millis, event_at: Millis, x: f32, y: f32) -> Option<Event> {
    MotionEvent::builder(action)
        .down_time(down_at)
        .event_time(event_at)
        .pointer_with(0, x, y, TAP_PRESSURE, TAP_SIZE)
        .build()
        .ok()
        .map(Event::Touch)
}

fn key_press(code: u32) -> Vec<Event> {
    vec![
        Event::key(KeyAction::Down, code),
        Event::key(KeyAction::Up, code),
    ]
}

fn drag(args: &[&str]) -> Option<Vec<Event>> {
    let x_start: f32 = args[0].parse().ok()?;
    let y_start: f32 = args[1].parse().ok()?;
    let x_end: f32 = args[2].parse().ok()?;
    let y_end: f32 = args[3].parse().ok()?;
    let steps: i32 = args[4].parse().ok()?;

    if steps <= 0 {
        return Some(Vec::new());
    }

    let x_step = (x_end - x_start) / steps as f32;
    let y_step = (y_end - y_start) / steps as f32;
    let (mut x, mut y) = (x_start, y_start);
    let down_at = uptime_millis();

    let mut events = vec![tap_event(MotionAction::Down, down_at, down_at, x, y)?];
    for _ in 0..steps {
        x += x_step;
        y += y_step;
        events.push(tap_event(MotionAction::Move, down_at, uptime_millis(), x, y)?);
    }
    events.push(tap_event(MotionAction::Up, down_at, uptime_millis(), x, y)?);
    Some(events)
}

fn pinch_zoom(args: &[&str]) -> Option<Vec<Event>> {
    let mut coords = [0.0f32; 8];
    for (slot, arg) in coords.iter_mut().zip(args) {
        *slot = arg.parse().ok()?;
    }
    let steps: i32 = args[8].parse().ok()?;

    if steps <= 0 {
        return Some(Vec::new());
    }

    let [x1_start, y1_start, x1_end, y1_end, x2_start, y2_start, x2_end, y2_end] = coords;
    let n = steps as f32;
    let step1 = ((x1_end - x1_start) / n, (y1_end - y1_start) / n);
    let step2 = ((x2_end - x2_start) / n, (y2_end - y2_start) / n);
    let (mut x1, mut y1, mut x2, mut y2) = (x1_start, y1_start, x2_start, y2_start);
    let down_at = uptime_millis();

    let two = |action: MotionAction, event_at: Millis, p1: (f32, f32), p2: (f32, f32), intermediate: bool| {
        MotionEvent::builder(action)
            .down_time(down_at)
            .event_time(event_at)
            .pointer_with(0, p1.0, p1.1, TAP_PRESSURE, TAP_SIZE)
            .pointer_with(1, p2.0, p2.1, TAP_PRESSURE, TAP_SIZE)
            .intermediate(intermediate)
            .build()
            .ok()
            .map(Event::Touch)
    };

    let mut events = vec![
        tap_event(MotionAction::Down, down_at, down_at, x1, y1)?,
        two(MotionAction::PointerDown(1), down_at, (x1, y1), (x2, y2), true)?,
    ];
    for _ in 0..steps {
        x1 += step1.0;
        y1 += step1.1;
        x2 += step2.0;
        y2 += step2.1;
        events.push(two(MotionAction::Move, uptime_millis(), (x1, y1), (x2, y2), false)?);
    }
    events.push(two(MotionAction::PointerUp(1), uptime_millis(), (x1, y1), (x2, y2), false)?);
    events.push(tap_event(MotionAction::Up, down_at, uptime_millis(), x1, y1)?);
    Some(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn script(body: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "type= raw events\ncount= 10\nspeed= 1.0\nstart data >>\n{}", body).unwrap();
        file
    }

    fn source(file: &NamedTempFile) -> ScriptSource {
        ScriptSource::new(file.path(), Pacing::default(), StdRng::seed_from_u64(1))
    }

    async fn drain(source: &mut ScriptSource) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = source.next_event().await {
            events.push(event);
        }
        events
    }

    fn motions(events: &[Event]) -> Vec<&MotionEvent> {
        events.iter().filter_map(Event::as_motion).collect()
    }

    #[test]
    fn test_validate_reads_header() {
        let file = script("Tap(1,2)\n");
        let mut source = source(&file);
        assert!(source.validate());
        assert_eq!(source.header().count, 10);
        assert_eq!(source.header().speed, 1.0);
        assert!(!source.header().line_by_line);
    }

    #[test]
    fn test_validate_rejects_bad_header() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "count= many\nstart data >>\n").unwrap();
        assert!(!source(&file).validate());

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "count= 3\n").unwrap();
        assert!(!source(&file).validate());

        let mut missing = ScriptSource::new(
            "/nonexistent/monkey.script",
            Pacing::default(),
            StdRng::seed_from_u64(1),
        );
        assert!(!missing.validate());
    }

    #[tokio::test]
    async fn test_tap_without_duration() {
        let file = script("Tap(10,20,0)\n");
        let events = drain(&mut source(&file)).await;

        assert!(!events.iter().any(|e| matches!(e, Event::Wait(_))));
        let motions = motions(&events);
        assert_eq!(motions.len(), 2);
        assert_eq!(motions[0].action(), MotionAction::Down);
        assert_eq!(motions[1].action(), MotionAction::Up);
        for motion in motions {
            let p = motion.pointer(0).unwrap();
            assert_eq!((p.x, p.y), (10.0, 20.0));
        }
    }

    #[tokio::test]
    async fn test_tap_with_duration() {
        let file = script("Tap(10,20,300)\n");
        let events = drain(&mut source(&file)).await;

        let kinds: Vec<&Event> = events
            .iter()
            .filter(|e| !matches!(e, Event::Throttle(_)))
            .collect();
        assert_eq!(kinds.len(), 3);
        assert_eq!(kinds[0].as_motion().unwrap().action(), MotionAction::Down);
        assert_eq!(*kinds[1], Event::Wait(300));
        assert_eq!(kinds[2].as_motion().unwrap().action(), MotionAction::Up);
    }

    #[tokio::test]
    async fn test_press_and_hold_emits_release() {
        let file = script("PressAndHold(5,6,50)\n");
        let events = drain(&mut source(&file)).await;
        let motions = motions(&events);
        assert_eq!(motions.len(), 2);
        assert_eq!(motions[1].action(), MotionAction::Up);
        assert!(events.contains(&Event::Wait(50)));
    }

    #[tokio::test]
    async fn test_press_and_hold_saturates_release_time() {
        let file = script(
            "PressAndHold(5,6,9223372036854775807)\n\
             PressAndHold(5,6,9223372036854775808)\n",
        );
        let events = drain(&mut source(&file)).await;
        let motions = motions(&events);
        // The hold that does not fit a timestamp is skipped
        assert_eq!(motions.len(), 2);
        assert_eq!(motions[1].event_time(), Some(Millis::MAX));
        assert!(motions[1].event_time() >= motions[1].down_time());
        assert!(events.contains(&Event::Wait(i64::MAX as u64)));
    }

    #[tokio::test]
    async fn test_drag_with_zero_steps_is_empty() {
        let file = script("Drag(0,0,100,100,0)\n");
        assert!(drain(&mut source(&file)).await.is_empty());
    }

    #[tokio::test]
    async fn test_drag_steps() {
        let file = script("Drag(0,0,100,50,4)\n");
        let events = drain(&mut source(&file)).await;
        let motions = motions(&events);
        assert_eq!(motions.len(), 6);
        let last = motions[5].pointer(0).unwrap();
        assert!((last.x - 100.0).abs() < 0.01 && (last.y - 50.0).abs() < 0.01);
        // One gesture shares one down time
        assert!(motions.iter().all(|m| m.down_time() == motions[0].down_time()));
    }

    #[tokio::test]
    async fn test_pinch_zoom_closes_gesture() {
        let file = script("PinchZoom(100,100,50,50,200,200,250,250,2)\n");
        let events = drain(&mut source(&file)).await;
        let actions: Vec<MotionAction> = motions(&events).iter().map(|m| m.action()).collect();
        assert_eq!(
            actions,
            vec![
                MotionAction::Down,
                MotionAction::PointerDown(1),
                MotionAction::Move,
                MotionAction::Move,
                MotionAction::PointerUp(1),
                MotionAction::Up,
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_directives_skipped() {
        let file = script("Teleport(1,2)\nTap(x,y)\nnot even a directive\nUserWait(25)\n");
        let events = drain(&mut source(&file)).await;
        assert_eq!(events, vec![Event::Wait(25), Event::Throttle(0)]);
    }

    #[tokio::test]
    async fn test_keyword_table() {
        let file = script(
            "DispatchPress(KEYCODE_HOME)\n\
             LongPress()\n\
             RunCmd(ls)\n\
             DispatchString(hello)\n\
             DispatchFlip(true)\n\
             RotateScreen(1,0)\n\
             LaunchActivity(com.example,com.example.Main,500)\n\
             LaunchInstrumentation(test,runner)\n\
             ProfileWait()\n\
             StartCaptureFramerate()\n\
             EndCaptureAppFramerate(app,label)\n",
        );
        let events: Vec<Event> = drain(&mut source(&file).with_waits(1234, 10))
            .await
            .into_iter()
            .filter(|e| !matches!(e, Event::Throttle(_)))
            .collect();

        let keys: Vec<(KeyAction, u32)> = events
            .iter()
            .filter_map(|e| e.as_key().map(|k| (k.action, k.code)))
            .collect();
        assert_eq!(
            keys,
            vec![
                (KeyAction::Down, keycode::KEYCODE_HOME),
                (KeyAction::Up, keycode::KEYCODE_HOME),
                (KeyAction::Down, KEYCODE_DPAD_CENTER),
                (KeyAction::Up, KEYCODE_DPAD_CENTER),
            ]
        );
        assert!(events.contains(&Event::Wait(LONGPRESS_WAIT_MS)));
        assert!(events.contains(&Event::Command("ls".into())));
        assert!(events.contains(&Event::Command("input text hello".into())));
        assert!(events.contains(&Event::KeyboardFlip { open: true }));
        assert!(events.contains(&Event::Rotation {
            rotation: ScreenRotation::Deg90,
            persist: false
        }));
        assert!(events.contains(&Event::AppLaunch {
            component: ComponentName::new("com.example", "com.example.Main"),
            alarm: Some(500)
        }));
        assert!(events.contains(&Event::Instrumentation {
            test: "test".into(),
            runner: "runner".into()
        }));
        assert!(events.contains(&Event::Wait(1234)));
        assert!(events.contains(&Event::FrameRate(FrameRateMarker::Start)));
        assert!(events.contains(&Event::FrameRate(FrameRateMarker::AppEnd {
            app: "app".into(),
            label: "label".into()
        })));
    }

    #[tokio::test]
    async fn test_device_wake_up_sequence() {
        let file = script("DeviceWakeUp()\n");
        let events: Vec<Event> = drain(&mut source(&file).with_waits(0, 100))
            .await
            .into_iter()
            .filter(|e| !matches!(e, Event::Throttle(_)))
            .collect();
        assert_eq!(events.len(), 8);
        assert!(matches!(&events[0], Event::AppLaunch { alarm: Some(100), .. }));
        assert_eq!(events[3], Event::Wait(3100));
        assert_eq!(events[7].as_key().map(|k| k.code), Some(KEYCODE_BACK));
    }

    #[tokio::test]
    async fn test_recorded_keys_keep_cadence() {
        let file = script(
            "DispatchKey(1000,1000,0,4,0,0,0,0)\n\
             DispatchKey(1000,1040,1,4,0,0,0,0)\n",
        );
        let events = drain(&mut source(&file)).await;
        let keys: Vec<&KeyEvent> = events.iter().filter_map(Event::as_key).collect();
        assert_eq!(keys.len(), 2);

        let first_event = keys[0].event_time.unwrap();
        let second_event = keys[1].event_time.unwrap();
        assert_eq!(second_event - first_event, 40);
        // Same recorded press keeps its exported down time
        assert_eq!(keys[1].down_time, keys[0].down_time);
    }

    #[tokio::test]
    async fn test_recorded_key_times_do_not_overflow() {
        let file = script(
            "DispatchKey(1,1,0,4,0,0,0,0)\n\
             DispatchKey(1,-9223372036854775808,1,4,0,0,0,0)\n",
        );
        let events = drain(&mut source(&file)).await;
        let keys: Vec<&KeyEvent> = events.iter().filter_map(Event::as_key).collect();
        assert_eq!(keys.len(), 2);
        assert!(keys[1].event_time.unwrap() < keys[0].event_time.unwrap());
        assert!(keys[1].down_time.unwrap() <= keys[1].event_time.unwrap());
    }

    #[tokio::test]
    async fn test_recorded_motion_restamps_times() {
        let file = script(
            "DispatchPointer(500,500,0,10,20,1,1,0,1,1,0,0)\n\
             DispatchPointer(500,520,1,10,20,1,1,0,1,1,0,0)\n\
             DispatchTrackball(900,900,2,1,1,0,0,0,1,1,0,0)\n",
        );
        let events = drain(&mut source(&file)).await;
        let motions = motions(&events);
        assert_eq!(motions.len(), 3);
        assert_eq!(motions[0].down_time(), motions[1].down_time());
        assert!(matches!(events.last(), Some(Event::Trackball(_))));
        for motion in motions {
            assert!(motion.down_time().unwrap() <= motion.event_time().unwrap());
        }
    }

    #[tokio::test]
    async fn test_multi_pointer_merges_fingers() {
        let file = script(
            "DispatchPointer(100,100,0,10,10,1,1,0,1,1,0,0,0)\n\
             DispatchPointer(100,110,5,40,40,1,1,0,1,1,0,0,1)\n\
             DispatchPointer(100,120,6,12,12,1,1,0,1,1,0,0,0)\n\
             DispatchPointer(100,130,1,12,12,1,1,0,1,1,0,0,7)\n",
        );
        let events = drain(&mut source(&file)).await;
        let motions = motions(&events);
        // The pointer id 7 line is skipped
        assert_eq!(motions.len(), 3);

        assert_eq!(motions[1].action(), MotionAction::PointerDown(1));
        assert_eq!(motions[1].pointer(0).map(|p| (p.x, p.y)), Some((10.0, 10.0)));
        assert_eq!(motions[1].pointer(1).map(|p| (p.x, p.y)), Some((40.0, 40.0)));

        assert_eq!(motions[2].action(), MotionAction::PointerUp(0));
        assert_eq!(motions[2].pointer(1).map(|p| (p.x, p.y)), Some((40.0, 40.0)));
    }

    #[tokio::test]
    async fn test_replay_repeats_after_end_of_stream() {
        let file = script("UserWait(1)\n");
        let mut source = source(&file);
        let first = drain(&mut source).await;
        let second = drain(&mut source).await;
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn test_line_by_line_reads_one_directive() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "linebyline\nstart data >>\nUserWait(1)\nUserWait(2)\n").unwrap();
        let mut source = source(&file);
        assert!(source.validate());
        assert!(source.header().line_by_line);

        assert_eq!(source.next_event().await, Some(Event::Wait(1)));
        assert_eq!(source.queue.len(), 1);
        assert_eq!(source.next_event().await, Some(Event::Throttle(0)));
        assert_eq!(source.next_event().await, Some(Event::Wait(2)));
    }
}
