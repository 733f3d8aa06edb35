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

//! Core event model
//!
//! A closed set of event variants with a small per-kind behaviour table
//! (throttlable, label) instead of a class hierarchy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::clock::Millis;
use crate::errors::EventError;
use crate::keycode::{self, KeyCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Down,
    Up,
}

impl KeyAction {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(KeyAction::Down),
            1 => Some(KeyAction::Up),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            KeyAction::Down => "ACTION_DOWN",
            KeyAction::Up => "ACTION_UP",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyEvent {
    pub action: KeyAction,
    pub code: KeyCode,
    pub repeat: u32,
    pub meta_state: u32,
    pub device_id: i32,
    pub scan_code: u32,
    pub down_time: Option<Millis>,
    pub event_time: Option<Millis>,
}

impl KeyEvent {
    /// A key event stamped by the target at injection time
    pub fn new(action: KeyAction, code: KeyCode) -> Self {
        Self {
            action,
            code,
            repeat: 0,
            meta_state: 0,
            device_id: 0,
            scan_code: 0,
            down_time: None,
            event_time: None,
        }
    }

    pub fn with_meta_state(mut self, meta_state: u32) -> Self {
        self.meta_state = meta_state;
        self
    }
}

/// Pointer action; the pointer variants carry the index of the pointer
/// being added or removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionAction {
    Down,
    Up,
    Move,
    Cancel,
    PointerDown(u32),
    PointerUp(u32),
}

impl MotionAction {
    const MASK: i32 = 0xff;
    const INDEX_SHIFT: i32 = 8;

    /// Decodes a raw action code with the pointer index in bits 8..16
    pub fn from_raw(raw: i32) -> Option<Self> {
        let index = ((raw >> Self::INDEX_SHIFT) & Self::MASK) as u32;
        match raw & Self::MASK {
            0 => Some(MotionAction::Down),
            1 => Some(MotionAction::Up),
            2 => Some(MotionAction::Move),
            3 => Some(MotionAction::Cancel),
            5 => Some(MotionAction::PointerDown(index)),
            6 => Some(MotionAction::PointerUp(index)),
            _ => None,
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            MotionAction::Down => 0,
            MotionAction::Up => 1,
            MotionAction::Move => 2,
            MotionAction::Cancel => 3,
            MotionAction::PointerDown(index) => 5 | ((index as i32) << Self::INDEX_SHIFT),
            MotionAction::PointerUp(index) => 6 | ((index as i32) << Self::INDEX_SHIFT),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MotionAction::Down => "ACTION_DOWN",
            MotionAction::Up => "ACTION_UP",
            MotionAction::Move => "ACTION_MOVE",
            MotionAction::Cancel => "ACTION_CANCEL",
            MotionAction::PointerDown(_) => "ACTION_POINTER_DOWN",
            MotionAction::PointerUp(_) => "ACTION_POINTER_UP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerCoords {
    pub x: f32,
    pub y: f32,
    pub pressure: f32,
    pub size: f32,
}

/// A touch or trackball event. Built through [`MotionEventBuilder`] so the
/// pointer map is never empty and down time never follows event time.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionEvent {
    action: MotionAction,
    down_time: Option<Millis>,
    event_time: Option<Millis>,
    pointers: BTreeMap<u32, PointerCoords>,
    meta_state: u32,
    x_precision: f32,
    y_precision: f32,
    device_id: i32,
    edge_flags: u32,
    intermediate: bool,
}

impl MotionEvent {
    pub fn builder(action: MotionAction) -> MotionEventBuilder {
        MotionEventBuilder {
            action,
            down_time: None,
            event_time: None,
            pointers: Vec::new(),
            meta_state: 0,
            x_precision: 1.0,
            y_precision: 1.0,
            device_id: 0,
            edge_flags: 0,
            intermediate: false,
        }
    }

    pub fn action(&self) -> MotionAction {
        self.action
    }

    pub fn down_time(&self) -> Option<Millis> {
        self.down_time
    }

    pub fn event_time(&self) -> Option<Millis> {
        self.event_time
    }

    pub fn pointers(&self) -> &BTreeMap<u32, PointerCoords> {
        &self.pointers
    }

    pub fn pointer(&self, id: u32) -> Option<&PointerCoords> {
        self.pointers.get(&id)
    }

    pub fn meta_state(&self) -> u32 {
        self.meta_state
    }

    pub fn precision(&self) -> (f32, f32) {
        (self.x_precision, self.y_precision)
    }

    pub fn device_id(&self) -> i32 {
        self.device_id
    }

    pub fn edge_flags(&self) -> u32 {
        self.edge_flags
    }

    /// Intermediate steps of a gesture are only narrated at high verbosity
    pub fn is_intermediate(&self) -> bool {
        self.intermediate
    }

    pub(crate) fn set_times(&mut self, down_time: Millis, event_time: Millis) {
        self.down_time = Some(down_time);
        self.event_time = Some(event_time);
    }
}

#[derive(Debug, Clone)]
pub struct MotionEventBuilder {
    action: MotionAction,
    down_time: Option<Millis>,
    event_time: Option<Millis>,
    pointers: Vec<(u32, PointerCoords)>,
    meta_state: u32,
    x_precision: f32,
    y_precision: f32,
    device_id: i32,
    edge_flags: u32,
    intermediate: bool,
}

impl MotionEventBuilder {
    pub fn down_time(mut self, down_time: Millis) -> Self {
        self.down_time = Some(down_time);
        self
    }

    pub fn event_time(mut self, event_time: Millis) -> Self {
        self.event_time = Some(event_time);
        self
    }

    /// Adds a pointer with zero pressure and size
    pub fn pointer(self, id: u32, x: f32, y: f32) -> Self {
        self.pointer_with(id, x, y, 0.0, 0.0)
    }

    pub fn pointer_with(mut self, id: u32, x: f32, y: f32, pressure: f32, size: f32) -> Self {
        self.pointers.push((
            id,
            PointerCoords {
                x,
                y,
                pressure,
                size,
            },
        ));
        self
    }

    pub fn meta_state(mut self, meta_state: u32) -> Self {
        self.meta_state = meta_state;
        self
    }

    pub fn precision(mut self, x_precision: f32, y_precision: f32) -> Self {
        self.x_precision = x_precision;
        self.y_precision = y_precision;
        self
    }

    pub fn device_id(mut self, device_id: i32) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn edge_flags(mut self, edge_flags: u32) -> Self {
        self.edge_flags = edge_flags;
        self
    }

    pub fn intermediate(mut self, intermediate: bool) -> Self {
        self.intermediate = intermediate;
        self
    }

    pub fn build(self) -> Result<MotionEvent, EventError> {
        if self.pointers.is_empty() {
            return Err(EventError::NoPointers);
        }
        if let (Some(down), Some(event)) = (self.down_time, self.event_time) {
            if down > event {
                return Err(EventError::DownAfterEvent { down, event });
            }
        }

        let mut pointers = BTreeMap::new();
        for (id, coords) in self.pointers {
            if pointers.insert(id, coords).is_some() {
                return Err(EventError::DuplicatePointer(id));
            }
        }

        Ok(MotionEvent {
            action: self.action,
            down_time: self.down_time,
            event_time: self.event_time,
            pointers,
            meta_state: self.meta_state,
            x_precision: self.x_precision,
            y_precision: self.y_precision,
            device_id: self.device_id,
            edge_flags: self.edge_flags,
            intermediate: self.intermediate,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenRotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl ScreenRotation {
    pub const ALL: [ScreenRotation; 4] = [
        ScreenRotation::Deg0,
        ScreenRotation::Deg90,
        ScreenRotation::Deg180,
        ScreenRotation::Deg270,
    ];

    /// Surface rotation constant: 0..=3 for 0, 90, 180 and 270 degrees
    pub fn from_raw(raw: i32) -> Option<Self> {
        usize::try_from(raw)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
    }

    pub fn degrees(self) -> u32 {
        match self {
            ScreenRotation::Deg0 => 0,
            ScreenRotation::Deg90 => 90,
            ScreenRotation::Deg180 => 180,
            ScreenRotation::Deg270 => 270,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct ComponentName {
    pub package: String,
    pub class: String,
}

impl ComponentName {
    pub fn new(package: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            class: class.into(),
        }
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.class)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRateMarker {
    Start,
    End { label: String },
    AppStart { app: String },
    AppEnd { app: String, label: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Key(KeyEvent),
    Touch(MotionEvent),
    Trackball(MotionEvent),
    Rotation {
        rotation: ScreenRotation,
        persist: bool,
    },
    AppLaunch {
        component: ComponentName,
        alarm: Option<Millis>,
    },
    KeyboardFlip {
        open: bool,
    },
    /// Pacing inserted by the event queue
    Throttle(u64),
    /// Explicit pause requested by a script or gesture
    Wait(u64),
    Permission {
        package: String,
        permission: String,
    },
    Command(String),
    Instrumentation {
        test: String,
        runner: String,
    },
    Noop,
    FrameRate(FrameRateMarker),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Key,
    Touch,
    Trackball,
    Rotation,
    AppLaunch,
    KeyboardFlip,
    Throttle,
    Wait,
    Permission,
    Command,
    Instrumentation,
    Noop,
    FrameRate,
}

impl EventKind {
    pub fn label(self) -> &'static str {
        match self {
            EventKind::Key => "Key",
            EventKind::Touch => "Touch",
            EventKind::Trackball => "Trackball",
            EventKind::Rotation => "Rotation",
            EventKind::AppLaunch => "AppLaunch",
            EventKind::KeyboardFlip => "Flip",
            EventKind::Throttle => "Throttle",
            EventKind::Wait => "Wait",
            EventKind::Permission => "Permission",
            EventKind::Command => "Command",
            EventKind::Instrumentation => "Instrumentation",
            EventKind::Noop => "Noop",
            EventKind::FrameRate => "FrameRate",
        }
    }
}

impl Event {
    pub fn key(action: KeyAction, code: KeyCode) -> Self {
        Event::Key(KeyEvent::new(action, code))
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::Key(_) => EventKind::Key,
            Event::Touch(_) => EventKind::Touch,
            Event::Trackball(_) => EventKind::Trackball,
            Event::Rotation { .. } => EventKind::Rotation,
            Event::AppLaunch { .. } => EventKind::AppLaunch,
            Event::KeyboardFlip { .. } => EventKind::KeyboardFlip,
            Event::Throttle(_) => EventKind::Throttle,
            Event::Wait(_) => EventKind::Wait,
            Event::Permission { .. } => EventKind::Permission,
            Event::Command(_) => EventKind::Command,
            Event::Instrumentation { .. } => EventKind::Instrumentation,
            Event::Noop => EventKind::Noop,
            Event::FrameRate(_) => EventKind::FrameRate,
        }
    }

    /// Whether the queue should pace the stream after this event. Only the
    /// release half of a key press or gesture is paced; pacing events are
    /// never paced themselves.
    pub fn is_throttlable(&self) -> bool {
        match self {
            Event::Key(key) => key.action == KeyAction::Up,
            Event::Touch(motion) | Event::Trackball(motion) => {
                motion.action() == MotionAction::Up
            }
            Event::Throttle(_) => false,
            _ => true,
        }
    }

    /// Intermediate gesture steps are narrated only at high verbosity
    pub fn is_intermediate(&self) -> bool {
        match self {
            Event::Touch(motion) | Event::Trackball(motion) => motion.is_intermediate(),
            Event::Throttle(_) | Event::Wait(_) => true,
            _ => false,
        }
    }

    pub fn as_motion(&self) -> Option<&MotionEvent> {
        match self {
            Event::Touch(motion) | Event::Trackball(motion) => Some(motion),
            _ => None,
        }
    }

    pub fn as_key(&self) -> Option<&KeyEvent> {
        match self {
            Event::Key(key) => Some(key),
            _ => None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self.kind().label();
        match self {
            Event::Key(key) => {
                let name = keycode::key_name(key.code).unwrap_or_else(|| "Unknown key".into());
                write!(
                    f,
                    ":Sending {} ({}): {}    // {}",
                    label,
                    key.action.label(),
                    key.code,
                    name
                )
            }
            Event::Touch(motion) | Event::Trackball(motion) => {
                write!(f, ":Sending {} ({}", label, motion.action().label())?;
                if let MotionAction::PointerDown(index) | MotionAction::PointerUp(index) =
                    motion.action()
                {
                    write!(f, " {}", index)?;
                }
                write!(f, "):")?;
                for (id, coords) in motion.pointers() {
                    write!(f, " {}:({:.1},{:.1})", id, coords.x, coords.y)?;
                }
                Ok(())
            }
            Event::Rotation { rotation, persist } => write!(
                f,
                ":Sending {} degree={}, persist={}",
                label,
                rotation.degrees(),
                persist
            ),
            Event::AppLaunch { component, alarm } => match alarm {
                Some(alarm) => write!(f, ":Switch: {} (alarm {}ms)", component, alarm),
                None => write!(f, ":Switch: {}", component),
            },
            Event::KeyboardFlip { open } => write!(
                f,
                ":Sending {} keyboardOpen={}",
                label, open
            ),
            Event::Throttle(ms) => write!(f, "Sleeping for {} milliseconds", ms),
            Event::Wait(ms) => write!(f, "Wait Event for {} milliseconds", ms),
            Event::Permission {
                package,
                permission,
            } => write!(f, ":Permission toggle {} {}", package, permission),
            Event::Command(cmd) => write!(f, ":Running command: {}", cmd),
            Event::Instrumentation { test, runner } => {
                write!(f, ":Instrumenting {} with {}", test, runner)
            }
            Event::Noop => write!(f, ":Noop"),
            Event::FrameRate(marker) => write!(f, ":FrameRate {:?}", marker),
        }
    }
}

/// Result of handing one event to the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectOutcome {
    Success,
    /// This event was rejected; the run continues
    Fail,
    /// The injection transport itself is broken
    FatalTransport,
    /// The target refused injection on permission grounds
    FatalPermission,
}

/// Throttle configuration carried by every event queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    // Fixed pause after each throttlable event, in milliseconds
    pub throttle_ms: u64,
    // Draw each pause uniformly from [1, throttle_ms] instead
    pub randomize: bool,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            throttle_ms: 0,
            randomize: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motion_action_raw_round_trip() {
        assert_eq!(MotionAction::from_raw(0), Some(MotionAction::Down));
        assert_eq!(MotionAction::from_raw(0x105), Some(MotionAction::PointerDown(1)));
        assert_eq!(MotionAction::PointerUp(1).to_raw(), 0x106);
        assert_eq!(MotionAction::from_raw(4), None);
    }

    #[test]
    fn test_builder_rejects_empty_pointer_map() {
        let result = MotionEvent::builder(MotionAction::Down).build();
        assert_eq!(result, Err(EventError::NoPointers));
    }

    #[test]
    fn test_builder_rejects_down_after_event() {
        let result = MotionEvent::builder(MotionAction::Down)
            .down_time(20)
            .event_time(10)
            .pointer(0, 1.0, 1.0)
            .build();
        assert_eq!(result, Err(EventError::DownAfterEvent { down: 20, event: 10 }));
    }

    #[test]
    fn test_builder_rejects_duplicate_pointer() {
        let result = MotionEvent::builder(MotionAction::Move)
            .pointer(0, 1.0, 1.0)
            .pointer(0, 2.0, 2.0)
            .build();
        assert_eq!(result, Err(EventError::DuplicatePointer(0)));
    }

    #[test]
    fn test_pointer_map_is_ordered() {
        let motion = MotionEvent::builder(MotionAction::PointerDown(1))
            .pointer(1, 5.0, 6.0)
            .pointer(0, 1.0, 2.0)
            .build()
            .unwrap();
        let ids: Vec<u32> = motion.pointers().keys().copied().collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn test_throttlable_table() {
        assert!(!Event::key(KeyAction::Down, 3).is_throttlable());
        assert!(Event::key(KeyAction::Up, 3).is_throttlable());

        let down = MotionEvent::builder(MotionAction::Down)
            .pointer(0, 0.0, 0.0)
            .build()
            .unwrap();
        let up = MotionEvent::builder(MotionAction::Up)
            .pointer(0, 0.0, 0.0)
            .build()
            .unwrap();
        assert!(!Event::Touch(down).is_throttlable());
        assert!(Event::Trackball(up).is_throttlable());

        assert!(!Event::Throttle(10).is_throttlable());
        assert!(Event::Wait(10).is_throttlable());
        assert!(Event::KeyboardFlip { open: true }.is_throttlable());
    }

    #[test]
    fn test_display_touch() {
        let motion = MotionEvent::builder(MotionAction::Down)
            .pointer(0, 10.0, 20.0)
            .build()
            .unwrap();
        assert_eq!(
            Event::Touch(motion).to_string(),
            ":Sending Touch (ACTION_DOWN): 0:(10.0,20.0)"
        );
    }
}
