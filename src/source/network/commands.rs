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

//! Protocol command table
//!
//! Each command turns one split line into a response and, for input
//! commands, events on the side queue. The server drains that queue before
//! it reads the next line.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use super::vars::{self, VarTable};
use super::views::{self, ViewHierarchy};
use crate::inject::DeviceControl;
use crate::keycode::{self, KEYCODE_SHIFT_LEFT, KeyCode, META_SHIFT_LEFT};
use crate::types::{Event, KeyAction, KeyEvent, MotionAction, MotionEvent};

const INVALID_ARGUMENT: &str = "Invalid Argument";
const SCREEN_CHANGE: &str = "screenchange";

/// Outcome of one command, written as `OK[:msg]` or `ERROR[:msg]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReturn {
    Ok(Option<String>),
    Error(Option<String>),
}

impl CommandReturn {
    pub fn ok() -> Self {
        CommandReturn::Ok(None)
    }

    pub fn ok_with(message: impl Into<String>) -> Self {
        CommandReturn::Ok(Some(message.into()))
    }

    pub fn error() -> Self {
        CommandReturn::Error(None)
    }

    pub fn error_with(message: impl Into<String>) -> Self {
        CommandReturn::Error(Some(message.into()))
    }

    pub fn invalid_argument() -> Self {
        Self::error_with(INVALID_ARGUMENT)
    }

    pub fn from_success(success: bool) -> Self {
        if success { Self::ok() } else { Self::error() }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, CommandReturn::Ok(_))
    }
}

impl fmt::Display for CommandReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandReturn::Ok(None) => write!(f, "OK"),
            CommandReturn::Ok(Some(message)) => write!(f, "OK:{}", message),
            CommandReturn::Error(None) => write!(f, "ERROR"),
            CommandReturn::Error(Some(message)) => write!(f, "ERROR:{}", message),
        }
    }
}

/// What a command may touch while it runs
pub struct CommandContext<'a> {
    pub queue: &'a mut VecDeque<Event>,
    pub device: &'a mut dyn DeviceControl,
    pub views: &'a mut dyn ViewHierarchy,
    pub vars: &'a VarTable,
}

pub type Handler = fn(&[String], &mut CommandContext<'_>) -> CommandReturn;

/// A response held back until the screen changes or the timeout passes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deferred {
    pub timeout: Duration,
    pub outcome: CommandReturn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Reply(CommandReturn),
    Defer(Deferred),
    /// Blank line or unknown command, nothing to answer
    Ignored,
}

pub fn lookup(name: &str) -> Option<Handler> {
    let handler: Handler = match name {
        "flip" => flip,
        "touch" => touch,
        "trackball" => trackball,
        "key" => key,
        "sleep" => sleep,
        "wake" => wake,
        "tap" => tap,
        "press" => press,
        "type" => type_text,
        "listvar" => vars::list_vars,
        "getvar" => vars::get_var,
        "listviews" => views::list_views,
        "queryview" => views::query_view,
        "getrootview" => views::get_root_view,
        "getviewswithtext" => views::get_views_with_text,
        _ => return None,
    };
    Some(handler)
}

/// Runs one split command line
pub fn dispatch(parts: &[String], ctx: &mut CommandContext<'_>) -> Dispatch {
    let Some(name) = parts.first() else {
        return Dispatch::Ignored;
    };
    if name == "deferreturn" {
        return defer_return(parts, ctx);
    }
    match lookup(name) {
        Some(handler) => Dispatch::Reply(handler(parts, ctx)),
        None => {
            debug!("Unknown command: {}", name);
            Dispatch::Ignored
        }
    }
}

/// `deferreturn screenchange <timeout-ms> <command...>`
fn defer_return(parts: &[String], ctx: &mut CommandContext<'_>) -> Dispatch {
    if parts.len() <= 3 || parts[1] != SCREEN_CHANGE {
        return Dispatch::Reply(CommandReturn::invalid_argument());
    }
    let Ok(timeout_ms) = parts[2].parse::<u64>() else {
        return Dispatch::Reply(CommandReturn::invalid_argument());
    };
    let Some(handler) = lookup(&parts[3]) else {
        return Dispatch::Reply(CommandReturn::invalid_argument());
    };

    let outcome = handler(&parts[3..], ctx);
    Dispatch::Defer(Deferred {
        timeout: Duration::from_millis(timeout_ms),
        outcome,
    })
}

fn parse_point(x: &str, y: &str) -> Option<(f32, f32)> {
    let x: i32 = x.parse().ok()?;
    let y: i32 = y.parse().ok()?;
    Some((x as f32, y as f32))
}

fn motion(action: MotionAction, (x, y): (f32, f32)) -> Option<MotionEvent> {
    MotionEvent::builder(action).pointer(0, x, y).build().ok()
}

/// `flip open|close`
fn flip(command: &[String], ctx: &mut CommandContext<'_>) -> CommandReturn {
    let open = match command.get(1).map(String::as_str) {
        Some("open") => true,
        Some("close") => false,
        _ => return CommandReturn::invalid_argument(),
    };
    ctx.queue.push_back(Event::KeyboardFlip { open });
    CommandReturn::ok()
}

/// `touch down|up|move <x> <y>`
fn touch(command: &[String], ctx: &mut CommandContext<'_>) -> CommandReturn {
    let [_, action, x, y] = command else {
        return CommandReturn::invalid_argument();
    };
    let Some(point) = parse_point(x, y) else {
        return CommandReturn::invalid_argument();
    };
    let action = match action.as_str() {
        "down" => MotionAction::Down,
        "up" => MotionAction::Up,
        "move" => MotionAction::Move,
        _ => return CommandReturn::invalid_argument(),
    };
    match motion(action, point) {
        Some(event) => {
            ctx.queue.push_back(Event::Touch(event));
            CommandReturn::ok()
        }
        None => CommandReturn::error(),
    }
}

/// `trackball <dx> <dy>`
fn trackball(command: &[String], ctx: &mut CommandContext<'_>) -> CommandReturn {
    let [_, dx, dy] = command else {
        return CommandReturn::invalid_argument();
    };
    let Some(delta) = parse_point(dx, dy) else {
        return CommandReturn::invalid_argument();
    };
    match motion(MotionAction::Move, delta) {
        Some(event) => {
            ctx.queue.push_back(Event::Trackball(event));
            CommandReturn::ok()
        }
        None => CommandReturn::error(),
    }
}

/// `key down|up <key>`
fn key(command: &[String], ctx: &mut CommandContext<'_>) -> CommandReturn {
    let [_, action, name] = command else {
        return CommandReturn::invalid_argument();
    };
    let Some(code) = keycode::resolve_key(name) else {
        return CommandReturn::invalid_argument();
    };
    let action = match action.as_str() {
        "down" => KeyAction::Down,
        "up" => KeyAction::Up,
        _ => return CommandReturn::invalid_argument(),
    };
    ctx.queue.push_back(Event::key(action, code));
    CommandReturn::ok()
}

/// `sleep <ms>`
fn sleep(command: &[String], ctx: &mut CommandContext<'_>) -> CommandReturn {
    let [_, millis] = command else {
        return CommandReturn::invalid_argument();
    };
    let Ok(millis) = millis.parse::<u64>() else {
        return CommandReturn::invalid_argument();
    };
    ctx.queue.push_back(Event::Throttle(millis));
    CommandReturn::ok()
}

/// `wake`
fn wake(_command: &[String], ctx: &mut CommandContext<'_>) -> CommandReturn {
    CommandReturn::from_success(ctx.device.wake())
}

/// `tap <x> <y>`
fn tap(command: &[String], ctx: &mut CommandContext<'_>) -> CommandReturn {
    let [_, x, y] = command else {
        return CommandReturn::invalid_argument();
    };
    let Some(point) = parse_point(x, y) else {
        return CommandReturn::invalid_argument();
    };
    let (Some(down), Some(up)) = (motion(MotionAction::Down, point), motion(MotionAction::Up, point))
    else {
        return CommandReturn::error();
    };
    ctx.queue.push_back(Event::Touch(down));
    ctx.queue.push_back(Event::Touch(up));
    CommandReturn::ok()
}

/// `press <key>`
fn press(command: &[String], ctx: &mut CommandContext<'_>) -> CommandReturn {
    let [_, name] = command else {
        return CommandReturn::invalid_argument();
    };
    let Some(code) = keycode::resolve_key(name) else {
        return CommandReturn::invalid_argument();
    };
    ctx.queue.push_back(Event::key(KeyAction::Down, code));
    ctx.queue.push_back(Event::key(KeyAction::Up, code));
    CommandReturn::ok()
}

fn shifted_key(action: KeyAction, code: KeyCode) -> Event {
    Event::Key(KeyEvent::new(action, code).with_meta_state(META_SHIFT_LEFT))
}

/// `type <text>`; quote the text to include spaces
fn type_text(command: &[String], ctx: &mut CommandContext<'_>) -> CommandReturn {
    let [_, text] = command else {
        return CommandReturn::invalid_argument();
    };
    let Some(strokes) = text
        .chars()
        .map(keycode::char_to_stroke)
        .collect::<Option<Vec<_>>>()
    else {
        return CommandReturn::invalid_argument();
    };

    for stroke in strokes {
        if stroke.shift {
            ctx.queue.push_back(Event::key(KeyAction::Down, KEYCODE_SHIFT_LEFT));
            ctx.queue.push_back(shifted_key(KeyAction::Down, stroke.code));
            ctx.queue.push_back(shifted_key(KeyAction::Up, stroke.code));
            ctx.queue.push_back(Event::key(KeyAction::Up, KEYCODE_SHIFT_LEFT));
        } else {
            ctx.queue.push_back(Event::key(KeyAction::Down, stroke.code));
            ctx.queue.push_back(Event::key(KeyAction::Up, stroke.code));
        }
    }
    CommandReturn::ok()
}
