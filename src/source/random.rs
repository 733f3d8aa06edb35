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

//! Weighted random event synthesis
//!
//! Category percentages are normalized into a cumulative table once at
//! validation; each refill draws one uniform float against that table and
//! expands the chosen category into one or more queued events.

use rand::Rng;
use rand::rngs::StdRng;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

use crate::clock::uptime_millis;
use crate::keycode::{
    KEYCODE_ENDCALL, KEYCODE_POWER, KEYCODE_SLEEP, KEYCODE_SOFT_SLEEP, KeyCode, KeyPresence,
    MAJOR_NAV_KEYS, MAX_KEYCODE, NAV_KEYS, SYS_KEYS,
};
use crate::queue::EventQueue;
use crate::source::EventSource;
use crate::types::{
    ComponentName, Event, KeyAction, MotionAction, MotionEvent, Pacing, ScreenRotation,
};

pub const FACTOR_COUNT: usize = 12;

// Draws for a key category before giving up on this refill
const MAX_KEY_ATTEMPTS: usize = 1000;

// Empty refills in a row before handing the driver a no-op
const MAX_EMPTY_REFILLS: usize = 100;

/// Event categories, in cumulative-table order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Touch,
    Motion,
    PinchZoom,
    Trackball,
    Rotation,
    Permission,
    Nav,
    MajorNav,
    SysKeys,
    AppSwitch,
    Flip,
    AnyEvent,
}

impl Category {
    pub const ALL: [Category; FACTOR_COUNT] = [
        Category::Touch,
        Category::Motion,
        Category::PinchZoom,
        Category::Trackball,
        Category::Rotation,
        Category::Permission,
        Category::Nav,
        Category::MajorNav,
        Category::SysKeys,
        Category::AppSwitch,
        Category::Flip,
        Category::AnyEvent,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Category::Touch => "touch",
            Category::Motion => "motion",
            Category::PinchZoom => "pinchzoom",
            Category::Trackball => "trackball",
            Category::Rotation => "rotation",
            Category::Permission => "permission",
            Category::Nav => "nav",
            Category::MajorNav => "majornav",
            Category::SysKeys => "syskeys",
            Category::AppSwitch => "appswitch",
            Category::Flip => "flip",
            Category::AnyEvent => "anyevent",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    pub fn default_percent(self) -> f32 {
        match self {
            Category::Touch => 15.0,
            Category::Motion => 10.0,
            Category::PinchZoom => 2.0,
            Category::Trackball => 15.0,
            Category::Rotation => 0.0,
            Category::Permission => 0.0,
            Category::Nav => 25.0,
            Category::MajorNav => 15.0,
            Category::SysKeys => 2.0,
            Category::AppSwitch => 2.0,
            Category::Flip => 1.0,
            Category::AnyEvent => 13.0,
        }
    }
}

/// Raw category weights. A user override is stored negated so it can be
/// told apart from a default; a zero counts as user-set.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorTable {
    factors: [f32; FACTOR_COUNT],
}

impl Default for FactorTable {
    fn default() -> Self {
        Self {
            factors: Category::ALL.map(Category::default_percent),
        }
    }
}

impl FactorTable {
    pub fn set_user(&mut self, category: Category, percent: f32) {
        self.factors[category.index()] = -percent;
    }

    pub fn raw(&self, category: Category) -> f32 {
        self.factors[category.index()]
    }

    /// Scales the defaults to fill what the user left of 100%. Returns
    /// positive percentages, or `None` if the overrides cannot be honoured.
    pub fn normalize(&self) -> Option<[f32; FACTOR_COUNT]> {
        let mut user_sum = 0.0f32;
        let mut default_sum = 0.0f32;
        let mut default_count = 0;

        for factor in self.factors {
            if factor <= 0.0 {
                user_sum -= factor;
            } else {
                default_sum += factor;
                default_count += 1;
            }
        }

        if user_sum > 100.0 {
            error!("** Event weights > 100%");
            return None;
        }
        if default_count == 0 && !(99.9..=100.1).contains(&user_sum) {
            error!("** Event weights != 100%");
            return None;
        }

        let adjustment = (100.0 - user_sum) / default_sum;
        Some(self.factors.map(|factor| {
            if factor <= 0.0 {
                -factor
            } else {
                factor * adjustment
            }
        }))
    }
}

/// Converts percentages into ascending cut points ending at 1.0
pub fn cumulative(percentages: &[f32; FACTOR_COUNT]) -> [f32; FACTOR_COUNT] {
    let mut sum = 0.0f32;
    (*percentages).map(|percent| {
        sum += percent / 100.0;
        sum
    })
}

fn validate_key_category(
    name: &str,
    keys: &[KeyCode],
    percent: f32,
    keys_present: &KeyPresence,
) -> bool {
    if percent < 0.1 || keys_present.any_exists(keys) {
        return true;
    }
    error!("** {} has no physical keys but with factor {}%.", name, percent);
    false
}

/// Runtime permissions that may be toggled, keyed by package
#[derive(Debug, Clone, Default)]
pub struct PermissionCatalog {
    declared: BTreeMap<String, Vec<String>>,
    targeted: Vec<(String, Vec<String>)>,
}

impl PermissionCatalog {
    pub fn new(declared: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            declared,
            targeted: Vec::new(),
        }
    }

    /// Selects the packages that have at least one permission to toggle
    pub fn populate(&mut self) -> bool {
        self.targeted = self
            .declared
            .iter()
            .filter(|(_, permissions)| !permissions.is_empty())
            .map(|(package, permissions)| (package.clone(), permissions.clone()))
            .collect();

        if self.targeted.is_empty() {
            error!("** No packages with toggleable permissions");
            return false;
        }
        true
    }

    pub fn dump(&self) {
        info!("// Targeted packages and permissions:");
        for (package, permissions) in &self.targeted {
            info!("//  + Using {}", package);
            for permission in permissions {
                let short = permission
                    .strip_prefix("android.permission.")
                    .unwrap_or(permission);
                info!("//    Permission: {}", short);
            }
        }
    }

    fn pick(&self, rng: &mut StdRng) -> Option<Event> {
        if self.targeted.is_empty() {
            return None;
        }
        let (package, permissions) = &self.targeted[rng.random_range(0..self.targeted.len())];
        let permission = &permissions[rng.random_range(0..permissions.len())];
        Some(Event::Permission {
            package: package.clone(),
            permission: permission.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Gesture {
    Tap,
    Drag,
    PinchOrZoom,
}

#[derive(Debug, Clone, Copy)]
struct Point {
    x: f32,
    y: f32,
}

#[derive(Debug)]
pub struct RandomSource {
    factors: FactorTable,
    thresholds: [f32; FACTOR_COUNT],
    apps: Vec<ComponentName>,
    queue: EventQueue,
    keys_present: KeyPresence,
    width: u32,
    height: u32,
    permissions: PermissionCatalog,
    keyboard_open: bool,
    verbosity: u8,
    event_count: u64,
}

impl RandomSource {
    pub fn new(apps: Vec<ComponentName>, pacing: Pacing, rng: StdRng) -> Self {
        Self {
            factors: FactorTable::default(),
            thresholds: [0.0; FACTOR_COUNT],
            apps,
            queue: EventQueue::new(pacing, rng),
            keys_present: KeyPresence::default(),
            width: 1080,
            height: 1920,
            permissions: PermissionCatalog::default(),
            keyboard_open: false,
            verbosity: 0,
            event_count: 0,
        }
    }

    pub fn with_display(mut self, width: u32, height: u32) -> Self {
        self.width = width.max(1);
        self.height = height.max(1);
        self
    }

    pub fn with_keys(mut self, keys_present: KeyPresence) -> Self {
        self.keys_present = keys_present;
        self
    }

    pub fn with_permissions(mut self, permissions: PermissionCatalog) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn set_factor(&mut self, category: Category, percent: f32) {
        self.factors.set_user(category, percent);
    }

    pub fn thresholds(&self) -> &[f32; FACTOR_COUNT] {
        &self.thresholds
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    /// Queues a launch of a random app, used to start a run in a known app
    pub fn generate_activity(&mut self) {
        if self.apps.is_empty() {
            return;
        }
        let index = self.queue.rng().random_range(0..self.apps.len());
        let component = self.apps[index].clone();
        self.queue.push_back(Event::AppLaunch {
            component,
            alarm: None,
        });
    }

    fn adjust_event_factors(&mut self) -> bool {
        let Some(percentages) = self.factors.normalize() else {
            return false;
        };

        if self.verbosity > 0 {
            info!("// Event percentages:");
            for (i, percent) in percentages.iter().enumerate() {
                info!("//   {}: {}%", i, percent);
            }
        }

        let keys_ok = validate_key_category(
            "NAV_KEYS",
            &NAV_KEYS,
            percentages[Category::Nav.index()],
            &self.keys_present,
        ) && validate_key_category(
            "MAJOR_NAV_KEYS",
            &MAJOR_NAV_KEYS,
            percentages[Category::MajorNav.index()],
            &self.keys_present,
        ) && validate_key_category(
            "SYS_KEYS",
            &SYS_KEYS,
            percentages[Category::SysKeys.index()],
            &self.keys_present,
        );
        if !keys_ok {
            return false;
        }

        self.thresholds = cumulative(&percentages);
        true
    }

    fn threshold(&self, category: Category) -> f32 {
        self.thresholds[category.index()]
    }

    fn random_point(&mut self) -> Point {
        let (width, height) = (self.width, self.height);
        let rng = self.queue.rng();
        Point {
            x: rng.random_range(0..width) as f32,
            y: rng.random_range(0..height) as f32,
        }
    }

    fn random_vector(&mut self) -> Point {
        let rng = self.queue.rng();
        Point {
            x: (rng.random::<f32>() - 0.5) * 50.0,
            y: (rng.random::<f32>() - 0.5) * 50.0,
        }
    }

    fn random_walk(&mut self, point: &mut Point, vector: Point) {
        let (width, height) = (self.width as f32, self.height as f32);
        let rng = self.queue.rng();
        point.x = (point.x + rng.random::<f32>() * vector.x).clamp(0.0, width);
        point.y = (point.y + rng.random::<f32>() * vector.y).clamp(0.0, height);
    }

    fn touch(
        action: MotionAction,
        down_at: i64,
        pointers: &[Point],
        intermediate: bool,
    ) -> Option<Event> {
        let builder = pointers
            .iter()
            .enumerate()
            .fold(MotionEvent::builder(action), |builder, (id, p)| {
                builder.pointer(id as u32, p.x, p.y)
            });
        builder
            .down_time(down_at)
            .intermediate(intermediate)
            .build()
            .ok()
            .map(Event::Touch)
    }

    fn generate_pointer_events(&mut self, gesture: Gesture) {
        let mut p1 = self.random_point();
        let v1 = self.random_vector();
        let down_at = uptime_millis();
        let mut events = Vec::new();

        events.extend(Self::touch(MotionAction::Down, down_at, &[p1], false));

        match gesture {
            Gesture::Tap => {}
            Gesture::Drag => {
                let count = self.queue.rng().random_range(0..10);
                for _ in 0..count {
                    self.random_walk(&mut p1, v1);
                    events.extend(Self::touch(MotionAction::Move, down_at, &[p1], true));
                }
            }
            Gesture::PinchOrZoom => {
                let mut p2 = self.random_point();
                let v2 = self.random_vector();

                self.random_walk(&mut p1, v1);
                events.extend(Self::touch(
                    MotionAction::PointerDown(1),
                    down_at,
                    &[p1, p2],
                    true,
                ));

                let count = self.queue.rng().random_range(0..10);
                for _ in 0..count {
                    self.random_walk(&mut p1, v1);
                    self.random_walk(&mut p2, v2);
                    events.extend(Self::touch(MotionAction::Move, down_at, &[p1, p2], true));
                }

                self.random_walk(&mut p1, v1);
                self.random_walk(&mut p2, v2);
                events.extend(Self::touch(
                    MotionAction::PointerUp(1),
                    down_at,
                    &[p1, p2],
                    true,
                ));
            }
        }

        self.random_walk(&mut p1, v1);
        events.extend(Self::touch(MotionAction::Up, down_at, &[p1], false));

        for event in events {
            self.queue.push_back(event);
        }
    }

    fn generate_trackball_events(&mut self) {
        let mut events = Vec::new();
        for i in 0..10 {
            let rng = self.queue.rng();
            let dx = rng.random_range(0..10) as f32 - 5.0;
            let dy = rng.random_range(0..10) as f32 - 5.0;
            let motion = MotionEvent::builder(MotionAction::Move)
                .pointer(0, dx, dy)
                .intermediate(i > 0)
                .build();
            events.extend(motion.ok().map(Event::Trackball));
        }

        if self.queue.rng().random_range(0..10) == 0 {
            let down_at = uptime_millis();
            for (action, intermediate) in [(MotionAction::Down, true), (MotionAction::Up, false)] {
                let motion = MotionEvent::builder(action)
                    .down_time(down_at)
                    .pointer(0, 0.0, 0.0)
                    .intermediate(intermediate)
                    .build();
                events.extend(motion.ok().map(Event::Trackball));
            }
        }

        for event in events {
            self.queue.push_back(event);
        }
    }

    fn generate_rotation_event(&mut self) {
        let rng = self.queue.rng();
        let rotation = ScreenRotation::ALL[rng.random_range(0..ScreenRotation::ALL.len())];
        let persist = rng.random::<bool>();
        self.queue.push_back(Event::Rotation { rotation, persist });
    }

    fn pick_key(&mut self, draw: f32) -> Option<KeyCode> {
        for _ in 0..MAX_KEY_ATTEMPTS {
            let pool: &[KeyCode] = if draw < self.threshold(Category::Nav) {
                &NAV_KEYS
            } else if draw < self.threshold(Category::MajorNav) {
                &MAJOR_NAV_KEYS
            } else {
                &SYS_KEYS
            };

            let key = if draw < self.threshold(Category::SysKeys) {
                pool[self.queue.rng().random_range(0..pool.len())]
            } else {
                1 + self.queue.rng().random_range(0..MAX_KEYCODE - 1)
            };

            let fatal = [KEYCODE_POWER, KEYCODE_ENDCALL, KEYCODE_SLEEP, KEYCODE_SOFT_SLEEP];
            if !fatal.contains(&key) && self.keys_present.exists(key) {
                return Some(key);
            }
        }
        warn!(
            "No usable key found after {} attempts (draw {})",
            MAX_KEY_ATTEMPTS, draw
        );
        None
    }

    fn generate_events(&mut self) {
        let draw: f32 = self.queue.rng().random();

        if draw < self.threshold(Category::Touch) {
            self.generate_pointer_events(Gesture::Tap);
        } else if draw < self.threshold(Category::Motion) {
            self.generate_pointer_events(Gesture::Drag);
        } else if draw < self.threshold(Category::PinchZoom) {
            self.generate_pointer_events(Gesture::PinchOrZoom);
        } else if draw < self.threshold(Category::Trackball) {
            self.generate_trackball_events();
        } else if draw < self.threshold(Category::Rotation) {
            self.generate_rotation_event();
        } else if draw < self.threshold(Category::Permission) {
            if let Some(event) = self.permissions.pick(self.queue.rng()) {
                self.queue.push_back(event);
            }
        } else if draw >= self.threshold(Category::SysKeys)
            && draw < self.threshold(Category::AppSwitch)
        {
            self.generate_activity();
        } else if draw >= self.threshold(Category::SysKeys) && draw < self.threshold(Category::Flip)
        {
            let open = self.keyboard_open;
            self.keyboard_open = !self.keyboard_open;
            self.queue.push_back(Event::KeyboardFlip { open });
        } else if let Some(key) = self.pick_key(draw) {
            self.queue.push_back(Event::key(KeyAction::Down, key));
            self.queue.push_back(Event::key(KeyAction::Up, key));
        }
    }
}

impl EventSource for RandomSource {
    async fn next_event(&mut self) -> Option<Event> {
        let mut refills = 0;
        while self.queue.is_empty() {
            if refills == MAX_EMPTY_REFILLS {
                warn!("Random source produced no events after {} draws", refills);
                return Some(Event::Noop);
            }
            self.generate_events();
            refills += 1;
        }
        self.event_count += 1;
        self.queue.pop_front()
    }

    fn validate(&mut self) -> bool {
        let mut ok = true;
        if self.factors.raw(Category::Permission) != 0.0 {
            ok &= self.permissions.populate();
            if ok && self.verbosity >= 2 {
                self.permissions.dump();
            }
        }
        ok & self.adjust_event_factors()
    }

    fn set_verbosity(&mut self, verbosity: u8) {
        self.verbosity = verbosity;
    }
}
