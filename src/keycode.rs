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

//! Key codes of the target device
//!
//! Codes and their `KEYCODE_*` names, the device key-presence table and the
//! character to key mapping used when typing text.

pub type KeyCode = u32;

pub const KEYCODE_UNKNOWN: KeyCode = 0;
pub const KEYCODE_HOME: KeyCode = 3;
pub const KEYCODE_BACK: KeyCode = 4;
pub const KEYCODE_CALL: KeyCode = 5;
pub const KEYCODE_ENDCALL: KeyCode = 6;
pub const KEYCODE_0: KeyCode = 7;
pub const KEYCODE_DPAD_UP: KeyCode = 19;
pub const KEYCODE_DPAD_DOWN: KeyCode = 20;
pub const KEYCODE_DPAD_LEFT: KeyCode = 21;
pub const KEYCODE_DPAD_RIGHT: KeyCode = 22;
pub const KEYCODE_DPAD_CENTER: KeyCode = 23;
pub const KEYCODE_VOLUME_UP: KeyCode = 24;
pub const KEYCODE_VOLUME_DOWN: KeyCode = 25;
pub const KEYCODE_POWER: KeyCode = 26;
pub const KEYCODE_A: KeyCode = 29;
pub const KEYCODE_SHIFT_LEFT: KeyCode = 59;
pub const KEYCODE_MENU: KeyCode = 82;
pub const KEYCODE_MUTE: KeyCode = 91;
pub const KEYCODE_VOLUME_MUTE: KeyCode = 164;
pub const KEYCODE_SLEEP: KeyCode = 223;
pub const KEYCODE_SOFT_SLEEP: KeyCode = 276;

/// Meta state for a left shift key held down
pub const META_SHIFT_LEFT: u32 = 0x41;

/// Key names indexed by code, without the `KEYCODE_` prefix
const KEY_NAMES: [&str; 289] = [
    // 0
    "UNKNOWN", "SOFT_LEFT", "SOFT_RIGHT", "HOME", "BACK", "CALL", "ENDCALL", "0", "1", "2",
    // 10
    "3", "4", "5", "6", "7", "8", "9", "STAR", "POUND", "DPAD_UP",
    // 20
    "DPAD_DOWN", "DPAD_LEFT", "DPAD_RIGHT", "DPAD_CENTER", "VOLUME_UP", "VOLUME_DOWN", "POWER",
    "CAMERA", "CLEAR", "A",
    // 30
    "B", "C", "D", "E", "F", "G", "H", "I", "J", "K",
    // 40
    "L", "M", "N", "O", "P", "Q", "R", "S", "T", "U",
    // 50
    "V", "W", "X", "Y", "Z", "COMMA", "PERIOD", "ALT_LEFT", "ALT_RIGHT", "SHIFT_LEFT",
    // 60
    "SHIFT_RIGHT", "TAB", "SPACE", "SYM", "EXPLORER", "ENVELOPE", "ENTER", "DEL", "GRAVE", "MINUS",
    // 70
    "EQUALS", "LEFT_BRACKET", "RIGHT_BRACKET", "BACKSLASH", "SEMICOLON", "APOSTROPHE", "SLASH",
    "AT", "NUM", "HEADSETHOOK",
    // 80
    "FOCUS", "PLUS", "MENU", "NOTIFICATION", "SEARCH", "MEDIA_PLAY_PAUSE", "MEDIA_STOP",
    "MEDIA_NEXT", "MEDIA_PREVIOUS", "MEDIA_REWIND",
    // 90
    "MEDIA_FAST_FORWARD", "MUTE", "PAGE_UP", "PAGE_DOWN", "PICTSYMBOLS", "SWITCH_CHARSET",
    "BUTTON_A", "BUTTON_B", "BUTTON_C", "BUTTON_X",
    // 100
    "BUTTON_Y", "BUTTON_Z", "BUTTON_L1", "BUTTON_R1", "BUTTON_L2", "BUTTON_R2", "BUTTON_THUMBL",
    "BUTTON_THUMBR", "BUTTON_START", "BUTTON_SELECT",
    // 110
    "BUTTON_MODE", "ESCAPE", "FORWARD_DEL", "CTRL_LEFT", "CTRL_RIGHT", "CAPS_LOCK", "SCROLL_LOCK",
    "META_LEFT", "META_RIGHT", "FUNCTION",
    // 120
    "SYSRQ", "BREAK", "MOVE_HOME", "MOVE_END", "INSERT", "FORWARD", "MEDIA_PLAY", "MEDIA_PAUSE",
    "MEDIA_CLOSE", "MEDIA_EJECT",
    // 130
    "MEDIA_RECORD", "F1", "F2", "F3", "F4", "F5", "F6", "F7", "F8", "F9",
    // 140
    "F10", "F11", "F12", "NUM_LOCK", "NUMPAD_0", "NUMPAD_1", "NUMPAD_2", "NUMPAD_3", "NUMPAD_4",
    "NUMPAD_5",
    // 150
    "NUMPAD_6", "NUMPAD_7", "NUMPAD_8", "NUMPAD_9", "NUMPAD_DIVIDE", "NUMPAD_MULTIPLY",
    "NUMPAD_SUBTRACT", "NUMPAD_ADD", "NUMPAD_DOT", "NUMPAD_COMMA",
    // 160
    "NUMPAD_ENTER", "NUMPAD_EQUALS", "NUMPAD_LEFT_PAREN", "NUMPAD_RIGHT_PAREN", "VOLUME_MUTE",
    "INFO", "CHANNEL_UP", "CHANNEL_DOWN", "ZOOM_IN", "ZOOM_OUT",
    // 170
    "TV", "WINDOW", "GUIDE", "DVR", "BOOKMARK", "CAPTIONS", "SETTINGS", "TV_POWER", "TV_INPUT",
    "STB_POWER",
    // 180
    "STB_INPUT", "AVR_POWER", "AVR_INPUT", "PROG_RED", "PROG_GREEN", "PROG_YELLOW", "PROG_BLUE",
    "APP_SWITCH", "BUTTON_1", "BUTTON_2",
    // 190
    "BUTTON_3", "BUTTON_4", "BUTTON_5", "BUTTON_6", "BUTTON_7", "BUTTON_8", "BUTTON_9",
    "BUTTON_10", "BUTTON_11", "BUTTON_12",
    // 200
    "BUTTON_13", "BUTTON_14", "BUTTON_15", "BUTTON_16", "LANGUAGE_SWITCH", "MANNER_MODE",
    "3D_MODE", "CONTACTS", "CALENDAR", "MUSIC",
    // 210
    "CALCULATOR", "ZENKAKU_HANKAKU", "EISU", "MUHENKAN", "HENKAN", "KATAKANA_HIRAGANA", "YEN",
    "RO", "KANA", "ASSIST",
    // 220
    "BRIGHTNESS_DOWN", "BRIGHTNESS_UP", "MEDIA_AUDIO_TRACK", "SLEEP", "WAKEUP", "PAIRING",
    "MEDIA_TOP_MENU", "11", "12", "LAST_CHANNEL",
    // 230
    "TV_DATA_SERVICE", "VOICE_ASSIST", "TV_RADIO_SERVICE", "TV_TELETEXT", "TV_NUMBER_ENTRY",
    "TV_TERRESTRIAL_ANALOG", "TV_TERRESTRIAL_DIGITAL", "TV_SATELLITE", "TV_SATELLITE_BS",
    "TV_SATELLITE_CS",
    // 240
    "TV_SATELLITE_SERVICE", "TV_NETWORK", "TV_ANTENNA_CABLE", "TV_INPUT_HDMI_1",
    "TV_INPUT_HDMI_2", "TV_INPUT_HDMI_3", "TV_INPUT_HDMI_4", "TV_INPUT_COMPOSITE_1",
    "TV_INPUT_COMPOSITE_2", "TV_INPUT_COMPONENT_1",
    // 250
    "TV_INPUT_COMPONENT_2", "TV_INPUT_VGA_1", "TV_AUDIO_DESCRIPTION",
    "TV_AUDIO_DESCRIPTION_MIX_UP", "TV_AUDIO_DESCRIPTION_MIX_DOWN", "TV_ZOOM_MODE",
    "TV_CONTENTS_MENU", "TV_MEDIA_CONTEXT_MENU", "TV_TIMER_PROGRAMMING", "HELP",
    // 260
    "NAVIGATE_PREVIOUS", "NAVIGATE_NEXT", "NAVIGATE_IN", "NAVIGATE_OUT", "STEM_PRIMARY", "STEM_1",
    "STEM_2", "STEM_3", "DPAD_UP_LEFT", "DPAD_DOWN_LEFT",
    // 270
    "DPAD_UP_RIGHT", "DPAD_DOWN_RIGHT", "MEDIA_SKIP_FORWARD", "MEDIA_SKIP_BACKWARD",
    "MEDIA_STEP_FORWARD", "MEDIA_STEP_BACKWARD", "SOFT_SLEEP", "CUT", "COPY", "PASTE",
    // 280
    "SYSTEM_NAVIGATION_UP", "SYSTEM_NAVIGATION_DOWN", "SYSTEM_NAVIGATION_LEFT",
    "SYSTEM_NAVIGATION_RIGHT", "ALL_APPS", "REFRESH", "THUMBS_UP", "THUMBS_DOWN",
    "PROFILE_SWITCH",
];

/// Highest key code known to the table
pub const MAX_KEYCODE: KeyCode = (KEY_NAMES.len() - 1) as KeyCode;

/// Keys that move around the UI
pub const NAV_KEYS: [KeyCode; 4] = [
    KEYCODE_DPAD_UP,
    KEYCODE_DPAD_DOWN,
    KEYCODE_DPAD_LEFT,
    KEYCODE_DPAD_RIGHT,
];

/// Keys that perform major navigation, sent less often
pub const MAJOR_NAV_KEYS: [KeyCode; 2] = [KEYCODE_MENU, KEYCODE_DPAD_CENTER];

/// Keys that perform system operations
pub const SYS_KEYS: [KeyCode; 8] = [
    KEYCODE_HOME,
    KEYCODE_BACK,
    KEYCODE_CALL,
    KEYCODE_ENDCALL,
    KEYCODE_VOLUME_UP,
    KEYCODE_VOLUME_DOWN,
    KEYCODE_VOLUME_MUTE,
    KEYCODE_MUTE,
];

/// `KEYCODE_HOME` style name for a code, if the code is known
pub fn key_name(code: KeyCode) -> Option<String> {
    KEY_NAMES
        .get(code as usize)
        .map(|name| format!("KEYCODE_{}", name))
}

/// Looks up a code from its full `KEYCODE_*` name
pub fn key_code(name: &str) -> Option<KeyCode> {
    let bare = name.strip_prefix("KEYCODE_")?;
    KEY_NAMES
        .iter()
        .position(|candidate| *candidate == bare)
        .map(|index| index as KeyCode)
        .filter(|code| *code != KEYCODE_UNKNOWN)
}

/// Resolves a key given as a number, a full `KEYCODE_*` name, or a bare
/// case-insensitive suffix such as `home`
pub fn resolve_key(key: &str) -> Option<KeyCode> {
    if let Ok(code) = key.parse::<i64>() {
        return u32::try_from(code).ok();
    }
    key_code(key).or_else(|| key_code(&format!("KEYCODE_{}", key.to_uppercase())))
}

/// Which keys physically exist on the target device
#[derive(Debug, Clone)]
pub struct KeyPresence {
    present: Vec<bool>,
}

impl Default for KeyPresence {
    fn default() -> Self {
        Self {
            present: vec![true; KEY_NAMES.len()],
        }
    }
}

impl KeyPresence {
    /// Every key present except the given ones
    pub fn without(missing: &[KeyCode]) -> Self {
        let mut presence = Self::default();
        for code in missing {
            presence.set(*code, false);
        }
        presence
    }

    pub fn set(&mut self, code: KeyCode, exists: bool) {
        if let Some(slot) = self.present.get_mut(code as usize) {
            *slot = exists;
        }
    }

    pub fn exists(&self, code: KeyCode) -> bool {
        self.present.get(code as usize).copied().unwrap_or(false)
    }

    pub fn any_exists(&self, codes: &[KeyCode]) -> bool {
        codes.iter().any(|code| self.exists(*code))
    }
}

/// One key stroke needed to produce a character on a virtual keyboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStroke {
    pub code: KeyCode,
    pub shift: bool,
}

/// Maps a character to the key stroke producing it, if any
pub fn char_to_stroke(c: char) -> Option<KeyStroke> {
    let plain = |code| Some(KeyStroke { code, shift: false });
    let shifted = |code| Some(KeyStroke { code, shift: true });

    match c {
        'a'..='z' => plain(KEYCODE_A + (c as u32 - 'a' as u32)),
        'A'..='Z' => shifted(KEYCODE_A + (c as u32 - 'A' as u32)),
        '0'..='9' => plain(KEYCODE_0 + (c as u32 - '0' as u32)),
        ' ' => plain(62),
        '\t' => plain(61),
        '\n' => plain(66),
        '*' => plain(17),
        '#' => plain(18),
        ',' => plain(55),
        '.' => plain(56),
        '`' => plain(68),
        '-' => plain(69),
        '=' => plain(70),
        '[' => plain(71),
        ']' => plain(72),
        '\\' => plain(73),
        ';' => plain(74),
        '\'' => plain(75),
        '/' => plain(76),
        '@' => plain(77),
        '+' => plain(81),
        '!' => shifted(KEYCODE_0 + 1),
        '$' => shifted(KEYCODE_0 + 4),
        '%' => shifted(KEYCODE_0 + 5),
        '^' => shifted(KEYCODE_0 + 6),
        '&' => shifted(KEYCODE_0 + 7),
        '(' => shifted(KEYCODE_0 + 9),
        ')' => shifted(KEYCODE_0),
        '~' => shifted(68),
        '_' => shifted(69),
        '{' => shifted(71),
        '}' => shifted(72),
        '|' => shifted(73),
        ':' => shifted(74),
        '"' => shifted(75),
        '?' => shifted(76),
        '<' => shifted(55),
        '>' => shifted(56),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_anchors() {
        assert_eq!(key_name(KEYCODE_HOME).as_deref(), Some("KEYCODE_HOME"));
        assert_eq!(key_name(KEYCODE_POWER).as_deref(), Some("KEYCODE_POWER"));
        assert_eq!(key_name(KEYCODE_MENU).as_deref(), Some("KEYCODE_MENU"));
        assert_eq!(key_name(KEYCODE_VOLUME_MUTE).as_deref(), Some("KEYCODE_VOLUME_MUTE"));
        assert_eq!(key_name(KEYCODE_SLEEP).as_deref(), Some("KEYCODE_SLEEP"));
        assert_eq!(key_name(KEYCODE_SOFT_SLEEP).as_deref(), Some("KEYCODE_SOFT_SLEEP"));
        assert_eq!(key_name(KEYCODE_A + 25).as_deref(), Some("KEYCODE_Z"));
        assert_eq!(key_name(MAX_KEYCODE + 1), None);
    }

    #[test]
    fn test_resolve_key() {
        assert_eq!(resolve_key("KEYCODE_HOME"), Some(KEYCODE_HOME));
        assert_eq!(resolve_key("home"), Some(KEYCODE_HOME));
        assert_eq!(resolve_key("dpad_center"), Some(KEYCODE_DPAD_CENTER));
        assert_eq!(resolve_key("82"), Some(KEYCODE_MENU));
        assert_eq!(resolve_key("-3"), None);
        assert_eq!(resolve_key("KEYCODE_UNKNOWN"), None);
        assert_eq!(resolve_key("not_a_key"), None);
    }

    #[test]
    fn test_key_presence() {
        let presence = KeyPresence::without(&[KEYCODE_HOME, KEYCODE_BACK]);
        assert!(!presence.exists(KEYCODE_HOME));
        assert!(presence.exists(KEYCODE_CALL));
        assert!(presence.any_exists(&SYS_KEYS));
        assert!(!presence.exists(MAX_KEYCODE + 10));
    }

    #[test]
    fn test_char_to_stroke() {
        assert_eq!(
            char_to_stroke('h'),
            Some(KeyStroke { code: KEYCODE_A + 7, shift: false })
        );
        assert_eq!(
            char_to_stroke('H'),
            Some(KeyStroke { code: KEYCODE_A + 7, shift: true })
        );
        assert_eq!(char_to_stroke('!').map(|s| s.shift), Some(true));
        assert_eq!(char_to_stroke('é'), None);
    }
}
