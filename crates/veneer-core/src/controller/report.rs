//! Gamepad report layouts and the standard-to-alternate remap.
//!
//! The real input subsystem reports the standard (XUSB) layout. The
//! alternate profile (DS4) packs buttons differently, uses unsigned sticks
//! with an inverted Y axis, and encodes the d-pad as a hat value, so a
//! report has to be rebuilt field by field rather than copied.

use super::ProfileKind;

pub const XUSB_DPAD_UP: u16 = 0x0001;
pub const XUSB_DPAD_DOWN: u16 = 0x0002;
pub const XUSB_DPAD_LEFT: u16 = 0x0004;
pub const XUSB_DPAD_RIGHT: u16 = 0x0008;
pub const XUSB_START: u16 = 0x0010;
pub const XUSB_BACK: u16 = 0x0020;
pub const XUSB_LEFT_THUMB: u16 = 0x0040;
pub const XUSB_RIGHT_THUMB: u16 = 0x0080;
pub const XUSB_LEFT_SHOULDER: u16 = 0x0100;
pub const XUSB_RIGHT_SHOULDER: u16 = 0x0200;
pub const XUSB_GUIDE: u16 = 0x0400;
pub const XUSB_A: u16 = 0x1000;
pub const XUSB_B: u16 = 0x2000;
pub const XUSB_X: u16 = 0x4000;
pub const XUSB_Y: u16 = 0x8000;

pub const DS4_SQUARE: u16 = 1 << 4;
pub const DS4_CROSS: u16 = 1 << 5;
pub const DS4_CIRCLE: u16 = 1 << 6;
pub const DS4_TRIANGLE: u16 = 1 << 7;
pub const DS4_SHOULDER_LEFT: u16 = 1 << 8;
pub const DS4_SHOULDER_RIGHT: u16 = 1 << 9;
pub const DS4_TRIGGER_LEFT: u16 = 1 << 10;
pub const DS4_TRIGGER_RIGHT: u16 = 1 << 11;
pub const DS4_SHARE: u16 = 1 << 12;
pub const DS4_OPTIONS: u16 = 1 << 13;
pub const DS4_THUMB_LEFT: u16 = 1 << 14;
pub const DS4_THUMB_RIGHT: u16 = 1 << 15;

pub const DS4_SPECIAL_PS: u8 = 1 << 0;

/// Low nibble of the DS4 button word.
pub const DS4_DPAD_MASK: u16 = 0x000F;

/// XUSB button bit to DS4 button bit. The guide button and the d-pad are
/// not in here: they live in the special byte and the hat nibble.
pub const DS4_BUTTON_MAP: [(u16, u16); 10] = [
    (XUSB_BACK, DS4_SHARE),
    (XUSB_START, DS4_OPTIONS),
    (XUSB_LEFT_THUMB, DS4_THUMB_LEFT),
    (XUSB_RIGHT_THUMB, DS4_THUMB_RIGHT),
    (XUSB_LEFT_SHOULDER, DS4_SHOULDER_LEFT),
    (XUSB_RIGHT_SHOULDER, DS4_SHOULDER_RIGHT),
    (XUSB_A, DS4_CROSS),
    (XUSB_B, DS4_CIRCLE),
    (XUSB_X, DS4_SQUARE),
    (XUSB_Y, DS4_TRIANGLE),
];

/// DS4 hat values, indexed by `up | down << 1 | left << 2 | right << 3`.
/// Contradictory combinations (up and down) resolve to neutral.
const DS4_HAT: [u8; 16] = [
    8, // none
    0, // up
    4, // down
    8, // up + down
    6, // left
    7, // up + left
    5, // down + left
    8, // up + down + left
    2, // right
    1, // up + right
    3, // down + right
    8, // up + down + right
    8, // left + right
    8,
    8,
    8,
];

/// Standard gamepad state as read from the real input subsystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PadState {
    pub buttons: u16,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub thumb_lx: i16,
    pub thumb_ly: i16,
    pub thumb_rx: i16,
    pub thumb_ry: i16,
}

/// Alternate-profile report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ds4Report {
    pub thumb_lx: u8,
    pub thumb_ly: u8,
    pub thumb_rx: u8,
    pub thumb_ry: u8,
    pub buttons: u16,
    pub special: u8,
    pub trigger_l: u8,
    pub trigger_r: u8,
}

impl Default for Ds4Report {
    fn default() -> Self {
        Self {
            thumb_lx: 0x80,
            thumb_ly: 0x80,
            thumb_rx: 0x80,
            thumb_ry: 0x80,
            buttons: u16::from(DS4_HAT[0]),
            special: 0,
            trigger_l: 0,
            trigger_r: 0,
        }
    }
}

/// A report in the layout of the slot's profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadReport {
    Standard(PadState),
    Alternate(Ds4Report),
}

impl PadReport {
    /// Builds the report the given profile expects from a polled state.
    pub fn for_profile(profile: ProfileKind, state: &PadState) -> Self {
        match profile {
            ProfileKind::StandardPad => Self::Standard(*state),
            ProfileKind::AlternatePad => Self::Alternate(to_ds4(state)),
        }
    }
}

/// Force-feedback request from the bus for one slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rumble {
    pub large_motor: u8,
    pub small_motor: u8,
}

impl Rumble {
    /// Motor speeds widened to the real subsystem's 16-bit range.
    pub fn motor_speeds(self) -> (u16, u16) {
        (
            u16::from(self.large_motor) * 0xff,
            u16::from(self.small_motor) * 0xff,
        )
    }
}

/// Remaps a standard report onto the alternate layout.
pub fn to_ds4(state: &PadState) -> Ds4Report {
    let mut buttons = DS4_BUTTON_MAP
        .iter()
        .filter(|(xusb, _)| state.buttons & xusb != 0)
        .fold(0u16, |acc, (_, ds4)| acc | ds4);

    if state.left_trigger > 0 {
        buttons |= DS4_TRIGGER_LEFT;
    }
    if state.right_trigger > 0 {
        buttons |= DS4_TRIGGER_RIGHT;
    }

    let dpad = usize::from(state.buttons & 0x000F);
    buttons = (buttons & !DS4_DPAD_MASK) | u16::from(DS4_HAT[dpad]);

    let special = if state.buttons & XUSB_GUIDE != 0 {
        DS4_SPECIAL_PS
    } else {
        0
    };

    Ds4Report {
        thumb_lx: axis_to_u8(state.thumb_lx),
        thumb_ly: 0xFF - axis_to_u8(state.thumb_ly),
        thumb_rx: axis_to_u8(state.thumb_rx),
        thumb_ry: 0xFF - axis_to_u8(state.thumb_ry),
        buttons,
        special,
        trigger_l: state.left_trigger,
        trigger_r: state.right_trigger,
    }
}

/// `-32768..=32767` to `0..=255`, keeping the center at 0x80.
fn axis_to_u8(value: i16) -> u8 {
    ((i32::from(value) + 0x8000) >> 8) as u8
}
