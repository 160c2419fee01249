//! Merged pad state handed to the game loop once per input tick.

use bitflags::bitflags;

/// Largest stick deflection the game expects on either axis.
pub const STICK_LIMIT: i8 = 80;

bitflags! {
    /// N64 button bits in libultra layout
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct ButtonMask: u16 {
        const A = 0x8000;
        const B = 0x4000;
        const Z = 0x2000;
        const START = 0x1000;
        const D_UP = 0x0800;
        const D_DOWN = 0x0400;
        const D_LEFT = 0x0200;
        const D_RIGHT = 0x0100;
        const L = 0x0020;
        const R = 0x0010;
        const C_UP = 0x0008;
        const C_DOWN = 0x0004;
        const C_LEFT = 0x0002;
        const C_RIGHT = 0x0001;
    }
}

/// One logical controller reading.
///
/// Backends OR their buttons into `buttons` and report analog input through
/// [`PadState::set_stick`], which keeps both axes inside `[-STICK_LIMIT, STICK_LIMIT]`
/// and leaves the stick untouched for a neutral report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PadState {
    pub buttons: ButtonMask,
    stick_x: i8,
    stick_y: i8,
    pub errno: u8,
}

impl PadState {
    pub fn stick_x(&self) -> i8 {
        self.stick_x
    }

    pub fn stick_y(&self) -> i8 {
        self.stick_y
    }

    pub fn stick(&self) -> (i8, i8) {
        (self.stick_x, self.stick_y)
    }

    pub fn press(&mut self, buttons: ButtonMask) {
        self.buttons |= buttons;
    }

    /// Overwrites the stick unless the report is neutral.
    ///
    /// Returns `true` if the stick was written.
    pub fn set_stick(&mut self, x: i32, y: i32) -> bool {
        if x == 0 && y == 0 {
            return false;
        }
        let limit = i32::from(STICK_LIMIT);
        self.stick_x = x.clamp(-limit, limit) as i8;
        self.stick_y = y.clamp(-limit, limit) as i8;
        true
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

impl std::fmt::Display for PadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "stick_x={} stick_y={} button={:#06x} errnum={}",
            self.stick_x,
            self.stick_y,
            self.buttons.bits(),
            self.errno
        )
    }
}
