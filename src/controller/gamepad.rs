//! Mapping shared by the standard gamepad readers (gilrs and XInput).
//!
//! Both readers normalise their device into a [`GamepadReading`] on the
//! XInput scale (signed 16-bit sticks with up positive, 8-bit triggers) and
//! hand it to [`apply_reading`].

use serde::{Deserialize, Serialize};

use crate::pad::{ButtonMask, PadState};

/// Divisor bringing a full i16 deflection down to about ±80
pub const STICK_DIVISOR: i32 = 409;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GamepadSettings {
    /// Left stick deadzone as a magnitude on the i16 scale
    pub stick_deadzone: i16,
    /// Right stick deflection needed to press a C button
    pub cbutton_threshold: i16,
    /// Trigger value (0-255) above which Z or R is pressed
    pub trigger_threshold: u8,
}

impl Default for GamepadSettings {
    fn default() -> Self {
        Self {
            stick_deadzone: 4960,
            cbutton_threshold: 0x4000,
            trigger_threshold: 30,
        }
    }
}

/// Snapshot of a standard gamepad
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GamepadReading {
    pub start: bool,
    pub left_shoulder: bool,
    pub right_shoulder: bool,
    pub south: bool,
    pub west: bool,
    pub left_x: i16,
    pub left_y: i16,
    pub right_x: i16,
    pub right_y: i16,
    pub left_trigger: u8,
    pub right_trigger: u8,
}

pub fn apply_reading(reading: &GamepadReading, settings: &GamepadSettings, pad: &mut PadState) {
    let mut buttons = ButtonMask::empty();

    if reading.start {
        buttons |= ButtonMask::START;
    }
    if reading.left_shoulder {
        buttons |= ButtonMask::Z;
    }
    if reading.right_shoulder {
        buttons |= ButtonMask::R;
    }
    if reading.south {
        buttons |= ButtonMask::A;
    }
    if reading.west {
        buttons |= ButtonMask::B;
    }

    let threshold = settings.cbutton_threshold;
    if reading.right_x < -threshold {
        buttons |= ButtonMask::C_LEFT;
    }
    if reading.right_x > threshold {
        buttons |= ButtonMask::C_RIGHT;
    }
    if reading.right_y > threshold {
        buttons |= ButtonMask::C_UP;
    }
    if reading.right_y < -threshold {
        buttons |= ButtonMask::C_DOWN;
    }

    if reading.left_trigger > settings.trigger_threshold {
        buttons |= ButtonMask::Z;
    }
    if reading.right_trigger > settings.trigger_threshold {
        buttons |= ButtonMask::R;
    }

    pad.press(buttons);

    let x = i64::from(reading.left_x);
    let y = i64::from(reading.left_y);
    let deadzone = i64::from(settings.stick_deadzone);
    if x * x + y * y > deadzone * deadzone {
        pad.set_stick(
            i32::from(reading.left_x) / STICK_DIVISOR,
            i32::from(reading.left_y) / STICK_DIVISOR,
        );
    }
}

/// Converts a normalised axis (-1.0..=1.0) to the i16 scale.
pub fn axis_to_i16(value: f32) -> i16 {
    (value.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

/// Converts a normalised trigger (0.0..=1.0) to the u8 scale.
pub fn trigger_to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * f32::from(u8::MAX)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_buttons_and_shoulders_map_to_n64_layout() {
        let reading = GamepadReading {
            start: true,
            left_shoulder: true,
            south: true,
            west: true,
            ..Default::default()
        };
        let mut pad = PadState::default();
        apply_reading(&reading, &GamepadSettings::default(), &mut pad);
        assert_eq!(
            pad.buttons,
            ButtonMask::START | ButtonMask::Z | ButtonMask::A | ButtonMask::B
        );
    }

    #[test]
    fn right_stick_presses_c_buttons() {
        let reading = GamepadReading {
            right_x: -0x5000,
            right_y: 0x5000,
            ..Default::default()
        };
        let mut pad = PadState::default();
        apply_reading(&reading, &GamepadSettings::default(), &mut pad);
        assert_eq!(pad.buttons, ButtonMask::C_LEFT | ButtonMask::C_UP);
    }

    #[test]
    fn triggers_press_z_and_r() {
        let reading = GamepadReading {
            left_trigger: 31,
            right_trigger: 200,
            ..Default::default()
        };
        let mut pad = PadState::default();
        apply_reading(&reading, &GamepadSettings::default(), &mut pad);
        assert_eq!(pad.buttons, ButtonMask::Z | ButtonMask::R);

        let reading = GamepadReading {
            left_trigger: 30,
            ..Default::default()
        };
        let mut pad = PadState::default();
        apply_reading(&reading, &GamepadSettings::default(), &mut pad);
        assert!(pad.buttons.is_empty());
    }

    #[test]
    fn stick_inside_deadzone_stays_neutral() {
        let reading = GamepadReading {
            left_x: 3000,
            left_y: 3000,
            ..Default::default()
        };
        let mut pad = PadState::default();
        apply_reading(&reading, &GamepadSettings::default(), &mut pad);
        assert_eq!(pad.stick(), (0, 0));
    }

    #[test]
    fn full_deflection_reaches_eighty() {
        let reading = GamepadReading {
            left_x: i16::MAX,
            left_y: -i16::MAX,
            ..Default::default()
        };
        let mut pad = PadState::default();
        apply_reading(&reading, &GamepadSettings::default(), &mut pad);
        assert_eq!(pad.stick(), (80, -80));
    }

    #[test]
    fn normalised_values_convert_to_device_scale() {
        assert_eq!(axis_to_i16(1.0), i16::MAX);
        assert_eq!(axis_to_i16(-2.0), -i16::MAX);
        assert_eq!(trigger_to_u8(1.0), 255);
        assert_eq!(trigger_to_u8(-0.5), 0);
    }
}
