//! XInput reader for Windows, polling every XInput user slot.

use tracing::{debug, info};
use windows::Win32::UI::Input::XboxController::{
    XInputGetState, XINPUT_GAMEPAD, XINPUT_GAMEPAD_A, XINPUT_GAMEPAD_LEFT_SHOULDER,
    XINPUT_GAMEPAD_RIGHT_SHOULDER, XINPUT_GAMEPAD_START, XINPUT_GAMEPAD_X, XINPUT_STATE,
    XUSER_MAX_COUNT,
};

use super::backend::{BackendError, ControllerBackend};
use super::gamepad::{apply_reading, GamepadReading, GamepadSettings};
use crate::pad::PadState;

const ERROR_SUCCESS: u32 = 0;

#[derive(Debug)]
pub struct XInputBackend {
    settings: GamepadSettings,
    connected: [bool; XUSER_MAX_COUNT as usize],
}

impl XInputBackend {
    pub fn create(settings: GamepadSettings) -> Self {
        Self {
            settings,
            connected: [false; XUSER_MAX_COUNT as usize],
        }
    }

    fn to_reading(gamepad: &XINPUT_GAMEPAD) -> GamepadReading {
        let buttons = gamepad.wButtons.0;
        let pressed = |flag: u16| buttons & flag != 0;

        GamepadReading {
            start: pressed(XINPUT_GAMEPAD_START.0),
            left_shoulder: pressed(XINPUT_GAMEPAD_LEFT_SHOULDER.0),
            right_shoulder: pressed(XINPUT_GAMEPAD_RIGHT_SHOULDER.0),
            south: pressed(XINPUT_GAMEPAD_A.0),
            west: pressed(XINPUT_GAMEPAD_X.0),
            left_x: gamepad.sThumbLX,
            left_y: gamepad.sThumbLY,
            right_x: gamepad.sThumbRX,
            right_y: gamepad.sThumbRY,
            left_trigger: gamepad.bLeftTrigger,
            right_trigger: gamepad.bRightTrigger,
        }
    }
}

impl ControllerBackend for XInputBackend {
    fn name(&self) -> &'static str {
        "xinput"
    }

    fn init(&mut self) -> Result<(), BackendError> {
        info!("XInput reader ready for {} user slots", XUSER_MAX_COUNT);
        Ok(())
    }

    fn read(&mut self, pad: &mut PadState) {
        for user_index in 0..XUSER_MAX_COUNT {
            let mut state = XINPUT_STATE::default();
            let result = unsafe { XInputGetState(user_index, &mut state) };
            let connected = result == ERROR_SUCCESS;

            let slot = &mut self.connected[user_index as usize];
            if connected != *slot {
                debug!(
                    "XInput slot {} {}",
                    user_index,
                    if connected { "connected" } else { "disconnected" }
                );
                *slot = connected;
            }

            if connected {
                apply_reading(&Self::to_reading(&state.Gamepad), &self.settings, pad);
            }
        }
    }
}
