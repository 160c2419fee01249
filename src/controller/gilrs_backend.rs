use gilrs::{Axis, Button, Event, EventType, Gamepad, GamepadId, Gilrs};
use tracing::{debug, error, info, warn};

use super::backend::{BackendError, ControllerBackend};
use super::gamepad::{apply_reading, axis_to_i16, trigger_to_u8, GamepadReading, GamepadSettings};
use crate::pad::PadState;

/// Standard gamepad reader backed by gilrs.
///
/// Follows the first connected gamepad and picks a new one when it goes away.
#[derive(Debug)]
pub struct GilrsBackend {
    gilrs: Option<Gilrs>,
    active_gamepad: Option<GamepadId>,
    settings: GamepadSettings,
}

impl GilrsBackend {
    pub fn create(settings: GamepadSettings) -> Self {
        Self {
            gilrs: None,
            active_gamepad: None,
            settings,
        }
    }

    fn pump_events(gilrs: &mut Gilrs, active_gamepad: &mut Option<GamepadId>) {
        while let Some(Event { id, event, .. }) = gilrs.next_event() {
            match event {
                EventType::Connected => {
                    info!("Gamepad {} connected", id);
                }
                EventType::Disconnected => {
                    warn!("Gamepad {} disconnected", id);
                    if *active_gamepad == Some(id) {
                        *active_gamepad = None;
                    }
                }
                _ => {}
            }
        }
    }

    fn select_gamepad(gilrs: &Gilrs) -> Option<GamepadId> {
        let gamepads: Vec<(GamepadId, Gamepad<'_>)> = gilrs.gamepads().collect();
        debug!("Looking for a gamepad among {} devices", gamepads.len());

        let (id, gamepad) = gamepads.first()?;
        info!("Selected gamepad: {} ({})", gamepad.name(), id);
        Some(*id)
    }
}

impl ControllerBackend for GilrsBackend {
    fn name(&self) -> &'static str {
        "gilrs"
    }

    fn init(&mut self) -> Result<(), BackendError> {
        info!("Initializing gilrs controller interface");
        let gilrs = Gilrs::new().map_err(|e| {
            error!("Failed to initialize gilrs: {}", e);
            BackendError::InitializationError(e.to_string())
        })?;

        self.active_gamepad = Self::select_gamepad(&gilrs);
        if self.active_gamepad.is_none() {
            info!("No gamepad connected yet");
        }
        self.gilrs = Some(gilrs);
        Ok(())
    }

    fn read(&mut self, pad: &mut PadState) {
        let Some(gilrs) = self.gilrs.as_mut() else {
            return;
        };

        Self::pump_events(gilrs, &mut self.active_gamepad);
        if self.active_gamepad.is_none() {
            self.active_gamepad = Self::select_gamepad(gilrs);
        }
        let Some(gamepad) = self
            .active_gamepad
            .and_then(|id| gilrs.connected_gamepad(id))
        else {
            return;
        };

        let trigger = |button: Button| {
            gamepad
                .button_data(button)
                .map_or(0, |data| trigger_to_u8(data.value()))
        };
        let reading = GamepadReading {
            start: gamepad.is_pressed(Button::Start),
            left_shoulder: gamepad.is_pressed(Button::LeftTrigger),
            right_shoulder: gamepad.is_pressed(Button::RightTrigger),
            south: gamepad.is_pressed(Button::South),
            west: gamepad.is_pressed(Button::West),
            left_x: axis_to_i16(gamepad.value(Axis::LeftStickX)),
            left_y: axis_to_i16(gamepad.value(Axis::LeftStickY)),
            right_x: axis_to_i16(gamepad.value(Axis::RightStickX)),
            right_y: axis_to_i16(gamepad.value(Axis::RightStickY)),
            left_trigger: trigger(Button::LeftTrigger2),
            right_trigger: trigger(Button::RightTrigger2),
        };

        apply_reading(&reading, &self.settings, pad);
    }
}
