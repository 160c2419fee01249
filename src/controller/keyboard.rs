//! Keyboard fallback.
//!
//! The window layer forwards key events to a [`KeyboardHandle`]; the backend
//! turns the set of held keys into pad input on every read.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::backend::{BackendError, ControllerBackend};
use crate::pad::{ButtonMask, PadState, STICK_LIMIT};

// Stick directions live above the 16 button bits
const STICK_UP: u32 = 1 << 16;
const STICK_DOWN: u32 = 1 << 17;
const STICK_LEFT: u32 = 1 << 18;
const STICK_RIGHT: u32 = 1 << 19;

/// Scancode bindings, one per logical key
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct KeyBindings {
    pub a: u32,
    pub b: u32,
    pub z: u32,
    pub start: u32,
    pub l: u32,
    pub r: u32,
    pub d_up: u32,
    pub d_down: u32,
    pub d_left: u32,
    pub d_right: u32,
    pub c_up: u32,
    pub c_down: u32,
    pub c_left: u32,
    pub c_right: u32,
    pub stick_up: u32,
    pub stick_down: u32,
    pub stick_left: u32,
    pub stick_right: u32,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            a: 0x26,
            b: 0x33,
            z: 0x25,
            start: 0x39,
            l: 0x2a,
            r: 0x36,
            d_up: 0x14,
            d_down: 0x22,
            d_left: 0x21,
            d_right: 0x23,
            c_up: 0x148,
            c_down: 0x150,
            c_left: 0x14b,
            c_right: 0x14d,
            stick_up: 0x11,
            stick_down: 0x1f,
            stick_left: 0x1e,
            stick_right: 0x20,
        }
    }
}

impl KeyBindings {
    fn bits_for(&self, scancode: u32) -> u32 {
        let table = [
            (self.a, u32::from(ButtonMask::A.bits())),
            (self.b, u32::from(ButtonMask::B.bits())),
            (self.z, u32::from(ButtonMask::Z.bits())),
            (self.start, u32::from(ButtonMask::START.bits())),
            (self.l, u32::from(ButtonMask::L.bits())),
            (self.r, u32::from(ButtonMask::R.bits())),
            (self.d_up, u32::from(ButtonMask::D_UP.bits())),
            (self.d_down, u32::from(ButtonMask::D_DOWN.bits())),
            (self.d_left, u32::from(ButtonMask::D_LEFT.bits())),
            (self.d_right, u32::from(ButtonMask::D_RIGHT.bits())),
            (self.c_up, u32::from(ButtonMask::C_UP.bits())),
            (self.c_down, u32::from(ButtonMask::C_DOWN.bits())),
            (self.c_left, u32::from(ButtonMask::C_LEFT.bits())),
            (self.c_right, u32::from(ButtonMask::C_RIGHT.bits())),
            (self.stick_up, STICK_UP),
            (self.stick_down, STICK_DOWN),
            (self.stick_left, STICK_LEFT),
            (self.stick_right, STICK_RIGHT),
        ];

        table
            .iter()
            .filter(|(code, _)| *code == scancode)
            .fold(0, |bits, (_, bit)| bits | bit)
    }
}

/// Cloneable entry point for key events
#[derive(Clone, Debug)]
pub struct KeyboardHandle {
    bindings: Arc<KeyBindings>,
    held: Arc<AtomicU32>,
}

impl KeyboardHandle {
    pub fn new(bindings: KeyBindings) -> Self {
        Self {
            bindings: Arc::new(bindings),
            held: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Returns `true` if the scancode is bound.
    pub fn on_key_down(&self, scancode: u32) -> bool {
        let bits = self.bindings.bits_for(scancode);
        if bits == 0 {
            return false;
        }
        self.held.fetch_or(bits, Ordering::Relaxed);
        true
    }

    /// Returns `true` if the scancode is bound.
    pub fn on_key_up(&self, scancode: u32) -> bool {
        let bits = self.bindings.bits_for(scancode);
        if bits == 0 {
            return false;
        }
        self.held.fetch_and(!bits, Ordering::Relaxed);
        true
    }

    /// Releases every key, e.g. when the window loses focus.
    pub fn on_all_keys_up(&self) {
        self.held.store(0, Ordering::Relaxed);
    }

    fn held(&self) -> u32 {
        self.held.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct KeyboardBackend {
    handle: KeyboardHandle,
}

impl KeyboardBackend {
    pub fn create(handle: KeyboardHandle) -> Self {
        Self { handle }
    }
}

impl ControllerBackend for KeyboardBackend {
    fn name(&self) -> &'static str {
        "keyboard"
    }

    fn init(&mut self) -> Result<(), BackendError> {
        info!("Keyboard bindings: {:?}", self.handle.bindings);
        Ok(())
    }

    fn read(&mut self, pad: &mut PadState) {
        let held = self.handle.held();
        if held == 0 {
            return;
        }
        debug!("Keyboard held bits: {:#x}", held);

        pad.press(ButtonMask::from_bits_truncate((held & 0xffff) as u16));

        let limit = i32::from(STICK_LIMIT);
        let mut x = 0;
        let mut y = 0;
        if held & STICK_LEFT != 0 {
            x = -limit;
        }
        if held & STICK_RIGHT != 0 {
            x = limit;
        }
        if held & STICK_DOWN != 0 {
            y = -limit;
        }
        if held & STICK_UP != 0 {
            y = limit;
        }
        pad.set_stick(x, y);
    }
}
