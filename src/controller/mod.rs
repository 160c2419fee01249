//! Controller backends and the hub that merges them.
//!
//! ```text
//! RecordedInput ─┐
//! Gamepad ───────┤
//! USB adapter ───┼──► ControllerHub::poll ──► PadState
//! Keyboard ──────┘
//! ```
//!
//! The gamepad slot is XInput on Windows and gilrs everywhere else.

pub mod backend;
pub mod gamepad;
#[cfg(not(windows))]
pub mod gilrs_backend;
pub mod hub;
pub mod keyboard;
pub mod recorded;
#[cfg(windows)]
pub mod xinput;
