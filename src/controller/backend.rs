use std::fmt;

use crate::adapter::calibration::CalibrationError;
use crate::pad::PadState;

/// An input source polled once per tick by the [`ControllerHub`](super::hub::ControllerHub).
///
/// `init` runs once at startup. A backend whose `init` failed must treat every
/// later `read` as a no-op.
pub trait ControllerBackend: fmt::Debug {
    /// Short name used in log lines
    fn name(&self) -> &'static str;

    fn init(&mut self) -> Result<(), BackendError>;

    /// ORs buttons into `pad` and optionally overwrites its stick.
    fn read(&mut self, pad: &mut PadState);

    /// Releases threads and handles owned by the backend.
    fn shutdown(&mut self) {}
}

// Backend errors
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Invalid calibration: {0}")]
    Calibration(#[from] CalibrationError),
}
