//! Controller hub with statum state machine for backend lifecycle
//!
//! # State Machine
//!
//! ```text
//! Assembling ──► Polling
//!  (with_backend)  (poll, shutdown)
//! ```
//!
//! Backends are pushed while assembling and their order is fixed from then on.
//! `initialize` consumes the assembling hub, so every backend's `init` runs
//! exactly once.

use statum::{machine, state};
use tracing::{debug, error, info};

use super::backend::ControllerBackend;
use super::keyboard::{KeyboardBackend, KeyboardHandle};
use super::recorded::RecordedInput;
use crate::adapter::UsbAdapterBackend;
use crate::config::Config;
use crate::pad::PadState;

#[state]
#[derive(Debug, Clone)]
pub enum HubState {
    Assembling, // Backends may still be added
    Polling,    // Backends initialized, order fixed
}

/// Merges every backend into one [`PadState`] per tick.
///
/// Buttons are ORed across backends; the stick comes from the last backend
/// in order that reported a non-neutral one.
#[machine]
pub struct ControllerHub<S: HubState> {
    backends: Vec<Box<dyn ControllerBackend>>,
    pad: PadState,
    polls: u64,
}

impl<S: HubState> ControllerHub<S> {
    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|backend| backend.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl ControllerHub<Assembling> {
    pub fn create() -> Self {
        Self::new(Vec::new(), PadState::default(), 0)
    }

    pub fn with_backend(mut self, backend: Box<dyn ControllerBackend>) -> Self {
        debug!("Adding backend {}", backend.name());
        self.backends.push(backend);
        self
    }

    /// Initializes every backend in order and fixes the backend list.
    ///
    /// A failed backend is logged, shut down and left out of polling.
    pub fn initialize(mut self) -> ControllerHub<Polling> {
        let mut ready = Vec::with_capacity(self.backends.len());
        for mut backend in self.backends.drain(..) {
            match backend.init() {
                Ok(()) => {
                    info!("Backend {} ready", backend.name());
                    ready.push(backend);
                }
                Err(e) => {
                    error!("Backend {} failed to initialize: {}", backend.name(), e);
                    backend.shutdown();
                }
            }
        }
        self.backends = ready;
        self.transition()
    }
}

impl ControllerHub<Polling> {
    /// Reads every backend once and returns the merged pad.
    pub fn poll(&mut self) -> PadState {
        let previous = self.pad;
        self.pad.clear();
        for backend in self.backends.iter_mut() {
            backend.read(&mut self.pad);
        }
        self.polls += 1;

        if self.pad != previous {
            debug!("Pad changed: {}", self.pad);
        }
        self.pad
    }

    pub fn last(&self) -> PadState {
        self.pad
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }

    /// Shuts backends down in reverse order.
    pub fn shutdown(mut self) {
        info!("Shutting down {} backends", self.backends.len());
        while let Some(mut backend) = self.backends.pop() {
            debug!("Stopping backend {}", backend.name());
            backend.shutdown();
        }
    }
}

/// Builds the hub in its default order: recorded input, standard gamepad,
/// USB adapter, keyboard.
pub fn assemble(config: &Config, keyboard: KeyboardHandle) -> ControllerHub<Assembling> {
    let mut hub = ControllerHub::create();

    if config.recorded.enabled {
        hub = hub.with_backend(Box::new(RecordedInput::create(config.recorded.path.clone())));
    }

    #[cfg(windows)]
    {
        hub = hub.with_backend(Box::new(super::xinput::XInputBackend::create(
            config.gamepad.clone(),
        )));
    }
    #[cfg(not(windows))]
    {
        hub = hub.with_backend(Box::new(super::gilrs_backend::GilrsBackend::create(
            config.gamepad.clone(),
        )));
    }

    if config.usb_adapter.enabled {
        hub = hub.with_backend(Box::new(UsbAdapterBackend::create(
            config.usb_adapter.clone(),
        )));
    }

    hub.with_backend(Box::new(KeyboardBackend::create(keyboard)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::backend::BackendError;
    use crate::pad::ButtonMask;
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    struct Scripted {
        name: &'static str,
        buttons: ButtonMask,
        stick: (i32, i32),
        fail_init: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Scripted {
        fn boxed(
            name: &'static str,
            buttons: ButtonMask,
            stick: (i32, i32),
            log: &Arc<Mutex<Vec<String>>>,
        ) -> Box<dyn ControllerBackend> {
            Box::new(Self {
                name,
                buttons,
                stick,
                fail_init: false,
                log: log.clone(),
            })
        }
    }

    impl ControllerBackend for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        fn init(&mut self) -> Result<(), BackendError> {
            self.log.lock().unwrap().push(format!("init {}", self.name));
            if self.fail_init {
                return Err(BackendError::InitializationError("scripted".to_string()));
            }
            Ok(())
        }

        fn read(&mut self, pad: &mut PadState) {
            self.log.lock().unwrap().push(format!("read {}", self.name));
            pad.press(self.buttons);
            pad.set_stick(self.stick.0, self.stick.1);
        }

        fn shutdown(&mut self) {
            self.log.lock().unwrap().push(format!("shutdown {}", self.name));
        }
    }

    fn entries(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        std::mem::take(&mut *log.lock().unwrap())
    }

    #[test]
    fn buttons_are_ored_and_last_nonzero_stick_wins() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hub = ControllerHub::create()
            .with_backend(Scripted::boxed("first", ButtonMask::A, (10, 10), &log))
            .with_backend(Scripted::boxed("second", ButtonMask::Z, (-30, 5), &log))
            .with_backend(Scripted::boxed("third", ButtonMask::START, (0, 0), &log))
            .initialize();

        let pad = hub.poll();
        assert_eq!(pad.buttons, ButtonMask::A | ButtonMask::Z | ButtonMask::START);
        assert_eq!(pad.stick(), (-30, 5));
        assert_eq!(hub.last(), pad);
    }

    #[test]
    fn each_poll_starts_from_a_zeroed_pad() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hub = ControllerHub::create()
            .with_backend(Scripted::boxed("only", ButtonMask::empty(), (0, 0), &log))
            .initialize();

        hub.pad.press(ButtonMask::B);
        assert_eq!(hub.poll(), PadState::default());
        assert_eq!(hub.polls(), 1);
    }

    #[test]
    fn init_runs_once_and_reads_follow_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hub = ControllerHub::create()
            .with_backend(Scripted::boxed("a", ButtonMask::empty(), (0, 0), &log))
            .with_backend(Scripted::boxed("b", ButtonMask::empty(), (0, 0), &log))
            .initialize();
        assert_eq!(entries(&log), ["init a", "init b"]);

        hub.poll();
        hub.poll();
        assert_eq!(entries(&log), ["read a", "read b", "read a", "read b"]);

        hub.shutdown();
        assert_eq!(entries(&log), ["shutdown b", "shutdown a"]);
    }

    #[test]
    fn failed_backend_is_not_polled() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let broken = Box::new(Scripted {
            name: "broken",
            buttons: ButtonMask::A,
            stick: (1, 1),
            fail_init: true,
            log: log.clone(),
        });
        let mut hub = ControllerHub::create()
            .with_backend(broken)
            .with_backend(Scripted::boxed("ok", ButtonMask::B, (0, 0), &log))
            .initialize();

        assert_eq!(hub.backend_names(), ["ok"]);
        assert_eq!(hub.poll().buttons, ButtonMask::B);
        assert_eq!(
            entries(&log),
            ["init broken", "shutdown broken", "init ok", "read ok"]
        );
    }

    #[test]
    fn default_assembly_order() {
        let mut config = Config::default();
        config.usb_adapter.enabled = true;
        let hub = assemble(&config, KeyboardHandle::new(config.keyboard.clone()));

        let gamepad = if cfg!(windows) { "xinput" } else { "gilrs" };
        assert_eq!(
            hub.backend_names(),
            ["recorded", gamepad, "usb-adapter", "keyboard"]
        );
    }

    #[test]
    fn disabled_backends_are_left_out() {
        let mut config = Config::default();
        config.recorded.enabled = false;
        config.usb_adapter.enabled = false;
        let hub = assemble(&config, KeyboardHandle::new(config.keyboard.clone()));

        assert_eq!(hub.len(), 2);
        assert_eq!(hub.backend_names().last(), Some(&"keyboard"));
    }
}
