//! USB controller adapters (WUP-028 GameCube adapter, Hyperkin N64 adapter).
//!
//! ```text
//! hotplug thread ──► AdapterRegistry ──► reader thread per adapter
//!                                          │ (SharedPorts, one writer)
//! ControllerHub::poll ──► UsbAdapterBackend::read ◄┘
//! ```
//!
//! A dedicated thread owns the libusb context: it enumerates adapters that are
//! already plugged in, registers for hotplug events where libusb supports
//! them, and pumps libusb events until shutdown. Hotplug events are applied
//! between `handle_events` calls, never from inside the callback.

pub mod calibration;
pub mod payload;
pub mod registry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use rusb::{Context, Hotplug, HotplugBuilder, UsbContext};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use self::calibration::{CurveShape, StickCalibration};
use self::payload::{
    PortSample, ADAPTER_A, ADAPTER_B, ADAPTER_L, ADAPTER_R, ADAPTER_START, ADAPTER_Z,
};
use self::registry::{AdapterRegistry, HotplugHandler, ReaderSettings};
use crate::controller::backend::{BackendError, ControllerBackend};
use crate::pad::{ButtonMask, PadState};

/// Port the game reads from
const PRIMARY_PORT: usize = 0;

const HOTPLUG_POLL: Duration = Duration::from_millis(100);

const C_STICK_LOW: u8 = 0x40;
const C_STICK_HIGH: u8 = 0xc0;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct UsbAdapterSettings {
    pub enabled: bool,
    /// Stick deadzone as a magnitude on the i16 scale
    pub deadzone: u16,
    pub read_timeout_ms: u64,
    pub gamecube_stick: CurveShape,
    pub n64_stick_x: CurveShape,
    pub n64_stick_y: CurveShape,
}

impl Default for UsbAdapterSettings {
    fn default() -> Self {
        Self {
            enabled: cfg!(target_os = "linux"),
            deadzone: 4960,
            read_timeout_ms: 100,
            gamecube_stick: CurveShape::GAMECUBE,
            n64_stick_x: CurveShape::N64_X,
            n64_stick_y: CurveShape::N64_Y,
        }
    }
}

impl UsbAdapterSettings {
    pub fn reader_settings(&self) -> Result<ReaderSettings, BackendError> {
        Ok(ReaderSettings {
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            gamecube: StickCalibration::new(
                self.gamecube_stick,
                self.gamecube_stick,
                self.deadzone,
                false,
            )?,
            n64: StickCalibration::new(self.n64_stick_x, self.n64_stick_y, self.deadzone, true)?,
        })
    }
}

/// Reads port 0 of the most recently attached adapter.
#[derive(Debug)]
pub struct UsbAdapterBackend {
    settings: UsbAdapterSettings,
    registry: Option<Arc<AdapterRegistry>>,
    quit: Arc<AtomicBool>,
    hotplug_thread: Option<JoinHandle<()>>,
    last_sample: Option<PortSample>,
}

impl UsbAdapterBackend {
    pub fn create(settings: UsbAdapterSettings) -> Self {
        Self {
            settings,
            registry: None,
            quit: Arc::new(AtomicBool::new(false)),
            hotplug_thread: None,
            last_sample: None,
        }
    }

    pub fn registry(&self) -> Option<&Arc<AdapterRegistry>> {
        self.registry.as_ref()
    }
}

impl ControllerBackend for UsbAdapterBackend {
    fn name(&self) -> &'static str {
        "usb-adapter"
    }

    fn init(&mut self) -> Result<(), BackendError> {
        info!("Initializing USB adapter support");
        let registry = Arc::new(AdapterRegistry::new(self.settings.reader_settings()?));
        let context = Context::new()?;

        let thread_registry = registry.clone();
        let quit = self.quit.clone();
        let thread = std::thread::Builder::new()
            .name("usb-hotplug".to_string())
            .spawn(move || run_hotplug_loop(context, thread_registry, quit))?;

        self.registry = Some(registry);
        self.hotplug_thread = Some(thread);
        Ok(())
    }

    fn read(&mut self, pad: &mut PadState) {
        let Some(registry) = self.registry.as_ref() else {
            return;
        };

        // A busy registry means a hotplug is in progress; keep the last sample
        if let Some(sample) = registry.try_primary_sample(PRIMARY_PORT) {
            self.last_sample = sample;
        }
        if let Some(sample) = self.last_sample.filter(|sample| sample.connected) {
            apply_sample(&sample, pad);
        }
    }

    fn shutdown(&mut self) {
        self.quit.store(true, Ordering::Release);
        if let Some(thread) = self.hotplug_thread.take() {
            info!("Stopping USB hotplug thread");
            if thread.join().is_err() {
                error!("USB hotplug thread panicked");
            }
        }
        self.last_sample = None;
    }
}

impl Drop for UsbAdapterBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Translates an adapter port sample into pad input.
pub fn apply_sample(sample: &PortSample, pad: &mut PadState) {
    let table = [
        (ADAPTER_START, ButtonMask::START),
        (ADAPTER_Z, ButtonMask::Z),
        (ADAPTER_R, ButtonMask::R),
        (ADAPTER_A, ButtonMask::A),
        (ADAPTER_B, ButtonMask::B),
        (ADAPTER_L, ButtonMask::L),
    ];
    let mut buttons = table
        .iter()
        .filter(|(bit, _)| sample.buttons & bit != 0)
        .fold(ButtonMask::empty(), |mask, (_, button)| mask | *button);

    if sample.c_stick_x < C_STICK_LOW {
        buttons |= ButtonMask::C_LEFT;
    }
    if sample.c_stick_x > C_STICK_HIGH {
        buttons |= ButtonMask::C_RIGHT;
    }
    if sample.c_stick_y < C_STICK_LOW {
        buttons |= ButtonMask::C_DOWN;
    }
    if sample.c_stick_y > C_STICK_HIGH {
        buttons |= ButtonMask::C_UP;
    }

    pad.press(buttons);
    pad.set_stick(i32::from(sample.stick_x), i32::from(sample.stick_y));
}

fn run_hotplug_loop(context: Context, registry: Arc<AdapterRegistry>, quit: Arc<AtomicBool>) {
    match context.devices() {
        Ok(devices) => {
            debug!("Scanning {} USB devices for adapters", devices.len());
            for device in devices.iter() {
                if let Err(e) = registry.add(device) {
                    warn!("Skipping USB device: {}", e);
                }
            }
        }
        Err(e) => error!("Failed to list USB devices: {}", e),
    }

    let (handler, events) = HotplugHandler::channel();
    let registration = if rusb::has_hotplug() {
        let callback: Box<dyn Hotplug<Context>> = Box::new(handler);
        match HotplugBuilder::new().enumerate(false).register(&context, callback) {
            Ok(registration) => Some(registration),
            Err(e) => {
                warn!("Cannot register hotplug callback, hotplugging not enabled: {}", e);
                None
            }
        }
    } else {
        info!("libusb has no hotplug support here, only adapters present at startup are used");
        None
    };

    while !quit.load(Ordering::Acquire) {
        match context.handle_events(Some(HOTPLUG_POLL)) {
            Ok(()) | Err(rusb::Error::Interrupted) => {}
            Err(e) => {
                error!("libusb event handling failed: {}", e);
                break;
            }
        }
        registry.apply_hotplug_events(&events);
    }

    // Dropping the registration deregisters the callback
    drop(registration);
    registry.clear();
    info!("USB hotplug thread finished");
}
