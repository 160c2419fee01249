//! Connected adapters and their reader threads.
//!
//! Each adapter owns one reader thread, the only writer of that adapter's
//! [`SharedPorts`]. The registry keeps adapters newest first; removing an
//! adapter stops its thread and closes its handle.
//!
//! libusb calls [`HotplugHandler`] while it holds the event lock, and reader
//! threads need that lock to complete or time out a transfer. The handler only
//! queues [`HotplugEvent`]s; the hotplug thread applies them with
//! [`AdapterRegistry::apply_hotplug_events`] once `handle_events` returns.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::JoinHandle;
use std::time::Duration;

use rusb::{Context, Device, DeviceHandle, Hotplug, UsbContext};
use tracing::{debug, error, info, warn};

use super::calibration::StickCalibration;
use super::payload::{AdapterModel, PayloadDecoder, PortSample, SharedPorts, WUP_PAYLOAD_LEN};
use crate::controller::backend::BackendError;

const EP_IN: u8 = 0x81;
const EP_OUT: u8 = 0x02;
const INTERFACE: u8 = 0;

/// Tells the adapter to start streaming input reports
const START_POLLING: u8 = 0x13;
/// Rumble command with every motor off
const RUMBLE_OFF: [u8; 5] = [0x11, 0, 0, 0, 0];

/// Identity of a USB device for as long as it stays plugged in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceKey {
    pub bus: u8,
    pub address: u8,
}

impl DeviceKey {
    pub fn of<T: UsbContext>(device: &Device<T>) -> Self {
        Self {
            bus: device.bus_number(),
            address: device.address(),
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}:{:03}", self.bus, self.address)
    }
}

#[derive(Debug, Clone)]
pub struct ReaderSettings {
    pub read_timeout: Duration,
    pub gamecube: StickCalibration,
    pub n64: StickCalibration,
}

#[derive(Debug)]
struct AdapterEntry {
    key: DeviceKey,
    model: AdapterModel,
    ports: Arc<SharedPorts>,
    quit: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AdapterEntry {
    /// A reader that hit a transfer error has exited while still registered
    fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    fn stop(&mut self) {
        self.quit.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Reader thread of adapter {} panicked", self.key);
            }
        }
    }
}

impl Drop for AdapterEntry {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug)]
pub struct AdapterRegistry {
    adapters: Mutex<VecDeque<AdapterEntry>>,
    settings: ReaderSettings,
}

impl AdapterRegistry {
    pub fn new(settings: ReaderSettings) -> Self {
        Self {
            adapters: Mutex::new(VecDeque::new()),
            settings,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: DeviceKey) -> bool {
        self.lock().iter().any(|entry| entry.key == key)
    }

    /// Opens `device` and starts its reader thread if it is a known adapter.
    ///
    /// Returns `Ok(false)` for devices that are not adapters or already registered.
    pub fn add(&self, device: Device<Context>) -> Result<bool, BackendError> {
        let descriptor = device.device_descriptor()?;
        let (vendor_id, product_id) = (descriptor.vendor_id(), descriptor.product_id());
        let Some(model) = AdapterModel::identify(vendor_id, product_id) else {
            return Ok(false);
        };

        let key = DeviceKey::of(&device);
        if self.contains(key) {
            debug!("Adapter {} already registered", key);
            return Ok(false);
        }
        info!(
            "Recognized adapter {:04x}:{:04x} ({:?}) at {}",
            vendor_id, product_id, model, key
        );

        let handle = open_adapter(&device)?;
        let ports = Arc::new(SharedPorts::default());
        let quit = Arc::new(AtomicBool::new(false));
        let reader = AdapterReader {
            key,
            handle,
            decoder: PayloadDecoder::new(self.settings.gamecube, self.settings.n64),
            ports: ports.clone(),
            quit: quit.clone(),
            read_timeout: self.settings.read_timeout,
        };

        let thread = std::thread::Builder::new()
            .name(format!("usb-adapter-{}", key))
            .spawn(move || reader.run())?;

        self.insert(AdapterEntry {
            key,
            model,
            ports,
            quit,
            thread: Some(thread),
        });
        info!("Adapter {} connected", key);
        Ok(true)
    }

    fn insert(&self, entry: AdapterEntry) {
        self.lock().push_front(entry);
    }

    /// Stops and forgets the adapter at `key`. Unknown keys are ignored.
    pub fn remove(&self, key: DeviceKey) -> bool {
        // Join outside the lock so the poll path never waits on a transfer
        let removed = {
            let mut adapters = self.lock();
            adapters
                .iter()
                .position(|entry| entry.key == key)
                .and_then(|index| adapters.remove(index))
        };

        match removed {
            Some(mut entry) => {
                entry.stop();
                info!("Adapter {} ({:?}) disconnected", entry.key, entry.model);
                true
            }
            None => {
                debug!("Ignoring removal of unknown device {}", key);
                false
            }
        }
    }

    pub fn clear(&self) {
        let adapters: Vec<AdapterEntry> = self.lock().drain(..).collect();
        for mut entry in adapters {
            entry.stop();
            info!("Adapter {} ({:?}) released", entry.key, entry.model);
        }
    }

    /// Applies queued hotplug events. Returns how many were handled.
    ///
    /// Must not be called from inside a libusb callback.
    pub fn apply_hotplug_events(&self, events: &Receiver<HotplugEvent>) -> usize {
        let mut handled = 0;
        for event in events.try_iter() {
            match event {
                HotplugEvent::Arrived(device) => {
                    if let Err(e) = self.add(device) {
                        error!("Failed to add hotplugged adapter: {}", e);
                    }
                }
                HotplugEvent::Left(key) => {
                    self.remove(key);
                }
            }
            handled += 1;
        }
        handled
    }

    /// Latest sample of `port` on the newest adapter whose reader is running.
    ///
    /// Never blocks: returns `None` while another thread holds the registry.
    pub fn try_primary_sample(&self, port: usize) -> Option<Option<PortSample>> {
        let sample = |adapters: &VecDeque<AdapterEntry>| {
            adapters
                .iter()
                .find(|entry| entry.is_running())
                .map(|entry| entry.ports.load(port))
        };
        match self.adapters.try_lock() {
            Ok(adapters) => Some(sample(&*adapters)),
            Err(TryLockError::Poisoned(poisoned)) => Some(sample(&*poisoned.into_inner())),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<AdapterEntry>> {
        self.adapters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers an adapter backed by `ports` whose reader only waits for quit.
    #[cfg(test)]
    pub(crate) fn insert_idle(&self, key: DeviceKey, ports: Arc<SharedPorts>) -> Arc<AtomicBool> {
        let quit = Arc::new(AtomicBool::new(false));
        let thread_quit = quit.clone();
        let thread = std::thread::spawn(move || {
            while !thread_quit.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(1));
            }
        });
        self.insert(AdapterEntry {
            key,
            model: AdapterModel::Wup028,
            ports,
            quit: quit.clone(),
            thread: Some(thread),
        });
        quit
    }

    /// Keeps the registry locked until the returned guard is dropped.
    #[cfg(test)]
    pub(crate) fn hold(&self) -> impl Sized + '_ {
        self.lock()
    }
}

fn open_adapter(device: &Device<Context>) -> Result<DeviceHandle<Context>, BackendError> {
    let mut handle = device.open().map_err(|e| {
        log_open_error(e);
        e
    })?;

    if handle.kernel_driver_active(INTERFACE).unwrap_or(false) {
        warn!("Detaching kernel driver from adapter {}", DeviceKey::of(device));
        handle.detach_kernel_driver(INTERFACE)?;
    }
    handle.claim_interface(INTERFACE)?;
    Ok(handle)
}

fn log_open_error(e: rusb::Error) {
    match e {
        rusb::Error::Access if cfg!(target_os = "linux") => error!(
            "Permission denied opening USB adapter. Add a udev rule such as \
             SUBSYSTEM==\"usb\", ATTRS{{idVendor}}==\"057e\", ATTRS{{idProduct}}==\"0337\", MODE=\"0666\" \
             and replug the adapter"
        ),
        rusb::Error::NotSupported if cfg!(windows) => {
            error!("USB adapter needs the WinUSB driver (install it with Zadig)")
        }
        e => error!("Failed to open USB adapter: {}", e),
    }
}

/// State owned by one adapter's reader thread
struct AdapterReader {
    key: DeviceKey,
    handle: DeviceHandle<Context>,
    decoder: PayloadDecoder,
    ports: Arc<SharedPorts>,
    quit: Arc<AtomicBool>,
    read_timeout: Duration,
}

impl AdapterReader {
    fn run(mut self) {
        debug!("Reader for adapter {} started", self.key);

        match self
            .handle
            .write_interrupt(EP_OUT, &[START_POLLING], self.read_timeout)
        {
            Ok(1) => {}
            Ok(n) => {
                error!("Start command to adapter {}: {}/1 bytes transferred", self.key, n);
                return;
            }
            Err(e) => {
                error!("Start command to adapter {} failed: {}", self.key, e);
                return;
            }
        }

        let mut payload = [0u8; WUP_PAYLOAD_LEN];
        let mut rumble_sent = [0u8; RUMBLE_OFF.len()];

        while !self.quit.load(Ordering::Acquire) {
            let size = match self
                .handle
                .read_interrupt(EP_IN, &mut payload, self.read_timeout)
            {
                Ok(size) => size,
                Err(rusb::Error::Timeout) => continue,
                Err(e) => {
                    error!("Interrupt transfer from adapter {} failed: {}", self.key, e);
                    break;
                }
            };

            if !self.decoder.decode(&payload[..size]) {
                continue;
            }
            self.ports.publish(self.decoder.ports());

            if size == WUP_PAYLOAD_LEN && rumble_sent != RUMBLE_OFF {
                if let Err(e) = self
                    .handle
                    .write_interrupt(EP_OUT, &RUMBLE_OFF, self.read_timeout)
                {
                    error!("Rumble command to adapter {} failed: {}", self.key, e);
                    break;
                }
                rumble_sent = RUMBLE_OFF;
            }
        }

        self.decoder.disconnect_all();
        self.ports.publish(self.decoder.ports());
        debug!("Reader for adapter {} stopped", self.key);
    }
}

#[derive(Debug)]
pub enum HotplugEvent {
    Arrived(Device<Context>),
    Left(DeviceKey),
}

/// Queues libusb arrival and removal events for the hotplug thread
pub struct HotplugHandler {
    events: Sender<HotplugEvent>,
}

impl HotplugHandler {
    pub fn channel() -> (Self, Receiver<HotplugEvent>) {
        let (events, receiver) = mpsc::channel();
        (Self { events }, receiver)
    }

    fn queue(&self, event: HotplugEvent) {
        if self.events.send(event).is_err() {
            warn!("Hotplug event dropped, hotplug thread is gone");
        }
    }
}

impl Hotplug<Context> for HotplugHandler {
    fn device_arrived(&mut self, device: Device<Context>) {
        self.queue(HotplugEvent::Arrived(device));
    }

    fn device_left(&mut self, device: Device<Context>) {
        self.queue(HotplugEvent::Left(DeviceKey::of(&device)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::calibration::CurveShape;
    use crate::adapter::payload::{ControllerKind, PortState, PORT_COUNT};

    fn registry() -> AdapterRegistry {
        let calibration =
            StickCalibration::new(CurveShape::GAMECUBE, CurveShape::GAMECUBE, 4960, false)
                .unwrap();
        AdapterRegistry::new(ReaderSettings {
            read_timeout: Duration::from_millis(10),
            gamecube: calibration,
            n64: calibration,
        })
    }

    fn wired_port(buttons: u16) -> Arc<SharedPorts> {
        let ports = Arc::new(SharedPorts::default());
        let mut state = [PortState::default(); PORT_COUNT];
        state[0].kind = Some(ControllerKind::Wired);
        state[0].buttons = buttons;
        ports.publish(&state);
        ports
    }

    fn fake_adapter(registry: &AdapterRegistry, address: u8, buttons: u16) -> Arc<AtomicBool> {
        registry.insert_idle(DeviceKey { bus: 1, address }, wired_port(buttons))
    }

    #[test]
    fn removing_unknown_device_is_a_no_op() {
        let registry = registry();
        assert!(!registry.remove(DeviceKey { bus: 1, address: 9 }));

        fake_adapter(&registry, 2, 0);
        assert!(!registry.remove(DeviceKey { bus: 1, address: 9 }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn removal_stops_the_reader_thread() {
        let registry = registry();
        let quit = fake_adapter(&registry, 2, 0);

        assert!(registry.remove(DeviceKey { bus: 1, address: 2 }));
        assert!(quit.load(Ordering::Acquire));
        assert!(registry.is_empty());
        assert!(!registry.remove(DeviceKey { bus: 1, address: 2 }));
    }

    #[test]
    fn newest_adapter_supplies_the_sample() {
        let registry = registry();
        fake_adapter(&registry, 2, 0x0100);
        fake_adapter(&registry, 3, 0x0200);

        let sample = registry.try_primary_sample(0).unwrap().unwrap();
        assert_eq!(sample.buttons, 0x0200);

        registry.remove(DeviceKey { bus: 1, address: 3 });
        let sample = registry.try_primary_sample(0).unwrap().unwrap();
        assert_eq!(sample.buttons, 0x0100);
    }

    #[test]
    fn empty_registry_has_no_sample() {
        let registry = registry();
        assert_eq!(registry.try_primary_sample(0), Some(None));
    }

    #[test]
    fn queued_removal_is_applied_outside_the_callback() {
        let registry = registry();
        let quit = fake_adapter(&registry, 2, 0);
        let (handler, events) = HotplugHandler::channel();

        handler.queue(HotplugEvent::Left(DeviceKey { bus: 1, address: 2 }));
        handler.queue(HotplugEvent::Left(DeviceKey { bus: 1, address: 7 }));
        assert_eq!(registry.len(), 1);
        assert!(!quit.load(Ordering::Acquire));

        assert_eq!(registry.apply_hotplug_events(&events), 2);
        assert!(quit.load(Ordering::Acquire));
        assert!(registry.is_empty());
        assert_eq!(registry.apply_hotplug_events(&events), 0);
    }

    #[test]
    fn exited_reader_does_not_hide_older_adapter() {
        let registry = registry();
        fake_adapter(&registry, 2, 0x0100);

        let thread = std::thread::spawn(|| {});
        while !thread.is_finished() {
            std::thread::sleep(Duration::from_millis(1));
        }
        registry.insert(AdapterEntry {
            key: DeviceKey { bus: 1, address: 3 },
            model: AdapterModel::HyperkinN64,
            ports: wired_port(0x0200),
            quit: Arc::new(AtomicBool::new(false)),
            thread: Some(thread),
        });

        let sample = registry.try_primary_sample(0).unwrap().unwrap();
        assert_eq!(sample.buttons, 0x0100);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn clear_stops_every_adapter() {
        let registry = registry();
        let first = fake_adapter(&registry, 2, 0);
        let second = fake_adapter(&registry, 3, 0);

        registry.clear();
        assert!(registry.is_empty());
        assert!(first.load(Ordering::Acquire));
        assert!(second.load(Ordering::Acquire));
    }
}
