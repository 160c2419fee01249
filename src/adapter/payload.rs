//! Decoding of adapter interrupt payloads into per-port state.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use super::calibration::StickCalibration;

pub const PORT_COUNT: usize = 4;

/// Length of a WUP-028 input report
pub const WUP_PAYLOAD_LEN: usize = 37;
/// First byte of a WUP-028 input report
pub const WUP_REPORT_ID: u8 = 0x21;
/// Length of a Hyperkin N64 input report
pub const HYPERKIN_PAYLOAD_LEN: usize = 8;

const PORT_RECORD_LEN: usize = 9;

const STATE_NORMAL: u8 = 0x10;
const STATE_WAVEBIRD: u8 = 0x20;
const STATE_EXTRA_POWER: u8 = 0x04;

// Adapter button bits as consumed by the main read path
pub const ADAPTER_START: u16 = 0x0001;
pub const ADAPTER_R: u16 = 0x0004;
pub const ADAPTER_Z: u16 = 0x0008;
pub const ADAPTER_A: u16 = 0x0100;
pub const ADAPTER_B: u16 = 0x0200;
pub const ADAPTER_L: u16 = 0x1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerKind {
    Wired,
    Wavebird,
}

impl ControllerKind {
    fn from_status(status: u8) -> Option<Self> {
        match status & (STATE_NORMAL | STATE_WAVEBIRD) {
            STATE_NORMAL => Some(Self::Wired),
            STATE_WAVEBIRD => Some(Self::Wavebird),
            _ => None,
        }
    }
}

/// Decoded state of one adapter port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortState {
    pub kind: Option<ControllerKind>,
    pub extra_power: bool,
    pub buttons: u16,
    pub axis: [u8; 6],
    pub stick_x: i8,
    pub stick_y: i8,
}

impl PortState {
    pub fn connected(&self) -> bool {
        self.kind.is_some()
    }

    pub fn sample(&self) -> PortSample {
        PortSample {
            connected: self.connected(),
            buttons: self.buttons,
            c_stick_x: self.axis[2],
            c_stick_y: self.axis[3],
            stick_x: self.stick_x,
            stick_y: self.stick_y,
        }
    }
}

/// The part of a port the game consumes, small enough to publish atomically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortSample {
    pub connected: bool,
    pub buttons: u16,
    pub c_stick_x: u8,
    pub c_stick_y: u8,
    pub stick_x: i8,
    pub stick_y: i8,
}

impl PortSample {
    fn pack(&self) -> u64 {
        u64::from(self.buttons)
            | u64::from(self.c_stick_x) << 16
            | u64::from(self.c_stick_y) << 24
            | u64::from(self.stick_x as u8) << 32
            | u64::from(self.stick_y as u8) << 40
            | u64::from(self.connected) << 48
    }

    fn unpack(word: u64) -> Self {
        Self {
            buttons: word as u16,
            c_stick_x: (word >> 16) as u8,
            c_stick_y: (word >> 24) as u8,
            stick_x: (word >> 32) as u8 as i8,
            stick_y: (word >> 40) as u8 as i8,
            connected: (word >> 48) & 1 == 1,
        }
    }
}

/// Latest samples of all ports, written by one reader thread and read by anyone
#[derive(Debug, Default)]
pub struct SharedPorts {
    ports: [AtomicU64; PORT_COUNT],
}

impl SharedPorts {
    pub fn publish(&self, ports: &[PortState; PORT_COUNT]) {
        for (slot, port) in self.ports.iter().zip(ports) {
            slot.store(port.sample().pack(), Ordering::Release);
        }
    }

    pub fn load(&self, port: usize) -> PortSample {
        PortSample::unpack(self.ports[port].load(Ordering::Acquire))
    }
}

/// Which kind of device produced a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterModel {
    Wup028,
    HyperkinN64,
}

impl AdapterModel {
    pub fn identify(vendor_id: u16, product_id: u16) -> Option<Self> {
        match (vendor_id, product_id) {
            (0x057e, 0x0337) => Some(Self::Wup028),
            (0x20d6, 0xa710) => Some(Self::HyperkinN64),
            _ => None,
        }
    }
}

/// Port state of one adapter plus the calibration used to fill in the sticks
#[derive(Debug, Clone)]
pub struct PayloadDecoder {
    ports: [PortState; PORT_COUNT],
    gamecube: StickCalibration,
    n64: StickCalibration,
}

impl PayloadDecoder {
    pub fn new(gamecube: StickCalibration, n64: StickCalibration) -> Self {
        Self {
            ports: [PortState::default(); PORT_COUNT],
            gamecube,
            n64,
        }
    }

    pub fn ports(&self) -> &[PortState; PORT_COUNT] {
        &self.ports
    }

    pub fn disconnect_all(&mut self) {
        self.ports = [PortState::default(); PORT_COUNT];
    }

    /// Decodes a report of `payload.len()` bytes. Returns `false` for reports
    /// that are neither a WUP nor a Hyperkin frame.
    pub fn decode(&mut self, payload: &[u8]) -> bool {
        match payload.len() {
            HYPERKIN_PAYLOAD_LEN => {
                self.decode_hyperkin(payload);
                true
            }
            WUP_PAYLOAD_LEN if payload[0] == WUP_REPORT_ID => {
                self.decode_wup(payload);
                true
            }
            len => {
                debug!("Ignoring {} byte payload", len);
                false
            }
        }
    }

    fn decode_wup(&mut self, payload: &[u8]) {
        for (i, record) in payload[1..]
            .chunks_exact(PORT_RECORD_LEN)
            .take(PORT_COUNT)
            .enumerate()
        {
            let port = &mut self.ports[i];
            let status = record[0];
            let kind = ControllerKind::from_status(status);

            match (port.kind, kind) {
                (_, None) => {
                    if port.connected() {
                        debug!("Controller on port {} unplugged", i + 1);
                    }
                    *port = PortState::default();
                    continue;
                }
                (None, Some(kind)) => debug!("{:?} controller on port {} plugged in", kind, i + 1),
                (Some(old), Some(new)) if old != new => {
                    warn!("Controller on port {} changed type from {:?} to {:?}", i + 1, old, new);
                }
                _ => {}
            }

            port.kind = kind;
            port.extra_power = status & STATE_EXTRA_POWER != 0;
            port.buttons = u16::from(record[1]) << 8 | u16::from(record[2]);
            port.axis.copy_from_slice(&record[3..9]);
            (port.stick_x, port.stick_y) = self.gamecube.map(port.axis[0], port.axis[1]);
        }
    }

    fn decode_hyperkin(&mut self, payload: &[u8]) {
        let port = &mut self.ports[0];
        if !port.connected() {
            debug!("N64 controller on Hyperkin adapter detected");
        }
        port.kind = Some(ControllerKind::Wired);
        port.extra_power = false;

        let main = u16::from(payload[0]);
        port.buttons = (main & 0x40) >> 3 // Z
            | (main & 0x20) >> 3 // R
            | (main & 0x10) << 8 // L
            | (main & 0x04) << 6 // A
            | (main & 0x02) << 8 // B
            | (u16::from(payload[1]) & 0x02) >> 1; // START

        port.axis = [
            payload[3],
            payload[4],
            payload[5],
            255 - payload[6],
            0,
            0,
        ];
        (port.stick_x, port.stick_y) = self.n64.map(payload[3], payload[4]);
    }
}
