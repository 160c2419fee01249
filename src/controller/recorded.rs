//! Replays a recorded Mupen64 `.m64` input movie.
//!
//! Layout: a 0x400-byte header followed by one 4-byte frame per input tick
//! (big-endian button mask, stick x, stick y).

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::backend::{BackendError, ControllerBackend};
use crate::pad::{ButtonMask, PadState};

pub const M64_HEADER_LEN: usize = 0x400;
pub const M64_FRAME_LEN: usize = 4;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RecordedSettings {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for RecordedSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("cont.m64"),
        }
    }
}

#[derive(Debug)]
pub struct RecordedInput {
    path: PathBuf,
    movie: Option<BufReader<File>>,
    frame: u64,
}

impl RecordedInput {
    pub fn create(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            movie: None,
            frame: 0,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.movie.is_some()
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    fn finish(&mut self, reason: &str) {
        info!(
            "Replay {} ended after {} frames: {}",
            self.path.display(),
            self.frame,
            reason
        );
        self.movie = None;
    }
}

impl ControllerBackend for RecordedInput {
    fn name(&self) -> &'static str {
        "recorded"
    }

    fn init(&mut self) -> Result<(), BackendError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No replay at {}", self.path.display());
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let mut movie = BufReader::new(file);
        let mut header = [0u8; M64_HEADER_LEN];
        match movie.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                warn!("Replay {} is shorter than its header", self.path.display());
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        info!("Playing back recorded input from {}", self.path.display());
        self.movie = Some(movie);
        self.frame = 0;
        Ok(())
    }

    fn read(&mut self, pad: &mut PadState) {
        let Some(movie) = self.movie.as_mut() else {
            return;
        };

        let mut frame = [0u8; M64_FRAME_LEN];
        if let Err(e) = movie.read_exact(&mut frame) {
            let reason = if e.kind() == io::ErrorKind::UnexpectedEof {
                "end of file".to_string()
            } else {
                e.to_string()
            };
            self.finish(&reason);
            return;
        }
        self.frame += 1;

        let buttons = u16::from_be_bytes([frame[0], frame[1]]);
        pad.press(ButtonMask::from_bits_retain(buttons));
        pad.set_stick(i32::from(frame[2] as i8), i32::from(frame[3] as i8));
    }
}
