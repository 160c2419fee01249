//! Piecewise-linear stick calibration for USB adapter payloads.
//!
//! Each axis maps a raw payload byte through six breakpoints:
//!
//! ```text
//! raw:  c-extreme  c-incline  c-dead | c+dead  c+incline  c+extreme
//! out:     -80        -40        0   |   0        40         80
//! ```
//!
//! Bytes below the first breakpoint map to the first output, bytes above the
//! last to the last output. Inverted axes swap the sign of every output.
//! Fractional outputs round toward negative infinity.

use serde::{Deserialize, Serialize};

use crate::pad::STICK_LIMIT;

/// Payload byte of a centred stick
pub const AXIS_CENTER: f32 = 128.0;

const INCLINE_OUTPUT: f32 = 40.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalibrationError {
    #[error("breakpoints must satisfy deadzone ({dead}) < incline ({incline}) < extreme ({extreme}) <= 128")]
    BreakpointOrder {
        dead: f32,
        incline: f32,
        extreme: f32,
    },
}

/// Offsets from the centre for one axis, in payload units
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
pub struct CurveShape {
    pub extreme: u8,
    pub incline: u8,
}

impl CurveShape {
    pub const GAMECUBE: Self = Self {
        extreme: 54,
        incline: 27,
    };
    pub const N64_X: Self = Self {
        extreme: 103,
        incline: 57,
    };
    pub const N64_Y: Self = Self {
        extreme: 101,
        incline: 57,
    };
}

/// Converts an i16-scale deadzone into payload units.
pub fn deadzone_offset(deadzone: u16) -> f32 {
    AXIS_CENTER * f32::from(deadzone) / 32768.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisCurve {
    src: [f32; 6],
    dst: [f32; 6],
}

impl AxisCurve {
    pub fn new(shape: CurveShape, deadzone: u16, inverted: bool) -> Result<Self, CalibrationError> {
        let dead = deadzone_offset(deadzone);
        let incline = f32::from(shape.incline);
        let extreme = f32::from(shape.extreme);

        if !(dead < incline && incline < extreme && extreme <= AXIS_CENTER) {
            return Err(CalibrationError::BreakpointOrder {
                dead,
                incline,
                extreme,
            });
        }

        let limit = f32::from(STICK_LIMIT);
        let sign = if inverted { -1.0 } else { 1.0 };
        Ok(Self {
            src: [
                AXIS_CENTER - extreme,
                AXIS_CENTER - incline,
                AXIS_CENTER - dead,
                AXIS_CENTER + dead,
                AXIS_CENTER + incline,
                AXIS_CENTER + extreme,
            ],
            dst: [
                -limit * sign,
                -INCLINE_OUTPUT * sign,
                0.0,
                0.0,
                INCLINE_OUTPUT * sign,
                limit * sign,
            ],
        })
    }

    pub fn map(&self, raw: u8) -> i8 {
        let value = f32::from(raw);

        let out = if value < self.src[0] {
            self.dst[0]
        } else if let Some(i) = (0..5).find(|&i| value < self.src[i + 1]) {
            let (x0, x1) = (self.src[i], self.src[i + 1]);
            let (y0, y1) = (self.dst[i], self.dst[i + 1]);
            (value - x0) / (x1 - x0) * (y1 - y0) + y0
        } else {
            self.dst[5]
        };

        // Rounded down on the unsigned byte scale, i.e. floored
        let limit = f32::from(STICK_LIMIT);
        ((out + AXIS_CENTER).trunc() - AXIS_CENTER).clamp(-limit, limit) as i8
    }
}

/// Calibration for both stick axes of one adapter model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StickCalibration {
    pub x: AxisCurve,
    pub y: AxisCurve,
}

impl StickCalibration {
    pub fn new(
        shape_x: CurveShape,
        shape_y: CurveShape,
        deadzone: u16,
        invert_y: bool,
    ) -> Result<Self, CalibrationError> {
        Ok(Self {
            x: AxisCurve::new(shape_x, deadzone, false)?,
            y: AxisCurve::new(shape_y, deadzone, invert_y)?,
        })
    }

    pub fn map(&self, raw_x: u8, raw_y: u8) -> (i8, i8) {
        (self.x.map(raw_x), self.y.map(raw_y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n64_curve(inverted: bool) -> AxisCurve {
        AxisCurve::new(CurveShape::N64_X, 4960, inverted).unwrap()
    }

    #[test]
    fn mapping_is_monotonic_and_bounded() {
        for (shape, inverted) in [
            (CurveShape::N64_X, false),
            (CurveShape::N64_X, true),
            (CurveShape::GAMECUBE, false),
        ] {
            let curve = AxisCurve::new(shape, 4960, inverted).unwrap();
            let outputs: Vec<i8> = (0..=255u8).map(|raw| curve.map(raw)).collect();
            for pair in outputs.windows(2) {
                if inverted {
                    assert!(pair[0] >= pair[1], "{:?} not non-increasing", pair);
                } else {
                    assert!(pair[0] <= pair[1], "{:?} not non-decreasing", pair);
                }
            }
            assert!(outputs.iter().all(|v| (-80..=80).contains(v)));
        }
    }

    #[test]
    fn extremes_saturate() {
        let curve = n64_curve(false);
        assert_eq!(curve.map(0), -80);
        assert_eq!(curve.map(255), 80);
        assert_eq!(curve.map(128 + 103), 80);
    }

    #[test]
    fn incline_breakpoint_maps_to_forty() {
        let curve = n64_curve(false);
        assert_eq!(curve.map(128 + 57), 40);
        assert_eq!(curve.map(128 - 57), -40);
    }

    #[test]
    fn deadzone_region_is_neutral() {
        // 4960 on the i16 scale is a little over 19 payload units
        let curve = n64_curve(false);
        for raw in 109..=147u8 {
            assert_eq!(curve.map(raw), 0, "raw {}", raw);
        }
        assert_ne!(curve.map(150), 0);
    }

    #[test]
    fn fractional_outputs_round_down() {
        let curve = n64_curve(false);
        assert_eq!(curve.map(100), -10);
        assert_eq!(curve.map(26), -80);
        assert_eq!(curve.map(108), -1);
        assert_eq!(curve.map(160), 13);
    }

    #[test]
    fn inverted_axis_flips_sign() {
        let curve = n64_curve(true);
        assert_eq!(curve.map(0), 80);
        assert_eq!(curve.map(255), -80);
    }

    #[test]
    fn zero_deadzone_is_accepted() {
        let curve = AxisCurve::new(CurveShape::GAMECUBE, 0, false).unwrap();
        assert_eq!(curve.map(128), 0);
        assert_eq!(curve.map(129), 1);
    }

    #[test]
    fn deadzone_wider_than_incline_is_rejected() {
        let err = AxisCurve::new(CurveShape::GAMECUBE, 10000, false).unwrap_err();
        assert!(matches!(err, CalibrationError::BreakpointOrder { .. }));
    }

    #[test]
    fn stick_calibration_maps_both_axes() {
        let calibration =
            StickCalibration::new(CurveShape::N64_X, CurveShape::N64_Y, 4960, true).unwrap();
        assert_eq!(calibration.map(128, 127), (0, 0));
        assert_eq!(calibration.map(255, 0), (80, 80));
    }
}
