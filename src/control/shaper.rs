// Stick shaping: raw 0-255 axis sample -> dead-zoned, curved intent in [-1, 1]

use crate::config::AxisConfig;

/// Raw value of a centered stick
pub const RAW_CENTER: f32 = 127.0;
const RAW_HALF_SPAN: f32 = 128.0;

/// Apply a response curve: sign(x) * |x|^curve
///
/// `curve > 1` flattens small inputs for fine control near zero,
/// `curve == 1` is linear.
pub fn curve(value: f32, factor: f32) -> f32 {
    if value == 0.0 {
        return 0.0;
    }
    value.signum() * value.abs().powf(factor)
}

/// Shape a raw axis sample into a normalized intent.
///
/// Inside the dead zone the output is exactly `0.0` so stick noise and
/// center drift never creep an actuator.
pub fn shape(raw: u8, deadzone: f32, curve_factor: f32, invert: bool) -> f32 {
    let mut n = (raw as f32 - RAW_CENTER) / RAW_HALF_SPAN;
    if invert {
        n = -n;
    }

    if n.abs() < deadzone {
        return 0.0;
    }

    curve(n, curve_factor).clamp(-1.0, 1.0)
}

/// Shaper bound to one configured axis
#[derive(Debug, Clone, Copy)]
pub struct AxisShaper {
    config: AxisConfig,
}

impl AxisShaper {
    pub fn new(config: AxisConfig) -> Self {
        Self { config }
    }

    pub fn code(&self) -> u16 {
        self.config.code
    }

    pub fn shape(&self, raw: u8) -> f32 {
        shape(
            raw,
            self.config.deadzone,
            self.config.curve,
            self.config.invert,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadzone_is_exact_zero() {
        // 0.08 * 128 = 10.24 counts either side of 127
        for raw in 117..=137u8 {
            assert_eq!(shape(raw, 0.08, 1.5, false), 0.0, "raw {}", raw);
            assert_eq!(shape(raw, 0.08, 1.5, true), 0.0, "raw {} inverted", raw);
        }
    }

    #[test]
    fn test_table() {
        let cases: [(u8, f32, f32, bool, f32); 6] = [
            (255, 0.0, 1.0, false, 1.0),
            (255, 0.0, 1.0, true, -1.0),
            (191, 0.0, 1.0, false, 0.5),
            (191, 0.0, 2.0, false, 0.25),
            (63, 0.0, 2.0, false, -0.25),
            (0, 0.1, 1.0, false, -127.0 / 128.0),
        ];

        for (raw, deadzone, factor, invert, expected) in cases {
            let out = shape(raw, deadzone, factor, invert);
            assert!(
                (out - expected).abs() < 1e-6,
                "shape({}, {}, {}, {}) = {}, expected {}",
                raw,
                deadzone,
                factor,
                invert,
                out,
                expected
            );
        }
    }

    #[test]
    fn test_monotonic_outside_deadzone() {
        let deadzone = 0.08;
        let mut prev = 0.0f32;
        for raw in 138..=255u8 {
            let out = shape(raw, deadzone, 1.7, false);
            assert!(out >= prev, "not non-decreasing at raw {}", raw);
            prev = out;
        }

        let mut prev = 0.0f32;
        for raw in (0..=116u8).rev() {
            let out = shape(raw, deadzone, 1.7, false);
            assert!(out <= prev, "not non-increasing at raw {}", raw);
            prev = out;
        }
    }

    #[test]
    fn test_output_bounded() {
        for raw in 0..=255u8 {
            let out = shape(raw, 0.0, 0.5, false);
            assert!((-1.0..=1.0).contains(&out));
        }
    }

    #[test]
    fn test_curve_preserves_sign() {
        assert_eq!(curve(0.0, 3.0), 0.0);
        assert!(curve(-0.5, 3.0) < 0.0);
        assert!((curve(-1.0, 3.0) + 1.0).abs() < 1e-6);
    }
}
