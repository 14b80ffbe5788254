// Arcade mixing for the two-wheel base, with straight-line drift correction
//
// left  = forward + turn
// right = forward - turn

use serde::{Deserialize, Serialize};

use super::shaper::curve;
use crate::config::DriveConfig;

/// How strongly to correct drift during commanded straight-line motion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum DriftPolicy {
    Off,
    /// Same offset at every speed
    Constant { offset: f32 },
    /// `gain / |forward|`, capped at `max`: strong at crawl speed, tapering at full speed
    InverseSpeed { gain: f32, max: f32 },
}

impl DriftPolicy {
    /// Correction magnitude for a given forward intent
    pub fn magnitude(&self, forward: f32) -> f32 {
        match *self {
            DriftPolicy::Off => 0.0,
            DriftPolicy::Constant { offset } => offset,
            DriftPolicy::InverseSpeed { gain, max } => {
                let speed = forward.abs();
                if speed <= f32::EPSILON {
                    max
                } else {
                    (gain / speed).min(max)
                }
            }
        }
    }
}

/// Which way the vehicle pulls when both wheels get the same command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftBias {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy)]
pub struct DriveMixer {
    straight_threshold: f32,
    curve: f32,
    drift: DriftPolicy,
    bias: DriftBias,
}

impl DriveMixer {
    pub fn new(config: &DriveConfig) -> Self {
        Self {
            straight_threshold: config.straight_threshold,
            curve: config.curve,
            drift: config.drift,
            bias: config.drift_bias,
        }
    }

    /// Per-wheel drift offset (left, right). Zero unless driving straight.
    pub fn drift_correction(&self, forward: f32, turn: f32) -> (f32, f32) {
        let straight =
            forward.abs() > self.straight_threshold && turn.abs() <= self.straight_threshold;
        if !straight {
            return (0.0, 0.0);
        }

        // Push the lagging wheel harder in the direction of travel
        let c = self.drift.magnitude(forward) * forward.signum();
        match self.bias {
            DriftBias::Left => (c, -c),
            DriftBias::Right => (-c, c),
        }
    }

    /// Mix forward/turn intents into normalized (left, right) wheel values
    pub fn mix(&self, forward: f32, turn: f32) -> (f32, f32) {
        let left = (forward + turn).clamp(-1.0, 1.0);
        let right = (forward - turn).clamp(-1.0, 1.0);

        let (dl, dr) = self.drift_correction(forward, turn);
        let left = (left + dl).clamp(-1.0, 1.0);
        let right = (right + dr).clamp(-1.0, 1.0);

        (curve(left, self.curve), curve(right, self.curve))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixer(drift: DriftPolicy, bias: DriftBias, curve: f32) -> DriveMixer {
        DriveMixer::new(&DriveConfig {
            straight_threshold: 0.1,
            curve,
            drift,
            drift_bias: bias,
            ..DriveConfig::default()
        })
    }

    #[test]
    fn test_arcade_mix() {
        let m = mixer(DriftPolicy::Off, DriftBias::Left, 1.0);
        assert_eq!(m.mix(0.5, 0.25), (0.75, 0.25));
        assert_eq!(m.mix(0.0, 0.5), (0.5, -0.5));
        assert_eq!(m.mix(1.0, 1.0), (1.0, 0.0));
        assert_eq!(m.mix(-1.0, -1.0), (-1.0, 0.0));
    }

    #[test]
    fn test_drift_applies_when_straight() {
        let m = mixer(DriftPolicy::Constant { offset: 0.05 }, DriftBias::Left, 1.0);
        let (l, r) = m.mix(0.5, 0.0);
        assert!((l - 0.55).abs() < 1e-6);
        assert!((r - 0.45).abs() < 1e-6);

        // Reversing still pushes the left wheel harder
        let (l, r) = m.mix(-0.5, 0.0);
        assert!((l + 0.55).abs() < 1e-6);
        assert!((r + 0.45).abs() < 1e-6);
    }

    #[test]
    fn test_drift_bias_right() {
        let m = mixer(DriftPolicy::Constant { offset: 0.05 }, DriftBias::Right, 1.0);
        let (l, r) = m.mix(0.5, 0.0);
        assert!(l < r);
    }

    #[test]
    fn test_no_drift_while_turning() {
        let policies = [
            DriftPolicy::Constant { offset: 0.2 },
            DriftPolicy::InverseSpeed { gain: 0.05, max: 0.3 },
        ];
        let plain = mixer(DriftPolicy::Off, DriftBias::Left, 1.0);

        for policy in policies {
            let m = mixer(policy, DriftBias::Left, 1.0);
            for forward in [-1.0, -0.6, -0.11, 0.0, 0.11, 0.6, 1.0] {
                for turn in [-0.9, -0.11, 0.11, 0.9] {
                    assert_eq!(m.drift_correction(forward, turn), (0.0, 0.0));
                    assert_eq!(m.mix(forward, turn), plain.mix(forward, turn));
                }
            }
        }
    }

    #[test]
    fn test_no_drift_when_slow() {
        let m = mixer(DriftPolicy::Constant { offset: 0.2 }, DriftBias::Left, 1.0);
        assert_eq!(m.drift_correction(0.05, 0.0), (0.0, 0.0));
    }

    #[test]
    fn test_inverse_speed_tapers() {
        let policy = DriftPolicy::InverseSpeed { gain: 0.02, max: 0.1 };
        assert!((policy.magnitude(0.15) - 0.1).abs() < 1e-6); // capped
        assert!((policy.magnitude(0.4) - 0.05).abs() < 1e-6);
        assert!((policy.magnitude(1.0) - 0.02).abs() < 1e-6);
        assert!(policy.magnitude(0.4) > policy.magnitude(0.8));
    }

    #[test]
    fn test_output_clamped_and_curved() {
        let m = mixer(DriftPolicy::Constant { offset: 0.3 }, DriftBias::Left, 2.0);
        let (l, r) = m.mix(1.0, 0.0);
        assert_eq!(l, 1.0);
        assert!((r - 0.49).abs() < 1e-5); // (1.0 - 0.3)^2
    }
}
