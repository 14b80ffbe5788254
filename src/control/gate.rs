// Write suppression: remembers the last value sent on each channel and only
// lets a new command through when it is a real, perceptible change.

use super::intent::Intent;
use crate::config::MotorConfig;

/// Last-sent memory and hysteresis for one actuator channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelGate {
    neutral: i32,
    last: i32,
    min_step: i32,
}

impl ChannelGate {
    /// Starts out believing the channel is at neutral
    pub fn new(neutral: i32, min_step: i32) -> Self {
        Self {
            neutral,
            last: neutral,
            min_step,
        }
    }

    pub fn last(&self) -> i32 {
        self.last
    }

    /// Decide whether `target` should be written.
    ///
    /// At rest the channel gets exactly one neutral command and nothing
    /// after that; otherwise a write needs to move more than `min_step`.
    pub fn plan(&self, target: i32, at_rest: bool) -> Option<i32> {
        if at_rest {
            return (self.last != self.neutral).then_some(self.neutral);
        }
        ((target - self.last).abs() > self.min_step).then_some(target)
    }

    /// Record a successful write
    pub fn commit(&mut self, value: i32) {
        self.last = value;
    }

    pub fn reset(&mut self) {
        self.last = self.neutral;
    }
}

/// Mapping from normalized [-1, 1] to the controller's native speed byte
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NativeRange {
    pub neutral: u8,
    pub half_range: f32,
    pub min: u8,
    pub max: u8,
}

impl NativeRange {
    pub fn from_config(config: &MotorConfig) -> Self {
        Self {
            neutral: config.neutral,
            half_range: config.half_range,
            min: config.min,
            max: config.max,
        }
    }

    pub fn to_native(&self, norm: f32) -> u8 {
        let value = self.neutral as f32 + norm.clamp(-1.0, 1.0) * self.half_range;
        value.round().clamp(self.min as f32, self.max as f32) as u8
    }
}

/// Writes planned for one drive tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WheelWrites {
    pub left: Option<u8>,
    pub right: Option<u8>,
}

impl WheelWrites {
    pub fn is_empty(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }
}

/// Last-sent state for both wheels
#[derive(Debug, Clone, Copy)]
pub struct WheelGate {
    range: NativeRange,
    stop_threshold: f32,
    left: ChannelGate,
    right: ChannelGate,
}

impl WheelGate {
    pub fn new(range: NativeRange, stop_threshold: f32, min_step: u8) -> Self {
        let neutral = range.neutral as i32;
        Self {
            range,
            stop_threshold,
            left: ChannelGate::new(neutral, min_step as i32),
            right: ChannelGate::new(neutral, min_step as i32),
        }
    }

    /// Plan the wheel writes for mixed `(left, right)` values.
    ///
    /// The stop check looks at the raw intent, not the mixed values, so
    /// curve-shaping noise near zero never keeps the wheels twitching.
    pub fn plan(&self, intent: &Intent, left_norm: f32, right_norm: f32) -> WheelWrites {
        let at_rest = intent.forward.abs() <= self.stop_threshold
            && intent.turn.abs() <= self.stop_threshold;

        let left = self.range.to_native(left_norm) as i32;
        let right = self.range.to_native(right_norm) as i32;

        WheelWrites {
            left: self.left.plan(left, at_rest).map(|v| v as u8),
            right: self.right.plan(right, at_rest).map(|v| v as u8),
        }
    }

    pub fn commit_left(&mut self, value: u8) {
        self.left.commit(value as i32);
    }

    pub fn commit_right(&mut self, value: u8) {
        self.right.commit(value as i32);
    }

    pub fn last(&self) -> (u8, u8) {
        (self.left.last() as u8, self.right.last() as u8)
    }

    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }
}
