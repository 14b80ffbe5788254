// High-level wheel driver for the two-wheel base
//
// Combines the mixer, the last-sent gate and the MD49 protocol into one
// actuator owned by the drive loop, which is the controller's only writer.

use serialport::SerialPort;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::{MotorError, Result};
use super::md49::{Channel, Md49, Md49Port};
use crate::config::{DriveConfig, MotorConfig};
use crate::control::{DriveMixer, Intent, NativeRange, WheelGate, WheelWrites};
use crate::dispatch::{Actuator, Opener};
use crate::messages::MotorTelemetry;

const NAME: &str = "wheels";

/// Wheel driver for the MD49 base
pub struct DriveTrain<P: Md49Port> {
    bus: Option<Md49<P>>,
    opener: Opener<P>,
    mixer: DriveMixer,
    gate: WheelGate,
    config: MotorConfig,
}

impl DriveTrain<Box<dyn SerialPort>> {
    /// Open the configured serial port and initialize the controller
    pub fn connect(motor: &MotorConfig, drive: &DriveConfig) -> Result<Self> {
        let port = motor.port.clone();
        let baud_rate = motor.baud_rate;
        let timeout = motor.timeout();
        let opener: Opener<Box<dyn SerialPort>> = Box::new(move || -> Result<Box<dyn SerialPort>> {
            info!("Opening motor controller on {}", port);
            Ok(serialport::new(&port, baud_rate).timeout(timeout).open()?)
        });
        Self::with_opener(opener, motor, drive)
    }
}

impl<P: Md49Port + Send + 'static> DriveTrain<P> {
    pub fn with_opener(mut opener: Opener<P>, motor: &MotorConfig, drive: &DriveConfig) -> Result<Self> {
        let port = opener()?;
        let mut train = Self {
            bus: Some(Md49::new(port)),
            opener,
            mixer: DriveMixer::new(drive),
            gate: WheelGate::new(
                NativeRange::from_config(motor),
                drive.stop_threshold,
                motor.min_step,
            ),
            config: motor.clone(),
        };
        train.initialize()?;
        Ok(train)
    }

    fn bus(&mut self) -> Result<&mut Md49<P>> {
        self.bus.as_mut().ok_or(MotorError::Disconnected(NAME))
    }

    /// Bring the controller to a known state and both wheels to neutral
    pub fn initialize(&mut self) -> Result<()> {
        let safe_defaults = self.config.safe_defaults;
        let timeout_safety = self.config.timeout_safety;
        let acceleration = self.config.acceleration;
        let neutral = self.config.neutral as i32;

        let bus = self.bus()?;
        if safe_defaults {
            info!("Applying MD49 safe defaults (acceleration {})", acceleration);
            bus.reset_to_defaults(acceleration)?;
        }
        if !timeout_safety {
            bus.disable_timeout()?;
        }
        bus.set_speed(Channel::One, neutral)?;
        bus.set_speed(Channel::Two, neutral)?;

        self.gate.reset();
        info!("Motor controller initialized");
        Ok(())
    }

    /// Mix the intent and write whatever the gate lets through
    pub fn drive(&mut self, intent: &Intent) -> Result<WheelWrites> {
        let (left, right) = self.mixer.mix(intent.forward, intent.turn);
        let writes = self.gate.plan(intent, left, right);
        if writes.is_empty() {
            return Ok(writes);
        }

        debug!("Wheel writes {:?} for mix ({:.3}, {:.3})", writes, left, right);
        // Commit per channel so a failed right write still records the left one
        if let Some(value) = writes.left {
            self.bus()?.set_speed(Channel::One, value as i32)?;
            self.gate.commit_left(value);
        }
        if let Some(value) = writes.right {
            self.bus()?.set_speed(Channel::Two, value as i32)?;
            self.gate.commit_right(value);
        }
        Ok(writes)
    }

    /// Command neutral on both wheels, regardless of the last-sent state
    pub fn stop(&mut self) -> Result<()> {
        info!("Stopping wheels");
        let neutral = self.config.neutral;
        let left = self.bus()?.set_speed(Channel::One, neutral as i32);
        if left.is_ok() {
            self.gate.commit_left(neutral);
        }
        let right = self.bus()?.set_speed(Channel::Two, neutral as i32);
        if right.is_ok() {
            self.gate.commit_right(neutral);
        }
        left.and(right)
    }

    pub fn read_telemetry(&mut self) -> Result<MotorTelemetry> {
        self.bus()?.read_telemetry()
    }

    /// Last values written (left, right)
    pub fn last_sent(&self) -> (u8, u8) {
        self.gate.last()
    }
}

impl<P: Md49Port + Send + 'static> Actuator for DriveTrain<P> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(&mut self, intent: &Intent) -> Result<()> {
        self.drive(intent).map(|_| ())
    }

    fn stop(&mut self) -> Result<()> {
        DriveTrain::stop(self)
    }

    fn disconnect(&mut self) {
        self.bus = None;
        self.gate.reset();
    }

    fn reconnect(&mut self) -> Result<()> {
        let port = (self.opener)()?;
        self.bus = Some(Md49::new(port));
        if let Err(e) = self.initialize() {
            self.bus = None;
            return Err(e);
        }
        Ok(())
    }

    fn poll(&mut self) -> Result<Option<MotorTelemetry>> {
        self.read_telemetry().map(Some)
    }

    fn poll_interval(&self) -> Option<Duration> {
        self.config.telemetry_interval()
    }
}

impl<P: Md49Port> Drop for DriveTrain<P> {
    fn drop(&mut self) {
        // Try to stop the wheels when the driver is dropped while moving
        let neutral = self.config.neutral;
        if self.gate.last() == (neutral, neutral) {
            return;
        }
        if let Some(bus) = self.bus.as_mut() {
            let neutral = neutral as i32;
            let result = bus
                .set_speed(Channel::One, neutral)
                .and_then(|_| bus.set_speed(Channel::Two, neutral));
            if let Err(e) = result {
                warn!("Failed to stop wheels on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::md49::{Command, Frame};
    use crate::motor::mock::MockPort;

    fn train(motor: MotorConfig) -> (DriveTrain<MockPort>, MockPort) {
        let port = MockPort::new();
        let handle = port.clone();
        let drive = DriveConfig {
            drift: crate::control::DriftPolicy::Off,
            ..DriveConfig::default()
        };
        let train = DriveTrain::with_opener(Box::new(move || Ok::<_, MotorError>(handle.clone())), &motor, &drive)
            .unwrap();
        (train, port)
    }

    fn frames(port: &MockPort) -> Vec<Frame> {
        Frame::decode_stream(&port.take_written()).unwrap()
    }

    fn forward(value: f32) -> Intent {
        Intent {
            forward: value,
            turn: 0.0,
            aux: 0.0,
        }
    }

    #[test]
    fn test_initialize_sequence() {
        let (_train, port) = train(MotorConfig::default());
        assert_eq!(
            frames(&port),
            vec![
                Frame::with_data(Command::SetMode, 0),
                Frame::with_data(Command::SetAcceleration, 5),
                Frame::new(Command::EnableRegulator),
                Frame::new(Command::ResetEncoders),
                Frame::new(Command::EnableTimeout),
                Frame::new(Command::DisableTimeout),
                Frame::with_data(Command::SetSpeed1, 128),
                Frame::with_data(Command::SetSpeed2, 128),
            ]
        );
    }

    #[test]
    fn test_initialize_without_defaults_keeps_watchdog() {
        let (_train, port) = train(MotorConfig {
            safe_defaults: false,
            timeout_safety: true,
            ..MotorConfig::default()
        });
        assert_eq!(
            frames(&port),
            vec![
                Frame::with_data(Command::SetSpeed1, 128),
                Frame::with_data(Command::SetSpeed2, 128),
            ]
        );
    }

    #[test]
    fn test_drive_is_idempotent() {
        let (mut train, port) = train(MotorConfig::default());
        port.take_written();

        train.drive(&forward(0.5)).unwrap();
        assert_eq!(
            frames(&port),
            vec![
                Frame::with_data(Command::SetSpeed1, 191),
                Frame::with_data(Command::SetSpeed2, 191),
            ]
        );

        train.drive(&forward(0.5)).unwrap();
        assert!(frames(&port).is_empty());
    }

    #[test]
    fn test_release_sends_one_neutral() {
        let (mut train, port) = train(MotorConfig::default());
        train.drive(&forward(-0.5)).unwrap();
        port.take_written();

        for _ in 0..3 {
            train.drive(&Intent::default()).unwrap();
        }
        assert_eq!(
            frames(&port),
            vec![
                Frame::with_data(Command::SetSpeed1, 128),
                Frame::with_data(Command::SetSpeed2, 128),
            ]
        );
    }

    #[test]
    fn test_failed_write_not_committed() {
        let (mut train, port) = train(MotorConfig::default());
        port.set_fail_writes(true);
        let err = train.drive(&forward(0.5)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Transport);
        assert_eq!(train.last_sent(), (128, 128));

        // Link back: the same intent is written again
        port.set_fail_writes(false);
        port.take_written();
        assert_eq!(
            train.drive(&forward(0.5)).unwrap(),
            WheelWrites {
                left: Some(191),
                right: Some(191)
            }
        );
    }

    #[test]
    fn test_stop_is_unconditional() {
        let (mut train, port) = train(MotorConfig::default());
        port.take_written();
        DriveTrain::stop(&mut train).unwrap();
        assert_eq!(frames(&port).len(), 2);
    }

    #[test]
    fn test_disconnected_reports_transport() {
        let (mut train, _port) = train(MotorConfig::default());
        Actuator::disconnect(&mut train);
        let err = train.drive(&forward(0.5)).unwrap_err();
        assert!(matches!(err, MotorError::Disconnected("wheels")));

        train.reconnect().unwrap();
        assert!(train.drive(&forward(0.5)).is_ok());
    }
}
