// Dome pan actuator: aux intent -> signed percent on the pan controller

use serialport::SerialPort;
use std::io::{Read, Write};
use std::thread::sleep;
use std::time::Duration;
use tracing::{info, warn};

use super::error::{MotorError, Result};
use super::sabertooth::Sabertooth;
use crate::config::PanConfig;
use crate::control::{ChannelGate, Intent};
use crate::dispatch::{Actuator, Opener};

const NAME: &str = "pan";

/// Startup sweep: (percent, hold)
const SWEEP: [(i8, Duration); 3] = [
    (50, Duration::from_millis(200)),
    (-50, Duration::from_millis(200)),
    (0, Duration::ZERO),
];

pub struct PanDrive<P: Read + Write> {
    bus: Option<Sabertooth<P>>,
    opener: Opener<P>,
    gate: ChannelGate,
    config: PanConfig,
}

impl PanDrive<Box<dyn SerialPort>> {
    pub fn connect(config: &PanConfig) -> Result<Self> {
        let port = config.port.clone();
        let baud_rate = config.baud_rate;
        let timeout = config.timeout();
        let opener: Opener<Box<dyn SerialPort>> = Box::new(move || -> Result<Box<dyn SerialPort>> {
            info!("Opening pan controller on {}", port);
            Ok(serialport::new(&port, baud_rate).timeout(timeout).open()?)
        });
        Self::with_opener(opener, config)
    }
}

impl<P: Read + Write + Send + 'static> PanDrive<P> {
    pub fn with_opener(mut opener: Opener<P>, config: &PanConfig) -> Result<Self> {
        let port = opener()?;
        let mut pan = Self {
            bus: Some(Sabertooth::new(port, config.address, config.motor)),
            opener,
            gate: ChannelGate::new(0, config.min_step as i32),
            config: config.clone(),
        };
        pan.bus()?.stop()?;
        Ok(pan)
    }

    fn bus(&mut self) -> Result<&mut Sabertooth<P>> {
        self.bus.as_mut().ok_or(MotorError::Disconnected(NAME))
    }

    /// Target percent for an aux intent
    pub fn target(&self, aux: f32) -> i8 {
        (aux.clamp(-1.0, 1.0) * self.config.max_percent as f32).round() as i8
    }

    /// Write the aux intent if it moved past the hysteresis band
    pub fn pan(&mut self, aux: f32) -> Result<Option<i8>> {
        let at_rest = aux.abs() <= self.config.stop_threshold;
        let target = self.target(aux);
        let Some(value) = self.gate.plan(target as i32, at_rest) else {
            return Ok(None);
        };

        self.bus()?.drive(value as i8)?;
        self.gate.commit(value);
        Ok(Some(value as i8))
    }

    /// Blocking wiggle so the operator can see the dome is alive
    pub fn sweep(&mut self) -> Result<()> {
        info!("Pan startup sweep");
        for (percent, hold) in SWEEP {
            self.bus()?.drive(percent)?;
            sleep(hold);
        }
        self.gate.reset();
        Ok(())
    }

    pub fn last_sent(&self) -> i8 {
        self.gate.last() as i8
    }
}

impl<P: Read + Write + Send + 'static> Actuator for PanDrive<P> {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(&mut self, intent: &Intent) -> Result<()> {
        self.pan(intent.aux).map(|_| ())
    }

    fn stop(&mut self) -> Result<()> {
        info!("Stopping pan");
        self.bus()?.stop()?;
        self.gate.commit(0);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.bus = None;
        self.gate.reset();
    }

    fn reconnect(&mut self) -> Result<()> {
        let port = (self.opener)()?;
        let mut bus = Sabertooth::new(port, self.config.address, self.config.motor);
        bus.stop()?;
        self.bus = Some(bus);
        self.gate.reset();
        Ok(())
    }
}

impl<P: Read + Write> Drop for PanDrive<P> {
    fn drop(&mut self) {
        if self.gate.last() == 0 {
            return;
        }
        if let Some(bus) = self.bus.as_mut() {
            if let Err(e) = bus.stop() {
                warn!("Failed to stop pan on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::mock::MockPort;
    use crate::motor::sabertooth::drive_packet;

    fn pan() -> (PanDrive<MockPort>, MockPort) {
        let port = MockPort::new();
        let handle = port.clone();
        let pan = PanDrive::with_opener(
            Box::new(move || Ok::<_, MotorError>(handle.clone())),
            &PanConfig::default(),
        )
        .unwrap();
        assert_eq!(port.take_written(), drive_packet(128, 1, 0).to_vec());
        (pan, port)
    }

    #[test]
    fn test_aux_scaled_to_max_percent() {
        let (mut pan, port) = pan();
        assert_eq!(pan.pan(1.0).unwrap(), Some(40));
        assert_eq!(pan.pan(-0.5).unwrap(), Some(-20));
        assert_eq!(
            port.take_written(),
            [drive_packet(128, 1, 40), drive_packet(128, 1, -20)].concat()
        );
    }

    #[test]
    fn test_repeat_and_rest() {
        let (mut pan, port) = pan();
        pan.pan(0.5).unwrap();
        assert_eq!(pan.pan(0.5).unwrap(), None);
        // 0.52 * 40 = 20.8 -> 21, inside the 1 step band
        assert_eq!(pan.pan(0.52).unwrap(), None);

        assert_eq!(pan.pan(0.01).unwrap(), Some(0));
        assert_eq!(pan.pan(0.0).unwrap(), None);
        assert_eq!(pan.last_sent(), 0);
        assert_eq!(port.take_written().len(), 8);
    }

    #[test]
    fn test_sweep_ends_stopped() {
        let (mut pan, port) = pan();
        pan.sweep().unwrap();
        assert_eq!(
            port.take_written(),
            [
                drive_packet(128, 1, 50),
                drive_packet(128, 1, -50),
                drive_packet(128, 1, 0)
            ]
            .concat()
        );
        assert_eq!(pan.last_sent(), 0);
    }
}
