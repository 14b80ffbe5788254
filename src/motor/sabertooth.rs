// Packetized serial protocol for the dome pan motor controller
//
// Packet format: [Address, Command, Data, Checksum]
// Checksum = (Address + Command + Data) & 0x7F

use std::io::{Read, Write};
use tracing::debug;

use super::error::Result;

pub const DEFAULT_ADDRESS: u8 = 128;

/// Drive command bytes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveCommand {
    Motor1Forward = 0,
    Motor1Backward = 1,
    Motor2Forward = 4,
    Motor2Backward = 5,
}

impl DriveCommand {
    fn for_motor(motor: u8, reverse: bool) -> Self {
        match (motor, reverse) {
            (2, false) => DriveCommand::Motor2Forward,
            (2, true) => DriveCommand::Motor2Backward,
            (_, false) => DriveCommand::Motor1Forward,
            (_, true) => DriveCommand::Motor1Backward,
        }
    }
}

/// Build a drive packet for `percent` in [-100, 100]
pub fn drive_packet(address: u8, motor: u8, percent: i8) -> [u8; 4] {
    let percent = percent.clamp(-100, 100);
    let command = DriveCommand::for_motor(motor, percent < 0) as u8;
    let data = (127 * percent.unsigned_abs() as u16 / 100) as u8;
    let checksum = ((address as u16 + command as u16 + data as u16) & 0x7F) as u8;
    [address, command, data, checksum]
}

/// Pan controller bus
pub struct Sabertooth<P> {
    port: P,
    address: u8,
    motor: u8,
}

impl<P: Read + Write> Sabertooth<P> {
    pub fn new(port: P, address: u8, motor: u8) -> Self {
        Self {
            port,
            address,
            motor,
        }
    }

    /// Drive the configured motor at a signed percentage
    pub fn drive(&mut self, percent: i8) -> Result<()> {
        let packet = drive_packet(self.address, self.motor, percent);
        debug!("Pan drive {}% -> {:02X?}", percent, packet);
        self.port.write_all(&packet)?;
        self.port.flush()?;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.drive(0)
    }
}
