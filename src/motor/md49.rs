// MD49 dual motor controller serial protocol
//
// Request frame: [0x00 (sync), Command, Data...]
// Replies are raw fixed-width bytes with no framing:
// 1 byte for speed/volts/current/error, 4 bytes big-endian signed for encoders.

use serialport::{ClearBuffer, SerialPort};
use std::io::{ErrorKind as IoErrorKind, Read, Write};
use tracing::{debug, warn};

use super::error::{MotorError, Result};
use crate::messages::MotorTelemetry;

/// Default serial configuration for the MD49
pub const DEFAULT_BAUDRATE: u32 = 38400;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Marks the start of every command frame
pub const SYNC_BYTE: u8 = 0x00;

/// Command set
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    GetSpeed1 = 0x21,
    GetSpeed2 = 0x22,
    GetEncoder1 = 0x23,
    GetEncoder2 = 0x24,
    GetVolts = 0x26,
    GetCurrent1 = 0x27,
    GetCurrent2 = 0x28,
    GetError = 0x2D,
    SetSpeed1 = 0x31,
    SetSpeed2 = 0x32,
    SetAcceleration = 0x33,
    SetMode = 0x34,
    ResetEncoders = 0x35,
    DisableRegulator = 0x36,
    EnableRegulator = 0x37,
    DisableTimeout = 0x38,
    EnableTimeout = 0x39,
}

impl Command {
    const ALL: [Command; 17] = [
        Command::GetSpeed1,
        Command::GetSpeed2,
        Command::GetEncoder1,
        Command::GetEncoder2,
        Command::GetVolts,
        Command::GetCurrent1,
        Command::GetCurrent2,
        Command::GetError,
        Command::SetSpeed1,
        Command::SetSpeed2,
        Command::SetAcceleration,
        Command::SetMode,
        Command::ResetEncoders,
        Command::DisableRegulator,
        Command::EnableRegulator,
        Command::DisableTimeout,
        Command::EnableTimeout,
    ];

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| *c as u8 == byte)
    }

    /// Data bytes following the command byte
    pub fn payload_len(self) -> usize {
        match self {
            Command::SetSpeed1 | Command::SetSpeed2 | Command::SetAcceleration | Command::SetMode => 1,
            _ => 0,
        }
    }

    /// Bytes the controller sends back
    pub fn reply_len(self) -> usize {
        match self {
            Command::GetEncoder1 | Command::GetEncoder2 => 4,
            Command::GetSpeed1
            | Command::GetSpeed2
            | Command::GetVolts
            | Command::GetCurrent1
            | Command::GetCurrent2
            | Command::GetError => 1,
            _ => 0,
        }
    }
}

/// Motor channel on the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    One,
    Two,
}

impl Channel {
    fn pick(self, one: Command, two: Command) -> Command {
        match self {
            Channel::One => one,
            Channel::Two => two,
        }
    }
}

/// One request frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub data: Option<u8>,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            data: None,
        }
    }

    pub fn with_data(command: Command, data: u8) -> Self {
        Self {
            command,
            data: Some(data),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(3);
        bytes.push(SYNC_BYTE);
        bytes.push(self.command as u8);
        bytes.extend(self.data);
        bytes
    }

    /// Decode exactly one frame
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (frame, used) = Self::decode_prefix(bytes)?;
        if used != bytes.len() {
            return Err(MotorError::InvalidFrame(format!(
                "{} trailing bytes",
                bytes.len() - used
            )));
        }
        Ok(frame)
    }

    /// Decode a back-to-back stream of frames
    pub fn decode_stream(mut bytes: &[u8]) -> Result<Vec<Self>> {
        let mut frames = Vec::new();
        while !bytes.is_empty() {
            let (frame, used) = Self::decode_prefix(bytes)?;
            frames.push(frame);
            bytes = &bytes[used..];
        }
        Ok(frames)
    }

    fn decode_prefix(bytes: &[u8]) -> Result<(Self, usize)> {
        match bytes {
            [] | [_] => Err(MotorError::InvalidFrame(format!(
                "need at least 2 bytes, got {}",
                bytes.len()
            ))),
            [sync, ..] if *sync != SYNC_BYTE => Err(MotorError::InvalidFrame(format!(
                "expected sync byte, got 0x{:02X}",
                sync
            ))),
            [_, command, rest @ ..] => {
                let command = Command::from_byte(*command).ok_or_else(|| {
                    MotorError::InvalidFrame(format!("unknown command 0x{:02X}", command))
                })?;
                match command.payload_len() {
                    0 => Ok((Self::new(command), 2)),
                    _ => match rest.first() {
                        Some(&data) => Ok((Self::with_data(command, data), 3)),
                        None => Err(MotorError::InvalidFrame(format!(
                            "{:?} is missing its data byte",
                            command
                        ))),
                    },
                }
            }
        }
    }
}

/// Decoded error status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorStatus(u8);

impl ErrorStatus {
    pub const UNDER_VOLTAGE: u8 = 0x80;
    pub const OVER_VOLTAGE: u8 = 0x40;
    pub const MOTOR2_TRIP: u8 = 0x20;
    pub const MOTOR1_TRIP: u8 = 0x10;
    pub const MOTOR2_SHORT: u8 = 0x08;
    pub const MOTOR1_SHORT: u8 = 0x04;
    const RESERVED: u8 = 0x03;

    /// Bits 0-1 are unused and always read as zero on a healthy link
    pub fn from_byte(byte: u8) -> Result<Self> {
        if byte & Self::RESERVED != 0 {
            return Err(MotorError::InvalidReply {
                command: Command::GetError as u8,
                reason: format!("reserved status bits set: 0b{:08b}", byte),
            });
        }
        Ok(Self(byte))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_clear(self) -> bool {
        self.0 == 0
    }

    /// Names of the active fault flags
    pub fn faults(self) -> Vec<&'static str> {
        [
            (Self::UNDER_VOLTAGE, "under voltage"),
            (Self::OVER_VOLTAGE, "over voltage"),
            (Self::MOTOR2_TRIP, "motor 2 trip"),
            (Self::MOTOR1_TRIP, "motor 1 trip"),
            (Self::MOTOR2_SHORT, "motor 2 short"),
            (Self::MOTOR1_SHORT, "motor 1 short"),
        ]
        .into_iter()
        .filter(|(bit, _)| self.0 & bit != 0)
        .map(|(_, name)| name)
        .collect()
    }
}

/// Serial link the MD49 bus talks over
pub trait Md49Port: Read + Write {
    /// Throw away bytes that arrived but were never read
    fn clear_input(&mut self) -> Result<()>;
}

impl Md49Port for Box<dyn SerialPort> {
    fn clear_input(&mut self) -> Result<()> {
        Ok((**self).clear(ClearBuffer::Input)?)
    }
}

/// MD49 bus - handles serial communication with the controller
pub struct Md49<P> {
    port: P,
    /// Set after a reply went wrong; late bytes may still be on the line
    stale: bool,
}

impl<P: Md49Port> Md49<P> {
    pub fn new(port: P) -> Self {
        Self { port, stale: false }
    }

    fn send(&mut self, frame: Frame) -> Result<()> {
        debug!("MD49 send {:?}", frame);
        self.port.write_all(&frame.encode())?;
        self.port.flush()?;
        Ok(())
    }

    /// Read the command's fixed-width reply. Fewer bytes than expected is a short read.
    fn read_reply(&mut self, command: Command) -> Result<Vec<u8>> {
        let expected = command.reply_len();
        let mut buf = vec![0u8; expected];
        let mut got = 0;

        while got < expected {
            match self.port.read(&mut buf[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
                Err(e) if e.kind() == IoErrorKind::TimedOut => break,
                Err(e) => return Err(MotorError::Io(e)),
            }
        }

        if got < expected {
            self.stale = true;
            return Err(MotorError::ShortRead {
                command: command as u8,
                expected,
                got,
            });
        }
        Ok(buf)
    }

    /// Send a get command and read its reply
    fn query<const N: usize>(&mut self, command: Command) -> Result<[u8; N]> {
        if self.stale {
            debug!("MD49 discarding stale input before {:?}", command);
            self.port.clear_input()?;
            self.stale = false;
        }
        self.send(Frame::new(command))?;
        let reply = self.read_reply(command)?;
        <[u8; N]>::try_from(reply.as_slice()).map_err(|_| MotorError::InvalidReply {
            command: command as u8,
            reason: format!("expected {} bytes, command replies with {}", N, reply.len()),
        })
    }

    fn query_u8(&mut self, command: Command) -> Result<u8> {
        let [value] = self.query(command)?;
        Ok(value)
    }

    // === Get commands ===

    /// Requested speed of a channel
    pub fn get_speed(&mut self, channel: Channel) -> Result<u8> {
        self.query_u8(channel.pick(Command::GetSpeed1, Command::GetSpeed2))
    }

    /// Signed encoder count of a channel
    pub fn get_encoder(&mut self, channel: Channel) -> Result<i32> {
        let bytes = self.query(channel.pick(Command::GetEncoder1, Command::GetEncoder2))?;
        Ok(i32::from_be_bytes(bytes))
    }

    /// Battery voltage in volts
    pub fn get_volts(&mut self) -> Result<u8> {
        self.query_u8(Command::GetVolts)
    }

    /// Channel current in tenths of an ampere
    pub fn get_current(&mut self, channel: Channel) -> Result<u8> {
        self.query_u8(channel.pick(Command::GetCurrent1, Command::GetCurrent2))
    }

    pub fn get_error(&mut self) -> Result<ErrorStatus> {
        let byte = self.query_u8(Command::GetError)?;
        // Reserved bits set usually means the reply stream slipped
        ErrorStatus::from_byte(byte).map_err(|e| {
            self.stale = true;
            e
        })
    }

    // === Set commands ===

    /// Set channel speed. Out-of-range values are clamped to 0-255.
    pub fn set_speed(&mut self, channel: Channel, speed: i32) -> Result<()> {
        let command = channel.pick(Command::SetSpeed1, Command::SetSpeed2);
        self.send(Frame::with_data(command, speed.clamp(0, 255) as u8))
    }

    /// Set acceleration, clamped to 1-10
    pub fn set_acceleration(&mut self, value: u8) -> Result<()> {
        self.send(Frame::with_data(Command::SetAcceleration, value.clamp(1, 10)))
    }

    /// Set operating mode. Mode 0 is unsigned speed per channel.
    pub fn set_mode(&mut self, mode: u8) -> Result<()> {
        if mode > 3 {
            return Err(MotorError::InvalidMode(mode));
        }
        self.send(Frame::with_data(Command::SetMode, mode))
    }

    pub fn reset_encoders(&mut self) -> Result<()> {
        self.send(Frame::new(Command::ResetEncoders))
    }

    pub fn disable_regulator(&mut self) -> Result<()> {
        self.send(Frame::new(Command::DisableRegulator))
    }

    pub fn enable_regulator(&mut self) -> Result<()> {
        self.send(Frame::new(Command::EnableRegulator))
    }

    /// Disable the 2 s serial watchdog
    pub fn disable_timeout(&mut self) -> Result<()> {
        self.send(Frame::new(Command::DisableTimeout))
    }

    /// Enable the 2 s serial watchdog
    pub fn enable_timeout(&mut self) -> Result<()> {
        self.send(Frame::new(Command::EnableTimeout))
    }

    // === High-level convenience methods ===

    /// Mode 0, given acceleration, regulator on, encoders zeroed, watchdog on.
    ///
    /// Acceleration and regulator must be set before normal commands resume.
    pub fn reset_to_defaults(&mut self, acceleration: u8) -> Result<()> {
        self.set_mode(0)?;
        self.set_acceleration(acceleration)?;
        self.enable_regulator()?;
        self.reset_encoders()?;
        self.enable_timeout()
    }

    /// Read every telemetry value in one pass
    pub fn read_telemetry(&mut self) -> Result<MotorTelemetry> {
        let encoder_left = self.get_encoder(Channel::One)?;
        let encoder_right = self.get_encoder(Channel::Two)?;
        let volts = self.get_volts()?;
        let current_left = self.get_current(Channel::One)?;
        let current_right = self.get_current(Channel::Two)?;
        let status = self.get_error()?;
        if !status.is_clear() {
            warn!("MD49 reports faults: {}", status.faults().join(", "));
        }

        Ok(MotorTelemetry {
            encoder_left,
            encoder_right,
            volts,
            current_left,
            current_right,
            error_flags: status.bits(),
        })
    }
}
