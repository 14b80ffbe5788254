use crate::error::ErrorKind;

/// Error types for motor controller communication
#[derive(Debug, thiserror::Error)]
pub enum MotorError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Short read for command 0x{command:02X}: expected {expected} bytes, got {got}")]
    ShortRead {
        command: u8,
        expected: usize,
        got: usize,
    },

    #[error("Invalid reply to command 0x{command:02X}: {reason}")]
    InvalidReply { command: u8, reason: String },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid mode {0}, expected 0-3")]
    InvalidMode(u8),

    #[error("{0} link is disconnected")]
    Disconnected(&'static str),

    #[error("{0} control loop is not running")]
    LoopGone(&'static str),
}

impl MotorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MotorError::Serial(_)
            | MotorError::Io(_)
            | MotorError::ShortRead { .. }
            | MotorError::Disconnected(_) => ErrorKind::Transport,
            MotorError::InvalidReply { .. } | MotorError::InvalidFrame(_) => ErrorKind::Protocol,
            MotorError::InvalidMode(_) | MotorError::LoopGone(_) => ErrorKind::Logic,
        }
    }
}

pub type Result<T> = std::result::Result<T, MotorError>;
