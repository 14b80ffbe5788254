// Controller event source
//
// Events carry a stable numeric code per control. Stick axes report raw
// 0..=255 with 127 at rest; hat axes report -1, 0 or 1.

mod gamepad;

use std::future::Future;

use crate::error::ErrorKind;

pub use gamepad::GamepadSource;

/// Control codes of the supported controller layout
pub mod codes {
    pub const BTN_A: u16 = 304;
    pub const BTN_B: u16 = 305;
    pub const BTN_X: u16 = 307;
    pub const BTN_Y: u16 = 308;
    pub const BTN_L1: u16 = 310;
    pub const BTN_R1: u16 = 311;
    // Digital click of the analog triggers
    pub const BTN_L2_CLICK: u16 = 312;
    pub const BTN_R2_CLICK: u16 = 313;

    pub const AXIS_LEFT_X: u16 = 0;
    pub const AXIS_LEFT_Y: u16 = 1;
    pub const AXIS_RIGHT_X: u16 = 2;
    pub const AXIS_RIGHT_Y: u16 = 5;
    pub const AXIS_R2: u16 = 9;
    pub const AXIS_L2: u16 = 10;
    pub const HAT0_X: u16 = 16;
    pub const HAT0_Y: u16 = 17;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerEvent {
    Button { code: u16, pressed: bool },
    Axis { code: u16, value: i32 },
}

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("No controller connected")]
    NotConnected,

    #[error("Controller removed: {0}")]
    Removed(String),

    #[error("Controller I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Input backend failure: {0}")]
    Backend(String),
}

impl InputError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InputError::NotConnected | InputError::Removed(_) | InputError::Io(_) => {
                ErrorKind::Transport
            }
            InputError::Backend(_) => ErrorKind::Logic,
        }
    }
}

/// Something that yields controller events, one device at a time
pub trait ControllerSource: Send {
    /// Try to open the device once
    fn open(&mut self) -> impl Future<Output = Result<(), InputError>> + Send;

    /// Wait for the next event of the open device
    fn next_event(&mut self) -> impl Future<Output = Result<ControllerEvent, InputError>> + Send;
}
