// Motor control for the two-wheel base and the dome pan
//
// Provides:
// - MD49 wheel controller serial protocol
// - Packetized serial protocol for the pan controller
// - High-level wheel and pan actuators driven by the dispatch loops

mod drive;
pub mod error;
pub mod md49;
#[cfg(test)]
pub(crate) mod mock;
mod pan;
pub mod sabertooth;

pub use drive::DriveTrain;
pub use error::MotorError;
pub use md49::{Channel, Command, ErrorStatus, Frame, Md49, Md49Port};
pub use pan::PanDrive;
pub use sabertooth::Sabertooth;
