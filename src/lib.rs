pub mod config;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod input;
pub mod messages;
pub mod motor;
pub mod runtime;
pub mod session;
pub mod status;
