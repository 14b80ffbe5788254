// Message types published by the runtime

use serde::{Deserialize, Serialize};

// Sound categories the external sound player knows how to pick a clip for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundCategory {
    Hum,
    Proc,
    Sent,
    Scream,
    Annoyed,
    Cantina,
    StarWars,
}

impl SoundCategory {
    /// Short label shown on the status indicator
    pub fn label(self) -> &'static str {
        match self {
            SoundCategory::Hum => "HUM",
            SoundCategory::Proc => "PROC",
            SoundCategory::Sent => "SENT",
            SoundCategory::Scream => "SCREAM",
            SoundCategory::Annoyed => "ANNOYED",
            SoundCategory::Cantina => "CANTINA",
            SoundCategory::StarWars => "STARWARS",
        }
    }
}

// Status indicator text, published as-is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub text: String,
}

// Sound trigger request for the external player
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoundTrigger {
    pub category: SoundCategory,
}

/// One telemetry sample from the wheel motor controller.
/// Observed and published only; nothing in the control path reads it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotorTelemetry {
    pub encoder_left: i32,
    pub encoder_right: i32,
    pub volts: u8,
    /// Tenths of an ampere
    pub current_left: u8,
    pub current_right: u8,
    pub error_flags: u8,
}
