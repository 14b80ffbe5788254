// Loop rates, serial ports, axis tuning and drift policy
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::control::mixer::{DriftBias, DriftPolicy};
use crate::error::ErrorKind;
use crate::input::codes;
use crate::messages::SoundCategory;
use crate::motor::{md49, sabertooth};

// Drive and pan loop frequency
pub const LOOP_HZ: u64 = 20;

// Controller reconnect cadence
pub const INPUT_RETRY: Duration = Duration::from_secs(2);

// Serial ports on the Raspberry Pi
pub const MOTOR_PORT: &str = "/dev/ttyS0"; // MD49 wheels
pub const PAN_PORT: &str = "/dev/ttyAMA3"; // dome pan controller
pub const AUX_PORT: &str = "/dev/ttyACM0"; // head microcontroller

// Zenoh topics, relative to the configured prefix
pub const TOPIC_STATUS: &str = "state/status"; // status indicator text
pub const TOPIC_TELEMETRY: &str = "state/telemetry"; // motor telemetry samples
pub const TOPIC_SOUND: &str = "cmd/sound"; // sound trigger requests

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("Invalid config value {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Config
    }

    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub drive: DriveConfig,
    pub motor: MotorConfig,
    pub pan: PanConfig,
    pub aux: AuxConfig,
    pub dpad: DpadConfig,
    pub zenoh: ZenohConfig,
}

impl Config {
    /// Load a TOML config file and validate it
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading config from {}", path.display());
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        debug!("Effective config: {:?}", config);
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, axis) in [
            ("input.forward", &self.input.forward),
            ("input.turn", &self.input.turn),
            ("input.aux", &self.input.aux),
        ] {
            if !(0.0..1.0).contains(&axis.deadzone) {
                return Err(ConfigError::invalid(field, "deadzone must be in [0, 1)"));
            }
            if axis.curve <= 0.0 {
                return Err(ConfigError::invalid(field, "curve must be positive"));
            }
        }

        if self.drive.curve <= 0.0 {
            return Err(ConfigError::invalid("drive.curve", "curve must be positive"));
        }

        let m = &self.motor;
        if !(m.min <= m.neutral && m.neutral <= m.max) {
            return Err(ConfigError::invalid(
                "motor",
                format!("need min <= neutral <= max, got {} / {} / {}", m.min, m.neutral, m.max),
            ));
        }
        if !(1..=10).contains(&m.acceleration) {
            return Err(ConfigError::invalid("motor.acceleration", "must be 1-10"));
        }
        if m.max_consecutive_failures == 0 {
            return Err(ConfigError::invalid(
                "motor.max_consecutive_failures",
                "must be at least 1",
            ));
        }

        // Periods that drive a tokio interval must be non-zero
        for (field, millis) in [
            ("input.retry_interval_ms", self.input.retry_interval_ms),
            ("drive.loop_interval_ms", self.drive.loop_interval_ms),
            ("pan.loop_interval_ms", self.pan.loop_interval_ms),
            ("motor.reconnect_interval_ms", m.reconnect_interval_ms),
        ] {
            if millis == 0 {
                return Err(ConfigError::invalid(field, "must be at least 1 ms"));
            }
        }

        if !matches!(self.pan.motor, 1 | 2) {
            return Err(ConfigError::invalid("pan.motor", "must be 1 or 2"));
        }
        if self.pan.max_percent > 100 {
            return Err(ConfigError::invalid("pan.max_percent", "must be 0-100"));
        }

        Ok(())
    }
}

/// Tuning for one analog stick axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    pub code: u16,
    pub deadzone: f32,
    pub curve: f32,
    pub invert: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub retry_interval_ms: u64,
    pub forward: AxisConfig,
    pub turn: AxisConfig,
    pub aux: AxisConfig,
}

impl InputConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        // 10 raw counts either side of center
        let deadzone = 0.08;
        Self {
            retry_interval_ms: INPUT_RETRY.as_millis() as u64,
            forward: AxisConfig {
                code: codes::AXIS_LEFT_Y,
                deadzone,
                curve: 1.5,
                invert: true,
            },
            turn: AxisConfig {
                code: codes::AXIS_LEFT_X,
                deadzone,
                curve: 2.0,
                invert: false,
            },
            aux: AxisConfig {
                code: codes::AXIS_RIGHT_X,
                deadzone,
                curve: 1.0,
                invert: false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub loop_interval_ms: u64,
    /// Both intents within this band command a clean neutral stop
    pub stop_threshold: f32,
    /// Drift correction only applies above this forward and below this turn
    pub straight_threshold: f32,
    /// Response curve applied to the mixed wheel values
    pub curve: f32,
    pub drift: DriftPolicy,
    pub drift_bias: DriftBias,
}

impl DriveConfig {
    pub fn loop_interval(&self) -> Duration {
        Duration::from_millis(self.loop_interval_ms)
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            loop_interval_ms: 1000 / LOOP_HZ,
            stop_threshold: 0.05,
            straight_threshold: 0.1,
            curve: 1.0,
            drift: DriftPolicy::Constant { offset: 0.03 },
            drift_bias: DriftBias::Left,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorConfig {
    pub port: String,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    pub neutral: u8,
    pub half_range: f32,
    pub min: u8,
    pub max: u8,
    /// Hysteresis: skip writes that move less than this many native steps
    pub min_step: u8,
    pub safe_defaults: bool,
    /// Leave the controller's 2 s serial watchdog enabled
    pub timeout_safety: bool,
    pub acceleration: u8,
    /// Zero disables telemetry polling
    pub telemetry_interval_ms: u64,
    pub max_consecutive_failures: u32,
    pub reconnect_interval_ms: u64,
}

impl MotorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn telemetry_interval(&self) -> Option<Duration> {
        (self.telemetry_interval_ms > 0).then(|| Duration::from_millis(self.telemetry_interval_ms))
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            port: MOTOR_PORT.to_string(),
            baud_rate: md49::DEFAULT_BAUDRATE,
            timeout_ms: md49::DEFAULT_TIMEOUT_MS,
            neutral: 128,
            half_range: 126.0,
            min: 1,
            max: 254,
            min_step: 1,
            safe_defaults: true,
            timeout_safety: false,
            acceleration: 5,
            telemetry_interval_ms: 1000,
            max_consecutive_failures: 10,
            reconnect_interval_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanConfig {
    pub port: String,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    pub address: u8,
    pub motor: u8,
    pub max_percent: u8,
    pub stop_threshold: f32,
    pub min_step: u8,
    pub loop_interval_ms: u64,
    pub startup_sweep: bool,
}

impl PanConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_millis(self.loop_interval_ms)
    }
}

impl Default for PanConfig {
    fn default() -> Self {
        Self {
            port: PAN_PORT.to_string(),
            baud_rate: 9600,
            timeout_ms: 100,
            address: sabertooth::DEFAULT_ADDRESS,
            motor: 1,
            max_percent: 40,
            stop_threshold: 0.05,
            min_step: 1,
            loop_interval_ms: 1000 / LOOP_HZ,
            startup_sweep: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuxConfig {
    pub port: String,
    pub baud_rate: u32,
    pub write_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl Default for AuxConfig {
    fn default() -> Self {
        Self {
            port: AUX_PORT.to_string(),
            baud_rate: 9600,
            write_timeout_ms: 1000,
            read_timeout_ms: 10_000,
        }
    }
}

/// What a D-pad direction does when pressed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PadAction {
    None,
    Aux(Vec<u8>),
    Sound(SoundCategory),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DpadConfig {
    pub left: PadAction,
    pub right: PadAction,
    pub up: PadAction,
    pub down: PadAction,
}

impl Default for DpadConfig {
    fn default() -> Self {
        Self {
            left: PadAction::Aux(vec![1]),
            right: PadAction::Sound(SoundCategory::Scream),
            up: PadAction::Sound(SoundCategory::Sent),
            down: PadAction::Sound(SoundCategory::Proc),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZenohConfig {
    pub enabled: bool,
    pub prefix: String,
}

impl ZenohConfig {
    pub fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.prefix.trim_end_matches('/'), suffix)
    }
}

impl Default for ZenohConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: "r2".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [drive]
            curve = 2.0
            drift = { policy = "inverse_speed", gain = 0.02, max = 0.1 }
            drift_bias = "right"

            [dpad]
            left = "none"
            up = { aux = [2, 3] }
            "#,
        )
        .unwrap();

        assert_eq!(config.drive.curve, 2.0);
        assert_eq!(
            config.drive.drift,
            DriftPolicy::InverseSpeed {
                gain: 0.02,
                max: 0.1
            }
        );
        assert_eq!(config.drive.drift_bias, DriftBias::Right);
        assert_eq!(config.dpad.left, PadAction::None);
        assert_eq!(config.dpad.up, PadAction::Aux(vec![2, 3]));
        assert_eq!(config.dpad.right, PadAction::Sound(SoundCategory::Scream));
        assert_eq!(config.motor, MotorConfig::default());
    }

    #[test]
    fn test_rejects_bad_neutral() {
        let err = Config::from_toml("[motor]\nneutral = 0\nmin = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "motor", .. }));
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_rejects_bad_deadzone() {
        let err = Config::from_toml(
            "[input.turn]\ncode = 0\ndeadzone = 1.5\ncurve = 1.0\ninvert = false\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "input.turn", .. }));
    }

    #[test]
    fn test_rejects_zero_interval() {
        for (text, field) in [
            ("[drive]\nloop_interval_ms = 0\n", "drive.loop_interval_ms"),
            ("[pan]\nloop_interval_ms = 0\n", "pan.loop_interval_ms"),
            ("[input]\nretry_interval_ms = 0\n", "input.retry_interval_ms"),
            ("[motor]\nreconnect_interval_ms = 0\n", "motor.reconnect_interval_ms"),
        ] {
            let err = Config::from_toml(text).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { field: f, .. } if f == field),
                "{} accepted",
                field
            );
        }

        // Zero telemetry interval means polling is off, not an error
        let config = Config::from_toml("[motor]\ntelemetry_interval_ms = 0\n").unwrap();
        assert_eq!(config.motor.telemetry_interval(), None);
    }

    #[test]
    fn test_dump_round_trip() {
        let config = Config::default();
        let text = config.to_toml().unwrap();
        assert_eq!(Config::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_topic_prefix() {
        let zenoh = ZenohConfig {
            enabled: true,
            prefix: "droid/".to_string(),
        };
        assert_eq!(zenoh.topic(TOPIC_STATUS), "droid/state/status");
    }
}
