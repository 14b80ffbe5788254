// Motion control pipeline
//
// Provides:
// - Stick shaping (raw axis -> intent)
// - Shared intent state
// - Arcade mixing with drift correction
// - Last-sent gating with hysteresis and a neutral fast path

pub mod gate;
pub mod intent;
pub mod mixer;
pub mod shaper;

pub use gate::{ChannelGate, NativeRange, WheelGate, WheelWrites};
pub use intent::{Intent, IntentField, IntentReader, IntentWriter};
pub use mixer::{DriftBias, DriftPolicy, DriveMixer};
pub use shaper::{AxisShaper, shape};
