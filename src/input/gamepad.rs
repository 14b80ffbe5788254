// gilrs-backed controller source
//
// gilrs is polled on a dedicated thread; its events are translated to the
// evdev-style codes the session works with and forwarded over a channel.

use std::thread;
use std::time::Duration;

use gilrs::{Axis, Button, EventType, Gilrs};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::codes::*;
use super::{ControllerEvent, ControllerSource, InputError};

const POLL_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug)]
enum GamepadSignal {
    Connected { id: usize, name: String },
    Disconnected { id: usize },
    Event { id: usize, event: ControllerEvent },
}

pub struct GamepadSource {
    signals: mpsc::UnboundedReceiver<GamepadSignal>,
    active: Option<usize>,
}

impl GamepadSource {
    /// Start the gilrs thread. It exits once the source is dropped.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        // A thread that never started shows up as a closed channel on open()
        if let Err(e) = thread::Builder::new()
            .name("gamepad".into())
            .spawn(move || poll_gilrs(tx))
        {
            error!("Failed to start gamepad thread: {}", e);
        }
        Self {
            signals: rx,
            active: None,
        }
    }

    fn track(&mut self, signal: &GamepadSignal) {
        match *signal {
            GamepadSignal::Connected { id, ref name } => {
                info!("Gamepad {} connected: {}", id, name);
                self.active.get_or_insert(id);
            }
            GamepadSignal::Disconnected { id } if self.active == Some(id) => {
                self.active = None;
            }
            _ => {}
        }
    }
}

impl ControllerSource for GamepadSource {
    async fn open(&mut self) -> Result<(), InputError> {
        loop {
            match self.signals.try_recv() {
                Ok(signal) => self.track(&signal),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    return Err(InputError::Backend("gamepad thread stopped".into()));
                }
            }
        }
        match self.active {
            Some(_) => Ok(()),
            None => Err(InputError::NotConnected),
        }
    }

    async fn next_event(&mut self) -> Result<ControllerEvent, InputError> {
        loop {
            let Some(signal) = self.signals.recv().await else {
                return Err(InputError::Backend("gamepad thread stopped".into()));
            };
            match signal {
                GamepadSignal::Event { id, event } if self.active == Some(id) => return Ok(event),
                GamepadSignal::Event { id, .. } => debug!("Ignoring event from gamepad {}", id),
                GamepadSignal::Disconnected { id } if self.active == Some(id) => {
                    self.active = None;
                    return Err(InputError::Removed(format!("gamepad {}", id)));
                }
                other => self.track(&other),
            }
        }
    }
}

fn poll_gilrs(tx: mpsc::UnboundedSender<GamepadSignal>) {
    let mut gilrs = match Gilrs::new() {
        Ok(gilrs) => gilrs,
        Err(e) => {
            error!("Failed to initialize gilrs: {}", e);
            return;
        }
    };
    info!("Gamepad thread started");

    for (id, gamepad) in gilrs.gamepads() {
        let signal = GamepadSignal::Connected {
            id: id.into(),
            name: gamepad.name().to_string(),
        };
        if tx.send(signal).is_err() {
            return;
        }
    }

    while !tx.is_closed() {
        let Some(event) = gilrs.next_event_blocking(Some(POLL_TIMEOUT)) else {
            continue;
        };
        let id: usize = event.id.into();
        let signal = match event.event {
            EventType::Connected => GamepadSignal::Connected {
                id,
                name: gilrs.gamepad(event.id).name().to_string(),
            },
            EventType::Disconnected => {
                warn!("Gamepad {} disconnected", id);
                GamepadSignal::Disconnected { id }
            }
            other => match translate(other) {
                Some(event) => GamepadSignal::Event { id, event },
                None => continue,
            },
        };
        if tx.send(signal).is_err() {
            break;
        }
    }

    info!("Gamepad thread stopped");
}

/// gilrs event -> controller event with evdev-style codes
fn translate(event: EventType) -> Option<ControllerEvent> {
    match event {
        EventType::ButtonPressed(button, code) => Some(button_event(button, code, true)),
        EventType::ButtonReleased(button, code) => Some(button_event(button, code, false)),
        EventType::AxisChanged(axis, value, _) => {
            let (code, flip) = match axis {
                Axis::LeftStickX => (AXIS_LEFT_X, false),
                Axis::LeftStickY => (AXIS_LEFT_Y, true),
                Axis::RightStickX => (AXIS_RIGHT_X, false),
                Axis::RightStickY => (AXIS_RIGHT_Y, true),
                _ => return None,
            };
            Some(ControllerEvent::Axis {
                code,
                value: raw_from_unit(value, flip),
            })
        }
        _ => None,
    }
}

fn button_event(button: Button, code: gilrs::ev::Code, pressed: bool) -> ControllerEvent {
    let hat = |code, direction: i32| ControllerEvent::Axis {
        code,
        value: if pressed { direction } else { 0 },
    };
    match button {
        Button::DPadLeft => hat(HAT0_X, -1),
        Button::DPadRight => hat(HAT0_X, 1),
        Button::DPadUp => hat(HAT0_Y, -1),
        Button::DPadDown => hat(HAT0_Y, 1),
        other => ControllerEvent::Button {
            code: button_code(other).unwrap_or(code.into_u32() as u16),
            pressed,
        },
    }
}

fn button_code(button: Button) -> Option<u16> {
    Some(match button {
        Button::South => BTN_A,
        Button::East => BTN_B,
        Button::North => BTN_X,
        Button::West => BTN_Y,
        Button::LeftTrigger => BTN_L1,
        Button::RightTrigger => BTN_R1,
        Button::LeftTrigger2 => BTN_L2_CLICK,
        Button::RightTrigger2 => BTN_R2_CLICK,
        _ => return None,
    })
}

/// gilrs axis value in [-1, 1] -> raw 0..=255 with up/left low
fn raw_from_unit(value: f32, flip: bool) -> i32 {
    let value = if flip { -value } else { value };
    ((value.clamp(-1.0, 1.0) + 1.0) * 127.5).round() as i32
}
