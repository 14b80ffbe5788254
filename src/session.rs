// Controller session: connect, translate events into intent, recover from loss
//
// Transport errors from the controller (device removed, read failure) stop
// every actuator and send the session back to connecting. Anything else
// stops the actuators and ends the session for good.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, error, info, warn};

use crate::config::{DpadConfig, InputConfig, PadAction};
use crate::control::{AxisShaper, IntentField, IntentWriter};
use crate::dispatch::{ActuatorHandle, OutboundQueue};
use crate::error::ErrorKind;
use crate::input::codes::*;
use crate::input::{ControllerEvent, ControllerSource, InputError};
use crate::messages::SoundCategory;
use crate::status::{NoticeSink, SessionStatus};

/// Upper bound on one actuator's stop acknowledgement
const STOP_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("Axis {code} reported out-of-range value {value}")]
    AxisRange { code: u16, value: i32 },
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Input(e) => e.kind(),
            SessionError::AxisRange { .. } => ErrorKind::Protocol,
        }
    }
}

/// Runs the fire-and-forget feedback tasks started by event handlers
pub trait Spawner: Send + Sync {
    fn spawn(&self, task: Pin<Box<dyn Future<Output = ()> + Send>>);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl Spawner for TokioSpawner {
    fn spawn(&self, task: Pin<Box<dyn Future<Output = ()> + Send>>) {
        tokio::spawn(task);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Left,
    Right,
    Up,
    Down,
}

pub struct InputSession<S: ControllerSource> {
    source: S,
    axes: [(IntentField, AxisShaper); 3],
    dpad: DpadConfig,
    retry_interval: Duration,
    intent: IntentWriter,
    outbound: Option<OutboundQueue>,
    actuators: Vec<ActuatorHandle>,
    notices: NoticeSink,
    spawner: Arc<dyn Spawner>,
}

impl<S: ControllerSource> InputSession<S> {
    pub fn new(
        source: S,
        input: &InputConfig,
        dpad: &DpadConfig,
        intent: IntentWriter,
        notices: NoticeSink,
    ) -> Self {
        Self {
            source,
            axes: [
                (IntentField::Forward, AxisShaper::new(input.forward)),
                (IntentField::Turn, AxisShaper::new(input.turn)),
                (IntentField::Aux, AxisShaper::new(input.aux)),
            ],
            dpad: dpad.clone(),
            retry_interval: input.retry_interval(),
            intent,
            outbound: None,
            actuators: Vec::new(),
            notices,
            spawner: Arc::new(TokioSpawner),
        }
    }

    pub fn with_outbound(mut self, queue: OutboundQueue) -> Self {
        self.outbound = Some(queue);
        self
    }

    /// Actuators to bring to neutral whenever the controller goes away
    pub fn with_actuators(mut self, actuators: Vec<ActuatorHandle>) -> Self {
        self.actuators = actuators;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Run until a non-recoverable error
    pub async fn run(mut self) -> Result<(), SessionError> {
        loop {
            self.connect().await?;

            let e = self.pump().await;
            if e.kind() == ErrorKind::Transport {
                self.lost(&e).await;
                continue;
            }

            self.fatal(&e).await;
            return Err(e);
        }
    }

    async fn connect(&mut self) -> Result<(), SessionError> {
        self.notices.session(SessionStatus::Waiting);
        info!("Waiting for controller");

        let mut retry = interval(self.retry_interval);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            retry.tick().await;
            match self.source.open().await {
                Ok(()) => break,
                Err(e) if e.kind() == ErrorKind::Transport => {
                    debug!("Controller not available: {}", e);
                }
                Err(e) => {
                    let e = SessionError::from(e);
                    self.fatal(&e).await;
                    return Err(e);
                }
            }
        }

        self.notices.session(SessionStatus::Connected);
        info!("Controller connected");
        Ok(())
    }

    /// Read and apply events until one fails in a way that ends the connection
    async fn pump(&mut self) -> SessionError {
        loop {
            let result = match self.source.next_event().await {
                Ok(event) => self.handle(event),
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Protocol => {
                    warn!("Skipping controller event ({}): {}", e.kind(), e);
                }
                Err(e) => return e,
            }
        }
    }

    async fn lost(&mut self, e: &SessionError) {
        warn!("Controller lost ({}): {}", e.kind(), e);
        self.intent.reset();
        stop_all(&self.actuators).await;
        self.notices.session(SessionStatus::Lost);
    }

    async fn fatal(&mut self, e: &SessionError) {
        error!("Control session failed ({}): {}", e.kind(), e);
        self.intent.reset();
        stop_all(&self.actuators).await;
        self.notices.session(SessionStatus::Offline);
    }

    fn handle(&mut self, event: ControllerEvent) -> Result<(), SessionError> {
        match event {
            ControllerEvent::Button {
                code,
                pressed: true,
            } => {
                self.on_button(code);
                Ok(())
            }
            ControllerEvent::Button { .. } => Ok(()),
            ControllerEvent::Axis { code, value } if code == HAT0_X || code == HAT0_Y => {
                self.on_hat(code, value)
            }
            ControllerEvent::Axis { code, value } => self.on_axis(code, value),
        }
    }

    fn on_axis(&mut self, code: u16, value: i32) -> Result<(), SessionError> {
        let mut mapped = self.axes.iter().filter(|(_, shaper)| shaper.code() == code).peekable();
        if mapped.peek().is_none() {
            return Ok(());
        }
        let raw = u8::try_from(value).map_err(|_| SessionError::AxisRange { code, value })?;
        for (field, shaper) in mapped {
            self.intent.set(*field, shaper.shape(raw));
        }
        Ok(())
    }

    fn on_button(&self, code: u16) {
        let category = match code {
            BTN_A => SoundCategory::Sent,
            BTN_B => SoundCategory::Annoyed,
            BTN_X => SoundCategory::Proc,
            BTN_Y => SoundCategory::Hum,
            BTN_L1 => SoundCategory::Cantina,
            BTN_R1 => SoundCategory::Scream,
            BTN_L2_CLICK | BTN_R2_CLICK => return,
            other => {
                debug!("Unsupported button {}", other);
                self.notices.status("Unsupported");
                return;
            }
        };
        self.play(category);
    }

    fn on_hat(&mut self, code: u16, value: i32) -> Result<(), SessionError> {
        let direction = match (code, value) {
            (_, 0) => return Ok(()),
            (HAT0_X, -1) => Direction::Left,
            (HAT0_X, 1) => Direction::Right,
            (HAT0_Y, -1) => Direction::Up,
            (HAT0_Y, 1) => Direction::Down,
            _ => return Err(SessionError::AxisRange { code, value }),
        };
        let action = match direction {
            Direction::Left => &self.dpad.left,
            Direction::Right => &self.dpad.right,
            Direction::Up => &self.dpad.up,
            Direction::Down => &self.dpad.down,
        };
        debug!("D-pad {:?}: {:?}", direction, action);

        match action {
            PadAction::None => {}
            PadAction::Sound(category) => self.play(*category),
            PadAction::Aux(bytes) => match &self.outbound {
                Some(queue) => {
                    if let Err(e) = queue.push(bytes.clone()) {
                        warn!("Aux link gone, dropping it ({}): {}", e.kind(), e);
                        self.outbound = None;
                        self.notices.status("AUX LOST");
                    }
                }
                None => warn!(
                    "D-pad {:?} wants the aux link but none is configured ({})",
                    direction,
                    ErrorKind::Config
                ),
            },
        }
        Ok(())
    }

    /// Fire-and-forget sound trigger
    fn play(&self, category: SoundCategory) {
        let notices = self.notices.clone();
        self.spawner.spawn(Box::pin(async move {
            notices.status(format!("SOUND: {}", category.label()));
            notices.sound(category);
        }));
    }
}

/// Stop every actuator concurrently; one failing or hung actuator does not hold up the rest
async fn stop_all(actuators: &[ActuatorHandle]) {
    let mut stops = JoinSet::new();
    for handle in actuators.iter().cloned() {
        stops.spawn(async move {
            let result = timeout(STOP_TIMEOUT, handle.stop()).await;
            (handle.name(), result)
        });
    }

    while let Some(joined) = stops.join_next().await {
        match joined {
            Ok((name, Ok(Ok(())))) => info!("{} stopped", name),
            Ok((name, Ok(Err(e)))) => warn!("Failed to stop {} ({}): {}", name, e.kind(), e),
            Ok((name, Err(_))) => warn!("Timed out stopping {}", name),
            Err(e) => error!("Stop task failed ({}): {}", ErrorKind::Logic, e),
        }
    }
}
