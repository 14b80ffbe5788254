// Dispatch loops: drive/pan actuator loops, outbound aux queue, inbound line reader
//
// Every loop is its own task and owns exactly one serial writer, so command
// frames from different loops never interleave on one link.

pub mod outbound;
pub mod telemetry;

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::control::{Intent, IntentReader};
use crate::error::ErrorKind;
use crate::messages::MotorTelemetry;
use crate::motor::MotorError;
use crate::status::NoticeSink;

pub use outbound::{OutboundQueue, QueueClosed};

/// Re-opens an actuator's serial port
pub type Opener<P> = Box<dyn FnMut() -> Result<P, MotorError> + Send>;

/// A serial actuator driven by a periodic loop
pub trait Actuator: Send + 'static {
    fn name(&self) -> &'static str;

    /// One control tick from the latest intent
    fn apply(&mut self, intent: &Intent) -> Result<(), MotorError>;

    /// Command neutral, regardless of what was last sent
    fn stop(&mut self) -> Result<(), MotorError>;

    /// Release the serial handle after sustained failure
    fn disconnect(&mut self);

    /// Reopen and re-initialize; last-sent state returns to neutral
    fn reconnect(&mut self) -> Result<(), MotorError>;

    /// Blocking periodic read, run off the loop's task
    fn poll(&mut self) -> Result<Option<MotorTelemetry>, MotorError> {
        Ok(None)
    }

    fn poll_interval(&self) -> Option<Duration> {
        None
    }
}

/// Run a blocking operation on the blocking pool, handing the device back afterwards
pub async fn run_blocking<D, R, F>(device: D, f: F) -> Result<(D, R), JoinError>
where
    D: Send + 'static,
    R: Send + 'static,
    F: FnOnce(&mut D) -> R + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut device = device;
        let result = f(&mut device);
        (device, result)
    })
    .await
}

/// Session state of one serial peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Counts consecutive failures; one success clears the count
#[derive(Debug, Clone, Copy)]
pub struct FailureTracker {
    consecutive: u32,
    limit: u32,
}

impl FailureTracker {
    pub fn new(limit: u32) -> Self {
        Self {
            consecutive: 0,
            limit: limit.max(1),
        }
    }

    /// Record a failure; true once the limit is reached
    pub fn record(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive >= self.limit
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn count(&self) -> u32 {
        self.consecutive
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub tick: Duration,
    pub max_consecutive_failures: u32,
    pub reconnect_interval: Duration,
}

type Reply = oneshot::Sender<Result<(), MotorError>>;

#[derive(Debug)]
pub enum ActuatorRequest {
    /// Neutral now, keep running
    Stop(Reply),
    /// Neutral now, then end the loop and release the port
    Shutdown(Reply),
}

/// Handle used by the session and the runtime to reach an actuator loop
#[derive(Debug, Clone)]
pub struct ActuatorHandle {
    name: &'static str,
    tx: mpsc::Sender<ActuatorRequest>,
}

impl ActuatorHandle {
    pub fn new(name: &'static str, tx: mpsc::Sender<ActuatorRequest>) -> Self {
        Self { name, tx }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    async fn request(&self, make: fn(Reply) -> ActuatorRequest) -> Result<(), MotorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| MotorError::LoopGone(self.name))?;
        rx.await.map_err(|_| MotorError::LoopGone(self.name))?
    }

    pub async fn stop(&self) -> Result<(), MotorError> {
        self.request(ActuatorRequest::Stop).await
    }

    pub async fn shutdown(&self) -> Result<(), MotorError> {
        self.request(ActuatorRequest::Shutdown).await
    }
}

/// Spawn the periodic loop for one actuator
pub fn spawn_actuator<A: Actuator>(
    actuator: A,
    intent: IntentReader,
    settings: LoopSettings,
    notices: NoticeSink,
) -> (ActuatorHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(8);
    let handle = ActuatorHandle::new(actuator.name(), tx);
    let task = tokio::spawn(run_actuator(actuator, intent, settings, rx, notices));
    (handle, task)
}

enum LoopEvent {
    Request(Option<ActuatorRequest>),
    Tick,
}

fn stop_and_reply<A: Actuator>(actuator: &mut A, reply: Reply) {
    let result = actuator.stop();
    if let Err(e) = &result {
        warn!("{} stop failed ({}): {}", actuator.name(), e.kind(), e);
    }
    let _ = reply.send(result);
}

async fn run_actuator<A: Actuator>(
    mut actuator: A,
    intent: IntentReader,
    settings: LoopSettings,
    mut requests: mpsc::Receiver<ActuatorRequest>,
    notices: NoticeSink,
) {
    let name = actuator.name();
    let mut tick = interval(settings.tick);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut link = LinkState::Connected;
    let mut failures = FailureTracker::new(settings.max_consecutive_failures);
    let mut last_attempt = Instant::now();
    let poll_interval = actuator.poll_interval();
    let mut last_poll = Instant::now();

    info!("{} loop started: {}ms tick", name, settings.tick.as_millis());

    loop {
        // Requests win over ticks so a stop is never delayed by a drive write
        let event = tokio::select! {
            biased;
            request = requests.recv() => LoopEvent::Request(request),
            _ = tick.tick() => LoopEvent::Tick,
        };

        match event {
            LoopEvent::Request(Some(ActuatorRequest::Stop(reply))) => {
                stop_and_reply(&mut actuator, reply);
            }
            LoopEvent::Request(Some(ActuatorRequest::Shutdown(reply))) => {
                stop_and_reply(&mut actuator, reply);
                break;
            }
            LoopEvent::Request(None) => {
                info!("{} handles dropped", name);
                if let Err(e) = actuator.stop() {
                    warn!("{} stop failed: {}", name, e);
                }
                break;
            }
            LoopEvent::Tick if link == LinkState::Connected => {
                match actuator.apply(&intent.snapshot()) {
                    Ok(()) => failures.reset(),
                    Err(e) if !e.kind().is_recoverable() => {
                        error!("{} fault ({}), stopping loop: {}", name, e.kind(), e);
                        if let Err(e) = actuator.stop() {
                            warn!("{} stop after fault failed ({}): {}", name, e.kind(), e);
                        }
                        notices.status(format!("{} FAULT", name.to_uppercase()));
                        break;
                    }
                    Err(e) => {
                        warn!(
                            "{} write failed ({}, {} in a row): {}",
                            name,
                            e.kind(),
                            failures.count() + 1,
                            e
                        );
                        if failures.record() {
                            warn!("{} link lost after {} failures", name, failures.count());
                            actuator.disconnect();
                            link = LinkState::Disconnected;
                            last_attempt = Instant::now();
                            notices.status(format!("{} LOST", name.to_uppercase()));
                            continue;
                        }
                    }
                }

                let poll_due = poll_interval.is_some_and(|every| last_poll.elapsed() >= every);
                if poll_due {
                    last_poll = Instant::now();
                    match run_blocking(actuator, |a| a.poll()).await {
                        Ok((a, result)) => {
                            actuator = a;
                            match result {
                                Ok(Some(telemetry)) => notices.telemetry(telemetry),
                                Ok(None) => {}
                                Err(e) => warn!("{} telemetry unavailable ({}): {}", name, e.kind(), e),
                            }
                        }
                        Err(e) => {
                            error!("{} telemetry worker failed ({}): {}", name, ErrorKind::Logic, e);
                            return;
                        }
                    }
                }
            }
            LoopEvent::Tick if link == LinkState::Disconnected => {
                if last_attempt.elapsed() >= settings.reconnect_interval {
                    debug!("{} reconnecting", name);
                    link = LinkState::Connecting;
                }
            }
            LoopEvent::Tick => {
                // Port open and init sequence run on the blocking pool
                last_attempt = Instant::now();
                match run_blocking(actuator, |a| a.reconnect()).await {
                    Ok((a, Ok(()))) => {
                        actuator = a;
                        link = LinkState::Connected;
                        failures.reset();
                        info!("{} link restored", name);
                        notices.status(format!("{} OK", name.to_uppercase()));
                    }
                    Ok((a, Err(e))) => {
                        actuator = a;
                        link = LinkState::Disconnected;
                        debug!("{} reconnect failed ({}): {}", name, e.kind(), e);
                    }
                    Err(e) => {
                        error!("{} reconnect worker failed ({}): {}", name, ErrorKind::Logic, e);
                        return;
                    }
                }
            }
        }
    }

    info!("{} loop stopped", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DriveConfig, MotorConfig};
    use crate::control::{self, DriftPolicy, IntentField};
    use crate::motor::mock::MockPort;
    use crate::motor::{Command, DriveTrain, Frame};
    use crate::status::Notice;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const TICK: Duration = Duration::from_millis(50);

    fn settings() -> LoopSettings {
        LoopSettings {
            tick: TICK,
            max_consecutive_failures: 3,
            reconnect_interval: Duration::from_millis(200),
        }
    }

    fn motor_config() -> MotorConfig {
        MotorConfig {
            safe_defaults: false,
            telemetry_interval_ms: 0,
            ..MotorConfig::default()
        }
    }

    fn drive_train(port: &MockPort, available: Arc<AtomicBool>) -> DriveTrain<MockPort> {
        let handle = port.clone();
        let drive = DriveConfig {
            drift: DriftPolicy::Off,
            ..DriveConfig::default()
        };
        let opener: Opener<MockPort> = Box::new(move || {
            if available.load(Ordering::SeqCst) {
                Ok(handle.clone())
            } else {
                Err(MotorError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no such port",
                )))
            }
        });
        let train = DriveTrain::with_opener(opener, &motor_config(), &drive).unwrap();
        port.take_written();
        train
    }

    fn frames(port: &MockPort) -> Vec<Frame> {
        Frame::decode_stream(&port.take_written()).unwrap()
    }

    fn neutral_pair() -> Vec<Frame> {
        vec![
            Frame::with_data(Command::SetSpeed1, 128),
            Frame::with_data(Command::SetSpeed2, 128),
        ]
    }

    #[test]
    fn test_failure_tracker() {
        let mut tracker = FailureTracker::new(2);
        assert!(!tracker.record());
        tracker.reset();
        assert!(!tracker.record());
        assert!(tracker.record());
        assert_eq!(tracker.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_follows_latest_intent() {
        let port = MockPort::new();
        let train = drive_train(&port, Arc::new(AtomicBool::new(true)));
        let (writer, reader) = control::intent::channel();
        let (notices, _rx) = NoticeSink::channel();
        let (handle, task) = spawn_actuator(train, reader, settings(), notices);

        writer.set(IntentField::Forward, 0.2);
        writer.set(IntentField::Forward, 0.5);
        tokio::time::sleep(TICK * 3).await;

        assert_eq!(
            frames(&port),
            vec![
                Frame::with_data(Command::SetSpeed1, 191),
                Frame::with_data(Command::SetSpeed2, 191),
            ]
        );

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert_eq!(frames(&port), neutral_pair());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_request_sends_one_neutral() {
        let port = MockPort::new();
        let train = drive_train(&port, Arc::new(AtomicBool::new(true)));
        let (writer, reader) = control::intent::channel();
        let (notices, _rx) = NoticeSink::channel();
        let (handle, _task) = spawn_actuator(train, reader, settings(), notices);

        writer.set(IntentField::Forward, 0.5);
        tokio::time::sleep(TICK * 2).await;
        port.take_written();

        // What the session does on controller loss
        writer.reset();
        handle.stop().await.unwrap();
        assert_eq!(frames(&port), neutral_pair());

        // Intent stays zero: no spurious re-stop on later ticks
        tokio::time::sleep(TICK * 10).await;
        assert!(frames(&port).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_failure_disconnects_and_recovers() {
        let port = MockPort::new();
        let available = Arc::new(AtomicBool::new(true));
        let train = drive_train(&port, available.clone());
        let (writer, reader) = control::intent::channel();
        let (notices, mut rx) = NoticeSink::channel();
        let (handle, _task) = spawn_actuator(train, reader, settings(), notices);

        port.set_fail_writes(true);
        available.store(false, Ordering::SeqCst);
        writer.set(IntentField::Forward, 0.5);
        tokio::time::sleep(TICK * 5).await;
        assert_eq!(rx.try_recv().unwrap(), Notice::Status("WHEELS LOST".into()));

        // While disconnected a stop cannot reach the wheels
        let err = handle.stop().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);

        port.set_fail_writes(false);
        available.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(rx.try_recv().unwrap(), Notice::Status("WHEELS OK".into()));

        // Re-initialized to neutral, then the held intent is written again
        let written = frames(&port);
        assert_eq!(written[..3], [Frame::new(Command::DisableTimeout), neutral_pair()[0], neutral_pair()[1]]);
        assert_eq!(
            written[3..],
            [
                Frame::with_data(Command::SetSpeed1, 191),
                Frame::with_data(Command::SetSpeed2, 191),
            ]
        );
    }

    /// Fails every tick with a logic error and counts stop attempts
    struct Faulty {
        stops: Arc<AtomicUsize>,
    }

    impl Actuator for Faulty {
        fn name(&self) -> &'static str {
            "pan"
        }

        fn apply(&mut self, _intent: &Intent) -> Result<(), MotorError> {
            Err(MotorError::InvalidMode(9))
        }

        fn stop(&mut self) -> Result<(), MotorError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Err(MotorError::Disconnected("pan"))
        }

        fn disconnect(&mut self) {}

        fn reconnect(&mut self) -> Result<(), MotorError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_logic_fault_stops_once_and_ends_loop() {
        let stops = Arc::new(AtomicUsize::new(0));
        let (_writer, reader) = control::intent::channel();
        let (notices, mut rx) = NoticeSink::channel();
        let (_handle, task) = spawn_actuator(Faulty { stops: stops.clone() }, reader, settings(), notices);

        task.await.unwrap();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(rx.try_recv().unwrap(), Notice::Status("PAN FAULT".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_stops_loop() {
        let port = MockPort::new();
        let train = drive_train(&port, Arc::new(AtomicBool::new(true)));
        let (_writer, reader) = control::intent::channel();
        let (notices, _rx) = NoticeSink::channel();
        let (handle, task) = spawn_actuator(train, reader, settings(), notices);

        drop(handle);
        task.await.unwrap();
        // Already neutral when dropped, so the driver's drop adds nothing
        assert_eq!(frames(&port), neutral_pair());
    }
}
