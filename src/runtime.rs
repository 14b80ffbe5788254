// Wires the peripherals, loops and controller session together
//
// Each peripheral that fails to open is logged and left out; the controller
// session still runs so the operator sees status and can trigger sounds.

use std::io::BufReader;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{Config, MotorConfig};
use crate::control;
use crate::dispatch::{self, ActuatorHandle, LoopSettings, OutboundQueue, run_blocking, spawn_actuator};
use crate::error::ErrorKind;
use crate::input::GamepadSource;
use crate::messages::SoundCategory;
use crate::motor::{DriveTrain, PanDrive};
use crate::session::InputSession;
use crate::status::{self, NoticeSink};

const PUBLISHER_GRACE: Duration = Duration::from_secs(1);

fn loop_settings(tick: Duration, motor: &MotorConfig) -> LoopSettings {
    LoopSettings {
        tick,
        max_consecutive_failures: motor.max_consecutive_failures,
        reconnect_interval: motor.reconnect_interval(),
    }
}

/// Open the aux link and start its drainer and line reader
fn start_aux(config: &Config, notices: &NoticeSink) -> Result<OutboundQueue, serialport::Error> {
    let aux = &config.aux;
    info!("Opening aux link on {}", aux.port);
    let writer = serialport::new(&aux.port, aux.baud_rate)
        .timeout(Duration::from_millis(aux.write_timeout_ms))
        .open()?;
    let mut reader = writer.try_clone()?;
    reader.set_timeout(Duration::from_millis(aux.read_timeout_ms))?;

    let (queue, messages) = OutboundQueue::channel();
    tokio::spawn(dispatch::outbound::drain(messages, writer, notices.clone()));
    tokio::spawn(dispatch::telemetry::read_lines(BufReader::new(reader), "aux"));
    Ok(queue)
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    config.validate()?;

    let zenoh_session = if config.zenoh.enabled {
        info!("Opening Zenoh session...");
        match zenoh::open(zenoh::Config::default()).await {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("Zenoh unavailable, notices will only be logged: {}", e);
                None
            }
        }
    } else {
        None
    };

    let (notices, notice_rx) = NoticeSink::channel();
    let publisher = tokio::spawn(status::publish(notice_rx, zenoh_session, config.zenoh.clone()));

    let (intent, reader) = control::intent::channel();
    let mut actuators: Vec<ActuatorHandle> = Vec::new();
    let mut loops: Vec<JoinHandle<()>> = Vec::new();

    match DriveTrain::connect(&config.motor, &config.drive) {
        Ok(train) => {
            let settings = loop_settings(config.drive.loop_interval(), &config.motor);
            let (handle, task) = spawn_actuator(train, reader.clone(), settings, notices.clone());
            actuators.push(handle);
            loops.push(task);
        }
        Err(e) => warn!("Wheels disabled, motor controller unavailable ({}): {}", e.kind(), e),
    }

    match PanDrive::connect(&config.pan) {
        Ok(pan) => {
            let pan = if config.pan.startup_sweep {
                let (pan, swept) = run_blocking(pan, |p| p.sweep()).await?;
                if let Err(e) = swept {
                    warn!("Pan startup sweep failed ({}): {}", e.kind(), e);
                }
                pan
            } else {
                pan
            };
            let settings = loop_settings(config.pan.loop_interval(), &config.motor);
            let (handle, task) = spawn_actuator(pan, reader.clone(), settings, notices.clone());
            actuators.push(handle);
            loops.push(task);
        }
        Err(e) => warn!("Pan disabled, pan controller unavailable ({}): {}", e.kind(), e),
    }

    notices.status(format!("SOUND: {}", SoundCategory::StarWars.label()));
    notices.sound(SoundCategory::StarWars);

    let mut session = InputSession::new(
        GamepadSource::spawn(),
        &config.input,
        &config.dpad,
        intent,
        notices.clone(),
    )
    .with_actuators(actuators.clone());
    match start_aux(&config, &notices) {
        Ok(queue) => session = session.with_outbound(queue),
        Err(e) => warn!("Aux link disabled ({}): {}", ErrorKind::Config, e),
    }

    info!(
        "Runtime started: {} actuator loop(s), waiting for controller",
        actuators.len()
    );

    let outcome: Result<(), Box<dyn std::error::Error + Send + Sync>> = tokio::select! {
        result = session.run() => result.map_err(Into::into),
        signal = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down");
            signal.map_err(Into::into)
        }
    };

    // Neutral on every actuator before its serial handle is released
    for handle in &actuators {
        if let Err(e) = handle.shutdown().await {
            warn!("Failed to shut down {} ({}): {}", handle.name(), e.kind(), e);
        }
    }
    drop(actuators);
    for task in loops {
        if let Err(e) = task.await {
            warn!("Actuator loop ended abnormally: {}", e);
        }
    }

    drop(notices);
    match tokio::time::timeout(PUBLISHER_GRACE, publisher).await {
        Ok(Ok(Err(e))) => warn!("Notice publisher failed: {}", e),
        Ok(Err(e)) => warn!("Notice publisher ended abnormally: {}", e),
        Err(_) => warn!("Notice publisher did not drain in time"),
        Ok(Ok(Ok(()))) => {}
    }

    info!("Runtime stopped");
    outcome
}
