// Status indicator, sound trigger and telemetry sinks
//
// Producers push notices into one channel; a single publisher task logs
// them and, when a zenoh session is available, publishes them as JSON.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{TOPIC_SOUND, TOPIC_STATUS, TOPIC_TELEMETRY, ZenohConfig};
use crate::messages::{MotorTelemetry, SoundCategory, SoundTrigger, StatusMessage};

/// Controller session state as shown on the indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Waiting,
    Connected,
    Lost,
    Offline,
}

impl SessionStatus {
    pub fn text(self) -> &'static str {
        match self {
            SessionStatus::Waiting => "WAITING FOR CTRL",
            SessionStatus::Connected => "CTRL CONNECTED",
            SessionStatus::Lost => "CTRL LOST",
            SessionStatus::Offline => "OFFLINE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Status(String),
    Sound(SoundCategory),
    Telemetry(MotorTelemetry),
}

/// Cheap, cloneable producer side
#[derive(Debug, Clone)]
pub struct NoticeSink {
    tx: mpsc::UnboundedSender<Notice>,
}

impl NoticeSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn push(&self, notice: Notice) {
        if self.tx.send(notice).is_err() {
            debug!("Notice publisher gone, dropping notice");
        }
    }

    pub fn status(&self, text: impl Into<String>) {
        self.push(Notice::Status(text.into()));
    }

    pub fn session(&self, status: SessionStatus) {
        self.status(status.text());
    }

    pub fn sound(&self, category: SoundCategory) {
        self.push(Notice::Sound(category));
    }

    pub fn telemetry(&self, telemetry: MotorTelemetry) {
        self.push(Notice::Telemetry(telemetry));
    }
}

/// Log every notice and publish it over zenoh when a session is given.
/// Runs until every sink has been dropped.
pub async fn publish(
    mut notices: mpsc::UnboundedReceiver<Notice>,
    session: Option<zenoh::Session>,
    config: ZenohConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let publishers = match &session {
        Some(session) => {
            info!("Publishing notices under {}/", config.prefix);
            Some((
                session.declare_publisher(config.topic(TOPIC_STATUS)).await?,
                session.declare_publisher(config.topic(TOPIC_SOUND)).await?,
                session.declare_publisher(config.topic(TOPIC_TELEMETRY)).await?,
            ))
        }
        None => None,
    };

    while let Some(notice) = notices.recv().await {
        let payload = match &notice {
            Notice::Status(text) => {
                info!("Status: {}", text);
                serde_json::to_string(&StatusMessage { text: text.clone() })?
            }
            Notice::Sound(category) => {
                info!("Sound trigger: {:?}", category);
                serde_json::to_string(&SoundTrigger {
                    category: *category,
                })?
            }
            Notice::Telemetry(telemetry) => {
                debug!("Telemetry: {:?}", telemetry);
                serde_json::to_string(telemetry)?
            }
        };

        let Some((pub_status, pub_sound, pub_telemetry)) = &publishers else {
            continue;
        };
        let publisher = match notice {
            Notice::Status(_) => pub_status,
            Notice::Sound(_) => pub_sound,
            Notice::Telemetry(_) => pub_telemetry,
        };
        if let Err(e) = publisher.put(payload).await {
            warn!("Failed to publish notice: {}", e);
        }
    }

    info!("Notice publisher stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_preserves_order() {
        let (sink, mut rx) = NoticeSink::channel();
        sink.session(SessionStatus::Waiting);
        sink.sound(SoundCategory::Hum);
        sink.status("SENT AUX");

        assert_eq!(rx.recv().await, Some(Notice::Status("WAITING FOR CTRL".into())));
        assert_eq!(rx.recv().await, Some(Notice::Sound(SoundCategory::Hum)));
        assert_eq!(rx.recv().await, Some(Notice::Status("SENT AUX".into())));
    }

    #[tokio::test]
    async fn test_publish_without_zenoh_drains_until_closed() {
        let (sink, rx) = NoticeSink::channel();
        sink.telemetry(MotorTelemetry::default());
        sink.session(SessionStatus::Lost);
        drop(sink);

        publish(rx, None, ZenohConfig::default()).await.unwrap();
    }

    #[test]
    fn test_dropped_publisher_is_harmless() {
        let (sink, rx) = NoticeSink::channel();
        drop(rx);
        sink.status("nobody listening");
    }
}
