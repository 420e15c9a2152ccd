// Zenoh session wrapper: command publishers, telemetry subscribers,
// ordered teardown.
//
// The rest of the crate treats this module as an opaque publish/subscribe
// capability; zenoh types do not leak past it. Session open failures are
// fatal, later publish failures are the caller's per-tick problem.

use std::future::Future;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use zenoh::handlers::FifoChannelHandler;
use zenoh::pubsub::{Publisher, Subscriber};
use zenoh::sample::Sample;

use crate::config::{ConfigError, STOP_BURST_SPACING, ZenohOpts};
use crate::messages::{MotorCommand, OledCommand};
use crate::topic::{self, TopicError, TopicSuffix};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Topic(#[from] TopicError),
}

impl From<zenoh::Error> for LinkError {
    fn from(e: zenoh::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Build the zenoh session config from an optional json5 file plus the
/// mode/endpoint overrides.
pub fn build_config(opts: &ZenohOpts) -> Result<zenoh::Config, ConfigError> {
    let mut config = match &opts.config {
        Some(path) => {
            if !path.exists() {
                return Err(ConfigError::ZenohConfigNotFound(path.clone()));
            }
            zenoh::Config::from_file(path).map_err(|e| ConfigError::ZenohConfig(e.to_string()))?
        }
        None => zenoh::Config::default(),
    };

    if !opts.connect.is_empty() {
        if !opts.mode.is_empty() {
            let mode = Value::String(opts.mode.clone()).to_string();
            config
                .insert_json5("mode", &mode)
                .map_err(|e| ConfigError::ZenohConfig(e.to_string()))?;
        }
        let endpoints = Value::from(opts.connect.clone()).to_string();
        config
            .insert_json5("connect/endpoints", &endpoints)
            .map_err(|e| ConfigError::ZenohConfig(e.to_string()))?;
    }

    Ok(config)
}

type TelemetrySubscriber = Subscriber<FifoChannelHandler<Sample>>;

/// One robot's channels on an open session.
pub struct RobotLink {
    session: zenoh::Session,
    pub_motor: Publisher<'static>,
    pub_oled: Publisher<'static>,
    sub_imu: Option<TelemetrySubscriber>,
    sub_camera_meta: Option<TelemetrySubscriber>,
    sub_camera_jpeg: Option<TelemetrySubscriber>,
}

impl RobotLink {
    /// Open the session and declare the command publishers.
    pub async fn connect(config: zenoh::Config, robot_id: &str) -> Result<Self, LinkError> {
        info!("opening zenoh session");
        let session = zenoh::open(config).await?;
        let pub_motor = session
            .declare_publisher(topic::topic_key(robot_id, TopicSuffix::MotorCmd)?)
            .await?;
        let pub_oled = session
            .declare_publisher(topic::topic_key(robot_id, TopicSuffix::OledCmd)?)
            .await?;
        info!(robot_id, "zenoh connected");
        Ok(Self {
            session,
            pub_motor,
            pub_oled,
            sub_imu: None,
            sub_camera_meta: None,
            sub_camera_jpeg: None,
        })
    }

    /// Declare the telemetry subscribers. Samples queue in FIFO handlers
    /// until the owner loop drains them.
    pub async fn open_telemetry(&mut self, robot_id: &str) -> Result<(), LinkError> {
        self.sub_imu = Some(
            self.session
                .declare_subscriber(topic::topic_key(robot_id, TopicSuffix::ImuState)?)
                .await?,
        );
        self.sub_camera_meta = Some(
            self.session
                .declare_subscriber(topic::topic_key(robot_id, TopicSuffix::CameraMeta)?)
                .await?,
        );
        self.sub_camera_jpeg = Some(
            self.session
                .declare_subscriber(topic::topic_key(robot_id, TopicSuffix::CameraJpeg)?)
                .await?,
        );
        Ok(())
    }

    pub async fn publish_motor(&self, cmd: &MotorCommand) -> Result<(), LinkError> {
        self.pub_motor.put(cmd.encode()?).await?;
        Ok(())
    }

    pub async fn publish_oled(&self, text: &str) -> Result<(), LinkError> {
        self.pub_oled.put(OledCommand::new(text).encode()?).await?;
        Ok(())
    }

    fn try_recv(sub: &Option<TelemetrySubscriber>) -> Option<Sample> {
        sub.as_ref().and_then(|s| s.try_recv().ok().flatten())
    }

    pub fn try_recv_imu(&self) -> Option<Sample> {
        Self::try_recv(&self.sub_imu)
    }

    pub fn try_recv_camera_meta(&self) -> Option<Sample> {
        Self::try_recv(&self.sub_camera_meta)
    }

    pub fn try_recv_camera_jpeg(&self) -> Option<Sample> {
        Self::try_recv(&self.sub_camera_jpeg)
    }

    /// Ordered teardown: telemetry subscribers, then command publishers,
    /// then the session. Each step logs its own failure and the next step
    /// still runs.
    pub async fn close(self) {
        let Self {
            session,
            pub_motor,
            pub_oled,
            sub_imu,
            sub_camera_meta,
            sub_camera_jpeg,
        } = self;

        if let Some(sub) = sub_camera_jpeg {
            if let Err(e) = sub.undeclare().await {
                warn!("camera jpeg unsubscribe failed: {e}");
            }
        }
        if let Some(sub) = sub_camera_meta {
            if let Err(e) = sub.undeclare().await {
                warn!("camera meta unsubscribe failed: {e}");
            }
        }
        if let Some(sub) = sub_imu {
            if let Err(e) = sub.undeclare().await {
                warn!("imu unsubscribe failed: {e}");
            }
        }
        if let Err(e) = pub_motor.undeclare().await {
            warn!("motor publisher undeclare failed: {e}");
        }
        if let Err(e) = pub_oled.undeclare().await {
            warn!("oled publisher undeclare failed: {e}");
        }
        if let Err(e) = session.close().await {
            warn!("session close failed: {e}");
        }
        debug!("zenoh link closed");
    }
}

/// Anything that can deliver a motor command. Lets the stop burst run
/// against a live link or a test double.
pub trait MotorSink {
    fn send(&self, cmd: &MotorCommand) -> impl Future<Output = Result<(), LinkError>>;
}

impl MotorSink for RobotLink {
    async fn send(&self, cmd: &MotorCommand) -> Result<(), LinkError> {
        self.publish_motor(cmd).await
    }
}

/// Burst of explicit zero commands defending against a single dropped
/// stop leaving the robot unsupervised past its deadman window. A publish
/// failure aborts the remainder (the transport is assumed down). Returns
/// how many commands went out.
pub async fn send_stop_burst<S, F>(sink: &S, mut next_stop: F, repeat: u32) -> u32
where
    S: MotorSink,
    F: FnMut() -> MotorCommand,
{
    for sent in 0..repeat {
        let cmd = next_stop();
        if let Err(e) = sink.send(&cmd).await {
            warn!("stop burst aborted after {sent}/{repeat}: {e}");
            return sent;
        }
        if sent + 1 < repeat {
            tokio::time::sleep(STOP_BURST_SPACING).await;
        }
    }
    repeat
}
