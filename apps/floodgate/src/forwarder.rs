//! The media-forwarding delegate boundary.
//!
//! The gateway and session never touch the media plane directly; they
//! drive a [`MediaForwarder`] created per publish by a
//! [`ForwarderFactory`]. The shipped implementation relays negotiation
//! primitives into the ingest pipeline over a channel; what happens to
//! them afterwards (encoding, muxing, RTMP output) is the pipeline's
//! business.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Connection parameters handed to the delegate before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwarderSettings {
    pub output_url: String,
    pub port_range_min: u16,
    pub port_range_max: u16,
    pub stun_uri: String,
    pub tcp_candidates_enabled: bool,
}

/// Offer/answer side of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

impl SdpKind {
    /// Maps the wire `type` field. Only the literal `offer` means offer;
    /// anything else is treated as an answer.
    pub fn from_wire(type_field: &str) -> Self {
        if type_field == "offer" {
            SdpKind::Offer
        } else {
            SdpKind::Answer
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SdpKind::Offer => "offer",
            SdpKind::Answer => "answer",
        }
    }
}

#[derive(Debug, Error)]
pub enum ForwarderError {
    #[error("forwarder failed to start: {0}")]
    StartFailed(String),
    #[error("ingest pipeline is gone")]
    PipelineClosed,
}

/// What a bridging session needs from the media plane.
#[async_trait]
pub trait MediaForwarder: Send + Sync {
    async fn start(&self) -> Result<(), ForwarderError>;

    /// Idempotent; may be called from both an explicit stop command and
    /// connection close, in either order.
    async fn stop(&self);

    async fn set_remote_description(&self, kind: SdpKind, sdp: &str)
        -> Result<(), ForwarderError>;

    async fn add_candidate(
        &self,
        mid: &str,
        line_index: u32,
        sdp: &str,
    ) -> Result<(), ForwarderError>;
}

/// Constructs a configured, not-yet-started forwarder for one publish.
/// Swapping the concrete media technology means swapping the factory;
/// gateway and session stay untouched.
pub trait ForwarderFactory: Send + Sync {
    fn create(
        &self,
        settings: ForwarderSettings,
        events: mpsc::UnboundedSender<ForwarderEvent>,
    ) -> Arc<dyn MediaForwarder>;
}

/// Signals flowing back from the media plane into the signaling layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ForwarderEvent {
    /// The media path is connected; the publish is live.
    MediaConnected,
    /// A local description to echo to the publisher.
    LocalDescription { kind: SdpKind, sdp: String },
    /// A locally gathered candidate to echo to the publisher.
    LocalCandidate {
        mid: String,
        line_index: u32,
        sdp: String,
    },
    /// The media plane could not apply its local description.
    LocalDescriptionFailed,
}

/// Commands relayed into the ingest pipeline. `Start` carries the event
/// sender the pipeline uses to talk back to the signaling layer.
#[derive(Debug)]
pub enum PipelineCommand {
    Start {
        settings: ForwarderSettings,
        events: mpsc::UnboundedSender<ForwarderEvent>,
    },
    RemoteDescription {
        output_url: String,
        kind: SdpKind,
        sdp: String,
    },
    Candidate {
        output_url: String,
        mid: String,
        line_index: u32,
        sdp: String,
    },
    Stop {
        output_url: String,
    },
}

/// Forwarder that bridges one publish into the shared ingest pipeline
/// channel. Exclusively owned by its session.
pub struct PipelineForwarder {
    settings: ForwarderSettings,
    commands: mpsc::UnboundedSender<PipelineCommand>,
    events: mpsc::UnboundedSender<ForwarderEvent>,
    stopped: AtomicBool,
}

#[async_trait]
impl MediaForwarder for PipelineForwarder {
    async fn start(&self) -> Result<(), ForwarderError> {
        self.commands
            .send(PipelineCommand::Start {
                settings: self.settings.clone(),
                events: self.events.clone(),
            })
            .map_err(|_| ForwarderError::StartFailed("ingest pipeline is gone".into()))
    }

    async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let stop = PipelineCommand::Stop {
            output_url: self.settings.output_url.clone(),
        };
        if self.commands.send(stop).is_err() {
            debug!(output = %self.settings.output_url, "pipeline already gone on stop");
        }
    }

    async fn set_remote_description(
        &self,
        kind: SdpKind,
        sdp: &str,
    ) -> Result<(), ForwarderError> {
        self.commands
            .send(PipelineCommand::RemoteDescription {
                output_url: self.settings.output_url.clone(),
                kind,
                sdp: sdp.to_string(),
            })
            .map_err(|_| ForwarderError::PipelineClosed)
    }

    async fn add_candidate(
        &self,
        mid: &str,
        line_index: u32,
        sdp: &str,
    ) -> Result<(), ForwarderError> {
        self.commands
            .send(PipelineCommand::Candidate {
                output_url: self.settings.output_url.clone(),
                mid: mid.to_string(),
                line_index,
                sdp: sdp.to_string(),
            })
            .map_err(|_| ForwarderError::PipelineClosed)
    }
}

/// Factory wired to one ingest pipeline channel, shared by every
/// connection.
pub struct PipelineForwarderFactory {
    commands: mpsc::UnboundedSender<PipelineCommand>,
}

impl PipelineForwarderFactory {
    pub fn new(commands: mpsc::UnboundedSender<PipelineCommand>) -> Self {
        Self { commands }
    }
}

impl ForwarderFactory for PipelineForwarderFactory {
    fn create(
        &self,
        settings: ForwarderSettings,
        events: mpsc::UnboundedSender<ForwarderEvent>,
    ) -> Arc<dyn MediaForwarder> {
        Arc::new(PipelineForwarder {
            settings,
            commands: self.commands.clone(),
            events,
            stopped: AtomicBool::new(false),
        })
    }
}

/// Drains pipeline commands and logs them. Stands in for the media
/// pipeline attach point when no encoder backend is wired up.
pub fn spawn_log_sink(mut commands: mpsc::UnboundedReceiver<PipelineCommand>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            debug!(?command, "ingest pipeline command");
        }
    })
}
