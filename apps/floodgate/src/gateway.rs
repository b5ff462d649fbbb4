//! Per-connection protocol handler: decodes control messages, drives the
//! publish session, and emits responses. Every fault is converted to a
//! log entry here; nothing escapes into the connection's event loop, and
//! nothing here can touch another connection's state.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::datastore::{DataStore, StreamRecord, StreamStatus};
use crate::forwarder::{ForwarderEvent, ForwarderFactory, ForwarderSettings, SdpKind};
use crate::protocol::{
    self, Command, CommandEnvelope, ErrorKind, NotificationKind, ServerMessage,
};
use crate::session::{ConnectionContext, PublishSession};
use crate::validator;

/// Per-connection snapshot of the negotiation settings, resolved once at
/// connection open.
#[derive(Debug, Clone)]
struct ConnectionSettings {
    port_range_min: u16,
    port_range_max: u16,
    stun_uri: String,
    tcp_candidates_enabled: bool,
}

impl ConnectionSettings {
    fn from_config(config: &Config) -> Self {
        Self {
            port_range_min: config.port_range_min,
            port_range_max: config.port_range_max,
            stun_uri: config.stun_uri.clone(),
            tcp_candidates_enabled: config.tcp_candidates_enabled,
        }
    }
}

pub struct SignalingGateway {
    connection_id: String,
    config: Arc<Config>,
    forwarders: Arc<dyn ForwarderFactory>,
    datastore: Arc<dyn DataStore>,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    forwarder_events: mpsc::UnboundedSender<ForwarderEvent>,
    context: ConnectionContext,
    settings: Option<ConnectionSettings>,
}

impl SignalingGateway {
    pub fn new(
        connection_id: String,
        config: Arc<Config>,
        forwarders: Arc<dyn ForwarderFactory>,
        datastore: Arc<dyn DataStore>,
        outbound: mpsc::UnboundedSender<ServerMessage>,
        forwarder_events: mpsc::UnboundedSender<ForwarderEvent>,
    ) -> Self {
        Self {
            connection_id,
            config,
            forwarders,
            datastore,
            outbound,
            forwarder_events,
            context: ConnectionContext::default(),
            settings: None,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    pub fn on_open(&mut self) {
        self.settings = Some(ConnectionSettings::from_config(&self.config));
        debug!(connection = %self.connection_id, "control channel open");
    }

    pub async fn on_message(&mut self, raw: &str) {
        if raw.is_empty() {
            error!(connection = %self.connection_id, "received empty control message");
            return;
        }
        let envelope = match protocol::decode(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(
                    connection = %self.connection_id,
                    error = %err,
                    "dropping undecodable control message"
                );
                return;
            }
        };

        if envelope.command == Command::Ping {
            self.send(ServerMessage::Pong);
            return;
        }

        let stream_id = match envelope.stream_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => {
                self.send(ServerMessage::Error {
                    definition: ErrorKind::NoStreamIdSpecified,
                    stream_id: None,
                });
                return;
            }
        };
        if !validator::is_valid(&stream_id) {
            self.send(ServerMessage::Error {
                definition: ErrorKind::InvalidStreamName,
                stream_id: None,
            });
            return;
        }

        match envelope.command {
            Command::Publish => self.handle_publish(stream_id).await,
            Command::TakeConfiguration => {
                self.handle_take_configuration(stream_id, envelope).await
            }
            Command::TakeCandidate => self.handle_take_candidate(stream_id, envelope).await,
            Command::Stop => self.handle_stop(stream_id).await,
            Command::Ping => {}
        }
    }

    /// Connection closed: same teardown as an explicit stop.
    pub async fn on_close(&mut self) {
        if let Some(mut session) = self.context.remove() {
            let stream_id = session.stream_id().to_string();
            info!(
                connection = %self.connection_id,
                stream = %stream_id,
                "connection closed with live session; stopping"
            );
            session.stop().await;
            self.mark_finished(&stream_id).await;
        }
        debug!(connection = %self.connection_id, "control channel closed");
    }

    /// Transport-level fault. State is untouched; cleanup rides the close
    /// event that follows.
    pub fn on_error(&self, error: &dyn std::error::Error) {
        error!(connection = %self.connection_id, error = %error, "transport error");
    }

    /// Signals from the media plane: session promotion, local negotiation
    /// echoes, and local-description failures.
    pub async fn on_forwarder_event(&mut self, event: ForwarderEvent) {
        let Some(stream_id) = self.context.get().map(|s| s.stream_id().to_string()) else {
            debug!(
                connection = %self.connection_id,
                "forwarder event after session removal; ignoring"
            );
            return;
        };
        match event {
            ForwarderEvent::MediaConnected => {
                if let Some(session) = self.context.get_mut() {
                    session.mark_media_connected();
                }
                info!(connection = %self.connection_id, stream = %stream_id, "publish live");
                self.send(ServerMessage::Notification {
                    definition: NotificationKind::PublishStarted,
                    stream_id,
                    room_name: None,
                });
            }
            ForwarderEvent::LocalDescription { kind, sdp } => {
                self.send(ServerMessage::TakeConfiguration {
                    sdp,
                    sdp_type: kind.as_str().to_string(),
                    stream_id,
                });
            }
            ForwarderEvent::LocalCandidate {
                mid,
                line_index,
                sdp,
            } => {
                self.send(ServerMessage::TakeCandidate {
                    candidate_label: line_index,
                    candidate_id: mid,
                    candidate_sdp: sdp,
                    stream_id,
                });
            }
            ForwarderEvent::LocalDescriptionFailed => {
                self.send(ServerMessage::Error {
                    definition: ErrorKind::NotSetLocalDescription,
                    stream_id: Some(stream_id),
                });
            }
        }
    }

    async fn handle_publish(&mut self, stream_id: String) {
        // A second publish supersedes the live session: stop the old one,
        // then create the new one, all within this single-owner task.
        if let Some(mut previous) = self.context.remove() {
            let finished = previous.stream_id().to_string();
            warn!(
                connection = %self.connection_id,
                stream = %finished,
                "publish received with a live session; replacing"
            );
            previous.stop().await;
            self.mark_finished(&finished).await;
        }

        let settings = self.forwarder_settings(&stream_id);
        let forwarder = self
            .forwarders
            .create(settings, self.forwarder_events.clone());
        match PublishSession::open(stream_id.clone(), forwarder).await {
            Ok(session) => {
                self.context.put(session);
                if let Err(err) = self
                    .datastore
                    .put_stream(StreamRecord::publishing(&stream_id))
                    .await
                {
                    warn!(stream = %stream_id, error = %err, "failed to record stream metadata");
                }
                self.send(ServerMessage::Start { stream_id });
            }
            Err(err) => {
                error!(
                    connection = %self.connection_id,
                    stream = %stream_id,
                    error = %err,
                    "forwarder start failed; publish discarded"
                );
            }
        }
    }

    async fn handle_take_configuration(&mut self, stream_id: String, envelope: CommandEnvelope) {
        let Some(session) = self.context.get_mut() else {
            warn!(
                connection = %self.connection_id,
                stream = %stream_id,
                "no session for configuration; wrong message order"
            );
            return;
        };
        let Some(sdp) = envelope.sdp else {
            warn!(stream = %stream_id, "configuration without sdp; dropping");
            return;
        };
        let kind = SdpKind::from_wire(envelope.sdp_type.as_deref().unwrap_or_default());
        debug!(stream = %stream_id, kind = kind.as_str(), "received session description");

        let result = session.set_remote_description(kind, &sdp).await;
        if let Err(err) = result {
            warn!(stream = %stream_id, error = %err, "failed to set remote description");
            self.send(ServerMessage::Error {
                definition: ErrorKind::NotSetRemoteDescription,
                stream_id: Some(stream_id),
            });
        }
    }

    async fn handle_take_candidate(&mut self, stream_id: String, envelope: CommandEnvelope) {
        let Some(session) = self.context.get_mut() else {
            warn!(
                connection = %self.connection_id,
                stream = %stream_id,
                "no session for candidate; wrong message order"
            );
            return;
        };
        let (Some(mid), Some(sdp), Some(label)) = (
            envelope.candidate_id,
            envelope.candidate_sdp,
            envelope.candidate_label,
        ) else {
            warn!(stream = %stream_id, "candidate with missing fields; dropping");
            return;
        };
        if let Err(err) = session.add_candidate(&mid, label, &sdp).await {
            warn!(stream = %stream_id, error = %err, "failed to relay candidate");
        }
    }

    async fn handle_stop(&mut self, stream_id: String) {
        match self.context.remove() {
            Some(mut session) => {
                let finished = session.stream_id().to_string();
                session.stop().await;
                self.mark_finished(&finished).await;
                self.send(ServerMessage::Notification {
                    definition: NotificationKind::PublishFinished,
                    stream_id: finished,
                    room_name: None,
                });
            }
            None => {
                warn!(
                    connection = %self.connection_id,
                    stream = %stream_id,
                    "no session for stop; wrong message order"
                );
            }
        }
    }

    fn forwarder_settings(&self, stream_id: &str) -> ForwarderSettings {
        let settings = self
            .settings
            .clone()
            .unwrap_or_else(|| ConnectionSettings::from_config(&self.config));
        ForwarderSettings {
            output_url: self.config.output_url_for(stream_id),
            port_range_min: settings.port_range_min,
            port_range_max: settings.port_range_max,
            stun_uri: settings.stun_uri,
            tcp_candidates_enabled: settings.tcp_candidates_enabled,
        }
    }

    async fn mark_finished(&self, stream_id: &str) {
        if let Err(err) = self
            .datastore
            .set_status(stream_id, StreamStatus::Finished)
            .await
        {
            warn!(stream = %stream_id, error = %err, "failed to mark stream finished");
        }
    }

    /// Queues an outbound message; the per-connection send pump serializes
    /// the actual writes and drops them once the socket is closed.
    fn send(&self, message: ServerMessage) {
        if self.outbound.send(message).is_err() {
            debug!(connection = %self.connection_id, "outbound channel closed; dropping message");
        }
    }
}
