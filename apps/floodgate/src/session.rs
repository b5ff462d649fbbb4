//! Per-connection bridging session: owns the negotiation state and the
//! forwarder lifecycle for one published stream.

use std::sync::Arc;

use tracing::info;

use crate::forwarder::{ForwarderError, MediaForwarder, SdpKind};

/// Lifecycle of a publish session.
///
/// `Active` is reached when the media plane reports a connected path;
/// there is no control-channel message for that transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Negotiating,
    Active,
    Stopped,
}

/// A connectivity candidate already relayed to the forwarder. Kept for
/// observability; the forwarder owns any real queuing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedCandidate {
    pub mid: String,
    pub line_index: u32,
}

pub struct PublishSession {
    stream_id: String,
    state: SessionState,
    forwarder: Arc<dyn MediaForwarder>,
    remote_description: Option<(SdpKind, String)>,
    applied_candidates: Vec<AppliedCandidate>,
}

impl PublishSession {
    /// Creates the session and starts its forwarder. On start failure the
    /// session is discarded along with the forwarder; the caller surfaces
    /// the error for this session only.
    pub async fn open(
        stream_id: String,
        forwarder: Arc<dyn MediaForwarder>,
    ) -> Result<Self, ForwarderError> {
        let mut session = Self {
            stream_id,
            state: SessionState::Created,
            forwarder,
            remote_description: None,
            applied_candidates: Vec::new(),
        };
        session.forwarder.start().await?;
        session.state = SessionState::Negotiating;
        info!(stream = %session.stream_id, "publish session negotiating");
        Ok(session)
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn remote_description(&self) -> Option<&(SdpKind, String)> {
        self.remote_description.as_ref()
    }

    pub fn applied_candidates(&self) -> &[AppliedCandidate] {
        &self.applied_candidates
    }

    /// Applies the publisher's description and remembers it.
    pub async fn set_remote_description(
        &mut self,
        kind: SdpKind,
        sdp: &str,
    ) -> Result<(), ForwarderError> {
        self.forwarder.set_remote_description(kind, sdp).await?;
        self.remote_description = Some((kind, sdp.to_string()));
        Ok(())
    }

    /// Relays a candidate to the forwarder immediately, whether or not the
    /// remote description has arrived yet.
    pub async fn add_candidate(
        &mut self,
        mid: &str,
        line_index: u32,
        sdp: &str,
    ) -> Result<(), ForwarderError> {
        self.forwarder.add_candidate(mid, line_index, sdp).await?;
        self.applied_candidates.push(AppliedCandidate {
            mid: mid.to_string(),
            line_index,
        });
        Ok(())
    }

    /// The forwarder reported a connected media path.
    pub fn mark_media_connected(&mut self) {
        if self.state == SessionState::Negotiating {
            self.state = SessionState::Active;
        }
    }

    /// Stops the forwarder and finishes the session. Safe to call twice;
    /// the forwarder sees exactly one stop.
    pub async fn stop(&mut self) {
        if self.state == SessionState::Stopped {
            return;
        }
        self.forwarder.stop().await;
        self.state = SessionState::Stopped;
        info!(stream = %self.stream_id, "publish session stopped");
    }
}

/// Per-connection session slot. The connection task is the only writer,
/// so no locking is needed and a failure stays scoped to its connection.
#[derive(Default)]
pub struct ConnectionContext {
    session: Option<PublishSession>,
}

impl ConnectionContext {
    /// Installs a session, returning the one it replaced, if any.
    pub fn put(&mut self, session: PublishSession) -> Option<PublishSession> {
        self.session.replace(session)
    }

    pub fn get(&self) -> Option<&PublishSession> {
        self.session.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut PublishSession> {
        self.session.as_mut()
    }

    pub fn remove(&mut self) -> Option<PublishSession> {
        self.session.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarder::testing::{test_settings, ForwarderCall, RecordingForwarder};

    #[tokio::test]
    async fn open_starts_forwarder_and_enters_negotiating() {
        let forwarder = RecordingForwarder::with_settings(test_settings("cam1"));
        let session = PublishSession::open("cam1".into(), forwarder.clone())
            .await
            .expect("open");

        assert_eq!(session.state(), SessionState::Negotiating);
        assert_eq!(session.stream_id(), "cam1");
        assert_eq!(forwarder.calls(), vec![ForwarderCall::Start]);
    }

    #[tokio::test]
    async fn open_discards_session_on_start_failure() {
        let forwarder = RecordingForwarder::failing_start(test_settings("cam1"));
        let result = PublishSession::open("cam1".into(), forwarder.clone()).await;

        assert!(result.is_err());
        assert_eq!(forwarder.calls(), vec![ForwarderCall::Start]);
    }

    #[tokio::test]
    async fn candidates_are_relayed_before_remote_description() {
        let forwarder = RecordingForwarder::with_settings(test_settings("cam1"));
        let mut session = PublishSession::open("cam1".into(), forwarder.clone())
            .await
            .expect("open");

        session
            .add_candidate("audio", 0, "candidate:1")
            .await
            .expect("candidate");
        session
            .set_remote_description(SdpKind::Offer, "v=0")
            .await
            .expect("description");

        assert_eq!(
            forwarder.calls(),
            vec![
                ForwarderCall::Start,
                ForwarderCall::Candidate("audio".into(), 0),
                ForwarderCall::RemoteDescription(SdpKind::Offer),
            ]
        );
        assert_eq!(session.applied_candidates().len(), 1);
        assert!(session.remote_description().is_some());
    }

    #[tokio::test]
    async fn media_connected_promotes_negotiating_to_active() {
        let forwarder = RecordingForwarder::with_settings(test_settings("cam1"));
        let mut session = PublishSession::open("cam1".into(), forwarder)
            .await
            .expect("open");

        session.mark_media_connected();
        assert_eq!(session.state(), SessionState::Active);

        session.stop().await;
        session.mark_media_connected();
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn stop_is_idempotent_toward_the_forwarder() {
        let forwarder = RecordingForwarder::with_settings(test_settings("cam1"));
        let mut session = PublishSession::open("cam1".into(), forwarder.clone())
            .await
            .expect("open");

        session.stop().await;
        session.stop().await;

        let stops = forwarder
            .calls()
            .iter()
            .filter(|call| matches!(call, ForwarderCall::Stop))
            .count();
        assert_eq!(stops, 1);
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn context_holds_at_most_one_session() {
        let mut context = ConnectionContext::default();
        assert!(context.get().is_none());

        let first = PublishSession::open(
            "cam1".into(),
            RecordingForwarder::with_settings(test_settings("cam1")),
        )
        .await
        .expect("open");
        assert!(context.put(first).is_none());

        let second = PublishSession::open(
            "cam2".into(),
            RecordingForwarder::with_settings(test_settings("cam2")),
        )
        .await
        .expect("open");
        let replaced = context.put(second).expect("replaced session");
        assert_eq!(replaced.stream_id(), "cam1");

        assert_eq!(context.get().map(PublishSession::stream_id), Some("cam2"));
        assert!(context.remove().is_some());
        assert!(context.remove().is_none());
    }
}
