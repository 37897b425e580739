use std::sync::Arc;

use super::events::{ClientEvent, CodecError, Event, EventType, TypingData};
use super::hub::{ConnectionId, Departure, Hub, HubError};
use crate::auth::{Authenticator, Identity};

/// Handshake state of one connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingIdentify,
    Ready,
    Closed,
}

/// Every variant ends the connection. None of them is reported to the client.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("authentication failed")]
    AuthenticationFailure,
    #[error("connection could not be delivered to")]
    TransientDeliveryFailure,
}

impl From<CodecError> for GatewayError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Encode { .. } => GatewayError::TransientDeliveryFailure,
            other => GatewayError::ProtocolViolation(other.to_string()),
        }
    }
}

/// Per-connection state machine. Drives the hub on behalf of one socket.
pub struct Session {
    id: ConnectionId,
    hub: Arc<Hub>,
    auth: Arc<dyn Authenticator>,
    state: SessionState,
    identity: Option<Identity>,
}

impl Session {
    /// Wrap a connection that was just registered with `hub`.
    pub fn new(id: ConnectionId, hub: Arc<Hub>, auth: Arc<dyn Authenticator>) -> Self {
        Self {
            id,
            hub,
            auth,
            state: SessionState::AwaitingIdentify,
            identity: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Decode and apply one inbound text frame. Any error moves the session
    /// to `Closed`; the caller is expected to drop the socket.
    pub async fn handle_frame(&mut self, text: &str) -> Result<(), GatewayError> {
        match ClientEvent::decode(text) {
            Ok(event) => self.handle(event).await,
            Err(e) => {
                self.state = SessionState::Closed;
                Err(e.into())
            }
        }
    }

    pub async fn handle(&mut self, event: ClientEvent) -> Result<(), GatewayError> {
        let result = self.apply(event).await;
        if result.is_err() {
            self.state = SessionState::Closed;
        }
        result
    }

    async fn apply(&mut self, event: ClientEvent) -> Result<(), GatewayError> {
        match (self.state, event) {
            (SessionState::Closed, event) => Err(GatewayError::ProtocolViolation(format!(
                "{} on a closed session",
                event.event_type()
            ))),
            (SessionState::AwaitingIdentify, ClientEvent::Identify(data)) => {
                self.identify(&data.token).await
            }
            (SessionState::AwaitingIdentify, event) => Err(GatewayError::ProtocolViolation(
                format!("{} before IDENTIFY", event.event_type()),
            )),
            (SessionState::Ready, ClientEvent::Identify(_)) => Err(
                GatewayError::ProtocolViolation("duplicate IDENTIFY".to_string()),
            ),
            (SessionState::Ready, ClientEvent::Subscribe(data)) => {
                if self.hub.subscribe(self.id, &data.channel_id) {
                    tracing::debug!(connection_id = %self.id, channel_id = %data.channel_id, "subscribed");
                }
                Ok(())
            }
            (SessionState::Ready, ClientEvent::Unsubscribe(data)) => {
                if self.hub.unsubscribe(self.id, &data.channel_id) {
                    tracing::debug!(connection_id = %self.id, channel_id = %data.channel_id, "unsubscribed");
                }
                Ok(())
            }
            (SessionState::Ready, ClientEvent::TypingStart(data)) => {
                let Some(ref identity) = self.identity else {
                    return Err(GatewayError::TransientDeliveryFailure);
                };
                let event = Event::new(
                    EventType::TypingStart,
                    &TypingData {
                        channel_id: data.channel_id.clone(),
                        user_id: identity.user_id.clone(),
                        username: identity.username.clone(),
                    },
                )?;
                self.hub.broadcast(&data.channel_id, &event, Some(self.id));
                Ok(())
            }
            (SessionState::Ready, ClientEvent::Heartbeat) => {
                // The ack shares the queue with broadcasts, so it lands
                // before anything enqueued after this point.
                if !self.hub.send_to(self.id, &Event::heartbeat_ack()) {
                    return Err(GatewayError::TransientDeliveryFailure);
                }
                self.hub.heartbeat(self.id);
                Ok(())
            }
        }
    }

    async fn identify(&mut self, token: &str) -> Result<(), GatewayError> {
        let identity = self.auth.validate(token).await.map_err(|e| {
            tracing::debug!(connection_id = %self.id, "IDENTIFY rejected: {e}");
            GatewayError::AuthenticationFailure
        })?;

        match self.hub.identify(self.id, identity.clone()) {
            Ok(identified) => {
                tracing::info!(
                    connection_id = %self.id,
                    user_id = %identity.user_id,
                    online = identified.online_user_ids.len(),
                    "session ready"
                );
                self.state = SessionState::Ready;
                self.identity = Some(identity);
                Ok(())
            }
            Err(HubError::AlreadyIdentified) => Err(GatewayError::ProtocolViolation(
                "duplicate IDENTIFY".to_string(),
            )),
            Err(e) => {
                tracing::debug!(connection_id = %self.id, "could not promote session: {e}");
                Err(GatewayError::TransientDeliveryFailure)
            }
        }
    }

    /// Tear the connection down. Safe to call more than once.
    pub fn close(&mut self) -> Option<Departure> {
        self.state = SessionState::Closed;
        self.hub.unregister(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthError;
    use crate::gateway::hub::{outbound, OutboundReceiver};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap;

    /// Accepts a fixed set of tokens.
    struct StaticAuth(HashMap<&'static str, Identity>);

    #[async_trait]
    impl Authenticator for StaticAuth {
        async fn validate(&self, token: &str) -> Result<Identity, AuthError> {
            match token {
                "expired" => Err(AuthError::Expired),
                _ => self.0.get(token).cloned().ok_or(AuthError::Invalid),
            }
        }
    }

    fn auth() -> Arc<dyn Authenticator> {
        let mut tokens = HashMap::new();
        for name in ["alice", "bob"] {
            tokens.insert(
                name,
                Identity {
                    user_id: format!("id-{name}"),
                    username: name.to_string(),
                },
            );
        }
        Arc::new(StaticAuth(tokens))
    }

    fn open(hub: &Arc<Hub>) -> (Session, OutboundReceiver) {
        let (tx, rx) = outbound(16);
        let id = hub.register(tx);
        (Session::new(id, hub.clone(), auth()), rx)
    }

    fn hub() -> Arc<Hub> {
        let (hub, _presence) = Hub::new(5);
        Arc::new(hub)
    }

    fn next(rx: &mut OutboundReceiver) -> Option<Value> {
        rx.try_recv().map(|f| serde_json::from_str(&f).unwrap())
    }

    async fn ready(hub: &Arc<Hub>, token: &str) -> (Session, OutboundReceiver) {
        let (mut session, mut rx) = open(hub);
        let frame = format!(r#"{{"type":"IDENTIFY","data":{{"token":"{token}"}}}}"#);
        session.handle_frame(&frame).await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(next(&mut rx).unwrap()["type"], "READY");
        (session, rx)
    }

    #[tokio::test]
    async fn test_identify_promotes_and_replies_ready() {
        let hub = hub();
        let (mut session, mut rx) = open(&hub);
        assert_eq!(session.state(), SessionState::AwaitingIdentify);

        session
            .handle_frame(r#"{"type":"IDENTIFY","data":{"token":"alice"}}"#)
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.identity().unwrap().username, "alice");

        let ready = next(&mut rx).unwrap();
        assert_eq!(ready["type"], "READY");
        assert_eq!(ready["data"]["user_id"], "id-alice");
        assert_eq!(ready["data"]["online_user_ids"], serde_json::json!(["id-alice"]));
        assert!(hub.is_online("id-alice"));
    }

    #[tokio::test]
    async fn test_first_frame_must_be_identify() {
        let hub = hub();
        for frame in [
            r#"{"type":"HEARTBEAT"}"#,
            r#"{"type":"SUBSCRIBE","data":{"channel_id":"1"}}"#,
            r#"{"type":"TYPING_START","data":{"channel_id":"1"}}"#,
        ] {
            let (mut session, mut rx) = open(&hub);
            let err = session.handle_frame(frame).await.unwrap_err();
            assert!(matches!(err, GatewayError::ProtocolViolation(_)));
            assert_eq!(session.state(), SessionState::Closed);
            assert!(next(&mut rx).is_none(), "no frame may be sent before READY");

            // Nothing is processed after the violation.
            let again = session
                .handle_frame(r#"{"type":"IDENTIFY","data":{"token":"alice"}}"#)
                .await;
            assert!(again.is_err());
            assert!(!hub.is_online("id-alice"));
        }
    }

    #[tokio::test]
    async fn test_bad_tokens_never_reach_ready() {
        let hub = hub();
        for token in ["nobody", "expired", ""] {
            let (mut session, mut rx) = open(&hub);
            let frame = format!(r#"{{"type":"IDENTIFY","data":{{"token":"{token}"}}}}"#);
            let err = session.handle_frame(&frame).await.unwrap_err();
            assert!(matches!(err, GatewayError::AuthenticationFailure));
            assert_eq!(session.state(), SessionState::Closed);
            assert!(next(&mut rx).is_none());
        }
        assert_eq!(hub.online_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_frames_close() {
        let hub = hub();
        let (mut session, _rx) = ready(&hub, "alice").await;
        let err = session.handle_frame("{not json").await.unwrap_err();
        assert!(matches!(err, GatewayError::ProtocolViolation(_)));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_duplicate_identify_closes() {
        let hub = hub();
        let (mut session, _rx) = ready(&hub, "alice").await;
        let err = session
            .handle_frame(r#"{"type":"IDENTIFY","data":{"token":"bob"}}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ProtocolViolation(_)));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!hub.is_online("id-bob"));
    }

    #[tokio::test]
    async fn test_heartbeat_acks_before_later_events() {
        let hub = hub();
        let (mut session, mut rx) = ready(&hub, "alice").await;
        session
            .handle_frame(r#"{"type":"SUBSCRIBE","data":{"channel_id":"c1"}}"#)
            .await
            .unwrap();
        session.handle_frame(r#"{"type":"HEARTBEAT","data":{}}"#).await.unwrap();

        let message = Event::new(EventType::MessageCreate, &serde_json::json!({"id": "m1"})).unwrap();
        hub.broadcast("c1", &message, None);

        assert_eq!(next(&mut rx).unwrap()["type"], "HEARTBEAT_ACK");
        assert_eq!(next(&mut rx).unwrap()["type"], "MESSAGE_CREATE");
        assert!(next(&mut rx).is_none(), "exactly one ack expected");
    }

    #[tokio::test]
    async fn test_typing_reaches_others_only() {
        let hub = hub();
        let (mut alice, mut alice_rx) = ready(&hub, "alice").await;
        let (mut bob, mut bob_rx) = ready(&hub, "bob").await;
        for session in [&mut alice, &mut bob] {
            session
                .handle_frame(r#"{"type":"SUBSCRIBE","data":{"channel_id":"c1"}}"#)
                .await
                .unwrap();
        }

        alice
            .handle_frame(r#"{"type":"TYPING_START","data":{"channel_id":"c1"}}"#)
            .await
            .unwrap();

        assert!(next(&mut alice_rx).is_none());
        let typing = next(&mut bob_rx).unwrap();
        assert_eq!(typing["type"], "TYPING_START");
        assert_eq!(typing["data"]["channel_id"], "c1");
        assert_eq!(typing["data"]["user_id"], "id-alice");
        assert_eq!(typing["data"]["username"], "alice");
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent_through_session() {
        let hub = hub();
        let (mut session, _rx) = ready(&hub, "alice").await;
        for _ in 0..2 {
            session
                .handle_frame(r#"{"type":"SUBSCRIBE","data":{"channel_id":"c1"}}"#)
                .await
                .unwrap();
        }
        assert_eq!(hub.subscriber_count("c1"), 1);
        for _ in 0..2 {
            session
                .handle_frame(r#"{"type":"UNSUBSCRIBE","data":{"channel_id":"c1"}}"#)
                .await
                .unwrap();
        }
        assert_eq!(hub.subscriber_count("c1"), 0);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let hub = hub();
        let (mut session, _rx) = ready(&hub, "alice").await;
        let departure = session.close().unwrap();
        assert!(departure.went_offline);
        assert!(session.close().is_none());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(hub.connection_count(), 0);
    }
}
