use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An encoded envelope, shared by every connection it is delivered to.
pub type Frame = Arc<str>;

/// The closed vocabulary of gateway event types.
///
/// `TYPING_START` travels in both directions: clients send it with only a
/// channel id, the server rebroadcasts it with the sender's identity attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Identify,
    Subscribe,
    Unsubscribe,
    TypingStart,
    Heartbeat,
    Ready,
    HeartbeatAck,
    MessageCreate,
    MessageUpdate,
    MessageDelete,
    PresenceUpdate,
    ReactionAdd,
    ReactionRemove,
    ChannelCreate,
    ChannelUpdate,
    ChannelDelete,
    MemberJoin,
    MemberLeave,
    ServerUpdate,
}

impl EventType {
    pub const ALL: &'static [EventType] = &[
        EventType::Identify,
        EventType::Subscribe,
        EventType::Unsubscribe,
        EventType::TypingStart,
        EventType::Heartbeat,
        EventType::Ready,
        EventType::HeartbeatAck,
        EventType::MessageCreate,
        EventType::MessageUpdate,
        EventType::MessageDelete,
        EventType::PresenceUpdate,
        EventType::ReactionAdd,
        EventType::ReactionRemove,
        EventType::ChannelCreate,
        EventType::ChannelUpdate,
        EventType::ChannelDelete,
        EventType::MemberJoin,
        EventType::MemberLeave,
        EventType::ServerUpdate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Identify => "IDENTIFY",
            EventType::Subscribe => "SUBSCRIBE",
            EventType::Unsubscribe => "UNSUBSCRIBE",
            EventType::TypingStart => "TYPING_START",
            EventType::Heartbeat => "HEARTBEAT",
            EventType::Ready => "READY",
            EventType::HeartbeatAck => "HEARTBEAT_ACK",
            EventType::MessageCreate => "MESSAGE_CREATE",
            EventType::MessageUpdate => "MESSAGE_UPDATE",
            EventType::MessageDelete => "MESSAGE_DELETE",
            EventType::PresenceUpdate => "PRESENCE_UPDATE",
            EventType::ReactionAdd => "REACTION_ADD",
            EventType::ReactionRemove => "REACTION_REMOVE",
            EventType::ChannelCreate => "CHANNEL_CREATE",
            EventType::ChannelUpdate => "CHANNEL_UPDATE",
            EventType::ChannelDelete => "CHANNEL_DELETE",
            EventType::MemberJoin => "MEMBER_JOIN",
            EventType::MemberLeave => "MEMBER_LEAVE",
            EventType::ServerUpdate => "SERVER_UPDATE",
        }
    }

    /// Look up a wire name. Matching is exact: `"identify"` is not `IDENTIFY`.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame is not a valid envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unrecognized event type {0:?}")]
    UnknownType(String),
    #[error("{0} is not accepted from clients")]
    ServerOnly(EventType),
    #[error("invalid {event_type} payload: {reason}")]
    InvalidPayload { event_type: EventType, reason: String },
    #[error("failed to encode {event_type} payload: {source}")]
    Encode {
        event_type: EventType,
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyData {
    pub token: String,
}

/// Payload of SUBSCRIBE, UNSUBSCRIBE and client-sent TYPING_START.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelData {
    pub channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyData {
    pub user_id: String,
    pub username: String,
    pub online_user_ids: Vec<String>,
}

/// Server-side TYPING_START, with the typist attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingData {
    pub channel_id: String,
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceData {
    pub user_id: String,
    pub username: String,
    pub status: PresenceStatus,
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
}

/// A decoded client-to-server event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Identify(IdentifyData),
    Subscribe(ChannelData),
    Unsubscribe(ChannelData),
    TypingStart(ChannelData),
    Heartbeat,
}

impl ClientEvent {
    /// Decode one text frame. Anything outside the client vocabulary, or a
    /// payload that does not match its declared type, is rejected.
    pub fn decode(text: &str) -> Result<Self, CodecError> {
        let raw: RawEnvelope = serde_json::from_str(text).map_err(CodecError::Malformed)?;
        let event_type = EventType::parse(&raw.event_type)
            .ok_or_else(|| CodecError::UnknownType(raw.event_type.clone()))?;

        match event_type {
            EventType::Identify => Ok(Self::Identify(payload(event_type, raw.data)?)),
            EventType::Subscribe => Ok(Self::Subscribe(channel_payload(event_type, raw.data)?)),
            EventType::Unsubscribe => {
                Ok(Self::Unsubscribe(channel_payload(event_type, raw.data)?))
            }
            EventType::TypingStart => {
                Ok(Self::TypingStart(channel_payload(event_type, raw.data)?))
            }
            EventType::Heartbeat => match raw.data {
                Value::Null | Value::Object(_) => Ok(Self::Heartbeat),
                other => Err(CodecError::InvalidPayload {
                    event_type,
                    reason: format!("expected an object, got {other}"),
                }),
            },
            other => Err(CodecError::ServerOnly(other)),
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            ClientEvent::Identify(_) => EventType::Identify,
            ClientEvent::Subscribe(_) => EventType::Subscribe,
            ClientEvent::Unsubscribe(_) => EventType::Unsubscribe,
            ClientEvent::TypingStart(_) => EventType::TypingStart,
            ClientEvent::Heartbeat => EventType::Heartbeat,
        }
    }
}

fn payload<T: DeserializeOwned>(event_type: EventType, data: Value) -> Result<T, CodecError> {
    serde_json::from_value(data).map_err(|e| CodecError::InvalidPayload {
        event_type,
        reason: e.to_string(),
    })
}

fn channel_payload(event_type: EventType, data: Value) -> Result<ChannelData, CodecError> {
    let data: ChannelData = payload(event_type, data)?;
    if data.channel_id.trim().is_empty() {
        return Err(CodecError::InvalidPayload {
            event_type,
            reason: "channel_id is empty".to_string(),
        });
    }
    Ok(data)
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct Envelope<'a, T: ?Sized> {
    #[serde(rename = "type")]
    event_type: EventType,
    data: &'a T,
}

/// An immutable server-to-client event. The envelope is encoded once, at
/// construction, and every recipient shares the same frame.
#[derive(Debug, Clone)]
pub struct Event {
    event_type: EventType,
    frame: Frame,
}

impl Event {
    pub fn new<T: Serialize + ?Sized>(event_type: EventType, data: &T) -> Result<Self, CodecError> {
        let frame = serde_json::to_string(&Envelope { event_type, data })
            .map_err(|source| CodecError::Encode { event_type, source })?;

        Ok(Self {
            event_type,
            frame: Frame::from(frame),
        })
    }

    pub fn heartbeat_ack() -> Self {
        Self {
            event_type: EventType::HeartbeatAck,
            frame: Frame::from(r#"{"type":"HEARTBEAT_ACK","data":{}}"#),
        }
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }
}
