use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Screen that every unscoped (legacy) payload is addressed to.
pub const DEFAULT_SCREEN: &str = "A";

/// Event names shared by displays, remotes and the server.
pub mod events {
    pub const CONNECT: &str = "connect";
    pub const DISCONNECT: &str = "disconnect";
    pub const REQUEST_CURRENT_URL: &str = "requestCurrentUrl";
    pub const CHANGE_URL: &str = "changeUrl";
    pub const CURRENT_URL_STATE: &str = "currentUrlState";
    pub const CURRENT_URL_STATES: &str = "currentUrlStates";
    pub const ERROR: &str = "error";
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,
    #[error("unknown engine packet type {0:?}")]
    UnknownEnginePacket(char),
    #[error("unknown socket packet type {0:?}")]
    UnknownSocketPacket(char),
    #[error("malformed {what}: {source}")]
    Json {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("event frame without a name")]
    MissingEventName,
    #[error("invalid payload for '{event}': {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

// ── Screens & payloads ────────────────────────────────────────────────────────

/// Logical display partition of the shared channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScreenId(String);

impl ScreenId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_SCREEN
    }
}

impl Default for ScreenId {
    fn default() -> Self {
        Self(DEFAULT_SCREEN.to_string())
    }
}

impl fmt::Display for ScreenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScreenId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Selection announcement as it appears on the wire.
///
/// Newer servers send `{ "id": .., "screen": .. }`; older ones send the bare
/// id string, which always means screen `"A"`.  The object shape wins
/// whenever it is present, and an object without `screen` is also `"A"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SelectionPayload {
    Scoped {
        id: String,
        #[serde(default)]
        screen: Option<ScreenId>,
    },
    Legacy(String),
}

impl SelectionPayload {
    pub fn id(&self) -> &str {
        match self {
            Self::Scoped { id, .. } => id,
            Self::Legacy(id) => id,
        }
    }

    pub fn screen(&self) -> &str {
        match self {
            Self::Scoped {
                screen: Some(screen),
                ..
            } => screen.as_str(),
            _ => DEFAULT_SCREEN,
        }
    }

    pub fn targets(&self, screen: &ScreenId) -> bool {
        self.screen() == screen.as_str()
    }
}

/// Bulk `{ screen: id }` snapshot the server pushes right after connect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScreenStates(HashMap<String, Option<String>>);

impl ScreenStates {
    pub fn get(&self, screen: &ScreenId) -> Option<&str> {
        self.0
            .get(screen.as_str())
            .and_then(|id| id.as_deref())
            .filter(|id| !id.is_empty())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for ScreenStates {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k, Some(v))).collect())
    }
}

/// Inbound channel event, decoded from `(event name, first argument)`.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    ChangeUrl(SelectionPayload),
    CurrentUrlState(SelectionPayload),
    CurrentUrlStates(ScreenStates),
    Error(Value),
    Other { name: String, data: Value },
}

impl ChannelEvent {
    pub fn from_wire(name: &str, data: Value) -> Result<Self, ProtocolError> {
        let payload_err = |source| ProtocolError::Payload {
            event: name.to_string(),
            source,
        };
        let event = match name {
            events::CONNECT => Self::Connected,
            events::DISCONNECT => Self::Disconnected,
            events::CHANGE_URL => Self::ChangeUrl(serde_json::from_value(data).map_err(payload_err)?),
            events::CURRENT_URL_STATE => {
                Self::CurrentUrlState(serde_json::from_value(data).map_err(payload_err)?)
            }
            events::CURRENT_URL_STATES => {
                Self::CurrentUrlStates(serde_json::from_value(data).map_err(payload_err)?)
            }
            events::ERROR => Self::Error(data),
            other => Self::Other {
                name: other.to_string(),
                data,
            },
        };
        Ok(event)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Connected => events::CONNECT,
            Self::Disconnected => events::DISCONNECT,
            Self::ChangeUrl(_) => events::CHANGE_URL,
            Self::CurrentUrlState(_) => events::CURRENT_URL_STATE,
            Self::CurrentUrlStates(_) => events::CURRENT_URL_STATES,
            Self::Error(_) => events::ERROR,
            Self::Other { name, .. } => name,
        }
    }
}

/// Events a client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// "Tell me the current selection."  `None` is the legacy, unscoped form.
    RequestCurrentUrl { screen: Option<ScreenId> },
    ChangeUrl { id: String, screen: ScreenId },
}

impl Outbound {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::RequestCurrentUrl { .. } => events::REQUEST_CURRENT_URL,
            Self::ChangeUrl { .. } => events::CHANGE_URL,
        }
    }

    pub fn payload(&self) -> Option<Value> {
        match self {
            Self::RequestCurrentUrl { screen: None } => None,
            Self::RequestCurrentUrl {
                screen: Some(screen),
            } => Some(serde_json::json!({ "screen": screen })),
            Self::ChangeUrl { id, screen } => Some(serde_json::json!({ "id": id, "screen": screen })),
        }
    }

    pub fn into_frame(self) -> Frame {
        Frame::event(self.event_name(), self.payload())
    }
}

// ── Socket.IO v4 / Engine.IO v4 text frames ───────────────────────────────────

/// Engine.IO open packet body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

impl Handshake {
    /// How long the server may stay silent before the connection counts as dropped.
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

/// One websocket text message.  Only the default namespace is spoken.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Noop,
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, args: Vec<Value> },
    ConnectError(Value),
}

impl Frame {
    pub fn event(name: &str, payload: Option<Value>) -> Self {
        Self::Event {
            name: name.to_string(),
            args: payload.into_iter().collect(),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Open(handshake) => {
                format!("0{}", serde_json::to_string(handshake).unwrap_or_default())
            }
            Self::Close => "1".to_string(),
            Self::Ping => "2".to_string(),
            Self::Pong => "3".to_string(),
            Self::Noop => "6".to_string(),
            Self::Connect(None) => "40".to_string(),
            Self::Connect(Some(auth)) => format!("40{}", auth),
            Self::Disconnect => "41".to_string(),
            Self::Event { name, args } => {
                let mut array = Vec::with_capacity(args.len() + 1);
                array.push(Value::String(name.clone()));
                array.extend(args.iter().cloned());
                format!("42{}", Value::Array(array))
            }
            Self::ConnectError(data) => format!("44{}", data),
        }
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let rest = chars.as_str();
        match kind {
            '0' => Ok(Self::Open(parse_json(rest, "handshake")?)),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping),
            '3' => Ok(Self::Pong),
            '6' => Ok(Self::Noop),
            '4' => decode_socket_packet(rest),
            other => Err(ProtocolError::UnknownEnginePacket(other)),
        }
    }

    /// `(name, first argument)` for event frames; `Null` when the event had no argument.
    pub fn into_event(self) -> Option<(String, Value)> {
        match self {
            Self::Event { name, args } => {
                let data = args.into_iter().next().unwrap_or(Value::Null);
                Some((name, data))
            }
            _ => None,
        }
    }
}

fn decode_socket_packet(text: &str) -> Result<Frame, ProtocolError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(ProtocolError::Empty)?;
    let body = strip_namespace_and_ack(chars.as_str());
    match kind {
        '0' if body.is_empty() => Ok(Frame::Connect(None)),
        '0' => Ok(Frame::Connect(Some(parse_json(body, "connect payload")?))),
        '1' => Ok(Frame::Disconnect),
        '2' => {
            let args: Vec<Value> = parse_json(body, "event")?;
            let mut args = args.into_iter();
            let name = match args.next() {
                Some(Value::String(name)) => name,
                _ => return Err(ProtocolError::MissingEventName),
            };
            Ok(Frame::Event {
                name,
                args: args.collect(),
            })
        }
        '4' if body.is_empty() => Ok(Frame::ConnectError(Value::Null)),
        '4' => Ok(Frame::ConnectError(parse_json(body, "connect error")?)),
        other => Err(ProtocolError::UnknownSocketPacket(other)),
    }
}

/// Drops a `/namespace,` prefix and any ack id digits in front of the JSON body.
fn strip_namespace_and_ack(body: &str) -> &str {
    let body = if body.starts_with('/') {
        body.find(',').map(|i| &body[i + 1..]).unwrap_or("")
    } else {
        body
    };
    body.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn parse_json<T: serde::de::DeserializeOwned>(
    text: &str,
    what: &'static str,
) -> Result<T, ProtocolError> {
    serde_json::from_str(text).map_err(|source| ProtocolError::Json { what, source })
}
