//! Wire protocol shared by the relay server and its clients.
//!
//! Every frame on the WebSocket is a JSON text frame of the form
//! `{ "event": <name>, "data": <payload> }`. Event names are the camelCase
//! variant names of [`ClientMessage`] and [`ServerMessage`].

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Transport-assigned identity of one connection.
pub type PlayerId = u32;

/// Display name used when a join request carries no usable name.
pub const DEFAULT_PLAYER_NAME: &str = "Player";

/// Where every player record starts, slightly above the ground.
pub const SPAWN_POSITION: Position = Position {
    x: 0.0,
    y: 1.0,
    z: 0.0,
};

/// Upper bound (inclusive) of the cosmetic color tag, a 24-bit RGB value.
pub const MAX_COLOR: u32 = 0xFF_FF_FF;

/// Path the WebSocket endpoint is mounted on.
pub const WEBSOCKET_PATH: &str = "/ws";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Public view of a player record as it appears in rosters and arrivals.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerInfo {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub color: u32,
    pub username: String,
}

impl PlayerInfo {
    pub fn new(username: impl Into<String>, position: Position, color: u32) -> Self {
        Self {
            x: position.x,
            y: position.y,
            z: position.z,
            color,
            username: username.into(),
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.x, self.y, self.z)
    }
}

/// Snapshot of every joined player keyed by identity.
pub type Roster = HashMap<PlayerId, PlayerInfo>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct JoinAck {
    pub id: PlayerId,
    pub username: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl JoinAck {
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y, self.z)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerMoved {
    pub id: PlayerId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PlayerMoved {
    pub fn new(id: PlayerId, position: Position) -> Self {
        Self {
            id,
            x: position.x,
            y: position.y,
            z: position.z,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.x, self.y, self.z)
    }
}

/// Events sent from a client to the relay.
///
/// Encodes as `{"event":"playerJoin","data":{"name":..}}`. Decoding is
/// lenient about the join payload: a missing `data`, `null`, `{}`,
/// `{"name":null}` and a bare string are all accepted.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    PlayerJoin {
        #[serde(default)]
        name: Option<String>,
    },
    PlayerMovement(Position),
}

const CLIENT_EVENTS: &[&str] = &["playerJoin", "playerMovement"];

#[derive(Deserialize)]
struct ClientFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JoinPayload {
    Bare(Option<String>),
    Fields {
        #[serde(default)]
        name: Option<String>,
    },
}

impl JoinPayload {
    fn into_name(self) -> Option<String> {
        match self {
            JoinPayload::Bare(name) | JoinPayload::Fields { name } => name,
        }
    }
}

impl<'de> Deserialize<'de> for ClientMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let frame = ClientFrame::deserialize(deserializer)?;
        match frame.event.as_str() {
            "playerJoin" => JoinPayload::deserialize(frame.data)
                .map(|payload| ClientMessage::PlayerJoin {
                    name: payload.into_name(),
                })
                .map_err(|_| de::Error::custom("join payload must be a name, an object or null")),
            "playerMovement" => Position::deserialize(frame.data)
                .map(ClientMessage::PlayerMovement)
                .map_err(de::Error::custom),
            other => Err(de::Error::unknown_variant(other, CLIENT_EVENTS)),
        }
    }
}

/// Events sent from the relay to a client.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    JoinSuccess(JoinAck),
    CurrentPlayers(Roster),
    NewPlayer { id: PlayerId, player: PlayerInfo },
    PlayerMoved(PlayerMoved),
    DisconnectPlayer(PlayerId),
}

impl ClientMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

impl ServerMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
