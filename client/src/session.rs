use log::{debug, warn};
use shared::{JoinAck, PlayerId, PlayerInfo, PlayerMoved, Position, Roster, ServerMessage};
use std::collections::HashMap;

/// Local mirror of one other player
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePlayer {
    pub username: String,
    pub color: u32,
    pub position: Position,
}

impl From<PlayerInfo> for RemotePlayer {
    fn from(info: PlayerInfo) -> Self {
        Self {
            position: info.position(),
            username: info.username,
            color: info.color,
        }
    }
}

/// What changed after applying a server event
///
/// Rendering code reacts to these: spawn a model and label on
/// `Joined`/`PlayerArrived`, move it on `PlayerMoved`, release it on
/// `PlayerLeft`.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Joined {
        id: PlayerId,
        username: String,
        spawn: Position,
        remote_ids: Vec<PlayerId>,
    },
    PlayerArrived {
        id: PlayerId,
    },
    PlayerMoved {
        id: PlayerId,
        position: Position,
    },
    PlayerLeft {
        id: PlayerId,
        username: String,
    },
}

/// Client-side view of the relay session
///
/// The join acknowledgment and the roster arrive as two frames. The
/// session becomes active once both have been applied, in either order.
#[derive(Debug, Default)]
pub struct ClientSession {
    ack: Option<JoinAck>,
    pending_roster: Option<Roster>,
    active: bool,
    remote_players: HashMap<PlayerId, RemotePlayer>,
}

impl ClientSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, message: ServerMessage) -> Option<SessionEvent> {
        match message {
            ServerMessage::JoinSuccess(ack) => self.on_join_success(ack),
            ServerMessage::CurrentPlayers(roster) => self.on_current_players(roster),
            ServerMessage::NewPlayer { id, player } => self.on_player_arrived(id, player),
            ServerMessage::PlayerMoved(moved) => self.on_player_moved(moved),
            ServerMessage::DisconnectPlayer(id) => self.on_player_left(id),
        }
    }

    fn on_join_success(&mut self, ack: JoinAck) -> Option<SessionEvent> {
        if self.ack.is_some() {
            warn!("Ignoring repeated join acknowledgment for {}", ack.username);
            return None;
        }
        self.ack = Some(ack);
        self.complete_join()
    }

    fn on_current_players(&mut self, roster: Roster) -> Option<SessionEvent> {
        if self.active || self.pending_roster.is_some() {
            warn!("Ignoring repeated roster snapshot");
            return None;
        }
        self.pending_roster = Some(roster);
        self.complete_join()
    }

    fn complete_join(&mut self) -> Option<SessionEvent> {
        let ack = self.ack.clone()?;
        let roster = self.pending_roster.take()?;

        self.on_join_acknowledged(ack, roster)
    }

    /// Stores the assigned identity and materializes the roster, minus self
    pub fn on_join_acknowledged(&mut self, ack: JoinAck, roster: Roster) -> Option<SessionEvent> {
        if self.active {
            return None;
        }

        let mut remote_ids = Vec::with_capacity(roster.len());
        for (id, info) in roster {
            if id == ack.id {
                continue;
            }
            remote_ids.push(id);
            self.remote_players.insert(id, RemotePlayer::from(info));
        }
        remote_ids.sort_unstable();

        self.active = true;
        let event = SessionEvent::Joined {
            id: ack.id,
            username: ack.username.clone(),
            spawn: ack.position(),
            remote_ids,
        };
        self.ack = Some(ack);
        Some(event)
    }

    pub fn on_player_arrived(&mut self, id: PlayerId, player: PlayerInfo) -> Option<SessionEvent> {
        if Some(id) == self.local_id() {
            return None;
        }
        if self
            .remote_players
            .insert(id, RemotePlayer::from(player))
            .is_some()
        {
            debug!("Replaced stale representation of player {}", id);
        }
        Some(SessionEvent::PlayerArrived { id })
    }

    /// Updates a known player; movements racing ahead of an arrival are dropped
    pub fn on_player_moved(&mut self, moved: PlayerMoved) -> Option<SessionEvent> {
        let position = moved.position();
        match self.remote_players.get_mut(&moved.id) {
            Some(player) => {
                player.position = position;
                Some(SessionEvent::PlayerMoved {
                    id: moved.id,
                    position,
                })
            }
            None => {
                debug!("Dropping movement for unknown player {}", moved.id);
                None
            }
        }
    }

    pub fn on_player_left(&mut self, id: PlayerId) -> Option<SessionEvent> {
        self.remote_players
            .remove(&id)
            .map(|player| SessionEvent::PlayerLeft {
                id,
                username: player.username,
            })
    }

    /// Forgets everything learned on the current connection
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn local_id(&self) -> Option<PlayerId> {
        self.ack.as_ref().map(|ack| ack.id)
    }

    /// Name assigned by the server, which may differ from the one requested
    pub fn username(&self) -> Option<&str> {
        self.ack.as_ref().map(|ack| ack.username.as_str())
    }

    pub fn remote_player(&self, id: PlayerId) -> Option<&RemotePlayer> {
        self.remote_players.get(&id)
    }

    pub fn remote_players(&self) -> &HashMap<PlayerId, RemotePlayer> {
        &self.remote_players
    }
}
