//! Single-consumer event loop that owns all player state
//!
//! Connection tasks never touch the registry. They push [`RelayEvent`]s onto
//! one channel and the relay handles each event to completion, fan-out
//! included, before taking the next. Every client therefore observes the
//! same total order of joins, moves and leaves.

use crate::registry::SessionRegistry;
use log::{debug, error, info, warn};
use shared::{ClientMessage, JoinAck, PlayerId, PlayerMoved, Position, ServerMessage};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Outbound queue of one connection, carrying encoded JSON frames
pub type Outbox = mpsc::UnboundedSender<String>;

/// Messages sent from connection tasks to the relay loop
#[derive(Debug)]
pub enum RelayEvent {
    Connected { id: PlayerId, outbox: Outbox },
    Received { id: PlayerId, message: ClientMessage },
    Disconnected { id: PlayerId },
    Shutdown,
}

pub struct Relay {
    registry: SessionRegistry,
    connections: HashMap<PlayerId, Outbox>,
    events: mpsc::UnboundedReceiver<RelayEvent>,
}

impl Relay {
    pub fn with_registry(
        registry: SessionRegistry,
        events: mpsc::UnboundedReceiver<RelayEvent>,
    ) -> Self {
        Self {
            registry,
            connections: HashMap::new(),
            events,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Number of open connections, joined or not
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Processes events until shutdown or until every sender is gone
    pub async fn run(mut self) {
        info!("Relay started");
        while let Some(event) = self.events.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }
        info!("Relay shutting down");
    }

    /// Handles one event to completion; returns false on shutdown
    pub fn handle_event(&mut self, event: RelayEvent) -> bool {
        match event {
            RelayEvent::Connected { id, outbox } => {
                self.connections.insert(id, outbox);
            }
            RelayEvent::Received { id, message } => match message {
                ClientMessage::PlayerJoin { name } => self.join(id, name.as_deref()),
                ClientMessage::PlayerMovement(position) => self.movement(id, position),
            },
            RelayEvent::Disconnected { id } => self.leave(id),
            RelayEvent::Shutdown => return false,
        }
        true
    }

    fn join(&mut self, id: PlayerId, requested: Option<&str>) {
        if !self.connections.contains_key(&id) {
            warn!("Join from unknown connection {}", id);
            return;
        }

        let Some(outcome) = self.registry.join(id, requested) else {
            debug!("Connection {} already joined, ignoring repeat join", id);
            return;
        };

        let record = outcome.record;
        self.send_to(
            id,
            &ServerMessage::JoinSuccess(JoinAck {
                id,
                username: record.username.clone(),
                x: record.position.x,
                y: record.position.y,
                z: record.position.z,
            }),
        );
        self.send_to(id, &ServerMessage::CurrentPlayers(outcome.roster));
        self.broadcast(
            &ServerMessage::NewPlayer {
                id,
                player: record.info(),
            },
            Some(id),
        );
    }

    fn movement(&mut self, id: PlayerId, position: Position) {
        if !self.registry.move_player(id, position) {
            debug!("Dropping movement from connection {} without a player", id);
            return;
        }

        self.broadcast(
            &ServerMessage::PlayerMoved(PlayerMoved::new(id, position)),
            Some(id),
        );
    }

    fn leave(&mut self, id: PlayerId) {
        self.connections.remove(&id);

        if self.registry.leave(id).is_some() {
            self.broadcast(&ServerMessage::DisconnectPlayer(id), None);
        }
    }

    fn send_to(&self, id: PlayerId, message: &ServerMessage) {
        let Some(frame) = encode(message) else {
            return;
        };
        if let Some(outbox) = self.connections.get(&id) {
            if outbox.send(frame).is_err() {
                debug!("Connection {} closed before delivery", id);
            }
        }
    }

    /// Sends to every joined connection except `exclude`
    fn broadcast(&self, message: &ServerMessage, exclude: Option<PlayerId>) {
        let Some(frame) = encode(message) else {
            return;
        };

        for id in self.registry.ids() {
            if Some(id) == exclude {
                continue;
            }
            if let Some(outbox) = self.connections.get(&id) {
                if outbox.send(frame.clone()).is_err() {
                    debug!("Connection {} closed before delivery", id);
                }
            }
        }
    }
}

fn encode(message: &ServerMessage) -> Option<String> {
    match message.to_json() {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!("Failed to encode {:?}: {}", message, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::collections::HashSet;

    struct TestConnection {
        id: PlayerId,
        inbox: mpsc::UnboundedReceiver<String>,
    }

    impl TestConnection {
        fn drain(&mut self) -> Vec<ServerMessage> {
            let mut messages = Vec::new();
            while let Ok(frame) = self.inbox.try_recv() {
                messages.push(ServerMessage::from_json(&frame).unwrap());
            }
            messages
        }
    }

    fn create_test_relay() -> Relay {
        let (_tx, rx) = mpsc::unbounded_channel();
        Relay::with_registry(SessionRegistry::with_seed(3), rx)
    }

    fn connect(relay: &mut Relay, id: PlayerId) -> TestConnection {
        let (outbox, inbox) = mpsc::unbounded_channel();
        relay.handle_event(RelayEvent::Connected { id, outbox });
        TestConnection { id, inbox }
    }

    fn join(relay: &mut Relay, connection: &TestConnection, name: &str) {
        relay.handle_event(RelayEvent::Received {
            id: connection.id,
            message: ClientMessage::PlayerJoin {
                name: Some(name.to_string()),
            },
        });
    }

    fn send_move(relay: &mut Relay, id: PlayerId, x: f64, y: f64, z: f64) {
        relay.handle_event(RelayEvent::Received {
            id,
            message: ClientMessage::PlayerMovement(Position::new(x, y, z)),
        });
    }

    #[test]
    fn test_first_join_gets_ack_and_roster_of_self() {
        let mut relay = create_test_relay();
        let mut alice = connect(&mut relay, 1);

        join(&mut relay, &alice, "Alice");

        let messages = alice.drain();
        assert_eq!(messages.len(), 2);
        match &messages[0] {
            ServerMessage::JoinSuccess(ack) => {
                assert_eq!(ack.id, 1);
                assert_eq!(ack.username, "Alice");
                assert_approx_eq!(ack.y, 1.0);
            }
            other => panic!("Expected joinSuccess, got {:?}", other),
        }
        match &messages[1] {
            ServerMessage::CurrentPlayers(roster) => {
                assert_eq!(roster.len(), 1);
                assert_eq!(roster[&1].username, "Alice");
            }
            other => panic!("Expected currentPlayers, got {:?}", other),
        }
    }

    #[test]
    fn test_join_without_payload_uses_fallback_name() {
        let mut relay = create_test_relay();
        let mut anonymous = connect(&mut relay, 1);
        let mut second = connect(&mut relay, 2);

        for connection in [&anonymous, &second] {
            relay.handle_event(RelayEvent::Received {
                id: connection.id,
                message: ClientMessage::from_json(r#"{"event":"playerJoin"}"#).unwrap(),
            });
        }

        match &anonymous.drain()[0] {
            ServerMessage::JoinSuccess(ack) => assert_eq!(ack.username, "Player"),
            other => panic!("Expected joinSuccess, got {:?}", other),
        }
        match &second.drain()[0] {
            ServerMessage::JoinSuccess(ack) => assert_eq!(ack.username, "Player1"),
            other => panic!("Expected joinSuccess, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_name_scenario() {
        let mut relay = create_test_relay();
        let mut client1 = connect(&mut relay, 1);
        let mut client2 = connect(&mut relay, 2);

        join(&mut relay, &client1, "Alice");
        client1.drain();
        join(&mut relay, &client2, "Alice");

        let to_client2 = client2.drain();
        match &to_client2[0] {
            ServerMessage::JoinSuccess(ack) => assert_eq!(ack.username, "Alice1"),
            other => panic!("Expected joinSuccess, got {:?}", other),
        }
        match &to_client2[1] {
            ServerMessage::CurrentPlayers(roster) => {
                let ids: HashSet<PlayerId> = roster.keys().copied().collect();
                assert_eq!(ids, HashSet::from([1, 2]));
            }
            other => panic!("Expected currentPlayers, got {:?}", other),
        }
        assert!(
            !to_client2
                .iter()
                .any(|m| matches!(m, ServerMessage::NewPlayer { .. })),
            "Joiner must not hear about itself"
        );

        let to_client1 = client1.drain();
        assert_eq!(to_client1.len(), 1);
        match &to_client1[0] {
            ServerMessage::NewPlayer { id, player } => {
                assert_eq!(*id, 2);
                assert_eq!(player.username, "Alice1");
            }
            other => panic!("Expected newPlayer, got {:?}", other),
        }
    }

    #[test]
    fn test_unjoined_connection_receives_no_broadcasts() {
        let mut relay = create_test_relay();
        let alice = connect(&mut relay, 1);
        let mut lurker = connect(&mut relay, 2);

        join(&mut relay, &alice, "Alice");
        send_move(&mut relay, 1, 1.0, 2.0, 3.0);

        assert!(lurker.drain().is_empty());
    }

    #[test]
    fn test_movement_is_relayed_verbatim_without_echo() {
        let mut relay = create_test_relay();
        let mut client1 = connect(&mut relay, 1);
        let mut client2 = connect(&mut relay, 2);
        let mut client3 = connect(&mut relay, 3);
        join(&mut relay, &client1, "A");
        join(&mut relay, &client2, "B");
        join(&mut relay, &client3, "C");
        client1.drain();
        client2.drain();
        client3.drain();

        send_move(&mut relay, 1, 5.0, 1.0, -3.0);

        assert!(client1.drain().is_empty());
        for connection in [&mut client2, &mut client3] {
            let messages = connection.drain();
            assert_eq!(messages.len(), 1);
            match &messages[0] {
                ServerMessage::PlayerMoved(moved) => {
                    assert_eq!(moved.id, 1);
                    assert_eq!(moved.position(), Position::new(5.0, 1.0, -3.0));
                }
                other => panic!("Expected playerMoved, got {:?}", other),
            }
        }

        assert_eq!(
            relay.registry().get(1).unwrap().position,
            Position::new(5.0, 1.0, -3.0)
        );
    }

    #[test]
    fn test_movement_before_join_is_dropped() {
        let mut relay = create_test_relay();
        let mut alice = connect(&mut relay, 1);
        let early = connect(&mut relay, 2);
        join(&mut relay, &alice, "Alice");
        alice.drain();

        send_move(&mut relay, early.id, 9.0, 9.0, 9.0);

        assert!(alice.drain().is_empty());
        assert!(!relay.registry().contains(early.id));
    }

    #[test]
    fn test_disconnect_scenario() {
        let mut relay = create_test_relay();
        let client1 = connect(&mut relay, 1);
        let mut client2 = connect(&mut relay, 2);
        join(&mut relay, &client1, "Alice");
        join(&mut relay, &client2, "Bob");
        client2.drain();

        relay.handle_event(RelayEvent::Disconnected { id: client1.id });

        let messages = client2.drain();
        assert_eq!(messages, vec![ServerMessage::DisconnectPlayer(1)]);
        assert_eq!(relay.connection_count(), 1);

        // A movement still in flight from the closed connection
        send_move(&mut relay, client1.id, 1.0, 1.0, 1.0);
        assert!(client2.drain().is_empty());
    }

    #[test]
    fn test_disconnect_before_join_is_silent() {
        let mut relay = create_test_relay();
        let mut alice = connect(&mut relay, 1);
        let lurker = connect(&mut relay, 2);
        join(&mut relay, &alice, "Alice");
        alice.drain();

        relay.handle_event(RelayEvent::Disconnected { id: lurker.id });

        assert!(alice.drain().is_empty());
        assert_eq!(relay.connection_count(), 1);
    }

    #[test]
    fn test_repeat_join_is_ignored() {
        let mut relay = create_test_relay();
        let mut alice = connect(&mut relay, 1);
        let mut bob = connect(&mut relay, 2);
        join(&mut relay, &alice, "Alice");
        join(&mut relay, &bob, "Bob");
        alice.drain();
        bob.drain();

        join(&mut relay, &alice, "Mallory");

        assert!(alice.drain().is_empty());
        assert!(bob.drain().is_empty());
        assert_eq!(relay.registry().get(1).unwrap().username, "Alice");
    }

    #[test]
    fn test_closed_outbox_does_not_block_fanout() {
        let mut relay = create_test_relay();
        let alice = connect(&mut relay, 1);
        let bob = connect(&mut relay, 2);
        let mut carol = connect(&mut relay, 3);
        join(&mut relay, &alice, "Alice");
        join(&mut relay, &bob, "Bob");
        join(&mut relay, &carol, "Carol");
        carol.drain();

        // Bob's writer went away but the transport has not reported it yet
        drop(bob);
        send_move(&mut relay, 1, 0.5, 0.5, 0.5);

        assert_eq!(carol.drain().len(), 1);
    }

    #[test]
    fn test_shutdown_stops_processing() {
        let mut relay = create_test_relay();
        assert!(!relay.handle_event(RelayEvent::Shutdown));
    }

    #[tokio::test]
    async fn test_run_processes_events_in_order() {
        let (events, rx) = mpsc::unbounded_channel();
        let relay = Relay::with_registry(SessionRegistry::with_seed(9), rx);
        let handle = tokio::spawn(relay.run());

        let (outbox1, mut inbox1) = mpsc::unbounded_channel();
        let (outbox2, mut inbox2) = mpsc::unbounded_channel();
        events
            .send(RelayEvent::Connected { id: 1, outbox: outbox1 })
            .unwrap();
        events
            .send(RelayEvent::Connected { id: 2, outbox: outbox2 })
            .unwrap();
        for (id, name) in [(1, "Alice"), (2, "Alice")] {
            events
                .send(RelayEvent::Received {
                    id,
                    message: ClientMessage::PlayerJoin {
                        name: Some(name.to_string()),
                    },
                })
                .unwrap();
        }
        events
            .send(RelayEvent::Received {
                id: 2,
                message: ClientMessage::PlayerMovement(Position::new(1.0, 2.0, 3.0)),
            })
            .unwrap();
        events.send(RelayEvent::Shutdown).unwrap();
        tokio_test::assert_ok!(handle.await);

        let mut received = Vec::new();
        while let Ok(frame) = inbox1.try_recv() {
            received.push(ServerMessage::from_json(&frame).unwrap());
        }
        assert_eq!(received.len(), 4);
        assert!(matches!(received[0], ServerMessage::JoinSuccess(_)));
        assert!(matches!(received[1], ServerMessage::CurrentPlayers(_)));
        assert!(matches!(received[2], ServerMessage::NewPlayer { id: 2, .. }));
        assert!(matches!(received[3], ServerMessage::PlayerMoved(PlayerMoved { id: 2, .. })));

        let first = ServerMessage::from_json(&inbox2.try_recv().unwrap()).unwrap();
        match first {
            ServerMessage::JoinSuccess(ack) => assert_eq!(ack.username, "Alice1"),
            other => panic!("Expected joinSuccess, got {:?}", other),
        }
    }
}
