use crate::session::{ClientSession, SessionEvent};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::{ClientMessage, Position, ServerMessage};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connection to the relay plus the session it feeds
pub struct Client {
    url: String,
    socket: Option<Socket>,
    session: ClientSession,
}

impl Client {
    pub fn new(url: impl Into<String>) -> Self {
        Client {
            url: url.into(),
            socket: None,
            session: ClientSession::new(),
        }
    }

    /// Opens the connection unless it is already open
    pub async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if self.socket.is_some() {
            return Ok(());
        }

        info!("Connecting to {}...", self.url);
        let (socket, _) = connect_async(self.url.as_str()).await?;
        self.session.reset();
        self.socket = Some(socket);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    async fn send_message(
        &mut self,
        message: &ClientMessage,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let socket = self.socket.as_mut().ok_or("not connected")?;
        socket.send(Message::Text(message.to_json()?)).await?;
        Ok(())
    }

    /// Connects if needed and asks to join under `desired_name`
    ///
    /// The session is not active until [`Client::next_event`] has yielded
    /// [`SessionEvent::Joined`]; the server may assign a different name.
    pub async fn request_join(&mut self, desired_name: &str) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;
        self.send_message(&ClientMessage::PlayerJoin {
            name: Some(desired_name.to_string()),
        })
        .await
    }

    /// Sends the local position; callers may do this every frame
    pub async fn emit_local_movement(
        &mut self,
        position: Position,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.send_message(&ClientMessage::PlayerMovement(position))
            .await
    }

    /// Reads frames until one changes the session
    ///
    /// Returns `Ok(None)` once the server closes the connection.
    pub async fn next_event(&mut self) -> Result<Option<SessionEvent>, Box<dyn std::error::Error>> {
        loop {
            let socket = self.socket.as_mut().ok_or("not connected")?;

            let frame = match socket.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    warn!("Connection to server failed: {}", e);
                    self.socket = None;
                    return Err(e.into());
                }
                None => {
                    self.socket = None;
                    return Ok(None);
                }
            };

            match frame {
                Message::Text(text) => match ServerMessage::from_json(&text) {
                    Ok(message) => {
                        if let Some(event) = self.session.apply(message) {
                            return Ok(Some(event));
                        }
                    }
                    Err(e) => warn!("Malformed frame from server: {}", e),
                },
                Message::Close(_) => {
                    info!("Server closed the connection");
                    self.socket = None;
                    return Ok(None);
                }
                other => debug!("Ignoring frame: {:?}", other),
            }
        }
    }

    /// Closes the connection and forgets the session
    pub async fn disconnect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(mut socket) = self.socket.take() {
            socket.close(None).await?;
        }
        self.session.reset();
        Ok(())
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }
}
