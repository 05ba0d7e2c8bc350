//! TCP client for the session service

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use focusroom_core::{SessionEvent, Topic, UserInfo};

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{ClientFrame, Request, Response, ServerFrame};

/// Time allowed for the server to answer `Hello`
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Pushed notification received from the server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Event on a subscribed topic
    Event { topic: Topic, event: SessionEvent },
    Subscribed { topic: Topic },
    Unsubscribed { topic: Topic },
    Pong { server_time: DateTime<Utc> },
    /// Server is shutting down
    ServerShutdown,
    /// Connection lost
    Disconnected,
}

/// Client handle for network operations
pub struct Client {
    user: UserInfo,
    state: Arc<RwLock<ConnectionState>>,
    event_rx: mpsc::Receiver<ClientEvent>,
    cmd_tx: mpsc::Sender<ClientCommand>,
}

type Reply = oneshot::Sender<Result<Response>>;

enum ClientCommand {
    Call { request: Request, reply: Reply },
    Send(ClientFrame),
    Disconnect,
}

impl Client {
    /// Connect and authenticate with `token`
    pub async fn connect(addr: SocketAddr, token: impl Into<String>) -> Result<Self> {
        info!(addr = %addr, "Connecting to server");

        let stream = TcpStream::connect(addr).await?;
        let (mut reader, mut writer) = tokio::io::split(stream);

        write_frame(&mut writer, &ClientFrame::Hello { token: token.into() }).await?;

        let reply = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_frame::<ServerFrame, _>(&mut reader))
            .await
            .map_err(|_| Error::Timeout("welcome"))??;

        let user = match reply {
            ServerFrame::Welcome { user } => user,
            ServerFrame::HelloRejected { error } => {
                warn!(kind = ?error.kind, reason = %error.message, "Connection rejected");
                return Err(Error::Rejected(error.message));
            }
            other => {
                return Err(Error::Protocol(format!("Expected Welcome, got {:?}", other)));
            }
        };

        info!(user_id = %user.user_id, "Connected");

        let state = Arc::new(RwLock::new(ConnectionState::Connected));
        let (event_tx, event_rx) = mpsc::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        tokio::spawn(connection_task(
            reader,
            writer,
            state.clone(),
            event_tx,
            cmd_rx,
        ));

        Ok(Client {
            user,
            state,
            event_rx,
            cmd_tx,
        })
    }

    /// Identity the server resolved for our token
    pub fn user(&self) -> &UserInfo {
        &self.user
    }

    /// Perform one request and wait for its answer
    pub async fn call(&self, request: Request) -> Result<Response> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(ClientCommand::Call { request, reply })
            .await
            .map_err(|_| Error::NotConnected)?;
        rx.await.map_err(|_| Error::NotConnected)?
    }

    /// Start receiving events for `topic`
    pub async fn subscribe(&self, topic: Topic) -> Result<()> {
        self.send(ClientFrame::Subscribe { topic }).await
    }

    pub async fn unsubscribe(&self, topic: Topic) -> Result<()> {
        self.send(ClientFrame::Unsubscribe { topic }).await
    }

    /// Send a ping; the answer arrives as `ClientEvent::Pong`
    pub async fn ping(&self) -> Result<()> {
        self.send(ClientFrame::Ping).await
    }

    /// Get the next server event
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.event_rx.recv().await
    }

    /// Disconnect from the server
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(ClientCommand::Disconnect).await;
    }

    /// Get current connection state
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    async fn send(&self, frame: ClientFrame) -> Result<()> {
        self.cmd_tx
            .send(ClientCommand::Send(frame))
            .await
            .map_err(|_| Error::NotConnected)
    }
}

/// Main connection task
async fn connection_task(
    mut reader: ReadHalf<TcpStream>,
    mut writer: WriteHalf<TcpStream>,
    state: Arc<RwLock<ConnectionState>>,
    event_tx: mpsc::Sender<ClientEvent>,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
) {
    let mut pending: HashMap<u64, Reply> = HashMap::new();
    let mut next_id: u64 = 1;

    loop {
        tokio::select! {
            // Incoming frame from server
            result = read_frame::<ServerFrame, _>(&mut reader) => {
                match result {
                    Ok(frame) => {
                        handle_server_frame(frame, &mut pending, &event_tx).await;
                    }
                    Err(Error::ConnectionClosed) => {
                        debug!("Server closed connection");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Read error");
                        break;
                    }
                }
            }

            // Outgoing command
            cmd = cmd_rx.recv() => {
                let frame = match cmd {
                    Some(ClientCommand::Call { request, reply }) => {
                        let id = next_id;
                        next_id += 1;
                        pending.insert(id, reply);
                        ClientFrame::Request { id, request }
                    }
                    Some(ClientCommand::Send(frame)) => frame,
                    Some(ClientCommand::Disconnect) | None => {
                        debug!("Disconnect requested");
                        break;
                    }
                };
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    warn!(error = %e, "Write error");
                    break;
                }
            }
        }
    }

    // Cleanup
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(Error::ConnectionClosed));
    }
    *state.write().await = ConnectionState::Disconnected;
    let _ = event_tx.send(ClientEvent::Disconnected).await;
    info!("Disconnected from server");
}

/// Handle a frame from the server
async fn handle_server_frame(
    frame: ServerFrame,
    pending: &mut HashMap<u64, Reply>,
    event_tx: &mpsc::Sender<ClientEvent>,
) {
    let event = match frame {
        ServerFrame::Response { id, response } => {
            resolve(pending, id, Ok(response));
            return;
        }
        ServerFrame::Failure { id, error } => {
            resolve(pending, id, Err(error.into()));
            return;
        }
        ServerFrame::Event { topic, event } => ClientEvent::Event { topic, event },
        ServerFrame::Subscribed { topic } => ClientEvent::Subscribed { topic },
        ServerFrame::Unsubscribed { topic } => ClientEvent::Unsubscribed { topic },
        ServerFrame::Pong { server_time } => ClientEvent::Pong { server_time },
        ServerFrame::ShuttingDown => ClientEvent::ServerShutdown,
        ServerFrame::Welcome { .. } | ServerFrame::HelloRejected { .. } => {
            debug!("Ignoring handshake frame after connect");
            return;
        }
    };
    let _ = event_tx.send(event).await;
}

fn resolve(pending: &mut HashMap<u64, Reply>, id: u64, result: Result<Response>) {
    match pending.remove(&id) {
        Some(reply) => {
            let _ = reply.send(result);
        }
        None => debug!(id, "Response for unknown request"),
    }
}
