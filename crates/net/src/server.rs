//! TCP server for the session service
//!
//! Each connection authenticates once, then multiplexes numbered requests and
//! topic subscriptions over a single stream. Requests run on blocking threads
//! since the service talks to SQLite synchronously.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use focusroom_core::{ErrorKind, SessionService, Topic, UserInfo};

use crate::auth::Authenticator;
use crate::dispatch::dispatch;
use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::hub::{Hub, Subscription};
use crate::protocol::{ClientFrame, Request, ServerFrame, WireError};

/// Default cap on simultaneous connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;

/// Time a new connection has to send `Hello`
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Time a refused connection gets to send `Hello` before it is told why
const REFUSAL_GRACE: Duration = Duration::from_secs(1);

/// Outgoing frames queued per connection
const OUTBOX_CAPACITY: usize = 64;

/// Everything a connection needs to serve requests
#[derive(Clone)]
pub struct ServerContext {
    pub service: Arc<SessionService>,
    pub hub: Arc<Hub>,
    pub auth: Arc<dyn Authenticator>,
    pub max_connections: usize,
}

impl ServerContext {
    pub fn new(service: Arc<SessionService>, hub: Arc<Hub>, auth: Arc<dyn Authenticator>) -> Self {
        Self {
            service,
            hub,
            auth,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Server handle
pub struct Server {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind `addr` and start accepting connections
    pub async fn start(addr: SocketAddr, ctx: ServerContext) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "Server started");

        let (shutdown_tx, _) = broadcast::channel(1);
        let connections = Arc::new(AtomicUsize::new(0));

        tokio::spawn(accept_loop(
            listener,
            ctx,
            connections.clone(),
            shutdown_tx.clone(),
        ));

        Ok(Server {
            addr: bound_addr,
            connections,
            shutdown_tx,
        })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of open connections, including ones still in the handshake
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Stop accepting and tell every connection to close
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("Server shutdown initiated");
    }
}

/// Accept incoming connections
async fn accept_loop(
    listener: TcpListener,
    ctx: ServerContext,
    connections: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            ctx.clone(),
                            connections.clone(),
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Decrements the connection count when a session ends
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(counter: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| ConnectionSlot(counter.clone()))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: ServerContext,
    connections: Arc<AtomicUsize>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);

    // Held from before the handshake so idle sockets count against the cap
    let Some(_slot) = ConnectionSlot::acquire(&connections, ctx.max_connections) else {
        warn!(addr = %addr, "Connection limit reached");
        // Consume the Hello so closing does not reset the stream under the reply
        let _ = tokio::time::timeout(REFUSAL_GRACE, read_frame::<ClientFrame, _>(&mut reader))
            .await;
        let error = WireError::new(ErrorKind::Conflict, "Server is full");
        let _ = write_frame(&mut writer, &ServerFrame::HelloRejected { error }).await;
        return;
    };

    let user = match handshake(&mut reader, &ctx).await {
        Ok(user) => user,
        Err(e) => {
            warn!(addr = %addr, error = %e, "Handshake failed");
            let error = match e {
                Error::Remote { kind, message } => WireError::new(kind, message),
                other => WireError::new(ErrorKind::AuthenticationRequired, other.to_string()),
            };
            let _ = write_frame(&mut writer, &ServerFrame::HelloRejected { error }).await;
            return;
        }
    };

    info!(addr = %addr, user_id = %user.user_id, "Client connected");

    let (frame_tx, frame_rx) = mpsc::channel(OUTBOX_CAPACITY);
    let writer_handle = tokio::spawn(writer_task(writer, frame_rx));
    let _ = frame_tx
        .send(ServerFrame::Welcome { user: user.clone() })
        .await;

    let mut subscriptions: HashMap<Topic, JoinHandle<()>> = HashMap::new();

    // Read loop
    loop {
        tokio::select! {
            result = read_frame::<ClientFrame, _>(&mut reader) => {
                match result {
                    Ok(frame) => {
                        handle_frame(frame, &user, &ctx, &frame_tx, &mut subscriptions).await;
                    }
                    Err(Error::ConnectionClosed) => {
                        debug!(user_id = %user.user_id, "Connection closed");
                        break;
                    }
                    Err(e) => {
                        warn!(user_id = %user.user_id, error = %e, "Read error");
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                let _ = frame_tx.send(ServerFrame::ShuttingDown).await;
                break;
            }
        }
    }

    // Cleanup
    for (_, task) in subscriptions.drain() {
        task.abort();
    }
    drop(frame_tx);
    // Let queued frames (responses, ShuttingDown) drain before closing
    if tokio::time::timeout(Duration::from_secs(1), writer_handle)
        .await
        .is_err()
    {
        debug!(user_id = %user.user_id, "Writer did not drain in time");
    }

    info!(user_id = %user.user_id, "Client disconnected");
}

/// Read `Hello` and resolve its token
async fn handshake(reader: &mut ReadHalf<TcpStream>, ctx: &ServerContext) -> Result<UserInfo> {
    let frame = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_frame::<ClientFrame, _>(reader))
        .await
        .map_err(|_| Error::Timeout("hello"))??;

    let ClientFrame::Hello { token } = frame else {
        return Err(Error::Protocol("Expected Hello".into()));
    };

    let auth = ctx.auth.clone();
    let outcome = tokio::task::spawn_blocking(move || auth.authenticate(&token))
        .await
        .map_err(|e| Error::Protocol(format!("Authenticator panicked: {}", e)))?;

    outcome.map_err(|e| WireError::from(&e).into())
}

/// Writer task - sends frames to the client
async fn writer_task(mut writer: WriteHalf<TcpStream>, mut rx: mpsc::Receiver<ServerFrame>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
}

/// Handle an incoming frame
async fn handle_frame(
    frame: ClientFrame,
    user: &UserInfo,
    ctx: &ServerContext,
    frame_tx: &mpsc::Sender<ServerFrame>,
    subscriptions: &mut HashMap<Topic, JoinHandle<()>>,
) {
    match frame {
        ClientFrame::Request { id, request } => {
            tokio::spawn(run_request(
                id,
                request,
                user.clone(),
                ctx.service.clone(),
                frame_tx.clone(),
            ));
        }
        ClientFrame::Subscribe { topic } => {
            if !subscriptions.contains_key(&topic) {
                let subscription = ctx.hub.subscribe(topic);
                let task = tokio::spawn(forward_events(subscription, frame_tx.clone()));
                subscriptions.insert(topic, task);
                debug!(user_id = %user.user_id, %topic, "Subscribed");
            }
            let _ = frame_tx.send(ServerFrame::Subscribed { topic }).await;
        }
        ClientFrame::Unsubscribe { topic } => {
            if let Some(task) = subscriptions.remove(&topic) {
                task.abort();
                debug!(user_id = %user.user_id, %topic, "Unsubscribed");
            }
            let _ = frame_tx.send(ServerFrame::Unsubscribed { topic }).await;
        }
        ClientFrame::Ping => {
            let _ = frame_tx
                .send(ServerFrame::Pong {
                    server_time: Utc::now(),
                })
                .await;
        }
        ClientFrame::Hello { .. } => {
            debug!(user_id = %user.user_id, "Ignoring repeated Hello");
        }
    }
}

/// Validate and dispatch one request, then queue its answer
async fn run_request(
    id: u64,
    request: Request,
    user: UserInfo,
    service: Arc<SessionService>,
    frame_tx: mpsc::Sender<ServerFrame>,
) {
    let op = request.name();
    let user_id: Uuid = user.user_id;

    let outcome = match request.validate() {
        Ok(()) => tokio::task::spawn_blocking(move || dispatch(&service, &user, request))
            .await
            .unwrap_or_else(|e| {
                error!(op, error = %e, "Request task failed");
                Err(focusroom_core::Error::Io(std::io::Error::other(e.to_string())))
            }),
        Err(e) => Err(e),
    };

    let frame = match outcome {
        Ok(response) => {
            debug!(op, %user_id, "Request served");
            ServerFrame::Response { id, response }
        }
        Err(e) => {
            if e.kind() == ErrorKind::Internal {
                error!(op, %user_id, error = %e, "Request failed");
            } else {
                debug!(op, %user_id, error = %e, "Request refused");
            }
            ServerFrame::Failure {
                id,
                error: WireError::from(&e),
            }
        }
    };

    if frame_tx.send(frame).await.is_err() {
        debug!(op, %user_id, "Client gone before response");
    }
}

/// Relay hub events for one topic to the connection
async fn forward_events(mut subscription: Subscription, frame_tx: mpsc::Sender<ServerFrame>) {
    let topic = subscription.topic();
    loop {
        match subscription.recv().await {
            Ok(event) => {
                if frame_tx.send(ServerFrame::Event { topic, event }).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(%topic, skipped, "Subscriber lagged, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Client, ClientEvent};
    use crate::protocol::Response;
    use focusroom_core::{
        CreateSessionParams, Database, Error as CoreError, IdentityHasher, SessionEventKind,
    };

    const WAIT: Duration = Duration::from_secs(5);

    /// Fixed token table
    struct StaticAuth(HashMap<String, UserInfo>);

    impl Authenticator for StaticAuth {
        fn authenticate(&self, token: &str) -> focusroom_core::Result<UserInfo> {
            self.0
                .get(token)
                .cloned()
                .ok_or(CoreError::AuthenticationRequired)
        }
    }

    struct Fixture {
        server: Server,
        hub: Arc<Hub>,
        host: UserInfo,
        guest: UserInfo,
    }

    async fn start() -> Fixture {
        start_with(DEFAULT_MAX_CONNECTIONS).await
    }

    async fn start_with(max_connections: usize) -> Fixture {
        let host = UserInfo::new(Uuid::new_v4());
        let guest = UserInfo::new(Uuid::new_v4());
        let auth = StaticAuth(HashMap::from([
            ("host-token".to_string(), host.clone()),
            ("guest-token".to_string(), guest.clone()),
        ]));

        let hub = Arc::new(Hub::new());
        let service = SessionService::new(
            Database::open_in_memory().unwrap(),
            IdentityHasher::new("server-test"),
        )
        .with_events(hub.clone());

        let mut ctx = ServerContext::new(Arc::new(service), hub.clone(), Arc::new(auth));
        ctx.max_connections = max_connections;
        let server = Server::start(SocketAddr::from(([127, 0, 0, 1], 0)), ctx)
            .await
            .unwrap();

        Fixture {
            server,
            hub,
            host,
            guest,
        }
    }

    async fn next(client: &mut Client) -> ClientEvent {
        tokio::time::timeout(WAIT, client.next_event())
            .await
            .unwrap()
            .unwrap()
    }

    async fn create(client: &Client) -> Uuid {
        let request = Request::CreateSession {
            params: CreateSessionParams::new("Draft the proposal", "writing", 25, 30),
        };
        match client.call(request).await.unwrap() {
            Response::Created(created) => created.session_id,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_start() {
        let fixture = start().await;
        assert!(fixture.server.addr().port() > 0);
        assert_eq!(fixture.server.connection_count(), 0);
        fixture.server.shutdown();
    }

    #[tokio::test]
    async fn test_bad_token_rejected() {
        let fixture = start().await;
        let result = Client::connect(fixture.server.addr(), "nope").await;
        assert!(matches!(result, Err(Error::Rejected(_))));
    }

    #[tokio::test]
    async fn test_request_roundtrip() {
        let fixture = start().await;
        let client = Client::connect(fixture.server.addr(), "host-token")
            .await
            .unwrap();
        assert_eq!(client.user(), &fixture.host);

        let id = create(&client).await;
        match client.call(Request::GetActiveSession).await.unwrap() {
            Response::ActiveSession(Some(active)) => {
                assert_eq!(active.session_id, id);
                assert!(active.is_creator);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_errors_carry_kind() {
        let fixture = start().await;
        let host = Client::connect(fixture.server.addr(), "host-token")
            .await
            .unwrap();
        let guest = Client::connect(fixture.server.addr(), "guest-token")
            .await
            .unwrap();
        let id = create(&host).await;

        let result = guest.call(Request::CancelSession { session_id: id }).await;
        assert!(matches!(
            result,
            Err(Error::Remote {
                kind: ErrorKind::AuthorizationDenied,
                ..
            })
        ));

        let result = host
            .call(Request::SendMessage {
                session_id: id,
                content: "  ".into(),
            })
            .await;
        assert!(matches!(
            result,
            Err(Error::Remote {
                kind: ErrorKind::Validation,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_subscribed_client_sees_join() {
        let fixture = start().await;
        let mut host = Client::connect(fixture.server.addr(), "host-token")
            .await
            .unwrap();
        let guest = Client::connect(fixture.server.addr(), "guest-token")
            .await
            .unwrap();
        let id = create(&host).await;

        host.subscribe(Topic::Session(id)).await.unwrap();
        assert_eq!(
            next(&mut host).await,
            ClientEvent::Subscribed {
                topic: Topic::Session(id)
            }
        );

        guest
            .call(Request::JoinSession { session_id: id })
            .await
            .unwrap();

        match next(&mut host).await {
            ClientEvent::Event { topic, event } => {
                assert_eq!(topic, Topic::Session(id));
                assert!(matches!(
                    event.kind,
                    SessionEventKind::ParticipantJoined {
                        participant_count: 2,
                        ..
                    }
                ));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(fixture.guest.user_id, guest.user().user_id);
    }

    /// Poll until `check` holds or the wait runs out
    async fn eventually(check: impl Fn() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + WAIT;
        while tokio::time::Instant::now() < deadline {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    #[tokio::test]
    async fn test_unsubscribe_and_disconnect_release_topics() {
        let fixture = start().await;
        let mut host = Client::connect(fixture.server.addr(), "host-token")
            .await
            .unwrap();
        let id = create(&host).await;

        host.subscribe(Topic::Session(id)).await.unwrap();
        host.subscribe(Topic::Chat(id)).await.unwrap();
        next(&mut host).await;
        next(&mut host).await;
        assert_eq!(fixture.hub.topic_count(), 2);

        host.unsubscribe(Topic::Session(id)).await.unwrap();
        assert_eq!(
            next(&mut host).await,
            ClientEvent::Unsubscribed {
                topic: Topic::Session(id)
            }
        );
        let hub = fixture.hub.clone();
        assert!(eventually(|| hub.topic_count() == 1).await);

        host.disconnect().await;
        assert!(eventually(|| hub.topic_count() == 0).await);
    }

    #[tokio::test]
    async fn test_idle_socket_counts_against_limit() {
        let fixture = start_with(1).await;
        let idle = TcpStream::connect(fixture.server.addr()).await.unwrap();
        let server = &fixture.server;
        assert!(eventually(|| server.connection_count() == 1).await);

        let result = Client::connect(fixture.server.addr(), "host-token").await;
        assert!(matches!(result, Err(Error::Rejected(_))));

        drop(idle);
        assert!(eventually(|| server.connection_count() == 0).await);
        let client = Client::connect(fixture.server.addr(), "host-token").await;
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_ping_and_shutdown() {
        let fixture = start().await;
        let mut client = Client::connect(fixture.server.addr(), "guest-token")
            .await
            .unwrap();

        client.ping().await.unwrap();
        assert!(matches!(next(&mut client).await, ClientEvent::Pong { .. }));

        fixture.server.shutdown();
        assert_eq!(next(&mut client).await, ClientEvent::ServerShutdown);
        assert_eq!(next(&mut client).await, ClientEvent::Disconnected);
        assert!(client.call(Request::GetMyRooms).await.is_err());
    }
}
