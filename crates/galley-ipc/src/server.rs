//! IPC server implementation

use galley_api::{ClientInfo, ClientRole, Command, Event, EventPayload, Request, Response};
use galley_util::ClientId;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{IpcError, IpcResult};

/// Message from the IPC layer to the service
#[derive(Debug)]
pub enum ServerMessage {
    Request {
        client_id: ClientId,
        request: Request,
    },
    ClientConnected {
        client_id: ClientId,
        info: ClientInfo,
    },
    ClientDisconnected {
        client_id: ClientId,
    },
}

/// IPC server
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    clients: Arc<RwLock<HashMap<ClientId, ClientHandle>>>,
    event_tx: broadcast::Sender<Event>,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
    message_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>>,
}

struct ClientHandle {
    info: ClientInfo,
    response_tx: mpsc::UnboundedSender<String>,
    /// Receives kitchen events
    events: bool,
    /// Receives per-tick timer updates
    timers: bool,
}

impl ClientHandle {
    fn wants(&self, event: &Event) -> bool {
        match event.payload {
            EventPayload::TimersUpdated { .. } => self.timers,
            _ => self.events,
        }
    }
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            listener: None,
            clients: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            message_tx,
            message_rx: Arc::new(Mutex::new(Some(message_rx))),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Start listening
    pub async fn start(&mut self) -> IpcResult<()> {
        // Stale socket from a previous run
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        // Owner and group (kitchen station accounts) only
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o660))?;

        info!(path = %self.socket_path.display(), "IPC server listening");

        self.listener = Some(listener);

        Ok(())
    }

    /// Get receiver for server messages. Only the first caller gets it.
    pub async fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.message_rx.lock().await.take()
    }

    /// Accept connections in a loop
    pub async fn run(&self) -> IpcResult<()> {
        let listener = self.listener.as_ref().ok_or(IpcError::NotStarted)?;
        let service_uid = nix::unistd::getuid().as_raw();

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let client_id = ClientId::new();
                    let uid = get_peer_uid(&stream);
                    let role = role_for_uid(uid, service_uid);

                    let mut info = ClientInfo::new(role);
                    info.client_id = client_id.clone();
                    if let Some(u) = uid {
                        info = info.with_uid(u);
                    }

                    debug!(client_id = %client_id, uid = ?uid, role = ?role, "Accepted connection");

                    self.handle_client(stream, client_id, info).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_client(&self, stream: UnixStream, client_id: ClientId, info: ClientInfo) {
        let (read_half, write_half) = stream.into_split();
        let (response_tx, mut response_rx) = mpsc::unbounded_channel::<String>();

        self.clients.write().await.insert(
            client_id.clone(),
            ClientHandle {
                info: info.clone(),
                response_tx,
                events: false,
                timers: false,
            },
        );

        let _ = self.message_tx.send(ServerMessage::ClientConnected {
            client_id: client_id.clone(),
            info,
        });

        // Reader: owns the connection lifetime
        let clients = self.clients.clone();
        let message_tx = self.message_tx.clone();
        let reader_id = client_id.clone();

        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(client_id = %reader_id, "Client disconnected (EOF)");
                        break;
                    }
                    Ok(_) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }

                        match serde_json::from_str::<Request>(line) {
                            Ok(request) => {
                                update_subscriptions(&clients, &reader_id, &request.command).await;

                                let _ = message_tx.send(ServerMessage::Request {
                                    client_id: reader_id.clone(),
                                    request,
                                });
                            }
                            Err(e) => {
                                warn!(client_id = %reader_id, error = %e, "Invalid request");
                            }
                        }
                    }
                    Err(e) => {
                        debug!(client_id = %reader_id, error = %e, "Read error");
                        break;
                    }
                }
            }

            // Dropping the handle closes the response channel and ends the writer
            clients.write().await.remove(&reader_id);
            let _ = message_tx.send(ServerMessage::ClientDisconnected {
                client_id: reader_id,
            });
        });

        // Writer: responses plus whatever events the client subscribed to
        let mut event_rx = self.event_tx.subscribe();
        let clients = self.clients.clone();
        let writer_id = client_id;

        tokio::spawn(async move {
            let mut writer = write_half;

            loop {
                let line = tokio::select! {
                    response = response_rx.recv() => match response {
                        Some(response) => response,
                        None => break,
                    },

                    event = event_rx.recv() => match event {
                        Ok(event) => {
                            let wanted = clients
                                .read()
                                .await
                                .get(&writer_id)
                                .map(|h| h.wants(&event))
                                .unwrap_or(false);
                            if !wanted {
                                continue;
                            }
                            match serde_json::to_string(&event) {
                                Ok(json) => json,
                                Err(e) => {
                                    warn!(error = %e, "Failed to serialize event");
                                    continue;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(client_id = %writer_id, skipped, "Client fell behind on events");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };

                let mut msg = line;
                msg.push('\n');
                if let Err(e) = writer.write_all(msg.as_bytes()).await {
                    debug!(client_id = %writer_id, error = %e, "Write error");
                    break;
                }
            }
        });
    }

    /// Send a response to a specific client
    pub async fn send_response(&self, client_id: &ClientId, response: Response) -> IpcResult<()> {
        let json = serde_json::to_string(&response)?;

        let clients = self.clients.read().await;
        if let Some(handle) = clients.get(client_id) {
            handle
                .response_tx
                .send(json)
                .map_err(|_| IpcError::ConnectionClosed)?;
        }

        Ok(())
    }

    /// Broadcast an event to every client subscribed to it
    pub fn broadcast_event(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    pub async fn get_client_info(&self, client_id: &ClientId) -> Option<ClientInfo> {
        let clients = self.clients.read().await;
        clients.get(client_id).map(|h| h.info.clone())
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Remove the socket file
    pub fn shutdown(&self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn update_subscriptions(
    clients: &RwLock<HashMap<ClientId, ClientHandle>>,
    client_id: &ClientId,
    command: &Command,
) {
    let (events, timers) = match command {
        Command::SubscribeEvents => (Some(true), None),
        Command::UnsubscribeEvents => (Some(false), None),
        Command::SubscribeTimers => (None, Some(true)),
        Command::UnsubscribeTimers => (None, Some(false)),
        _ => return,
    };

    let mut clients = clients.write().await;
    if let Some(handle) = clients.get_mut(client_id) {
        if let Some(events) = events {
            handle.events = events;
        }
        if let Some(timers) = timers {
            handle.timers = timers;
        }
    }
}

/// Root and the service's own user administer; other local users run
/// stations. Peers we cannot identify may only watch.
fn role_for_uid(uid: Option<u32>, service_uid: u32) -> ClientRole {
    match uid {
        Some(0) => ClientRole::Admin,
        Some(u) if u == service_uid => ClientRole::Admin,
        Some(_) => ClientRole::Station,
        None => ClientRole::Observer,
    }
}

/// Get peer UID from Unix socket
fn get_peer_uid(stream: &UnixStream) -> Option<u32> {
    use std::os::unix::io::AsFd;

    let fd = stream.as_fd();

    match nix::sys::socket::getsockopt(&fd, nix::sys::socket::sockopt::PeerCredentials) {
        Ok(cred) => Some(cred.uid()),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IpcClient;
    use galley_api::{ResponsePayload, API_VERSION};
    use std::time::Duration;
    use tempfile::tempdir;

    async fn started(socket_path: &Path) -> (Arc<IpcServer>, mpsc::UnboundedReceiver<ServerMessage>) {
        let mut server = IpcServer::new(socket_path);
        server.start().await.unwrap();
        let server = Arc::new(server);
        let messages = server.take_message_receiver().await.unwrap();

        let accept = server.clone();
        tokio::spawn(async move {
            let _ = accept.run().await;
        });

        (server, messages)
    }

    async fn next_request(
        messages: &mut mpsc::UnboundedReceiver<ServerMessage>,
    ) -> (ClientId, Request) {
        loop {
            match messages.recv().await.unwrap() {
                ServerMessage::Request { client_id, request } => return (client_id, request),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_server_start() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let mut server = IpcServer::new(&socket_path);
        server.start().await.unwrap();

        assert!(socket_path.exists());
        assert!(server.take_message_receiver().await.is_some());
        assert!(server.take_message_receiver().await.is_none());
    }

    #[tokio::test]
    async fn test_run_before_start() {
        let dir = tempdir().unwrap();
        let server = IpcServer::new(dir.path().join("test.sock"));
        assert!(matches!(server.run().await, Err(IpcError::NotStarted)));
    }

    #[tokio::test]
    async fn test_request_response_round_trip() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("galley.sock");
        let (server, mut messages) = started(&socket_path).await;

        let responder = server.clone();
        tokio::spawn(async move {
            let (client_id, request) = next_request(&mut messages).await;
            assert!(matches!(request.command, Command::Ping));
            assert_eq!(request.api_version, API_VERSION);

            let info = responder.get_client_info(&client_id).await.unwrap();
            // Same user as the test process
            assert_eq!(info.role, ClientRole::Admin);

            responder
                .send_response(&client_id, Response::success(request.request_id, ResponsePayload::Pong))
                .await
                .unwrap();
        });

        let mut client = IpcClient::connect(&socket_path).await.unwrap();
        let response = client.send(Command::Ping).await.unwrap();

        assert_eq!(response.request_id, 1);
        assert!(matches!(
            response.result,
            galley_api::ResponseResult::Ok(ResponsePayload::Pong)
        ));
    }

    #[tokio::test]
    async fn test_events_follow_subscriptions() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("galley.sock");
        let (server, mut messages) = started(&socket_path).await;

        let responder = server.clone();
        tokio::spawn(async move {
            while let Some(msg) = messages.recv().await {
                if let ServerMessage::Request { client_id, request } = msg {
                    let payload = ResponsePayload::Subscribed {
                        client_id: client_id.clone(),
                    };
                    let _ = responder
                        .send_response(&client_id, Response::success(request.request_id, payload))
                        .await;
                }
            }
        });

        let client = IpcClient::connect(&socket_path).await.unwrap();
        let mut stream = client.subscribe().await.unwrap();

        // Event subscribers do not get timer ticks
        server.broadcast_event(Event::new(EventPayload::TimersUpdated { timers: vec![] }));
        server.broadcast_event(Event::new(EventPayload::OrdersSynced { order_count: 3 }));

        let event = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event.payload, EventPayload::OrdersSynced { order_count: 3 }));
    }

    #[tokio::test]
    async fn test_disconnect_is_reported() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("galley.sock");
        let (server, mut messages) = started(&socket_path).await;

        let client = IpcClient::connect(&socket_path).await.unwrap();

        let connected = match messages.recv().await.unwrap() {
            ServerMessage::ClientConnected { client_id, .. } => client_id,
            other => panic!("unexpected message {:?}", other),
        };
        assert_eq!(server.client_count().await, 1);

        drop(client);

        match tokio::time::timeout(Duration::from_secs(5), messages.recv())
            .await
            .unwrap()
            .unwrap()
        {
            ServerMessage::ClientDisconnected { client_id } => assert_eq!(client_id, connected),
            other => panic!("unexpected message {:?}", other),
        }
        assert_eq!(server.client_count().await, 0);
    }

    #[test]
    fn test_roles_from_peer_uid() {
        assert_eq!(role_for_uid(Some(0), 1000), ClientRole::Admin);
        assert_eq!(role_for_uid(Some(1000), 1000), ClientRole::Admin);
        assert_eq!(role_for_uid(Some(1001), 1000), ClientRole::Station);
        assert_eq!(role_for_uid(None, 1000), ClientRole::Observer);
    }
}
