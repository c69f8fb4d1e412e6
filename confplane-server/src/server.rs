//! TCP protocol server.

use crate::config::ServerSettings;
use crate::error::ServerError;
use crate::handler::RequestHandler;
use crate::session::{Session, SessionIdAllocator, SessionState};
use confplane_protocol::message::{Request, Response, ResponseError};
use confplane_protocol::{Decoder, Encoder, ErrorCode, Frame, ProtocolError};
use dashmap::DashMap;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub sessions_established_total: AtomicU64,
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// A snapshot of one active session, fed to the monitoring publisher.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: u64,
    pub remote_addr: String,
    pub client_name: Option<String>,
    pub state: String,
    pub request_count: u64,
}

/// The protocol server: listener, accept loop, and per-connection
/// session handling.
pub struct ProtocolServer {
    settings: ServerSettings,
    handler: Arc<RequestHandler>,
    sessions: Arc<DashMap<u64, SessionInfo>>,
    ids: SessionIdAllocator,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,
}

impl ProtocolServer {
    pub fn new(settings: ServerSettings, handler: Arc<RequestHandler>) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            settings,
            handler,
            sessions: Arc::new(DashMap::new()),
            ids: SessionIdAllocator::new(),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
            local_addr: parking_lot::Mutex::new(None),
        })
    }

    /// Binds the listener and spawns the accept loop.
    ///
    /// Returns the bound address; with port 0 the kernel picks an
    /// ephemeral port. A bind failure aborts startup.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, ServerError> {
        let listener = TcpListener::bind(self.settings.bind_addr()).await?;
        let addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(addr);
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("server listening on {}", addr);

        let this = self.clone();
        tokio::spawn(async move {
            this.accept_loop(listener).await;
        });
        Ok(addr)
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let session_id = self.ids.allocate();
                            let this = self.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();
                            tokio::spawn(async move {
                                let result = this
                                    .handle_connection(stream, addr, session_id, &mut conn_shutdown)
                                    .await;
                                if let Err(e) = result {
                                    tracing::debug!("[{}] connection error: {}", addr, e);
                                    this.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                }
                                this.sessions.remove(&session_id);
                                this.stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                tracing::info!("client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("server accept loop stopping");
                    break;
                }
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    async fn handle_connection(
        &self,
        mut stream: TcpStream,
        addr: SocketAddr,
        session_id: u64,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        tracing::info!("client connected: {} (session {})", addr, session_id);

        let mut session = Session::new(session_id, addr);
        session.transition(SessionState::CapabilityExchange)?;
        self.publish_session(&session);

        let mut decoder = Decoder::new();
        let mut buf = [0u8; 8192];

        // A connection that has not reached Established by this deadline
        // is torn down.
        let negotiation_deadline =
            tokio::time::Instant::now() + self.settings.connection_timeout();
        let idle_timeout = self.settings.idle_timeout();

        loop {
            tokio::select! {
                result = stream.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!("[{}] connection closed by client", addr);
                            self.close_session(&mut session);
                            return Ok(());
                        }
                        Ok(n) => decoder.extend(&buf[..n]),
                        Err(e) => {
                            self.close_session(&mut session);
                            return Err(ServerError::Io(e));
                        }
                    }
                }

                _ = tokio::time::sleep_until(negotiation_deadline),
                    if !session.is_established() =>
                {
                    tracing::warn!(
                        "[{}] session {} did not establish within {:?}",
                        addr, session_id, self.settings.connection_timeout()
                    );
                    self.close_session(&mut session);
                    return Ok(());
                }

                _ = tokio::time::sleep(idle_timeout), if session.is_established() => {
                    if session.idle_duration() >= idle_timeout {
                        tracing::debug!("[{}] idle timeout", addr);
                        self.close_session(&mut session);
                        return Ok(());
                    }
                }

                _ = shutdown.recv() => {
                    tracing::debug!("[{}] shutdown signal received", addr);
                    self.close_session(&mut session);
                    return Ok(());
                }
            }

            // Framing errors (bad magic, version, CRC) propagate and drop
            // the connection: the byte stream is unrecoverable. A sound
            // frame whose payload is not a valid request gets an error
            // response instead, and the stream keeps going.
            while let Some(frame) = decoder.decode_frame()? {
                let request = match request_from_frame(&frame) {
                    Ok(request) => request,
                    Err(e) => {
                        tracing::debug!("[{}] unreadable request payload: {}", addr, e);
                        self.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                        let response = Response::error(
                            request_id_hint(&frame),
                            ResponseError::new(ErrorCode::BadRequest, e.to_string()),
                        );
                        let response_bytes = Encoder::encode_response(&response)?;
                        stream.write_all(&response_bytes).await?;
                        continue;
                    }
                };
                tracing::info!("[{}] request: {:?} (id={})", addr, request.op, request.id);
                self.stats.requests_total.fetch_add(1, Ordering::Relaxed);

                let was_established = session.is_established();
                let response = self.handler.handle(&mut session, &request).await;
                if response.is_error() {
                    self.stats.errors_total.fetch_add(1, Ordering::Relaxed);
                }
                if !was_established && session.is_established() {
                    self.stats
                        .sessions_established_total
                        .fetch_add(1, Ordering::Relaxed);
                }
                self.publish_session(&session);

                let response_bytes = Encoder::encode_response(&response)?;
                stream.write_all(&response_bytes).await?;

                if session.state() == SessionState::Closing {
                    self.close_session(&mut session);
                    return Ok(());
                }
            }
        }
    }

    fn publish_session(&self, session: &Session) {
        self.sessions.insert(
            session.id,
            SessionInfo {
                id: session.id,
                remote_addr: session.remote_addr.to_string(),
                client_name: session.client_name().map(|s| s.to_string()),
                state: session.state().name().to_string(),
                request_count: session.request_count(),
            },
        );
    }

    fn close_session(&self, session: &mut Session) {
        if session.state() != SessionState::Closing {
            let _ = session.transition(SessionState::Closing);
        }
        let _ = session.transition(SessionState::Closed);
        self.sessions.remove(&session.id);
    }

    /// Stops the server: the listener closes first, then every active
    /// session unwinds, then this returns.
    pub async fn stop(&self) {
        tracing::info!("server stopping");
        let _ = self.shutdown.send(());

        // Bounded wait for the accept loop and connections to unwind.
        for _ in 0..500 {
            if !self.running.load(Ordering::SeqCst) && self.sessions.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tracing::info!("server stopped");
    }

    /// Returns whether the accept loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns the bound address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Snapshot of every active session, for the monitoring publisher.
    pub fn session_snapshot(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }
}

fn request_from_frame(frame: &Frame) -> Result<Request, ProtocolError> {
    let payload =
        std::str::from_utf8(&frame.payload).map_err(|_| ProtocolError::InvalidUtf8)?;
    Ok(serde_json::from_str(payload)?)
}

/// Best-effort request id for the error reply when the payload did not
/// deserialize as a request.
fn request_id_hint(frame: &Frame) -> String {
    std::str::from_utf8(&frame.payload)
        .ok()
        .and_then(|s| serde_json::from_str::<serde_json::Value>(s).ok())
        .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_string))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Authenticator;
    use confplane_broker::{
        BrokerConfig, DataBroker, OperationServiceAggregator, RpcRouter,
    };
    use confplane_protocol::message::Operation;
    use confplane_protocol::PROTOCOL_VERSION;
    use confplane_schema::{ModelSource, SchemaContext};
    use confplane_store::{DataStore, LogicalStore, StoreConfig};
    use serde_json::json;

    fn test_handler() -> Arc<RequestHandler> {
        let source = ModelSource::from_json(&json!({
            "name": "example-system",
            "revision": "2024-02-01",
            "namespace": "urn:example:system",
            "nodes": {
                "system": {
                    "kind": "container",
                    "children": {
                        "hostname": {"kind": "leaf", "type": "string"}
                    }
                }
            }
        }))
        .unwrap();
        let schema = SchemaContext::build(&[source]).unwrap();

        let config_store = Arc::new(
            DataStore::new(
                LogicalStore::Configuration,
                schema.clone(),
                &StoreConfig::default(),
            )
            .unwrap(),
        );
        let oper_store = Arc::new(
            DataStore::new(LogicalStore::Operational, schema, &StoreConfig::default()).unwrap(),
        );
        let broker = DataBroker::new(BrokerConfig::default(), config_store, oper_store).unwrap();

        Arc::new(RequestHandler::new(
            broker,
            RpcRouter::new(),
            OperationServiceAggregator::new(),
            Authenticator::new(&ServerSettings::default()),
        ))
    }

    fn ephemeral_settings() -> ServerSettings {
        ServerSettings {
            port: 0,
            ..ServerSettings::default()
        }
    }

    async fn send(stream: &mut TcpStream, decoder: &mut Decoder, request: &Request) -> Response {
        let bytes = Encoder::encode_request(request).unwrap();
        stream.write_all(&bytes).await.unwrap();

        let mut buf = [0u8; 4096];
        loop {
            if let Some(response) = decoder.decode_response().unwrap() {
                return response;
            }
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed while waiting for response");
            decoder.extend(&buf[..n]);
        }
    }

    async fn establish(stream: &mut TcpStream, decoder: &mut Decoder) {
        let hello = Request::new("h1", Operation::Hello).with_params(json!({
            "protocol_version": PROTOCOL_VERSION,
            "client_name": "test-client",
            "capabilities": ["urn:confplane:base:1.0"],
        }));
        let resp = send(stream, decoder, &hello).await;
        assert!(resp.is_ok(), "hello failed: {:?}", resp.error);

        let auth = Request::new("a1", Operation::Auth).with_params(json!({
            "username": "confplane",
            "password": "confplane",
        }));
        let resp = send(stream, decoder, &auth).await;
        assert!(resp.is_ok(), "auth failed: {:?}", resp.error);
    }

    #[tokio::test]
    async fn test_start_binds_ephemeral_port() {
        let server = ProtocolServer::new(ephemeral_settings(), test_handler());
        let addr = server.start().await.unwrap();

        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addr(), Some(addr));
        assert!(server.is_running());

        server.stop().await;
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_end_to_end_session() {
        let server = ProtocolServer::new(ephemeral_settings(), test_handler());
        let addr = server.start().await.unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut decoder = Decoder::new();
        establish(&mut stream, &mut decoder).await;

        let edit = Request::new("e1", Operation::EditConfig).with_params(json!({
            "edits": [{"op": "put", "path": "/system/hostname", "value": "gw-1"}]
        }));
        let resp = send(&mut stream, &mut decoder, &edit).await;
        assert!(resp.is_ok(), "edit failed: {:?}", resp.error);

        let commit = Request::new("c1", Operation::Commit);
        let resp = send(&mut stream, &mut decoder, &commit).await;
        assert!(resp.is_ok(), "commit failed: {:?}", resp.error);
        assert_eq!(resp.meta.versions.get("CONFIG-DS"), Some(&1));

        let get = Request::new("g1", Operation::GetConfig)
            .with_params(json!({"path": "/system/hostname"}));
        let resp = send(&mut stream, &mut decoder, &get).await;
        assert!(resp.is_ok());
        assert_eq!(resp.result.unwrap()["data"], json!("gw-1"));

        assert_eq!(server.session_snapshot().len(), 1);
        assert_eq!(
            server.stats().sessions_established_total.load(Ordering::Relaxed),
            1
        );

        let close = Request::new("x1", Operation::CloseSession);
        let resp = send(&mut stream, &mut decoder, &close).await;
        assert!(resp.is_ok());

        // Server closes the connection after CLOSE_SESSION.
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);

        server.stop().await;
        assert!(server.session_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_payload_answered_not_dropped() {
        let server = ProtocolServer::new(ephemeral_settings(), test_handler());
        let addr = server.start().await.unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut decoder = Decoder::new();

        // A sound frame carrying an operation the server does not know.
        let frame = Frame::from_json(&json!({
            "type": "request",
            "id": "bad-1",
            "op": "BOGUS",
        }))
        .unwrap();
        stream.write_all(&frame.encode().unwrap()).await.unwrap();

        let mut buf = [0u8; 4096];
        let response = loop {
            if let Some(r) = decoder.decode_response().unwrap() {
                break r;
            }
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed instead of replying");
            decoder.extend(&buf[..n]);
        };
        assert_eq!(response.id, "bad-1");
        assert_eq!(
            response.error.unwrap().code,
            confplane_protocol::ErrorCode::BadRequest
        );

        // The stream stays usable; negotiation still goes through.
        establish(&mut stream, &mut decoder).await;

        server.stop().await;
    }

    #[tokio::test]
    async fn test_negotiation_timeout_closes_connection() {
        let settings = ServerSettings {
            port: 0,
            connection_timeout_ms: 100,
            ..ServerSettings::default()
        };
        let server = ProtocolServer::new(settings, test_handler());
        let addr = server.start().await.unwrap();

        // Connect and send nothing.
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "server should close a silent connection");

        server.stop().await;
    }

    #[tokio::test]
    async fn test_stop_closes_active_sessions() {
        let server = ProtocolServer::new(ephemeral_settings(), test_handler());
        let addr = server.start().await.unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut decoder = Decoder::new();
        establish(&mut stream, &mut decoder).await;
        assert_eq!(server.session_snapshot().len(), 1);

        server.stop().await;

        assert!(server.session_snapshot().is_empty());
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }
}
