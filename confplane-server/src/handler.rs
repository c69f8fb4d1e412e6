//! Request handlers.

use crate::auth::Authenticator;
use crate::error::ServerError;
use crate::session::{negotiate_capabilities, Session, SessionState};
use confplane_broker::{DataBroker, OperationId, OperationServiceAggregator, RpcRouter};
use confplane_protocol::message::{
    AuthParams, EditOperation, EditParams, GetParams, HelloParams, HelloResult, Operation, Request,
    Response, ResponseError, ResponseMeta, RpcParams,
};
use confplane_protocol::PROTOCOL_VERSION;
use confplane_schema::DataPath;
use confplane_store::LogicalStore;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Capabilities every server advertises regardless of registered
/// operation services.
pub const BASE_CAPABILITIES: &[&str] = &[
    "urn:confplane:base:1.0",
    "urn:confplane:capability:writable-running:1.0",
    "urn:confplane:capability:rollback-on-error:1.0",
];

/// Server identity advertised during negotiation.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "confplane".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Dispatches protocol requests against the broker, router, and
/// aggregator.
pub struct RequestHandler {
    broker: Arc<DataBroker>,
    router: RpcRouter,
    aggregator: OperationServiceAggregator,
    auth: Authenticator,
    info: ServerInfo,
}

impl RequestHandler {
    pub fn new(
        broker: Arc<DataBroker>,
        router: RpcRouter,
        aggregator: OperationServiceAggregator,
        auth: Authenticator,
    ) -> Self {
        Self {
            broker,
            router,
            aggregator,
            auth,
            info: ServerInfo::default(),
        }
    }

    /// The full capability set: base plus everything registered
    /// operation services advertise.
    pub fn advertised_capabilities(&self) -> BTreeSet<String> {
        let mut caps: BTreeSet<String> =
            BASE_CAPABILITIES.iter().map(|s| s.to_string()).collect();
        caps.extend(
            self.aggregator
                .current_capabilities()
                .into_iter()
                .map(|c| c.0),
        );
        caps
    }

    /// Handles a request and returns a response.
    ///
    /// Request failures become error responses, never connection drops;
    /// the connection loop decides teardown from the session state alone.
    pub async fn handle(&self, session: &mut Session, request: &Request) -> Response {
        session.record_request();

        let result = match request.op {
            Operation::Hello => self.handle_hello(session, &request.params),
            Operation::Auth => self.handle_auth(session, &request.params),
            Operation::Ping => Ok(json!({"pong": true})),
            Operation::CloseSession => self.handle_close(session),
            Operation::Get => self.handle_get(session, &request.params, LogicalStore::Operational),
            Operation::GetConfig => {
                self.handle_get(session, &request.params, LogicalStore::Configuration)
            }
            Operation::EditConfig => self.handle_edit_config(session, &request.params),
            Operation::Commit => return self.handle_commit(session, request).await,
            Operation::Cancel => self.handle_cancel(session),
            Operation::Rpc => self.handle_rpc(session, &request.params).await,
        };

        match result {
            Ok(value) => Response::ok(&request.id, value).with_meta(ResponseMeta {
                session_id: Some(session.id),
                ..Default::default()
            }),
            Err(e) => {
                tracing::debug!("session {}: {:?} failed: {}", session.id, request.op, e);
                let mut error = ResponseError::new(e.error_code(), e.to_string());
                if matches!(e, ServerError::CapabilityMismatch(_)) {
                    // Tell the rejected client what the server would have
                    // accepted.
                    let advertised: Vec<String> =
                        self.advertised_capabilities().into_iter().collect();
                    error = error.with_detail("server_capabilities", json!(advertised));
                }
                Response::error(&request.id, error)
            }
        }
    }

    fn require_established(
        &self,
        session: &Session,
        operation: &'static str,
    ) -> Result<(), ServerError> {
        if !session.is_established() {
            return Err(ServerError::InvalidState {
                state: session.state().name(),
                operation,
            });
        }
        Ok(())
    }

    fn handle_hello(&self, session: &mut Session, params: &Value) -> Result<Value, ServerError> {
        if session.state() != SessionState::CapabilityExchange {
            return Err(ServerError::InvalidState {
                state: session.state().name(),
                operation: "HELLO",
            });
        }

        let hello: HelloParams = serde_json::from_value(params.clone())
            .map_err(|e| ServerError::InvalidRequest(e.to_string()))?;

        if hello.protocol_version != PROTOCOL_VERSION {
            return Err(ServerError::InvalidRequest(format!(
                "unsupported protocol version: {}",
                hello.protocol_version
            )));
        }

        let advertised = self.advertised_capabilities();
        let agreed = match negotiate_capabilities(&advertised, &hello.capabilities) {
            Ok(agreed) => agreed,
            Err(e) => {
                // Negotiation failure closes the session before it can
                // reach Established.
                session.transition(SessionState::Closing)?;
                return Err(e);
            }
        };

        session.complete_negotiation(hello.protocol_version, hello.client_name, agreed.clone())?;

        let result = HelloResult {
            protocol_version: PROTOCOL_VERSION,
            session_id: session.id,
            server_name: self.info.name.clone(),
            server_version: self.info.version.clone(),
            capabilities: agreed.into_iter().collect(),
            server_capabilities: advertised.into_iter().collect(),
        };
        Ok(serde_json::to_value(result)?)
    }

    fn handle_auth(&self, session: &mut Session, params: &Value) -> Result<Value, ServerError> {
        if session.state() != SessionState::Authenticating {
            return Err(ServerError::InvalidState {
                state: session.state().name(),
                operation: "AUTH",
            });
        }

        let auth: AuthParams = serde_json::from_value(params.clone())
            .map_err(|e| ServerError::InvalidRequest(e.to_string()))?;

        if !self.auth.verify(&auth.username, &auth.password) {
            // One attempt only; the connection closes after the error
            // response is written.
            session.transition(SessionState::Closing)?;
            return Err(ServerError::AuthFailed("invalid credentials".to_string()));
        }

        session.transition(SessionState::Established)?;
        tracing::info!(
            "session {} established for '{}' from {}",
            session.id,
            auth.username,
            session.remote_addr
        );
        Ok(json!({"authenticated": true}))
    }

    fn handle_close(&self, session: &mut Session) -> Result<Value, ServerError> {
        if let Some(txn) = session.take_pending() {
            txn.cancel();
        }
        session.transition(SessionState::Closing)?;
        Ok(json!({"goodbye": true}))
    }

    fn handle_get(
        &self,
        session: &Session,
        params: &Value,
        store: LogicalStore,
    ) -> Result<Value, ServerError> {
        self.require_established(session, "GET")?;

        let get: GetParams = serde_json::from_value(params.clone())
            .map_err(|e| ServerError::InvalidRequest(e.to_string()))?;
        let path = parse_path(get.path.as_deref().unwrap_or("/"))?;

        let read = self.broker.new_read_transaction();
        match read.read(store, &path) {
            Some(data) => Ok(json!({
                "path": path.to_string(),
                "store": store.name(),
                "data": data,
            })),
            None => Err(ServerError::NotFound(path.to_string())),
        }
    }

    fn handle_edit_config(
        &self,
        session: &mut Session,
        params: &Value,
    ) -> Result<Value, ServerError> {
        self.require_established(session, "EDIT_CONFIG")?;

        let edit: EditParams = serde_json::from_value(params.clone())
            .map_err(|e| ServerError::InvalidRequest(e.to_string()))?;
        if edit.edits.is_empty() {
            return Err(ServerError::InvalidRequest("no edits given".to_string()));
        }

        // Parse every path before touching the candidate so a malformed
        // edit rejects the whole request.
        let mut parsed = Vec::with_capacity(edit.edits.len());
        for op in edit.edits {
            let path = match &op {
                EditOperation::Put { path, .. }
                | EditOperation::Merge { path, .. }
                | EditOperation::Delete { path } => parse_path(path)?,
            };
            parsed.push((path, op));
        }

        let broker = &self.broker;
        let txn = session.pending_or_stage(|| broker.new_read_write_transaction());

        let mut applied = 0;
        for (path, op) in parsed {
            match op {
                EditOperation::Put { value, .. } => {
                    txn.put(LogicalStore::Configuration, &path, &value);
                }
                EditOperation::Merge { value, .. } => {
                    txn.merge(LogicalStore::Configuration, &path, &value);
                }
                EditOperation::Delete { .. } => {
                    txn.delete(LogicalStore::Configuration, &path);
                }
            }
            applied += 1;
        }

        Ok(json!({"staged": applied}))
    }

    async fn handle_commit(&self, session: &mut Session, request: &Request) -> Response {
        if let Err(e) = self.require_established(session, "COMMIT") {
            return Response::error(&request.id, ResponseError::new(e.error_code(), e.to_string()));
        }

        let Some(txn) = session.take_pending() else {
            let e = ServerError::InvalidRequest("nothing staged to commit".to_string());
            return Response::error(&request.id, ResponseError::new(e.error_code(), e.to_string()));
        };

        let outcome = match self.submit_and_wait(txn).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!("session {}: commit failed: {}", session.id, e);
                return Response::error(
                    &request.id,
                    ResponseError::new(e.error_code(), e.to_string()),
                );
            }
        };

        let mut meta = ResponseMeta {
            session_id: Some(session.id),
            server_time: Some(chrono::Utc::now()),
            ..Default::default()
        };
        for (store, version) in &outcome.versions {
            meta.versions.insert(store.name().to_string(), *version);
        }
        Response::ok(&request.id, json!({"committed": true})).with_meta(meta)
    }

    async fn submit_and_wait(
        &self,
        txn: confplane_broker::ReadWriteTransaction,
    ) -> Result<confplane_broker::CommitOutcome, ServerError> {
        let future = self.broker.submit(txn)?;
        Ok(future.await?)
    }

    fn handle_cancel(&self, session: &mut Session) -> Result<Value, ServerError> {
        self.require_established(session, "CANCEL")?;
        match session.take_pending() {
            Some(txn) => {
                txn.cancel();
                Ok(json!({"cancelled": true}))
            }
            None => Ok(json!({"cancelled": false})),
        }
    }

    async fn handle_rpc(&self, session: &Session, params: &Value) -> Result<Value, ServerError> {
        self.require_established(session, "RPC")?;

        let rpc: RpcParams = serde_json::from_value(params.clone())
            .map_err(|e| ServerError::InvalidRequest(e.to_string()))?;
        let operation = OperationId::new(rpc.module, rpc.name);
        let output = self.router.invoke(&operation, rpc.input).await?;
        Ok(json!({"output": output}))
    }
}

fn parse_path(raw: &str) -> Result<DataPath, ServerError> {
    DataPath::parse(raw).map_err(|e| ServerError::InvalidRequest(e.to_string()))
}
