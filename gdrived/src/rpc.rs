//! JSON-RPC 2.0 over HTTP POST, the console's only way into the engine.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::Json;
use axum::routing::post;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::sync::engine::{EngineError, SyncEngine};
use crate::sync::job::{Direction, JobKey};
use crate::sync::queue::QueueKind;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("parse error: {0}")]
    Parse(serde_json::Error),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("internal error: {0}")]
    Internal(#[from] serde_json::Error),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl RpcError {
    pub fn code(&self) -> i64 {
        match self {
            RpcError::Parse(_) => -32700,
            RpcError::InvalidRequest(_) => -32600,
            RpcError::MethodNotFound(_) => -32601,
            RpcError::InvalidParams(_) => -32602,
            RpcError::Internal(_) => -32603,
            RpcError::Engine(_) => -32000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Request {
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
struct ErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorObject>,
    id: Value,
}

impl Response {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    fn failure(id: Value, err: &RpcError) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(ErrorObject {
                code: err.code(),
                message: err.to_string(),
            }),
            id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadParams {
    path: String,
}

#[derive(Debug, Deserialize)]
struct DownloadParams {
    id: String,
    #[serde(default)]
    save_folder_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkParams {
    #[serde(alias = "direction")]
    is_download: Direction,
    path: String,
    id: String,
}

impl WorkParams {
    fn key(self) -> JobKey {
        JobKey::new(self.is_download, self.path, self.id)
    }
}

#[derive(Debug, Deserialize)]
struct ChildParams {
    child_folder_id: String,
}

pub fn router(engine: Arc<SyncEngine>) -> Router {
    Router::new()
        .route("/", post(handle))
        .route("/jsonrpc", post(handle))
        .with_state(engine)
}

async fn handle(State(engine): State<Arc<SyncEngine>>, body: Bytes) -> Json<Value> {
    Json(handle_body(&engine, &body).await)
}

/// Answers one request object or a batch of them.
pub async fn handle_body(engine: &SyncEngine, body: &[u8]) -> Value {
    let request: Value = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(err) => return to_json(Response::failure(Value::Null, &RpcError::Parse(err))),
    };
    match request {
        Value::Array(batch) if !batch.is_empty() => {
            let mut responses = Vec::with_capacity(batch.len());
            for item in batch {
                responses.push(handle_one(engine, item).await);
            }
            Value::Array(responses)
        }
        request => handle_one(engine, request).await,
    }
}

async fn handle_one(engine: &SyncEngine, request: Value) -> Value {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let response = match parse_request(request) {
        Ok(request) => {
            debug!(method = %request.method, "rpc call");
            match dispatch(engine, &request.method, request.params).await {
                Ok(result) => Response::success(id, result),
                Err(err) => {
                    warn!(method = %request.method, error = %err, "rpc call failed");
                    Response::failure(id, &err)
                }
            }
        }
        Err(err) => Response::failure(id, &err),
    };
    to_json(response)
}

fn parse_request(request: Value) -> Result<Request, RpcError> {
    let request: Request = serde_json::from_value(request)
        .map_err(|err| RpcError::InvalidRequest(err.to_string()))?;
    if request.jsonrpc != "2.0" {
        return Err(RpcError::InvalidRequest(format!(
            "unsupported jsonrpc version {}",
            request.jsonrpc
        )));
    }
    Ok(request)
}

pub async fn dispatch(engine: &SyncEngine, method: &str, params: Value) -> Result<Value, RpcError> {
    match method {
        "upload" => {
            let params: UploadParams = parse_params(params, &["path"])?;
            let accepted = match engine.upload(&params.path).await {
                Ok(accepted) => accepted,
                Err(EngineError::MissingLocalPath(_)) => false,
                Err(err) => return Err(err.into()),
            };
            Ok(Value::Bool(accepted))
        }
        "download" => {
            let params: DownloadParams = parse_params(params, &["id", "save_folder_path"])?;
            Ok(Value::Bool(
                engine.download(&params.id, params.save_folder_path.as_deref()),
            ))
        }
        "delete_wait_work" => {
            let params: WorkParams = parse_params(params, &["is_download", "path", "id"])?;
            Ok(Value::Bool(engine.delete_wait_work(&params.key())))
        }
        "delete_done_work" => {
            let params: WorkParams = parse_params(params, &["is_download", "path", "id"])?;
            Ok(Value::Bool(engine.delete_done_work(&params.key())))
        }
        "get_now_file_list" => Ok(serde_json::to_value(engine.current_listing().await?)?),
        "goto_parent_folder" => Ok(serde_json::to_value(engine.goto_parent().await?)?),
        "goto_child_folder" => {
            let params: ChildParams = parse_params(params, &["child_folder_id"])?;
            Ok(serde_json::to_value(
                engine.goto_child(&params.child_folder_id).await?,
            )?)
        }
        "get_json_wait_works" => jobs_json(engine, QueueKind::Waiting),
        "get_json_doing_works" => jobs_json(engine, QueueKind::Active),
        "get_json_done_works" => jobs_json(engine, QueueKind::Done),
        other => Err(RpcError::MethodNotFound(other.to_string())),
    }
}

// The console expects these as a string holding the JSON array.
fn jobs_json(engine: &SyncEngine, kind: QueueKind) -> Result<Value, RpcError> {
    Ok(Value::String(serde_json::to_string(&engine.snapshot(kind))?))
}

/// Accepts params by position (in `names` order) or by name.
fn parse_params<T: DeserializeOwned>(params: Value, names: &[&str]) -> Result<T, RpcError> {
    let object = match params {
        Value::Null => Value::Object(Map::new()),
        Value::Array(values) => {
            if values.len() > names.len() {
                return Err(RpcError::InvalidParams(format!(
                    "expected at most {} positional params, got {}",
                    names.len(),
                    values.len()
                )));
            }
            Value::Object(
                names
                    .iter()
                    .map(|name| name.to_string())
                    .zip(values)
                    .collect(),
            )
        }
        object @ Value::Object(_) => object,
        other => {
            return Err(RpcError::InvalidParams(format!(
                "params must be an array or an object, got {other}"
            )));
        }
    };
    serde_json::from_value(object).map_err(|err| RpcError::InvalidParams(err.to_string()))
}

fn to_json(response: Response) -> Value {
    serde_json::to_value(response).unwrap_or_else(|err| {
        serde_json::json!({
            "jsonrpc": "2.0",
            "error": { "code": -32603, "message": err.to_string() },
            "id": Value::Null,
        })
    })
}
