//! JSON-RPC methods for EPOCH
//!
//! Exposes the engine as named methods over JSON-RPC 2.0, served by `axum`
//! with HTTP POST on `/json_rpc`. Host applications that already run a
//! JSON-RPC server can route these method names to [`call`] directly.

use crate::engine::Engine;
use crate::types::PrecomputedHash;
use crate::{Error, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

pub const ATTEMPT_EPOCH: &str = "AttemptEPOCH";
pub const SUBMIT_EPOCH: &str = "SubmitEPOCH";
pub const GET_MAX_HASHES_EPOCH: &str = "GetMaxHashesEPOCH";
pub const GET_ADDRESS_EPOCH: &str = "GetAddressEPOCH";
pub const GET_SESSION_EPOCH: &str = "GetSessionEPOCH";

/// How long `GetSessionEPOCH` waits for in-flight batches
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(15);

/// JSON-RPC error codes
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const ENGINE_ERROR: i64 = -32000;

/// Names of every EPOCH method
pub fn method_names() -> [&'static str; 5] {
    [
        ATTEMPT_EPOCH,
        SUBMIT_EPOCH,
        GET_MAX_HASHES_EPOCH,
        GET_ADDRESS_EPOCH,
        GET_SESSION_EPOCH,
    ]
}

/// `AttemptEPOCH` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptParams {
    pub hashes: usize,
}

/// `GetMaxHashesEPOCH` result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxHashesResult {
    #[serde(rename = "maxHashes")]
    pub max_hashes: usize,
}

/// `GetAddressEPOCH` result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressResult {
    #[serde(rename = "epochAddress")]
    pub address: String,
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("method {:?} not found", method))
    }

    fn invalid_params(e: serde_json::Error) -> Self {
        Self::new(INVALID_PARAMS, format!("invalid parameters: {}", e))
    }
}

impl From<Error> for RpcError {
    fn from(e: Error) -> Self {
        Self::new(ENGINE_ERROR, e.to_string())
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Run one EPOCH method against `engine`
pub async fn call(
    engine: &Engine,
    method: &str,
    params: Value,
) -> std::result::Result<Value, RpcError> {
    match method {
        ATTEMPT_EPOCH => {
            let params: AttemptParams = decode(params)?;
            encode(&engine.attempt_hashes(params.hashes).await?)
        }
        SUBMIT_EPOCH => {
            let params: Vec<PrecomputedHash> = decode(params)?;
            encode(&engine.submit_hashes(params).await?)
        }
        GET_MAX_HASHES_EPOCH => {
            require_active(engine)?;
            encode(&MaxHashesResult {
                max_hashes: engine.max_hashes(),
            })
        }
        GET_ADDRESS_EPOCH => {
            require_active(engine)?;
            encode(&AddressResult {
                address: engine.address(),
            })
        }
        GET_SESSION_EPOCH => {
            require_active(engine)?;
            encode(&engine.get_session(SESSION_TIMEOUT).await?)
        }
        _ => Err(RpcError::method_not_found(method)),
    }
}

fn require_active(engine: &Engine) -> std::result::Result<(), RpcError> {
    if engine.is_active() {
        Ok(())
    } else {
        Err(Error::Inactive.into())
    }
}

fn decode<T: DeserializeOwned>(params: Value) -> std::result::Result<T, RpcError> {
    serde_json::from_value(params).map_err(RpcError::invalid_params)
}

fn encode<T: Serialize>(result: &T) -> std::result::Result<Value, RpcError> {
    serde_json::to_value(result).map_err(|e| Error::from(e).into())
}

/// JSON-RPC 2.0 request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// JSON-RPC 2.0 response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    fn new(id: Value, outcome: std::result::Result<Value, RpcError>) -> Self {
        let (result, error) = match outcome {
            Ok(result) => (Some(result), None),
            Err(error) => (None, Some(error)),
        };
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result,
            error,
        }
    }
}

/// HTTP routes for the EPOCH methods
pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/json_rpc", post(json_rpc_handler))
        .with_state(engine)
}

async fn json_rpc_handler(State(engine): State<Arc<Engine>>, body: Bytes) -> Json<RpcResponse> {
    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            let code = if serde_json::from_slice::<Value>(&body).is_ok() {
                INVALID_REQUEST
            } else {
                PARSE_ERROR
            };
            return Json(RpcResponse::new(
                Value::Null,
                Err(RpcError::new(code, e.to_string())),
            ));
        }
    };

    if request.jsonrpc != "2.0" {
        return Json(RpcResponse::new(
            request.id,
            Err(RpcError::new(INVALID_REQUEST, "jsonrpc must be \"2.0\"")),
        ));
    }

    debug!(method = %request.method, "JSON-RPC call");
    let outcome = call(&engine, &request.method, request.params).await;
    if let Err(e) = &outcome {
        debug!(method = %request.method, "JSON-RPC call failed: {}", e);
    }

    Json(RpcResponse::new(request.id, outcome))
}

/// Serve the EPOCH methods on `addr` until `shutdown` is cancelled
pub async fn serve(engine: Arc<Engine>, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let app = router(engine).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(addr).await?;
    info!("EPOCH JSON-RPC listening on {}/json_rpc", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("EPOCH JSON-RPC server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::transport::MemoryUpstream;
    use crate::types::{JobTemplate, MINIBLOCK_SIZE};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    const ADDRESS: &str = "dero1qy0khp9s9yw2h0eu20xmy9lth3zp5cacmx3rwt6k45l568d2mmcf6qgcsevzx";

    fn engine(upstream: &MemoryUpstream) -> Arc<Engine> {
        let engine = Engine::builder(EngineConfig::default())
            .connector(upstream.clone())
            .build()
            .unwrap();
        Arc::new(engine)
    }

    async fn active_engine(upstream: &MemoryUpstream) -> Arc<Engine> {
        let engine = engine(upstream);
        engine.start(ADDRESS, "127.0.0.1:10102").await.unwrap();
        upstream.push_job(JobTemplate {
            job_id: "job-1".to_string(),
            blockhashing_blob: format!("01{}", "00".repeat(MINIBLOCK_SIZE - 1)),
            difficulty: "1".to_string(),
            height: 7,
            ..Default::default()
        });
        engine.wait_for_job(Duration::from_secs(2)).await.unwrap();
        engine
    }

    async fn post_json(engine: Arc<Engine>, body: String) -> RpcResponse {
        let response = router(engine)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/json_rpc")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_method_names() {
        let names = method_names();
        assert_eq!(names.len(), 5);
        assert!(names.iter().all(|name| name.ends_with("EPOCH")));
        assert!(names.contains(&"AttemptEPOCH"));
    }

    #[tokio::test]
    async fn test_methods_fail_when_inactive() {
        let upstream = MemoryUpstream::new();
        let engine = engine(&upstream);

        for method in method_names() {
            let params = match method {
                ATTEMPT_EPOCH => json!({"hashes": 1}),
                SUBMIT_EPOCH => json!([]),
                _ => Value::Null,
            };
            let err = call(&engine, method, params).await.unwrap_err();
            assert_eq!(err.code, ENGINE_ERROR, "{}", method);
            assert_eq!(err.message, "epoch is not active");
        }
    }

    #[tokio::test]
    async fn test_unknown_method_and_bad_params() {
        let upstream = MemoryUpstream::new();
        let engine = active_engine(&upstream).await;

        let err = call(&engine, "MineEPOCH", Value::Null).await.unwrap_err();
        assert_eq!(err.code, METHOD_NOT_FOUND);

        let err = call(&engine, ATTEMPT_EPOCH, json!({"hashes": -1}))
            .await
            .unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);

        let err = call(&engine, SUBMIT_EPOCH, json!({"not": "a list"}))
            .await
            .unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_attempt_and_session_over_http() {
        let upstream = MemoryUpstream::new();
        let engine = active_engine(&upstream).await;

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "AttemptEPOCH",
            "params": {"hashes": 4}
        });
        let response = post_json(Arc::clone(&engine), body.to_string()).await;
        assert_eq!(response.id, json!(1));
        assert!(response.error.is_none());

        let result = response.result.unwrap();
        assert_eq!(result["epochHashes"], json!(4));
        assert_eq!(result["epochSubmitted"], json!(4));
        assert!(result.get("epochError").is_none());
        assert_eq!(upstream.submissions().len(), 4);

        let body = json!({"jsonrpc": "2.0", "id": "s", "method": "GetSessionEPOCH"});
        let response = post_json(Arc::clone(&engine), body.to_string()).await;
        let session = response.result.unwrap();
        assert_eq!(session["sessionHashes"], json!(4));
        assert_eq!(session["sessionMinis"], json!(4));
        assert_eq!(session["sessionVersion"], json!(crate::APP_VERSION));

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_submit_accepts_byte_array_encoding() {
        let upstream = MemoryUpstream::new();
        let engine = active_engine(&upstream).await;

        let mut work = vec![0u8; MINIBLOCK_SIZE];
        work[0] = 1;
        work[MINIBLOCK_SIZE - 1] = 1;
        let attempt = json!({
            "jobTemplate": {"jobid": "job-1", "height": 7, "difficulty": "1"},
            "powHash": vec![0u8; 32],
            "epochWork": work,
            "epochDifficulty": 1
        });
        let body = json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "SubmitEPOCH",
            "params": [attempt.clone(), attempt]
        });

        let response = post_json(Arc::clone(&engine), body.to_string()).await;
        assert!(response.error.is_none());
        let result = response.result.unwrap();
        assert_eq!(result["epochHashes"], json!(2));
        assert_eq!(result["epochSubmitted"], json!(2));

        let submissions = upstream.submissions();
        assert_eq!(submissions.len(), 2);
        assert_eq!(submissions[0].job_id, "job-1");
        assert_eq!(
            submissions[0].miniblock_blob,
            format!("01{}01", "00".repeat(MINIBLOCK_SIZE - 2))
        );

        let session = engine.get_session(SESSION_TIMEOUT).await.unwrap();
        assert_eq!(session.hashes, 0);
        assert_eq!(session.miniblocks, 2);

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_getters_over_http() {
        let upstream = MemoryUpstream::new();
        let engine = active_engine(&upstream).await;

        let body = json!({"jsonrpc": "2.0", "id": 2, "method": "GetMaxHashesEPOCH"});
        let response = post_json(Arc::clone(&engine), body.to_string()).await;
        assert_eq!(response.result.unwrap(), json!({"maxHashes": 1000}));

        let body = json!({"jsonrpc": "2.0", "id": 3, "method": "GetAddressEPOCH"});
        let response = post_json(Arc::clone(&engine), body.to_string()).await;
        assert_eq!(response.result.unwrap(), json!({"epochAddress": ADDRESS}));

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_requests() {
        let upstream = MemoryUpstream::new();
        let engine = engine(&upstream);

        let response = post_json(Arc::clone(&engine), "{not json".to_string()).await;
        assert_eq!(response.error.unwrap().code, PARSE_ERROR);

        let response = post_json(Arc::clone(&engine), json!({"id": 1}).to_string()).await;
        assert_eq!(response.error.unwrap().code, INVALID_REQUEST);

        let body = json!({"jsonrpc": "1.0", "id": 1, "method": "GetMaxHashesEPOCH"});
        let response = post_json(engine, body.to_string()).await;
        assert_eq!(response.id, json!(1));
        assert_eq!(response.error.unwrap().code, INVALID_REQUEST);
    }
}
