//! HTTP server implementation
//!
//! hyper http1 with TokioIo, one task per connection.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Args;
use crate::exchange::wire::{ConsumeRequest, ConsumeResponse, ErrorBody, PublishRequest};
use crate::exchange::{spawn_cleanup_task, BlobStore, ExchangeStoreConfig, MemoryBlobStore};
use crate::types::{RelayError, Result};

/// Slack for base64 expansion and the JSON envelope around a payload
const BODY_OVERHEAD_BYTES: usize = 4096;

/// Shared application state
pub struct AppState {
    pub node_id: Uuid,
    pub store: Arc<MemoryBlobStore>,
}

impl AppState {
    pub fn new(node_id: Uuid, config: ExchangeStoreConfig) -> Self {
        Self {
            node_id,
            store: Arc::new(MemoryBlobStore::new(config)),
        }
    }

    pub fn from_args(args: &Args) -> Self {
        Self::new(args.node_id, args.store_config())
    }

    fn max_body_bytes(&self) -> usize {
        self.store.config().max_payload_bytes.div_ceil(3) * 4 + BODY_OVERHEAD_BYTES
    }
}

/// Bind, start background tasks and serve until the process exits.
pub async fn run(args: Args) -> Result<()> {
    let listener = TcpListener::bind(args.listen).await?;
    let state = Arc::new(AppState::from_args(&args));

    spawn_cleanup_task(Arc::clone(&state.store), args.cleanup_interval());

    info!("Passage listening on {} as node {}", args.listen, args.node_id);
    serve(listener, state).await
}

/// Accept loop over an already bound listener.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") | (Method::GET, "/healthz") => health_response(&state),

        (Method::POST, "/exchange") => match read_json::<PublishRequest>(&state, req).await {
            Ok(body) => match handle_publish(&state, body).await {
                Ok(()) => json_response(StatusCode::CREATED, &serde_json::json!({})),
                Err(e) => error_response(e),
            },
            Err(e) => error_response(e),
        },

        (Method::POST, "/exchange/consume") => {
            match read_json::<ConsumeRequest>(&state, req).await {
                Ok(body) => match state.store.consume(&body.code, &body.nonce).await {
                    Ok(Some(payload)) => {
                        json_response(StatusCode::OK, &ConsumeResponse::new(&payload))
                    }
                    Ok(None) => error_response(RelayError::ExchangeNotFound),
                    Err(e) => error_response(e),
                },
                Err(e) => error_response(e),
            }
        }

        (_, "/exchange") | (_, "/exchange/consume") => json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            &ErrorBody {
                error: "Method Not Allowed".to_string(),
            },
        ),

        _ => not_found_response(&path),
    };

    Ok(response)
}

async fn handle_publish(state: &AppState, body: PublishRequest) -> Result<()> {
    let record = body.into_record()?;
    state.store.publish(record).await
}

async fn read_json<T: serde::de::DeserializeOwned>(
    state: &AppState,
    req: Request<Incoming>,
) -> Result<T> {
    let declared = req
        .headers()
        .get(hyper::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > state.max_body_bytes()) {
        return Err(RelayError::PayloadTooLarge("request body too large".to_string()));
    }

    // Chunked bodies carry no length, so the cap is enforced while reading
    let body = Limited::new(req.into_body(), state.max_body_bytes())
        .collect()
        .await
        .map_err(|e| {
            if e.is::<LengthLimitError>() {
                RelayError::PayloadTooLarge("request body too large".to_string())
            } else {
                RelayError::Parameter(format!("failed to read body: {e}"))
            }
        })?
        .to_bytes();

    serde_json::from_slice(&body)
        .map_err(|e| RelayError::Parameter(format!("invalid request body: {e}")))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthBody {
    status: &'static str,
    node_id: Uuid,
    store: crate::exchange::StoreStatsSnapshot,
}

fn health_response(state: &AppState) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &HealthBody {
            status: "ok",
            node_id: state.node_id,
            store: state.store.stats(),
        },
    )
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let (status, bytes) = match serde_json::to_vec(body) {
        Ok(bytes) => (status, bytes),
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                br#"{"error":"internal"}"#.to_vec(),
            )
        }
    };

    let mut response = Response::new(Full::new(Bytes::from(bytes)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn error_response(err: RelayError) -> Response<Full<Bytes>> {
    let (status, message) = err.into_status_code_and_body();
    if status.is_server_error() {
        warn!("Exchange request failed: {}", message);
        return json_response(
            status,
            &ErrorBody {
                error: "internal".to_string(),
            },
        );
    }
    json_response(status, &ErrorBody { error: message })
}

fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({
            "error": "Not Found",
            "path": path,
        }),
    )
}
