use std::io::{Cursor, Read};
use std::net::{SocketAddr, TcpListener};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Request, Response, Server, StatusCode};
use tracing::{debug, warn};

use crate::error::DashboardError;
use crate::routes::{ApiResponse, ControlPlane};

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const MAX_BODY_BYTES: usize = 64 * 1024;

const RESPONSE_HEADERS: &[(&str, &str)] = &[
    ("Content-Type", "application/json"),
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type"),
];

/// Background HTTP listener serving a [`ControlPlane`].
pub struct DashboardServer {
    address: SocketAddr,
    shutdown: mpsc::Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl DashboardServer {
    pub fn start(bind: SocketAddr, plane: Arc<ControlPlane>) -> Result<Self, DashboardError> {
        let listener = TcpListener::bind(bind).map_err(|source| DashboardError::Bind {
            addr: bind.to_string(),
            source,
        })?;
        let address = listener.local_addr().map_err(|source| DashboardError::Bind {
            addr: bind.to_string(),
            source,
        })?;
        let server = Server::from_listener(listener, None)
            .map_err(|error| DashboardError::Server(error.to_string()))?;

        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        let thread = thread::spawn(move || loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            match server.recv_timeout(POLL_INTERVAL) {
                Ok(Some(request)) => handle_request(request, &plane),
                Ok(None) => continue,
                Err(error) => {
                    warn!(%error, "http listener stopped");
                    break;
                }
            }
        });

        Ok(Self {
            address,
            shutdown: shutdown_tx,
            thread: Some(thread),
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Blocks until the accept loop exits.
    pub fn wait(mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn handle_request(mut request: Request, plane: &ControlPlane) {
    let method = request.method().to_string().to_ascii_uppercase();
    let url = request.url().to_string();

    let declared_too_large = request
        .body_length()
        .is_some_and(|length| length > MAX_BODY_BYTES);
    let body = if declared_too_large {
        Err(body_too_large())
    } else {
        read_body(request.as_reader(), MAX_BODY_BYTES)
    };
    let response = match body {
        Ok(body) => plane.handle(&method, &url, &body),
        Err(response) => response,
    };

    debug!(%method, %url, status = response.status, "request handled");
    if let Err(error) = request.respond(into_http(response)) {
        debug!(%error, "client went away before the response was sent");
    }
}

/// Reads at most `limit` bytes; anything longer is rejected with 413.
fn read_body(reader: impl Read, limit: usize) -> Result<String, ApiResponse> {
    let mut body = String::new();
    reader
        .take(limit as u64 + 1)
        .read_to_string(&mut body)
        .map_err(|error| error_response(400, format!("unreadable body: {error}")))?;
    if body.len() > limit {
        return Err(body_too_large());
    }
    Ok(body)
}

fn body_too_large() -> ApiResponse {
    error_response(413, format!("request body exceeds {MAX_BODY_BYTES} bytes"))
}

fn error_response(status: u16, message: String) -> ApiResponse {
    ApiResponse {
        status,
        body: serde_json::json!({ "success": false, "error": message }),
    }
}

fn into_http(response: ApiResponse) -> Response<Cursor<Vec<u8>>> {
    let payload = if response.status == 204 {
        String::new()
    } else {
        response.body.to_string()
    };

    let mut http = Response::from_string(payload).with_status_code(StatusCode(response.status));
    for (name, value) in RESPONSE_HEADERS {
        if let Ok(header) = Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            http.add_header(header);
        }
    }
    http
}
