//! Unix socket server implementation

use std::{os::unix::fs::PermissionsExt, path::Path, sync::Arc};

use listenfd::ListenFd;
use tokio::{
    fs,
    net::{UnixListener, UnixStream},
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    core::{dispatcher::DeviceHandle, error::TransportResult, notification::Notification},
    protocol::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId},
    transport::unix_socket::{
        handler::RequestHandler,
        session::{SessionReader, UnixSocketSession},
    },
};

/// Unix socket server exposing the policy API
pub struct UnixSocketServer {
    socket_path: String,
    socket_mode: u32,
    device: DeviceHandle,
    handler: Arc<RequestHandler>,
}

impl UnixSocketServer {
    pub fn new(socket_path: String, socket_mode: u32, device: DeviceHandle) -> Self {
        let handler = Arc::new(RequestHandler::new(device.clone()));
        Self {
            socket_path,
            socket_mode,
            device,
            handler,
        }
    }

    /// Take a socket-activated listener or bind `socket_path`
    pub async fn bind(&self) -> TransportResult<UnixListener> {
        let mut listenfd = ListenFd::from_env();
        if let Some(listener) = listenfd.take_unix_listener(0)? {
            info!("using socket-activated listener");
            listener.set_nonblocking(true)?;
            return Ok(UnixListener::from_std(listener)?);
        }

        if Path::new(&self.socket_path).exists() {
            fs::remove_file(&self.socket_path).await?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        fs::set_permissions(
            &self.socket_path,
            std::fs::Permissions::from_mode(self.socket_mode),
        )
        .await?;
        info!(
            path = %self.socket_path,
            mode = %format!("{:o}", self.socket_mode),
            "unix socket server listening"
        );
        Ok(listener)
    }

    /// Bind and serve until the listener fails
    pub async fn start(&self) -> TransportResult<()> {
        let listener = self.bind().await?;
        self.serve(listener).await;
        Ok(())
    }

    /// Accept clients on `listener`
    pub async fn serve(&self, listener: UnixListener) {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let handler = self.handler.clone();
                    // subscribe before spawning so no notification is missed
                    let notifications = self.device.subscribe();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, handler, notifications).await {
                            error!("error handling client: {}", e);
                        }
                    });
                }
                Err(e) => {
                    warn!("error accepting connection: {}", e);
                }
            }
        }
    }
}

async fn handle_client(
    stream: UnixStream,
    handler: Arc<RequestHandler>,
    notifications: broadcast::Receiver<Notification>,
) -> TransportResult<()> {
    let (read_half, write_half) = stream.into_split();
    let session = UnixSocketSession::new(write_half);
    let mut reader = SessionReader::new(read_half);

    info!(session = %session.id(), "client connected");
    let forwarder = forward_notifications(session.clone(), notifications);

    let result = serve_requests(&session, &mut reader, &handler).await;

    forwarder.abort();
    info!(session = %session.id(), "client disconnected");
    result
}

async fn serve_requests(
    session: &UnixSocketSession,
    reader: &mut SessionReader,
    handler: &RequestHandler,
) -> TransportResult<()> {
    while let Some(line) = reader.read_line().await? {
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
            Ok(request) => handler.handle_request(request).await,
            Err(e) => {
                warn!(session = %session.id(), "invalid JSON-RPC request: {}", e);
                invalid_request_response(&line, e)
            }
        };
        session.send_response(&response).await?;
    }
    Ok(())
}

/// Parse errors get a null id; well-formed JSON that is not a known request
/// keeps the caller's id when one can be recovered
fn invalid_request_response(line: &str, error: serde_json::Error) -> JsonRpcResponse {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
        return JsonRpcResponse::error(JsonRpcError::parse_error(), RequestId::Null);
    };

    let id = value
        .get("id")
        .and_then(|id| serde_json::from_value(id.clone()).ok())
        .unwrap_or(RequestId::Null);
    let known_method = value
        .get("method")
        .and_then(|method| method.as_str())
        .is_some_and(is_known_method);

    let error = if known_method {
        JsonRpcError::invalid_params(error.to_string())
    } else if value.get("method").is_some() {
        JsonRpcError::method_not_found()
    } else {
        JsonRpcError::invalid_request(error.to_string())
    };
    JsonRpcResponse::error(error, id)
}

fn is_known_method(method: &str) -> bool {
    matches!(
        method,
        "scan"
            | "list_services"
            | "get_service"
            | "configure_service"
            | "connect"
            | "disconnect"
            | "disable_service"
            | "clear_credentials"
            | "get_status"
            | "report_connectivity"
            | "update_config"
            | "after_resume"
    )
}

fn forward_notifications(
    session: UnixSocketSession,
    mut notifications: broadcast::Receiver<Notification>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(notification) => {
                    let message = JsonRpcNotification::new(notification);
                    if let Err(e) = session.send_notification(&message).await {
                        debug!(session = %session.id(), "stop forwarding notifications: {}", e);
                        return;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(session = %session.id(), skipped, "client lagging, notifications dropped");
                }
                Err(RecvError::Closed) => return,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        backend::{MockStationBackend, StationEvent},
        config::StationConfig,
        core::{
            dispatcher,
            endpoint::tests::bss_properties,
            types::{EndpointHandle, Security},
        },
        protocol::Request,
    };
    use tempfile::tempdir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    async fn running_server(dir: &Path) -> (MockStationBackend, DeviceHandle, String) {
        let socket_path = dir.join("test.sock").to_str().unwrap().to_string();
        let backend = MockStationBackend::new();
        let device = dispatcher::start(Arc::new(backend.clone()), StationConfig::default(), &[])
            .await
            .unwrap();

        let server = UnixSocketServer::new(socket_path.clone(), 0o600, device.clone());
        let listener = server.bind().await.unwrap();
        tokio::spawn(async move { server.serve(listener).await });

        (backend, device, socket_path)
    }

    async fn next_line(lines: &mut tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>) -> String {
        tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_socket_permissions() {
        let dir = tempdir().unwrap();
        let (_backend, device, socket_path) = running_server(dir.path()).await;

        let mode = std::fs::metadata(&socket_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        device.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_client_request_response() {
        let dir = tempdir().unwrap();
        let (_backend, device, socket_path) = running_server(dir.path()).await;

        let client = UnixStream::connect(&socket_path).await.unwrap();
        let (read_half, mut write_half) = client.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let request = JsonRpcRequest::new(Request::GetStatus, RequestId::Number(7));
        let mut json = serde_json::to_string(&request).unwrap();
        json.push('\n');
        write_half.write_all(json.as_bytes()).await.unwrap();

        let response = next_line(&mut lines).await;
        assert!(response.contains(r#""jsonrpc":"2.0""#));
        assert!(response.contains(r#""id":7"#));
        assert!(response.contains(r#""scan_pending":true"#));

        device.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_requests() {
        let dir = tempdir().unwrap();
        let (_backend, device, socket_path) = running_server(dir.path()).await;

        let client = UnixStream::connect(&socket_path).await.unwrap();
        let (read_half, mut write_half) = client.into_split();
        let mut lines = BufReader::new(read_half).lines();

        write_half.write_all(b"{not json\n").await.unwrap();
        let response: JsonRpcResponse = serde_json::from_str(&next_line(&mut lines).await).unwrap();
        assert_eq!(response.error.unwrap().code, JsonRpcError::PARSE_ERROR);
        assert_eq!(response.id, RequestId::Null);

        write_half
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"reboot\",\"id\":2}\n")
            .await
            .unwrap();
        let response: JsonRpcResponse = serde_json::from_str(&next_line(&mut lines).await).unwrap();
        assert_eq!(response.error.unwrap().code, JsonRpcError::METHOD_NOT_FOUND);
        assert_eq!(response.id, RequestId::Number(2));

        write_half
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"connect\",\"params\":{},\"id\":3}\n")
            .await
            .unwrap();
        let response: JsonRpcResponse = serde_json::from_str(&next_line(&mut lines).await).unwrap();
        assert_eq!(response.error.unwrap().code, JsonRpcError::INVALID_PARAMS);
        assert_eq!(response.id, RequestId::Number(3));

        device.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_notifications_are_forwarded() {
        let dir = tempdir().unwrap();
        let (backend, device, socket_path) = running_server(dir.path()).await;

        let client = UnixStream::connect(&socket_path).await.unwrap();
        let (read_half, mut write_half) = client.into_split();
        let mut lines = BufReader::new(read_half).lines();

        // a round trip guarantees the session is subscribed
        let request = JsonRpcRequest::new(Request::ListServices, RequestId::Number(1));
        let mut json = serde_json::to_string(&request).unwrap();
        json.push('\n');
        write_half.write_all(json.as_bytes()).await.unwrap();
        next_line(&mut lines).await;

        backend
            .emit(StationEvent::BssAdded {
                handle: EndpointHandle("/fi/w1/wpa_supplicant1/Interfaces/0/BSSs/1".into()),
                properties: bss_properties(
                    "cafe",
                    [2, 0, 0, 0, 0, 9],
                    -60,
                    "infrastructure",
                    Security::Open,
                ),
            })
            .await;

        let notification = next_line(&mut lines).await;
        assert!(notification.contains(r#""method":"service_registered""#));
        assert!(notification.contains(r#""ssid":"cafe""#));

        device.shutdown().await.unwrap();
    }
}
