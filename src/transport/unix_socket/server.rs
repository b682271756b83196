//! Unix socket server implementation

use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs,
    net::{UnixListener, UnixStream},
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    backend::{LocalScanner, RadioBackend},
    core::{error::TransportResult, events::CoordinatorEvent},
    protocol::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId},
    transport::unix_socket::{
        handler::RequestHandler,
        session::{SessionReader, UnixSocketSession},
    },
};

/// Unix socket server
pub struct UnixSocketServer<B: RadioBackend, S: LocalScanner> {
    socket_path: PathBuf,
    socket_mode: u32,
    handler: Arc<RequestHandler<B, S>>,
}

impl<B: RadioBackend, S: LocalScanner> UnixSocketServer<B, S> {
    pub fn new(
        socket_path: impl Into<PathBuf>,
        socket_mode: u32,
        handler: Arc<RequestHandler<B, S>>,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            socket_mode,
            handler,
        }
    }

    /// Obtain the listening socket
    ///
    /// A socket passed in by the service manager is used as is. Otherwise a
    /// stale socket file is removed and a new one bound with the configured
    /// permissions.
    pub async fn bind(&self) -> TransportResult<UnixListener> {
        let mut listenfd = listenfd::ListenFd::from_env();
        if let Some(listener) = listenfd.take_unix_listener(0)? {
            listener.set_nonblocking(true)?;
            info!("Using socket passed by the service manager");
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
            "Unix socket server listening on {} (mode {:o})",
            self.socket_path.display(),
            self.socket_mode
        );
        Ok(listener)
    }

    /// Accept clients on `listener`
    pub async fn serve(&self, listener: UnixListener) -> TransportResult<()> {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_client(stream, handler).await {
                            error!("Error handling client: {}", e);
                        }
                    });
                }
                Err(e) => {
                    warn!("Error accepting connection: {}", e);
                }
            }
        }
    }

    async fn handle_client(
        stream: UnixStream,
        handler: Arc<RequestHandler<B, S>>,
    ) -> TransportResult<()> {
        let (read_half, write_half) = stream.into_split();
        let session = UnixSocketSession::new(write_half);
        let reader = SessionReader::new(read_half);

        info!("New client connected: {}", session.id());

        let forwarder = Self::forward_notifications(session.clone(), handler.subscribe());
        let result = Self::serve_requests(&session, reader, &handler).await;
        forwarder.abort();

        info!("Client disconnected: {}", session.id());
        result
    }

    async fn serve_requests(
        session: &UnixSocketSession,
        mut reader: SessionReader,
        handler: &RequestHandler<B, S>,
    ) -> TransportResult<()> {
        while let Some(line) = reader.read_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
                Ok(request) => handler.handle_request(request).await,
                Err(e) => {
                    warn!("Invalid JSON-RPC request from {}: {}", session.id(), e);
                    JsonRpcResponse::error(JsonRpcError::parse_error(), RequestId::Null)
                }
            };

            if let Err(e) = session.send_response(&response).await {
                error!("Error sending response: {}", e);
                break;
            }
        }

        Ok(())
    }

    /// Push every coordinator update to the client as a notification
    fn forward_notifications(
        session: UnixSocketSession,
        mut events: broadcast::Receiver<CoordinatorEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let notification = JsonRpcNotification::new(event.into());
                        if let Err(e) = session.send_notification(&notification).await {
                            debug!("Dropping notifications for {}: {}", session.id(), e);
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Client {} missed {} notifications", session.id(), skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
