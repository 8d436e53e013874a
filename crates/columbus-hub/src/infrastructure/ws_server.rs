//! WebSocket server: accept loop, handshake and per-client tasks.
//!
//! This module is responsible for:
//!
//! 1. Binding the TCP listener.
//! 2. Running the first lifecycle tick and spawning the lifecycle loop.
//! 3. Accepting connections and upgrading them to WebSocket sessions.  The
//!    handshake checks the request path and negotiates the `columbus`
//!    subprotocol; it must complete within one heartbeat interval.
//! 4. Handing each session to [`WsConnection::serve`] on its own task.
//! 5. On shutdown: stop accepting, close every client with "going away",
//!    unload every module and give the sessions one heartbeat interval to
//!    wind down before aborting them.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tracing::{debug, error, info, warn};

use crate::application::{run_lifecycle, Hub};
use crate::domain::HubConfig;
use crate::infrastructure::connection::WsConnection;

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds the listening socket.
///
/// # Errors
///
/// Returns an error if the address is in use or not permitted.  This is the
/// only process-fatal failure of the server.
pub async fn bind(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {addr}"))
}

/// Serves clients on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn serve<F>(hub: Arc<Hub>, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let local = listener
        .local_addr()
        .context("listener has no local address")?;
    info!("hub listening on ws://{local}{}", hub.config().ws_path);

    // Modules that are already present are available to the first client.
    let first = hub.tick().await;
    debug!("initial lifecycle tick: {:?}", first.report);
    let lifecycle = tokio::spawn(run_lifecycle(Arc::clone(&hub)));

    let mut sessions = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown requested; no longer accepting clients");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    sessions.spawn(handle_client(stream, peer, Arc::clone(&hub)));
                }
                // Transient (e.g. out of file descriptors); keep serving.
                Err(e) => error!("accept error: {e}"),
            },
            Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(e) = finished {
                    error!("client task failed: {e}");
                }
            }
        }
    }

    lifecycle.abort();
    hub.shutdown().await;

    let grace = hub.config().heartbeat_interval;
    let drained = timeout(grace, async {
        while sessions.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("{} client task(s) still running after {grace:?}; aborting", sessions.len());
        sessions.shutdown().await;
    }
    info!("hub stopped");
    Ok(())
}

// ── Per-client handler ────────────────────────────────────────────────────────

async fn handle_client(stream: TcpStream, peer: SocketAddr, hub: Arc<Hub>) {
    let config = hub.config();
    let upgrade = tokio::select! {
        upgrade = timeout(
            config.heartbeat_interval,
            accept_hdr_async(stream, |request: &Request, response: Response| {
                handshake(request, response, config)
            }),
        ) => upgrade,
        () = hub.shutdown_started() => {
            debug!("handshake with {peer} abandoned: shutting down");
            return;
        }
    };

    let ws = match upgrade {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            warn!("handshake with {peer} failed: {e}");
            return;
        }
        Err(_) => {
            warn!("handshake with {peer} timed out after {:?}", config.heartbeat_interval);
            return;
        }
    };

    info!("client {peer} connected");
    WsConnection::serve(ws, Arc::clone(&hub)).await;
    info!("client {peer} disconnected");
}

// ── Handshake ─────────────────────────────────────────────────────────────────

/// Why an upgrade request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Rejection {
    status: StatusCode,
    reason: String,
}

impl Rejection {
    fn into_response(self) -> ErrorResponse {
        let mut response = ErrorResponse::new(Some(self.reason));
        *response.status_mut() = self.status;
        response
    }
}

fn handshake(
    request: &Request,
    mut response: Response,
    config: &HubConfig,
) -> Result<Response, ErrorResponse> {
    let offered = request
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok());

    match negotiate(request.uri().path(), offered, config) {
        Ok(Some(protocol)) => {
            let value = HeaderValue::from_str(&protocol).map_err(|_| {
                Rejection {
                    status: StatusCode::BAD_REQUEST,
                    reason: "invalid subprotocol".to_string(),
                }
                .into_response()
            })?;
            // Only echo the header when the client offered it; clients reject
            // an unsolicited subprotocol.
            response.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
            Ok(response)
        }
        Ok(None) => Ok(response),
        Err(rejection) => {
            debug!("upgrade refused: {} {}", rejection.status, rejection.reason);
            Err(rejection.into_response())
        }
    }
}

/// Decides whether to upgrade a request for `path` that offered the
/// comma-separated `offered` subprotocols.  Returns the subprotocol to select.
fn negotiate(path: &str, offered: Option<&str>, config: &HubConfig) -> Result<Option<String>, Rejection> {
    if path != config.ws_path {
        return Err(Rejection {
            status: StatusCode::NOT_FOUND,
            reason: format!("no WebSocket endpoint at {path}"),
        });
    }

    let selected = offered
        .into_iter()
        .flat_map(|list| list.split(','))
        .map(str::trim)
        .find(|candidate| *candidate == config.subprotocol);

    match selected {
        Some(protocol) => Ok(Some(protocol.to_string())),
        None if config.require_subprotocol => Err(Rejection {
            status: StatusCode::BAD_REQUEST,
            reason: format!("subprotocol \"{}\" required", config.subprotocol),
        }),
        None => Ok(None),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offered_subprotocol_is_selected() {
        let config = HubConfig::default();
        let selected = negotiate("/ws", Some("chat, columbus"), &config).unwrap();
        assert_eq!(selected.as_deref(), Some("columbus"));
    }

    #[test]
    fn test_missing_subprotocol_is_tolerated_by_default() {
        let config = HubConfig::default();
        assert_eq!(negotiate("/ws", None, &config), Ok(None));
        assert_eq!(negotiate("/ws", Some("chat"), &config), Ok(None));
    }

    #[test]
    fn test_missing_subprotocol_is_rejected_when_required() {
        // Arrange
        let config = HubConfig {
            require_subprotocol: true,
            ..HubConfig::default()
        };

        // Act
        let rejection = negotiate("/ws", Some("chat"), &config).unwrap_err();

        // Assert
        assert_eq!(rejection.status, StatusCode::BAD_REQUEST);
        assert!(rejection.reason.contains("columbus"));
    }

    #[test]
    fn test_unknown_path_is_not_found() {
        let config = HubConfig::default();
        let rejection = negotiate("/cam/stream", Some("columbus"), &config).unwrap_err();
        assert_eq!(rejection.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_handshake_echoes_selected_subprotocol() {
        // Arrange
        let request = Request::builder()
            .uri("/ws")
            .header(SEC_WEBSOCKET_PROTOCOL, "columbus")
            .body(())
            .unwrap();

        // Act
        let response = handshake(&request, Response::new(()), &HubConfig::default()).unwrap();

        // Assert
        assert_eq!(response.headers()[SEC_WEBSOCKET_PROTOCOL], "columbus");
    }

    #[test]
    fn test_handshake_without_offer_sets_no_header() {
        let request = Request::builder().uri("/ws").body(()).unwrap();
        let response = handshake(&request, Response::new(()), &HubConfig::default()).unwrap();
        assert!(response.headers().get(SEC_WEBSOCKET_PROTOCOL).is_none());
    }

    #[test]
    fn test_rejection_response_carries_status() {
        let request = Request::builder().uri("/nope").body(()).unwrap();
        let error = handshake(&request, Response::new(()), &HubConfig::default()).unwrap_err();
        assert_eq!(error.status(), StatusCode::NOT_FOUND);
    }
}
