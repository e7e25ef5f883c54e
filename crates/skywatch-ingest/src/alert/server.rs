//! WebSocket alert server.
//!
//! # Routes
//!
//! - `GET /alerts` - WebSocket upgrade; each alert arrives as a text frame
//!   `{"event":"alert","data":"<raw event JSON>"}`
//! - `GET /health` - Liveness plus the current subscriber count
//!
//! Clients only listen. Anything they send is ignored apart from close
//! frames.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use super::{Alert, AlertBroadcaster};
use crate::Result;

/// Frame sent to WebSocket clients.
#[derive(Debug, Serialize)]
struct AlertFrame<'a> {
    event: &'a str,
    data: &'a str,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    subscribers: usize,
}

/// Build the alert router.
pub fn router(broadcaster: Arc<AlertBroadcaster>) -> Router {
    Router::new()
        .route("/alerts", get(alerts_socket))
        .route("/health", get(health_check))
        .with_state(broadcaster)
}

/// Bind `addr` and serve the alert router from a background task.
///
/// Bind failures are returned; serve errors after startup are logged.
pub async fn start(
    addr: SocketAddr,
    broadcaster: Arc<AlertBroadcaster>,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("Alert server listening on ws://{}/alerts", local_addr);

    let app = router(broadcaster);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Alert server stopped");
        }
    });

    Ok((local_addr, handle))
}

async fn health_check(State(broadcaster): State<Arc<AlertBroadcaster>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        subscribers: broadcaster.subscriber_count(),
    })
}

async fn alerts_socket(
    ws: WebSocketUpgrade,
    State(broadcaster): State<Arc<AlertBroadcaster>>,
) -> Response {
    ws.on_upgrade(move |socket| forward_alerts(socket, broadcaster))
}

/// Render an alert as the client-facing text frame.
fn encode_frame(alert: &Alert) -> serde_json::Result<String> {
    serde_json::to_string(&AlertFrame {
        event: &alert.channel,
        data: &alert.payload,
    })
}

async fn forward_alerts(mut socket: WebSocket, broadcaster: Arc<AlertBroadcaster>) {
    let mut subscription = broadcaster.subscribe();
    let id = subscription.id();
    drop(broadcaster);

    tracing::info!(subscriber = id, "Alert client connected");

    loop {
        tokio::select! {
            alert = subscription.recv() => {
                let Some(alert) = alert else { break };
                let frame = match encode_frame(&alert) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(subscriber = id, error = %e, "Failed to encode alert frame");
                        continue;
                    }
                };
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::info!(subscriber = id, "Alert client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::StreamExt;
    use skywatch_core::ALERT_CHANNEL;

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    /// Poll `condition` until it holds, failing after a few seconds.
    async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn test_frame_shape() {
        let alert = Alert {
            channel: Arc::from("alert"),
            payload: Arc::from(r#"{"urgency":4}"#),
        };
        let frame = encode_frame(&alert).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();

        assert_eq!(parsed["event"], "alert");
        // Payload is forwarded as the raw string, not re-parsed.
        assert_eq!(parsed["data"], r#"{"urgency":4}"#);
    }

    #[tokio::test]
    async fn test_health_reports_subscribers() {
        let broadcaster = AlertBroadcaster::new(4);
        let _subscription = broadcaster.subscribe();

        let (addr, handle) = start(loopback(), broadcaster)
            .await
            .unwrap();
        assert_ne!(addr.port(), 0);

        let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["subscribers"], 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_websocket_client_receives_alert_frames() {
        let broadcaster = AlertBroadcaster::new(4);
        let (addr, handle) = start(loopback(), Arc::clone(&broadcaster)).await.unwrap();

        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/alerts"))
            .await
            .unwrap();
        // The subscription is registered by the upgraded connection task.
        wait_until(|| broadcaster.subscriber_count() == 1).await;

        let body = r#"{"title":"HD 12345","urgency":3}"#;
        let report = broadcaster.publish(ALERT_CHANNEL, Arc::from(body));
        assert_eq!(report.delivered, 1);

        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        assert_eq!(parsed, serde_json::json!({ "event": "alert", "data": body }));

        client.close(None).await.unwrap();
        wait_until(|| broadcaster.subscriber_count() == 0).await;

        handle.abort();
    }
}
