// WebSocket push channel
//
// Each connection registers a subscriber and then only forwards what the
// broadcast loop queues for it. Anything the client sends is ignored apart
// from close frames.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{Sink, SinkExt, StreamExt};
use serde::Serialize;
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::broadcast::Envelope;
use crate::state::SharedState;

/// Message type sent once when a connection opens
pub const WELCOME: &str = "welcome";

#[derive(Debug, Serialize)]
struct Welcome {
    subscriber_id: u64,
    interval_secs: u64,
}

pub async fn metrics_socket(ws: WebSocketUpgrade, State(state): State<SharedState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Sends one frame, giving up after `limit`
///
/// A client that stops reading fills the TCP buffer; the send then never
/// completes and the connection is dropped instead.
async fn send_within<S>(sink: &mut S, message: Message, limit: Duration) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match timeout(limit, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!("WebSocket send failed: {}", e);
            false
        }
        Err(_) => {
            debug!("WebSocket send stalled for {:?}", limit);
            false
        }
    }
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let send_limit = state.config.adapter_timeout();
    let (tx, mut rx) = mpsc::channel(state.config.subscriber_queue);
    let id = state.registry.add(tx);
    info!(
        "WebSocket subscriber {} connected ({} total)",
        id,
        state.registry.len()
    );

    let (mut sink, mut stream) = socket.split();

    let welcome = Envelope::new(
        WELCOME,
        Welcome {
            subscriber_id: id,
            interval_secs: state.config.broadcast_interval_secs,
        },
    );
    let greeted = match serde_json::to_string(&welcome) {
        Ok(text) => send_within(&mut sink, Message::Text(text), send_limit).await,
        Err(_) => false,
    };

    if greeted {
        loop {
            tokio::select! {
                outbound = rx.recv() => match outbound {
                    Some(text) => {
                        if !send_within(&mut sink, Message::Text(text.to_string()), send_limit).await {
                            break;
                        }
                    }
                    // Removed from the registry: pruned or shutting down
                    None => break,
                },
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => debug!("Ignoring client message from subscriber {}", id),
                },
            }
        }
    }

    state.registry.remove(id);
    send_within(&mut sink, Message::Close(None), send_limit).await;

    info!(
        "WebSocket subscriber {} disconnected ({} remaining)",
        id,
        state.registry.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::router;
    use crate::broadcast::{TickOutcome, METRICS_UPDATE};
    use crate::config::BridgeConfig;
    use crate::metrics::fake::{FakeContainers, FakeHost};
    use crate::state::AppState;
    use serde_json::Value;
    use std::net::SocketAddr;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::Message as ClientMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn test_state(config: BridgeConfig) -> SharedState {
        Arc::new(AppState::new(
            config,
            Arc::new(FakeHost::new()),
            Arc::new(FakeContainers::new()),
        ))
    }

    /// Serves the full router on an ephemeral local port
    async fn serve(state: SharedState) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state);
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });
        addr
    }

    async fn connect(addr: SocketAddr, query: &str) -> Client {
        let (client, _) = connect_async(format!("ws://{addr}/ws/metrics{query}"))
            .await
            .unwrap();
        client
    }

    /// Next text frame as JSON, skipping control frames
    async fn next_json(client: &mut Client) -> Value {
        loop {
            let frame = timeout(Duration::from_secs(2), client.next())
                .await
                .expect("no frame within 2s")
                .expect("stream ended")
                .unwrap();
            if let ClientMessage::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn wait_for_subscribers(state: &SharedState, expected: usize) {
        for _ in 0..100 {
            if state.registry.len() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "expected {} subscriber(s), found {}",
            expected,
            state.registry.len()
        );
    }

    #[tokio::test]
    async fn test_welcome_then_metrics_update() {
        let state = test_state(BridgeConfig::default());
        let addr = serve(state.clone()).await;
        let mut client = connect(addr, "").await;

        let welcome = next_json(&mut client).await;
        assert_eq!(welcome["type"], WELCOME);
        assert_eq!(welcome["data"]["interval_secs"], 5);
        assert_eq!(state.registry.len(), 1);

        let outcome = state.broadcaster().tick().await;
        assert_eq!(outcome, TickOutcome::Sent { delivered: 1, pruned: 0 });

        let update = next_json(&mut client).await;
        assert_eq!(update["type"], METRICS_UPDATE);
        assert_eq!(update["data"]["system"]["hostname"], "edge-01");
        assert_eq!(update["data"]["docker"]["available"], true);
    }

    #[tokio::test]
    async fn test_client_messages_are_ignored() {
        let state = test_state(BridgeConfig::default());
        let addr = serve(state.clone()).await;
        let mut client = connect(addr, "").await;
        next_json(&mut client).await;

        client
            .send(ClientMessage::Text("subscribe please".to_string()))
            .await
            .unwrap();
        client
            .send(ClientMessage::Binary(vec![1, 2, 3]))
            .await
            .unwrap();

        state.broadcaster().tick().await;
        let update = next_json(&mut client).await;
        assert_eq!(update["type"], METRICS_UPDATE);
        assert_eq!(state.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_close_frame_removes_subscriber() {
        let state = test_state(BridgeConfig::default());
        let addr = serve(state.clone()).await;
        let mut client = connect(addr, "").await;
        next_json(&mut client).await;
        assert_eq!(state.registry.len(), 1);

        client.close(None).await.unwrap();

        wait_for_subscribers(&state, 0).await;
        assert_eq!(state.broadcaster().tick().await, TickOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_dropped_connection_removes_subscriber() {
        let state = test_state(BridgeConfig::default());
        let addr = serve(state.clone()).await;
        let mut client = connect(addr, "").await;
        next_json(&mut client).await;

        drop(client);

        wait_for_subscribers(&state, 0).await;
    }

    #[tokio::test]
    async fn test_query_token_authorizes_upgrade() {
        let config = BridgeConfig {
            api_token: Some("s3cret".to_string()),
            ..Default::default()
        };
        let state = test_state(config);
        let addr = serve(state.clone()).await;

        assert!(connect_async(format!("ws://{addr}/ws/metrics")).await.is_err());
        assert!(connect_async(format!("ws://{addr}/ws/metrics?token=wrong"))
            .await
            .is_err());

        let mut client = connect(addr, "?token=s3cret").await;
        assert_eq!(next_json(&mut client).await["type"], WELCOME);
    }

    /// Sink whose peer never reads
    struct StalledSink;

    impl Sink<Message> for StalledSink {
        type Error = axum::Error;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), Self::Error> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_send_gives_up() {
        let mut sink = StalledSink;
        let sent = send_within(
            &mut sink,
            Message::Text("update".to_string()),
            Duration::from_secs(2),
        )
        .await;
        assert!(!sent);
    }
}
