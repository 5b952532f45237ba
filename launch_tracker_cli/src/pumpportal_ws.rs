// PumpPortal WebSocket client
// Connects to the feed, subscribes to new tokens and to the trade streams the
// tracker asks for, and reconnects with backoff when the transport drops.

use chrono::Utc;
use futures_util::{stream::StreamExt, SinkExt};
use launch_tracker_core::feed::{
    parse_message, FeedConnection, FeedSignal, ReconnectBackoff, SubscriptionRequest,
    SubscriptionSet,
};
use launch_tracker_core::{Settings, TrackerStats};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Debug, Clone)]
pub struct FeedClientConfig {
    pub ws_url: String,
    pub subscription_batch_size: usize,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
}

impl FeedClientConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            ws_url: settings.feed_ws_url.clone(),
            subscription_batch_size: settings.subscription_batch_size,
            reconnect_base_ms: settings.reconnect_base_ms,
            reconnect_max_ms: settings.reconnect_max_ms,
        }
    }
}

enum SessionEnd {
    /// Transport failed or closed; reconnect.
    Dropped,
    /// The tracker side went away; stop.
    Shutdown,
}

/// Run the feed connection until the tracker loop drops its channels.
///
/// Parsed events go to `tx`. Subscription requests arrive on `control_rx`
/// and are applied to the subscription set, which is replayed on every
/// reconnect. Malformed messages are logged and dropped.
pub async fn run_pumpportal_ws(
    config: FeedClientConfig,
    tx: mpsc::Sender<FeedSignal>,
    mut control_rx: mpsc::UnboundedReceiver<SubscriptionRequest>,
    stats: Arc<TrackerStats>,
) {
    let mut conn = FeedConnection::new(ReconnectBackoff::new(
        config.reconnect_base_ms,
        config.reconnect_max_ms,
    ));
    let mut subs = SubscriptionSet::new(config.subscription_batch_size);

    // Outer reconnection loop
    loop {
        conn.on_connecting();
        info!("Connecting to PumpPortal WebSocket at {}", config.ws_url);

        match connect_async(config.ws_url.as_str()).await {
            Ok((ws_stream, _)) => {
                let (mut write, mut read) = ws_stream.split();
                info!("PumpPortal WebSocket connected");

                while let Ok(request) = control_rx.try_recv() {
                    subs.apply(&request);
                }

                let mut replayed = true;
                for payload in subs.replay_payloads() {
                    if let Err(e) = write.send(Message::Text(payload)).await {
                        error!("Failed to send subscription to PumpPortal: {}", e);
                        replayed = false;
                        break;
                    }
                }

                if replayed {
                    let now = Utc::now();
                    info!(
                        "Subscribed to new tokens and {} trade streams",
                        subs.len()
                    );
                    if let Some(outage) = conn.on_subscribed(now) {
                        warn!(
                            "PumpPortal feed restored after {:.1}s outage; trades in between are lost",
                            outage.num_milliseconds() as f64 / 1000.0
                        );
                        if tx.send(FeedSignal::Reconnected { at: now, outage }).await.is_err() {
                            return;
                        }
                    }

                    // Process incoming messages and subscription requests
                    let end = loop {
                        tokio::select! {
                            msg = read.next() => {
                                let msg = match msg {
                                    Some(Ok(m)) => m,
                                    Some(Err(e)) => {
                                        error!("PumpPortal WebSocket error: {}", e);
                                        break SessionEnd::Dropped;
                                    }
                                    None => {
                                        warn!("PumpPortal WebSocket stream ended");
                                        break SessionEnd::Dropped;
                                    }
                                };
                                match msg {
                                    Message::Text(text) => match parse_message(&text, Utc::now()) {
                                        Ok(Some(event)) => {
                                            if tx.send(FeedSignal::Event(event)).await.is_err() {
                                                break SessionEnd::Shutdown;
                                            }
                                        }
                                        Ok(None) => debug!("PumpPortal control message: {}", text),
                                        Err(e) => {
                                            stats.record_parse_failure();
                                            warn!("Dropping PumpPortal message ({}): {}", e, text);
                                        }
                                    },
                                    Message::Ping(data) => {
                                        if let Err(e) = write.send(Message::Pong(data)).await {
                                            warn!("Failed to send pong: {}", e);
                                        }
                                    }
                                    Message::Close(_) => {
                                        warn!("PumpPortal WebSocket closed by server");
                                        break SessionEnd::Dropped;
                                    }
                                    _ => {}
                                }
                            }
                            request = control_rx.recv() => {
                                let Some(request) = request else {
                                    break SessionEnd::Shutdown;
                                };
                                if let Some(payload) = subs.apply(&request) {
                                    debug!("PumpPortal subscription update: {}", payload);
                                    if let Err(e) = write.send(Message::Text(payload)).await {
                                        error!("Failed to send subscription update: {}", e);
                                        break SessionEnd::Dropped;
                                    }
                                }
                            }
                        }
                    };

                    if let SessionEnd::Shutdown = end {
                        let _ = write.send(Message::Close(None)).await;
                        info!("PumpPortal client stopping");
                        return;
                    }
                }
            }
            Err(e) => {
                error!("Failed to connect to PumpPortal WebSocket: {}", e);
            }
        }

        let now = Utc::now();
        if conn.on_disconnected(now) && tx.send(FeedSignal::Disconnected { at: now }).await.is_err() {
            return;
        }

        let delay = conn.next_delay();
        info!("PumpPortal WebSocket disconnected; reconnecting in {:?}", delay);

        // Keep the subscription set current while waiting
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                request = control_rx.recv() => match request {
                    Some(request) => {
                        subs.apply(&request);
                    }
                    None => {
                        info!("PumpPortal client stopping");
                        return;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launch_tracker_core::feed::{subscribe_new_token_payload, subscribe_trades_payload, FeedEvent};
    use launch_tracker_core::TradeKind;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;
    use tokio_tungstenite::{accept_async, WebSocketStream};

    const WAIT: Duration = Duration::from_secs(5);

    async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
        let (stream, _) = timeout(WAIT, listener.accept())
            .await
            .expect("timed out waiting for client")
            .unwrap();
        accept_async(stream).await.unwrap()
    }

    async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> String {
        loop {
            let msg = timeout(WAIT, ws.next())
                .await
                .expect("timed out waiting for client frame")
                .expect("client stream ended")
                .unwrap();
            if let Message::Text(text) = msg {
                return text;
            }
        }
    }

    async fn next_signal(rx: &mut mpsc::Receiver<FeedSignal>) -> FeedSignal {
        timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for feed signal")
            .expect("feed channel closed")
    }

    #[tokio::test]
    async fn test_drops_bad_frames_and_resubscribes_after_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = FeedClientConfig {
            ws_url: format!("ws://{}", listener.local_addr().unwrap()),
            subscription_batch_size: 1,
            reconnect_base_ms: 10,
            reconnect_max_ms: 50,
        };
        let (tx, mut rx) = mpsc::channel(16);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(TrackerStats::new());
        control_tx
            .send(SubscriptionRequest::Subscribe("A".to_string()))
            .unwrap();
        let client = tokio::spawn(run_pumpportal_ws(config, tx, control_rx, stats.clone()));

        // first session: new-token subscription, then the queued trade stream
        let mut ws = accept(&listener).await;
        assert_eq!(next_text(&mut ws).await, subscribe_new_token_payload());
        assert_eq!(next_text(&mut ws).await, subscribe_trades_payload(&["A".to_string()]));

        ws.send(Message::Text("not json".to_string())).await.unwrap();
        ws.send(Message::Text(
            r#"{"signature":"s1","mint":"A","traderPublicKey":"W1","txType":"buy","marketCapSol":42.5}"#
                .to_string(),
        ))
        .await
        .unwrap();

        match next_signal(&mut rx).await {
            FeedSignal::Event(FeedEvent::Trade(trade)) => {
                assert_eq!(trade.mint, "A");
                assert_eq!(trade.kind, TradeKind::Buy);
                assert_eq!(trade.market_cap_sol, 42.5);
            }
            other => panic!("expected trade, got {:?}", other),
        }
        assert_eq!(stats.snapshot().parse_failures, 1);

        ws.close(None).await.unwrap();
        drop(ws);
        assert!(matches!(next_signal(&mut rx).await, FeedSignal::Disconnected { .. }));

        // queued while the transport is down
        control_tx
            .send(SubscriptionRequest::Subscribe("B".to_string()))
            .unwrap();

        let mut ws = accept(&listener).await;
        assert_eq!(next_text(&mut ws).await, subscribe_new_token_payload());
        assert_eq!(next_text(&mut ws).await, subscribe_trades_payload(&["A".to_string()]));
        assert_eq!(next_text(&mut ws).await, subscribe_trades_payload(&["B".to_string()]));

        match next_signal(&mut rx).await {
            FeedSignal::Reconnected { outage, .. } => assert!(outage >= chrono::Duration::zero()),
            other => panic!("expected reconnect, got {:?}", other),
        }

        drop(control_tx);
        timeout(WAIT, client)
            .await
            .expect("client did not stop")
            .unwrap();
    }
}
