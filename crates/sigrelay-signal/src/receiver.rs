//! WebSocket receive loop for one bot account.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RETRY_DELAY: Duration = Duration::from_secs(5);
const LONG_RETRY_DELAY: Duration = Duration::from_secs(30);
const MAX_QUICK_RETRIES: u32 = 3;
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Delay before the next connection attempt; `failures` counts consecutive
/// failed or dropped connections and is reset after a long wait.
pub fn backoff(failures: &mut u32) -> Duration {
    *failures += 1;
    if *failures >= MAX_QUICK_RETRIES {
        *failures = 0;
        LONG_RETRY_DELAY
    } else {
        RETRY_DELAY
    }
}

pub fn receive_url(ws_base: &str, number: &str) -> String {
    format!("{}/v1/receive/{number}", ws_base.trim_end_matches('/'))
}

/// Forward raw text frames from `/v1/receive/{number}` into `frames` until
/// `shutdown` fires. Connection problems are logged and retried, never fatal.
pub async fn run(
    ws_base: String,
    number: String,
    frames: mpsc::Sender<String>,
    shutdown: CancellationToken,
) {
    let url = receive_url(&ws_base, &number);
    let mut failures = 0u32;

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                info!(bot = %number, "websocket connected");
                failures = 0;
                let (mut sink, mut stream) = ws.split();
                let mut ping = tokio::time::interval(PING_INTERVAL);
                ping.tick().await;

                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            let _ = sink.close().await;
                            info!(bot = %number, "receiver stopped");
                            return;
                        }
                        _ = ping.tick() => {
                            if let Err(e) = sink.send(WsMessage::Ping(Vec::new())).await {
                                warn!(bot = %number, "websocket ping failed: {e}");
                                break;
                            }
                        }
                        next = stream.next() => match next {
                            Some(Ok(WsMessage::Text(text))) => {
                                if frames.send(text).await.is_err() {
                                    debug!(bot = %number, "router gone; receiver exiting");
                                    return;
                                }
                            }
                            Some(Ok(WsMessage::Binary(bytes))) => {
                                let text = String::from_utf8_lossy(&bytes).to_string();
                                if frames.send(text).await.is_err() {
                                    return;
                                }
                            }
                            Some(Ok(WsMessage::Close(frame))) => {
                                warn!(bot = %number, ?frame, "websocket closed by gateway");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!(bot = %number, "websocket error: {e}");
                                break;
                            }
                            None => {
                                warn!(bot = %number, "websocket stream ended");
                                break;
                            }
                        },
                    }
                }
            }
            Err(e) => warn!(bot = %number, "websocket connect failed: {e}"),
        }

        let delay = backoff(&mut failures);
        info!(bot = %number, delay_secs = delay.as_secs(), "reconnecting");
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
