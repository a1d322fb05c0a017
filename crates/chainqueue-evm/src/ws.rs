//! `newHeads` subscription over a node WebSocket.
//!
//! The subscription task forwards each head height into a bounded channel.
//! When the socket errors or the server closes it, one final
//! `Err(ChainUnavailable)` is delivered and the stream ends; reconnecting
//! is the supervisor's job.

use futures::{channel::mpsc, SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use chainqueue_core::chain::HeadStream;
use chainqueue_core::error::IngestError;
use chainqueue_core::types::NewHead;

use crate::decode::new_head_from_json;

type HeadSender = mpsc::Sender<Result<NewHead, IngestError>>;

/// Connect to `ws_url` and subscribe to `newHeads`.
///
/// Connection failures are returned directly so the caller can back off.
pub async fn subscribe_new_heads(ws_url: &str) -> Result<HeadStream, IngestError> {
    let (ws_stream, _) = connect_async(ws_url)
        .await
        .map_err(|e| IngestError::ChainUnavailable(format!("ws connect {ws_url}: {e}")))?;
    info!(url = %ws_url, "WebSocket connected");

    let (mut write, read) = ws_stream.split();

    let sub_msg = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_subscribe",
        "params": ["newHeads"]
    });
    write
        .send(Message::Text(sub_msg.to_string()))
        .await
        .map_err(|e| IngestError::ChainUnavailable(format!("eth_subscribe: {e}")))?;

    let (tx, rx) = mpsc::channel::<Result<NewHead, IngestError>>(512);
    tokio::spawn(async move {
        forward_heads(write, read, tx).await;
    });

    Ok(Box::pin(rx))
}

async fn forward_heads<W, R>(mut write: W, mut read: R, mut tx: HeadSender)
where
    W: futures::Sink<Message> + Unpin,
    R: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg) = read.next().await {
        match msg {
            Err(e) => {
                warn!("WebSocket error: {}", e);
                let _ = tx
                    .send(Err(IngestError::ChainUnavailable(e.to_string())))
                    .await;
                break;
            }
            Ok(Message::Text(text)) => {
                debug!("WS message: {}", preview(&text));
                if let Some(item) = parse_new_head(&text) {
                    let ends_stream = item.is_err();
                    if tx.send(item).await.is_err() || ends_stream {
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) => {
                info!("WebSocket closed by server");
                let _ = tx
                    .send(Err(IngestError::ChainUnavailable("closed by server".into())))
                    .await;
                break;
            }
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Ok(_) => {}
        }
    }
    debug!("newHeads subscription loop ended");
}

fn preview(text: &str) -> String {
    text.chars().take(120).collect()
}

/// Parse an `eth_subscription` notification carrying a head.
/// Returns `None` for the subscription confirmation and unrelated frames.
/// An error reply (a rejected `eth_subscribe`) ends the subscription.
fn parse_new_head(text: &str) -> Option<Result<NewHead, IngestError>> {
    let v: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            error!("unparseable WS frame: {}", e);
            return None;
        }
    };
    if let Some(err) = v.get("error") {
        warn!(error = %err, "subscription rejected by node");
        return Some(Err(IngestError::ChainUnavailable(format!(
            "eth_subscribe failed: {err}"
        ))));
    }
    if v.get("method")?.as_str()? != "eth_subscription" {
        return None;
    }
    let result = v.get("params")?.get("result")?;
    Some(new_head_from_json(result))
}
