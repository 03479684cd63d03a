use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::dispatcher::{Outbound, Relay};

/// Drive one `/ws` socket until it closes or the heartbeat evicts it.
///
/// The socket starts unbound; it becomes associated with a user only when a
/// `join` frame arrives.
pub async fn handle_connection(socket: WebSocket, relay: Relay) {
    let (mut sender, receiver) = socket.split();
    let (conn_id, mut outbound_rx) = relay.register().await;

    info!("conn {} opened relay socket", conn_id);

    // Forward relay events and heartbeat pings -> client
    let mut send_task = tokio::spawn(async move {
        while let Some(out) = outbound_rx.recv().await {
            let frame = match out {
                Outbound::Text(text) => Message::Text(text),
                Outbound::Ping => Message::Ping(vec![].into()),
            };
            if sender.send(frame).await.is_err() {
                break;
            }
        }
        // Channel closed: the relay dropped this connection. Returning drops
        // the sink without a close handshake.
    });

    // Text frames are handled one at a time, in arrival order
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Utf8Bytes>();
    let relay_frames = relay.clone();
    let mut handle_task = tokio::spawn(async move {
        while let Some(text) = frame_rx.recv().await {
            relay_frames.handle_text(conn_id, text.as_str()).await;
        }
    });

    let mut recv_task = tokio::spawn(read_frames(receiver, relay.clone(), conn_id, frame_tx));

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            handle_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
            // Frames read before the close still get handled
            let _ = (&mut handle_task).await;
        }
    }

    relay.disconnect(conn_id).await;
    info!("conn {} closed relay socket", conn_id);
}

/// Read client frames until close. Pongs are recorded here directly; text
/// frames are queued so a slow handler never delays liveness.
async fn read_frames<S>(
    mut receiver: S,
    relay: Relay,
    conn_id: Uuid,
    frames: mpsc::UnboundedSender<Utf8Bytes>,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                if frames.send(text).is_err() {
                    break;
                }
            }
            Message::Pong(_) => relay.pong(conn_id).await,
            Message::Close(_) => break,
            _ => debug!("conn {} ignored non-text frame", conn_id),
        }
    }
}
