//! WebSocket endpoint streaming attention measurements for one session.
//!
//! Client → server: `{"image": "<base64 or data URI>"}` at any rate; only the
//! newest unread frame is processed each tick.
//! Server → client: one observation or `{"error": ...}` per processed frame.

use std::{borrow::Cow, time::Duration};

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{stream::SplitStream, Sink, SinkExt, StreamExt};
use log::{debug, error, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    error::FocusError,
    tracking::{tracking_loop, FrameSlot, StreamContext, StreamEnd, TrackingMessage},
    AppState,
};

const OUTBOUND_BUFFER: usize = 16;
const CLOSE_GRACE: Duration = Duration::from_secs(1);

pub async fn track_session(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Response, FocusError> {
    if state.tracking.is_shutting_down() {
        return Err(FocusError::ShuttingDown);
    }
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, session_id, state)))
}

async fn handle_socket(socket: WebSocket, session_id: String, state: AppState) {
    let guard = state.tracking.register(&session_id);
    debug!(
        "Tracking socket opened for session {session_id} ({} open for it)",
        state.tracking.streams_for(&session_id)
    );
    let (mut sender, receiver) = socket.split();

    let (slot, inbound) = FrameSlot::channel();
    let mut reader = tokio::spawn(read_frames(receiver, slot));

    let ctx = StreamContext {
        session_id: session_id.clone(),
        store: state.store.clone(),
        estimator: state.estimator.clone(),
        metrics: state.metrics.clone(),
        tracking: state.settings.tracking.clone(),
        attention: state.settings.attention.clone(),
    };
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<TrackingMessage>(OUTBOUND_BUFFER);
    let stop = guard.token().child_token();

    let (end, written) = tokio::join!(
        tracking_loop(ctx, inbound, outbound_tx, stop.clone()),
        forward(&mut outbound_rx, &mut sender, &stop)
    );

    let end = match written {
        Err(err) => StreamEnd::Fault(format!("send failed: {err}")),
        Ok(()) => end,
    };

    let close = match end {
        StreamEnd::RemoteClosed => {
            // The reader owes the peer a close reply; let it flush.
            if tokio::time::timeout(CLOSE_GRACE, &mut reader).await.is_err() {
                debug!("Close handshake for session {session_id} did not finish in time");
            }
            None
        }
        StreamEnd::Fault(reason) => {
            error!("Tracking stream for session {session_id} ended abnormally: {reason}");
            Some(CloseFrame {
                code: close_code::ERROR,
                reason: Cow::from("internal error"),
            })
        }
        StreamEnd::Cancelled => Some(CloseFrame {
            code: close_code::AWAY,
            reason: Cow::from("server shutting down"),
        }),
    };
    reader.abort();

    if let Some(frame) = close {
        if let Err(err) = sender.send(Message::Close(Some(frame))).await {
            warn!("Could not send close frame for session {session_id}: {err}");
        }
    }

    drop(guard);
    debug!(
        "Tracking socket for session {session_id} closed ({} still open)",
        state.tracking.streams_for(&session_id)
    );
}

/// Feeds inbound frames into the slot until the peer goes away.
async fn read_frames(mut receiver: SplitStream<WebSocket>, mut slot: FrameSlot) {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => slot.push(text),
            Ok(Message::Binary(bytes)) => slot.push(String::from_utf8_lossy(&bytes).into_owned()),
            // Keep polling: the next read flushes the close reply.
            Ok(Message::Close(_)) => slot.close(),
            Ok(_) => {}
            Err(err) => {
                slot.fail(err.to_string());
                return;
            }
        }
    }
    slot.close();
}

/// Writes outbound messages until the loop hangs up. A failed write cancels
/// `stop`, ending the loop.
async fn forward<S>(
    outbound: &mut mpsc::Receiver<TrackingMessage>,
    sink: &mut S,
    stop: &CancellationToken,
) -> Result<(), S::Error>
where
    S: Sink<Message> + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(err) => {
                error!("Failed to serialize tracking message: {err}");
                continue;
            }
        };
        if let Err(err) = sink.send(Message::Text(json)).await {
            stop.cancel();
            return Err(err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActivityLabel;
    use futures::channel::mpsc as sink_channel;

    #[tokio::test]
    async fn forwards_messages_as_json_text() {
        let (mut sink, mut written) = sink_channel::unbounded::<Message>();
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(TrackingMessage::Error {
            error: "bad frame".into(),
        })
        .await
        .unwrap();
        drop(tx);

        let stop = CancellationToken::new();
        forward(&mut rx, &mut sink, &stop).await.unwrap();
        assert!(!stop.is_cancelled());

        match written.next().await {
            Some(Message::Text(text)) => assert_eq!(text, r#"{"error":"bad frame"}"#),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_write_stops_the_stream() {
        let (mut sink, peer) = sink_channel::unbounded::<Message>();
        drop(peer);
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(TrackingMessage::Observation {
            gaze: None,
            face: None,
            activity: ActivityLabel::Absent,
            direction: None,
        })
        .await
        .unwrap();

        let stop = CancellationToken::new();
        assert!(forward(&mut rx, &mut sink, &stop).await.is_err());
        assert!(stop.is_cancelled());
    }
}
