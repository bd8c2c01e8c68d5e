//! Streaming endpoints: the MJPEG frame stream and the per-frame result
//! socket.

use axum::body::{Body, Bytes};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

use findr_frame_model::StreamEvent;
use findr_stream_engine::{EncodedFrame, SessionId, SubscriberId};

use crate::error::ApiError;
use crate::AppState;

pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// One multipart part carrying a JPEG frame.
pub fn mjpeg_part(frame: &EncodedFrame) -> Bytes {
    let mut payload = Vec::with_capacity(frame.bytes.len() + 96);
    payload.extend_from_slice(b"--frame\r\n");
    payload.extend_from_slice(b"Content-Type: image/jpeg\r\n");
    payload.extend_from_slice(format!("X-Frame-Index: {}\r\n\r\n", frame.frame_index).as_bytes());
    payload.extend_from_slice(&frame.bytes);
    payload.extend_from_slice(b"\r\n");
    Bytes::from(payload)
}

/// Start the session's engine and stream its frames as MJPEG.
///
/// The response body owns the frame receiver: when the client goes away
/// the body is dropped and the engine stops at its next frame.
pub async fn mjpeg_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = SessionId::parse(&id)?;
    let handle = state.manager.start_stream(id)?;
    tracing::info!(session = %id, "MJPEG stream opened");

    let mut frames = handle.frames;
    let task = handle.task;
    tokio::spawn(async move {
        if let Err(e) = task.await {
            tracing::error!(session = %id, error = %e, "Engine task aborted");
        }
    });

    let body = async_stream::stream! {
        while let Some(frame) = frames.recv().await {
            yield Ok::<Bytes, std::convert::Infallible>(mjpeg_part(&frame));
        }
    };

    Ok((
        [
            (header::CONTENT_TYPE, MJPEG_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

/// Subscribe to a session's per-frame results over a WebSocket.
pub async fn result_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = SessionId::parse(&id)?;
    let (subscriber, events) = state.manager.subscribe(id)?;
    Ok(ws.on_upgrade(move |socket| forward_events(socket, state, id, subscriber, events)))
}

async fn forward_events(
    mut socket: WebSocket,
    state: AppState,
    id: SessionId,
    subscriber: SubscriberId,
    mut events: tokio::sync::mpsc::Receiver<StreamEvent>,
) {
    tracing::debug!(session = %id, "Result socket connected");
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let terminal = event.is_terminal();
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(session = %id, error = %e, "Dropping unserializable event");
                        continue;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() || terminal {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    state.manager.unsubscribe(id, subscriber);
    let _ = socket.send(Message::Close(None)).await;
    tracing::debug!(session = %id, "Result socket closed");
}
