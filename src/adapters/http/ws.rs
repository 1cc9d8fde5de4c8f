use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use tokio::sync::broadcast::error::RecvError;

use crate::adapters::http::state::HttpState;
use crate::domain::stream::{StreamEvent, WsEventMessage, WsFrameMetaMessage};

pub async fn ws_handler(ws: WebSocketUpgrade, State(st): State<HttpState>) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, st))
}

/// Wire shape per frame: one JSON metadata text message, then the JPEG as a
/// binary message. Stream end and failures are JSON-only events; the socket
/// stays open so a newly started stream reuses it.
async fn handle_socket(mut socket: WebSocket, st: HttpState) {
    let mut rx = match st.stream.subscribe().await {
        Ok(r) => r,
        Err(_) => return,
    };

    loop {
        match rx.recv().await {
            Ok(StreamEvent::Frame { meta, jpeg }) => {
                let json = serde_json::to_string(&WsFrameMetaMessage { r#type: "frame".into(), meta })
                    .unwrap_or_default();
                if socket.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
                if socket.send(Message::Binary(jpeg.into())).await.is_err() {
                    break;
                }
            }
            Ok(StreamEvent::Ended) => {
                let json = serde_json::to_string(&WsEventMessage {
                    r#type: "end".into(),
                    message: "stream ended".into(),
                })
                .unwrap_or_default();
                if socket.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            Ok(StreamEvent::Failed(message)) => {
                let json =
                    serde_json::to_string(&WsEventMessage { r#type: "error".into(), message })
                        .unwrap_or_default();
                if socket.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            // A slow socket missed frames; skip ahead and keep going.
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
}
