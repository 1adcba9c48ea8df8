use axum::{
    extract::{
        ConnectInfo, State,
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::client_message::{ConnectionState, handle_client_message, tick};
use crate::enums::client_message::ClientMessage;
use crate::enums::server_event::ServerEvent;
use crate::states::app_state::AppState;

const TICK: Duration = Duration::from_secs(1);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, peer))
}

async fn handle_socket(stream: WebSocket, state: AppState, peer: SocketAddr) {
    info!(%peer, "quiz socket connected");
    let (mut sender, mut receiver) = stream.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(32);

    // task: send server events to this client
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(_) => continue,
            };
            if sender
                .send(Message::Text(Utf8Bytes::from(json)))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // task: receive client messages and drive the time limit
    let recv_task = tokio::spawn(async move {
        let mut conn = ConnectionState::default();
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        'socket: loop {
            let events = tokio::select! {
                msg = receiver.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(parsed) => handle_client_message(parsed, &state, &mut conn, Utc::now()),
                            Err(e) => vec![ServerEvent::error(format!("invalid message: {e}"))],
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break 'socket,
                    Some(Ok(_)) => continue 'socket,
                },
                _ = ticker.tick() => tick(&state, &mut conn, Utc::now()),
            };
            for event in events {
                if tx.send(event).await.is_err() {
                    break 'socket;
                }
            }
        }
    });

    let _ = tokio::join!(send_task, recv_task);
    debug!(%peer, "quiz socket closed");
}
