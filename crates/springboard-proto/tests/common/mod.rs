//! Local stand-ins for the realtime server and the catalog API.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

use springboard_proto::protocol::{events, Frame};

type States = Arc<Mutex<HashMap<String, String>>>;

/// Serves `entries` at `GET /urls`; returns the base URL.
pub async fn serve_catalog(entries: Value) -> String {
    let app = Router::new().route(
        "/urls",
        get(move || {
            let entries = entries.clone();
            async move { Json(entries) }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Minimal selection relay: remembers the last pick per screen, answers
/// `requestCurrentUrl` to the asker and fans `changeUrl` out to every client.
pub async fn spawn_relay() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let states = States::default();
    let (fanout, _) = broadcast::channel::<String>(64);
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            tokio::spawn(serve_client(tcp, states.clone(), fanout.clone()));
        }
    });
    format!("http://{addr}")
}

async fn serve_client(tcp: TcpStream, states: States, fanout: broadcast::Sender<String>) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
        return;
    };
    let mut fanned = fanout.subscribe();
    let open = r#"0{"sid":"relay","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#;
    if ws.send(Message::Text(open.into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            msg = ws.next() => {
                let Some(Ok(Message::Text(text))) = msg else { break };
                if text == "40" {
                    if ws.send(Message::Text(r#"40{"sid":"c"}"#.into())).await.is_err() {
                        break;
                    }
                    continue;
                }
                let Some((name, data)) = Frame::decode(&text).ok().and_then(Frame::into_event) else {
                    continue;
                };
                let screen = data["screen"].as_str().unwrap_or("A").to_string();
                match name.as_str() {
                    events::REQUEST_CURRENT_URL => {
                        let current = states.lock().unwrap().get(&screen).cloned();
                        if let Some(id) = current {
                            let reply = Frame::event(
                                events::CURRENT_URL_STATE,
                                Some(json!({ "id": id, "screen": screen })),
                            );
                            if ws.send(Message::Text(reply.encode())).await.is_err() {
                                break;
                            }
                        }
                    }
                    events::CHANGE_URL => {
                        let Some(id) = data["id"].as_str() else { continue };
                        states.lock().unwrap().insert(screen.clone(), id.to_string());
                        let frame = Frame::event(
                            events::CHANGE_URL,
                            Some(json!({ "id": id, "screen": screen })),
                        );
                        let _ = fanout.send(frame.encode());
                    }
                    _ => {}
                }
            }
            Ok(frame) = fanned.recv() => {
                if ws.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
        }
    }
}
