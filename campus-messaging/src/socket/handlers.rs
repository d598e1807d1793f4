use std::sync::Arc;

use campus_shared::JwtKeys;
use socketioxide::extract::{Data, SocketRef};
use tokio::sync::mpsc;

use super::dispatcher::{ConnectionActor, Inbound, InboundTx};
use crate::realtime::{ClientEvent, ConnectionId, OutboundRx};
use crate::service::Messaging;

pub async fn on_connect(socket: SocketRef, messaging: Arc<Messaging>, jwt: JwtKeys) {
    let conn = ConnectionId::new();
    socket.extensions.insert(conn);

    let (in_tx, in_rx) = mpsc::unbounded_channel();

    // Outbound: hub queue -> socket. A failed emit tears the connection down
    // so the hub stops routing to it.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    messaging.hub().attach(conn, out_tx);
    tokio::spawn({
        let socket = socket.clone();
        let in_tx = in_tx.clone();
        async move {
            let pumped = pump_outbound(&mut out_rx, |name, data| socket.emit(name, data)).await;
            if let Err(e) = pumped {
                tracing::warn!(conn = %conn, error = %e, "socket emit failed, closing connection");
                let _ = in_tx.send(Inbound::Closed);
                socket.disconnect().ok();
            }
        }
    });

    // Inbound: socket callbacks -> actor, one event at a time.
    tokio::spawn(ConnectionActor::new(conn, messaging, jwt).run(in_rx));

    tracing::info!(conn = %conn, sid = %socket.id, "messaging socket connected");

    if let Some(token) = query_token(&socket) {
        let _ = in_tx.send(Inbound::Frame {
            event: "authenticate".into(),
            payload: serde_json::json!({ "token": token }),
        });
    }

    for name in ClientEvent::NAMES {
        socket.on(name, {
            let in_tx = in_tx.clone();
            move |Data::<serde_json::Value>(payload)| {
                let in_tx = in_tx.clone();
                async move {
                    forward(&in_tx, name, payload);
                }
            }
        });
    }

    socket.on_disconnect({
        let in_tx = in_tx.clone();
        move |socket: SocketRef| {
            let in_tx = in_tx.clone();
            async move {
                let conn = socket.extensions.get::<ConnectionId>();
                tracing::debug!(conn = ?conn, sid = %socket.id, "socket transport closed");
                let _ = in_tx.send(Inbound::Closed);
            }
        }
    });
}

/// Feeds queued events to `emit` until the queue closes or an emit fails.
async fn pump_outbound<E>(
    rx: &mut OutboundRx,
    mut emit: impl FnMut(&'static str, serde_json::Value) -> Result<(), E>,
) -> Result<(), E> {
    while let Some(event) = rx.recv().await {
        let (name, data) = event.into_wire();
        emit(name, data)?;
    }
    Ok(())
}

fn forward(in_tx: &InboundTx, event: &str, payload: serde_json::Value) {
    if in_tx
        .send(Inbound::Frame { event: event.to_string(), payload })
        .is_err()
    {
        tracing::debug!(event, "connection actor already stopped");
    }
}

fn query_token(socket: &SocketRef) -> Option<String> {
    let query = socket.req_parts().uri.query()?;
    token_from_query(query)
}

fn token_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "token" && !value.is_empty()).then(|| value.to_string())
    })
}
