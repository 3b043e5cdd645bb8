//! WebSocket event feed.
//!
//! One socket per client. Contract lifecycle events reach every
//! connected client; per-contract log events only reach clients that
//! subscribed to that contract's channel.

use std::collections::HashSet;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use signet_core::{now_millis, ChainEvent, EventFilter};
use signet_crypto::Address;

use crate::server::ApiContext;
use crate::types::{bytes_hex, hash_hex};

pub async fn ws_handler(State(ctx): State<ApiContext>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

/// Client control frame, `{"type": "subscribe", "channel": "contract:0x.."}`
#[derive(Debug, Deserialize)]
struct Control {
    #[serde(rename = "type")]
    kind: String,
    channel: Option<String>,
    /// Dashboards attach the contract ABI to a subscription; decoding
    /// happens client side, so the server has no use for it
    #[allow(dead_code)]
    abi: Option<serde_json::Value>,
}

fn channel_address(channel: &str) -> Option<Address> {
    let raw = channel.strip_prefix("contract:")?;
    Address::from_hex(raw).ok()
}

async fn handle_socket(socket: WebSocket, ctx: ApiContext) {
    let (mut sink, mut stream) = socket.split();
    let mut events = ctx.bus.subscribe(EventFilter::Contracts {
        address: None,
        topics: Vec::new(),
    });
    let mut subscriptions: HashSet<Address> = HashSet::new();
    debug!("websocket client connected");

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        apply_control(&text, &mut subscriptions);
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            event = events.next() => {
                let event = match event {
                    Some(event) => event,
                    None => break,
                };
                if let Some(push) = render(&event, &subscriptions) {
                    if sink.send(Message::Text(push)).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
    debug!("websocket client disconnected");
}

/// Malformed frames are dropped rather than closing the socket
fn apply_control(text: &str, subscriptions: &mut HashSet<Address>) {
    let control: Control = match serde_json::from_str(text) {
        Ok(control) => control,
        Err(e) => {
            debug!(error = %e, "ignoring malformed websocket frame");
            return;
        }
    };
    let address = match control.channel.as_deref().and_then(channel_address) {
        Some(address) => address,
        None => {
            debug!(kind = %control.kind, "control frame without a contract channel");
            return;
        }
    };
    match control.kind.as_str() {
        "subscribe" => {
            subscriptions.insert(address);
            debug!(%address, "websocket subscribed");
        }
        "unsubscribe" => {
            subscriptions.remove(&address);
            debug!(%address, "websocket unsubscribed");
        }
        other => debug!(kind = %other, "unknown websocket control type"),
    }
}

/// Renders an event as a push frame, or `None` when this client should
/// not see it
fn render(event: &ChainEvent, subscriptions: &HashSet<Address>) -> Option<String> {
    let (kind, address, data) = match event {
        ChainEvent::ContractEvent {
            address,
            topics,
            data,
            tx_hash,
            height,
        } => {
            if !subscriptions.contains(address) {
                return None;
            }
            (
                "CONTRACT_EVENT",
                *address,
                json!({
                    "address": address.to_hex(),
                    "topics": topics.iter().map(hash_hex).collect::<Vec<_>>(),
                    "data": bytes_hex(data),
                    "tx_hash": hash_hex(tx_hash),
                    "height": height,
                }),
            )
        }
        ChainEvent::ContractDeployStarted { address, tx_hash } => (
            "CONTRACT_DEPLOY_STARTED",
            *address,
            json!({
                "address": address.to_hex(),
                "tx_hash": hash_hex(tx_hash),
            }),
        ),
        ChainEvent::ContractDeployed {
            address,
            tx_hash,
            success,
        } => (
            if *success {
                "CONTRACT_DEPLOY_SUCCESS"
            } else {
                "CONTRACT_DEPLOY_FAILED"
            },
            *address,
            json!({
                "address": address.to_hex(),
                "tx_hash": hash_hex(tx_hash),
            }),
        ),
        ChainEvent::ContractVerified { address } => (
            "CONTRACT_VERIFIED",
            *address,
            json!({ "address": address.to_hex() }),
        ),
        // block and transaction events stay off this feed
        _ => return None,
    };

    let frame = json!({
        "type": kind,
        "address": address.to_hex(),
        "timestamp": now_millis(),
        "data": data,
    });
    Some(frame.to_string())
}
