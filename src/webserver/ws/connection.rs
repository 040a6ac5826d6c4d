/// WebSocket connection handler
///
/// One actor per socket:
/// - Handshake (first frame must be `hello`)
/// - Frame dispatch (publish/subscribe/unsubscribe/ack/replay/heartbeat)
/// - Forwarding delivered events from the session channel to the socket
/// - Health monitoring and heartbeat
/// - Cleanup on close (detach session, drop non-durable subscriptions)
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;

use crate::arguments::is_debug_webserver_enabled;
use crate::broker::router::PublishRequest;
use crate::broker::session::{ClientSession, OutboundMessage};
use crate::logger::{self, LogTag};

use super::health::{ConnectionHealth, HealthConfig};
use super::message::{parse_priority_filter, ClientFrame, ServerFrame, PROTOCOL_VERSION};
use crate::webserver::state::AppState;

/// How long a fresh socket gets to complete the handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsSink = SplitSink<WebSocket, Message>;

/// Handle a WebSocket connection end to end
pub async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Handshake: the first frame must be hello
    let session = match await_handshake(&mut ws_tx, &mut ws_rx, &state).await {
        Some(session) => session,
        None => return,
    };
    let client_id = session.client_id.clone();

    let buffer_size =
        crate::config::with_config(|cfg| cfg.webserver.websocket.buffer_size);
    let (mut outbound_rx, epoch) = session.attach_connection(buffer_size);
    state.hub_metrics.connection_opened();

    let welcome = ServerFrame::Welcome {
        client_id: client_id.clone(),
        proto: PROTOCOL_VERSION,
        last_ack_version: session.last_ack_version(),
    };
    if send_frame(&mut ws_tx, &state, welcome).await.is_err() {
        cleanup(&state, &session, epoch);
        return;
    }

    let health_config = crate::config::with_config(|cfg| {
        HealthConfig::from_config(
            cfg.webserver.websocket.heartbeat_secs,
            cfg.webserver.websocket.client_idle_timeout_secs,
        )
    });
    let mut health = ConnectionHealth::new(health_config);

    if is_debug_webserver_enabled() {
        logger::debug(
            LogTag::Webserver,
            &format!("Connection started for client {}", client_id),
        );
    }

    // Main message loop
    loop {
        tokio::select! {
            biased;

            // Delivered events from the session channel
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(message) => {
                        if forward_outbound(&mut ws_tx, &state, message).await.is_err() {
                            break;
                        }
                    }
                    // A newer connection replaced this one
                    None => break,
                }
            }

            // Frames from the client
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        health.record_activity();
                        if let Err(e) = handle_client_frame(&text, &mut ws_tx, &state, &session).await {
                            logger::warning(
                                LogTag::Webserver,
                                &format!("Client {}: frame handling failed: {}", client_id, e),
                            );
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        health.record_activity();
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        if is_debug_webserver_enabled() {
                            logger::debug(
                                LogTag::Webserver,
                                &format!("Client {} closed the connection", client_id),
                            );
                        }
                        break;
                    }
                    Some(Err(e)) => {
                        logger::warning(
                            LogTag::Webserver,
                            &format!("Client {}: websocket error: {}", client_id, e),
                        );
                        break;
                    }
                    _ => {}
                }
            }

            // Health checks
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                if health.is_idle() {
                    logger::warning(
                        LogTag::Webserver,
                        &format!(
                            "Client {}: idle timeout ({}s)",
                            client_id,
                            health.seconds_since_activity()
                        ),
                    );
                    break;
                }

                if health.is_pong_overdue() {
                    logger::warning(
                        LogTag::Webserver,
                        &format!("Client {}: pong timeout", client_id),
                    );
                    break;
                }

                if health.needs_ping() {
                    if ws_tx.send(Message::Ping(vec![])).await.is_err() {
                        break;
                    }
                    health.record_ping();
                }
            }
        }
    }

    cleanup(&state, &session, epoch);

    if is_debug_webserver_enabled() {
        logger::debug(
            LogTag::Webserver,
            &format!("Connection closed for client {}", client_id),
        );
    }
}

/// Wait for the hello frame and resolve the session
async fn await_handshake(
    ws_tx: &mut WsSink,
    ws_rx: &mut futures::stream::SplitStream<WebSocket>,
    state: &Arc<AppState>,
) -> Option<Arc<ClientSession>> {
    let first = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
        loop {
            match ws_rx.next().await {
                Some(Ok(Message::Text(text))) => return Some(text),
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Ok(_)) => continue,
                Some(Err(_)) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()?;

    let frame: ClientFrame = match serde_json::from_str(&first) {
        Ok(frame) => frame,
        Err(e) => {
            let _ = send_frame(
                ws_tx,
                state,
                ServerFrame::Error {
                    code: "protocol_error".to_string(),
                    message: format!("invalid handshake frame: {}", e),
                },
            )
            .await;
            return None;
        }
    };

    match frame {
        ClientFrame::Hello { client_id, proto } => {
            if let Some(proto) = proto {
                if proto != PROTOCOL_VERSION {
                    let _ = send_frame(
                        ws_tx,
                        state,
                        ServerFrame::Error {
                            code: "protocol_error".to_string(),
                            message: format!(
                                "protocol version {} unsupported (server speaks {})",
                                proto, PROTOCOL_VERSION
                            ),
                        },
                    )
                    .await;
                    return None;
                }
            }

            let (session, created) = state.router.sessions().handshake(client_id);
            if is_debug_webserver_enabled() {
                logger::debug(
                    LogTag::Session,
                    &format!(
                        "Handshake for client {} ({})",
                        session.client_id,
                        if created { "new session" } else { "resumed" }
                    ),
                );
            }
            Some(session)
        }
        _ => {
            let _ = send_frame(
                ws_tx,
                state,
                ServerFrame::Error {
                    code: "protocol_error".to_string(),
                    message: "expected hello as the first frame".to_string(),
                },
            )
            .await;
            None
        }
    }
}

/// Handle one parsed client frame
async fn handle_client_frame(
    text: &str,
    ws_tx: &mut WsSink,
    state: &Arc<AppState>,
    session: &Arc<ClientSession>,
) -> Result<(), String> {
    let frame: ClientFrame =
        serde_json::from_str(text).map_err(|e| format!("invalid frame: {}", e))?;
    let router = &state.router;
    let client_id = &session.client_id;

    match frame {
        ClientFrame::Hello { .. } => {
            send_frame(
                ws_tx,
                state,
                ServerFrame::Error {
                    code: "protocol_error".to_string(),
                    message: "already connected".to_string(),
                },
            )
            .await?;
        }

        ClientFrame::Publish {
            topic,
            payload,
            priority,
            source,
            correlation_id,
            depth,
        } => {
            let request = PublishRequest {
                topic,
                payload,
                priority,
                source: source.or_else(|| Some(client_id.clone())),
                correlation_id,
                depth,
            };

            let reply = match router.publish(request).await {
                Ok(receipt) => ServerFrame::Published {
                    event_id: receipt.event_id,
                    version: receipt.version,
                },
                Err(e) => ServerFrame::error(&e),
            };
            send_frame(ws_tx, state, reply).await?;
        }

        ClientFrame::Subscribe {
            pattern,
            filter,
            priority_filter,
            durable,
        } => {
            let reply = match router.subscribe(
                client_id.clone(),
                pattern,
                filter,
                parse_priority_filter(priority_filter),
                durable,
            ) {
                Ok(subscription) => ServerFrame::Subscribed {
                    subscription_id: subscription.subscription_id.clone(),
                },
                Err(e) => ServerFrame::error(&e),
            };
            send_frame(ws_tx, state, reply).await?;
        }

        ClientFrame::Unsubscribe { subscription_id } => {
            let reply = match router.unsubscribe(&subscription_id) {
                Ok(()) => ServerFrame::Unsubscribed { subscription_id },
                Err(e) => ServerFrame::error(&e),
            };
            send_frame(ws_tx, state, reply).await?;
        }

        ClientFrame::Ack { event_id } => {
            router.ack(client_id, &event_id);
        }

        ClientFrame::Replay { from_version } => {
            handle_replay(ws_tx, state, session, from_version).await?;
        }

        ClientFrame::Heartbeat => {
            send_frame(ws_tx, state, ServerFrame::HeartbeatAck).await?;
        }
    }

    Ok(())
}

/// Stream stored events above `from_version` to the client, ahead of live
/// delivery (live events keep queueing on the session channel meanwhile).
async fn handle_replay(
    ws_tx: &mut WsSink,
    state: &Arc<AppState>,
    session: &Arc<ClientSession>,
    from_version: u64,
) -> Result<(), String> {
    let client_id = &session.client_id;

    let replayed = match state.router.replay_for_client(client_id, from_version, None) {
        Ok(replayed) => replayed,
        Err(e) => {
            send_frame(ws_tx, state, ServerFrame::error(&e)).await?;
            return Ok(());
        }
    };

    let delivered = replayed.len();
    for (event, subscription_id) in replayed {
        send_frame(
            ws_tx,
            state,
            ServerFrame::Event {
                subscription_id,
                event,
                replay: true,
            },
        )
        .await?;
    }

    if is_debug_webserver_enabled() {
        logger::debug(
            LogTag::Webserver,
            &format!(
                "Replayed {} events to client {} (from version {})",
                delivered, client_id, from_version
            ),
        );
    }

    send_frame(ws_tx, state, ServerFrame::ReplayComplete { delivered }).await
}

/// Convert a delivery-engine message into a frame and send it
async fn forward_outbound(
    ws_tx: &mut WsSink,
    state: &Arc<AppState>,
    message: OutboundMessage,
) -> Result<(), String> {
    let frame = match message {
        OutboundMessage::Event {
            event,
            subscription_id,
            replay,
        } => ServerFrame::Event {
            subscription_id,
            event,
            replay,
        },
        OutboundMessage::ReplayComplete { delivered } => ServerFrame::ReplayComplete { delivered },
    };

    send_frame(ws_tx, state, frame).await
}

/// Serialize and send one frame
async fn send_frame(
    ws_tx: &mut WsSink,
    state: &Arc<AppState>,
    frame: ServerFrame,
) -> Result<(), String> {
    let json = frame
        .to_json()
        .map_err(|e| format!("serialization error: {}", e))?;

    match ws_tx.send(Message::Text(json)).await {
        Ok(()) => {
            state.hub_metrics.frame_sent();
            Ok(())
        }
        Err(e) => {
            state.hub_metrics.frame_dropped();
            Err(format!("send error: {}", e))
        }
    }
}

/// Detach the session and drop non-durable subscriptions. A connection
/// superseded by a reconnect leaves the session (and its subscriptions)
/// alone.
fn cleanup(state: &Arc<AppState>, session: &Arc<ClientSession>, epoch: u64) {
    state.hub_metrics.connection_closed();

    if !session.detach_connection(epoch) {
        return;
    }

    let removed = state.router.registry().remove_non_durable(&session.client_id);
    if removed > 0 && is_debug_webserver_enabled() {
        logger::debug(
            LogTag::Session,
            &format!(
                "Dropped {} non-durable subscriptions for client {}",
                removed, session.client_id
            ),
        );
    }
}
