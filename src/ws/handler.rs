//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::rpc::{Command, RpcSender};
use crate::game::session::log_rejection;
use crate::game::{InputAuthority, MatchHandle, SyncError, Vec3};
use crate::http::middleware::{verify_ticket, TicketClaims};
use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Signed join ticket
    pub ticket: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    // Verify the ticket before upgrading
    match verify_ticket(&query.ticket, &state.config.session_secret) {
        Ok(claims) => {
            info!(user_id = %claims.sub, "WebSocket upgrade for ticket holder");
            ws.on_upgrade(move |socket| handle_socket(socket, claims, state))
        }
        Err(e) => {
            warn!(error = %e, "WebSocket auth failed");
            e.into_response()
        }
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, claims: TicketClaims, state: AppState) {
    let user_id = claims.sub;
    info!(user_id = %user_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        user_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(user_id = %user_id, error = %e, "Failed to send welcome");
        return;
    }

    let outcome = match state.matchmaking.join(user_id, claims.name).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(user_id = %user_id, error = %err, "Matchmaking failed");
            let _ = send_msg(&mut ws_sink, &ServerMsg::error(err.code(), err.to_string())).await;
            return;
        }
    };

    let Some(handle) = state.match_registry.get(&outcome.match_id) else {
        // Match closed between placement and lookup
        state.matchmaking.leave(user_id);
        let err = SyncError::StaleCommand("match is closed");
        let _ = send_msg(&mut ws_sink, &ServerMsg::error(err.code(), err.to_string())).await;
        return;
    };

    if let Err(e) = send_msg(&mut ws_sink, &outcome.welcome).await {
        debug!(user_id = %user_id, error = %e, "Failed to send match state");
    }

    let session = Session {
        user_id,
        handle,
        authority: outcome.authority,
        rpc: outcome.rpc,
    };
    let reason = session.run(ws_sink, ws_stream, outcome.events).await;

    // Cleanup on disconnect
    session
        .handle
        .leave(session.authority.clone(), reason)
        .await;
    state.matchmaking.leave(user_id);

    info!(user_id = %user_id, reason, "WebSocket connection closed");
}

/// One participant's connection to its match
struct Session {
    user_id: Uuid,
    handle: MatchHandle,
    authority: InputAuthority,
    rpc: RpcSender,
}

impl Session {
    /// Pump messages until the socket or the match goes away; returns the
    /// leave reason
    async fn run(
        &self,
        mut ws_sink: SplitSink<WebSocket, Message>,
        mut ws_stream: futures::stream::SplitStream<WebSocket>,
        mut events: broadcast::Receiver<ServerMsg>,
    ) -> &'static str {
        let rate_limiter = PlayerRateLimiter::new();
        let (direct_tx, mut direct_rx) = mpsc::channel::<ServerMsg>(32);

        // Writer task: match events and direct replies -> WebSocket
        let writer_user_id = self.user_id;
        let mut writer_handle = tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    event = events.recv() => match event {
                        Ok(msg) => msg,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(user_id = %writer_user_id, lagged_count = n, "Client lagged, skipping events");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!(user_id = %writer_user_id, "Match channel closed");
                            break;
                        }
                    },
                    Some(msg) = direct_rx.recv() => msg,
                };

                if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                    debug!(user_id = %writer_user_id, error = %e, "WebSocket send failed");
                    break;
                }
            }
        });

        // Reader loop: WebSocket -> match
        let reason = loop {
            let result = tokio::select! {
                next = ws_stream.next() => match next {
                    Some(result) => result,
                    None => break "disconnected",
                },
                _ = &mut writer_handle => break "match closed",
            };

            match result {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(ClientMsg::LeaveMatch) => break "left",
                    Ok(msg) => self.dispatch(msg, &rate_limiter, &direct_tx),
                    Err(e) => {
                        warn!(user_id = %self.user_id, error = %e, "Failed to parse client message");
                        let _ = direct_tx.try_send(ServerMsg::error("malformed", e.to_string()));
                    }
                },
                Ok(Message::Binary(_)) => {
                    warn!(user_id = %self.user_id, "Received binary message, ignoring");
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => {
                    info!(user_id = %self.user_id, "Client initiated close");
                    break "disconnected";
                }
                Err(e) => {
                    error!(user_id = %self.user_id, error = %e, "WebSocket error");
                    break "connection error";
                }
            }
        };

        writer_handle.abort();
        reason
    }

    fn dispatch(
        &self,
        msg: ClientMsg,
        rate_limiter: &PlayerRateLimiter,
        direct_tx: &mpsc::Sender<ServerMsg>,
    ) {
        let result = match msg {
            ClientMsg::Input {
                seq,
                intent,
                pose,
                velocity,
            } => {
                if !rate_limiter.check_input() {
                    debug!(user_id = %self.user_id, "Rate limited input message");
                    return;
                }
                let reported = pose.map(|p| (p, velocity.unwrap_or(Vec3::ZERO)));
                if let Err(err) = self
                    .handle
                    .submit_input(&self.authority, seq, intent, reported)
                {
                    log_rejection(self.handle.id, &err, "input");
                }
                return;
            }
            ClientMsg::RequestDamage {
                target,
                amount,
                attacker,
            } => {
                if !rate_limiter.check_command() {
                    warn!(user_id = %self.user_id, "Rate limited damage call");
                    return;
                }
                self.rpc.send(
                    &self.authority,
                    Command::RequestDamage {
                        target,
                        amount,
                        attacker,
                    },
                )
            }
            ClientMsg::RequestWeaponChange { tier } => {
                if !rate_limiter.check_command() {
                    warn!(user_id = %self.user_id, "Rate limited weapon call");
                    return;
                }
                self.rpc.send(
                    &self.authority,
                    Command::RequestWeaponChange {
                        player: self.authority.player_id(),
                        tier,
                    },
                )
            }
            ClientMsg::Ping { t } => {
                let _ = direct_tx.try_send(ServerMsg::Pong { t });
                return;
            }
            ClientMsg::LeaveMatch => return,
        };

        if let Err(err) = result {
            log_rejection(self.handle.id, &err, "rpc");
            let _ = direct_tx.try_send(ServerMsg::error(err.code(), err.to_string()));
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
