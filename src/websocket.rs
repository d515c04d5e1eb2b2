//! # WebSocket Speech Streaming Handler
//!
//! Handles the live interview connection: `GET /ws/speech/{session_id}`
//! upgrades to a WebSocket that multiplexes JSON control messages and binary
//! audio frames for one session.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: Client connects with its session id in the path
//! 2. **Per question**: `start_question` -> binary frames -> `end_question`
//! 3. **Finalization**: At each question boundary the server converts,
//!    transcribes, and scores the buffered audio, then answers `question_ended`
//! 4. **Session end**: `end_session` persists the aggregate -> `session_ended`
//!
//! ## Actor Model:
//! Each connection is an independent Actix actor owning one [`StreamSession`]
//! state machine. The actor mailbox serializes all events for a connection,
//! which is exactly the ordering guarantee the machine needs. Blocking
//! pipeline work runs on spawned tasks and comes back as actor messages, so
//! a slow transcription never stalls other connections.

use crate::error::AppError;
use crate::protocol::ClientMessage;
use crate::session::{Effect, FinalizedQuestion, RegistryError, SessionLimits, StreamSession, Transition};
use crate::state::AppState;
use crate::storage::is_valid_session_id;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How often the server probes an idle client.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Silence threshold after which the connection is considered dead.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// WebSocket actor for one interview session.
pub struct SpeechWebSocket {
    /// The per-connection state machine
    machine: StreamSession,

    /// Shared application state (pipeline, store, registry)
    app_state: web::Data<AppState>,

    /// Last moment the client showed signs of life
    last_heartbeat: Instant,
}

impl SpeechWebSocket {
    fn new(session_id: String, app_state: web::Data<AppState>) -> Self {
        let config = app_state.get_config();
        let limits = SessionLimits {
            max_question_bytes: config.audio.max_question_bytes,
            pending_grace: Duration::from_millis(config.audio.pending_grace_ms),
        };

        Self {
            machine: StreamSession::new(session_id, limits),
            app_state,
            last_heartbeat: Instant::now(),
        }
    }

    /// Send a transition's responses and launch its side effect, if any.
    fn apply_transition(&mut self, transition: Transition, ctx: &mut ws::WebsocketContext<Self>) {
        for response in &transition.responses {
            ctx.text(response.to_json());
        }

        if let Some(effect) = transition.effect {
            self.run_effect(effect, ctx);
        }
    }

    /// Execute a side effect off the actor's event loop. Results come back
    /// through the mailbox, keeping per-connection handling serialized.
    fn run_effect(&mut self, effect: Effect, ctx: &mut ws::WebsocketContext<Self>) {
        let addr = ctx.address();

        match effect {
            Effect::RunFinalization(job) => {
                let pipeline = self.app_state.pipeline.clone();
                tokio::spawn(async move {
                    let outcome = pipeline.run(job).await;
                    addr.do_send(FinalizationDone(outcome));
                });
            }
            Effect::PersistAggregate(aggregate) => {
                let store = self.app_state.store.clone();
                tokio::spawn(async move {
                    let result = store
                        .save(&aggregate.session_id, &aggregate)
                        .await
                        .map_err(|e| e.to_string());
                    addr.do_send(PersistenceDone(result));
                });
            }
        }
    }
}

/// Finalization pipeline outcome, delivered back to the connection's mailbox.
#[derive(Message)]
#[rtype(result = "()")]
struct FinalizationDone(FinalizedQuestion);

/// Persistence result, delivered back to the connection's mailbox.
#[derive(Message)]
#[rtype(result = "()")]
struct PersistenceDone(Result<(), String>);

impl Actor for SpeechWebSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Called when the WebSocket connection starts.
    fn started(&mut self, ctx: &mut Self::Context) {
        info!("WebSocket connected for session '{}'", self.machine.session_id());

        // Greet the client so it knows the session is ready
        ctx.text(self.machine.hello().to_json());

        // Heartbeat: probe idle clients and drop dead connections
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(
                    "Heartbeat timeout for session '{}', closing connection",
                    act.machine.session_id()
                );
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    /// Called when the WebSocket connection stops (normal close or drop).
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Abrupt disconnect policy: discard buffered audio, never persist an
        // aggregate that didn't see end_session.
        self.machine.on_disconnect();
        self.app_state.registry.deregister(self.machine.session_id());
        info!("WebSocket closed for session '{}'", self.machine.session_id());
    }
}

/// Handle incoming WebSocket messages.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for SpeechWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();

                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => {
                        debug!(
                            "Control message for session '{}': {:?}",
                            self.machine.session_id(),
                            message
                        );
                        let transition = self.machine.handle_control(message);
                        self.apply_transition(transition, ctx);
                    }
                    Err(err) => {
                        warn!("Invalid control message: {}", err);
                        let transition = Transition {
                            responses: vec![crate::protocol::ServerMessage::Error {
                                message: format!("Invalid control message: {}", err),
                            }],
                            effect: None,
                        };
                        self.apply_transition(transition, ctx);
                    }
                }
            }
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                let transition = self.machine.handle_frame(&data);
                self.apply_transition(transition, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(
                    "WebSocket close for session '{}': {:?}",
                    self.machine.session_id(),
                    reason
                );
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                // Fragmented frames are not part of this protocol
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(
                    "WebSocket protocol error for session '{}': {}",
                    self.machine.session_id(),
                    err
                );
                ctx.stop();
            }
        }
    }
}

/// Handle finalization outcomes from the pipeline task.
impl Handler<FinalizationDone> for SpeechWebSocket {
    type Result = ();

    fn handle(&mut self, msg: FinalizationDone, ctx: &mut Self::Context) {
        let transition = self.machine.complete_finalization(msg.0);
        self.apply_transition(transition, ctx);
    }
}

/// Handle persistence results from the store task.
impl Handler<PersistenceDone> for SpeechWebSocket {
    type Result = ();

    fn handle(&mut self, msg: PersistenceDone, ctx: &mut Self::Context) {
        let transition = self.machine.complete_persistence(msg.0);
        self.apply_transition(transition, ctx);
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Validates and claims the session id *before* upgrading, so a duplicate
/// connection or a full server is rejected with a proper HTTP status instead
/// of a doomed WebSocket.
pub async fn speech_websocket(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let session_id = path.into_inner();

    info!(
        "New WebSocket connection request for session '{}' from {:?}",
        session_id,
        req.connection_info().peer_addr()
    );

    if !is_valid_session_id(&session_id) {
        return Err(AppError::BadRequest(format!(
            "'{}' is not a valid session id (alphanumeric, '-', '_', '.' only)",
            session_id
        ))
        .into());
    }

    // Claim the id: one live connection per session, bounded overall
    app_state.registry.register(&session_id).map_err(|err| {
        warn!("Rejecting connection for session '{}': {}", session_id, err);
        match err {
            RegistryError::AlreadyConnected(_) => AppError::Conflict(err.to_string()),
            RegistryError::AtCapacity(_) => AppError::Conflict(err.to_string()),
        }
    })?;

    let websocket = SpeechWebSocket::new(session_id.clone(), app_state.clone());

    match ws::start(websocket, &req, stream) {
        Ok(response) => Ok(response),
        Err(err) => {
            // The actor never started, so `stopped` will not release the id
            app_state.registry.deregister(&session_id);
            Err(err)
        }
    }
}
