use crate::bus::SessionBus;
use crate::clock::SessionClock;
use crate::config::{SessionConfig, TransportMode};
use crate::prediction::{
    ClientEvent, HttpPredictor, PredictionClient, Predictor, RequestTransport, Transport,
    TransportError, UiMessage, connect_stream,
};
use crate::session::Session;
use crossbeam::channel::{Receiver, Sender};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Upper bound on how long the loop sleeps when no flush is pending.
const IDLE_WAIT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub enum SessionCommand {
    KeyDown { pitch: u8, velocity: u8 },
    KeyUp { pitch: u8 },
    SendUi { message: UiMessage, payload: Value },
    SaveMidi,
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum SessionUpdate {
    PhraseSent { notes: usize, duration: f64 },
    Predicted { accepted: usize, discarded: usize },
    ModelList(Value),
    ModelAdded(Value),
    UiConfig(Value),
    MidiSaved { path: PathBuf },
    Disconnected { reason: String },
    Error { message: String },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to connect to predictor: {0}")]
    Transport(#[from] TransportError),
    #[error("failed to start session thread: {0}")]
    Thread(#[from] std::io::Error),
}

pub struct SessionHandle {
    pub command_tx: Sender<SessionCommand>,
    pub update_rx: Receiver<SessionUpdate>,
    pub clock: SessionClock,
}

/// Starts the session thread. Sinks on `bus` that schedule output must
/// share `clock` with the session.
pub fn spawn_session(
    config: SessionConfig,
    clock: SessionClock,
    bus: SessionBus,
) -> Result<SessionHandle, SessionError> {
    let predictor = HttpPredictor::new(config.predictor_url.clone(), config.request_timeout());
    spawn_session_with(config, clock, bus, Arc::new(predictor))
}

/// Same as `spawn_session` with the request/response predictor supplied.
pub fn spawn_session_with(
    config: SessionConfig,
    clock: SessionClock,
    mut bus: SessionBus,
    predictor: Arc<dyn Predictor>,
) -> Result<SessionHandle, SessionError> {
    let (command_tx, command_rx) = crossbeam::channel::unbounded();
    let (update_tx, update_rx) = crossbeam::channel::unbounded();
    let (client_tx, client_rx) = crossbeam::channel::unbounded();

    let transport = match config.mode {
        TransportMode::Request => {
            Transport::Request(RequestTransport::new(predictor, client_tx.clone()))
        }
        TransportMode::Streaming => {
            Transport::Stream(connect_stream(&config.stream_url, client_tx.clone())?)
        }
    };

    let mut client = PredictionClient::new(transport, &config);
    if client.is_streaming() {
        // the predictor keeps per-client note state
        client.send_ui(UiMessage::Reload, json!({}));
    }

    bus.set_updates(update_tx);
    let session = Session::new(&config, client, bus);

    std::thread::Builder::new()
        .name("duet-session".into())
        .spawn(move || {
            session_thread(session, clock, command_rx, client_rx);
        })?;

    info!(mode = ?config.mode, "session started");
    Ok(SessionHandle {
        command_tx,
        update_rx,
        clock,
    })
}

fn session_thread(
    mut session: Session,
    clock: SessionClock,
    command_rx: Receiver<SessionCommand>,
    mut client_rx: Receiver<ClientEvent>,
) {
    loop {
        let timeout = session
            .next_deadline()
            .map_or(IDLE_WAIT, |deadline| clock.until(deadline).min(IDLE_WAIT));

        let mut transports_gone = false;
        crossbeam::select! {
            recv(command_rx) -> command => match command {
                Ok(SessionCommand::Shutdown) | Err(_) => break,
                Ok(command) => apply_command(&mut session, command, clock.now()),
            },
            recv(client_rx) -> event => match event {
                Ok(event) => session.handle_client_event(event, clock.now()),
                Err(_) => transports_gone = true,
            },
            default(timeout) => {},
        }

        if transports_gone {
            // a disconnected receiver is always ready; keep serving commands
            debug!("no transport left, waiting on commands only");
            client_rx = crossbeam::channel::never();
        }

        session.poll(clock.now());
    }

    info!("session stopped");
}

fn apply_command(session: &mut Session, command: SessionCommand, now: f64) {
    match command {
        SessionCommand::KeyDown { pitch, velocity } => session.key_down(pitch, velocity, now),
        SessionCommand::KeyUp { pitch } => session.key_up(pitch, now),
        SessionCommand::SendUi { message, payload } => session.send_ui(message, payload),
        SessionCommand::SaveMidi => match session.save_midi() {
            Ok(path) => session.publish(SessionUpdate::MidiSaved { path }),
            Err(e) => {
                warn!("failed to save MIDI: {}", e);
                session.publish(SessionUpdate::Error {
                    message: format!("Failed to save MIDI: {}", e),
                });
            }
        },
        SessionCommand::Shutdown => {}
    }
}
