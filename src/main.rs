use duet::prediction::UiMessage;
use duet::{
    KeyEvent, KeySink, MidiKeyboard, MidiOutputSink, SessionBus, SessionClock, SessionCommand,
    SessionConfig, SessionUpdate, spawn_session,
};
use std::error::Error;
use std::io::{self, BufRead};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

struct LogKeys;

impl KeySink for LogKeys {
    fn key_down(&mut self, key: &KeyEvent) {
        debug!(pitch = key.pitch, time = key.time, instrument = ?key.instrument, "key down");
    }

    fn key_up(&mut self, key: &KeyEvent) {
        debug!(pitch = key.pitch, time = key.time, instrument = ?key.instrument, "key up");
    }
}

/// `save`, `quit`, or a UI message name followed by its payload text.
fn parse_line(line: &str) -> Option<SessionCommand> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    match word {
        "save" => Some(SessionCommand::SaveMidi),
        "quit" | "exit" => Some(SessionCommand::Shutdown),
        name => UiMessage::from_name(name).map(|message| SessionCommand::SendUi {
            message,
            payload: message.payload_from_text(rest.trim()),
        }),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => SessionConfig::load(&PathBuf::from(path))?,
        None => SessionConfig::default(),
    };

    let mut bus = SessionBus::new().with_key_sink(LogKeys);
    let clock = SessionClock::new();
    if let Some(filter) = &config.midi_output {
        match MidiOutputSink::connect(filter, clock) {
            Ok(sink) => bus = bus.with_key_sink(sink),
            Err(e) => warn!("MIDI output unavailable: {}", e),
        }
    }

    let midi_input = config.midi_input.clone();
    let session = spawn_session(config, clock, bus)?;

    let _keyboard = match MidiKeyboard::connect(midi_input.as_deref(), session.command_tx.clone()) {
        Ok(keyboard) => Some(keyboard),
        Err(e) => {
            warn!("no MIDI keyboard: {}", e);
            None
        }
    };

    let update_rx = session.update_rx.clone();
    std::thread::spawn(move || {
        for update in update_rx {
            match update {
                SessionUpdate::Error { message } => error!("{}", message),
                SessionUpdate::MidiSaved { path } => info!("saved {}", path.display()),
                update => info!(?update, "session"),
            }
        }
    });

    for line in io::stdin().lock().lines() {
        let line = line?;
        let Some(command) = parse_line(&line) else {
            if !line.trim().is_empty() {
                warn!("unknown command: {}", line.trim());
            }
            continue;
        };
        let quit = matches!(command, SessionCommand::Shutdown);
        if session.command_tx.send(command).is_err() || quit {
            break;
        }
    }

    let _ = session.command_tx.send(SessionCommand::Shutdown);
    Ok(())
}
