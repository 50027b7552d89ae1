use crate::bus::KeySink;
use crate::clock::SessionClock;
use crate::engine::SessionCommand;
use crate::events::KeyEvent;
use crate::recording::TrackKind;
use crossbeam::channel::Sender;
use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Producer, Split},
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const QUEUE_CAPACITY: usize = 4096;
const DISPATCH_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum MidiError {
    #[error("failed to initialise MIDI: {0}")]
    Init(#[from] midir::InitError),
    #[error("no MIDI {0} port matches")]
    NoPort(&'static str),
    #[error("failed to connect MIDI port: {0}")]
    Connect(String),
    #[error("failed to start MIDI dispatch: {0}")]
    Thread(#[from] std::io::Error),
}

/// Turns a raw channel message into a player key command.
pub fn parse_message(msg: &[u8]) -> Option<SessionCommand> {
    let status = msg.first()? & 0xF0;
    match (status, msg.get(1), msg.get(2)) {
        (0x90, Some(&pitch), Some(&velocity)) if velocity > 0 => {
            Some(SessionCommand::KeyDown { pitch, velocity })
        }
        (0x80 | 0x90, Some(&pitch), _) => Some(SessionCommand::KeyUp { pitch }),
        _ => None,
    }
}

fn pick_port<'a, P>(
    ports: &'a [P],
    name_of: impl Fn(&P) -> String,
    filter: Option<&str>,
) -> Option<&'a P> {
    match filter {
        Some(filter) => ports.iter().find(|p| name_of(p).contains(filter)),
        None => ports.first(),
    }
}

/// Hardware keyboard feeding player keys into the session.
pub struct MidiKeyboard {
    _connection: MidiInputConnection<()>,
    port_name: String,
}

impl MidiKeyboard {
    /// Uses the first port whose name contains `filter`, else the first port.
    pub fn connect(filter: Option<&str>, commands: Sender<SessionCommand>) -> Result<Self, MidiError> {
        let midi_in = MidiInput::new("duet")?;
        let ports = midi_in.ports();
        let name_of = |p: &midir::MidiInputPort| midi_in.port_name(p).unwrap_or_default();
        let port = pick_port(&ports, name_of, filter)
            .or_else(|| ports.first())
            .ok_or(MidiError::NoPort("input"))?;
        let port_name = name_of(port);

        let connection = midi_in
            .connect(
                port,
                "duet-input",
                move |_, message, _| {
                    if let Some(command) = parse_message(message) {
                        let _ = commands.send(command);
                    }
                },
                (),
            )
            .map_err(|e| MidiError::Connect(e.to_string()))?;

        info!(port = %port_name, "MIDI input connected");
        Ok(Self {
            _connection: connection,
            port_name,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[derive(Debug, Clone, Copy)]
struct ScheduledMessage {
    time: f64,
    bytes: [u8; 3],
}

fn channel_message(key: &KeyEvent, on: bool) -> ScheduledMessage {
    let channel = TrackKind::for_code(key.instrument.code()).midi_channel();
    let bytes = if on {
        [0x90 | channel, key.pitch & 0x7F, key.velocity.clamp(1, 127)]
    } else {
        [0x80 | channel, key.pitch & 0x7F, 0]
    };
    ScheduledMessage {
        time: key.time,
        bytes,
    }
}

/// Echoes AI notes to a hardware port at their scheduled times.
pub struct MidiOutputSink {
    producer: HeapProd<ScheduledMessage>,
    running: Arc<AtomicBool>,
}

impl MidiOutputSink {
    pub fn connect(filter: &str, clock: SessionClock) -> Result<Self, MidiError> {
        let midi_out = MidiOutput::new("duet")?;
        let ports = midi_out.ports();
        let port = pick_port(
            &ports,
            |p| midi_out.port_name(p).unwrap_or_default(),
            Some(filter),
        )
        .ok_or(MidiError::NoPort("output"))?
        .clone();
        let port_name = midi_out.port_name(&port).unwrap_or_default();

        let connection = midi_out
            .connect(&port, "duet-output")
            .map_err(|e| MidiError::Connect(e.to_string()))?;

        let ring_buffer = HeapRb::<ScheduledMessage>::new(QUEUE_CAPACITY);
        let (producer, consumer) = ring_buffer.split();
        let running = Arc::new(AtomicBool::new(true));
        let running_dispatch = running.clone();

        thread::Builder::new()
            .name("midi-dispatch".into())
            .spawn(move || dispatch_thread(consumer, connection, clock, running_dispatch))?;

        info!(port = %port_name, "MIDI output connected");
        Ok(Self { producer, running })
    }

    fn push(&mut self, message: ScheduledMessage) {
        if self.producer.try_push(message).is_err() {
            warn!("MIDI output queue is full, dropping message");
        }
    }
}

impl KeySink for MidiOutputSink {
    fn key_down(&mut self, key: &KeyEvent) {
        if key.is_ai() {
            self.push(channel_message(key, true));
        }
    }

    fn key_up(&mut self, key: &KeyEvent) {
        if key.is_ai() {
            self.push(channel_message(key, false));
        }
    }
}

impl Drop for MidiOutputSink {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

fn dispatch_thread(
    mut consumer: HeapCons<ScheduledMessage>,
    mut connection: MidiOutputConnection,
    clock: SessionClock,
    running: Arc<AtomicBool>,
) {
    let mut pending: Vec<ScheduledMessage> = Vec::with_capacity(256);

    while running.load(Ordering::Relaxed) {
        let before = pending.len();
        while let Some(message) = consumer.try_pop() {
            pending.push(message);
        }
        if pending.len() != before {
            // stable: an on keeps its place before an off at the same time
            pending.sort_by(|a, b| a.time.total_cmp(&b.time));
        }

        let now = clock.now();
        let due = pending.partition_point(|m| m.time <= now);
        for message in pending.drain(..due) {
            if let Err(e) = connection.send(&message.bytes) {
                warn!("MIDI send failed: {}", e);
            }
        }

        thread::sleep(DISPATCH_INTERVAL);
    }

    connection.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Instrument, Source};

    #[test]
    fn parses_note_messages() {
        assert!(matches!(
            parse_message(&[0x90, 60, 100]),
            Some(SessionCommand::KeyDown {
                pitch: 60,
                velocity: 100
            })
        ));
        assert!(matches!(
            parse_message(&[0x93, 61, 0]),
            Some(SessionCommand::KeyUp { pitch: 61 })
        ));
        assert!(matches!(
            parse_message(&[0x80, 62, 40]),
            Some(SessionCommand::KeyUp { pitch: 62 })
        ));
        assert!(parse_message(&[0xB0, 7, 127]).is_none());
        assert!(parse_message(&[]).is_none());
        assert!(parse_message(&[0x90]).is_none());
    }

    #[test]
    fn ai_notes_use_their_track_channel() {
        let key = KeyEvent {
            pitch: 36,
            time: 1.0,
            instrument: Instrument::Drums,
            velocity: 90,
            source: Source::Ai,
        };
        assert_eq!(channel_message(&key, true).bytes, [0x99, 36, 90]);
        assert_eq!(channel_message(&key, false).bytes, [0x89, 36, 0]);
    }

    #[test]
    fn port_filter_matches_substring() {
        let ports = vec!["IAC Bus 1".to_string(), "APC Mini".to_string()];
        let name_of = |p: &String| p.clone();
        assert_eq!(pick_port(&ports, name_of, Some("APC")), Some(&ports[1]));
        assert_eq!(pick_port(&ports, name_of, None), Some(&ports[0]));
        assert_eq!(pick_port(&ports, name_of, Some("Launchpad")), None);
    }
}
