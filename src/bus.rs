use crossbeam::channel::Sender;

use crate::engine::SessionUpdate;
use crate::events::{Instrument, KeyEvent, Source};
use crate::prediction::ScheduledNote;

/// Anything that renders key transitions: sound, on-screen keys, MIDI out.
pub trait KeySink: Send {
    fn key_down(&mut self, key: &KeyEvent);
    fn key_up(&mut self, key: &KeyEvent);
}

/// Visual activity pulses.
pub trait GlowSink: Send {
    fn user(&mut self);
    fn ai(&mut self, time: f64);
}

/// Fans player input, AI output and status updates out to collaborators.
#[derive(Default)]
pub struct SessionBus {
    key_sinks: Vec<Box<dyn KeySink>>,
    glow_sinks: Vec<Box<dyn GlowSink>>,
    updates: Option<Sender<SessionUpdate>>,
}

impl SessionBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_sink(mut self, sink: impl KeySink + 'static) -> Self {
        self.key_sinks.push(Box::new(sink));
        self
    }

    pub fn with_glow_sink(mut self, sink: impl GlowSink + 'static) -> Self {
        self.glow_sinks.push(Box::new(sink));
        self
    }

    pub fn set_updates(&mut self, updates: Sender<SessionUpdate>) {
        self.updates = Some(updates);
    }

    pub fn player_key_down(&mut self, pitch: u8, velocity: u8, time: f64) {
        let key = KeyEvent {
            pitch,
            time,
            instrument: Instrument::Player,
            velocity,
            source: Source::Player,
        };
        for sink in &mut self.key_sinks {
            sink.key_down(&key);
        }
        for glow in &mut self.glow_sinks {
            glow.user();
        }
    }

    pub fn player_key_up(&mut self, pitch: u8, velocity: u8, time: f64) {
        let key = KeyEvent {
            pitch,
            time,
            instrument: Instrument::Player,
            velocity,
            source: Source::Player,
        };
        for sink in &mut self.key_sinks {
            sink.key_up(&key);
        }
        for glow in &mut self.glow_sinks {
            glow.user();
        }
    }

    /// Both transitions of a predicted note, stamped with their future times.
    pub fn ai_note(&mut self, note: &ScheduledNote) {
        let down = KeyEvent {
            pitch: note.pitch,
            time: note.start,
            instrument: note.instrument,
            velocity: note.velocity,
            source: Source::Ai,
        };
        let up = KeyEvent {
            time: note.end,
            ..down
        };

        for sink in &mut self.key_sinks {
            sink.key_down(&down);
        }
        for glow in &mut self.glow_sinks {
            glow.ai(down.time);
        }
        for sink in &mut self.key_sinks {
            sink.key_up(&up);
        }
        for glow in &mut self.glow_sinks {
            glow.ai(up.time);
        }
    }

    pub fn publish(&self, update: SessionUpdate) {
        if let Some(updates) = &self.updates {
            let _ = updates.send(update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{Sender, unbounded};

    struct ChannelKeys(Sender<(bool, KeyEvent)>);

    impl KeySink for ChannelKeys {
        fn key_down(&mut self, key: &KeyEvent) {
            let _ = self.0.send((true, *key));
        }

        fn key_up(&mut self, key: &KeyEvent) {
            let _ = self.0.send((false, *key));
        }
    }

    struct ChannelGlow(Sender<Option<f64>>);

    impl GlowSink for ChannelGlow {
        fn user(&mut self) {
            let _ = self.0.send(None);
        }

        fn ai(&mut self, time: f64) {
            let _ = self.0.send(Some(time));
        }
    }

    #[test]
    fn ai_note_fans_out_both_transitions() {
        let (keys_tx, keys_rx) = unbounded();
        let (glow_tx, glow_rx) = unbounded();
        let mut bus = SessionBus::new()
            .with_key_sink(ChannelKeys(keys_tx))
            .with_glow_sink(ChannelGlow(glow_tx));

        bus.ai_note(&ScheduledNote {
            pitch: 62,
            velocity: 80,
            instrument: Instrument::Ai1,
            start: 3.0,
            end: 3.5,
        });

        let (down, key) = keys_rx.try_recv().unwrap();
        assert!(down && key.is_ai() && key.time == 3.0);
        let (down, key) = keys_rx.try_recv().unwrap();
        assert!(!down && key.time == 3.5 && key.instrument == Instrument::Ai1);
        assert_eq!(glow_rx.try_iter().collect::<Vec<_>>(), vec![Some(3.0), Some(3.5)]);
    }

    #[test]
    fn player_keys_pulse_user_glow() {
        let (glow_tx, glow_rx) = unbounded();
        let mut bus = SessionBus::new().with_glow_sink(ChannelGlow(glow_tx));
        bus.player_key_down(60, 100, 0.0);
        bus.player_key_up(60, 100, 0.5);
        assert_eq!(glow_rx.try_iter().collect::<Vec<_>>(), vec![None, None]);
    }
}
