use std::path::PathBuf;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::bus::SessionBus;
use crate::config::SessionConfig;
use crate::engine::SessionUpdate;
use crate::events::{Instrument, KeyPhase};
use crate::prediction::{
    ClientEvent, InboundMessage, OutboundMessage, PredictedNote, PredictionClient, ScheduleOutcome,
    UiMessage,
};
use crate::recording::{ExportError, MultiTrackRecorder};
use crate::timing::{FlushDecision, PhraseScheduler, TimelineBuffer};

/// Owns every piece of duet state. Time is passed in explicitly so the
/// session can be driven by a real clock or by tests.
pub struct Session {
    timeline: TimelineBuffer,
    scheduler: PhraseScheduler,
    recorder: MultiTrackRecorder,
    client: PredictionClient,
    bus: SessionBus,
    player_velocity: u8,
    export_dir: PathBuf,
}

impl Session {
    pub fn new(config: &SessionConfig, client: PredictionClient, bus: SessionBus) -> Self {
        Self {
            timeline: TimelineBuffer::new(),
            scheduler: PhraseScheduler::new(config.debounce(), config.long_phrase()),
            recorder: MultiTrackRecorder::new(),
            client,
            bus,
            player_velocity: config.player_velocity.min(127),
            export_dir: config.export_dir.clone(),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.client.is_streaming()
    }

    pub fn recorder(&self) -> &MultiTrackRecorder {
        &self.recorder
    }

    pub fn scheduler(&self) -> &PhraseScheduler {
        &self.scheduler
    }

    pub fn timeline(&self) -> &TimelineBuffer {
        &self.timeline
    }

    pub fn watermark(&self) -> f64 {
        self.client.watermark()
    }

    pub fn next_deadline(&self) -> Option<f64> {
        self.scheduler.deadline()
    }

    pub fn key_down(&mut self, pitch: u8, velocity: u8, now: f64) {
        let velocity = velocity.min(127);
        self.bus.player_key_down(pitch, velocity, now);
        self.recorder
            .record(KeyPhase::On, Instrument::PLAYER_CODE, pitch, now, velocity);

        if self.client.is_streaming() {
            self.client.emit(OutboundMessage::KeyDown {
                note: pitch,
                instrument: Instrument::PLAYER_CODE,
                velocity,
            });
            return;
        }

        self.scheduler.key_down(pitch, now);
        self.timeline.note_on(pitch, velocity, now);
    }

    pub fn key_up(&mut self, pitch: u8, now: f64) {
        self.bus.player_key_up(pitch, self.player_velocity, now);
        self.recorder.record(
            KeyPhase::Off,
            Instrument::PLAYER_CODE,
            pitch,
            now,
            self.player_velocity,
        );

        if self.client.is_streaming() {
            self.client.emit(OutboundMessage::KeyUp {
                note: pitch,
                instrument: Instrument::PLAYER_CODE,
            });
            return;
        }

        self.timeline.note_off(pitch, now);
        match self.scheduler.key_up(pitch, now, now) {
            FlushDecision::Flush => {
                debug!("long phrase released, flushing now");
                self.flush();
            }
            FlushDecision::Armed { deadline } => debug!(deadline, "flush armed"),
            FlushDecision::Hold => {}
        }
    }

    /// Fires the debounced flush once its deadline has passed.
    pub fn poll(&mut self, now: f64) {
        if self.scheduler.poll(now) {
            self.flush();
        }
    }

    fn flush(&mut self) {
        let phrase = self.timeline.extract_phrase();
        self.scheduler.flushed();

        if let Some(request) = self.client.send_phrase(&phrase) {
            self.bus.publish(SessionUpdate::PhraseSent {
                notes: request.notes.len(),
                duration: request.duration,
            });
        }
    }

    pub fn handle_client_event(&mut self, event: ClientEvent, now: f64) {
        match event {
            ClientEvent::Predicted(Ok(notes)) => {
                self.play_predictions(notes, now);
            }
            ClientEvent::Predicted(Err(e)) => {
                warn!("no AI response this round: {}", e);
                self.bus.publish(SessionUpdate::Error {
                    message: e.to_string(),
                });
            }
            ClientEvent::Inbound(InboundMessage::Predicted { kind, notes }) => {
                debug!(?kind, notes = notes.len(), "prediction pushed");
                self.play_predictions(notes, now);
            }
            ClientEvent::Inbound(InboundMessage::ModelList(list)) => {
                self.bus.publish(SessionUpdate::ModelList(list));
            }
            ClientEvent::Inbound(InboundMessage::ModelAdded(name)) => {
                self.bus.publish(SessionUpdate::ModelAdded(name));
            }
            ClientEvent::Inbound(InboundMessage::UiConfig(config)) => {
                self.bus.publish(SessionUpdate::UiConfig(config));
            }
            ClientEvent::Inbound(InboundMessage::Diagnostic(message)) => {
                info!(%message, "predictor says");
            }
            ClientEvent::Disconnected(reason) => {
                self.bus.publish(SessionUpdate::Disconnected { reason });
            }
        }
    }

    /// Places a predicted batch after the watermark, plays and records it.
    pub fn play_predictions(&mut self, notes: Vec<PredictedNote>, now: f64) -> ScheduleOutcome {
        let outcome = self.client.schedule(notes, now);

        for note in &outcome.accepted {
            self.bus.ai_note(note);
            let code = note.instrument.code();
            self.recorder
                .record(KeyPhase::On, code, note.pitch, note.start, note.velocity);
            self.recorder
                .record(KeyPhase::Off, code, note.pitch, note.end, note.velocity);
        }

        self.bus.publish(SessionUpdate::Predicted {
            accepted: outcome.accepted.len(),
            discarded: outcome.discarded,
        });
        outcome
    }

    pub fn send_ui(&mut self, message: UiMessage, payload: Value) {
        self.client.send_ui(message, payload);
    }

    pub fn save_midi(&self) -> Result<PathBuf, ExportError> {
        self.recorder.export(&self.export_dir)
    }

    pub fn publish(&self, update: SessionUpdate) {
        self.bus.publish(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::{PredictionError, StreamHandle, Transport};
    use crate::recording::TrackKind;
    use crossbeam::channel::{Receiver, unbounded};
    use serde_json::json;

    fn streaming_session() -> (Session, Receiver<OutboundMessage>, Receiver<SessionUpdate>) {
        let config = SessionConfig::default();
        let (outbound, outbound_rx) = unbounded();
        let client = PredictionClient::new(Transport::Stream(StreamHandle::new(outbound)), &config);
        let (updates, updates_rx) = unbounded();
        let mut bus = SessionBus::new();
        bus.set_updates(updates);
        (Session::new(&config, client, bus), outbound_rx, updates_rx)
    }

    fn predicted(pitch: u8, start_time: f64, end_time: f64, instrument: u8) -> PredictedNote {
        PredictedNote {
            pitch,
            velocity: 90,
            start_time,
            end_time,
            instrument,
            duration: None,
        }
    }

    #[test]
    fn streaming_forwards_keys_and_skips_phrases() {
        let (mut session, outbound, _) = streaming_session();
        session.key_down(60, 110, 0.0);
        session.key_up(60, 1.0);

        assert_eq!(
            outbound.try_recv().unwrap(),
            OutboundMessage::KeyDown {
                note: 60,
                instrument: 16,
                velocity: 110
            }
        );
        assert_eq!(
            outbound.try_recv().unwrap(),
            OutboundMessage::KeyUp {
                note: 60,
                instrument: 16
            }
        );
        assert!(session.timeline().is_empty());
        assert_eq!(session.next_deadline(), None);
        assert_eq!(session.recorder().track(TrackKind::Player).notes().len(), 1);
    }

    #[test]
    fn pushed_predictions_are_recorded_per_instrument() {
        let (mut session, _, updates) = streaming_session();
        session.handle_client_event(
            ClientEvent::Inbound(InboundMessage::Predicted {
                kind: crate::prediction::PredictionKind::Drums,
                notes: vec![predicted(36, 0.0, 0.1, 9), predicted(64, 0.5, 1.0, 1)],
            }),
            1.0,
        );

        let drums = session.recorder().track(TrackKind::Drums).notes();
        assert_eq!(drums.len(), 1);
        assert!((drums[0].start_time - 1.05).abs() < 1e-9);
        assert_eq!(session.recorder().track(TrackKind::Ai1).notes().len(), 1);
        assert!((session.watermark() - 1.55).abs() < 1e-9);

        assert!(matches!(
            updates.try_recv().unwrap(),
            SessionUpdate::Predicted {
                accepted: 2,
                discarded: 0
            }
        ));
    }

    #[test]
    fn failures_and_config_sync_become_updates() {
        let (mut session, _, updates) = streaming_session();
        session.handle_client_event(ClientEvent::Predicted(Err(PredictionError::Timeout)), 0.0);
        session.handle_client_event(ClientEvent::Inbound(InboundMessage::ModelList(json!(["a"]))), 0.0);
        session.handle_client_event(ClientEvent::Disconnected("gone".into()), 0.0);

        assert!(matches!(updates.try_recv().unwrap(), SessionUpdate::Error { .. }));
        assert!(matches!(updates.try_recv().unwrap(), SessionUpdate::ModelList(v) if v == json!(["a"])));
        assert!(matches!(updates.try_recv().unwrap(), SessionUpdate::Disconnected { reason } if reason == "gone"));
    }

    #[test]
    fn ui_messages_go_out_on_the_stream() {
        let (mut session, outbound, _) = streaming_session();
        session.send_ui(UiMessage::SaveModel, json!("HMM"));
        assert_eq!(
            outbound.try_recv().unwrap(),
            OutboundMessage::Ui {
                message: UiMessage::SaveModel,
                payload: json!("HMM")
            }
        );
    }
}
