//! Socket.IO (v5) over Engine.IO (v4) text frames, the way the predictor
//! server speaks on its websocket.
//!
//! Only the subset a client needs is handled: open/ping/pong at the
//! Engine.IO level and connect/event/error at the Socket.IO level.

use serde_json::{Value, json};
use thiserror::Error;

use super::PredictedNote;

pub const PONG: &str = "3";
pub const CONNECT: &str = "40";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,
    #[error("unknown packet type {0:?}")]
    UnknownPacket(char),
    #[error("invalid packet payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event packet is not a [name, ...] array")]
    BadEvent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Value),
    Close,
    Ping,
    Pong,
    Noop,
    Connect(Value),
    Disconnect,
    ConnectError(Value),
    Event { name: String, data: Value },
}

pub fn encode_event(name: &str, data: &Value) -> String {
    format!("42{}", json!([name, data]))
}

pub fn decode(frame: &str) -> Result<Packet, ProtocolError> {
    let mut chars = frame.chars();
    let kind = chars.next().ok_or(ProtocolError::Empty)?;
    let rest = chars.as_str();

    match kind {
        '0' => Ok(Packet::Open(parse_optional(rest)?)),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_message(rest),
        '6' => Ok(Packet::Noop),
        other => Err(ProtocolError::UnknownPacket(other)),
    }
}

fn decode_message(body: &str) -> Result<Packet, ProtocolError> {
    let mut chars = body.chars();
    let kind = chars.next().ok_or(ProtocolError::Empty)?;
    let payload = strip_header(chars.as_str());

    match kind {
        '0' => Ok(Packet::Connect(parse_optional(payload)?)),
        '1' => Ok(Packet::Disconnect),
        '2' => decode_event(payload),
        '4' => Ok(Packet::ConnectError(parse_optional(payload)?)),
        other => Err(ProtocolError::UnknownPacket(other)),
    }
}

/// Drops an optional `/namespace,` prefix and ack id digits.
fn strip_header(payload: &str) -> &str {
    let payload = if payload.starts_with('/') {
        payload.split_once(',').map_or("", |(_, tail)| tail)
    } else {
        payload
    };
    payload.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn parse_optional(payload: &str) -> Result<Value, ProtocolError> {
    if payload.is_empty() {
        Ok(Value::Null)
    } else {
        Ok(serde_json::from_str(payload)?)
    }
}

fn decode_event(payload: &str) -> Result<Packet, ProtocolError> {
    let Value::Array(mut items) = serde_json::from_str(payload)? else {
        return Err(ProtocolError::BadEvent);
    };
    if items.is_empty() {
        return Err(ProtocolError::BadEvent);
    }
    let Value::String(name) = items.remove(0) else {
        return Err(ProtocolError::BadEvent);
    };
    let data = items.into_iter().next().unwrap_or(Value::Null);

    Ok(Packet::Event { name, data })
}

/// Configuration messages the front end pushes to the predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiMessage {
    Reload,
    ChangeModel,
    Submit,
    SaveModel,
    UpdateModel,
}

impl UiMessage {
    pub fn name(self) -> &'static str {
        match self {
            UiMessage::Reload => "reload",
            UiMessage::ChangeModel => "changeHMM",
            UiMessage::Submit => "submit",
            UiMessage::SaveModel => "saveHMM",
            UiMessage::UpdateModel => "updateHMM",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "reload" => Some(UiMessage::Reload),
            "changeHMM" => Some(UiMessage::ChangeModel),
            "submit" => Some(UiMessage::Submit),
            "saveHMM" => Some(UiMessage::SaveModel),
            "updateHMM" => Some(UiMessage::UpdateModel),
            _ => None,
        }
    }

    /// Payload for a message typed as plain text. Model names and JSON
    /// documents both travel as strings; the server decodes the documents itself.
    pub fn payload_from_text(self, text: &str) -> Value {
        match self {
            UiMessage::Reload => json!({}),
            UiMessage::SaveModel if text.is_empty() => Value::String("HMM".into()),
            UiMessage::ChangeModel | UiMessage::SaveModel | UiMessage::Submit | UiMessage::UpdateModel => {
                Value::String(text.to_string())
            }
        }
    }

    /// `submit` and `updateHMM` carry a serialized JSON document, never an object.
    fn wire_payload(self, payload: &Value) -> Value {
        match (self, payload) {
            (UiMessage::Submit | UiMessage::UpdateModel, Value::String(_)) => payload.clone(),
            (UiMessage::Submit | UiMessage::UpdateModel, other) => Value::String(other.to_string()),
            _ => payload.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    KeyDown { note: u8, instrument: u8, velocity: u8 },
    KeyUp { note: u8, instrument: u8 },
    Ui { message: UiMessage, payload: Value },
}

impl OutboundMessage {
    pub fn event(&self) -> (&'static str, Value) {
        match self {
            OutboundMessage::KeyDown {
                note,
                instrument,
                velocity,
            } => (
                "keydown",
                json!({ "note": note, "instrument": instrument, "velocity": velocity }),
            ),
            OutboundMessage::KeyUp { note, instrument } => {
                ("keyup", json!({ "note": note, "instrument": instrument }))
            }
            OutboundMessage::Ui { message, payload } => (message.name(), message.wire_payload(payload)),
        }
    }

    pub fn encode(&self) -> String {
        let (name, data) = self.event();
        encode_event(name, &data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionKind {
    Melody,
    Drums,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Predicted {
        kind: PredictionKind,
        notes: Vec<PredictedNote>,
    },
    ModelList(Value),
    ModelAdded(Value),
    UiConfig(Value),
    Diagnostic(Value),
}

impl InboundMessage {
    /// `Ok(None)` for events this client does not consume.
    pub fn from_event(name: &str, data: Value) -> Result<Option<Self>, serde_json::Error> {
        let message = match name {
            "predicted-melody" => InboundMessage::Predicted {
                kind: PredictionKind::Melody,
                notes: serde_json::from_value(data)?,
            },
            "predicted-drums" => InboundMessage::Predicted {
                kind: PredictionKind::Drums,
                notes: serde_json::from_value(data)?,
            },
            "setHmmList" => InboundMessage::ModelList(data),
            "updateHmmList" => InboundMessage::ModelAdded(data),
            "uiConfig" => InboundMessage::UiConfig(data),
            "msg" => InboundMessage::Diagnostic(data),
            _ => return Ok(None),
        };
        Ok(Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_engine_packets() {
        assert_eq!(decode("2").unwrap(), Packet::Ping);
        assert_eq!(decode("3").unwrap(), Packet::Pong);
        assert_eq!(decode("6").unwrap(), Packet::Noop);
        let open = decode(r#"0{"sid":"abc","pingInterval":25000}"#).unwrap();
        assert!(matches!(open, Packet::Open(v) if v["sid"] == "abc"));
        assert!(matches!(decode(""), Err(ProtocolError::Empty)));
        assert!(matches!(decode("9"), Err(ProtocolError::UnknownPacket('9'))));
    }

    #[test]
    fn decodes_connect_and_events() {
        assert!(matches!(decode("40").unwrap(), Packet::Connect(Value::Null)));
        assert!(matches!(decode(r#"40{"sid":"x"}"#).unwrap(), Packet::Connect(v) if v["sid"] == "x"));

        let event = decode(r#"42["msg","hello"]"#).unwrap();
        assert_eq!(
            event,
            Packet::Event {
                name: "msg".into(),
                data: json!("hello")
            }
        );

        let namespaced = decode(r#"42/duet,7["setHmmList",["a","b"]]"#).unwrap();
        assert!(matches!(namespaced, Packet::Event { name, .. } if name == "setHmmList"));

        assert!(matches!(decode("42{}"), Err(ProtocolError::BadEvent)));
        assert!(matches!(decode("42[]"), Err(ProtocolError::BadEvent)));
    }

    #[test]
    fn encodes_key_messages() {
        let down = OutboundMessage::KeyDown {
            note: 60,
            instrument: 16,
            velocity: 100,
        };
        let Packet::Event { name, data } = decode(&down.encode()).unwrap() else {
            panic!("expected an event");
        };
        assert_eq!(name, "keydown");
        assert_eq!(data, json!({ "note": 60, "instrument": 16, "velocity": 100 }));

        let ui = OutboundMessage::Ui {
            message: UiMessage::ChangeModel,
            payload: json!("new"),
        };
        assert_eq!(ui.encode(), r#"42["changeHMM","new"]"#);
    }

    #[test]
    fn config_documents_are_sent_as_strings() {
        let submit = OutboundMessage::Ui {
            message: UiMessage::Submit,
            payload: json!({ "init": "x" }),
        };
        assert_eq!(submit.encode(), r#"42["submit","{\"init\":\"x\"}"]"#);

        let update = OutboundMessage::Ui {
            message: UiMessage::UpdateModel,
            payload: json!(r#"{"a":1}"#),
        };
        assert_eq!(update.encode(), r#"42["updateHMM","{\"a\":1}"]"#);
    }

    #[test]
    fn text_payloads_per_message() {
        assert_eq!(UiMessage::Reload.payload_from_text("ignored"), json!({}));
        assert_eq!(UiMessage::ChangeModel.payload_from_text("jazz"), json!("jazz"));
        assert_eq!(UiMessage::SaveModel.payload_from_text(""), json!("HMM"));
        assert_eq!(
            UiMessage::Submit.payload_from_text(r#"{"init":"x","note":"y"}"#),
            json!(r#"{"init":"x","note":"y"}"#)
        );
        assert_eq!(UiMessage::UpdateModel.payload_from_text("{}"), json!("{}"));
    }

    #[test]
    fn ui_names_round_trip() {
        for message in [
            UiMessage::Reload,
            UiMessage::ChangeModel,
            UiMessage::Submit,
            UiMessage::SaveModel,
            UiMessage::UpdateModel,
        ] {
            assert_eq!(UiMessage::from_name(message.name()), Some(message));
        }
    }

    #[test]
    fn inbound_predictions_need_all_fields() {
        let ok = InboundMessage::from_event(
            "predicted-melody",
            json!([{ "pitch": 60, "velocity": 100, "start_time": 0.0, "end_time": 0.5, "instrument": 1 }]),
        )
        .unwrap();
        assert!(matches!(ok, Some(InboundMessage::Predicted { kind: PredictionKind::Melody, notes }) if notes.len() == 1));

        let missing = InboundMessage::from_event("predicted-drums", json!([{ "pitch": 36 }]));
        assert!(missing.is_err());

        assert_eq!(InboundMessage::from_event("other", Value::Null).unwrap(), None);
    }
}
