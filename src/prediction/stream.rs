use std::io;
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, TryRecvError, unbounded};
use thiserror::Error;
use tracing::{debug, info, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use super::protocol::{self, InboundMessage, OutboundMessage, Packet, ProtocolError};
use super::{ClientEvent, PredictionError};

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("predictor refused the connection: {0}")]
    Rejected(String),
    #[error("stream channel is closed")]
    Closed,
}

/// Sending side of the streaming channel, owned by the prediction client.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    outbound: Sender<OutboundMessage>,
}

impl StreamHandle {
    pub fn new(outbound: Sender<OutboundMessage>) -> Self {
        Self { outbound }
    }

    pub fn emit(&self, message: OutboundMessage) -> Result<(), TransportError> {
        self.outbound
            .send(message)
            .map_err(|_| TransportError::Closed)
    }
}

/// Opens the websocket, joins the default namespace and hands the socket
/// to a worker thread. Inbound traffic is posted to `events`; a lost
/// connection is reported once and never retried here.
pub fn connect_stream(url: &str, events: Sender<ClientEvent>) -> Result<StreamHandle, TransportError> {
    let (mut socket, _response) = tungstenite::connect(url)?;
    set_read_timeout(&socket, HANDSHAKE_TIMEOUT)?;
    handshake(&mut socket)?;
    set_read_timeout(&socket, POLL_INTERVAL)?;
    info!(url, "connected to predictor stream");

    let (outbound, outbound_rx) = unbounded();
    thread::Builder::new()
        .name("predictor-stream".into())
        .spawn(move || stream_loop(socket, outbound_rx, events))?;

    Ok(StreamHandle::new(outbound))
}

fn set_read_timeout(socket: &Socket, timeout: Duration) -> io::Result<()> {
    match socket.get_ref() {
        MaybeTlsStream::Plain(stream) => stream.set_read_timeout(Some(timeout)),
        _ => Ok(()),
    }
}

fn send_text(socket: &mut Socket, text: &str) -> Result<(), TransportError> {
    socket.send(Message::Text(text.to_owned()))?;
    Ok(())
}

fn handshake(socket: &mut Socket) -> Result<(), TransportError> {
    loop {
        let Message::Text(frame) = socket.read()? else {
            continue;
        };
        match protocol::decode(&frame)? {
            Packet::Open(info) => {
                debug!(%info, "engine.io open");
                send_text(socket, protocol::CONNECT)?;
            }
            Packet::Ping => send_text(socket, protocol::PONG)?,
            Packet::Connect(_) => return Ok(()),
            Packet::ConnectError(reason) => return Err(TransportError::Rejected(reason.to_string())),
            Packet::Close | Packet::Disconnect => return Err(TransportError::Closed),
            _ => {}
        }
    }
}

fn is_idle(err: &tungstenite::Error) -> bool {
    matches!(err, tungstenite::Error::Io(e)
        if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut))
}

fn stream_loop(mut socket: Socket, outbound: Receiver<OutboundMessage>, events: Sender<ClientEvent>) {
    let reason = loop {
        match drain_outbound(&mut socket, &outbound) {
            Ok(true) => {}
            Ok(false) => {
                let _ = socket.close(None);
                let _ = socket.flush();
                return;
            }
            Err(e) => break e.to_string(),
        }

        match socket.read() {
            Ok(Message::Text(frame)) => match handle_frame(&mut socket, &frame, &events) {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => break e.to_string(),
            },
            Ok(Message::Close(_)) => break "closed by predictor".to_string(),
            Ok(_) => {}
            Err(e) if is_idle(&e) => {}
            Err(e) => break e.to_string(),
        }
    };

    warn!("predictor stream lost: {}", reason);
    let _ = events.send(ClientEvent::Disconnected(reason));
}

/// `Ok(false)` once the session dropped its handle.
fn drain_outbound(socket: &mut Socket, outbound: &Receiver<OutboundMessage>) -> Result<bool, TransportError> {
    loop {
        match outbound.try_recv() {
            Ok(message) => send_text(socket, &message.encode())?,
            Err(TryRecvError::Empty) => return Ok(true),
            Err(TryRecvError::Disconnected) => return Ok(false),
        }
    }
}

/// `Ok(false)` once nobody listens for events anymore.
fn handle_frame(socket: &mut Socket, frame: &str, events: &Sender<ClientEvent>) -> Result<bool, TransportError> {
    let packet = match protocol::decode(frame) {
        Ok(packet) => packet,
        Err(e) => {
            warn!("dropping undecodable frame: {}", e);
            return Ok(true);
        }
    };

    let event = match packet {
        Packet::Ping => {
            send_text(socket, protocol::PONG)?;
            return Ok(true);
        }
        Packet::Close | Packet::Disconnect => return Err(TransportError::Closed),
        Packet::Event { name, data } => match InboundMessage::from_event(&name, data) {
            Ok(Some(message)) => ClientEvent::Inbound(message),
            Ok(None) => {
                debug!(event = %name, "ignoring unknown event");
                return Ok(true);
            }
            Err(e) => ClientEvent::Predicted(Err(PredictionError::Malformed(e))),
        },
        _ => return Ok(true),
    };

    Ok(events.send(event).is_ok())
}
