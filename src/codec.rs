//! The packet codec contract consumed by the session core.
//!
//! The codec owns wire serialization, the keep-alive protocol and the QoS
//! 1/2 packet-identifier state machine. The session core owns threading,
//! session lifecycle and retries. Every codec method is invoked with the
//! owning client's state lock held.

use std::io;

use bytes::BytesMut;
use thiserror::Error;

use crate::message::{ConnectOptions, PublishMessage, QoS, ReceivedPublish};

/// Byte-oriented I/O the codec drives while sending or receiving packets.
///
/// `recv` returns `Ok(0)` when no data is available; the codec retries on a
/// later process-loop pass.
pub trait NetworkIo {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Statuses reported by the codec.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("bad parameter")]
    BadParameter,
    #[error("packet does not fit the network buffer")]
    NoMemory,
    #[error("send failed")]
    SendFailed,
    #[error("receive failed")]
    RecvFailed,
    #[error("bad response from the broker")]
    BadResponse,
    #[error("broker refused the connection")]
    ServerRefused,
    #[error("no data available")]
    NoDataAvailable,
    #[error("illegal protocol state")]
    IllegalState,
    #[error("packet identifier collision")]
    StateCollision,
    #[error("keep-alive timeout")]
    KeepAliveTimeout,
}

impl CodecError {
    /// Statuses the receive pump treats as fatal for the session.
    pub(crate) fn is_terminal(self) -> bool {
        matches!(
            self,
            CodecError::RecvFailed
                | CodecError::SendFailed
                | CodecError::BadResponse
                | CodecError::IllegalState
                | CodecError::KeepAliveTimeout
        )
    }
}

/// Per-topic SUBACK return codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubAckCode {
    SuccessQos0,
    SuccessQos1,
    SuccessQos2,
    Failure,
}

impl SubAckCode {
    /// The QoS granted by the broker, or `None` for a rejected filter.
    pub fn granted_qos(self) -> Option<QoS> {
        match self {
            SubAckCode::SuccessQos0 => Some(QoS::AtMostOnce),
            SubAckCode::SuccessQos1 => Some(QoS::AtLeastOnce),
            SubAckCode::SuccessQos2 => Some(QoS::ExactlyOnce),
            SubAckCode::Failure => None,
        }
    }
}

/// Borrowed view of a subscription entry handed to the codec.
#[derive(Clone, Copy, Debug)]
pub struct TopicFilter<'a> {
    pub topic: &'a str,
    pub qos: QoS,
}

/// A deserialized broker packet surfaced during the codec process loop.
///
/// `ok` carries the deserialization verdict for packet types where the
/// codec reports one.
#[derive(Debug)]
pub enum IncomingPacket<'a> {
    Publish(ReceivedPublish<'a>),
    SubAck {
        packet_id: u16,
        codes: Result<&'a [SubAckCode], CodecError>,
    },
    UnsubAck {
        packet_id: u16,
    },
    PubAck {
        packet_id: u16,
        ok: bool,
    },
    PubRec {
        packet_id: u16,
        ok: bool,
    },
    PubRel {
        packet_id: u16,
    },
    PubComp {
        packet_id: u16,
    },
    PingResp {
        ok: bool,
    },
    Disconnect,
    Unknown(u8),
}

/// Upcall sink the codec dispatches packets into during `process_loop`.
pub trait EventSink {
    fn on_packet(&mut self, packet: IncomingPacket<'_>);
}

/// The MQTT v3.1.1 wire codec consumed by the session core.
pub trait Codec: Send {
    /// Bind the codec to its fixed scratch buffer. Called once at client
    /// creation.
    fn init(&mut self, buffer: BytesMut) -> Result<(), CodecError>;

    /// Send CONNECT and wait up to `timeout_ms` for the CONNACK. Returns the
    /// CONNACK sessionPresent flag.
    fn connect(
        &mut self,
        io: &mut dyn NetworkIo,
        options: &ConnectOptions<'_>,
        timeout_ms: u32,
    ) -> Result<bool, CodecError>;

    /// Serialize and send a PUBLISH, including the dup flag as given.
    ///
    /// Whether the codec additionally tracks dup state for packet ids it has
    /// seen before is implementation defined; the session always sets the
    /// flag on the stashed message before a retransmission.
    fn publish(
        &mut self,
        io: &mut dyn NetworkIo,
        message: &PublishMessage,
        packet_id: u16,
    ) -> Result<(), CodecError>;

    fn subscribe(
        &mut self,
        io: &mut dyn NetworkIo,
        filters: &[TopicFilter<'_>],
        packet_id: u16,
    ) -> Result<(), CodecError>;

    fn unsubscribe(
        &mut self,
        io: &mut dyn NetworkIo,
        filters: &[TopicFilter<'_>],
        packet_id: u16,
    ) -> Result<(), CodecError>;

    fn disconnect(&mut self, io: &mut dyn NetworkIo) -> Result<(), CodecError>;

    /// Advance I/O once: read at most one ready packet, dispatch it into
    /// `sink` and run the keep-alive protocol. A zero timeout drains without
    /// blocking beyond the transport's own receive timeout.
    fn process_loop(
        &mut self,
        io: &mut dyn NetworkIo,
        sink: &mut dyn EventSink,
        timeout_ms: u32,
    ) -> Result<(), CodecError>;

    /// The next packet identifier. Never returns zero.
    fn next_packet_id(&mut self) -> u16;

    /// Walk the packet ids of publishes the broker has not acknowledged, in
    /// original send order. `cursor` starts at zero; `None` ends the walk.
    fn publish_to_resend(&mut self, cursor: &mut usize) -> Option<u16>;
}
