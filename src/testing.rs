//! Scripted codec and transport doubles shared by the test modules.
//!
//! Scripts live behind `Arc<Mutex<..>>` so a test keeps a handle for arming
//! behavior and asserting on recorded calls after the mock has been moved
//! into a client.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::BytesMut;

use crate::client::Client;
use crate::codec::{Codec, CodecError, EventSink, IncomingPacket, NetworkIo, SubAckCode};
use crate::library;
use crate::message::{
    ConnectOptions, DisconnectReason, Event, EventCallback, PublishMessage, QoS, ReceivedPublish,
};
use crate::transport::{Credentials, DisconnectNotifier, ServerInfo, Transport};

/// What the next `process_loop` call should do. An empty script idles.
pub enum ProcessAction {
    Idle,
    Deliver(OwnedPacket),
    Fail(CodecError),
}

/// Owned flavor of [`IncomingPacket`] so scripts can be built ahead of time.
pub enum OwnedPacket {
    Publish {
        packet_id: u16,
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
        dup: bool,
    },
    SubAck {
        packet_id: u16,
        codes: Result<Vec<SubAckCode>, CodecError>,
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
    PingResp {
        ok: bool,
    },
}

#[derive(Default)]
pub struct CodecScript {
    pub inited: bool,
    next_packet_id: u16,
    pub connect_results: VecDeque<Result<bool, CodecError>>,
    pub publish_results: VecDeque<Result<(), CodecError>>,
    pub process_actions: VecDeque<ProcessAction>,
    /// Packet ids the resend cursor yields after a resumed session.
    pub resend_ids: Vec<u16>,
    /// Arm a PUBACK for the n-th send of a packet id (1-based).
    pub ack_publish_on_attempt: Option<usize>,
    /// Arm a SUBACK carrying these codes for the next SUBSCRIBE.
    pub suback_codes: Option<Vec<SubAckCode>>,
    /// Arm an UNSUBACK for every UNSUBSCRIBE.
    pub ack_unsubscribes: bool,
    /// (topic, packet id, qos, dup) per PUBLISH send.
    pub sent_publishes: Vec<(String, u16, QoS, bool)>,
    pub sent_subscribes: Vec<(Vec<(String, QoS)>, u16)>,
    pub sent_unsubscribes: Vec<(Vec<String>, u16)>,
    pub disconnects: usize,
}

pub struct MockCodec {
    script: Arc<Mutex<CodecScript>>,
}

impl MockCodec {
    pub fn new() -> (MockCodec, Arc<Mutex<CodecScript>>) {
        let script = Arc::new(Mutex::new(CodecScript::default()));
        (
            MockCodec {
                script: Arc::clone(&script),
            },
            script,
        )
    }
}

impl Codec for MockCodec {
    fn init(&mut self, _buffer: BytesMut) -> Result<(), CodecError> {
        self.script.lock().unwrap().inited = true;
        Ok(())
    }

    fn connect(
        &mut self,
        _io: &mut dyn NetworkIo,
        _options: &ConnectOptions<'_>,
        _timeout_ms: u32,
    ) -> Result<bool, CodecError> {
        self.script
            .lock()
            .unwrap()
            .connect_results
            .pop_front()
            .unwrap_or(Ok(false))
    }

    fn publish(
        &mut self,
        _io: &mut dyn NetworkIo,
        message: &PublishMessage,
        packet_id: u16,
    ) -> Result<(), CodecError> {
        let mut script = self.script.lock().unwrap();
        script
            .sent_publishes
            .push((message.topic.clone(), packet_id, message.qos, message.dup));

        if let Some(ack_on) = script.ack_publish_on_attempt {
            let attempts = script
                .sent_publishes
                .iter()
                .filter(|(_, id, _, _)| *id == packet_id)
                .count();
            if attempts == ack_on {
                script
                    .process_actions
                    .push_back(ProcessAction::Deliver(OwnedPacket::PubAck {
                        packet_id,
                        ok: true,
                    }));
            }
        }

        script.publish_results.pop_front().unwrap_or(Ok(()))
    }

    fn subscribe(
        &mut self,
        _io: &mut dyn NetworkIo,
        filters: &[crate::codec::TopicFilter<'_>],
        packet_id: u16,
    ) -> Result<(), CodecError> {
        let mut script = self.script.lock().unwrap();
        script.sent_subscribes.push((
            filters
                .iter()
                .map(|filter| (filter.topic.to_string(), filter.qos))
                .collect(),
            packet_id,
        ));

        if let Some(codes) = script.suback_codes.clone() {
            script
                .process_actions
                .push_back(ProcessAction::Deliver(OwnedPacket::SubAck {
                    packet_id,
                    codes: Ok(codes),
                }));
        }
        Ok(())
    }

    fn unsubscribe(
        &mut self,
        _io: &mut dyn NetworkIo,
        filters: &[crate::codec::TopicFilter<'_>],
        packet_id: u16,
    ) -> Result<(), CodecError> {
        let mut script = self.script.lock().unwrap();
        script.sent_unsubscribes.push((
            filters.iter().map(|filter| filter.topic.to_string()).collect(),
            packet_id,
        ));

        if script.ack_unsubscribes {
            script
                .process_actions
                .push_back(ProcessAction::Deliver(OwnedPacket::UnsubAck { packet_id }));
        }
        Ok(())
    }

    fn disconnect(&mut self, _io: &mut dyn NetworkIo) -> Result<(), CodecError> {
        self.script.lock().unwrap().disconnects += 1;
        Ok(())
    }

    fn process_loop(
        &mut self,
        _io: &mut dyn NetworkIo,
        sink: &mut dyn EventSink,
        _timeout_ms: u32,
    ) -> Result<(), CodecError> {
        let action = self.script.lock().unwrap().process_actions.pop_front();
        match action {
            None | Some(ProcessAction::Idle) => Ok(()),
            Some(ProcessAction::Fail(err)) => Err(err),
            Some(ProcessAction::Deliver(packet)) => {
                deliver(sink, &packet);
                Ok(())
            }
        }
    }

    fn next_packet_id(&mut self) -> u16 {
        let mut script = self.script.lock().unwrap();
        script.next_packet_id = script.next_packet_id.wrapping_add(1).max(1);
        script.next_packet_id
    }

    fn publish_to_resend(&mut self, cursor: &mut usize) -> Option<u16> {
        let script = self.script.lock().unwrap();
        let packet_id = script.resend_ids.get(*cursor).copied();
        *cursor += 1;
        packet_id
    }
}

fn deliver(sink: &mut dyn EventSink, packet: &OwnedPacket) {
    match packet {
        OwnedPacket::Publish {
            packet_id,
            topic,
            payload,
            qos,
            retain,
            dup,
        } => sink.on_packet(IncomingPacket::Publish(ReceivedPublish {
            packet_id: *packet_id,
            topic,
            payload,
            qos: *qos,
            retain: *retain,
            dup: *dup,
        })),
        OwnedPacket::SubAck { packet_id, codes } => sink.on_packet(IncomingPacket::SubAck {
            packet_id: *packet_id,
            codes: match codes {
                Ok(codes) => Ok(codes.as_slice()),
                Err(err) => Err(*err),
            },
        }),
        OwnedPacket::UnsubAck { packet_id } => {
            sink.on_packet(IncomingPacket::UnsubAck {
                packet_id: *packet_id,
            })
        }
        OwnedPacket::PubAck { packet_id, ok } => sink.on_packet(IncomingPacket::PubAck {
            packet_id: *packet_id,
            ok: *ok,
        }),
        OwnedPacket::PubRec { packet_id, ok } => sink.on_packet(IncomingPacket::PubRec {
            packet_id: *packet_id,
            ok: *ok,
        }),
        OwnedPacket::PingResp { ok } => sink.on_packet(IncomingPacket::PingResp { ok: *ok }),
    }
}

#[derive(Default)]
pub struct TransportScript {
    pub create_results: VecDeque<Result<(), io::ErrorKind>>,
    pub connect_results: VecDeque<Result<(), io::ErrorKind>>,
    pub receive_results: VecDeque<Result<usize, io::ErrorKind>>,
    pub creates: usize,
    pub connects: usize,
    pub receives: usize,
    pub disconnects: usize,
    pub deletes: usize,
    pub sent: Vec<Vec<u8>>,
    /// The disconnect notifier captured at `create`; tests invoke it to
    /// simulate a network drop.
    pub notifier: Option<DisconnectNotifier>,
}

pub struct MockTransport {
    script: Arc<Mutex<TransportScript>>,
}

impl MockTransport {
    pub fn new() -> (MockTransport, Arc<Mutex<TransportScript>>) {
        let script = Arc::new(Mutex::new(TransportScript::default()));
        (
            MockTransport {
                script: Arc::clone(&script),
            },
            script,
        )
    }
}

impl Transport for MockTransport {
    fn create(
        &mut self,
        _server: &ServerInfo,
        _credentials: Option<&Credentials>,
        notifier: DisconnectNotifier,
    ) -> io::Result<()> {
        let mut script = self.script.lock().unwrap();
        script.creates += 1;
        script.notifier = Some(notifier);
        script
            .create_results
            .pop_front()
            .unwrap_or(Ok(()))
            .map_err(io::Error::from)
    }

    fn connect(&mut self, _send_timeout_ms: u32, _recv_timeout_ms: u32) -> io::Result<()> {
        let mut script = self.script.lock().unwrap();
        script.connects += 1;
        script
            .connect_results
            .pop_front()
            .unwrap_or(Ok(()))
            .map_err(io::Error::from)
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut script = self.script.lock().unwrap();
        script.sent.push(data.to_vec());
        Ok(data.len())
    }

    fn receive(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        let mut script = self.script.lock().unwrap();
        script.receives += 1;
        script
            .receive_results
            .pop_front()
            .unwrap_or(Ok(0))
            .map_err(io::Error::from)
    }

    fn disconnect(&mut self) -> io::Result<()> {
        self.script.lock().unwrap().disconnects += 1;
        Ok(())
    }

    fn delete(&mut self) -> io::Result<()> {
        self.script.lock().unwrap().deletes += 1;
        Ok(())
    }
}

/// Owned record of events seen by the application callback.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedEvent {
    Publish {
        packet_id: u16,
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
        dup: bool,
    },
    Disconnected(DisconnectReason),
}

pub fn recording_callback() -> (EventCallback, Arc<Mutex<Vec<RecordedEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let callback: EventCallback = Box::new(move |event| {
        let recorded = match event {
            Event::PublishReceived(publish) => RecordedEvent::Publish {
                packet_id: publish.packet_id,
                topic: publish.topic.to_string(),
                payload: publish.payload.to_vec(),
                qos: publish.qos,
                retain: publish.retain,
                dup: publish.dup,
            },
            Event::Disconnected(reason) => RecordedEvent::Disconnected(reason),
        };
        sink.lock().unwrap().push(recorded);
    });
    (callback, events)
}

pub struct Rig {
    pub client: Client,
    pub codec: Arc<Mutex<CodecScript>>,
    pub transport: Arc<Mutex<TransportScript>>,
    pub events: Arc<Mutex<Vec<RecordedEvent>>>,
}

pub fn broker() -> ServerInfo {
    ServerInfo {
        host: "broker.test".into(),
        port: 8883,
    }
}

pub fn options() -> ConnectOptions<'static> {
    ConnectOptions {
        client_id: "c1",
        keep_alive_sec: 60,
        clean_session: true,
        username: None,
        password: None,
        will: None,
    }
}

/// Route crate logs to the test harness output.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A created (but unconnected) client over fresh mocks. Initializes the
/// library if needed.
pub fn rig() -> Rig {
    init_logging();
    library::init().unwrap();
    let (codec, codec_script) = MockCodec::new();
    let (transport, transport_script) = MockTransport::new();
    let (callback, events) = recording_callback();

    let client = Client::create(
        BytesMut::with_capacity(8 * 1024),
        None,
        broker(),
        Box::new(codec),
        Box::new(transport),
        callback,
    )
    .unwrap();
    assert!(codec_script.lock().unwrap().inited);

    Rig {
        client,
        codec: codec_script,
        transport: transport_script,
        events,
    }
}

pub fn connected_rig() -> Rig {
    let rig = rig();
    rig.client.connect(&options()).unwrap();
    rig
}

/// Attempt creation with a buffer of exactly `capacity` bytes, without
/// touching library initialization.
pub fn try_create(capacity: usize) -> crate::error::Result<Client> {
    init_logging();
    let (codec, _) = MockCodec::new();
    let (transport, _) = MockTransport::new();
    let (callback, _) = recording_callback();

    Client::create(
        BytesMut::with_capacity(capacity),
        None,
        broker(),
        Box::new(codec),
        Box::new(transport),
        callback,
    )
}

/// Attempt creation against an initialized library.
pub fn try_rig_with_buffer(capacity: usize) -> crate::error::Result<Client> {
    library::init().unwrap();
    try_create(capacity)
}

/// Poll `condition` every few milliseconds for up to `timeout_ms`.
pub fn wait_until<F: Fn() -> bool>(condition: F, timeout_ms: u64) -> bool {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}
