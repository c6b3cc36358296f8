//! MQTT client objects: creation, deletion and the request path.
//!
//! All mutable per-client state lives behind one lock; the receive pump,
//! the disconnect event worker and application threads take turns on it.
//! A request (publish, subscribe, unsubscribe) holds the lock for its whole
//! duration, including the ACK wait, during which it drives the codec
//! process loop itself.

use std::array;
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use crossbeam_channel::Sender;

use crate::codec::{Codec, CodecError, SubAckCode, TopicFilter};
use crate::config::{
    ACK_RECEIVE_TIMEOUT_MS, MAX_OUTGOING_PUBLISHES, MAX_OUTGOING_SUBSCRIBES, MAX_RETRY_VALUE,
    MIN_NETWORK_BUFFER_SIZE, RECEIVE_DATA_TIMEOUT_MS, SOCKET_RECEIVE_TIMEOUT_MS,
};
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::library;
use crate::message::{DisconnectReason, Event, EventCallback, PublishMessage, QoS, Subscription};
use crate::pump::ReceivePump;
use crate::transport::{Credentials, ServerInfo, Transport, TransportIo};

/// A stashed outgoing QoS 1/2 PUBLISH awaiting acknowledgement, kept so a
/// resumed session can retransmit it.
#[derive(Clone, Debug)]
pub(crate) struct StoredPublish {
    pub packet_id: u16,
    pub message: PublishMessage,
}

/// Fixed-size store of outgoing publishes in flight or held over between
/// sessions. Stored packet ids are nonzero and pairwise distinct; a free
/// slot holds `None`.
pub(crate) struct PublishStore {
    slots: [Option<StoredPublish>; MAX_OUTGOING_PUBLISHES],
}

impl PublishStore {
    pub fn new() -> Self {
        PublishStore {
            slots: array::from_fn(|_| None),
        }
    }

    pub fn free_index(&self) -> Option<usize> {
        self.slots.iter().position(|slot| slot.is_none())
    }

    pub fn insert(&mut self, index: usize, publish: StoredPublish) {
        self.slots[index] = Some(publish);
    }

    pub fn get(&self, index: usize) -> Option<&StoredPublish> {
        self.slots.get(index)?.as_ref()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut StoredPublish> {
        self.slots.get_mut(index)?.as_mut()
    }

    pub fn find_packet_id(&self, packet_id: u16) -> Option<&StoredPublish> {
        self.slots
            .iter()
            .flatten()
            .find(|slot| slot.packet_id == packet_id)
    }

    pub fn find_packet_id_mut(&mut self, packet_id: u16) -> Option<&mut StoredPublish> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|slot| slot.packet_id == packet_id)
    }

    pub fn clear(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = None;
        }
    }

    /// Drop the stash entry carrying `packet_id`, if any.
    pub fn clear_packet_id(&mut self, packet_id: u16) {
        for slot in self.slots.iter_mut() {
            if slot.as_ref().map(|stored| stored.packet_id) == Some(packet_id) {
                debug!("cleaned up outgoing PUBLISH with packet id {}", packet_id);
                *slot = None;
                break;
            }
        }
    }

    pub fn clear_all(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }

    #[cfg(test)]
    pub fn occupied(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}

/// Rendezvous slot for the in-flight PUBACK/PUBREC of the current publish.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct PubAckStatus {
    pub packet_id: u16,
    pub acked: bool,
}

/// Rendezvous state between the request path and the event dispatcher.
#[derive(Debug)]
pub(crate) struct AckState {
    pub pub_ack: PubAckStatus,
    /// Per-topic SUBACK codes for the in-flight SUBSCRIBE.
    pub sub_codes: [SubAckCode; MAX_OUTGOING_SUBSCRIBES],
    /// Topics in the outstanding SUBSCRIBE; zero when none is in flight or
    /// its SUBACK has been processed.
    pub num_subs_in_req: u8,
    /// The SUBACK arrived but its return codes could not be reconciled with
    /// the request.
    pub suback_mismatch: bool,
    pub unsub_ack_received: bool,
    /// Packet id expected on the in-flight SUBACK/UNSUBACK.
    pub sent_packet_id: u16,
}

impl AckState {
    pub fn new() -> Self {
        AckState {
            pub_ack: PubAckStatus::default(),
            sub_codes: [SubAckCode::Failure; MAX_OUTGOING_SUBSCRIBES],
            num_subs_in_req: 0,
            suback_mismatch: false,
            unsub_ack_received: false,
            sent_packet_id: 0,
        }
    }
}

pub(crate) struct ClientState {
    pub codec: Box<dyn Codec>,
    pub session_established: bool,
    pub broker_session_present: bool,
    pub conn_status: bool,
    pub store: PublishStore,
    pub acks: AckState,
}

pub(crate) struct ClientShared {
    pub server: ServerInfo,
    pub credentials: Option<Credentials>,
    pub callback: EventCallback,
    pub state: Mutex<ClientState>,
    pub transport: Mutex<Box<dyn Transport>>,
    pub pump: Mutex<Option<ReceivePump>>,
}

impl ClientShared {
    /// Drive the codec process loop once. Caller holds the state lock.
    pub(crate) fn drive(&self, state: &mut ClientState) -> std::result::Result<(), CodecError> {
        let ClientState {
            codec,
            store,
            acks,
            session_established,
            ..
        } = state;

        let mut transport = self.transport.lock().unwrap();
        let mut io = TransportIo::new(&mut **transport);
        let mut sink = Dispatcher {
            store,
            acks,
            session_established,
            callback: self.callback.as_ref(),
        };
        codec.process_loop(&mut io, &mut sink, RECEIVE_DATA_TIMEOUT_MS)
    }

    /// Deliver a transport-originated disconnect. Runs on the disconnect
    /// event worker.
    pub(crate) fn on_transport_disconnect(&self) {
        let mut state = self.state.lock().unwrap();
        if state.session_established {
            (self.callback)(Event::Disconnected(DisconnectReason::NetworkDown));
            state.session_established = false;
        }
    }
}

/// Handle to an MQTT client session.
///
/// Dropping the handle tears the session down; prefer [`Client::delete`]
/// to observe teardown errors.
pub struct Client {
    pub(crate) shared: Arc<ClientShared>,
    pub(crate) slot: usize,
    pub(crate) disconnect_tx: Sender<usize>,
    deleted: bool,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("slot", &self.slot).finish()
    }
}

impl Client {
    /// Create a client bound to `broker`.
    ///
    /// `buffer` is the codec's scratch network buffer and must hold at
    /// least [`MIN_NETWORK_BUFFER_SIZE`] bytes. Passing `credentials` puts
    /// the transport in secure mode. The callback observes incoming
    /// publishes and asynchronous disconnects; any per-client context
    /// belongs in its captures.
    pub fn create(
        buffer: BytesMut,
        credentials: Option<Credentials>,
        broker: ServerInfo,
        codec: Box<dyn Codec>,
        transport: Box<dyn Transport>,
        callback: EventCallback,
    ) -> Result<Client> {
        if buffer.capacity() < MIN_NETWORK_BUFFER_SIZE {
            error!(
                "network buffer of {} bytes is below the minimum of {}",
                buffer.capacity(),
                MIN_NETWORK_BUFFER_SIZE
            );
            return Err(Error::BadArg);
        }

        let mut codec = codec;
        codec.init(buffer).map_err(|err| {
            error!("codec initialization failed: {}", err);
            Error::CreateFail
        })?;

        let shared = Arc::new(ClientShared {
            server: broker,
            credentials,
            callback,
            state: Mutex::new(ClientState {
                codec,
                session_established: false,
                broker_session_present: false,
                conn_status: false,
                store: PublishStore::new(),
                acks: AckState::new(),
            }),
            transport: Mutex::new(transport),
            pump: Mutex::new(None),
        });

        let (slot, disconnect_tx) = library::register_client(Arc::downgrade(&shared))?;
        debug!("created mqtt client in slot {}", slot);

        Ok(Client {
            shared,
            slot,
            disconnect_tx,
            deleted: false,
        })
    }

    /// Tear the client down and release its handle slot. A client that is
    /// still connected is disconnected first.
    pub fn delete(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        if self.deleted {
            return Ok(());
        }
        self.deleted = true;

        let connected = self.shared.state.lock().unwrap().conn_status;
        if connected {
            warn!("deleting a connected client; disconnecting first");
            self.disconnect()?;
        }

        library::unregister_client(self.slot);
        debug!("deleted mqtt client in slot {}", self.slot);
        Ok(())
    }

    /// Publish `message` to the broker. QoS 0 returns as soon as the packet
    /// is sent; QoS 1/2 block until the broker acknowledges or retries are
    /// exhausted.
    pub fn publish(&self, message: PublishMessage) -> Result<()> {
        let shared = &*self.shared;
        let mut state = shared.state.lock().unwrap();

        if !state.session_established {
            error!("publish without an established session");
            return Err(Error::NotConnected);
        }

        let index = match state.store.free_index() {
            Some(index) => index,
            None => {
                error!("no free slot for an outgoing PUBLISH");
                return Err(Error::PublishFail);
            }
        };

        let qos = message.qos;
        let packet_id = state.codec.next_packet_id();
        state.store.insert(index, StoredPublish { packet_id, message });
        state.acks.pub_ack = PubAckStatus {
            packet_id,
            acked: false,
        };
        debug!("publishing packet id {} at {:?}", packet_id, qos);

        let mut outcome = Err(Error::PublishFail);
        let mut attempts = 0;
        loop {
            state.acks.pub_ack.acked = false;

            match send_stored_publish(shared, &mut state, index) {
                Err(err) => {
                    error!("failed to send the PUBLISH packet: {}", err);
                    outcome = Err(Error::PublishFail);
                }
                Ok(()) => {
                    if qos == QoS::AtMostOnce {
                        outcome = Ok(());
                    } else if wait_for_ack(shared, &mut state, |acks| acks.pub_ack.acked) {
                        outcome = Ok(());
                    } else {
                        error!("no acknowledgement for packet id {} in time", packet_id);
                        outcome = Err(Error::PublishFail);
                    }
                    // A further attempt is a retransmission.
                    if let Some(slot) = state.store.get_mut(index) {
                        slot.message.dup = true;
                    }
                }
            }

            attempts += 1;
            if outcome.is_ok() || attempts >= MAX_RETRY_VALUE {
                break;
            }
        }

        if outcome.is_err() {
            error!("PUBLISH gave up after {} attempts", attempts);
            state.store.clear(index);
        } else if qos == QoS::AtMostOnce {
            state.store.clear(index);
        }
        outcome
    }

    /// Subscribe to every entry of `subscriptions`, filling `allocated_qos`
    /// with the broker's grant. Succeeds when the broker accepted at least
    /// one filter.
    pub fn subscribe(&self, subscriptions: &mut [Subscription]) -> Result<()> {
        if subscriptions.is_empty() || subscriptions.len() > MAX_OUTGOING_SUBSCRIBES {
            error!("subscription count {} is out of range", subscriptions.len());
            return Err(Error::BadArg);
        }
        for subscription in subscriptions.iter_mut() {
            subscription.allocated_qos = None;
        }

        let shared = &*self.shared;
        let mut state = shared.state.lock().unwrap();
        if !state.session_established {
            error!("subscribe without an established session");
            return Err(Error::NotConnected);
        }

        let count = subscriptions.len() as u8;
        let mut outcome = Err(Error::SubscribeFail);
        let mut attempts = 0;
        loop {
            state.acks.sub_codes = [SubAckCode::Failure; MAX_OUTGOING_SUBSCRIBES];
            state.acks.suback_mismatch = false;
            state.acks.num_subs_in_req = count;
            let packet_id = state.codec.next_packet_id();
            state.acks.sent_packet_id = packet_id;
            let mut completed = false;

            match send_subscribe(shared, &mut state, subscriptions, packet_id) {
                Err(err) => {
                    error!("failed to send the SUBSCRIBE packet: {}", err);
                    outcome = Err(Error::SubscribeFail);
                }
                Ok(()) => {
                    completed = wait_for_ack(shared, &mut state, |acks| acks.num_subs_in_req == 0);
                    if !completed {
                        error!("no SUBACK for packet id {} in time", packet_id);
                        outcome = Err(Error::SubscribeFail);
                    } else if state.acks.suback_mismatch {
                        outcome = Err(Error::Protocol);
                    } else {
                        outcome = Err(Error::SubscribeFail);
                        for (index, subscription) in subscriptions.iter_mut().enumerate() {
                            subscription.allocated_qos = state.acks.sub_codes[index].granted_qos();
                            match subscription.allocated_qos {
                                Some(granted) => {
                                    info!(
                                        "SUBSCRIBE accepted for topic {} with {:?}",
                                        subscription.topic, granted
                                    );
                                    outcome = Ok(());
                                }
                                None => info!(
                                    "broker rejected the SUBSCRIBE request for topic {}",
                                    subscription.topic
                                ),
                            }
                        }
                    }
                }
            }

            attempts += 1;
            if completed || attempts >= MAX_RETRY_VALUE {
                break;
            }
        }

        // No subscribe is in flight past this point.
        state.acks.num_subs_in_req = 0;
        outcome
    }

    /// Unsubscribe from every entry of `subscriptions`.
    pub fn unsubscribe(&self, subscriptions: &[Subscription]) -> Result<()> {
        if subscriptions.is_empty() {
            error!("empty unsubscribe request");
            return Err(Error::BadArg);
        }
        if subscriptions.len() > MAX_OUTGOING_SUBSCRIBES {
            error!(
                "at most {} topic filters fit a single UNSUBSCRIBE request",
                MAX_OUTGOING_SUBSCRIBES
            );
            return Err(Error::UnsubscribeFail);
        }

        let shared = &*self.shared;
        let mut state = shared.state.lock().unwrap();
        if !state.session_established {
            error!("unsubscribe without an established session");
            return Err(Error::NotConnected);
        }

        let mut outcome = Err(Error::UnsubscribeFail);
        let mut attempts = 0;
        loop {
            state.acks.unsub_ack_received = false;
            let packet_id = state.codec.next_packet_id();
            state.acks.sent_packet_id = packet_id;
            let mut completed = false;

            match send_unsubscribe(shared, &mut state, subscriptions, packet_id) {
                Err(err) => {
                    error!("failed to send the UNSUBSCRIBE packet: {}", err);
                    outcome = Err(Error::UnsubscribeFail);
                }
                Ok(()) => {
                    completed = wait_for_ack(shared, &mut state, |acks| acks.unsub_ack_received);
                    if completed {
                        outcome = Ok(());
                    } else {
                        error!("no UNSUBACK for packet id {} in time", packet_id);
                        outcome = Err(Error::UnsubscribeFail);
                    }
                }
            }

            attempts += 1;
            if completed || attempts >= MAX_RETRY_VALUE {
                break;
            }
        }
        outcome
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            error!("client teardown on drop failed: {}", err);
        }
    }
}

fn send_stored_publish(
    shared: &ClientShared,
    state: &mut ClientState,
    index: usize,
) -> std::result::Result<(), CodecError> {
    let ClientState { codec, store, .. } = state;
    match store.get(index) {
        Some(slot) => {
            let mut transport = shared.transport.lock().unwrap();
            let mut io = TransportIo::new(&mut **transport);
            codec.publish(&mut io, &slot.message, slot.packet_id)
        }
        None => Err(CodecError::BadParameter),
    }
}

fn send_subscribe(
    shared: &ClientShared,
    state: &mut ClientState,
    subscriptions: &[Subscription],
    packet_id: u16,
) -> std::result::Result<(), CodecError> {
    let filters: Vec<TopicFilter<'_>> = subscriptions
        .iter()
        .map(|subscription| TopicFilter {
            topic: &subscription.topic,
            qos: subscription.qos,
        })
        .collect();

    let ClientState { codec, .. } = state;
    let mut transport = shared.transport.lock().unwrap();
    let mut io = TransportIo::new(&mut **transport);
    codec.subscribe(&mut io, &filters, packet_id)
}

fn send_unsubscribe(
    shared: &ClientShared,
    state: &mut ClientState,
    subscriptions: &[Subscription],
    packet_id: u16,
) -> std::result::Result<(), CodecError> {
    let filters: Vec<TopicFilter<'_>> = subscriptions
        .iter()
        .map(|subscription| TopicFilter {
            topic: &subscription.topic,
            qos: subscription.qos,
        })
        .collect();

    let ClientState { codec, .. } = state;
    let mut transport = shared.transport.lock().unwrap();
    let mut io = TransportIo::new(&mut **transport);
    codec.unsubscribe(&mut io, &filters, packet_id)
}

/// Drive the process loop until `done` observes the awaited ACK or the
/// budget runs out. The budget counts down by the socket receive timeout
/// per pass, so a quiet broker costs `ACK_RECEIVE_TIMEOUT_MS` of polling.
fn wait_for_ack<F>(shared: &ClientShared, state: &mut ClientState, mut done: F) -> bool
where
    F: FnMut(&AckState) -> bool,
{
    let mut timeout = ACK_RECEIVE_TIMEOUT_MS;
    while timeout > 0 {
        if let Err(err) = shared.drive(state) {
            error!("process loop failed while waiting for an ack: {}", err);
            return false;
        }
        if done(&state.acks) {
            return true;
        }
        timeout = timeout.saturating_sub(SOCKET_RECEIVE_TIMEOUT_MS);
    }
    false
}
