//! Session lifecycle: CONNECT with bounded transport retry, clean vs
//! resumed session handling, publish-resend on resume, and orderly
//! disconnect.

use std::sync::Arc;

use crate::client::{Client, ClientShared, ClientState};
use crate::config::{CONNACK_RECV_TIMEOUT_MS, MESSAGE_SEND_TIMEOUT_MS, SOCKET_RECEIVE_TIMEOUT_MS};
use crate::error::{Error, Result};
use crate::library;
use crate::message::{ConnectOptions, QoS};
use crate::pump::ReceivePump;
use crate::retry::{RetryParams, RetryStatus};
use crate::transport::{DisconnectNotifier, TransportIo};

impl Client {
    /// Connect to the broker: the transport connection with bounded
    /// backoff-retry, then the MQTT CONNECT handshake. On a resumed session
    /// (`sessionPresent` with `clean_session` off), stashed QoS 1/2
    /// publishes are retransmitted before this returns.
    pub fn connect(&self, options: &ConnectOptions<'_>) -> Result<()> {
        let shared = &*self.shared;
        let slot = self.slot;

        // Transport phase. The state lock stays free so an existing receive
        // pump keeps idling.
        let mut retry = RetryParams::new();
        loop {
            let connected = {
                let mut transport = shared.transport.lock().unwrap();
                let tx = self.disconnect_tx.clone();
                let notifier: DisconnectNotifier =
                    Box::new(move || library::notify_transport_disconnect(&tx, slot));

                match transport.create(&shared.server, shared.credentials.as_ref(), notifier) {
                    Err(err) => {
                        error!("transport create failed: {}", err);
                        false
                    }
                    Ok(()) => {
                        info!(
                            "establishing a {} connection to {}:{}",
                            if shared.credentials.is_some() { "TLS" } else { "TCP" },
                            shared.server.host,
                            shared.server.port
                        );
                        match transport.connect(MESSAGE_SEND_TIMEOUT_MS, SOCKET_RECEIVE_TIMEOUT_MS)
                        {
                            Ok(()) => true,
                            Err(err) => {
                                error!("connection to the broker failed: {}", err);
                                let _ = transport.delete();
                                false
                            }
                        }
                    }
                }
            };

            if connected {
                break;
            }
            if retry.backoff_and_sleep() == RetryStatus::Exhausted {
                error!("connection to the broker failed, all attempts exhausted");
                return Err(Error::ConnectFail);
            }
        }

        info!("creating an MQTT connection to {}", shared.server.host);

        // CONNECT handshake under the state lock.
        {
            let mut state = shared.state.lock().unwrap();
            let session_present = {
                let ClientState { codec, .. } = &mut *state;
                let mut transport = shared.transport.lock().unwrap();
                let mut io = TransportIo::new(&mut **transport);
                codec.connect(&mut io, options, CONNACK_RECV_TIMEOUT_MS)
            };
            match session_present {
                Ok(present) => {
                    state.broker_session_present = present;
                    state.session_established = true;
                }
                Err(err) => {
                    error!("MQTT connection to the broker failed: {}", err);
                    drop(state);
                    self.unwind_connect();
                    return Err(Error::ConnectFail);
                }
            }
        }

        // Spawn the receive pump on the first successful connect.
        {
            let mut pump = shared.pump.lock().unwrap();
            if pump.is_none() {
                match ReceivePump::spawn(Arc::clone(&self.shared)) {
                    Ok(spawned) => *pump = Some(spawned),
                    Err(err) => {
                        error!("failed to spawn the receive thread: {}", err);
                        drop(pump);
                        self.unwind_connect();
                        return Err(Error::ConnectFail);
                    }
                }
            }
        }

        {
            let mut state = shared.state.lock().unwrap();
            if state.broker_session_present && !options.clean_session {
                info!("session re-established; resending unacknowledged publishes");
                if let Err(err) = resend_unacked_publishes(shared, &mut state) {
                    drop(state);
                    self.unwind_connect();
                    return Err(err);
                }
            } else {
                debug!("clean session established; dropping stashed publishes");
                state.store.clear_all();
            }
            state.conn_status = true;
        }

        info!("MQTT connection established with {}", shared.server.host);
        Ok(())
    }

    /// Send DISCONNECT and tear the network connection down. The receive
    /// pump is stopped first; transport errors are logged and swallowed so
    /// the state machine always reaches the disconnected state.
    pub fn disconnect(&self) -> Result<()> {
        let shared = &*self.shared;
        {
            let state = shared.state.lock().unwrap();
            if !state.conn_status {
                error!("disconnect on a client that is not connected");
                return Err(Error::NotConnected);
            }
        }

        // Stop the pump before taking the state lock for teardown.
        let pump = shared.pump.lock().unwrap().take();
        if let Some(pump) = pump {
            pump.stop();
        }

        let mut state = shared.state.lock().unwrap();
        {
            let ClientState { codec, .. } = &mut *state;
            let mut transport = shared.transport.lock().unwrap();
            let mut io = TransportIo::new(&mut **transport);
            if let Err(err) = codec.disconnect(&mut io) {
                error!("sending MQTT DISCONNECT failed: {}", err);
            }
        }
        state.session_established = false;

        {
            let mut transport = shared.transport.lock().unwrap();
            if let Err(err) = transport.disconnect() {
                error!("transport disconnect failed: {}", err);
            }
            if let Err(err) = transport.delete() {
                error!("transport delete failed: {}", err);
            }
        }
        state.conn_status = false;

        info!("disconnected from {}", shared.server.host);
        Ok(())
    }

    /// Unwind a partially established connection: best-effort MQTT
    /// DISCONNECT, pump shutdown and transport teardown, errors logged and
    /// swallowed.
    fn unwind_connect(&self) {
        let shared = &*self.shared;
        {
            let mut state = shared.state.lock().unwrap();
            if state.session_established {
                let ClientState { codec, .. } = &mut *state;
                let mut transport = shared.transport.lock().unwrap();
                let mut io = TransportIo::new(&mut **transport);
                if let Err(err) = codec.disconnect(&mut io) {
                    error!("sending MQTT DISCONNECT failed: {}", err);
                }
                state.session_established = false;
            }
        }

        let pump = shared.pump.lock().unwrap().take();
        if let Some(pump) = pump {
            pump.stop();
        }

        let mut transport = shared.transport.lock().unwrap();
        if let Err(err) = transport.disconnect() {
            error!("transport disconnect failed: {}", err);
        }
        if let Err(err) = transport.delete() {
            error!("transport delete failed: {}", err);
        }
    }
}

/// Walk the codec's resend cursor and retransmit every stashed QoS 1/2
/// publish under its original packet id with the dup flag set. The cursor
/// yields ids in original send order; an id without a stash entry fails the
/// resume.
fn resend_unacked_publishes(shared: &ClientShared, state: &mut ClientState) -> Result<()> {
    let mut cursor = 0;
    loop {
        let packet_id = match state.codec.publish_to_resend(&mut cursor) {
            Some(packet_id) => packet_id,
            None => break,
        };

        let ClientState { codec, store, .. } = &mut *state;
        let slot = match store.find_packet_id_mut(packet_id) {
            Some(slot) => slot,
            None => {
                error!(
                    "packet id {} requires a resend but is not stashed",
                    packet_id
                );
                return Err(Error::PublishFail);
            }
        };

        if slot.message.qos == QoS::AtMostOnce {
            debug!("no resend needed for QoS 0 packet id {}", packet_id);
            continue;
        }

        slot.message.dup = true;
        debug!("sending duplicate PUBLISH with packet id {}", packet_id);

        let mut transport = shared.transport.lock().unwrap();
        let mut io = TransportIo::new(&mut **transport);
        codec.publish(&mut io, &slot.message, packet_id).map_err(|err| {
            error!(
                "sending duplicate PUBLISH for packet id {} failed: {}",
                packet_id, err
            );
            Error::PublishFail
        })?;
    }
    Ok(())
}
