//! The per-client receive pump.
//!
//! One worker per client, spawned on the first successful CONNECT. While a
//! session is established it drains the codec process loop under the state
//! lock, then sleeps with the lock released so requests and the disconnect
//! worker can interleave.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::client::ClientShared;
use crate::codec::CodecError;
use crate::config::RECEIVE_THREAD_SLEEP_MS;
use crate::message::{DisconnectReason, Event};

static PUMP_SERIAL: AtomicUsize = AtomicUsize::new(0);

pub(crate) struct ReceivePump {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl ReceivePump {
    pub fn spawn(shared: Arc<ClientShared>) -> std::io::Result<ReceivePump> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let serial = PUMP_SERIAL.fetch_add(1, Ordering::Relaxed) + 1;

        let thread = thread::Builder::new()
            .name(format!("mqtt-recv-{}", serial))
            .spawn(move || run(shared, flag))?;

        Ok(ReceivePump { stop, thread })
    }

    /// Signal the pump to stop and wait for it to finish its iteration.
    /// Callers must not hold the client state lock.
    pub fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        if self.thread.join().is_err() {
            error!("receive thread panicked");
        }
    }
}

fn run(shared: Arc<ClientShared>, stop: Arc<AtomicBool>) {
    debug!("receive thread started");

    while !stop.load(Ordering::Relaxed) {
        {
            let mut state = shared.state.lock().unwrap();
            if state.session_established {
                if let Err(err) = shared.drive(&mut state) {
                    if err.is_terminal() {
                        error!("process loop failed in the receive thread: {}", err);
                        if err == CodecError::KeepAliveTimeout {
                            (shared.callback)(Event::Disconnected(DisconnectReason::BrokerDown));
                            state.session_established = false;
                        }
                    }
                }
            }
        }

        thread::sleep(Duration::from_millis(RECEIVE_THREAD_SLEEP_MS));
    }

    debug!("receive thread exiting");
}
