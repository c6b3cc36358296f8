//! Process-wide library state: the handle registry plus the disconnect
//! event queue and its worker thread.
//!
//! Transport disconnect callbacks run on unknown threads under unknown
//! locks, so they only enqueue the owning client's slot index here. The
//! worker dequeues, resolves the owner through the registry and fires the
//! application callback under the client's own state lock.

use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::client::ClientShared;
use crate::config::{DISCONNECT_EVENT_QUEUE_TIMEOUT_MS, MAX_HANDLE};
use crate::error::{Error, Result};
use crate::registry::HandleRegistry;

static LIBRARY: Mutex<Option<LibraryState>> = Mutex::new(None);

struct LibraryState {
    registry: HandleRegistry<ClientShared>,
    disconnect_tx: Sender<usize>,
    worker: JoinHandle<()>,
}

/// Initialize process-wide state and start the disconnect event worker.
/// Idempotent: a second call is a logged no-op.
pub fn init() -> Result<()> {
    let mut library = LIBRARY.lock().unwrap();
    if library.is_some() {
        info!("mqtt library is already initialized");
        return Ok(());
    }

    let (disconnect_tx, disconnect_rx) = bounded(MAX_HANDLE);
    let worker = thread::Builder::new()
        .name("mqtt-disconnect-events".into())
        .spawn(move || disconnect_event_worker(disconnect_rx))
        .map_err(|err| {
            error!("failed to spawn the disconnect event worker: {}", err);
            Error::CreateFail
        })?;

    *library = Some(LibraryState {
        registry: HandleRegistry::new(),
        disconnect_tx,
        worker,
    });
    debug!("mqtt library initialized");
    Ok(())
}

/// Tear down process-wide state. Fails while any client still exists.
pub fn deinit() -> Result<()> {
    let state = {
        let mut library = LIBRARY.lock().unwrap();
        match library.as_ref() {
            None => {
                error!("mqtt library is not initialized");
                return Err(Error::DeinitFail);
            }
            Some(state) if !state.registry.is_empty() => {
                error!("mqtt deinit refused with {} live clients", state.registry.len());
                return Err(Error::DeinitFail);
            }
            Some(_) => {}
        }
        library.take().unwrap()
    };

    let LibraryState {
        disconnect_tx,
        worker,
        ..
    } = state;

    // The worker loop ends when the last queue sender is gone.
    drop(disconnect_tx);
    if worker.join().is_err() {
        error!("disconnect event worker panicked");
    }
    debug!("mqtt library deinitialized");
    Ok(())
}

/// Store a new client in the registry; returns its slot index and a sender
/// for wiring transport disconnect notifications.
pub(crate) fn register_client(client: Weak<ClientShared>) -> Result<(usize, Sender<usize>)> {
    let mut library = LIBRARY.lock().unwrap();
    let state = library.as_mut().ok_or_else(|| {
        error!("mqtt library is not initialized");
        Error::CreateFail
    })?;

    let slot = state.registry.register(client).ok_or_else(|| {
        error!("no free slot for a new client handle");
        Error::CreateFail
    })?;
    Ok((slot, state.disconnect_tx.clone()))
}

pub(crate) fn unregister_client(slot: usize) {
    if let Some(state) = LIBRARY.lock().unwrap().as_mut() {
        state.registry.unregister(slot);
    }
}

fn resolve_client(slot: usize) -> Option<Arc<ClientShared>> {
    LIBRARY.lock().unwrap().as_ref()?.registry.resolve(slot)?.upgrade()
}

/// Queue a transport disconnect notification. Called from the transport's
/// own thread; a full queue drops the event with a log, the next request on
/// the client surfaces the failure synchronously.
pub(crate) fn notify_transport_disconnect(tx: &Sender<usize>, slot: usize) {
    info!("network disconnection notification from the transport");
    let timeout = Duration::from_millis(DISCONNECT_EVENT_QUEUE_TIMEOUT_MS);
    if let Err(err) = tx.send_timeout(slot, timeout) {
        error!("failed to queue the disconnect event for slot {}: {}", slot, err);
    }
}

fn disconnect_event_worker(rx: Receiver<usize>) {
    debug!("disconnect event worker started");
    while let Ok(slot) = rx.recv() {
        match resolve_client(slot) {
            Some(client) => client.on_transport_disconnect(),
            None => warn!("disconnect event for a vanished client in slot {}", slot),
        }
    }
    debug!("disconnect event worker exiting");
}
